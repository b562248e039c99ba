use crate::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

/// Loads the election keypair, generating and persisting it on first use.
///
/// The keypair is cached after the first call. The cache lock is held across
/// load-or-generate so two concurrent first callers cannot produce two
/// different keypairs.
pub struct KeyManager<K> {
    store: K,
    limits: KeygenLimits,
    cached: Mutex<Option<Arc<Keypair>>>,
}

impl<K: KeyStore> KeyManager<K> {
    pub fn new(store: K, limits: KeygenLimits) -> Self {
        KeyManager {
            store,
            limits,
            cached: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &K {
        &self.store
    }

    pub fn keypair(&self) -> Result<Arc<Keypair>, Error> {
        let mut cached = self.cached.lock();
        if let Some(keypair) = cached.as_ref() {
            return Ok(keypair.clone());
        }

        let keypair = match self.store.load()? {
            Some(keypair) => {
                info!("loaded existing RSA keypair");
                keypair
            }
            None => {
                info!(bits = self.limits.prime_bits, "no RSA keypair found, generating one");
                let keypair = generate_keypair(&self.limits)?;
                match self.store.persist(&keypair) {
                    Ok(()) => keypair,
                    // Another process won the race; use its keys, not ours.
                    Err(e) if e.is_already_exists() => self.store.load()?.ok_or(e)?,
                    Err(e) => return Err(e),
                }
            }
        };

        let keypair = Arc::new(keypair);
        *cached = Some(keypair.clone());
        Ok(keypair)
    }

    /// The stored keypair, never generating one. Fails with
    /// `Error::KeysNotAvailable` if none has been persisted yet.
    pub fn existing_keypair(&self) -> Result<Arc<Keypair>, Error> {
        let mut cached = self.cached.lock();
        if let Some(keypair) = cached.as_ref() {
            return Ok(keypair.clone());
        }

        let keypair = Arc::new(self.store.load()?.ok_or(Error::KeysNotAvailable)?);
        *cached = Some(keypair.clone());
        Ok(keypair)
    }
}

/// What a voter sees when they identify themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VoterCheck {
    Unknown,
    AlreadyVoted,
    Eligible { candidates: Vec<String> },
}

/// An election: keypair, ballot log and voter roll wired together.
///
/// This is the explicit context that replaces any process-global key state;
/// construct one at startup and share it by reference.
pub struct Election<K, L, V> {
    candidates: Vec<String>,
    keys: KeyManager<K>,
    log: L,
    roll: V,
    // Held across check, seal, append and mark so two ballots cannot race
    write_lock: Mutex<()>,
}

impl Election<FileKeyStore, FileBallotLog, FileVoterRoll> {
    /// File-backed election using the paths in `config`.
    pub fn from_config(config: &Config) -> Self {
        Election::new(
            config.candidates.clone(),
            KeyManager::new(FileKeyStore::new(&config.key_path), config.keygen.clone()),
            FileBallotLog::new(&config.votes_path),
            FileVoterRoll::new(&config.voters_path),
        )
    }
}

impl<K: KeyStore, L: BallotLog, V: VoterRoll> Election<K, L, V> {
    pub fn new(candidates: Vec<String>, keys: KeyManager<K>, log: L, roll: V) -> Self {
        Election {
            candidates,
            keys,
            log,
            roll,
            write_lock: Mutex::new(()),
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn keypair(&self) -> Result<Arc<Keypair>, Error> {
        self.keys.keypair()
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn roll(&self) -> &V {
        &self.roll
    }

    pub fn check_voter(&self, voter_id: &str) -> Result<VoterCheck, Error> {
        Ok(match self.roll.status(voter_id.trim())? {
            VoterStatus::Unknown => VoterCheck::Unknown,
            VoterStatus::Voted => VoterCheck::AlreadyVoted,
            VoterStatus::NotVoted => VoterCheck::Eligible {
                candidates: self.candidates.clone(),
            },
        })
    }

    /// Seal a vote for `candidates()[candidate_index]` and record that the
    /// voter has voted.
    ///
    /// If the ballot cannot be stored nothing changes and the vote can be
    /// retried. If the ballot is stored but the roll cannot be updated the
    /// ballot stays in the log and `Error::VoterStatusNotRecorded` is
    /// returned; the roll then still allows this voter to vote again, so
    /// an operator must reconcile it.
    pub fn cast_vote(&self, voter_id: &str, candidate_index: usize) -> Result<BallotRecord, Error> {
        let voter_id = voter_id.trim();
        let candidate = self
            .candidates
            .get(candidate_index)
            .ok_or(Error::InvalidCandidate(candidate_index))?;

        let _guard = self.write_lock.lock();

        match self.roll.status(voter_id)? {
            VoterStatus::Unknown => return Err(Error::UnknownVoter(voter_id.to_owned())),
            VoterStatus::Voted => return Err(Error::AlreadyVoted(voter_id.to_owned())),
            VoterStatus::NotVoted => {}
        }

        let keypair = self.keys.keypair()?;
        let record = seal_and_append(&self.log, voter_id, candidate, &keypair)?;

        if let Err(e) = self.roll.mark_voted(voter_id) {
            error!(
                voter_id,
                "ballot appended but voter roll not updated, roll and log disagree: {}", e
            );
            return Err(Error::VoterStatusNotRecorded {
                voter_id: voter_id.to_owned(),
                source: Box::new(e),
            });
        }

        info!(voter_id, "vote recorded");
        Ok(record)
    }

    /// Decrypt and tally every ballot in the log.
    ///
    /// Callers are expected to have authorized the request already. Never
    /// generates keys: with no stored keypair this fails with
    /// `Error::KeysNotAvailable`.
    pub fn tally(&self) -> Result<TallyReport, Error> {
        let keypair = self.keys.existing_keypair()?;
        let entries = self.log.read_all()?;
        Ok(open_entries(&keypair, &entries))
    }

    /// Delete every ballot and mark every voter as not having voted.
    pub fn reset(&self) -> Result<(), Error> {
        let _guard = self.write_lock.lock();
        self.log.clear()?;
        self.roll.reset_all()?;
        info!("all votes cleared and voter statuses reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limits() -> KeygenLimits {
        KeygenLimits {
            prime_bits: 32,
            ..KeygenLimits::default()
        }
    }

    fn mem_election() -> Election<MemKeyStore, MemBallotLog, MemVoterRoll> {
        Election::new(
            DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect(),
            KeyManager::new(MemKeyStore::default(), limits()),
            MemBallotLog::default(),
            MemVoterRoll::with_voters(&DEFAULT_VOTERS),
        )
    }

    /// Counts persists so tests can check generation happens once.
    #[derive(Default)]
    struct CountingKeyStore {
        inner: MemKeyStore,
        persists: AtomicUsize,
    }

    impl KeyStore for CountingKeyStore {
        fn load(&self) -> Result<Option<Keypair>, Error> {
            self.inner.load()
        }

        fn persist(&self, keypair: &Keypair) -> Result<(), Error> {
            self.persists.fetch_add(1, Ordering::SeqCst);
            self.inner.persist(keypair)
        }
    }

    /// A roll that refuses to record votes.
    struct StuckRoll;

    impl VoterRoll for StuckRoll {
        fn status(&self, _voter_id: &str) -> Result<VoterStatus, Error> {
            Ok(VoterStatus::NotVoted)
        }

        fn mark_voted(&self, _voter_id: &str) -> Result<(), Error> {
            Err(Error::Config("read-only roll".to_owned()))
        }

        fn reset_all(&self) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn test_keypair_generated_once() {
        let keys = KeyManager::new(CountingKeyStore::default(), limits());

        let keypairs: Vec<Arc<Keypair>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| keys.keypair().unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(keys.store().persists.load(Ordering::SeqCst), 1);
        for keypair in &keypairs {
            assert_eq!(**keypair, *keypairs[0]);
        }
    }

    #[test]
    fn test_keypair_reused_from_store() {
        let store = MemKeyStore::default();
        let existing = generate_keypair(&limits()).unwrap();
        store.persist(&existing).unwrap();

        let keys = KeyManager::new(store, limits());
        assert_eq!(*keys.keypair().unwrap(), existing);
    }

    #[test]
    fn test_check_voter() {
        let election = mem_election();
        assert_eq!(election.check_voter("9999").unwrap(), VoterCheck::Unknown);
        match election.check_voter(" 1001 ").unwrap() {
            VoterCheck::Eligible { candidates } => assert_eq!(candidates.len(), 3),
            other => panic!("unexpected {:?}", other),
        }

        election.cast_vote("1001", 0).unwrap();
        assert_eq!(election.check_voter("1001").unwrap(), VoterCheck::AlreadyVoted);
    }

    #[test]
    fn test_cast_vote_rejections() {
        let election = mem_election();

        assert!(matches!(election.cast_vote("1001", 3), Err(Error::InvalidCandidate(3))));
        assert!(matches!(election.cast_vote("9999", 0), Err(Error::UnknownVoter(_))));

        election.cast_vote("1001", 1).unwrap();
        assert!(matches!(election.cast_vote("1001", 1), Err(Error::AlreadyVoted(_))));

        // Only the accepted vote reached the log
        assert_eq!(election.log().len(), 1);
    }

    #[test]
    fn test_roll_failure_is_reported() {
        let election = Election::new(
            vec!["A".to_owned()],
            KeyManager::new(MemKeyStore::default(), limits()),
            MemBallotLog::default(),
            StuckRoll,
        );

        match election.cast_vote("1001", 0) {
            Err(Error::VoterStatusNotRecorded { voter_id, .. }) => assert_eq!(voter_id, "1001"),
            other => panic!("unexpected {:?}", other),
        }
        // The ballot itself was kept
        assert_eq!(election.log().len(), 1);
    }

    #[test]
    fn test_tally_without_keys() {
        let election = mem_election();
        assert!(matches!(election.tally(), Err(Error::KeysNotAvailable)));
        assert!(election.keys.store().load().unwrap().is_none());

        election.cast_vote("1001", 2).unwrap();
        assert_eq!(election.tally().unwrap().winners, vec!["Candidate - C".to_owned()]);
    }

    #[test]
    fn test_tally_and_reset() {
        let election = mem_election();
        election.cast_vote("1001", 0).unwrap();
        election.cast_vote("1002", 1).unwrap();
        election.cast_vote("1003", 0).unwrap();

        let report = election.tally().unwrap();
        assert_eq!(report.plaintexts.len(), 3);
        assert_eq!(report.tally["Candidate - A"], 2);
        assert_eq!(report.tally["Candidate - B"], 1);
        assert_eq!(report.winners, vec!["Candidate - A".to_owned()]);

        election.reset().unwrap();
        assert_eq!(election.tally().unwrap(), TallyReport::default());
        assert!(matches!(
            election.check_voter("1001").unwrap(),
            VoterCheck::Eligible { .. }
        ));
    }
}
