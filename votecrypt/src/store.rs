use crate::*;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Durable home of the election keypair.
pub trait KeyStore: Send + Sync {
    /// Load the stored keypair, or `None` if none has been persisted yet.
    fn load(&self) -> Result<Option<Keypair>, Error>;

    /// Persist the keypair. Fails if one is already stored.
    fn persist(&self, keypair: &Keypair) -> Result<(), Error>;
}

/// One line of the ballot log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntry {
    Record(BallotRecord),

    /// A line that could not be parsed, e.g. a torn write
    Malformed { line: usize, reason: String },
}

/// Append-only log of sealed ballots.
pub trait BallotLog: Send + Sync {
    /// Append one record. Either the whole record lands or nothing does.
    fn append(&self, record: &BallotRecord) -> Result<(), Error>;

    /// Read every entry in append order.
    fn read_all(&self) -> Result<Vec<LogEntry>, Error>;

    /// Remove every record.
    fn clear(&self) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoterStatus {
    Unknown,
    NotVoted,
    Voted,
}

/// The voter roll: who may vote and who already has.
pub trait VoterRoll: Send + Sync {
    fn status(&self, voter_id: &str) -> Result<VoterStatus, Error>;

    fn mark_voted(&self, voter_id: &str) -> Result<(), Error>;

    /// Mark every voter as not having voted.
    fn reset_all(&self) -> Result<(), Error>;
}

/// Keypair stored as a JSON object of decimal strings.
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileKeyStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> Result<Option<Keypair>, Error> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage("read key file", &self.path, e)),
        };

        let keypair: Keypair = serde_json::from_str(&contents).map_err(|e| {
            Error::storage(
                "parse key file",
                &self.path,
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })?;
        keypair.validate()?;

        Ok(Some(keypair))
    }

    fn persist(&self, keypair: &Keypair) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(keypair)?;
        ensure_parent(&self.path)?;

        // Write the full file aside, then link it into place: the link fails if
        // a keypair already exists, and a reader never sees a half-written file.
        let tmp = self
            .path
            .with_extension(format!("tmp.{}", std::process::id()));
        let written = write_synced(&tmp, json.as_bytes())
            .map_err(|e| Error::storage("write key file", &tmp, e))
            .and_then(|_| {
                fs::hard_link(&tmp, &self.path)
                    .map_err(|e| Error::storage("create key file", &self.path, e))
            });
        let _ = fs::remove_file(&tmp);
        written?;

        info!(path = %self.path.display(), "persisted RSA keypair");
        Ok(())
    }
}

/// Newline-delimited JSON ballot log.
pub struct FileBallotLog {
    path: PathBuf,
}

impl FileBallotLog {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileBallotLog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BallotLog for FileBallotLog {
    fn append(&self, record: &BallotRecord) -> Result<(), Error> {
        let mut line = record.to_line()?;
        line.push('\n');
        ensure_parent(&self.path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::storage("open ballot log", &self.path, e))?;

        // A torn final line must stay on its own line, not swallow this record.
        let torn = ends_mid_line(&mut file)
            .map_err(|e| Error::storage("read ballot log", &self.path, e))?;
        if torn {
            warn!(path = %self.path.display(), "ballot log ends with a partial line");
            line.insert(0, '\n');
        }

        // One write per record; O_APPEND keeps whole lines from interleaving.
        file.write_all(line.as_bytes())
            .and_then(|_| file.sync_data())
            .map_err(|e| {
                error!(path = %self.path.display(), "ballot append failed: {}", e);
                Error::storage("append to ballot log", &self.path, e)
            })
    }

    fn read_all(&self) -> Result<Vec<LogEntry>, Error> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(Error::storage("read ballot log", &self.path, e)),
        };

        let entries = contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| match BallotRecord::from_line(line) {
                Ok(record) => LogEntry::Record(record),
                Err(e) => LogEntry::Malformed {
                    line: i + 1,
                    reason: e.to_string(),
                },
            })
            .collect();

        Ok(entries)
    }

    fn clear(&self) -> Result<(), Error> {
        ensure_parent(&self.path)?;
        File::create(&self.path)
            .and_then(|file| file.sync_all())
            .map_err(|e| Error::storage("truncate ballot log", &self.path, e))
    }
}

/// Voter roll stored as `voter_id,status` lines, status `0` or `1`.
pub struct FileVoterRoll {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileVoterRoll {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        FileVoterRoll {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the roll with the given voters, none of whom has voted, unless
    /// a roll already exists.
    pub fn seed_if_missing<S: AsRef<str>>(&self, voter_ids: &[S]) -> Result<(), Error> {
        let _guard = self.lock.lock();
        if self.path.exists() {
            return Ok(());
        }
        let voters = voter_ids
            .iter()
            .map(|id| (id.as_ref().to_owned(), false))
            .collect();
        self.save(&voters)?;
        info!(path = %self.path.display(), count = voter_ids.len(), "seeded voter roll");
        Ok(())
    }

    fn load(&self) -> Result<IndexMap<String, bool>, Error> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(IndexMap::new()),
            Err(e) => return Err(Error::storage("read voter roll", &self.path, e)),
        };

        let mut voters = IndexMap::new();
        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split(',');
            let (id, status) = match (parts.next(), parts.next()) {
                (Some(id), Some(status)) => (id.trim(), status.trim()),
                _ => continue,
            };
            let voted = match status {
                "0" => false,
                "1" => true,
                other => {
                    return Err(Error::storage(
                        "parse voter roll",
                        &self.path,
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("line {}: invalid status {:?}", i + 1, other),
                        ),
                    ))
                }
            };
            voters.insert(id.to_owned(), voted);
        }
        Ok(voters)
    }

    fn save(&self, voters: &IndexMap<String, bool>) -> Result<(), Error> {
        let mut contents = String::new();
        for (id, voted) in voters {
            contents.push_str(id);
            contents.push_str(if *voted { ",1\n" } else { ",0\n" });
        }
        ensure_parent(&self.path)?;

        // Write beside the roll and rename over it so readers never see half a file.
        let tmp = self.path.with_extension("tmp");
        write_synced(&tmp, contents.as_bytes())
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| Error::storage("write voter roll", &self.path, e))
    }
}

impl VoterRoll for FileVoterRoll {
    fn status(&self, voter_id: &str) -> Result<VoterStatus, Error> {
        let _guard = self.lock.lock();
        Ok(match self.load()?.get(voter_id) {
            None => VoterStatus::Unknown,
            Some(false) => VoterStatus::NotVoted,
            Some(true) => VoterStatus::Voted,
        })
    }

    fn mark_voted(&self, voter_id: &str) -> Result<(), Error> {
        let _guard = self.lock.lock();
        let mut voters = self.load()?;
        match voters.get_mut(voter_id) {
            Some(voted) => *voted = true,
            None => return Err(Error::UnknownVoter(voter_id.to_owned())),
        }
        self.save(&voters)
    }

    fn reset_all(&self) -> Result<(), Error> {
        let _guard = self.lock.lock();
        let mut voters = self.load()?;
        voters.values_mut().for_each(|voted| *voted = false);
        self.save(&voters)
    }
}

/// True if the file is non-empty and its last byte is not a newline.
fn ends_mid_line(file: &mut File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}

fn write_synced(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

fn ensure_parent(path: &Path) -> Result<(), Error> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .map_err(|e| Error::storage("create directory", parent, e)),
        _ => Ok(()),
    }
}

/// A simple key store that keeps the keypair in memory
#[derive(Default)]
pub struct MemKeyStore {
    inner: Mutex<Option<Keypair>>,
}

impl KeyStore for MemKeyStore {
    fn load(&self) -> Result<Option<Keypair>, Error> {
        Ok(self.inner.lock().clone())
    }

    fn persist(&self, keypair: &Keypair) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            return Err(Error::storage(
                "persist keypair to",
                Path::new("<memory>"),
                io::Error::new(io::ErrorKind::AlreadyExists, "keypair already stored"),
            ));
        }
        *inner = Some(keypair.clone());
        Ok(())
    }
}

/// A simple ballot log that uses an in-memory Vec
#[derive(Default)]
pub struct MemBallotLog {
    inner: Mutex<Vec<LogEntry>>,
}

impl MemBallotLog {
    /// Push a raw entry, bypassing serialization. Useful for simulating corruption.
    pub fn push_entry(&self, entry: LogEntry) {
        self.inner.lock().push(entry);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl BallotLog for MemBallotLog {
    fn append(&self, record: &BallotRecord) -> Result<(), Error> {
        self.inner.lock().push(LogEntry::Record(record.clone()));
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LogEntry>, Error> {
        Ok(self.inner.lock().clone())
    }

    fn clear(&self) -> Result<(), Error> {
        self.inner.lock().clear();
        Ok(())
    }
}

impl From<Vec<BallotRecord>> for MemBallotLog {
    fn from(records: Vec<BallotRecord>) -> Self {
        MemBallotLog {
            inner: Mutex::new(records.into_iter().map(LogEntry::Record).collect()),
        }
    }
}

/// A simple voter roll that uses an in-memory IndexMap
#[derive(Default)]
pub struct MemVoterRoll {
    inner: Mutex<IndexMap<String, bool>>,
}

impl MemVoterRoll {
    pub fn with_voters<S: AsRef<str>>(voter_ids: &[S]) -> Self {
        let voters = voter_ids
            .iter()
            .map(|id| (id.as_ref().to_owned(), false))
            .collect();
        MemVoterRoll {
            inner: Mutex::new(voters),
        }
    }
}

impl VoterRoll for MemVoterRoll {
    fn status(&self, voter_id: &str) -> Result<VoterStatus, Error> {
        Ok(match self.inner.lock().get(voter_id) {
            None => VoterStatus::Unknown,
            Some(false) => VoterStatus::NotVoted,
            Some(true) => VoterStatus::Voted,
        })
    }

    fn mark_voted(&self, voter_id: &str) -> Result<(), Error> {
        match self.inner.lock().get_mut(voter_id) {
            Some(voted) => {
                *voted = true;
                Ok(())
            }
            None => Err(Error::UnknownVoter(voter_id.to_owned())),
        }
    }

    fn reset_all(&self) -> Result<(), Error> {
        self.inner.lock().values_mut().for_each(|voted| *voted = false);
        Ok(())
    }
}
