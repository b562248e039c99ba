use crate::*;
use indexmap::IndexMap;
use rayon::prelude::*;
use std::fmt;
use tracing::{info, warn};

/// The outcome of opening one ballot record.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Opening {
    Decrypted { vote: String },
    Failed { reason: String },
}

impl Opening {
    /// The recovered candidate, if decryption succeeded.
    pub fn vote(&self) -> Option<&str> {
        match self {
            Opening::Decrypted { vote } => Some(vote),
            Opening::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Opening::Failed { .. })
    }
}

impl fmt::Display for Opening {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Opening::Decrypted { vote } => write!(f, "{}", vote),
            Opening::Failed { reason } => write!(f, "[DECRYPT_ERROR: {}]", reason),
        }
    }
}

/// Full result of opening a ballot log.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TallyReport {
    /// One entry per log record, in log order
    pub plaintexts: Vec<Opening>,

    /// Votes per candidate, in order of first appearance
    pub tally: IndexMap<String, usize>,

    /// Every candidate tied for the highest count
    pub winners: Vec<String>,
}

impl TallyReport {
    pub fn from_openings(plaintexts: Vec<Opening>) -> Self {
        let mut tally: IndexMap<String, usize> = IndexMap::new();
        for vote in plaintexts.iter().filter_map(Opening::vote) {
            *tally.entry(vote.to_owned()).or_insert(0) += 1;
        }
        let winners = winners(&tally);

        TallyReport {
            plaintexts,
            tally,
            winners,
        }
    }

    pub fn num_decrypted(&self) -> usize {
        self.tally.values().sum()
    }

    pub fn num_failed(&self) -> usize {
        self.plaintexts.iter().filter(|o| o.is_failed()).count()
    }
}

/// All candidates whose count equals the maximum. Ties are kept, not broken.
pub fn winners(tally: &IndexMap<String, usize>) -> Vec<String> {
    let max = match tally.values().max() {
        Some(max) => *max,
        None => return vec![],
    };
    tally
        .iter()
        .filter(|(_, count)| **count == max)
        .map(|(candidate, _)| candidate.clone())
        .collect()
}

/// Open a single record: unwrap its key, then decrypt its vote.
pub fn open_record<W: KeyWrap + ?Sized>(
    wrapper: &W,
    private: &PrivateKey,
    record: &BallotRecord,
) -> Opening {
    let opened = wrapper
        .unwrap(&record.enc_key, private)
        .and_then(|key| cipher::decrypt(&record.enc_vote, &key));

    match opened {
        Ok(vote) => Opening::Decrypted { vote },
        Err(e) => {
            warn!(voter_id = %record.voter_id, "unable to open ballot: {}", e);
            Opening::Failed {
                reason: e.to_string(),
            }
        }
    }
}

/// Decrypt every record and tally the results.
///
/// A record that fails to open is reported in place and left out of the
/// tally; it never fails the batch. Read-only: the same records always give
/// the same report.
pub fn open_all(keypair: &Keypair, log: &[BallotRecord]) -> TallyReport {
    let private = keypair.private_key();
    let plaintexts = open_in_order(log, |record| open_record(&TextbookRsa, &private, record));
    report(plaintexts)
}

/// Like [`open_all`], but over raw log entries, so unparseable lines show up
/// as failed openings too.
pub fn open_entries(keypair: &Keypair, entries: &[LogEntry]) -> TallyReport {
    open_entries_with(&TextbookRsa, keypair, entries)
}

pub fn open_entries_with<W: KeyWrap + Sync + ?Sized>(
    wrapper: &W,
    keypair: &Keypair,
    entries: &[LogEntry],
) -> TallyReport {
    let private = keypair.private_key();
    let plaintexts = open_in_order(entries, |entry| match entry {
        LogEntry::Record(record) => open_record(wrapper, &private, record),
        LogEntry::Malformed { line, reason } => {
            warn!(line, "skipping malformed ballot record: {}", reason);
            Opening::Failed {
                reason: format!("line {}: {}", line, reason),
            }
        }
    });
    report(plaintexts)
}

fn report(plaintexts: Vec<Opening>) -> TallyReport {
    let report = TallyReport::from_openings(plaintexts);
    info!(
        records = report.plaintexts.len(),
        failed = report.num_failed(),
        "opened ballot log"
    );
    report
}

/// Map `open` over `items` on the rayon pool. Output order matches input order.
fn open_in_order<T, F>(items: &[T], open: F) -> Vec<Opening>
where
    T: Sync,
    F: Fn(&T) -> Opening + Sync + Send,
{
    items.par_iter().map(open).collect()
}
