use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("votecrypt: key generation failed: {0}")]
    KeyGeneration(String),

    #[error("votecrypt: RSA keys not available")]
    KeysNotAvailable,

    #[error("votecrypt: invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("votecrypt: cipher error: {0}")]
    Cipher(String),

    #[error("votecrypt: key unwrap error: {0}")]
    Wrap(String),

    #[error("votecrypt: unable to {action} {}: {source}", path.display())]
    Storage {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("votecrypt: serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("votecrypt: malformed ballot record: {0}")]
    MalformedRecord(String),

    #[error("votecrypt: voter {0} not found")]
    UnknownVoter(String),

    #[error("votecrypt: voter {0} has already voted")]
    AlreadyVoted(String),

    #[error("votecrypt: invalid candidate selection {0}")]
    InvalidCandidate(usize),

    #[error("votecrypt: configuration error: {0}")]
    Config(String),

    /// The ballot was appended to the log but the voter roll still lists the
    /// voter as not having voted. The two collaborators are now inconsistent
    /// and the voter could vote again.
    #[error("votecrypt: vote from {voter_id} was recorded but the voter roll was not updated: {source}")]
    VoterStatusNotRecorded {
        voter_id: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn storage(action: &'static str, path: &Path, source: io::Error) -> Self {
        Error::Storage {
            action,
            path: path.to_owned(),
            source,
        }
    }

    /// True when a store refused a write because the target already exists.
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::Storage { source, .. } => source.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}
