use crate::*;
use num_bigint_dig::BigUint;

/// One sealed vote, exactly as it is persisted in the ballot log.
///
/// The field names on disk (`voterid`, `enc_vote`, `enc_aes_key`) are kept
/// so logs written by earlier installations still open.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct BallotRecord {
    #[serde(rename = "voterid")]
    pub voter_id: String,

    /// Base64 symmetric ciphertext of the candidate name
    pub enc_vote: String,

    /// The symmetric key, wrapped one character per integer
    #[serde(rename = "enc_aes_key", with = "crate::serde_decimal::list")]
    pub enc_key: Vec<BigUint>,
}

impl BallotRecord {
    /// Serialize to a single log line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self, Error> {
        serde_json::from_str(line.trim()).map_err(|e| Error::MalformedRecord(e.to_string()))
    }
}
