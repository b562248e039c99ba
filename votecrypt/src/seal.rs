use crate::*;
use tracing::debug;

/// Seal a vote with the default key wrapping.
pub fn seal(voter_id: &str, candidate: &str, keypair: &Keypair) -> Result<BallotRecord, Error> {
    seal_with(&TextbookRsa, voter_id, candidate, &keypair.public_key())
}

/// Seal a vote: encrypt the candidate under a fresh symmetric key, then wrap
/// that key under the public key.
pub fn seal_with<W: KeyWrap + ?Sized>(
    wrapper: &W,
    voter_id: &str,
    candidate: &str,
    public: &PublicKey,
) -> Result<BallotRecord, Error> {
    let (enc_vote, key) = cipher::encrypt(candidate)?;
    let enc_key = wrapper.wrap(&key, public)?;

    Ok(BallotRecord {
        voter_id: voter_id.to_owned(),
        enc_vote,
        enc_key,
    })
}

/// Seal a vote and append it to the log.
///
/// The log is the only state touched. Callers that run this concurrently
/// against the same log must serialize calls themselves.
pub fn seal_and_append<L: BallotLog + ?Sized>(
    log: &L,
    voter_id: &str,
    candidate: &str,
    keypair: &Keypair,
) -> Result<BallotRecord, Error> {
    let record = seal(voter_id, candidate, keypair)?;
    log.append(&record)?;
    debug!(voter_id, "sealed ballot appended");
    Ok(record)
}
