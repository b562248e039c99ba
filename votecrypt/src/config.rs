use crate::*;
use std::env::var;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CANDIDATES: [&str; 3] = ["Candidate - A", "Candidate - B", "Candidate - C"];

/// Voters written to a fresh roll when none exists.
pub const DEFAULT_VOTERS: [&str; 4] = ["1001", "1002", "1003", "1004"];

pub const KEY_FILE_NAME: &str = "rsa_keys.json";
pub const VOTES_FILE_NAME: &str = "encrypted_votes.txt";
pub const VOTERS_FILE_NAME: &str = "voters.txt";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub key_path: PathBuf,
    pub votes_path: PathBuf,
    pub voters_path: PathBuf,
    pub candidates: Vec<String>,
    pub keygen: KeygenLimits,
}

impl Default for Config {
    fn default() -> Self {
        Config::in_dir(".")
    }
}

impl Config {
    /// Default configuration with every file placed in `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Config {
            key_path: dir.join(KEY_FILE_NAME),
            votes_path: dir.join(VOTES_FILE_NAME),
            voters_path: dir.join(VOTERS_FILE_NAME),
            candidates: DEFAULT_CANDIDATES.iter().map(|c| c.to_string()).collect(),
            keygen: KeygenLimits::default(),
        }
    }

    /// Read the configuration from `VOTECRYPT_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        Config::from_vars(|name| var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_vars<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self, Error> {
        let data_dir = lookup("VOTECRYPT_DATA_DIR").unwrap_or_else(|| ".".to_owned());
        let mut config = Config::in_dir(data_dir);

        if let Some(path) = lookup("VOTECRYPT_KEY_FILE") {
            config.key_path = path.into();
        }
        if let Some(path) = lookup("VOTECRYPT_VOTES_FILE") {
            config.votes_path = path.into();
        }
        if let Some(path) = lookup("VOTECRYPT_VOTERS_FILE") {
            config.voters_path = path.into();
        }
        if let Some(list) = lookup("VOTECRYPT_CANDIDATES") {
            config.candidates = list
                .split(',')
                .map(|c| c.trim().to_owned())
                .filter(|c| !c.is_empty())
                .collect();
        }
        if let Some(bits) = lookup("VOTECRYPT_PRIME_BITS") {
            config.keygen.prime_bits = parse("VOTECRYPT_PRIME_BITS", &bits)?;
        }
        if let Some(attempts) = lookup("VOTECRYPT_KEYGEN_ATTEMPTS") {
            config.keygen.max_attempts = parse("VOTECRYPT_KEYGEN_ATTEMPTS", &attempts)?;
        }
        if let Some(secs) = lookup("VOTECRYPT_KEYGEN_TIMEOUT_SECS") {
            config.keygen.timeout =
                Duration::from_secs(parse("VOTECRYPT_KEYGEN_TIMEOUT_SECS", &secs)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.candidates.is_empty() {
            return Err(Error::Config("at least one candidate is required".to_owned()));
        }
        for (i, candidate) in self.candidates.iter().enumerate() {
            if self.candidates[..i].contains(candidate) {
                return Err(Error::Config(format!("duplicate candidate {:?}", candidate)));
            }
        }
        if self.keygen.prime_bits < MIN_PRIME_BITS {
            return Err(Error::Config(format!(
                "prime size must be at least {} bits",
                MIN_PRIME_BITS
            )));
        }
        if self.keygen.max_attempts == 0 {
            return Err(Error::Config(
                "key generation needs at least one attempt".to_owned(),
            ));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, Error>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{}={:?}: {}", name, value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.key_path, Path::new(".").join("rsa_keys.json"));
        assert_eq!(config.candidates.len(), 3);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_vars(lookup(&[
            ("VOTECRYPT_DATA_DIR", "/var/lib/votes"),
            ("VOTECRYPT_VOTERS_FILE", "/etc/voters.txt"),
            ("VOTECRYPT_CANDIDATES", " Alice , Bob,, "),
            ("VOTECRYPT_PRIME_BITS", "64"),
            ("VOTECRYPT_KEYGEN_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.votes_path, Path::new("/var/lib/votes/encrypted_votes.txt"));
        assert_eq!(config.voters_path, Path::new("/etc/voters.txt"));
        assert_eq!(config.candidates, vec!["Alice".to_owned(), "Bob".to_owned()]);
        assert_eq!(config.keygen.prime_bits, 64);
        assert_eq!(config.keygen.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values() {
        for vars in &[
            [("VOTECRYPT_PRIME_BITS", "lots")],
            [("VOTECRYPT_PRIME_BITS", "8")],
            [("VOTECRYPT_KEYGEN_ATTEMPTS", "0")],
            [("VOTECRYPT_CANDIDATES", " , ")],
            [("VOTECRYPT_CANDIDATES", "A,B,A")],
        ] {
            assert!(matches!(Config::from_vars(lookup(vars)), Err(Error::Config(_))));
        }
    }
}
