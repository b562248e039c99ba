//! Big integers are persisted as decimal text so the key file and the ballot
//! log stay readable by anything that understands plain JSON.
use num_bigint_dig::BigUint;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(D::Error::custom)
}

fn parse(s: &str) -> Result<BigUint, String> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("invalid decimal integer {:?}", s));
    }
    s.parse::<BigUint>()
        .map_err(|e| format!("invalid decimal integer {:?}: {}", s, e))
}

/// A comma-delimited list of decimal integers, e.g. `"12,7,3301"`.
pub mod list {
    use super::*;
    use serde::de::Error as _;

    pub fn serialize<S: Serializer>(values: &[BigUint], serializer: S) -> Result<S::Ok, S::Error> {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",");
        serializer.serialize_str(&joined)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<BigUint>, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.trim().is_empty() {
            return Ok(vec![]);
        }
        s.split(',').map(parse).collect::<Result<_, _>>().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_digits() {
        assert!(parse("12").is_ok());
        assert!(parse(" 12 ").is_ok());
        assert!(parse("-12").is_err());
        assert!(parse("0x12").is_err());
        assert!(parse("").is_err());
    }
}
