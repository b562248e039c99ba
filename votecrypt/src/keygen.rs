use crate::*;
use num_bigint_dig::{BigUint, ModInverse, RandPrime, ToBigUint};
use num_traits::One;
use rand::Rng;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Two primes of this size put the modulus above every Unicode scalar value,
/// which per-character wrapping depends on.
pub const MIN_PRIME_BITS: usize = 16;

/// Largest code point a wrapped key character can carry.
pub const MAX_CODE_POINT: u32 = 0x10FFFF;

/// Public exponents tried in order; the first one invertible modulo
/// `(p-1)(q-1)` wins.
const EXPONENT_CANDIDATES: [u32; 5] = [65537, 257, 17, 5, 3];

/// Textbook RSA keypair.
///
/// `d` is the inverse of `e` modulo Euler's totient `(p-1)(q-1)`, not the
/// Carmichael function.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Keypair {
    #[serde(with = "crate::serde_decimal")]
    pub p: BigUint,
    #[serde(with = "crate::serde_decimal")]
    pub q: BigUint,
    #[serde(with = "crate::serde_decimal")]
    pub n: BigUint,
    #[serde(with = "crate::serde_decimal")]
    pub e: BigUint,
    #[serde(with = "crate::serde_decimal")]
    pub d: BigUint,
}

/// The half of a keypair used to wrap symmetric keys.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    #[serde(with = "crate::serde_decimal")]
    pub e: BigUint,
    #[serde(with = "crate::serde_decimal")]
    pub n: BigUint,
}

/// The half of a keypair used to unwrap symmetric keys.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pub d: BigUint,
    pub n: BigUint,
}

impl Keypair {
    /// Build a keypair from two primes, choosing the public exponent.
    ///
    /// Fails with `Error::KeyGeneration` when no candidate exponent has an
    /// inverse for these primes; callers should retry with fresh primes.
    pub fn from_primes(p: BigUint, q: BigUint) -> Result<Self, Error> {
        if p == q {
            return Err(Error::KeyGeneration("p and q must differ".to_owned()));
        }
        if !both_above_one(&p, &q) {
            return Err(Error::KeyGeneration("p and q must exceed 1".to_owned()));
        }

        let n = &p * &q;
        let phi = totient(&p, &q);

        for candidate in EXPONENT_CANDIDATES.iter() {
            let e = BigUint::from(*candidate);
            if e >= phi {
                continue;
            }
            let d = (&e).mod_inverse(phi.clone()).and_then(|d| d.to_biguint());
            if let Some(d) = d {
                return Ok(Keypair { p, q, n, e, d });
            }
        }

        Err(Error::KeyGeneration(format!(
            "no public exponent is invertible modulo {}",
            phi
        )))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            e: self.e.clone(),
            n: self.n.clone(),
        }
    }

    pub fn private_key(&self) -> PrivateKey {
        PrivateKey {
            d: self.d.clone(),
            n: self.n.clone(),
        }
    }

    /// Check the algebraic relations between the five fields.
    ///
    /// Used on every load so a hand-edited or truncated key file is caught
    /// before it silently garbles ballots.
    pub fn validate(&self) -> Result<(), Error> {
        if !both_above_one(&self.p, &self.q) {
            return Err(Error::InvalidKeypair("p and q must exceed 1".to_owned()));
        }
        if self.p == self.q {
            return Err(Error::InvalidKeypair("p and q are equal".to_owned()));
        }
        if &self.p * &self.q != self.n {
            return Err(Error::InvalidKeypair("n is not p*q".to_owned()));
        }
        if self.n <= BigUint::from(MAX_CODE_POINT) {
            return Err(Error::InvalidKeypair(format!(
                "modulus {} does not exceed the largest code point {}",
                self.n, MAX_CODE_POINT
            )));
        }
        let phi = totient(&self.p, &self.q);
        if (&self.e * &self.d) % &phi != BigUint::one() {
            return Err(Error::InvalidKeypair(
                "e*d is not 1 modulo (p-1)(q-1)".to_owned(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("n", &self.n)
            .field("e", &self.e)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("n", &self.n)
            .finish_non_exhaustive()
    }
}

// Below 2 the totient is zero or underflows.
fn both_above_one(p: &BigUint, q: &BigUint) -> bool {
    let one = BigUint::one();
    *p > one && *q > one
}

fn totient(p: &BigUint, q: &BigUint) -> BigUint {
    let one = BigUint::one();
    (p - &one) * (q - &one)
}

/// Bounds on the prime search, the one step with no natural time limit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeygenLimits {
    pub prime_bits: usize,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for KeygenLimits {
    fn default() -> Self {
        KeygenLimits {
            prime_bits: 256,
            max_attempts: 64,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Generate a keypair from the OS random source.
pub fn generate_keypair(limits: &KeygenLimits) -> Result<Keypair, Error> {
    generate_keypair_with(&mut rand::rngs::OsRng, limits)
}

/// Generate a keypair, retrying with fresh primes until one yields a usable
/// exponent or the limits are exhausted.
pub fn generate_keypair_with<R: Rng + ?Sized>(
    rng: &mut R,
    limits: &KeygenLimits,
) -> Result<Keypair, Error> {
    if limits.prime_bits < MIN_PRIME_BITS {
        return Err(Error::KeyGeneration(format!(
            "primes must be at least {} bits, {} requested",
            MIN_PRIME_BITS, limits.prime_bits
        )));
    }

    let started = Instant::now();
    let mut attempts = 0;
    let mut last_failure = String::from("no attempt made");

    while attempts < limits.max_attempts && started.elapsed() <= limits.timeout {
        attempts += 1;
        let p = rng.gen_prime(limits.prime_bits);
        let q = rng.gen_prime(limits.prime_bits);

        match Keypair::from_primes(p, q) {
            Ok(keypair) => {
                info!(
                    bits = keypair.n.bits(),
                    attempts,
                    "generated RSA keypair"
                );
                return Ok(keypair);
            }
            Err(e) => {
                warn!(attempts, "discarding primes: {}", e);
                last_failure = e.to_string();
            }
        }
    }

    Err(Error::KeyGeneration(format!(
        "gave up after {} attempt(s) in {:?}; last failure: {}",
        attempts,
        started.elapsed(),
        last_failure
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::ToPrimitive;

    fn small_limits() -> KeygenLimits {
        KeygenLimits {
            prime_bits: 32,
            ..KeygenLimits::default()
        }
    }

    #[test]
    fn test_generate_keypair() {
        let keypair = generate_keypair(&small_limits()).unwrap();
        keypair.validate().unwrap();
        assert_ne!(keypair.p, keypair.q);
        assert!(keypair.n > BigUint::from(MAX_CODE_POINT));
    }

    #[test]
    fn test_from_primes_textbook() {
        // phi = 60 * 52 = 3120. 65537 is too large, 257 is coprime to it.
        let keypair = Keypair::from_primes(BigUint::from(61u32), BigUint::from(53u32)).unwrap();
        assert_eq!(keypair.n, BigUint::from(3233u32));
        assert_eq!(keypair.e.to_u32(), Some(257));
        assert_eq!(keypair.d.to_u32(), Some(2513));
    }

    #[test]
    fn test_from_primes_exponent_fallback() {
        // phi = 6 * 30 = 180: 65537 and 257 are too large, 17 is coprime.
        let keypair = Keypair::from_primes(BigUint::from(7u32), BigUint::from(31u32)).unwrap();
        assert_eq!(keypair.e.to_u32(), Some(17));
        let phi = BigUint::from(180u32);
        assert_eq!((&keypair.e * &keypair.d) % &phi, BigUint::one());

        // phi = 2: no candidate fits below it.
        let err = Keypair::from_primes(BigUint::from(2u32), BigUint::from(3u32)).unwrap_err();
        assert!(matches!(err, Error::KeyGeneration(_)));
    }

    #[test]
    fn test_equal_primes_rejected() {
        let err = Keypair::from_primes(BigUint::from(61u32), BigUint::from(61u32)).unwrap_err();
        assert!(matches!(err, Error::KeyGeneration(_)));
    }

    #[test]
    fn test_validate_catches_tampering() {
        let mut keypair = generate_keypair(&small_limits()).unwrap();
        keypair.d += BigUint::one();
        assert!(matches!(keypair.validate(), Err(Error::InvalidKeypair(_))));

        // Textbook example is algebraically fine but its modulus is too small
        // to carry arbitrary characters.
        let tiny = Keypair::from_primes(BigUint::from(61u32), BigUint::from(53u32)).unwrap();
        assert!(matches!(tiny.validate(), Err(Error::InvalidKeypair(_))));
    }

    #[test]
    fn test_degenerate_primes_rejected() {
        let keypair = Keypair {
            p: BigUint::one(),
            q: BigUint::from(2_000_003u32),
            n: BigUint::from(2_000_003u32),
            e: BigUint::from(3u32),
            d: BigUint::one(),
        };
        assert!(matches!(keypair.validate(), Err(Error::InvalidKeypair(_))));

        let keypair = Keypair {
            p: BigUint::from(0u32),
            ..keypair
        };
        assert!(matches!(keypair.validate(), Err(Error::InvalidKeypair(_))));

        for p in [0u32, 1] {
            let err = Keypair::from_primes(BigUint::from(p), BigUint::from(61u32)).unwrap_err();
            assert!(matches!(err, Error::KeyGeneration(_)));
        }
    }

    #[test]
    fn test_limits_enforced() {
        let limits = KeygenLimits {
            prime_bits: 8,
            ..KeygenLimits::default()
        };
        assert!(matches!(generate_keypair(&limits), Err(Error::KeyGeneration(_))));

        let limits = KeygenLimits {
            max_attempts: 0,
            ..small_limits()
        };
        assert!(matches!(generate_keypair(&limits), Err(Error::KeyGeneration(_))));
    }

    #[test]
    fn test_debug_hides_private_exponent() {
        let keypair = Keypair::from_primes(BigUint::from(61u32), BigUint::from(53u32)).unwrap();
        let debug = format!("{:?}", keypair);
        assert!(!debug.contains("2513"));
        assert!(!format!("{:?}", keypair.private_key()).contains("2513"));
    }
}
