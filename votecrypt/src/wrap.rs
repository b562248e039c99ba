use crate::*;
use num_bigint_dig::BigUint;
use num_traits::ToPrimitive;

/// Protects a per-ballot symmetric key under the election keypair.
///
/// Sealing and opening only go through this trait, so a padded scheme can
/// replace [`TextbookRsa`] without touching them. Existing ballot logs can only
/// be opened with the scheme that sealed them.
pub trait KeyWrap {
    fn wrap(&self, key: &str, public: &PublicKey) -> Result<Vec<BigUint>, Error>;

    fn unwrap(&self, wrapped: &[BigUint], private: &PrivateKey) -> Result<String, Error>;
}

/// Unpadded RSA applied to each character's code point independently.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextbookRsa;

impl KeyWrap for TextbookRsa {
    fn wrap(&self, key: &str, public: &PublicKey) -> Result<Vec<BigUint>, Error> {
        // Any code point >= n would come back reduced mod n, i.e. as a different character.
        if public.n <= BigUint::from(MAX_CODE_POINT) {
            return Err(Error::Wrap(format!(
                "modulus {} is too small to wrap arbitrary characters",
                public.n
            )));
        }
        Ok(wrap_key(key, &public.e, &public.n))
    }

    fn unwrap(&self, wrapped: &[BigUint], private: &PrivateKey) -> Result<String, Error> {
        unwrap_key(wrapped, &private.d, &private.n)
    }
}

/// Map every character `m` of `key` to `m^e mod n`.
pub fn wrap_key(key: &str, e: &BigUint, n: &BigUint) -> Vec<BigUint> {
    key.chars()
        .map(|ch| BigUint::from(ch as u32).modpow(e, n))
        .collect()
}

/// Map every `c` back to the character `c^d mod n`, in order.
pub fn unwrap_key(wrapped: &[BigUint], d: &BigUint, n: &BigUint) -> Result<String, Error> {
    wrapped
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let m = c.modpow(d, n);
            m.to_u32().and_then(char::from_u32).ok_or_else(|| {
                Error::Wrap(format!(
                    "value {} at position {} is not a valid character",
                    m, i
                ))
            })
        })
        .collect()
}
