//! Process-scoped key material.
//!
//! Keys are derived once per start from the operator-supplied secret and a
//! fresh random salt, then kept in memory only. A restart therefore
//! invalidates every token signed with the previous keys.

use std::fmt;

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha512;
use uuid::Uuid;

use crate::error::KeyError;

pub const KDF_ITERATIONS: u32 = 4096;
pub const SALT_LEN: usize = 16;
pub const ENCRYPT_KEY_LEN: usize = 32;
pub const SIGN_KEY_LEN: usize = 64;

#[derive(Clone)]
pub struct KeyMaterial {
    /// Identifies this process instance; changes with every start.
    pub instance_id: Uuid,
    pub salt: [u8; SALT_LEN],
    encrypt_key: [u8; ENCRYPT_KEY_LEN],
    sign_key: [u8; SIGN_KEY_LEN],
}

impl KeyMaterial {
    /// Derive both keys from `secret` and `salt` with PBKDF2-HMAC-SHA512.
    pub fn derive(secret: &[u8], salt: [u8; SALT_LEN]) -> Result<Self, KeyError> {
        if secret.is_empty() {
            return Err(KeyError::EmptySecret);
        }

        let mut encrypt_key = [0u8; ENCRYPT_KEY_LEN];
        let mut sign_key = [0u8; SIGN_KEY_LEN];
        pbkdf2_hmac::<Sha512>(secret, &salt, KDF_ITERATIONS, &mut encrypt_key);
        pbkdf2_hmac::<Sha512>(secret, &salt, KDF_ITERATIONS, &mut sign_key);

        Ok(Self {
            instance_id: Uuid::new_v4(),
            salt,
            encrypt_key,
            sign_key,
        })
    }

    /// Derive fresh keys under a new random salt.
    pub fn generate(secret: &[u8]) -> Result<Self, KeyError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::derive(secret, salt)
    }

    pub fn encrypt_key(&self) -> &[u8] {
        &self.encrypt_key
    }

    pub fn sign_key(&self) -> &[u8] {
        &self.sign_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("instance_id", &self.instance_id)
            .field("salt", &hex::encode(self.salt))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_lengths_are_fixed() {
        let keys = KeyMaterial::derive(b"secret", [7u8; SALT_LEN]).unwrap();
        assert_eq!(keys.encrypt_key().len(), 32);
        assert_eq!(keys.sign_key().len(), 64);
    }

    #[test]
    fn same_secret_and_salt_give_same_keys() {
        let a = KeyMaterial::derive(b"secret", [1u8; SALT_LEN]).unwrap();
        let b = KeyMaterial::derive(b"secret", [1u8; SALT_LEN]).unwrap();
        assert_eq!(a.encrypt_key(), b.encrypt_key());
        assert_eq!(a.sign_key(), b.sign_key());
        assert_ne!(a.instance_id, b.instance_id);
    }

    #[test]
    fn random_salts_give_different_keys() {
        let a = KeyMaterial::generate(b"secret").unwrap();
        let b = KeyMaterial::generate(b"secret").unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.encrypt_key(), b.encrypt_key());
        assert_ne!(a.sign_key(), b.sign_key());
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert_eq!(
            KeyMaterial::generate(b"").unwrap_err(),
            KeyError::EmptySecret
        );
    }

    #[test]
    fn debug_does_not_leak_keys() {
        let keys = KeyMaterial::derive(b"secret", [0u8; SALT_LEN]).unwrap();
        let out = format!("{keys:?}");
        assert!(!out.contains(&hex::encode(keys.sign_key())));
    }
}
