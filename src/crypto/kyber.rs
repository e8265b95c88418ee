//! Kyber Key Material
//!
//! Kyber768 key pairs for post-quantum key advertisement. Peers publish the
//! public half in their grant or registration and run the encapsulation
//! among themselves; everything crosses this crate as plain bytes.

use pqcrypto_kyber::kyber768::{self, Ciphertext, PublicKey, SecretKey};
use pqcrypto_traits::kem::{Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _};
use thiserror::Error;

/// Errors that can occur during Kyber operations
#[derive(Error, Debug)]
pub enum KyberError {
    #[error("Invalid public key length")]
    InvalidPublicKeyLength,
    #[error("Invalid ciphertext length")]
    InvalidCiphertextLength,
    #[error("Invalid secret key length")]
    InvalidSecretKeyLength,
}

/// A Kyber768 key pair
pub struct PqKeyPair {
    public_key: PublicKey,
    secret_key: SecretKey,
}

impl PqKeyPair {
    /// Algorithm label advertised alongside keys from this module
    pub const ALGORITHM: &'static str = "Kyber768";

    /// Generate a fresh key pair
    pub fn generate() -> Self {
        let (public_key, secret_key) = kyber768::keypair();
        Self {
            public_key,
            secret_key,
        }
    }

    /// Rebuild a key pair from previously exported bytes
    pub fn from_bytes(public_key: &[u8], secret_key: &[u8]) -> Result<Self, KyberError> {
        Ok(Self {
            public_key: PublicKey::from_bytes(public_key)
                .map_err(|_| KyberError::InvalidPublicKeyLength)?,
            secret_key: SecretKey::from_bytes(secret_key)
                .map_err(|_| KyberError::InvalidSecretKeyLength)?,
        })
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.as_bytes().to_vec()
    }

    pub fn secret_key_bytes(&self) -> Vec<u8> {
        self.secret_key.as_bytes().to_vec()
    }

    /// Encapsulate a shared secret to a peer's advertised key.
    /// Returns (ciphertext, shared_secret)
    pub fn encapsulate(peer_public_key: &[u8]) -> Result<(Vec<u8>, Vec<u8>), KyberError> {
        let public_key =
            PublicKey::from_bytes(peer_public_key).map_err(|_| KyberError::InvalidPublicKeyLength)?;
        let (shared_secret, ciphertext) = kyber768::encapsulate(&public_key);
        Ok((ciphertext.as_bytes().to_vec(), shared_secret.as_bytes().to_vec()))
    }

    /// Recover the shared secret from a peer's ciphertext
    pub fn decapsulate(&self, ciphertext: &[u8]) -> Result<Vec<u8>, KyberError> {
        let ciphertext =
            Ciphertext::from_bytes(ciphertext).map_err(|_| KyberError::InvalidCiphertextLength)?;
        let shared_secret = kyber768::decapsulate(&ciphertext, &self.secret_key);
        Ok(shared_secret.as_bytes().to_vec())
    }
}

impl Default for PqKeyPair {
    fn default() -> Self {
        Self::generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encapsulate_to_advertised_key() {
        let alice = PqKeyPair::generate();
        let advertised = alice.public_key_bytes();

        let (ciphertext, bob_secret) = PqKeyPair::encapsulate(&advertised).unwrap();
        let alice_secret = alice.decapsulate(&ciphertext).unwrap();

        assert_eq!(alice_secret, bob_secret);
    }

    #[test]
    fn test_restore_from_bytes() {
        let original = PqKeyPair::generate();
        let restored =
            PqKeyPair::from_bytes(&original.public_key_bytes(), &original.secret_key_bytes()).unwrap();

        let (ciphertext, secret) = PqKeyPair::encapsulate(&original.public_key_bytes()).unwrap();
        assert_eq!(restored.decapsulate(&ciphertext).unwrap(), secret);
    }

    #[test]
    fn test_rejects_truncated_key() {
        let result = PqKeyPair::encapsulate(&[0u8; 16]);
        assert!(matches!(result, Err(KyberError::InvalidPublicKeyLength)));
    }
}
