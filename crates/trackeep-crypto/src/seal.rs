use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, Payload, rand_core::RngCore},
};
use anyhow::{Result, anyhow, bail};

use crate::keys::VaultKey;

const NONCE_LEN: usize = 12;
const AAD_PREFIX: &[u8] = b"trackeep.vault.v1:owner=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedSecret {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// Seals and opens vault secrets. Every secret is bound to its owner through
/// the AEAD associated data: a ciphertext moved onto another owner's row
/// fails authentication instead of decrypting.
#[derive(Clone)]
pub struct VaultCipher {
    cipher: Aes256Gcm,
}

impl VaultCipher {
    pub fn new(key: &VaultKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
        }
    }

    pub fn seal(&self, owner_id: u64, plaintext: &[u8]) -> Result<SealedSecret> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let aad = associated_data(owner_id);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
            .map_err(|e| anyhow!("vault seal failed: {}", e))?;

        Ok(SealedSecret {
            ciphertext,
            nonce: nonce.to_vec(),
        })
    }

    /// Fails on a wrong key, a different owner, or tampered bytes.
    pub fn open(&self, owner_id: u64, ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
        if nonce.len() != NONCE_LEN {
            bail!("vault nonce must be {} bytes, got {}", NONCE_LEN, nonce.len());
        }

        let aad = associated_data(owner_id);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: &aad })
            .map_err(|e| anyhow!("vault open failed: {}", e))
    }
}

fn associated_data(owner_id: u64) -> Vec<u8> {
    let mut aad = AAD_PREFIX.to_vec();
    aad.extend_from_slice(&owner_id.to_be_bytes());
    aad
}
