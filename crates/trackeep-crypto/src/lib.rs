//! Password vault secrets are sealed with AES-256-GCM under a server-held
//! vault key before they touch storage. Each secret gets a fresh random
//! 96-bit nonce, stored alongside the ciphertext, and is bound to its owner
//! through the associated data.

pub mod keys;
pub mod seal;

pub use keys::VaultKey;
pub use seal::{SealedSecret, VaultCipher};
