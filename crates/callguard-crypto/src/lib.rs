//! Callguard media cryptography.
//!
//! This crate provides:
//! - AES-128-GCM sealing and opening of media frames
//! - A hash ratchet deriving per-generation frame keys from a group secret
//! - The session's single encryption context
//! - Per-participant decryption contexts

pub mod decryptor;
pub mod encryptor;
pub mod error;
pub mod media_keys;
pub mod ratchet;

// Re-export key types for convenience
pub use decryptor::DecryptionContext;
pub use encryptor::EncryptionContext;
pub use error::{CryptoError, DecryptError, EncryptError};
pub use media_keys::MediaKey;
pub use ratchet::{HashRatchet, KeyRatchet};
