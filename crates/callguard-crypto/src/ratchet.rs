//! Hash ratchet deriving per-generation frame keys.
//!
//! The group engine hands out one ratchet per participant, seeded from that
//! participant's exported group secret. Each generation derives two values
//! from the current chain secret:
//! - a **frame key** for AES-128-GCM
//! - the **next chain secret**
//!
//! Chain secrets are overwritten as the ratchet advances, so a later state
//! cannot reproduce keys that have been erased.

use std::collections::BTreeMap;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::media_keys::{MediaKey, KEY_SIZE};

/// Generations kept behind the newest derived one, for reordered frames.
pub const RETAINED_GENERATIONS: u32 = 4;

/// How far past the newest derived generation a lookup may reach.
pub const MAX_GENERATION_GAP: u32 = 16;

const KEY_LABEL: &[u8] = b"callguard ratchet key";
const SECRET_LABEL: &[u8] = b"callguard ratchet secret";

/// Source of frame keys bound into an encryption or decryption context.
///
/// Binding a ratchet moves it into the context; dropping the context (or
/// rebinding) releases it.
pub trait KeyRatchet: Send + Sync {
    /// Key for `generation`, deriving forward as needed.
    fn key(&mut self, generation: u32) -> Result<MediaKey, CryptoError>;

    /// Key for `generation` without advancing or pruning anything.
    ///
    /// Used to try a key before the frame it protects has been
    /// authenticated.
    fn peek(&self, generation: u32) -> Result<MediaKey, CryptoError>;

    /// Forget the key for `generation`.
    fn erase(&mut self, generation: u32);
}

/// HKDF-SHA256 chain over a 32-byte base secret.
pub struct HashRatchet {
    chain_secret: Zeroizing<[u8; 32]>,
    next_generation: u32,
    keys: BTreeMap<u32, MediaKey>,
}

impl HashRatchet {
    pub fn new(base_secret: [u8; 32]) -> Self {
        Self {
            chain_secret: Zeroizing::new(base_secret),
            next_generation: 0,
            keys: BTreeMap::new(),
        }
    }

    /// Boxed for binding into a context.
    pub fn boxed(base_secret: [u8; 32]) -> Box<dyn KeyRatchet> {
        Box::new(Self::new(base_secret))
    }

    fn advance(&mut self) -> Result<(), CryptoError> {
        let generation = self.next_generation;
        let (key, next_secret) = step(&self.chain_secret, generation)?;

        self.keys.insert(generation, key);
        self.chain_secret = next_secret;
        self.next_generation = generation
            .checked_add(1)
            .ok_or(CryptoError::KeyDerivation)?;
        Ok(())
    }

    fn check_reachable(&self, generation: u32) -> Result<(), CryptoError> {
        if generation < self.next_generation {
            return Err(CryptoError::KeyUnavailable(generation));
        }
        if generation - self.next_generation > MAX_GENERATION_GAP {
            return Err(CryptoError::KeyUnavailable(generation));
        }
        Ok(())
    }
}

fn expand(secret: &[u8; 32], label: &[u8], generation: u32, okm: &mut [u8]) -> Result<(), CryptoError> {
    let hk = Hkdf::<Sha256>::from_prk(&secret[..]).map_err(|_| CryptoError::KeyDerivation)?;
    let mut info = Vec::with_capacity(label.len() + 4);
    info.extend_from_slice(label);
    info.extend_from_slice(&generation.to_be_bytes());
    hk.expand(&info, okm).map_err(|_| CryptoError::KeyDerivation)
}

/// Frame key for `generation` and the chain secret that follows it.
fn step(
    chain_secret: &[u8; 32],
    generation: u32,
) -> Result<(MediaKey, Zeroizing<[u8; 32]>), CryptoError> {
    let mut key_bytes = Zeroizing::new([0u8; KEY_SIZE]);
    expand(chain_secret, KEY_LABEL, generation, &mut key_bytes[..])?;
    let mut next_secret = Zeroizing::new([0u8; 32]);
    expand(chain_secret, SECRET_LABEL, generation, &mut next_secret[..])?;
    Ok((MediaKey::new(generation, *key_bytes), next_secret))
}

impl KeyRatchet for HashRatchet {
    fn key(&mut self, generation: u32) -> Result<MediaKey, CryptoError> {
        if let Some(key) = self.keys.get(&generation) {
            return Ok(key.clone());
        }
        self.check_reachable(generation)?;

        while self.next_generation <= generation {
            self.advance()?;
        }

        // Keep only a small window behind the newest generation.
        let oldest_kept = generation.saturating_sub(RETAINED_GENERATIONS);
        self.keys = self.keys.split_off(&oldest_kept);

        self.keys
            .get(&generation)
            .cloned()
            .ok_or(CryptoError::KeyUnavailable(generation))
    }

    fn peek(&self, generation: u32) -> Result<MediaKey, CryptoError> {
        if let Some(key) = self.keys.get(&generation) {
            return Ok(key.clone());
        }
        self.check_reachable(generation)?;

        let mut secret = Zeroizing::new(*self.chain_secret);
        let mut current = self.next_generation;
        loop {
            let (key, next_secret) = step(&secret, current)?;
            if current == generation {
                return Ok(key);
            }
            secret = next_secret;
            current += 1;
        }
    }

    fn erase(&mut self, generation: u32) {
        self.keys.remove(&generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(key: &MediaKey) -> Vec<u8> {
        // Round-trip through a seal to compare keys without exposing bytes.
        use callguard_protocol::MediaType;
        let mut out = vec![0u8; 4 + callguard_protocol::TRAILER_SIZE];
        crate::media_keys::seal_frame(key, 0, MediaType::Audio, b"cmp!", &mut out).unwrap();
        out
    }

    #[test]
    fn same_secret_same_keys() {
        let mut a = HashRatchet::new([0x42; 32]);
        let mut b = HashRatchet::new([0x42; 32]);
        for generation in [0, 1, 5] {
            assert_eq!(raw(&a.key(generation).unwrap()), raw(&b.key(generation).unwrap()));
        }
    }

    #[test]
    fn different_secrets_different_keys() {
        let mut a = HashRatchet::new([0x01; 32]);
        let mut b = HashRatchet::new([0x02; 32]);
        assert_ne!(raw(&a.key(0).unwrap()), raw(&b.key(0).unwrap()));
    }

    #[test]
    fn generations_differ() {
        let mut r = HashRatchet::new([0x55; 32]);
        let k0 = r.key(0).unwrap();
        let k1 = r.key(1).unwrap();
        assert_eq!(k0.generation(), 0);
        assert_eq!(k1.generation(), 1);
        assert_ne!(raw(&k0), raw(&k1));
    }

    #[test]
    fn skipping_ahead_matches_stepping() {
        let mut stepped = HashRatchet::new([0xAA; 32]);
        for generation in 0..=3 {
            stepped.key(generation).unwrap();
        }
        let mut jumped = HashRatchet::new([0xAA; 32]);
        assert_eq!(raw(&stepped.key(3).unwrap()), raw(&jumped.key(3).unwrap()));
    }

    #[test]
    fn erased_key_is_unavailable() {
        let mut r = HashRatchet::new([0x10; 32]);
        r.key(0).unwrap();
        r.key(1).unwrap();
        r.erase(0);
        assert!(matches!(r.key(0), Err(CryptoError::KeyUnavailable(0))));
        assert!(r.key(1).is_ok());
    }

    #[test]
    fn peek_matches_key_without_advancing() {
        let mut r = HashRatchet::new([0x30; 32]);
        let peeked = r.peek(3).unwrap();
        assert_eq!(r.next_generation, 0);
        assert!(r.keys.is_empty());
        assert_eq!(raw(&peeked), raw(&r.key(3).unwrap()));
        // Earlier generations are still derivable after a peek.
        let mut fresh = HashRatchet::new([0x30; 32]);
        fresh.peek(RETAINED_GENERATIONS + 8).unwrap();
        assert!(fresh.key(0).is_ok());
    }

    #[test]
    fn generations_far_ahead_are_refused() {
        let mut r = HashRatchet::new([0x40; 32]);
        let far = MAX_GENERATION_GAP + 1;
        assert!(matches!(r.peek(far), Err(CryptoError::KeyUnavailable(g)) if g == far));
        assert!(matches!(r.key(far), Err(CryptoError::KeyUnavailable(_))));
        assert!(r.peek(MAX_GENERATION_GAP).is_ok());
        assert!(r.key(0).is_ok());
    }

    #[test]
    fn keys_outside_window_are_dropped() {
        let mut r = HashRatchet::new([0x20; 32]);
        r.key(0).unwrap();
        r.key(RETAINED_GENERATIONS + 2).unwrap();
        assert!(matches!(r.key(0), Err(CryptoError::KeyUnavailable(0))));
        assert!(r.key(2).is_ok());
    }
}
