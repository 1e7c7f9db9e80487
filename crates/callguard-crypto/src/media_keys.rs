//! Symmetric AES-128-GCM encryption for media frames.
//!
//! Frame keys come from a [`KeyRatchet`](crate::ratchet::KeyRatchet); the
//! nonce is the 32-bit truncated nonce carried in the frame trailer, so the
//! sender must never reuse one under the same key.

use callguard_protocol::frame::{FrameTrailer, TAG_SIZE, TRAILER_SIZE};
use callguard_protocol::MediaType;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// AES-128 key size.
pub const KEY_SIZE: usize = 16;

/// A frame key for one ratchet generation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MediaKey {
    generation: u32,
    key_bytes: [u8; KEY_SIZE],
}

impl MediaKey {
    pub fn new(generation: u32, key_bytes: [u8; KEY_SIZE]) -> Self {
        Self {
            generation,
            key_bytes,
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    fn to_aead_key(&self) -> Result<LessSafeKey, CryptoError> {
        let unbound =
            UnboundKey::new(&AES_128_GCM, &self.key_bytes).map_err(|_| CryptoError::InvalidKey)?;
        Ok(LessSafeKey::new(unbound))
    }
}

/// Expand the truncated nonce to the 96-bit AES-GCM nonce.
/// Nonce = zero(8) || truncated_nonce(4)
fn build_nonce(truncated_nonce: u32) -> Nonce {
    let mut nonce_bytes = [0u8; 12];
    nonce_bytes[8..12].copy_from_slice(&truncated_nonce.to_be_bytes());
    Nonce::assume_unique_for_key(nonce_bytes)
}

/// AAD binds the media type so audio and video frames cannot be swapped.
pub fn build_aad(media_type: MediaType) -> [u8; 1] {
    [media_type.as_byte()]
}

/// Encrypt `plaintext` into `output` and append the trailer.
///
/// `output` must hold at least `plaintext.len() + TRAILER_SIZE` bytes.
/// Returns the number of bytes written.
pub fn seal_frame(
    key: &MediaKey,
    truncated_nonce: u32,
    media_type: MediaType,
    plaintext: &[u8],
    output: &mut [u8],
) -> Result<usize, CryptoError> {
    let len = plaintext.len();
    if output.len() < len + TRAILER_SIZE {
        return Err(CryptoError::Seal);
    }

    let aead_key = key.to_aead_key()?;
    let (body, rest) = output.split_at_mut(len);
    body.copy_from_slice(plaintext);

    let tag = aead_key
        .seal_in_place_separate_tag(
            build_nonce(truncated_nonce),
            Aad::from(build_aad(media_type)),
            body,
        )
        .map_err(|_| CryptoError::Seal)?;

    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_ref());
    let trailer = FrameTrailer {
        tag: tag_bytes,
        truncated_nonce,
    };
    rest[..TRAILER_SIZE].copy_from_slice(&trailer.to_bytes());

    Ok(len + TRAILER_SIZE)
}

/// Decrypt a frame body split off by [`FrameTrailer::split`] into `output`.
///
/// Returns the plaintext length, or [`CryptoError::Open`] if authentication fails.
pub fn open_frame(
    key: &MediaKey,
    trailer: &FrameTrailer,
    media_type: MediaType,
    ciphertext: &[u8],
    output: &mut [u8],
) -> Result<usize, CryptoError> {
    let aead_key = key.to_aead_key()?;

    let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(&trailer.tag);

    let plaintext = aead_key
        .open_in_place(
            build_nonce(trailer.truncated_nonce),
            Aad::from(build_aad(media_type)),
            &mut in_out,
        )
        .map_err(|_| CryptoError::Open)?;

    let len = plaintext.len();
    if output.len() < len {
        return Err(CryptoError::Open);
    }
    output[..len].copy_from_slice(plaintext);
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(generation: u32, fill: u8) -> MediaKey {
        MediaKey::new(generation, [fill; KEY_SIZE])
    }

    fn seal(key: &MediaKey, nonce: u32, media: MediaType, plaintext: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; plaintext.len() + TRAILER_SIZE];
        let written = seal_frame(key, nonce, media, plaintext, &mut out).unwrap();
        out.truncate(written);
        out
    }

    fn open(key: &MediaKey, media: MediaType, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let (ciphertext, trailer) = FrameTrailer::split(frame).unwrap();
        let mut out = vec![0u8; ciphertext.len()];
        let n = open_frame(key, &trailer, media, ciphertext, &mut out)?;
        out.truncate(n);
        Ok(out)
    }

    #[test]
    fn seal_open_roundtrip() {
        let k = key(0, 0x42);
        let plaintext = b"hello voice data";

        let frame = seal(&k, 100, MediaType::Audio, plaintext);
        assert_eq!(frame.len(), plaintext.len() + TRAILER_SIZE);
        assert_ne!(&frame[..plaintext.len()], plaintext);
        assert!(FrameTrailer::is_marked(&frame));

        assert_eq!(open(&k, MediaType::Audio, &frame).unwrap(), plaintext);
    }

    #[test]
    fn wrong_key_fails() {
        let frame = seal(&key(0, 1), 1, MediaType::Audio, b"secret");
        assert!(matches!(
            open(&key(0, 2), MediaType::Audio, &frame),
            Err(CryptoError::Open)
        ));
    }

    #[test]
    fn wrong_media_type_fails() {
        let k = key(0, 1);
        let frame = seal(&k, 1, MediaType::Audio, b"secret");
        assert!(open(&k, MediaType::Video, &frame).is_err());
    }

    #[test]
    fn tampered_data_fails() {
        let k = key(0, 1);
        let mut frame = seal(&k, 1, MediaType::Audio, b"secret");
        frame[0] ^= 0xFF;
        assert!(open(&k, MediaType::Audio, &frame).is_err());
    }

    #[test]
    fn tampered_nonce_fails() {
        let k = key(0, 1);
        let mut frame = seal(&k, 1, MediaType::Audio, b"secret");
        let nonce_at = frame.len() - TRAILER_SIZE + TAG_SIZE + 3;
        frame[nonce_at] ^= 0x01;
        assert!(open(&k, MediaType::Audio, &frame).is_err());
    }

    #[test]
    fn undersized_output_is_rejected() {
        let mut out = vec![0u8; 8];
        let result = seal_frame(&key(0, 1), 0, MediaType::Audio, b"too long for buffer", &mut out);
        assert!(matches!(result, Err(CryptoError::Seal)));
    }

    #[test]
    fn empty_frame_roundtrip() {
        let k = key(0, 9);
        let frame = seal(&k, 0, MediaType::Video, &[]);
        assert_eq!(frame.len(), TRAILER_SIZE);
        assert!(open(&k, MediaType::Video, &frame).unwrap().is_empty());
    }
}
