use crate::error::ProtocolError;

/// AES-GCM authentication tag size.
pub const TAG_SIZE: usize = 16;

/// Truncated nonce size in the trailer.
pub const TRUNCATED_NONCE_SIZE: usize = 4;

/// Marker closing every encrypted frame.
pub const MAGIC_MARKER: [u8; 2] = [0xFA, 0xFA];

/// Total bytes appended to an encrypted frame.
pub const TRAILER_SIZE: usize = TAG_SIZE + TRUNCATED_NONCE_SIZE + 1 + MAGIC_MARKER.len(); // 23

/// The top byte of the truncated nonce selects the ratchet generation.
pub const GENERATION_SHIFT: u32 = 24;

/// Ratchet generation a truncated nonce belongs to.
pub fn generation_of(truncated_nonce: u32) -> u32 {
    truncated_nonce >> GENERATION_SHIFT
}

/// Supplemental data appended to an encrypted media frame.
///
/// Wire format:
/// ```text
/// [ciphertext: N] [tag: 16] [truncated_nonce: u32 BE] [supplemental_size: u8 = 23] [0xFA 0xFA]
/// ```
///
/// Unencrypted frames carry no trailer, so the marker is what tells the
/// receiver whether a frame needs decrypting at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTrailer {
    pub tag: [u8; TAG_SIZE],
    pub truncated_nonce: u32,
}

impl FrameTrailer {
    pub fn generation(&self) -> u32 {
        generation_of(self.truncated_nonce)
    }

    /// Whether the frame ends with the encrypted-frame marker.
    pub fn is_marked(frame: &[u8]) -> bool {
        frame.len() >= TRAILER_SIZE && frame[frame.len() - MAGIC_MARKER.len()..] == MAGIC_MARKER
    }

    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE] {
        let mut buf = [0u8; TRAILER_SIZE];
        buf[..TAG_SIZE].copy_from_slice(&self.tag);
        buf[TAG_SIZE..TAG_SIZE + TRUNCATED_NONCE_SIZE]
            .copy_from_slice(&self.truncated_nonce.to_be_bytes());
        buf[TAG_SIZE + TRUNCATED_NONCE_SIZE] = TRAILER_SIZE as u8;
        buf[TRAILER_SIZE - MAGIC_MARKER.len()..].copy_from_slice(&MAGIC_MARKER);
        buf
    }

    /// Split a marked frame into its ciphertext and trailer.
    pub fn split(frame: &[u8]) -> Result<(&[u8], Self), ProtocolError> {
        if frame.len() < TRAILER_SIZE {
            return Err(ProtocolError::FrameTooShort {
                expected: TRAILER_SIZE,
                got: frame.len(),
            });
        }

        let (ciphertext, trailer) = frame.split_at(frame.len() - TRAILER_SIZE);
        let supplemental_size = trailer[TAG_SIZE + TRUNCATED_NONCE_SIZE];
        if supplemental_size as usize != TRAILER_SIZE {
            return Err(ProtocolError::SupplementalSize(supplemental_size));
        }

        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(&trailer[..TAG_SIZE]);
        let mut nonce_bytes = [0u8; TRUNCATED_NONCE_SIZE];
        nonce_bytes.copy_from_slice(&trailer[TAG_SIZE..TAG_SIZE + TRUNCATED_NONCE_SIZE]);

        Ok((
            ciphertext,
            Self {
                tag,
                truncated_nonce: u32::from_be_bytes(nonce_bytes),
            },
        ))
    }
}
