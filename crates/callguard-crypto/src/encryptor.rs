//! The session's single outgoing-frame encryption context.

use std::collections::HashMap;

use callguard_protocol::frame::{generation_of, TRAILER_SIZE};
use callguard_protocol::{Codec, MediaType, ProtocolVersion, Ssrc, DISABLED_PROTOCOL_VERSION};
use tracing::{debug, trace};

use crate::error::EncryptError;
use crate::media_keys::{seal_frame, MediaKey};
use crate::ratchet::KeyRatchet;

/// Encrypts frames under the self participant's ratchet.
///
/// Starts in passthrough: frames are copied unmodified until a transition
/// to an enabled protocol version is executed.
pub struct EncryptionContext {
    ratchet: Option<Box<dyn KeyRatchet>>,
    passthrough: bool,
    /// Next truncated nonce; past `u32::MAX` the ratchet must be rebound.
    next_nonce: u64,
    current_key: Option<MediaKey>,
    codecs: HashMap<Ssrc, Codec>,
}

impl EncryptionContext {
    pub fn new() -> Self {
        Self {
            ratchet: None,
            passthrough: true,
            next_nonce: 0,
            current_key: None,
            codecs: HashMap::new(),
        }
    }

    /// Bind the ratchet for an upcoming protocol version.
    ///
    /// A disabled version leaves the context untouched. Returns whether a
    /// usable ratchet was bound.
    pub fn prepare_transition(
        &mut self,
        protocol_version: ProtocolVersion,
        ratchet: Option<Box<dyn KeyRatchet>>,
    ) -> bool {
        if protocol_version == DISABLED_PROTOCOL_VERSION {
            return false;
        }
        let usable = ratchet.is_some();
        self.rebind_ratchet(ratchet);
        usable
    }

    /// Switch passthrough according to the executed protocol version.
    pub fn execute_transition(&mut self, protocol_version: ProtocolVersion) {
        self.set_passthrough(protocol_version == DISABLED_PROTOCOL_VERSION);
    }

    /// Replace the held ratchet; the previous one is dropped.
    pub fn rebind_ratchet(&mut self, ratchet: Option<Box<dyn KeyRatchet>>) {
        self.ratchet = ratchet;
        self.current_key = None;
        self.next_nonce = 0;
    }

    pub fn set_passthrough(&mut self, passthrough: bool) {
        if self.passthrough != passthrough {
            debug!(passthrough, "encryptor passthrough changed");
        }
        self.passthrough = passthrough;
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    pub fn has_ratchet(&self) -> bool {
        self.ratchet.is_some()
    }

    pub fn assign_source_to_codec(&mut self, codec: Codec, ssrc: Ssrc) {
        self.codecs.insert(ssrc, codec);
    }

    /// Codec tagged for `ssrc`; untagged sources are treated as Opus.
    pub fn codec_for_source(&self, ssrc: Ssrc) -> Codec {
        self.codecs.get(&ssrc).copied().unwrap_or_default()
    }

    pub fn max_ciphertext_size(&self, _media_type: MediaType, frame_size: usize) -> usize {
        if self.passthrough {
            frame_size
        } else {
            frame_size + TRAILER_SIZE
        }
    }

    /// Encrypt `input` into `output`, returning the bytes written.
    ///
    /// On error nothing in `output` is meaningful and the frame should be
    /// dropped.
    pub fn encrypt(
        &mut self,
        media_type: MediaType,
        ssrc: Ssrc,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, EncryptError> {
        if self.passthrough {
            if output.len() < input.len() {
                return Err(EncryptError::OutputTooSmall {
                    needed: input.len(),
                    available: output.len(),
                });
            }
            output[..input.len()].copy_from_slice(input);
            return Ok(input.len());
        }

        let needed = input.len() + TRAILER_SIZE;
        if output.len() < needed {
            return Err(EncryptError::OutputTooSmall {
                needed,
                available: output.len(),
            });
        }

        let ratchet = self.ratchet.as_mut().ok_or(EncryptError::MissingRatchet)?;
        let truncated_nonce =
            u32::try_from(self.next_nonce).map_err(|_| EncryptError::NonceExhausted)?;
        let generation = generation_of(truncated_nonce);

        if self.current_key.as_ref().map(MediaKey::generation) != Some(generation) {
            let key = ratchet.key(generation)?;
            if let Some(previous) = self.current_key.replace(key) {
                ratchet.erase(previous.generation());
            }
        }
        let key = self.current_key.as_ref().ok_or(EncryptError::MissingRatchet)?;

        let written = seal_frame(key, truncated_nonce, media_type, input, &mut output[..needed])?;
        self.next_nonce += 1;

        trace!(
            ssrc,
            codec = ?self.codecs.get(&ssrc).copied().unwrap_or_default(),
            generation,
            written,
            "encrypted frame"
        );
        Ok(written)
    }

    #[cfg(test)]
    pub(crate) fn skip_to_nonce(&mut self, next_nonce: u64) {
        self.next_nonce = next_nonce;
    }
}

impl Default for EncryptionContext {
    fn default() -> Self {
        Self::new()
    }
}
