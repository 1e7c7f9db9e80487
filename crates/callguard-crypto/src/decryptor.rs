//! Per-participant incoming-frame decryption context.

use callguard_protocol::frame::{FrameTrailer, TRAILER_SIZE};
use callguard_protocol::{MediaType, ProtocolVersion, DISABLED_PROTOCOL_VERSION};
use tracing::{debug, trace};

use crate::error::DecryptError;
use crate::media_keys::open_frame;
use crate::ratchet::KeyRatchet;

/// Decrypts one remote participant's frames.
///
/// Unencrypted (unmarked) frames are passed through unmodified while no
/// ratchet is bound or while passthrough is open. Passthrough opens when the
/// protocol is disabled and closes on the first frame that decrypts under the
/// current ratchet, which is when the sender has provably switched over.
///
/// Across a transition the outgoing ratchet is kept as `previous`, since the
/// sender keeps using it until it executes. It is dropped on the first frame
/// that decrypts under the new ratchet.
pub struct DecryptionContext {
    ratchet: Option<Box<dyn KeyRatchet>>,
    previous: Option<Box<dyn KeyRatchet>>,
    passthrough: bool,
}

impl DecryptionContext {
    pub fn new() -> Self {
        Self {
            ratchet: None,
            previous: None,
            passthrough: true,
        }
    }

    /// Bind the participant's ratchet for an upcoming protocol version.
    pub fn prepare_transition(
        &mut self,
        protocol_version: ProtocolVersion,
        ratchet: Option<Box<dyn KeyRatchet>>,
    ) {
        if protocol_version == DISABLED_PROTOCOL_VERSION {
            self.rebind_ratchet(None);
            self.passthrough = true;
            return;
        }
        if let Some(outgoing) = self.ratchet.take() {
            self.previous = Some(outgoing);
        }
        self.ratchet = ratchet;
    }

    /// Replace the held ratchet; both it and any retained previous one are
    /// dropped.
    pub fn rebind_ratchet(&mut self, ratchet: Option<Box<dyn KeyRatchet>>) {
        self.ratchet = ratchet;
        self.previous = None;
    }

    pub fn has_ratchet(&self) -> bool {
        self.ratchet.is_some()
    }

    /// Whether unmarked frames are currently accepted.
    pub fn allows_passthrough(&self) -> bool {
        self.passthrough || self.ratchet.is_none()
    }

    pub fn max_plaintext_size(&self, _media_type: MediaType, frame_size: usize) -> usize {
        if self.allows_passthrough() {
            frame_size
        } else {
            frame_size.saturating_sub(TRAILER_SIZE)
        }
    }

    /// Decrypt `input` into `output`, returning the plaintext length.
    pub fn decrypt(
        &mut self,
        media_type: MediaType,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, DecryptError> {
        if !FrameTrailer::is_marked(input) {
            if !self.allows_passthrough() {
                return Err(DecryptError::UnencryptedFrame);
            }
            return copy_unmodified(input, output);
        }

        if self.ratchet.is_none() && self.previous.is_none() {
            return Err(DecryptError::MissingRatchet);
        }
        let (ciphertext, trailer) = FrameTrailer::split(input)?;
        if output.len() < ciphertext.len() {
            return Err(DecryptError::OutputTooSmall {
                needed: ciphertext.len(),
                available: output.len(),
            });
        }

        let mut failure = DecryptError::MissingRatchet;
        if let Some(ratchet) = self.ratchet.as_deref_mut() {
            match open_with(ratchet, &trailer, media_type, ciphertext, output) {
                Ok(len) => {
                    if self.previous.take().is_some() {
                        debug!("sender switched ratchets, dropping previous");
                    }
                    if self.passthrough {
                        debug!("first encrypted frame decrypted, closing passthrough");
                        self.passthrough = false;
                    }
                    trace!(generation = trailer.generation(), len, "decrypted frame");
                    return Ok(len);
                }
                Err(e) => failure = e,
            }
        }

        if let Some(previous) = self.previous.as_deref_mut() {
            if let Ok(len) = open_with(previous, &trailer, media_type, ciphertext, output) {
                trace!(generation = trailer.generation(), len, "decrypted frame under previous ratchet");
                return Ok(len);
            }
        }
        Err(failure)
    }
}

/// Authenticate and decrypt under `ratchet`, advancing it only once the
/// frame has been verified.
fn open_with(
    ratchet: &mut dyn KeyRatchet,
    trailer: &FrameTrailer,
    media_type: MediaType,
    ciphertext: &[u8],
    output: &mut [u8],
) -> Result<usize, DecryptError> {
    let generation = trailer.generation();
    let key = ratchet.peek(generation)?;
    let len = open_frame(&key, trailer, media_type, ciphertext, output)?;
    ratchet.key(generation)?;
    Ok(len)
}

impl Default for DecryptionContext {
    fn default() -> Self {
        Self::new()
    }
}

fn copy_unmodified(input: &[u8], output: &mut [u8]) -> Result<usize, DecryptError> {
    if output.len() < input.len() {
        return Err(DecryptError::OutputTooSmall {
            needed: input.len(),
            available: output.len(),
        });
    }
    output[..input.len()].copy_from_slice(input);
    Ok(input.len())
}
