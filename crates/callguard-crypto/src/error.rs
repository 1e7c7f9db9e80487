use callguard_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key derivation failed")]
    KeyDerivation,

    #[error("key for generation {0} is no longer available")]
    KeyUnavailable(u32),

    #[error("invalid key material")]
    InvalidKey,

    #[error("encryption failed")]
    Seal,

    #[error("decryption failed: invalid key or tampered data")]
    Open,
}

/// Why an outgoing frame could not be produced. The frame should be dropped.
#[derive(Debug, Error)]
pub enum EncryptError {
    #[error("no key ratchet bound")]
    MissingRatchet,

    #[error("output buffer too small: need {needed} bytes, have {available}")]
    OutputTooSmall { needed: usize, available: usize },

    #[error("truncated nonce space exhausted, ratchet must be rebound")]
    NonceExhausted,

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Why an incoming frame could not be decrypted. The frame should be dropped.
#[derive(Debug, Error)]
pub enum DecryptError {
    #[error("encrypted frame received before a key ratchet was bound")]
    MissingRatchet,

    #[error("frame failed authentication")]
    Authentication,

    #[error("unencrypted frame received after encryption started")]
    UnencryptedFrame,

    #[error("key for generation {0} is no longer available")]
    KeyUnavailable(u32),

    #[error("output buffer too small: need {needed} bytes, have {available}")]
    OutputTooSmall { needed: usize, available: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] ProtocolError),

    #[error(transparent)]
    Crypto(CryptoError),
}

impl From<CryptoError> for DecryptError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::Open => Self::Authentication,
            CryptoError::KeyUnavailable(generation) => Self::KeyUnavailable(generation),
            other => Self::Crypto(other),
        }
    }
}
