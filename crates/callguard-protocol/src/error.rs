use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown media type: 0x{0:02x}")]
    UnknownMediaType(u8),

    #[error("unknown codec: 0x{0:02x}")]
    UnknownCodec(u8),

    #[error("frame too short for trailer: expected at least {expected} bytes, got {got}")]
    FrameTooShort { expected: usize, got: usize },

    #[error("unexpected supplemental size: {0}")]
    SupplementalSize(u8),
}
