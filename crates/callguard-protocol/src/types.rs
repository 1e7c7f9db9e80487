use crate::error::ProtocolError;

/// Participant identity as assigned by the signaling service.
pub type UserId = u64;

/// Voice channel the session is bound to.
pub type ChannelId = u64;

/// Identifier of a coordinated protocol-version change.
pub type TransitionId = u16;

/// Group key protocol version. `0` means encryption is disabled.
pub type ProtocolVersion = u16;

/// Group state generation counter.
pub type Epoch = u64;

/// RTP synchronization source of an outgoing media stream.
pub type Ssrc = u32;

/// Protocol version meaning "media flows unencrypted".
pub const DISABLED_PROTOCOL_VERSION: ProtocolVersion = 0;

/// Reserved transition id; applied as soon as it is prepared.
pub const INIT_TRANSITION_ID: TransitionId = 0;

/// The only epoch at which a group may be (re)created.
pub const MLS_NEW_GROUP_EXPECTED_EPOCH: Epoch = 1;

/// Highest protocol version this implementation negotiates.
pub const MAX_SUPPORTED_PROTOCOL_VERSION: ProtocolVersion = 1;

/// Kind of media carried by a frame. Bound into the frame AAD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MediaType {
    Audio = 0x00,
    Video = 0x01,
}

impl MediaType {
    pub fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        match b {
            0x00 => Ok(Self::Audio),
            0x01 => Ok(Self::Video),
            other => Err(ProtocolError::UnknownMediaType(other)),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Codec tag for an outgoing media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Codec {
    /// Source has not been tagged; callers skip it.
    Unknown = 0x00,
    #[default]
    Opus = 0x01,
    Vp8 = 0x02,
    Vp9 = 0x03,
    H264 = 0x04,
    H265 = 0x05,
    Av1 = 0x06,
}

impl Codec {
    pub fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        match b {
            0x00 => Ok(Self::Unknown),
            0x01 => Ok(Self::Opus),
            0x02 => Ok(Self::Vp8),
            0x03 => Ok(Self::Vp9),
            0x04 => Ok(Self::H264),
            0x05 => Ok(Self::H265),
            0x06 => Ok(Self::Av1),
            other => Err(ProtocolError::UnknownCodec(other)),
        }
    }
}

/// Commit and optional welcome produced in response to a batch of proposals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitWelcome {
    pub commit: bytes::Bytes,
    /// Present only when the commit adds members.
    pub welcome: Option<bytes::Bytes>,
}
