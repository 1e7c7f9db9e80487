//! Interface to the MLS-style group crypto engine.
//!
//! The engine owns the group state (epoch, roster, external sender, protocol
//! version) and is driven exclusively by the [`SessionCoordinator`]
//! (crate::SessionCoordinator). Dropping the engine destroys the group.

use bytes::Bytes;
use callguard_crypto::KeyRatchet;
use callguard_protocol::{ChannelId, CommitWelcome, ProtocolVersion, UserId};

use crate::error::EngineError;

/// Result of applying a commit to the local group.
///
/// Stale or duplicate commits are routine, so they are an outcome rather than
/// an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The commit does not apply to our group state and was dropped.
    Ignored,
    /// The commit was processed; `joined` tells whether we are a member of
    /// the resulting group.
    Success { joined: bool },
}

pub trait GroupCryptoEngine: Send {
    /// Create an engine with no group, optionally bound to an auth session.
    fn create(auth_session_id: Option<&str>) -> Self
    where
        Self: Sized;

    /// (Re)create the group for `channel_id` with ourselves as the only member.
    fn initialize(&mut self, protocol_version: ProtocolVersion, channel_id: ChannelId, self_user_id: UserId);

    /// Drop all group state.
    fn reset(&mut self);

    /// Protocol version of the current group, `0` when there is none.
    fn protocol_version(&self) -> ProtocolVersion;

    fn set_external_sender(&mut self, external_sender_package: &[u8]) -> Result<(), EngineError>;

    /// Validate proposals against `roster` and commit them.
    ///
    /// Returns `None` when there is nothing to commit.
    fn process_proposals(
        &mut self,
        proposals: &[u8],
        roster: &[UserId],
    ) -> Result<Option<CommitWelcome>, EngineError>;

    fn process_commit(&mut self, commit: &[u8]) -> CommitOutcome;

    /// Join a group from a welcome. Returns whether the join succeeded.
    fn process_welcome(&mut self, welcome: &[u8], roster: &[UserId]) -> bool;

    /// Fresh ratchet for `user_id` in the current epoch, if the group can
    /// export one.
    fn key_ratchet(&self, user_id: UserId) -> Option<Box<dyn KeyRatchet>>;

    /// Serialized key package for this participant.
    fn marshalled_key_package(&mut self) -> Result<Bytes, EngineError>;
}
