//! Scripted engine and recording callbacks for coordinator tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use callguard_crypto::{HashRatchet, KeyRatchet};
use callguard_protocol::{ChannelId, CommitWelcome, ProtocolVersion, TransitionId, UserId};
use sha2::{Digest, Sha256};

use crate::callbacks::SessionCallbacks;
use crate::engine::{CommitOutcome, GroupCryptoEngine};
use crate::error::EngineError;

/// Inputs and observations shared between a test and its engine.
#[derive(Default)]
pub(crate) struct Script {
    pub auth_session_id: Option<String>,
    pub protocol_version: ProtocolVersion,
    pub channel_id: Option<ChannelId>,
    /// Bumped by every accepted commit or welcome.
    pub epoch: u64,
    pub group_secret: Option<[u8; 32]>,
    pub initialized: Vec<(ProtocolVersion, ChannelId, UserId)>,
    pub resets: usize,
    pub external_sender: Option<Vec<u8>>,
    /// Popped per commit; empty queue means `Ignored`.
    pub commit_outcomes: VecDeque<CommitOutcome>,
    /// Popped per welcome; empty queue means success.
    pub welcome_results: VecDeque<bool>,
    pub rosters: Vec<Vec<UserId>>,
}

/// Engine whose group secret is derived from the channel id and epoch, so two
/// engines that went through the same commits hand out matching ratchets and
/// every new epoch hands out different ones.
#[derive(Clone, Default)]
pub(crate) struct ScriptedEngine {
    script: Arc<Mutex<Script>>,
}

impl ScriptedEngine {
    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

impl Script {
    fn rekey(&mut self) {
        let epoch = self.epoch.to_be_bytes();
        self.group_secret = self
            .channel_id
            .map(|channel_id| digest(&[b"group", &channel_id.to_be_bytes(), &epoch]));
    }

    fn next_epoch(&mut self) {
        self.epoch += 1;
        self.rekey();
    }
}

fn digest(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

impl GroupCryptoEngine for ScriptedEngine {
    fn create(auth_session_id: Option<&str>) -> Self {
        let engine = Self::default();
        engine.script().auth_session_id = auth_session_id.map(str::to_owned);
        engine
    }

    fn initialize(&mut self, protocol_version: ProtocolVersion, channel_id: ChannelId, self_user_id: UserId) {
        let mut script = self.script();
        script.protocol_version = protocol_version;
        script.channel_id = Some(channel_id);
        script.epoch = 1;
        script.rekey();
        script.initialized.push((protocol_version, channel_id, self_user_id));
    }

    fn reset(&mut self) {
        let mut script = self.script();
        script.protocol_version = 0;
        script.channel_id = None;
        script.epoch = 0;
        script.group_secret = None;
        script.resets += 1;
    }

    fn protocol_version(&self) -> ProtocolVersion {
        self.script().protocol_version
    }

    fn set_external_sender(&mut self, external_sender_package: &[u8]) -> Result<(), EngineError> {
        if external_sender_package.is_empty() {
            return Err(EngineError::ExternalSender("empty package".into()));
        }
        self.script().external_sender = Some(external_sender_package.to_vec());
        Ok(())
    }

    fn process_proposals(
        &mut self,
        proposals: &[u8],
        roster: &[UserId],
    ) -> Result<Option<CommitWelcome>, EngineError> {
        self.script().rosters.push(roster.to_vec());
        match proposals.first() {
            None => Ok(None),
            Some(0xFF) => Err(EngineError::Proposals("unknown sender".into())),
            Some(_) => Ok(Some(CommitWelcome {
                commit: Bytes::copy_from_slice(proposals),
                welcome: Some(Bytes::from_static(b"welcome")),
            })),
        }
    }

    fn process_commit(&mut self, _commit: &[u8]) -> CommitOutcome {
        let mut script = self.script();
        let outcome = script.commit_outcomes.pop_front().unwrap_or(CommitOutcome::Ignored);
        if matches!(outcome, CommitOutcome::Success { .. }) {
            script.next_epoch();
        }
        outcome
    }

    fn process_welcome(&mut self, _welcome: &[u8], roster: &[UserId]) -> bool {
        let mut script = self.script();
        script.rosters.push(roster.to_vec());
        let joined = script.welcome_results.pop_front().unwrap_or(true);
        if joined {
            script.next_epoch();
        }
        joined
    }

    fn key_ratchet(&self, user_id: UserId) -> Option<Box<dyn KeyRatchet>> {
        let secret = self.script().group_secret?;
        Some(HashRatchet::boxed(digest(&[&secret, &user_id.to_be_bytes()])))
    }

    fn marshalled_key_package(&mut self) -> Result<Bytes, EngineError> {
        match self.script().initialized.last() {
            Some((_, _, user_id)) => Ok(Bytes::from(format!("key-package-{user_id}"))),
            None => Err(EngineError::NotInitialized),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outbound {
    ReadyForTransition(TransitionId),
    KeyPackage(Bytes),
    CommitWelcome(CommitWelcome),
    InvalidCommitWelcome(TransitionId),
}

#[derive(Clone, Default)]
pub(crate) struct RecordingCallbacks {
    sent: Arc<Mutex<Vec<Outbound>>>,
}

impl RecordingCallbacks {
    /// Drain everything sent so far.
    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    fn push(&self, message: Outbound) {
        self.sent.lock().unwrap().push(message);
    }
}

impl SessionCallbacks for RecordingCallbacks {
    fn send_ready_for_transition(&self, transition_id: TransitionId) {
        self.push(Outbound::ReadyForTransition(transition_id));
    }

    fn send_key_package(&self, key_package: Bytes) {
        self.push(Outbound::KeyPackage(key_package));
    }

    fn send_commit_welcome(&self, commit_welcome: CommitWelcome) {
        self.push(Outbound::CommitWelcome(commit_welcome));
    }

    fn send_invalid_commit_welcome(&self, transition_id: TransitionId) {
        self.push(Outbound::InvalidCommitWelcome(transition_id));
    }
}
