//! Per-session coordinator tying the group engine to the media contexts.
//!
//! Signaling handlers and media calls may arrive on different threads. The
//! participant and pending-transition tables are `DashMap`s so a decrypt for
//! one participant never waits on bookkeeping for another. Each decryption
//! context has its own `Mutex`, taken after the map lookup is released; the
//! encryption context and the engine each sit behind their own `Mutex`.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use callguard_crypto::{DecryptError, DecryptionContext, EncryptError, EncryptionContext, KeyRatchet};
use callguard_protocol::{
    ChannelId, Codec, Epoch, MediaType, ProtocolVersion, Ssrc, TransitionId, UserId,
    DISABLED_PROTOCOL_VERSION, INIT_TRANSITION_ID, MAX_SUPPORTED_PROTOCOL_VERSION,
    MLS_NEW_GROUP_EXPECTED_EPOCH,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, trace, warn};

use crate::callbacks::SessionCallbacks;
use crate::config::SessionConfig;
use crate::engine::{CommitOutcome, GroupCryptoEngine};
use crate::error::SessionError;
use crate::state::{SessionState, TransitionOutcome};

type SharedDecryptor = Arc<Mutex<DecryptionContext>>;

/// Current state plus the last state that was not `TransitionPending`, which
/// is where the session returns when a pending transition is dropped.
struct StateTrack {
    current: SessionState,
    settled: SessionState,
}

pub struct SessionCoordinator<E, C> {
    self_user_id: UserId,
    channel_id: ChannelId,
    callbacks: C,
    encryptor: Mutex<EncryptionContext>,
    /// Remote participants only; self never has an entry.
    decryptors: DashMap<UserId, SharedDecryptor>,
    pending_transitions: DashMap<TransitionId, ProtocolVersion>,
    engine: Mutex<E>,
    state: Mutex<StateTrack>,
    /// Last version acknowledged by the signaling server.
    selected_version: AtomicU16,
}

impl<E: GroupCryptoEngine, C: SessionCallbacks> SessionCoordinator<E, C> {
    pub fn new(config: &SessionConfig, engine: E, callbacks: C) -> Self {
        debug!(
            user_id = config.self_user_id,
            channel_id = config.channel_id,
            "creating session coordinator"
        );
        Self {
            self_user_id: config.self_user_id,
            channel_id: config.channel_id,
            callbacks,
            encryptor: Mutex::new(EncryptionContext::new()),
            decryptors: DashMap::new(),
            pending_transitions: DashMap::new(),
            engine: Mutex::new(engine),
            state: Mutex::new(StateTrack {
                current: SessionState::Disabled,
                settled: SessionState::Disabled,
            }),
            selected_version: AtomicU16::new(DISABLED_PROTOCOL_VERSION),
        }
    }

    /// Build the engine from the config's auth session and wrap it.
    pub fn create(config: &SessionConfig, callbacks: C) -> Self {
        let engine = E::create(config.auth_session_id.as_deref());
        Self::new(config, engine, callbacks)
    }

    pub fn max_protocol_version(&self) -> ProtocolVersion {
        MAX_SUPPORTED_PROTOCOL_VERSION
    }

    pub fn self_user_id(&self) -> UserId {
        self.self_user_id
    }

    pub fn state(&self) -> SessionState {
        self.lock_state().current
    }

    /// Remote participants currently tracked, sorted by id.
    pub fn participants(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.decryptors.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn pending_transition(&self, transition_id: TransitionId) -> Option<ProtocolVersion> {
        self.pending_transitions.get(&transition_id).map(|v| *v)
    }

    /// Whether outgoing frames are currently sent unencrypted.
    pub fn is_passthrough(&self) -> bool {
        self.lock_encryptor().is_passthrough()
    }

    // ── Participants ──────────────────────────────────────────────────

    pub fn add_participant(&self, user_id: UserId) {
        if user_id == self.self_user_id {
            warn!(user_id, "ignoring request to track self as a remote participant");
            return;
        }
        match self.decryptors.entry(user_id) {
            Entry::Occupied(_) => debug!(user_id, "participant already tracked"),
            Entry::Vacant(slot) => {
                debug!(user_id, "adding participant");
                slot.insert(Arc::new(Mutex::new(DecryptionContext::new())));
            }
        }
    }

    pub fn remove_participant(&self, user_id: UserId) {
        if self.decryptors.remove(&user_id).is_some() {
            debug!(user_id, "removed participant");
        }
    }

    // ── Media ─────────────────────────────────────────────────────────

    pub fn assign_source_to_codec(&self, codec: Codec, ssrc: Ssrc) {
        if codec == Codec::Unknown {
            return;
        }
        self.lock_encryptor().assign_source_to_codec(codec, ssrc);
    }

    pub fn max_encrypted_frame_size(&self, media_type: MediaType, frame_size: usize) -> usize {
        self.lock_encryptor().max_ciphertext_size(media_type, frame_size)
    }

    pub fn max_decrypted_frame_size(
        &self,
        media_type: MediaType,
        user_id: UserId,
        frame_size: usize,
    ) -> usize {
        match self.decryptor(user_id) {
            Some(ctx) => {
                let ctx = lock_decryptor(&ctx);
                ctx.max_plaintext_size(media_type, frame_size)
            }
            None => frame_size,
        }
    }

    pub fn encrypt_frame(
        &self,
        media_type: MediaType,
        ssrc: Ssrc,
        frame: &[u8],
        output: &mut [u8],
    ) -> Result<usize, EncryptError> {
        self.lock_encryptor().encrypt(media_type, ssrc, frame, output)
    }

    /// Decrypt a frame from `user_id`.
    ///
    /// Frames from participants we do not track are handled as if their
    /// context had never been keyed: plain frames pass, encrypted ones fail.
    pub fn decrypt_frame(
        &self,
        media_type: MediaType,
        user_id: UserId,
        frame: &[u8],
        output: &mut [u8],
    ) -> Result<usize, DecryptError> {
        match self.decryptor(user_id) {
            Some(ctx) => {
                let mut ctx = lock_decryptor(&ctx);
                ctx.decrypt(media_type, frame, output)
            }
            None => {
                trace!(user_id, "no decryption context, treating frame as unencrypted");
                DecryptionContext::new().decrypt(media_type, frame, output)
            }
        }
    }

    // ── Signaling ─────────────────────────────────────────────────────

    pub fn on_protocol_ack(&self, protocol_version: ProtocolVersion) {
        debug!(protocol_version, "handling select protocol ack");
        self.selected_version.store(protocol_version, Ordering::Release);
        self.handle_protocol_init(protocol_version);
    }

    pub fn on_prepare_transition(&self, transition_id: TransitionId, protocol_version: ProtocolVersion) {
        debug!(transition_id, protocol_version, "handling prepare transition");
        self.prepare_transition(transition_id, protocol_version);
        if transition_id != INIT_TRANSITION_ID {
            self.callbacks.send_ready_for_transition(transition_id);
        }
    }

    pub fn on_execute_transition(&self, transition_id: TransitionId) -> TransitionOutcome {
        debug!(transition_id, "handling execute transition");
        self.execute_transition(transition_id)
    }

    pub fn on_prepare_epoch(&self, epoch: Epoch, protocol_version: ProtocolVersion) {
        debug!(epoch, protocol_version, "handling prepare epoch");
        self.handle_prepare_epoch(epoch, protocol_version);
    }

    pub fn on_external_sender_package(&self, external_sender_package: &[u8]) -> Result<(), SessionError> {
        debug!(len = external_sender_package.len(), "handling external sender package");
        self.lock_engine().set_external_sender(external_sender_package)?;
        Ok(())
    }

    pub fn on_proposals(&self, proposals: &[u8]) -> Result<(), SessionError> {
        debug!(len = proposals.len(), "handling proposals");
        let roster = self.roster();
        let commit_welcome = self.lock_engine().process_proposals(proposals, &roster)?;
        match commit_welcome {
            Some(commit_welcome) => self.callbacks.send_commit_welcome(commit_welcome),
            None => debug!("proposals produced no commit"),
        }
        Ok(())
    }

    pub fn on_prepare_commit_transition(&self, transition_id: TransitionId, commit: &[u8]) {
        debug!(transition_id, "handling commit transition");
        let outcome = self.lock_engine().process_commit(commit);
        match outcome {
            CommitOutcome::Ignored => {
                debug!(transition_id, "commit ignored");
                self.drop_pending_transition(transition_id);
            }
            CommitOutcome::Success { joined: true } => self.handle_joined(transition_id),
            CommitOutcome::Success { joined: false } => self.handle_join_failure(transition_id),
        }
    }

    pub fn on_welcome(&self, transition_id: TransitionId, welcome: &[u8]) {
        debug!(transition_id, "handling welcome");
        let roster = self.roster();
        let joined = self.lock_engine().process_welcome(welcome, &roster);
        if joined {
            self.handle_joined(transition_id);
        } else {
            self.handle_join_failure(transition_id);
        }
    }

    /// Tear down the session: encryption context first, then every
    /// decryption context, then the group.
    pub fn destroy(self) {
        debug!(
            user_id = self.self_user_id,
            channel_id = self.channel_id,
            "destroying session coordinator"
        );
        let Self {
            encryptor,
            decryptors,
            engine,
            ..
        } = self;
        drop(encryptor);
        drop(decryptors);
        drop(engine);
    }

    // ── Internals ─────────────────────────────────────────────────────

    fn handle_protocol_init(&self, protocol_version: ProtocolVersion) {
        if protocol_version > DISABLED_PROTOCOL_VERSION {
            self.handle_prepare_epoch(MLS_NEW_GROUP_EXPECTED_EPOCH, protocol_version);
            self.send_key_package();
        } else {
            self.prepare_transition(INIT_TRANSITION_ID, protocol_version);
        }
    }

    fn handle_prepare_epoch(&self, epoch: Epoch, protocol_version: ProtocolVersion) {
        if epoch != MLS_NEW_GROUP_EXPECTED_EPOCH {
            debug!(epoch, "prepare epoch does not start a new group, ignoring");
            return;
        }
        self.lock_engine()
            .initialize(protocol_version, self.channel_id, self.self_user_id);
        self.set_state(SessionState::Initializing { epoch });
    }

    fn send_key_package(&self) {
        let key_package = self.lock_engine().marshalled_key_package();
        match key_package {
            Ok(key_package) => self.callbacks.send_key_package(key_package),
            Err(e) => warn!("failed to marshal key package: {}", e),
        }
    }

    /// Rekey every remote participant for `protocol_version`. INIT applies to
    /// the encryption side at once; anything else waits for its execute.
    fn prepare_transition(&self, transition_id: TransitionId, protocol_version: ProtocolVersion) {
        let participants: Vec<(UserId, SharedDecryptor)> = self
            .decryptors
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        {
            let engine = self.lock_engine();
            for (user_id, ctx) in participants {
                let ratchet = ratchet_for(&*engine, user_id, protocol_version);
                if ratchet.is_none() && protocol_version != DISABLED_PROTOCOL_VERSION {
                    warn!(user_id, protocol_version, "no key ratchet for participant");
                }
                lock_decryptor(&ctx).prepare_transition(protocol_version, ratchet);
            }
        }

        if transition_id == INIT_TRANSITION_ID {
            self.apply_transition(transition_id, protocol_version);
        } else {
            self.pending_transitions.insert(transition_id, protocol_version);
            self.set_state(SessionState::TransitionPending {
                transition_id,
                version: protocol_version,
            });
        }
    }

    fn execute_transition(&self, transition_id: TransitionId) -> TransitionOutcome {
        let Some((_, protocol_version)) = self.pending_transitions.remove(&transition_id) else {
            warn!(transition_id, "execute for unknown transition, ignoring");
            return TransitionOutcome::Unknown;
        };
        self.apply_transition(transition_id, protocol_version);
        TransitionOutcome::Executed {
            version: protocol_version,
        }
    }

    fn apply_transition(&self, transition_id: TransitionId, protocol_version: ProtocolVersion) {
        debug!(transition_id, protocol_version, "applying transition");
        let ratchet = {
            let mut engine = self.lock_engine();
            if protocol_version == DISABLED_PROTOCOL_VERSION {
                engine.reset();
                None
            } else {
                engine.key_ratchet(self.self_user_id)
            }
        };

        {
            let mut encryptor = self.lock_encryptor();
            if protocol_version != DISABLED_PROTOCOL_VERSION
                && !encryptor.prepare_transition(protocol_version, ratchet)
            {
                warn!(transition_id, protocol_version, "no key ratchet for self, outgoing frames will fail");
            }
            encryptor.execute_transition(protocol_version);
        }

        self.set_state(if protocol_version == DISABLED_PROTOCOL_VERSION {
            SessionState::Disabled
        } else {
            SessionState::Active {
                version: protocol_version,
            }
        });
    }

    fn handle_joined(&self, transition_id: TransitionId) {
        let protocol_version = self.lock_engine().protocol_version();
        debug!(transition_id, protocol_version, "joined group");
        self.prepare_transition(transition_id, protocol_version);
        if transition_id != INIT_TRANSITION_ID {
            self.callbacks.send_ready_for_transition(transition_id);
        }
    }

    /// Tell the server the commit or welcome was unusable, then start over
    /// with a fresh group and key package.
    fn handle_join_failure(&self, transition_id: TransitionId) {
        warn!(transition_id, "failed to join group, requesting a new welcome");
        self.drop_pending_transition(transition_id);
        self.callbacks.send_invalid_commit_welcome(transition_id);

        let selected = self.selected_version.load(Ordering::Acquire);
        let protocol_version = if selected == DISABLED_PROTOCOL_VERSION {
            self.lock_engine().protocol_version()
        } else {
            selected
        };
        self.handle_protocol_init(protocol_version);
    }

    /// Self plus every tracked remote participant.
    fn roster(&self) -> Vec<UserId> {
        let mut roster = Vec::with_capacity(self.decryptors.len() + 1);
        roster.push(self.self_user_id);
        roster.extend(self.decryptors.iter().map(|entry| *entry.key()));
        roster
    }

    /// Forget a prepared transition that will never execute. If the session
    /// was waiting on it, fall back to another pending transition or to the
    /// last settled state.
    fn drop_pending_transition(&self, transition_id: TransitionId) {
        if self.pending_transitions.remove(&transition_id).is_none() {
            return;
        }
        let waiting_on_it = matches!(
            self.state(),
            SessionState::TransitionPending { transition_id: id, .. } if id == transition_id
        );
        if !waiting_on_it {
            return;
        }
        let other = self
            .pending_transitions
            .iter()
            .next()
            .map(|entry| (*entry.key(), *entry.value()));
        let next = match other {
            Some((transition_id, version)) => SessionState::TransitionPending {
                transition_id,
                version,
            },
            None => self.lock_state().settled,
        };
        self.set_state(next);
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.lock_state();
        if !matches!(next, SessionState::TransitionPending { .. }) {
            state.settled = next;
        }
        let previous = state.current;
        if previous != next {
            debug!(?previous, ?next, "session state changed");
            state.current = next;
        }
    }

    fn decryptor(&self, user_id: UserId) -> Option<SharedDecryptor> {
        self.decryptors.get(&user_id).map(|entry| Arc::clone(entry.value()))
    }

    fn lock_engine(&self) -> MutexGuard<'_, E> {
        self.engine.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_encryptor(&self) -> MutexGuard<'_, EncryptionContext> {
        self.encryptor.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, StateTrack> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn lock_decryptor(ctx: &Mutex<DecryptionContext>) -> MutexGuard<'_, DecryptionContext> {
    ctx.lock().unwrap_or_else(|p| p.into_inner())
}

fn ratchet_for<E: GroupCryptoEngine>(
    engine: &E,
    user_id: UserId,
    protocol_version: ProtocolVersion,
) -> Option<Box<dyn KeyRatchet>> {
    if protocol_version == DISABLED_PROTOCOL_VERSION {
        None
    } else {
        engine.key_ratchet(user_id)
    }
}
