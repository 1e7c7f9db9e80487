use std::sync::Arc;

use bytes::Bytes;
use callguard_protocol::{CommitWelcome, TransitionId};

/// Outbound signaling, supplied by the caller.
///
/// Called synchronously from inside coordinator operations; implementations
/// should only enqueue.
pub trait SessionCallbacks: Send + Sync {
    fn send_ready_for_transition(&self, transition_id: TransitionId);

    fn send_key_package(&self, key_package: Bytes);

    fn send_commit_welcome(&self, commit_welcome: CommitWelcome);

    fn send_invalid_commit_welcome(&self, transition_id: TransitionId);
}

impl<T: SessionCallbacks + ?Sized> SessionCallbacks for Arc<T> {
    fn send_ready_for_transition(&self, transition_id: TransitionId) {
        (**self).send_ready_for_transition(transition_id);
    }

    fn send_key_package(&self, key_package: Bytes) {
        (**self).send_key_package(key_package);
    }

    fn send_commit_welcome(&self, commit_welcome: CommitWelcome) {
        (**self).send_commit_welcome(commit_welcome);
    }

    fn send_invalid_commit_welcome(&self, transition_id: TransitionId) {
        (**self).send_invalid_commit_welcome(transition_id);
    }
}
