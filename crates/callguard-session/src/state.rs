use callguard_protocol::{Epoch, ProtocolVersion, TransitionId};

/// Where the session is in its protocol lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Media flows unencrypted.
    Disabled,
    /// Group created, key package broadcast, waiting to be welcomed.
    Initializing { epoch: Epoch },
    Active { version: ProtocolVersion },
    /// A transition has been prepared and awaits execution.
    TransitionPending {
        transition_id: TransitionId,
        version: ProtocolVersion,
    },
}

impl SessionState {
    pub fn is_encrypting(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// What an execute-transition request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Executed { version: ProtocolVersion },
    /// No transition with that id was pending; nothing changed.
    Unknown,
}
