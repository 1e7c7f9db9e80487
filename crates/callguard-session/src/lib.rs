//! Callguard session coordination.
//!
//! One [`SessionCoordinator`] per voice channel session. It is the single
//! point of contact for both the signaling layer (protocol acks, transitions,
//! proposals, commits, welcomes) and the media pipeline (frame encryption and
//! decryption), and owns every cryptographic context of the session.

pub mod callbacks;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod state;

#[cfg(test)]
mod testing;

pub use callbacks::SessionCallbacks;
pub use config::SessionConfig;
pub use coordinator::SessionCoordinator;
pub use engine::{CommitOutcome, GroupCryptoEngine};
pub use error::{EngineError, SessionError};
pub use state::{SessionState, TransitionOutcome};
