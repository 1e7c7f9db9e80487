//! Callguard wire-level vocabulary shared by the crypto and session crates.
//!
//! This crate provides:
//! - Identifier aliases and the protocol constants
//! - Media type and codec tags
//! - The encrypted-frame trailer layout

pub mod error;
pub mod frame;
pub mod types;

pub use error::ProtocolError;
pub use frame::{FrameTrailer, TRAILER_SIZE};
pub use types::*;
