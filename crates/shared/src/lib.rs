//! DeskRelay Shared Types
//!
//! This crate contains the event and identifier types shared by the relay core,
//! its transport implementation and the daemon.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
