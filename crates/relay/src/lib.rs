//! DeskRelay core
//!
//! Turns first contacts from customer conversations into threads in a shared
//! operator room, forwards messages and reactions both ways, and keeps an
//! optional ticket tracker in sync with the threads.

pub mod commands;
pub mod config;
pub mod error;
pub mod format;
pub mod forward;
pub mod identity;
pub mod ingress;
pub mod lifecycle;
pub mod lock;
pub mod relay;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod scenarios;

pub use config::{Config, ConfigError};
pub use error::{RelayError, RelayResult};
pub use lifecycle::{CloseOutcome, CloseReason, ThreadStart};
pub use relay::Relay;
pub use sync::SyncReport;
pub use transport::{MatrixTransport, Transport, TransportError};
