//! On-chain launch monitoring for Solana.
//!
//! Streams transactions that touch token launchpads and AMMs to detect:
//! 1. New token launches on bonding curves
//! 2. New AMM pool initialisations
//! 3. Bonding-curve migrations into AMM pools
//!
//! Architecture:
//! - `ProtocolMonitor`: owns the streaming connection, re-subscribes after
//!   every reconnect and applies the backoff policy in `backoff`
//! - `Classifier`: pure decision table from log lines to `ProtocolEvent`
//! - `EventDispatcher`: per-topic listener registry; every event goes out on
//!   the `"event"` topic

pub mod backoff;
pub mod classifier;
pub mod decode;
pub mod dispatcher;
pub mod monitor;
pub mod registry;
pub mod subscription;
pub mod types;

pub use backoff::{BackoffPolicy, ReconnectController};
pub use classifier::Classifier;
pub use dispatcher::{listener, EventDispatcher, Listener, EVENT_TOPIC};
pub use monitor::ProtocolMonitor;
pub use registry::{LogRule, MigrationRule, ProgramEntry, ProgramRegistry};
pub use types::{ConnectionState, EventType, InboundNotification, ProtocolEvent};
