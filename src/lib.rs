//! Solana launchpad and AMM transaction monitor.
//!
//! Re-exports the monitor so other binaries can embed it and register
//! their own listeners.

pub mod config;
pub mod onchain;
pub mod ws;

pub use onchain::{ConnectionState, EventType, ProtocolEvent, ProtocolMonitor};
