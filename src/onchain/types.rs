//! Types shared by the transaction monitor: connection state, decoded
//! notifications and the classified events handed to listeners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of the monitor's single streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until the next explicit `connect()`.
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// What a classified transaction means for the platform that emitted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A token was launched on a bonding curve.
    NewToken,
    /// A new AMM pool was initialised.
    NewPool,
    /// Bonding-curve liquidity moved into an AMM pool.
    Migrated,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventType::NewToken => write!(f, "new_token"),
            EventType::NewPool => write!(f, "new_pool"),
            EventType::Migrated => write!(f, "migrated"),
        }
    }
}

/// One transaction notification pulled off the stream.
///
/// Only lives long enough to be classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundNotification {
    pub signature: String,
    pub log_messages: Vec<String>,
    /// Account addresses in transaction order.
    pub account_keys: Vec<String>,
}

/// A platform event recognised from a transaction's logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolEvent {
    pub platform: String,
    pub event_type: EventType,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_mint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_address: Option<String>,
}
