//! Reconnection policy for the transaction stream.
//!
//! [`ReconnectController`] owns the monitor's [`ConnectionState`] and the
//! attempt counter. It performs no I/O; the monitor asks it what to do and
//! carries out the answer (open a socket, arm a timer, give up).

use crate::onchain::types::ConnectionState;
use std::time::Duration;

/// Exponential backoff bounded by an attempt count.
///
/// The delay before reconnect attempt `n` (1-indexed) is
/// `base_delay × 2^(n-1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(Duration::MAX)
    }
}

/// What the monitor should do after the connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    /// Wait `delay`, then open attempt number `attempt`.
    After { attempt: u32, delay: Duration },
    /// Attempts exhausted.
    GiveUp,
    /// The drop was user-initiated; nothing to do.
    Idle,
}

#[derive(Debug, Clone)]
pub struct ReconnectController {
    policy: BackoffPolicy,
    state: ConnectionState,
    attempts: u32,
}

impl ReconnectController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// User-requested connect. Returns `false` when a connection is already
    /// being made, is up, or is scheduled.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::Reconnecting => false,
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.attempts = 0;
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    /// The socket reported open.
    pub fn opened(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
            self.attempts = 0;
        }
    }

    /// The socket errored or closed without the user asking for it.
    pub fn lost(&mut self) -> Reconnect {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                if self.attempts < self.policy.max_attempts {
                    self.attempts += 1;
                    self.state = ConnectionState::Reconnecting;
                    Reconnect::After {
                        attempt: self.attempts,
                        delay: self.policy.delay_for(self.attempts),
                    }
                } else {
                    self.state = ConnectionState::Failed;
                    Reconnect::GiveUp
                }
            }
            ConnectionState::Disconnected
            | ConnectionState::Reconnecting
            | ConnectionState::Failed => Reconnect::Idle,
        }
    }

    /// The reconnect timer fired. Returns `false` if the timer is stale
    /// (a disconnect happened while it was pending).
    pub fn timer_elapsed(&mut self) -> bool {
        if self.state == ConnectionState::Reconnecting {
            self.state = ConnectionState::Connecting;
            true
        } else {
            false
        }
    }

    /// User-requested disconnect, valid from any state.
    pub fn disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
    }
}
