//! Log-line classifier.
//!
//! Turns one transaction notification into at most one [`ProtocolEvent`].
//! The decision table is:
//!
//! 1. Walk the log lines, tracking the invoke stack so every
//!    `Program log: ` line is attributed to the program that wrote it.
//! 2. For each registry entry in order, check its rules in order against
//!    the lines attributed to that entry's program, plus any line that
//!    itself starts with `Program <id>` (full id or short prefix). First
//!    hit wins.
//! 3. Otherwise, if a migration substring shows up in any program's log
//!    lines, infer the platform from the other lines mentioning a
//!    registered program's short id (registry order), falling back to the
//!    migration rule's fallback platform.
//! 4. Otherwise nothing; the transaction is dropped.
//!
//! The token mint / pool address is the first account in the transaction
//! that is not the matched program itself. That is a positional guess, not
//! an instruction decode, and can pick the wrong account for unusual
//! account orderings.

use crate::onchain::registry::{ProgramEntry, ProgramRegistry};
use crate::onchain::types::{EventType, InboundNotification, ProtocolEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const LOG_MARKER: &str = "Program log: ";
const PROGRAM_PREFIX: &str = "Program ";

/// A `Program log:` line and the program executing when it was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProgramLog<'a> {
    /// Index into the notification's log lines.
    line: usize,
    program: Option<&'a str>,
    message: &'a str,
}

fn program_logs(lines: &[String]) -> Vec<ProgramLog<'_>> {
    let mut stack: Vec<&str> = Vec::new();
    let mut logs = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if let Some(message) = line.strip_prefix(LOG_MARKER) {
            logs.push(ProgramLog {
                line: idx,
                program: stack.last().copied(),
                message,
            });
            continue;
        }

        let Some(rest) = line.strip_prefix(PROGRAM_PREFIX) else {
            continue;
        };
        let Some((program, tail)) = rest.split_once(' ') else {
            continue;
        };

        if tail.starts_with("invoke [") {
            stack.push(program);
        } else if (tail == "success" || tail.starts_with("failed")) && stack.last() == Some(&program) {
            stack.pop();
        }
    }

    logs
}

/// Classification output before auxiliary fields are filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate<'r> {
    platform: &'r str,
    event: EventType,
    /// Program whose own id is skipped when picking the account.
    program_id: Option<&'r str>,
}

/// Stateless apart from the immutable registry; safe to share.
#[derive(Debug, Clone)]
pub struct Classifier {
    registry: Arc<ProgramRegistry>,
}

impl Classifier {
    pub fn new(registry: Arc<ProgramRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    /// Classify one notification. `None` means no rule matched.
    pub fn classify(
        &self,
        notification: &InboundNotification,
        timestamp: DateTime<Utc>,
    ) -> Option<ProtocolEvent> {
        let logs = program_logs(&notification.log_messages);

        let candidate = self
            .match_platform_rules(&logs, &notification.log_messages)
            .or_else(|| self.match_migration(&logs, &notification.log_messages))?;

        let account = first_foreign_account(&notification.account_keys, candidate.program_id);
        let (token_mint, pool_address) = match candidate.event {
            EventType::NewToken | EventType::Migrated => (account, None),
            EventType::NewPool => (None, account),
        };

        Some(ProtocolEvent {
            platform: candidate.platform.to_string(),
            event_type: candidate.event,
            signature: notification.signature.clone(),
            timestamp,
            token_mint,
            pool_address,
        })
    }

    fn match_platform_rules<'l>(
        &self,
        logs: &[ProgramLog<'l>],
        lines: &'l [String],
    ) -> Option<Candidate<'_>> {
        for entry in self.registry.entries() {
            let short = entry.short_id();
            let attributed = logs
                .iter()
                .filter(|l| l.program == Some(entry.program_id.as_str()))
                .map(|l| l.message);
            let marked = lines
                .iter()
                .filter(|line| {
                    line.strip_prefix(PROGRAM_PREFIX)
                        .is_some_and(|rest| rest.starts_with(short))
                })
                .map(String::as_str);
            let own: Vec<&str> = attributed.chain(marked).collect();
            if own.is_empty() {
                continue;
            }

            if let Some(rule) = entry
                .rules
                .iter()
                .find(|rule| own.iter().any(|m| m.contains(rule.log.as_str())))
            {
                return Some(Candidate {
                    platform: &entry.platform,
                    event: rule.event,
                    program_id: Some(&entry.program_id),
                });
            }
        }
        None
    }

    fn match_migration(&self, logs: &[ProgramLog<'_>], lines: &[String]) -> Option<Candidate<'_>> {
        let rule = self.registry.migration()?;
        let hit = logs
            .iter()
            .find(|l| rule.logs.iter().any(|needle| l.message.contains(needle.as_str())))?;

        let inferred: Option<&ProgramEntry> = self.registry.entries().iter().find(|entry| {
            let short = entry.short_id();
            lines
                .iter()
                .enumerate()
                .any(|(idx, line)| idx != hit.line && line.contains(short))
        });

        Some(match inferred {
            Some(entry) => Candidate {
                platform: &entry.platform,
                event: EventType::Migrated,
                program_id: Some(&entry.program_id),
            },
            None => Candidate {
                platform: &rule.fallback_platform,
                event: EventType::Migrated,
                program_id: self
                    .registry
                    .by_platform(&rule.fallback_platform)
                    .map(|e| e.program_id.as_str()),
            },
        })
    }
}

fn first_foreign_account(accounts: &[String], program_id: Option<&str>) -> Option<String> {
    accounts
        .iter()
        .find(|a| Some(a.as_str()) != program_id)
        .cloned()
}
