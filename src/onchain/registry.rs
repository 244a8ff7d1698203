//! Program registry: which on-chain programs we watch and which log lines
//! mark a launch, a pool creation or a migration on each of them.
//!
//! The registry is built once from config and never changes for the life
//! of a monitor.

use crate::onchain::types::EventType;
use serde::Deserialize;
use std::collections::HashSet;
use thiserror::Error;

pub const PUMPFUN_PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";
pub const MOONSHOT_PROGRAM: &str = "MoonCVVNZFSYkqNXP6bxHLPL6QQJiMagDL3qcqUQTrG";
pub const METEORA_DBC_PROGRAM: &str = "dbcij3LWUppWqq96dh6gJWwBifmcGfLSB5D4DuSMaqN";
pub const RAYDIUM_AMM_PROGRAM: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";
pub const RAYDIUM_LAUNCHLAB_PROGRAM: &str = "LanMV9sAd7wArD4vJFi2qDdfnVhFxYSUg6eADduJ3uj";

/// Number of leading program-id characters used to spot a program in
/// arbitrary log lines when inferring the platform of a migration.
pub const SHORT_ID_LEN: usize = 8;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("program registry is empty")]
    Empty,
    #[error("platform {0} has an empty program id")]
    EmptyProgramId(String),
    #[error("program id {0} registered more than once")]
    DuplicateProgram(String),
    #[error("platform {0} has a rule with an empty log substring")]
    EmptyRule(String),
}

/// Maps a log substring to the event it signals.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogRule {
    /// Case-sensitive substring looked for in the program's log lines.
    pub log: String,
    pub event: EventType,
}

impl LogRule {
    pub fn new(log: &str, event: EventType) -> Self {
        Self {
            log: log.to_string(),
            event,
        }
    }
}

/// One watched program.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProgramEntry {
    pub platform: String,
    pub program_id: String,
    /// Checked in order; the first hit wins for this program.
    #[serde(default)]
    pub rules: Vec<LogRule>,
}

impl ProgramEntry {
    /// Leading characters of the program id, used for loose attribution.
    pub fn short_id(&self) -> &str {
        let end = self
            .program_id
            .char_indices()
            .nth(SHORT_ID_LEN)
            .map(|(i, _)| i)
            .unwrap_or(self.program_id.len());
        &self.program_id[..end]
    }
}

/// Cross-platform migration heuristic, matched against log lines from any
/// program once no platform-specific rule has fired.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MigrationRule {
    pub logs: Vec<String>,
    /// Platform reported when no registered program shows up in the logs.
    #[serde(default = "default_fallback_platform")]
    pub fallback_platform: String,
}

fn default_fallback_platform() -> String {
    "raydium".to_string()
}

impl Default for MigrationRule {
    fn default() -> Self {
        Self {
            logs: vec!["migrate".to_string()],
            fallback_platform: default_fallback_platform(),
        }
    }
}

/// Ordered, immutable set of watched programs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRegistry {
    entries: Vec<ProgramEntry>,
    migration: Option<MigrationRule>,
}

impl ProgramRegistry {
    pub fn new(
        entries: Vec<ProgramEntry>,
        migration: Option<MigrationRule>,
    ) -> Result<Self, RegistryError> {
        if entries.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if entry.program_id.trim().is_empty() {
                return Err(RegistryError::EmptyProgramId(entry.platform.clone()));
            }
            if !seen.insert(entry.program_id.as_str()) {
                return Err(RegistryError::DuplicateProgram(entry.program_id.clone()));
            }
            if entry.rules.iter().any(|r| r.log.is_empty()) {
                return Err(RegistryError::EmptyRule(entry.platform.clone()));
            }
        }
        if let Some(m) = &migration {
            if m.logs.iter().any(|l| l.is_empty()) {
                return Err(RegistryError::EmptyRule("migration".to_string()));
            }
        }

        Ok(Self { entries, migration })
    }

    /// The launchpads and AMMs watched on mainnet.
    pub fn mainnet() -> Self {
        let entries = vec![
            ProgramEntry {
                platform: "pumpfun".to_string(),
                program_id: PUMPFUN_PROGRAM.to_string(),
                rules: vec![
                    LogRule::new("Instruction: Create", EventType::NewToken),
                    LogRule::new("Instruction: Migrate", EventType::Migrated),
                ],
            },
            ProgramEntry {
                platform: "moonshot".to_string(),
                program_id: MOONSHOT_PROGRAM.to_string(),
                rules: vec![
                    LogRule::new("tokenMint", EventType::NewToken),
                    LogRule::new("migrateFunds", EventType::Migrated),
                ],
            },
            ProgramEntry {
                platform: "meteora".to_string(),
                program_id: METEORA_DBC_PROGRAM.to_string(),
                rules: vec![LogRule::new("initialize_virtual_pool", EventType::NewPool)],
            },
            ProgramEntry {
                platform: "raydium".to_string(),
                program_id: RAYDIUM_AMM_PROGRAM.to_string(),
                rules: vec![LogRule::new("initialize2", EventType::NewPool)],
            },
            ProgramEntry {
                platform: "launchlab".to_string(),
                program_id: RAYDIUM_LAUNCHLAB_PROGRAM.to_string(),
                rules: vec![LogRule::new("initialize_v2", EventType::NewToken)],
            },
        ];

        Self {
            entries,
            migration: Some(MigrationRule::default()),
        }
    }

    pub fn entries(&self) -> &[ProgramEntry] {
        &self.entries
    }

    pub fn migration(&self) -> Option<&MigrationRule> {
        self.migration.as_ref()
    }

    /// All registered program ids, in registry order.
    pub fn program_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.program_id.clone()).collect()
    }

    pub fn by_program_id(&self, program_id: &str) -> Option<&ProgramEntry> {
        self.entries.iter().find(|e| e.program_id == program_id)
    }

    pub fn by_platform(&self, platform: &str) -> Option<&ProgramEntry> {
        self.entries.iter().find(|e| e.platform == platform)
    }
}
