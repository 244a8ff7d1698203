//! `transactionSubscribe` request sent once per successful connection.

use crate::onchain::registry::ProgramRegistry;
use serde::Serialize;

pub const SUBSCRIBE_METHOD: &str = "transactionSubscribe";
pub const COMMITMENT: &str = "confirmed";
pub const ENCODING: &str = "jsonParsed";

/// Transaction filter: every registered program, failed transactions dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionFilter {
    pub failed: bool,
    pub account_include: Vec<String>,
}

/// Fixed delivery options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOptions {
    pub commitment: &'static str,
    pub encoding: &'static str,
    pub transaction_details: &'static str,
    pub max_supported_transaction_version: u8,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            commitment: COMMITMENT,
            encoding: ENCODING,
            transaction_details: "full",
            max_supported_transaction_version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    pub params: (TransactionFilter, DeliveryOptions),
}

impl SubscribeRequest {
    /// The same request is rebuilt after every reconnect, so it only
    /// depends on the (immutable) registry.
    pub fn for_registry(registry: &ProgramRegistry) -> Self {
        Self {
            jsonrpc: "2.0",
            id: 1,
            method: SUBSCRIBE_METHOD,
            params: (
                TransactionFilter {
                    failed: false,
                    account_include: registry.program_ids(),
                },
                DeliveryOptions::default(),
            ),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
