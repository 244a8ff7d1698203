//! Decoding of inbound stream frames.
//!
//! Frames are decoded into typed wire structs instead of being poked at as
//! loose JSON, so a notification that lacks a field is rejected here rather
//! than surfacing as an empty value further down.

use crate::onchain::types::InboundNotification;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed transaction notification: {0}")]
    Malformed(serde_json::Error),
}

/// What one text frame turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Notification(InboundNotification),
    /// Reply to our subscribe request carrying the subscription id.
    SubscriptionAck(u64),
    /// JSON-RPC error reply from the node.
    RpcError(String),
    /// Anything else without `params.result`.
    Ignored,
}

// --- Wire types for transactionNotification ---

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct NotificationResult {
    signature: String,
    transaction: TransactionWithMeta,
}

#[derive(Deserialize)]
struct TransactionWithMeta {
    meta: TransactionMeta,
    transaction: TransactionBody,
}

#[derive(Deserialize)]
struct TransactionMeta {
    #[serde(rename = "logMessages", default)]
    log_messages: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct TransactionBody {
    message: TransactionMessage,
}

#[derive(Deserialize)]
struct TransactionMessage {
    #[serde(rename = "accountKeys")]
    account_keys: Vec<AccountKey>,
}

/// `jsonParsed` gives objects; other encodings give bare strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum AccountKey {
    Parsed { pubkey: String },
    Plain(String),
}

impl AccountKey {
    fn into_pubkey(self) -> String {
        match self {
            AccountKey::Parsed { pubkey } => pubkey,
            AccountKey::Plain(pubkey) => pubkey,
        }
    }
}

/// Decode one text frame from the stream.
pub fn decode_frame(text: &str) -> Result<Inbound, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text)?;

    let result = envelope
        .params
        .and_then(|mut p| p.get_mut("result").map(Value::take))
        .filter(|r| !r.is_null());
    if let Some(result) = result {
        let parsed: NotificationResult =
            serde_json::from_value(result).map_err(DecodeError::Malformed)?;
        return Ok(Inbound::Notification(InboundNotification {
            signature: parsed.signature,
            log_messages: parsed.transaction.meta.log_messages.unwrap_or_default(),
            account_keys: parsed
                .transaction
                .transaction
                .message
                .account_keys
                .into_iter()
                .map(AccountKey::into_pubkey)
                .collect(),
        }));
    }

    if let Some(err) = envelope.error {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return Ok(Inbound::RpcError(message));
    }

    if let Some(id) = envelope.result.as_ref().and_then(Value::as_u64) {
        return Ok(Inbound::SubscriptionAck(id));
    }

    Ok(Inbound::Ignored)
}
