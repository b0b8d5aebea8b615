//! Domain types of the custodial payment service.
//!
//! The central type is [`QueuedTransaction`]: the in-memory image of a row of
//! the `transactions` table, reconstructed far enough to be re-encoded and
//! re-verified before it is handed to the Ethereum network. The `tx` module
//! holds the wire codec itself.

// Built-in deps
use std::fmt;
use std::str::FromStr;
// External uses
use serde::{Deserialize, Serialize};
use thiserror::Error;
// Workspace uses
// Local uses
use crate::tx::{RawTransaction, TxSignature};

pub mod helpers;
pub mod tx;

pub use web3::types::{Address, H160, H256, U256};

/// Database primary key of a transaction row.
pub type TransactionId = i64;

/// Persisted status of a queued transaction.
///
/// A row starts its life with no status at all (`NULL` in the database,
/// `None` in memory), which is why the status is carried around as an
/// `Option<TxStatus>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    /// Admitted, but held back until the sender's balance can cover it.
    Queued,
    /// Broadcast to the network, confirmation not yet observed.
    Unconfirmed,
    /// Included in a block.
    Confirmed,
    /// Failed; never leaves this state through the manager.
    Error,
}

impl TxStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Queued => "queued",
            TxStatus::Unconfirmed => "unconfirmed",
            TxStatus::Confirmed => "confirmed",
            TxStatus::Error => "error",
        }
    }

    /// Terminal statuses are never overwritten by the queue processor.
    pub fn is_terminal(self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Error)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("unknown transaction status: {0}")]
pub struct UnknownStatus(String);

impl FromStr for TxStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TxStatus::Queued),
            "unconfirmed" => Ok(TxStatus::Unconfirmed),
            "confirmed" => Ok(TxStatus::Confirmed),
            "error" => Ok(TxStatus::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// In-memory image of a `transactions` row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedTransaction {
    pub id: TransactionId,
    pub hash: H256,
    pub from: Address,
    /// `None` models the `"0x"` contract-creation sentinel: such rows have
    /// no recipient-side effects at all.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub gas: U256,
    pub gas_price: U256,
    pub data: Vec<u8>,
    /// Present iff the row is signed and therefore eligible for processing.
    pub signature: Option<TxSignature>,
    pub status: Option<TxStatus>,
    pub blocknumber: Option<u64>,
}

impl QueuedTransaction {
    /// Full debit the transaction can impose on the sender.
    pub fn cost(&self) -> U256 {
        self.value + self.gas * self.gas_price
    }

    /// The wire-codec view of the row.
    pub fn raw(&self) -> RawTransaction {
        RawTransaction {
            nonce: self.nonce,
            to: self.to,
            value: self.value,
            gas: self.gas,
            gas_price: self.gas_price,
            data: self.data.clone(),
        }
    }
}

/// Status-change message pushed to both endpoints of a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMessage {
    pub value: U256,
    pub tx_hash: H256,
    pub status: TxStatus,
    pub from_address: Address,
    #[serde(with = "sentinel_address")]
    pub to_address: Option<Address>,
    pub network_id: u64,
}

impl PaymentMessage {
    pub fn render(&self) -> String {
        serde_json::to_string(self).expect("payment message is always serializable")
    }
}

/// Contract creations carry the literal `"0x"` in the `toAddress` field
/// instead of a null.
mod sentinel_address {
    use super::{helpers, Address};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Address>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(address) => serializer.serialize_str(&format!("{:#x}", address)),
            None => serializer.serialize_str("0x"),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Address>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw == "0x" {
            return Ok(None);
        }
        helpers::parse_address(&raw)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("malformed address: {}", raw)))
    }
}
