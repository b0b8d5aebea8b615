// External imports
use anyhow::format_err;
use chrono::NaiveDateTime;
use sqlx::FromRow;
// Workspace imports
use remit_types::helpers::{parse_address, parse_hash, parse_uint};
use remit_types::tx::TxSignature;
use remit_types::{QueuedTransaction, TxStatus, H256, U256};
// Local imports
use crate::QueryResult;

/// Raw image of a `transactions` row. Chain scalars are persisted as
/// strings and only parsed on the way into the domain type.
#[derive(Debug, Clone, FromRow)]
pub struct StorageTransaction {
    pub transaction_id: i64,
    pub hash: String,
    pub from_address: String,
    pub to_address: String,
    pub nonce: i64,
    pub value: String,
    pub gas: String,
    pub gas_price: String,
    pub data: Option<String>,
    pub v: Option<String>,
    pub r: Option<String>,
    pub s: Option<String>,
    pub status: Option<String>,
    pub blocknumber: Option<i64>,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}

impl StorageTransaction {
    /// Converts the stored strings into the typed domain image.
    ///
    /// A row with unparsable signature components is treated as unsigned:
    /// the queue processor will then fail it at broadcast time instead of
    /// sending garbage to the network.
    pub fn into_tx(self) -> QueryResult<QueuedTransaction> {
        let id = self.transaction_id;
        let hash = parse_hash(&self.hash)
            .ok_or_else(|| format_err!("malformed hash in transaction {}", id))?;
        let from = parse_address(&self.from_address)
            .ok_or_else(|| format_err!("malformed from_address in transaction {}", id))?;
        let to = if self.to_address == "0x" {
            None
        } else {
            Some(
                parse_address(&self.to_address)
                    .ok_or_else(|| format_err!("malformed to_address in transaction {}", id))?,
            )
        };

        let value = parse_uint(&self.value)
            .ok_or_else(|| format_err!("malformed value in transaction {}", id))?;
        let gas = parse_uint(&self.gas)
            .ok_or_else(|| format_err!("malformed gas in transaction {}", id))?;
        let gas_price = parse_uint(&self.gas_price)
            .ok_or_else(|| format_err!("malformed gas_price in transaction {}", id))?;

        let data = match self.data.as_deref() {
            Some(data) if !data.is_empty() => hex::decode(data.trim_start_matches("0x"))
                .map_err(|e| format_err!("malformed calldata in transaction {}: {}", id, e))?,
            _ => Vec::new(),
        };

        let signature = match (&self.v, &self.r, &self.s) {
            (Some(v), Some(r), Some(s)) => {
                let components = (parse_uint(v), parse_uint(r), parse_uint(s));
                match components {
                    (Some(v), Some(r), Some(s)) => Some(TxSignature {
                        v: v.low_u64(),
                        r: uint_to_hash(r),
                        s: uint_to_hash(s),
                    }),
                    _ => None,
                }
            }
            _ => None,
        };

        let status = self
            .status
            .as_deref()
            .map(|s| s.parse::<TxStatus>())
            .transpose()?;

        Ok(QueuedTransaction {
            id,
            hash,
            from,
            to,
            nonce: self.nonce as u64,
            value,
            gas,
            gas_price,
            data,
            signature,
            status,
            blocknumber: self.blocknumber.map(|b| b as u64),
        })
    }
}

fn uint_to_hash(value: U256) -> H256 {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    H256(buf)
}
