//! Parsers for the string renderings the database uses for chain scalars.

// Built-in deps
// External uses
// Workspace uses
// Local uses
use crate::{Address, H256, U256};

/// Parses a stored numeric string. Both decimal and `0x`-prefixed
/// hexadecimal renderings occur in the wild, so both are accepted.
pub fn parse_uint(raw: &str) -> Option<U256> {
    let raw = raw.trim();
    match raw.strip_prefix("0x") {
        Some(hex) if !hex.is_empty() => {
            let padded = if hex.len() % 2 == 0 {
                hex.to_string()
            } else {
                format!("0{}", hex)
            };
            let bytes = hex::decode(&padded).ok()?;
            if bytes.len() > 32 {
                return None;
            }
            Some(U256::from_big_endian(&bytes))
        }
        Some(_) => None,
        None => U256::from_dec_str(raw).ok(),
    }
}

/// Parses a stored 20-byte address string. The bare `"0x"` contract-creation
/// sentinel is not an address and yields `None`.
pub fn parse_address(raw: &str) -> Option<Address> {
    let hex = raw.trim().strip_prefix("0x")?;
    let bytes = hex::decode(hex).ok()?;
    if bytes.len() != 20 {
        return None;
    }
    Some(Address::from_slice(&bytes))
}

/// Parses a stored 32-byte hash string.
pub fn parse_hash(raw: &str) -> Option<H256> {
    let hex = raw.trim().strip_prefix("0x")?;
    let bytes = hex::decode(hex).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    Some(H256::from_slice(&bytes))
}
