//! Wire codec for stored transactions: RLP encoding, signature hashes and
//! sender recovery.
//!
//! The service only ever re-encodes what users have already signed, so the
//! codec is deliberately limited to legacy (pre-EIP-2718) transactions:
//! that is the only shape the submission API accepts.

// Built-in deps
// External uses
use parity_crypto::publickey::{public_to_address, recover, Message, Signature};
use rlp::RlpStream;
use thiserror::Error;
use web3::signing::keccak256;
// Workspace uses
// Local uses
use crate::{Address, H256, U256};

/// Errors of reconstructing and verifying a stored signed transaction.
#[derive(Debug, Error, PartialEq)]
pub enum TxError {
    #[error("transaction is missing signature fields")]
    MissingSignature,
    #[error("signature `v` value {0} does not match the configured network")]
    InvalidReplayProtection(u64),
    #[error("sender public key recovery failed")]
    Recovery,
}

/// Signature components of a stored transaction, exactly as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxSignature {
    pub v: u64,
    pub r: H256,
    pub s: H256,
}

impl TxSignature {
    /// Extracts the secp256k1 recovery id from `v`, along with a flag telling
    /// whether the signature commits to the chain id (EIP-155).
    fn recovery_id(&self, chain_id: u64) -> Result<(u8, bool), TxError> {
        let eip155_base = chain_id * 2 + 35;
        match self.v {
            27 | 28 => Ok(((self.v - 27) as u8, false)),
            v if v == eip155_base || v == eip155_base + 1 => Ok(((v - eip155_base) as u8, true)),
            v => Err(TxError::InvalidReplayProtection(v)),
        }
    }
}

/// A legacy Ethereum transaction reconstructed from its stored fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTransaction {
    pub nonce: u64,
    /// `None` encodes as the empty payload, i.e. contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub gas: U256,
    pub gas_price: U256,
    pub data: Vec<u8>,
}

impl RawTransaction {
    fn rlp_append_payload(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        append_uint(stream, self.gas_price);
        append_uint(stream, self.gas);
        if let Some(to) = self.to {
            stream.append(&to.as_bytes().to_vec());
        } else {
            stream.append(&"");
        }
        append_uint(stream, self.value);
        stream.append(&self.data);
    }

    /// Hash the signature commits to. `Some(chain_id)` selects the EIP-155
    /// nine-item payload, `None` the pre-EIP-155 six-item payload.
    pub fn sighash(&self, chain_id: Option<u64>) -> H256 {
        let mut stream = RlpStream::new();
        match chain_id {
            Some(chain_id) => {
                stream.begin_list(9);
                self.rlp_append_payload(&mut stream);
                stream.append(&chain_id);
                stream.append(&0u8);
                stream.append(&0u8);
            }
            None => {
                stream.begin_list(6);
                self.rlp_append_payload(&mut stream);
            }
        }
        keccak256(&stream.out()).into()
    }

    /// Signed wire form accepted by `eth_sendRawTransaction`.
    pub fn encode(&self, signature: &TxSignature) -> Vec<u8> {
        let mut stream = RlpStream::new();
        stream.begin_list(9);
        self.rlp_append_payload(&mut stream);
        stream.append(&signature.v);
        append_uint(&mut stream, U256::from_big_endian(signature.r.as_bytes()));
        append_uint(&mut stream, U256::from_big_endian(signature.s.as_bytes()));
        stream.out().to_vec()
    }

    /// Network hash of the signed wire form.
    pub fn hash(&self, signature: &TxSignature) -> H256 {
        keccak256(&self.encode(signature)).into()
    }
}

/// Recovers the address that produced `signature` over this transaction.
///
/// The result is deterministic and follows the replay-protection rules of the
/// configured network: an EIP-155 `v` for a different chain is rejected
/// rather than recovered to a garbage address.
pub fn recover_sender(
    tx: &RawTransaction,
    signature: &TxSignature,
    chain_id: u64,
) -> Result<Address, TxError> {
    let (recovery_id, protected) = signature.recovery_id(chain_id)?;
    let sighash = tx.sighash(if protected { Some(chain_id) } else { None });

    let parts = Signature::from_rsv(
        &pk_hash(signature.r),
        &pk_hash(signature.s),
        recovery_id,
    );
    let public = recover(&parts, &pk_hash(sighash)).map_err(|_| TxError::Recovery)?;
    Ok(Address::from_slice(public_to_address(&public).as_bytes()))
}

// Integers are RLP-encoded as minimal big-endian byte strings.
fn append_uint(stream: &mut RlpStream, value: U256) {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    let skip = 32 - (value.bits() + 7) / 8;
    stream.append(&buf[skip..].to_vec());
}

// parity-crypto is built against its own release of `ethereum-types`,
// so hashes cross the boundary as bytes.
fn pk_hash(hash: H256) -> Message {
    Message::from_slice(hash.as_bytes())
}
