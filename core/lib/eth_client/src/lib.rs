//! Thin adapter over the Ethereum JSON-RPC endpoints the payment service
//! consumes. No retry policy lives at this layer: callers decide what a
//! failure means for the queue they are processing.

// Built-in deps
use std::fmt;
// External uses
use web3::transports::Http;
use web3::types::{BlockNumber, Bytes, Transaction, TransactionId, U64};
use web3::Web3;
// Workspace uses
use remit_config::ConfigurationOptions;
use remit_types::{Address, H256, U256};
// Local uses
pub use self::error::ClientError;

mod error;

/// Client for the four node calls of the queue manager.
///
/// The `block` argument of the balance and nonce queries pins the query to a
/// historical height; `None` asks the node for its latest view.
#[derive(Clone)]
pub struct EthereumClient {
    web3: Web3<Http>,
}

impl fmt::Debug for EthereumClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthereumClient").finish()
    }
}

impl EthereumClient {
    pub fn new(transport: Http) -> Self {
        Self {
            web3: Web3::new(transport),
        }
    }

    pub fn from_config(options: &ConfigurationOptions) -> anyhow::Result<Self> {
        let transport = Http::new(&options.web3_url)?;
        Ok(Self::new(transport))
    }

    /// `eth_getBalance`.
    pub async fn balance(
        &self,
        address: Address,
        block: Option<u64>,
    ) -> Result<U256, ClientError> {
        Ok(self
            .web3
            .eth()
            .balance(address, Some(block_param(block)))
            .await?)
    }

    /// `eth_getTransactionCount`: the next valid nonce of the account.
    pub async fn transaction_count(
        &self,
        address: Address,
        block: Option<u64>,
    ) -> Result<U256, ClientError> {
        Ok(self
            .web3
            .eth()
            .transaction_count(address, Some(block_param(block)))
            .await?)
    }

    /// `eth_getTransactionByHash`. `None` means the node does not know the
    /// transaction at all.
    pub async fn transaction_by_hash(
        &self,
        hash: H256,
    ) -> Result<Option<Transaction>, ClientError> {
        Ok(self
            .web3
            .eth()
            .transaction(TransactionId::Hash(hash))
            .await?)
    }

    /// `eth_sendRawTransaction`.
    pub async fn send_raw_transaction(&self, raw_tx: Vec<u8>) -> Result<H256, ClientError> {
        Ok(self
            .web3
            .eth()
            .send_raw_transaction(Bytes(raw_tx))
            .await?)
    }
}

fn block_param(block: Option<u64>) -> BlockNumber {
    match block {
        Some(number) => BlockNumber::Number(U64::from(number)),
        None => BlockNumber::Latest,
    }
}
