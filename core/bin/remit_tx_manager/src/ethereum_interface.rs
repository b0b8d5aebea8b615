// Built-in deps
// External uses
// Workspace uses
use remit_config::ConfigurationOptions;
use remit_eth_client::{ClientError, EthereumClient};
use remit_types::{Address, H256, U256};
// Local uses

/// Node-side view of a broadcast transaction, reduced to what the manager
/// acts on: whether the node knows it at all, and the block it landed in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct NodeTxStatus {
    pub blocknumber: Option<u64>,
}

/// Ethereum Interface module provides an abstract interface to
/// interact with the Ethereum blockchain.
///
/// Since this interface is declared as a trait, the queue manager won't
/// be highly tied to the actually running Ethereum node, which
/// is good for testing purposes.
#[async_trait::async_trait]
pub(crate) trait EthereumInterface: Send + Sync + 'static {
    /// Balance of the account at the given block (`None` for latest).
    async fn balance(&self, address: Address, block: Option<u64>) -> Result<U256, ClientError>;

    /// Next valid nonce of the account at the given block (`None` for latest).
    async fn next_nonce(&self, address: Address, block: Option<u64>) -> Result<u64, ClientError>;

    /// Looks the transaction up on the node. `None` means the node has never
    /// seen it, or has dropped it.
    async fn tx_status(&self, hash: H256) -> Result<Option<NodeTxStatus>, ClientError>;

    /// Hands the wire-encoded transaction to the node.
    async fn send_raw_tx(&self, raw_tx: Vec<u8>) -> Result<H256, ClientError>;
}

/// Wrapper over `EthereumClient` using the `Http` transport.
/// Supposed to be the actual Ethereum intermediator for the queue manager.
#[derive(Debug, Clone)]
pub(crate) struct EthereumHttpClient {
    eth_client: EthereumClient,
}

impl EthereumHttpClient {
    pub fn new(options: &ConfigurationOptions) -> anyhow::Result<Self> {
        Ok(Self {
            eth_client: EthereumClient::from_config(options)?,
        })
    }
}

#[async_trait::async_trait]
impl EthereumInterface for EthereumHttpClient {
    async fn balance(&self, address: Address, block: Option<u64>) -> Result<U256, ClientError> {
        self.eth_client.balance(address, block).await
    }

    async fn next_nonce(&self, address: Address, block: Option<u64>) -> Result<u64, ClientError> {
        let nonce = self.eth_client.transaction_count(address, block).await?;
        Ok(nonce.low_u64())
    }

    async fn tx_status(&self, hash: H256) -> Result<Option<NodeTxStatus>, ClientError> {
        let tx = self.eth_client.transaction_by_hash(hash).await?;
        Ok(tx.map(|tx| NodeTxStatus {
            blocknumber: tx.block_number.map(|block| block.as_u64()),
        }))
    }

    async fn send_raw_tx(&self, raw_tx: Vec<u8>) -> Result<H256, ClientError> {
        self.eth_client.send_raw_transaction(raw_tx).await
    }
}
