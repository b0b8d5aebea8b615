// External uses
use thiserror::Error;

/// Failure of an Ethereum node call.
///
/// A structured JSON-RPC error means the node received the request and
/// refused it; everything else is a transport-level problem and says nothing
/// about the request itself. The queue processor treats the two very
/// differently, so the split happens here.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("JSON-RPC error [{code}]: {message}")]
    Rpc { code: i64, message: String },
    #[error("Ethereum node request failed: {0}")]
    Transport(#[source] web3::Error),
}

impl From<web3::Error> for ClientError {
    fn from(err: web3::Error) -> Self {
        match err {
            web3::Error::Rpc(rpc) => Self::Rpc {
                code: rpc.code.code(),
                message: rpc.message,
            },
            other => Self::Transport(other),
        }
    }
}

impl ClientError {
    /// `true` for errors the node itself returned for this request.
    pub fn is_rpc(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }
}
