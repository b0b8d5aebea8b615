// Built-in deps
use std::time::Duration;
// External uses
// Workspace uses
use remit_utils::{get_env, parse_env, parse_env_if_exists};
// Local uses

/// Options shared by every service talking to the Ethereum node.
#[derive(Debug, Clone)]
pub struct ConfigurationOptions {
    /// HTTP endpoint of the Ethereum node.
    pub web3_url: String,
    /// Chain id of the network; used for signature recovery and stamped
    /// into outgoing payment messages.
    pub eth_network_id: u64,
}

impl ConfigurationOptions {
    /// Parses the configuration options values from the environment variables.
    /// Panics if any of options is missing or has inappropriate value.
    pub fn from_env() -> Self {
        Self {
            web3_url: get_env("WEB3_URL"),
            eth_network_id: parse_env("ETH_NETWORK_ID"),
        }
    }
}

/// Configuration options for the transaction queue manager.
#[derive(Debug, Clone)]
pub struct TxManagerOptions {
    /// Period of the queue sanity sweep.
    pub sanity_check_interval: Duration,
    /// Delay before the first sweep, giving the task bus time to settle.
    pub sanity_check_startup_delay: Duration,
}

impl TxManagerOptions {
    /// Parses the manager options from the environment variables,
    /// falling back to the defaults where a variable is not set.
    pub fn from_env() -> Self {
        let interval_secs: u64 = parse_env_if_exists("SANITY_CHECK_INTERVAL").unwrap_or(60);
        let delay_secs: u64 = parse_env_if_exists("SANITY_CHECK_STARTUP_DELAY").unwrap_or(10);

        Self {
            sanity_check_interval: Duration::from_secs(interval_secs),
            sanity_check_startup_delay: Duration::from_secs(delay_secs),
        }
    }
}
