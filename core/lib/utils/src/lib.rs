//! Miscellaneous helpers shared by the payment-service crates.

mod env_tools;

pub use env_tools::{get_env, parse_env, parse_env_if_exists};
