// Built-in deps
use std::env;
use std::fmt::Debug;
use std::str::FromStr;

/// Obtains the environment variable value.
/// Panics if there is no environment variable with provided name set.
pub fn get_env(name: &str) -> String {
    env::var(name).unwrap_or_else(|e| panic!("Env var {} missing, {}", name, e))
}

/// Obtains the environment variable value and parses it using the `FromStr` type implementation.
/// Panics if there is no environment variable with provided name set, or the value cannot be parsed.
pub fn parse_env<F>(name: &str) -> F
where
    F: FromStr,
    F::Err: Debug,
{
    get_env(name)
        .parse()
        .unwrap_or_else(|e| panic!("Failed to parse environment variable {}: {:?}", name, e))
}

/// Similar to `parse_env`, but returns `None` instead of panicking
/// if the environment variable is not set.
pub fn parse_env_if_exists<F>(name: &str) -> Option<F>
where
    F: FromStr,
    F::Err: Debug,
{
    env::var(name).ok().map(|value| {
        value
            .parse()
            .unwrap_or_else(|e| panic!("Failed to parse environment variable {}: {:?}", name, e))
    })
}
