//! Environment variable helpers for the `from_env` constructors.

use crate::protocol::error::{Result, RpcError};
use std::str::FromStr;

/// Value of `name`, treating an unset or blank variable as absent.
pub fn var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parses `name` when set. A value that does not parse is an error rather
/// than a silent fallback to the default.
pub fn parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(name)
        .map(|raw| {
            raw.parse()
                .map_err(|e| RpcError::InvalidRequest(format!("{}='{}' is invalid: {}", name, raw, e)))
        })
        .transpose()
}
