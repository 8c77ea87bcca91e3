//! Endpoint configuration: which contract to watch and where to stream from.

use crate::error::ConfigError;
use alloy_primitives::Address;
use serde::Serialize;
use std::fmt;
use url::Url;

/// Environment key holding the deployed contract address.
pub const CONTRACT_ADDRESS_KEY: &str = "CONTRACT_ADDRESS";
/// Environment key holding a dedicated streaming (ws/wss) endpoint.
pub const TRANSPORT_WS_URL_KEY: &str = "TRANSPORT_WS_URL";
/// Environment key holding the node endpoint; `http(s)` is rewritten to `ws(s)`.
pub const TRANSPORT_URL_KEY: &str = "TRANSPORT_URL";

/// Validated endpoint settings. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointConfig {
    /// Contract whose logs are watched
    pub address: Address,
    /// Streaming endpoint, always `ws://` or `wss://`
    pub transport_url: String,
}

impl EndpointConfig {
    /// Validate an address and a transport URL.
    ///
    /// `http://` and `https://` URLs are rewritten to `ws://` and `wss://`.
    pub fn new(address: &str, transport_url: &str) -> Result<Self, ConfigError> {
        let address = parse_address(address)?;
        let transport_url = normalize_transport_url(transport_url)?;
        Ok(Self { address, transport_url })
    }

    /// Resolve the endpoint from environment-style values.
    ///
    /// A non-empty dedicated streaming URL wins; otherwise the node URL is
    /// used and rewritten to its streaming scheme.
    pub fn resolve(
        contract_address: Option<&str>,
        ws_url: Option<&str>,
        rpc_url: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let address = non_empty(contract_address).ok_or(ConfigError::Missing {
            key: CONTRACT_ADDRESS_KEY,
        })?;
        let url = non_empty(ws_url)
            .or_else(|| non_empty(rpc_url))
            .ok_or(ConfigError::Missing { key: TRANSPORT_URL_KEY })?;
        Self::new(address, url)
    }

    /// Read `CONTRACT_ADDRESS`, `TRANSPORT_WS_URL` and `TRANSPORT_URL` from
    /// the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let address = std::env::var(CONTRACT_ADDRESS_KEY).ok();
        let ws = std::env::var(TRANSPORT_WS_URL_KEY).ok();
        let rpc = std::env::var(TRANSPORT_URL_KEY).ok();
        Self::resolve(address.as_deref(), ws.as_deref(), rpc.as_deref())
    }
}

impl fmt::Display for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.address, self.transport_url)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_address(value: &str) -> Result<Address, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Missing { key: CONTRACT_ADDRESS_KEY });
    }
    trimmed
        .parse::<Address>()
        .map_err(|e| ConfigError::InvalidAddress {
            value: trimmed.to_string(),
            reason: e.to_string(),
        })
}

/// Parse `value` and rewrite `http`/`https` to `ws`/`wss`.
pub fn normalize_transport_url(value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Missing { key: TRANSPORT_URL_KEY });
    }
    let mut url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidUrl {
        value: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    let target = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => {
            return Err(ConfigError::UnsupportedScheme { scheme: other.to_string() });
        }
    };
    if let Some(scheme) = target {
        url.set_scheme(scheme).map_err(|_| ConfigError::InvalidUrl {
            value: trimmed.to_string(),
            reason: format!("cannot rewrite scheme to {scheme}"),
        })?;
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ConfigError::InvalidUrl {
            value: trimmed.to_string(),
            reason: "missing host".into(),
        });
    }
    Ok(url.to_string())
}
