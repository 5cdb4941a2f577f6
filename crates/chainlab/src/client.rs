//! Thin JSON-RPC binding to a running chain server.
//!
//! The client owns no retry logic and no chain semantics; it carries the
//! endpoint, the configured default gas settings and the snapshot primitive
//! the test context relies on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};

use crate::errors::{Result, SetupError};
use crate::server::{ChainServer, ServerState};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Opaque server-issued token for a point-in-time chain state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct EthClient {
    endpoint: String,
    http: reqwest::blocking::Client,
    next_id: AtomicU64,
    gas_price: u64,
    gas_limit: u64,
}

impl EthClient {
    /// Bind a client to a supervised server. The server must be ready.
    pub fn bind(server: &ChainServer, gas_price: u64, gas_limit: u64) -> Result<Self> {
        if server.state() != ServerState::Ready {
            return Err(SetupError::ClientBindError { state: server.state().to_string() });
        }
        let endpoint = server.endpoint().ok_or_else(|| SetupError::ClientBindError {
            state: "ready but unbound".into(),
        })?;
        Ok(Self::attach(endpoint, gas_price, gas_limit))
    }

    /// Attach to an externally managed endpoint
    pub fn attach(endpoint: impl Into<String>, gas_price: u64, gas_limit: u64) -> Self {
        EthClient {
            endpoint: endpoint.into(),
            http: reqwest::blocking::Client::builder()
                .timeout(RPC_TIMEOUT)
                .build()
                .expect("default client configuration is valid"),
            next_id: AtomicU64::new(1),
            gas_price,
            gas_limit,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn gas_price(&self) -> u64 {
        self.gas_price
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        match self.call_raw(method, params)? {
            RpcOutcome::Result(result) => Ok(result),
            RpcOutcome::Error(error) => Err(SetupError::Rpc(format!("{method} failed: {error}"))),
        }
    }

    /// One JSON-RPC exchange. Transport problems are errors; a server-side
    /// error object is a regular outcome so callers can interpret it.
    fn call_raw(&self, method: &str, params: Value) -> Result<RpcOutcome> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| SetupError::Rpc(format!("{method} to {} failed: {e}", self.endpoint)))?;
        if !response.status().is_success() {
            return Err(SetupError::Rpc(format!(
                "{method} returned http status {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .map_err(|e| SetupError::Rpc(format!("{method} returned malformed json: {e}")))?;
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Ok(RpcOutcome::Error(error.clone()));
        }
        match body.get("result") {
            Some(result) => Ok(RpcOutcome::Result(result.clone())),
            None => Err(SetupError::Rpc(format!("{method} returned no result"))),
        }
    }

    pub fn net_listening(&self) -> Result<bool> {
        Ok(self.call("net_listening", json!([]))?.as_bool().unwrap_or(false))
    }

    pub fn client_version(&self) -> Result<String> {
        let result = self.call("web3_clientVersion", json!([]))?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SetupError::Rpc("web3_clientVersion returned a non-string".into()))
    }

    pub fn accounts(&self) -> Result<Vec<String>> {
        let result = self.call("eth_accounts", json!([]))?;
        let list = result
            .as_array()
            .ok_or_else(|| SetupError::Rpc("eth_accounts returned a non-array".into()))?;
        Ok(list.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
    }

    /// Latest balance of `address`, in wei
    pub fn balance(&self, address: &str) -> Result<u128> {
        let result = self.call("eth_getBalance", json!([address, "latest"]))?;
        let hex = result
            .as_str()
            .ok_or_else(|| SetupError::Rpc("eth_getBalance returned a non-string".into()))?;
        parse_quantity(hex)
    }

    /// Plain value transfer between unlocked accounts, using the configured
    /// default gas settings. Returns the transaction hash.
    pub fn send_transaction(&self, from: &str, to: &str, value_wei: u128) -> Result<String> {
        let tx = json!({
            "from": from,
            "to": to,
            "value": to_quantity(value_wei),
            "gas": to_quantity(self.gas_limit as u128),
            "gasPrice": to_quantity(self.gas_price as u128),
        });
        let result = self.call("eth_sendTransaction", json!([tx]))?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SetupError::Rpc("eth_sendTransaction returned a non-string".into()))
    }

    pub fn mine_block(&self) -> Result<()> {
        self.call("evm_mine", json!([]))?;
        Ok(())
    }

    /// Record the server's current state; the returned id stays valid until
    /// the server restarts or reverts past it.
    pub fn snapshot(&self) -> Result<SnapshotId> {
        let result = self.call("evm_snapshot", json!([]))?;
        let id = match result {
            Value::String(s) => s,
            // some servers answer with a bare number
            Value::Number(n) => format!("0x{:x}", n.as_u64().unwrap_or_default()),
            other => return Err(SetupError::Rpc(format!("evm_snapshot returned {other}"))),
        };
        tracing::debug!(%id, "chain snapshot taken");
        Ok(SnapshotId(id))
    }

    /// Restore the chain to a previously recorded snapshot.
    ///
    /// The server answers `false` (or an error object) for ids it did not
    /// issue; both surface as `InvalidSnapshot`. Transport failures stay
    /// transport failures.
    pub fn revert(&self, id: &SnapshotId) -> Result<()> {
        match self.call_raw("evm_revert", json!([id.as_str()]))? {
            RpcOutcome::Result(result) if result.as_bool() == Some(true) => {
                tracing::debug!(%id, "chain state reverted");
                Ok(())
            }
            RpcOutcome::Result(_) => Err(SetupError::InvalidSnapshot { id: id.to_string() }),
            RpcOutcome::Error(_) => Err(SetupError::InvalidSnapshot { id: id.to_string() }),
        }
    }
}

enum RpcOutcome {
    Result(Value),
    Error(Value),
}

/// Parse a 0x-prefixed hex quantity
fn parse_quantity(hex: &str) -> Result<u128> {
    let digits = hex.strip_prefix("0x").unwrap_or(hex);
    u128::from_str_radix(digits, 16)
        .map_err(|_| SetupError::Rpc(format!("'{hex}' is not a hex quantity")))
}

fn to_quantity(value: u128) -> String {
    format!("0x{value:x}")
}
