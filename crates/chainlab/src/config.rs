//! Validated configuration consumed by the orchestrator.
//!
//! Parsing and file loading are the embedder's concern; this module only
//! defines the shape of the configuration object and the defaults matching a
//! stock development setup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SetupError};
use crate::ports::PortRange;
use crate::tools::ToolKind;

pub const DEFAULT_SOLC_VERSION: &str = "0.5.2";
pub const DEFAULT_GANACHE_VERSION: &str = "6.4.1";
pub const DEFAULT_ETHLINT_VERSION: &str = "1.2.4";
pub const DEFAULT_GAS_PRICE: u64 = 20_000_000_000;
pub const DEFAULT_GAS_LIMIT: u64 = 6_721_975;
pub const DEFAULT_TESTING_PORT_RANGE: (u16, u16) = (8600, 8700);

/// Deterministic development accounts, funded with 100 eth each. These keys
/// are public knowledge and must never hold real funds.
pub const DEFAULT_ACCOUNTS: [&str; 10] = [
    "0xedf206987be3a32111f16c0807c9055e2b8b8fc84f42768015cb7f8471137890, 100 eth",
    "0x0ca1573d73a070cfa5c48ddaf000b9480e94805f96a79ffa2d5bc6cc3288a92d, 100 eth",
    "0x2688eabfae4637b73752d342991579500f231c72d52dd22b29bf018c0df4bdb7, 100 eth",
    "0x4a4dfe519c6182638d18c75523a95ed55a938426d5e80ac55a39ed83f9e4c5fd, 100 eth",
    "0x60fae350e15bdfdc227fc0616dbe26acb5f05d65d469a811383926a675940237, 100 eth",
    "0x9085677b64cb52d4b36058be795cb315722a361fb78b042a02600bcb2b3f2ce1, 100 eth",
    "0x372f46eae3eb91865809a90339acea1697555021d583dceb7dd05a635de7514d, 100 eth",
    "0x48d73da350f98b1b16ede5fab0078c1ee2c3525483d5365626b4ba3d798686cb, 100 eth",
    "0x669fd08dd8760b47b368153b2d8483c08295a0fa2853684746bf84ea533a611c, 100 eth",
    "0x6d3f46df88ffbaf2c7c5a9567f6c26414fa205ae6ca27312a656115a71dfc9f4, 100 eth",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub tools: ToolsConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub testing: TestingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project: ProjectConfig::default(),
            tools: ToolsConfig::default(),
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            testing: TestingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub source_dir: PathBuf,
    pub object_dir: PathBuf,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            name: "MyProject".into(),
            source_dir: "./contracts".into(),
            object_dir: "./build/contracts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Installation root shared by every test context in the process
    pub directory: PathBuf,
    /// Tools that must be installed before a context can open
    pub required: Vec<ToolKind>,
    pub solc_version: String,
    pub ganache_version: String,
    pub ethlint_version: String,
}

impl ToolsConfig {
    /// Required version for a tool, as configured
    pub fn version_for(&self, kind: ToolKind) -> &str {
        match kind {
            ToolKind::Solc => &self.solc_version,
            ToolKind::Ganache => &self.ganache_version,
            ToolKind::EthLint => &self.ethlint_version,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        ToolsConfig {
            directory: ".chainlab".into(),
            required: vec![ToolKind::Solc, ToolKind::Ganache],
            solc_version: DEFAULT_SOLC_VERSION.into(),
            ganache_version: DEFAULT_GANACHE_VERSION.into(),
            ethlint_version: DEFAULT_ETHLINT_VERSION.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Initial accounts, as "0x<private key hex>, <amount> <unit>" strings
    pub accounts: Vec<String>,
    /// Automatic mining interval in seconds; one block per transaction if unset
    pub block_time: Option<f64>,
    pub gas_price: u64,
    pub gas_limit: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            accounts: DEFAULT_ACCOUNTS.iter().map(|s| s.to_string()).collect(),
            block_time: None,
            gas_price: DEFAULT_GAS_PRICE,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Endpoint used when attaching to an externally managed server
    pub endpoint: String,
    pub gas_price: u64,
    pub gas_limit: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            endpoint: "http://127.0.0.1:8545".into(),
            gas_price: DEFAULT_GAS_PRICE,
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestingConfig {
    /// Start a dedicated server when a context opens, instead of attaching to
    /// `client.endpoint`
    pub run_server: bool,
    /// Ports usable by test servers, inclusive
    pub port_range: (u16, u16),
}

impl TestingConfig {
    pub fn port_range(&self) -> Result<PortRange> {
        PortRange::new(self.port_range.0, self.port_range.1)
    }
}

impl Default for TestingConfig {
    fn default() -> Self {
        TestingConfig { run_server: true, port_range: DEFAULT_TESTING_PORT_RANGE }
    }
}

/// Parse a `server.accounts` entry into a (private key, wei balance) pair.
///
/// The entry has the form `"0x<64 hex digits>, <amount> [unit]"` where the
/// unit defaults to wei.
pub fn parse_account(entry: &str) -> Result<(String, u128)> {
    let mut parts = entry.splitn(2, ',');
    let key = parts.next().unwrap_or("").trim().to_string();
    let balance = parts
        .next()
        .ok_or_else(|| SetupError::InvalidConfig(format!("account entry '{entry}' is missing a balance")))?
        .trim();

    if !key.starts_with("0x") || key.len() != 66 || !key[2..].chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SetupError::InvalidConfig(format!(
            "account entry '{entry}' does not start with a 32-byte hex private key"
        )));
    }

    let mut fields = balance.split_whitespace();
    let amount: u128 = fields
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| SetupError::InvalidConfig(format!("account entry '{entry}' has a non-numeric balance")))?;
    let unit = fields.next().unwrap_or("");
    let multiplier = unit_multiplier(unit).ok_or_else(|| {
        SetupError::InvalidConfig(format!("account entry '{entry}' uses unknown unit '{unit}'"))
    })?;

    let wei = amount.checked_mul(multiplier).ok_or_else(|| {
        SetupError::InvalidConfig(format!("account entry '{entry}' balance overflows"))
    })?;
    Ok((key, wei))
}

fn unit_multiplier(unit: &str) -> Option<u128> {
    let multiplier = match unit {
        "" | "wei" => 1,
        "kwei" | "ada" => 10u128.pow(3),
        "mwei" | "babbage" => 10u128.pow(6),
        "gwei" | "shannon" => 10u128.pow(9),
        "micro" | "szabo" => 10u128.pow(12),
        "finney" | "milli" => 10u128.pow(15),
        "eth" | "ether" => 10u128.pow(18),
        _ => return None,
    };
    Some(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_setup() {
        let cfg = Config::default();
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.gas_limit, 6_721_975);
        assert_eq!(cfg.testing.port_range, (8600, 8700));
        assert_eq!(cfg.server.accounts.len(), 10);
        assert!(cfg.testing.run_server);
        assert_eq!(cfg.tools.version_for(ToolKind::Ganache), "6.4.1");
    }

    #[test]
    fn parse_account_eth_unit() {
        let (key, wei) = parse_account(DEFAULT_ACCOUNTS[0]).unwrap();
        assert!(key.starts_with("0xedf2"));
        assert_eq!(wei, 100 * 10u128.pow(18));
    }

    #[test]
    fn parse_account_defaults_to_wei() {
        let entry = format!("0x{}, 42", "ab".repeat(32));
        let (_, wei) = parse_account(&entry).unwrap();
        assert_eq!(wei, 42);
    }

    #[test]
    fn parse_account_rejects_garbage() {
        assert!(parse_account("0x1234, 100 eth").is_err());
        assert!(parse_account("no balance here").is_err());
        let entry = format!("0x{}, 1 parsec", "ab".repeat(32));
        assert!(parse_account(&entry).is_err());
    }

    #[test]
    fn parse_account_rejects_overflowing_balance() {
        let entry = format!("0x{}, {} eth", "ab".repeat(32), u128::MAX);
        let err = parse_account(&entry).unwrap_err();
        assert!(matches!(err, SetupError::InvalidConfig(_)));
        // the largest representable wei amount still parses
        let entry = format!("0x{}, {}", "ab".repeat(32), u128::MAX);
        assert_eq!(parse_account(&entry).unwrap().1, u128::MAX);
    }
}
