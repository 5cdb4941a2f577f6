//! Catalog of the external tools the orchestrator can provision.
//!
//! Each supported tool has a fixed distribution strategy: native binaries are
//! fetched straight from their release page, node tools are installed through
//! npm into a scoped directory. Install directories are keyed by
//! `<name>-<version>` so distinct versions never collide and a cached install
//! is valid by construction.

pub mod installer;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Closed set of tools this crate knows how to provision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ToolKind {
    /// Solidity compiler, native binary release
    Solc,
    /// ganache-cli chain simulator, npm package
    Ganache,
    /// ethlint linter, npm package
    EthLint,
}

impl ToolKind {
    /// Name used for install directories and error messages
    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::Solc => "solc",
            ToolKind::Ganache => "ganache-cli",
            ToolKind::EthLint => "ethlint",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a tool's distribution artifact is obtained and laid out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Distribution {
    /// A single executable downloaded from a release URL; `{version}` in the
    /// template is substituted with the requested version
    BinaryDownload { url_template: &'static str },
    /// An npm package installed into the tool directory; the executable ends
    /// up under `node_modules/.bin`
    NpmPackage { package: &'static str, bin: &'static str },
}

/// Identity of one provisionable tool at one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub kind: ToolKind,
    pub version: String,
    pub distribution: Distribution,
}

impl ToolSpec {
    pub fn new(kind: ToolKind, version: impl Into<String>, distribution: Distribution) -> Self {
        ToolSpec { kind, version: version.into(), distribution }
    }

    /// Directory under the install root holding this (tool, version)
    pub fn install_dir_name(&self) -> String {
        format!("{}-{}", self.kind.name(), self.version)
    }

    /// Path of the executable relative to the install directory
    pub fn executable_rel_path(&self) -> PathBuf {
        match &self.distribution {
            Distribution::BinaryDownload { .. } => Path::new("bin").join(self.kind.name()),
            Distribution::NpmPackage { bin, .. } => {
                Path::new("node_modules").join(".bin").join(bin)
            }
        }
    }

    /// Fully substituted download URL, for binary distributions
    pub fn download_url(&self) -> Option<String> {
        match &self.distribution {
            Distribution::BinaryDownload { url_template } => {
                Some(url_template.replace("{version}", &self.version))
            }
            Distribution::NpmPackage { .. } => None,
        }
    }
}

/// Catalog entry for a tool at the requested version
pub fn spec_for(kind: ToolKind, version: &str) -> ToolSpec {
    let distribution = match kind {
        ToolKind::Solc => Distribution::BinaryDownload {
            url_template:
                "https://github.com/ethereum/solidity/releases/download/v{version}/solc-static-linux",
        },
        ToolKind::Ganache => Distribution::NpmPackage { package: "ganache-cli", bin: "ganache-cli" },
        ToolKind::EthLint => Distribution::NpmPackage { package: "ethlint", bin: "solium" },
    };
    ToolSpec::new(kind, version, distribution)
}

/// A tool resolved on disk, ready to be executed
#[derive(Debug, Clone)]
pub struct InstalledTool {
    pub kind: ToolKind,
    pub version: String,
    /// Install directory for this (tool, version)
    pub home: PathBuf,
    /// Absolute path of the resolved executable
    pub executable: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_every_tool() {
        let solc = spec_for(ToolKind::Solc, "0.5.2");
        assert_eq!(solc.install_dir_name(), "solc-0.5.2");
        assert_eq!(
            solc.download_url().unwrap(),
            "https://github.com/ethereum/solidity/releases/download/v0.5.2/solc-static-linux"
        );
        assert_eq!(solc.executable_rel_path(), Path::new("bin").join("solc"));

        let ganache = spec_for(ToolKind::Ganache, "6.4.1");
        assert_eq!(ganache.install_dir_name(), "ganache-cli-6.4.1");
        assert!(ganache.download_url().is_none());
        assert!(ganache.executable_rel_path().ends_with("ganache-cli"));

        let ethlint = spec_for(ToolKind::EthLint, "1.2.4");
        // ethlint ships its executable under the historical solium name
        assert!(ethlint.executable_rel_path().ends_with("solium"));
    }
}
