//! Provisioning and supervision of the external tooling needed to develop
//! and test smart-contract code.
//!
//! The crate resolves required tool versions, installs them into a managed
//! directory, supervises a local chain-simulator process on a negotiated
//! port, and hands test code an isolated execution context with
//! snapshot/restore between cases:
//!
//! ```no_run
//! use chainlab::{Config, TestContext};
//!
//! # fn main() -> chainlab::Result<()> {
//! let config = Config::default();
//! let mut ctx = TestContext::open(&config)?;
//! let accounts = ctx.client().accounts()?;
//! // ... run a test case ...
//! ctx.restore_baseline()?;
//! // ... run the next one against a clean chain ...
//! ctx.close()?;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate lazy_static;

pub mod artifacts;
pub mod client;
pub mod config;
pub mod errors;
pub mod ports;
pub mod server;
pub mod tools;

mod context;

pub use artifacts::{ArtifactSet, ContractArtifact};
pub use client::{EthClient, SnapshotId};
pub use config::Config;
pub use context::TestContext;
pub use errors::{Result, SetupError};
pub use ports::PortRange;
pub use server::{ChainServer, ServerOptions, ServerState};
pub use tools::{InstalledTool, ToolKind, ToolSpec};
