//! Per-session test context: tools resolved, server running, client bound,
//! artifacts loaded, baseline snapshot recorded.
//!
//! `open` completes fully before any test code runs; between test cases the
//! caller restores the baseline instead of restarting the server. `close`
//! must run on every exit path; `Drop` is the last resort so a panicking test
//! never leaks a child process.

use std::collections::HashMap;

use crate::artifacts::ArtifactSet;
use crate::client::{EthClient, SnapshotId};
use crate::config::Config;
use crate::errors::{Result, SetupError};
use crate::server::{ChainServer, ServerOptions};
use crate::tools::{installer, spec_for, InstalledTool, ToolKind};

pub struct TestContext {
    /// Owned server; `None` when attached to an external endpoint
    server: Option<ChainServer>,
    client: EthClient,
    artifacts: ArtifactSet,
    baseline: SnapshotId,
    /// Issued ids mapped to the server id currently holding that state. The
    /// server consumes an id when reverting to it, so every restore records
    /// the state again and refreshes the entry; callers keep restoring the
    /// same id for as long as the server lives.
    snapshots: HashMap<String, SnapshotId>,
    installed: HashMap<ToolKind, InstalledTool>,
    closed: bool,
}

impl TestContext {
    /// Resolve tools, start (or attach to) a server, bind a client, load
    /// artifacts and record the baseline snapshot.
    ///
    /// Any failure here aborts the session before a single test runs; a
    /// partially started server is torn down by its own drop.
    pub fn open(config: &Config) -> Result<Self> {
        let root = &config.tools.directory;
        let mut installed = HashMap::new();
        for kind in &config.tools.required {
            let spec = spec_for(*kind, config.tools.version_for(*kind));
            installed.insert(*kind, installer::ensure(&spec, root)?);
        }

        let (server, client) = if config.testing.run_server {
            // the simulator is needed whether or not it was listed as required
            let tool = match installed.get(&ToolKind::Ganache) {
                Some(tool) => tool.clone(),
                None => {
                    let spec =
                        spec_for(ToolKind::Ganache, config.tools.version_for(ToolKind::Ganache));
                    let tool = installer::ensure(&spec, root)?;
                    installed.insert(ToolKind::Ganache, tool.clone());
                    tool
                }
            };
            let mut server = ChainServer::new(&tool, ServerOptions::from_config(config)?);
            server.start()?;
            let client = EthClient::bind(&server, config.client.gas_price, config.client.gas_limit)?;
            (Some(server), client)
        } else {
            tracing::info!(endpoint = %config.client.endpoint, "attaching to external server");
            let client =
                EthClient::attach(&config.client.endpoint, config.client.gas_price, config.client.gas_limit);
            (None, client)
        };

        let artifacts = ArtifactSet::load_dir(&config.project.object_dir)?;
        let baseline = client.snapshot()?;
        let mut snapshots = HashMap::new();
        snapshots.insert(baseline.as_str().to_string(), baseline.clone());
        tracing::info!(baseline = %baseline, "test context open");

        Ok(TestContext { server, client, artifacts, baseline, snapshots, installed, closed: false })
    }

    /// Record the current chain state
    pub fn snapshot(&mut self) -> Result<SnapshotId> {
        self.ensure_usable()?;
        let id = self.client.snapshot()?;
        self.snapshots.insert(id.as_str().to_string(), id.clone());
        Ok(id)
    }

    /// Restore the chain to a previously recorded snapshot.
    ///
    /// Reverting consumes the server-side id, so the restored state is
    /// recorded again under the caller's id; the same id stays restorable
    /// until the server dies or a restore rewinds past it.
    pub fn restore(&mut self, id: &SnapshotId) -> Result<()> {
        self.ensure_usable()?;
        let live = self.snapshots.get(id.as_str()).cloned().unwrap_or_else(|| id.clone());
        self.client.revert(&live)?;
        let fresh = self.client.snapshot()?;
        self.snapshots.insert(id.as_str().to_string(), fresh);
        Ok(())
    }

    /// Reset the chain to the state observed when the context opened.
    /// Callers can reset between every test case.
    pub fn restore_baseline(&mut self) -> Result<()> {
        let baseline = self.baseline.clone();
        self.restore(&baseline)
    }

    pub fn baseline(&self) -> &SnapshotId {
        &self.baseline
    }

    pub fn client(&self) -> &EthClient {
        &self.client
    }

    pub fn artifacts(&self) -> &ArtifactSet {
        &self.artifacts
    }

    pub fn installed_tool(&self, kind: ToolKind) -> Option<&InstalledTool> {
        self.installed.get(&kind)
    }

    pub fn server(&self) -> Option<&ChainServer> {
        self.server.as_ref()
    }

    /// Whether this context started (and therefore must stop) its server
    pub fn owns_server(&self) -> bool {
        self.server.is_some()
    }

    /// Stop the owned server, if any. Attached servers are left running.
    /// Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Some(mut server) = self.server.take() {
            server.stop()?;
        }
        tracing::info!("test context closed");
        Ok(())
    }

    /// A crashed server invalidates the whole context: no further snapshot,
    /// restore or client call may be issued against it.
    fn ensure_usable(&mut self) -> Result<()> {
        if self.closed {
            return Err(SetupError::InvalidState {
                operation: "use context",
                state: "closed".into(),
            });
        }
        if let Some(server) = self.server.as_mut() {
            server.ensure_alive()?;
        }
        Ok(())
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        // normal teardown goes through close(); this only catches leaks
        let _ = self.close();
    }
}
