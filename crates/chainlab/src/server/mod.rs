//! Supervision of the chain-simulator child process.
//!
//! The simulator is modeled as an explicit state machine rather than a
//! fire-and-forget subprocess, so readiness, crash and shutdown are
//! observable transitions. Ports claimed by live servers are tracked in a
//! process-wide set that feeds the allocator's exclude list; the port probe
//! is released before the child binds, so an early child exit during startup
//! is treated as a lost bind race and retried on a fresh port.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{parse_account, Config};
use crate::errors::{Result, SetupError};
use crate::ports::{self, PortRange};
use crate::tools::InstalledTool;

lazy_static! {
    /// Ports owned by live servers in this process; fed to the allocator as
    /// its exclude set so sibling handles never double-bind.
    static ref CLAIMED_PORTS: Mutex<BTreeSet<u16>> = Mutex::new(BTreeSet::new());

    /// Every server currently running in this process, keyed by pid
    static ref LIVE_SERVERS: Mutex<HashMap<u32, ServerInfo>> = Mutex::new(HashMap::new());
}

const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifecycle of one supervised server process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Ready,
    Stopping,
    Stopped,
    Errored,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerState::NotStarted => "not started",
            ServerState::Starting => "starting",
            ServerState::Ready => "ready",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Identity of a running server, as recorded in the live table
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub pid: u32,
    pub port: u16,
    pub endpoint: String,
}

/// Startup parameters for a supervised server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port_range: PortRange,
    /// (private key, wei balance) pairs created at genesis
    pub accounts: Vec<(String, u128)>,
    /// Automatic mining interval in seconds; one block per transaction if unset
    pub block_time: Option<f64>,
    pub gas_price: u64,
    pub gas_limit: u64,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
    pub stop_timeout: Duration,
    /// Respawn attempts when the child loses the port-bind race
    pub port_retry_budget: u32,
}

impl ServerOptions {
    pub fn new(host: impl Into<String>, port_range: PortRange) -> Self {
        ServerOptions {
            host: host.into(),
            port_range,
            accounts: Vec::new(),
            block_time: None,
            gas_price: crate::config::DEFAULT_GAS_PRICE,
            gas_limit: crate::config::DEFAULT_GAS_LIMIT,
            ready_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(15),
            port_retry_budget: 3,
        }
    }

    /// Build options from a validated configuration object
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut options = ServerOptions::new(&config.server.host, config.testing.port_range()?);
        options.accounts = config
            .server
            .accounts
            .iter()
            .map(|entry| parse_account(entry))
            .collect::<Result<Vec<_>>>()?;
        options.block_time = config.server.block_time;
        options.gas_price = config.server.gas_price;
        options.gas_limit = config.server.gas_limit;
        Ok(options)
    }
}

/// Handle to one supervised simulator process. Exclusively owned; the child
/// is terminated exactly once, by `stop` or by drop.
pub struct ChainServer {
    executable: PathBuf,
    options: ServerOptions,
    state: ServerState,
    child: Option<Child>,
    port: Option<u16>,
}

impl ChainServer {
    pub fn new(tool: &InstalledTool, options: ServerOptions) -> Self {
        ChainServer {
            executable: tool.executable.clone(),
            options,
            state: ServerState::NotStarted,
            child: None,
            port: None,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn endpoint(&self) -> Option<String> {
        self.port.map(|p| format!("http://{}:{}", self.options.host, p))
    }

    /// Spawn the simulator and wait until it accepts connections.
    ///
    /// A child that exits while we are polling lost the race for its port to
    /// another process; it is respawned on a freshly allocated port until the
    /// retry budget runs out.
    pub fn start(&mut self) -> Result<()> {
        if self.state != ServerState::NotStarted {
            return Err(SetupError::InvalidState {
                operation: "start",
                state: self.state.to_string(),
            });
        }
        if !self.executable.is_file() {
            return Err(SetupError::ToolInstallCorrupt {
                name: self.executable.display().to_string(),
                version: String::new(),
                path: self.executable.clone(),
            });
        }

        self.state = ServerState::Starting;
        let mut last_port = self.options.port_range.lo();
        for attempt in 0..=self.options.port_retry_budget {
            let port = match claim_port(self.options.port_range) {
                Ok(port) => port,
                Err(e) => {
                    self.state = ServerState::Errored;
                    return Err(e);
                }
            };
            last_port = port;
            tracing::info!(port, attempt, executable = %self.executable.display(), "starting chain server");

            let mut child = match self.spawn_on(port) {
                Ok(child) => child,
                Err(e) => {
                    release_port(port);
                    self.state = ServerState::Errored;
                    return Err(e);
                }
            };

            match self.poll_ready(&mut child, port) {
                PollOutcome::Ready => {
                    let pid = child.id();
                    self.child = Some(child);
                    self.port = Some(port);
                    self.state = ServerState::Ready;
                    register_server(ServerInfo {
                        pid,
                        port,
                        endpoint: self.endpoint().expect("port is set"),
                    });
                    tracing::info!(port, pid, "chain server ready");
                    return Ok(());
                }
                PollOutcome::EarlyExit => {
                    // lost the bind race (or the binary is broken); retry
                    release_port(port);
                    tracing::warn!(port, attempt, "chain server exited during startup, retrying");
                }
                PollOutcome::TimedOut => {
                    let _ = child.kill();
                    let _ = child.wait();
                    release_port(port);
                    self.state = ServerState::Errored;
                    return Err(SetupError::ServerStartTimeout {
                        port,
                        timeout: self.options.ready_timeout,
                    });
                }
            }
        }

        self.state = ServerState::Errored;
        Err(SetupError::ServerStartTimeout {
            port: last_port,
            timeout: self.options.ready_timeout,
        })
    }

    /// Terminate the child, politely first, forcefully if it does not exit
    /// within the stop timeout. Always ends in `Stopped`; a second call is a
    /// no-op.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            ServerState::Stopped => return Ok(()),
            ServerState::NotStarted => {
                self.state = ServerState::Stopped;
                return Ok(());
            }
            _ => {}
        }
        self.state = ServerState::Stopping;

        if let Some(mut child) = self.child.take() {
            let pid = child.id();
            tracing::info!(pid, "stopping chain server");
            terminate(&child);
            let deadline = Instant::now() + self.options.stop_timeout;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        tracing::debug!(pid, %status, "chain server exited");
                        break;
                    }
                    Ok(None) if Instant::now() < deadline => {
                        thread::sleep(self.options.poll_interval)
                    }
                    _ => {
                        // unresponsive, escalate
                        tracing::warn!(pid, "chain server did not exit in time, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        break;
                    }
                }
            }
            deregister_server(pid);
        }
        if let Some(port) = self.port.take() {
            release_port(port);
        }
        self.state = ServerState::Stopped;
        Ok(())
    }

    /// Whether the child process is still running
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Fail with `ServerCrashed` if the process died underneath a ready
    /// handle. The handle transitions to `Errored` and must not be used for
    /// further calls.
    pub fn ensure_alive(&mut self) -> Result<()> {
        if self.state == ServerState::Ready && !self.is_alive() {
            let endpoint = self.endpoint().unwrap_or_default();
            self.state = ServerState::Errored;
            if let Some(child) = self.child.take() {
                deregister_server(child.id());
            }
            if let Some(port) = self.port.take() {
                release_port(port);
            }
            return Err(SetupError::ServerCrashed { endpoint });
        }
        Ok(())
    }

    fn spawn_on(&self, port: u16) -> Result<Child> {
        let child = Command::new(&self.executable)
            .args(self.command_args(port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(child)
    }

    /// ganache-cli style startup arguments
    fn command_args(&self, port: u16) -> Vec<String> {
        let mut args = vec![
            "--host".into(),
            self.options.host.clone(),
            "--port".into(),
            port.to_string(),
            "--noVMErrorsOnRPCResponse".into(),
        ];
        if let Some(block_time) = self.options.block_time {
            args.push("--blockTime".into());
            args.push(block_time.to_string());
        }
        args.push("--gasPrice".into());
        args.push(self.options.gas_price.to_string());
        args.push("--gasLimit".into());
        args.push(self.options.gas_limit.to_string());
        for (key, balance) in &self.options.accounts {
            args.push(format!("--account={key},{balance}"));
        }
        args
    }

    fn poll_ready(&self, child: &mut Child, port: u16) -> PollOutcome {
        let deadline = Instant::now() + self.options.ready_timeout;
        loop {
            if probe(&self.options.host, port) {
                return PollOutcome::Ready;
            }
            if let Ok(Some(_)) = child.try_wait() {
                return PollOutcome::EarlyExit;
            }
            if Instant::now() >= deadline {
                return PollOutcome::TimedOut;
            }
            thread::sleep(self.options.poll_interval);
        }
    }
}

impl Drop for ChainServer {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            deregister_server(child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(port) = self.port.take() {
            release_port(port);
        }
    }
}

enum PollOutcome {
    Ready,
    EarlyExit,
    TimedOut,
}

/// Connection probe equivalent to `nc -z`. Hostnames are resolved, and every
/// resolved address is tried.
fn probe(host: &str, port: u16) -> bool {
    let connect_host = if host == "0.0.0.0" { "127.0.0.1" } else { host };
    let addrs = match (connect_host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return false,
    };
    addrs.into_iter().any(|addr| TcpStream::connect_timeout(&addr, CONNECT_PROBE_TIMEOUT).is_ok())
}

fn claim_port(range: PortRange) -> Result<u16> {
    let mut claimed = CLAIMED_PORTS.lock().expect("port set lock");
    let port = ports::allocate(range, &claimed)?;
    claimed.insert(port);
    Ok(port)
}

fn release_port(port: u16) {
    let mut claimed = CLAIMED_PORTS.lock().expect("port set lock");
    claimed.remove(&port);
}

fn register_server(info: ServerInfo) {
    let mut servers = LIVE_SERVERS.lock().expect("server table lock");
    servers.insert(info.pid, info);
}

fn deregister_server(pid: u32) {
    let mut servers = LIVE_SERVERS.lock().expect("server table lock");
    servers.remove(&pid);
}

/// Servers currently running in this process
pub fn running_servers() -> Vec<ServerInfo> {
    let servers = LIVE_SERVERS.lock().expect("server table lock");
    servers.values().cloned().collect()
}

/// Forcibly kill every server this process started. Safety net for test
/// harness teardown; normal shutdown goes through `ChainServer::stop`.
#[cfg(unix)]
pub fn kill_all_servers() {
    for info in running_servers() {
        tracing::warn!(pid = info.pid, port = info.port, "force-killing leftover server");
        let _ = Command::new("kill").args(["-KILL", &info.pid.to_string()]).output();
        deregister_server(info.pid);
        release_port(info.port);
    }
}

/// Polite termination, SIGTERM on unix
#[cfg(unix)]
fn terminate(child: &Child) {
    let _ = Command::new("kill").args(["-TERM", &child.id().to_string()]).output();
}

#[cfg(not(unix))]
fn terminate(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{InstalledTool, ToolKind};

    fn fake_tool(executable: &str) -> InstalledTool {
        InstalledTool {
            kind: ToolKind::Ganache,
            version: "6.4.1".into(),
            home: "/tmp".into(),
            executable: executable.into(),
        }
    }

    fn options() -> ServerOptions {
        let range = PortRange::new(18600, 18700).unwrap();
        ServerOptions::new("127.0.0.1", range)
    }

    #[test]
    fn command_args_follow_ganache_wire() {
        let mut opts = options();
        opts.accounts = vec![("0xabc".into(), 100_000_000_000_000_000_000u128)];
        opts.block_time = Some(1.5);
        let server = ChainServer::new(&fake_tool("/bin/true"), opts);
        let args = server.command_args(8601);
        assert_eq!(
            args,
            vec![
                "--host",
                "127.0.0.1",
                "--port",
                "8601",
                "--noVMErrorsOnRPCResponse",
                "--blockTime",
                "1.5",
                "--gasPrice",
                "20000000000",
                "--gasLimit",
                "6721975",
                "--account=0xabc,100000000000000000000",
            ]
        );
    }

    #[test]
    fn block_time_omitted_means_instamine() {
        let server = ChainServer::new(&fake_tool("/bin/true"), options());
        let args = server.command_args(8601);
        assert!(!args.iter().any(|a| a == "--blockTime"));
    }

    #[test]
    fn stop_before_start_is_a_noop() {
        let mut server = ChainServer::new(&fake_tool("/bin/true"), options());
        assert_eq!(server.state(), ServerState::NotStarted);
        server.stop().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        // idempotent
        server.stop().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut server = ChainServer::new(&fake_tool("/bin/true"), options());
        server.stop().unwrap();
        let err = server.start().unwrap_err();
        assert!(matches!(err, SetupError::InvalidState { operation: "start", .. }));
    }

    #[test]
    fn missing_executable_is_reported_as_corrupt_tool() {
        let mut server = ChainServer::new(&fake_tool("/nonexistent/ganache-cli"), options());
        let err = server.start().unwrap_err();
        assert!(matches!(err, SetupError::ToolInstallCorrupt { .. }));
    }
}
