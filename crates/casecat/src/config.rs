//! Run-wide settings.
//!
//! Everything the runner and the relay need is gathered here once at startup
//! and handed to their constructors; nothing reads process-wide state later.

use crate::error::ConfigError;
use crate::proxy_protocol::ServerAddr;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `--case` value that prints an example case document instead of running.
pub const CASE_HELP: &str = "help";

/// How long the relay waits for the upstream connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Read deadline on relayed client connections, counted from accept.
pub const CLIENT_READ_DEADLINE: Duration = Duration::from_secs(10);

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Print the example case document.
    ExampleCase,
    /// Run the case file once.
    Playback,
    /// Relay connections forever.
    Relay(RelayConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Target `host:port`: the server under test, or the relay's upstream.
    pub addr: String,
    /// Server address announced in PROXY headers.
    pub vm_host_addr: ServerAddr,
    /// Client IP announced in PROXY headers.
    pub cli_addr: Ipv4Addr,
    pub case_path: PathBuf,
    /// Relay listen address; relay mode when set.
    pub proxy_addr: Option<String>,
    /// Send PROXY headers, in both modes.
    pub pp_enable: bool,
}

impl RunConfig {
    /// Validate raw settings. `addr` may be empty only when the example case
    /// document was requested.
    pub fn new(
        addr: &str,
        vm_host_addr: &str,
        cli_addr: &str,
        case_path: impl Into<PathBuf>,
        proxy_addr: Option<&str>,
        pp_enable: bool,
    ) -> Result<Self, ConfigError> {
        let vm_host_addr = vm_host_addr.parse::<ServerAddr>()?;
        let cli_addr = cli_addr.parse::<Ipv4Addr>().map_err(|e| {
            ConfigError::InvalidAddr("client addr", cli_addr.to_string(), e.to_string())
        })?;

        Ok(Self {
            addr: addr.to_string(),
            vm_host_addr,
            cli_addr,
            case_path: case_path.into(),
            proxy_addr: proxy_addr.filter(|a| !a.is_empty()).map(str::to_string),
            pp_enable,
        })
    }

    /// Decide the mode. A missing target address is only acceptable when
    /// asking for the example case document.
    pub fn mode(&self) -> Result<Mode, ConfigError> {
        if wants_example_case(&self.addr, &self.case_path) {
            return Ok(Mode::ExampleCase);
        }
        if self.addr.is_empty() {
            return Err(ConfigError::MissingAddr);
        }

        Ok(match &self.proxy_addr {
            Some(listen) => Mode::Relay(RelayConfig {
                listen_addr: normalize_listen_addr(listen),
                upstream: self.addr.clone(),
                client_ip: self.cli_addr,
                server: self.vm_host_addr,
                proxy_protocol: self.pp_enable,
                dial_timeout: DIAL_TIMEOUT,
                read_deadline: Some(CLIENT_READ_DEADLINE),
            }),
            None => Mode::Playback,
        })
    }
}

/// `--case help` without a target only prints the example case document, so
/// nothing else needs to be valid.
pub fn wants_example_case(addr: &str, case_path: &Path) -> bool {
    addr.is_empty() && case_path.as_os_str() == CASE_HELP
}

/// `:8080` means every interface.
fn normalize_listen_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Settings for relay mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub listen_addr: String,
    pub upstream: String,
    pub client_ip: Ipv4Addr,
    pub server: ServerAddr,
    pub proxy_protocol: bool,
    pub dial_timeout: Duration,
    /// Absolute deadline for client reads after accept; `None` disables it.
    pub read_deadline: Option<Duration>,
}
