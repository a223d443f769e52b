//! Sequential case playback.

use crate::case::{CaseReport, CompiledCase};
use crate::client::{DirectClient, HttpClient, ProxyProtocolClient};
use crate::config::RunConfig;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Totals for one playback run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub failed: usize,
    pub total: usize,
    pub elapsed: Duration,
    pub reports: Vec<CaseReport>,
}

impl RunSummary {
    pub fn passed(&self) -> bool {
        self.failed == 0
    }
}

/// Pick the client for the whole run.
pub fn build_client(config: &RunConfig) -> Box<dyn HttpClient> {
    if config.pp_enable {
        info!(
            "Using proxy protocol client: client={} server={}",
            config.cli_addr, config.vm_host_addr
        );
        Box::new(ProxyProtocolClient::new(config.cli_addr, config.vm_host_addr))
    } else {
        Box::new(DirectClient::new())
    }
}

/// Plays cases one after another against a single target with one client.
///
/// Cases run strictly in order: a case may rely on side effects of an earlier
/// one, and the client's timeout is changed by each case.
pub struct CaseRunner {
    client: Box<dyn HttpClient>,
    target: String,
}

impl CaseRunner {
    pub fn new(client: Box<dyn HttpClient>, target: impl Into<String>) -> Self {
        Self {
            client,
            target: target.into(),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(build_client(config), config.addr.clone())
    }

    pub async fn run(&mut self, cases: &[CompiledCase]) -> RunSummary {
        let start = Instant::now();
        let mut reports = Vec::with_capacity(cases.len());

        for case in cases {
            reports.push(case.play(self.client.as_mut(), &self.target).await);
        }

        let summary = RunSummary {
            failed: reports.iter().filter(|r| !r.passed()).count(),
            total: reports.len(),
            elapsed: start.elapsed(),
            reports,
        };

        info!(
            "Failed={}, Cases={}, {:?}",
            summary.failed, summary.total, summary.elapsed
        );
        if summary.passed() {
            info!("Result: PASS");
        } else {
            warn!("Result: FAIL");
        }

        summary
    }
}
