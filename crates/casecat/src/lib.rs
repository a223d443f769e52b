//! casecat: replay declarative HTTP test cases against a server, or relay TCP
//! connections with an injected PROXY protocol v1 header.

pub mod case;
pub mod client;
pub mod config;
pub mod error;
pub mod expectation;
pub mod matcher;
pub mod proxy_protocol;
pub mod relay;
pub mod request;
pub mod runner;

pub use case::{load_cases, CaseReport, CompiledCase, TestCase};
pub use client::{CaseResponse, DirectClient, HttpClient, ProxyProtocolClient};
pub use config::{Mode, RelayConfig, RunConfig};
pub use relay::ProxyRelay;
pub use runner::{CaseRunner, RunSummary};
