use anyhow::Context;
use casecat::case::{example_document, load_cases};
use casecat::config::{wants_example_case, Mode, RunConfig};
use casecat::error::ConfigError;
use casecat::relay::ProxyRelay;
use casecat::runner::CaseRunner;
use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Replay HTTP test cases, or relay TCP with a PROXY protocol header.
#[derive(Parser, Debug)]
#[command(name = "casecat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target host:port (server under test, or relay upstream)
    #[arg(long, env = "CASECAT_ADDR", default_value = "")]
    addr: String,

    /// Server address announced in PROXY headers (IP or IP:port)
    #[arg(
        long,
        alias = "vmHostAddr",
        env = "CASECAT_VM_HOST_ADDR",
        default_value = "127.0.0.1"
    )]
    vm_host_addr: String,

    /// Client IP announced in PROXY headers
    #[arg(
        long,
        alias = "cliAddr",
        env = "CASECAT_CLI_ADDR",
        default_value = "127.0.0.1"
    )]
    cli_addr: String,

    /// Case file path; "help" prints an example case file
    #[arg(long, env = "CASECAT_CASE", default_value = "./case.json")]
    case: PathBuf,

    /// Listen address; runs as a relay when set (e.g. ":8080")
    #[arg(long, alias = "proxyAddr", env = "CASECAT_PROXY_ADDR")]
    proxy_addr: Option<String>,

    /// Send a PROXY protocol header on every connection
    #[arg(
        long = "pp-enable",
        alias = "PPEnable",
        env = "CASECAT_PP_ENABLE",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pp_enable: bool,

    /// Log output format
    #[arg(long, value_enum, env = "CASECAT_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_example_case() -> anyhow::Result<ExitCode> {
    let document = example_document().context("Failed to render example case")?;
    println!("$ cat case.json");
    println!("{document}");
    Ok(ExitCode::SUCCESS)
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    if wants_example_case(&args.addr, &args.case) {
        return print_example_case();
    }

    let config = RunConfig::new(
        &args.addr,
        &args.vm_host_addr,
        &args.cli_addr,
        args.case,
        args.proxy_addr.as_deref(),
        args.pp_enable,
    )?;

    let mode = match config.mode() {
        Ok(mode) => mode,
        Err(ConfigError::MissingAddr) => {
            error!("{}", ConfigError::MissingAddr);
            return Ok(ExitCode::SUCCESS);
        }
        Err(e) => return Err(e.into()),
    };

    match mode {
        Mode::ExampleCase => print_example_case(),
        Mode::Relay(relay_config) => {
            let relay = ProxyRelay::bind(relay_config).await?;
            relay.serve().await;
            Ok(ExitCode::SUCCESS)
        }
        Mode::Playback => {
            let cases = load_cases(&config.case_path)?;
            info!(
                "Loaded {} cases from {}",
                cases.len(),
                config.case_path.display()
            );

            let summary = CaseRunner::from_config(&config).run(&cases).await;
            Ok(if summary.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
