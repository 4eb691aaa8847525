#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::uninlined_format_args)]

//! `mqcall`: send one message to a queue and optionally wait for its
//! correlated reply. The call's terminal outcome is printed as JSON on
//! stdout; logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use mqcall::broker::mqtt::MqttBroker;
use mqcall::{execute, CallRequest, Outcome};

#[derive(Parser)]
#[command(
    name = "mqcall",
    version,
    about = "Send one message to a queue and wait, bounded, for its correlated reply"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one call described by a TOML request file
    Send {
        /// Path to the request file (see templates/request.toml)
        #[arg(long)]
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mqcall=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Send { request } => {
            let raw = std::fs::read_to_string(&request)
                .with_context(|| format!("cannot read request file {}", request.display()))?;
            let call: CallRequest = toml::from_str(&raw)
                .with_context(|| format!("cannot parse request file {}", request.display()))?;
            call.validate()?;

            let outcome = execute(&MqttBroker, &call).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);

            Ok(match outcome {
                Outcome::Done { .. } => ExitCode::SUCCESS,
                Outcome::Timeout => ExitCode::from(2),
                Outcome::Error { .. } => ExitCode::FAILURE,
            })
        }
    }
}
