#![deny(unsafe_code)]

//! dripgate CLI: run peer addresses through a configured admission controller.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dripgate_config::AppConfig;
use dripgate_core::{AdmissionControl, LimitError, SystemClock, Verdict};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// dripgate: token-bucket admission control for connections and requests.
#[derive(Parser)]
#[command(name = "dripgate", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "dripgate.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },

    /// Decide on one event per peer address, in order.
    ///
    /// Addresses are read from stdin, one per line, when none are given.
    /// A lone `-` stands for an event without a known peer.
    Check {
        /// Peer addresses, e.g. `192.0.2.1:5000`.
        addrs: Vec<String>,

        /// Print one JSON object per event.
        #[arg(long)]
        json: bool,
    },

    /// Block until the peer's host and the global limit both grant tokens.
    Wait {
        /// Peer address.
        addr: String,

        /// Tokens to take.
        #[arg(long, default_value_t = 1)]
        tokens: u32,

        /// Give up after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
        Commands::Check { addrs, json } => cmd_check(&config, addrs, json).await?,
        Commands::Wait {
            addr,
            tokens,
            timeout_ms,
        } => cmd_wait(&config, &addr, tokens, timeout_ms.map(Duration::from_millis)).await?,
    }

    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("failed to render config")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn cmd_check(config: &AppConfig, addrs: Vec<String>, json: bool) -> Result<()> {
    let control = build_control(config)?;

    let addrs = if addrs.is_empty() {
        read_stdin_lines().await?
    } else {
        addrs
    };

    let stdout = io::stdout();
    let summary = check_all(&control, &addrs, json, &mut stdout.lock())?;
    info!(
        admitted = summary.admitted,
        rejected = summary.rejected,
        tracked_hosts = control.hosts().len(),
        "Check finished"
    );
    Ok(())
}

async fn cmd_wait(
    config: &AppConfig,
    addr: &str,
    tokens: u32,
    timeout: Option<Duration>,
) -> Result<()> {
    let control = build_control(config)?;

    let started = std::time::Instant::now();
    match wait_for(&control, addr, tokens, timeout).await {
        Ok(()) => {
            println!("granted {tokens} after {:?}", started.elapsed());
            Ok(())
        }
        Err(LimitError::Cancelled) => {
            warn!(addr, tokens, "Timed out waiting for tokens");
            anyhow::bail!("timed out waiting for {tokens} tokens")
        }
        Err(e) => Err(e).context("cannot wait for tokens"),
    }
}

/// Wait on the host bucket, then on the global bucket, under one deadline.
///
/// Host tokens are taken before the global wait starts. If the deadline
/// passes during the global wait they stay spent, even though the call
/// reports [`LimitError::Cancelled`].
async fn wait_for(
    control: &AdmissionControl,
    addr: &str,
    tokens: u32,
    timeout: Option<Duration>,
) -> Result<(), LimitError> {
    let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
    control
        .hosts()
        .wait_until(addr, tokens, expire(deadline))
        .await?;
    control.global().wait_until(tokens, expire(deadline)).await
}

/// Completes at `deadline`, or never.
async fn expire(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn build_control(config: &AppConfig) -> Result<AdmissionControl> {
    AdmissionControl::from_config(config, Arc::new(SystemClock))
        .context("invalid limiter configuration")
}

async fn read_stdin_lines() -> Result<Vec<String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    Ok(out)
}

/// One line of `check --json` output.
#[derive(Debug, Serialize)]
struct CheckRecord<'a> {
    peer: Option<&'a str>,
    verdict: Verdict,
}

#[derive(Debug, Default, PartialEq)]
struct CheckSummary {
    admitted: usize,
    rejected: usize,
}

fn check_all<W: Write>(
    control: &AdmissionControl,
    addrs: &[String],
    json: bool,
    out: &mut W,
) -> Result<CheckSummary> {
    let mut summary = CheckSummary::default();

    for addr in addrs {
        let peer = (addr != "-").then_some(addr.as_str());
        let verdict = control.admit(peer);
        if verdict.is_admitted() {
            summary.admitted += 1;
        } else {
            summary.rejected += 1;
        }

        if json {
            serde_json::to_writer(&mut *out, &CheckRecord { peer, verdict })?;
            writeln!(out)?;
        } else {
            writeln!(out, "{addr}\t{verdict}")?;
        }
    }

    Ok(summary)
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load config from '{}'", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}
