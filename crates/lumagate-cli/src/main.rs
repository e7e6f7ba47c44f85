//! Command-line interface for the Lumagate light gateway.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use lumagate_core::config::env_vars;
use lumagate_core::{GatewayConfig, PowerState, Rgb};
use lumagate_devices::{LightService, SimulatedUpstream};

/// Lumagate - resilient smart-light gateway.
///
/// Runs against an in-memory simulated fleet; state does not persist between
/// invocations.
#[derive(Parser, Debug)]
#[command(name = "lumagate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Fraction of simulated upstream calls that fail with HTTP 503.
    #[arg(long, global = true, default_value_t = 0.0)]
    flaky: f64,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List every light.
    List,
    /// Show the state of one light.
    State {
        /// Light identifier.
        device: String,
    },
    /// Turn a light on or off.
    Power {
        device: String,
        /// on or off.
        state: PowerState,
    },
    /// Set brightness (0-100).
    Brightness { device: String, level: u8 },
    /// Set color as #rrggbb or r,g,b.
    Color { device: String, color: Rgb },
    /// Send several brightness levels at once to show coalescing.
    Burst {
        device: String,
        /// Levels sent concurrently, in order.
        #[arg(required = true)]
        levels: Vec<u8>,
    },
    /// Print the effective configuration.
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = GatewayConfig::load(args.config.as_deref()).with_context(|| match &args.config {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Invalid configuration".to_string(),
    })?;

    if let Command::Config = args.command {
        return print_json(&config);
    }

    let upstream = Arc::new(SimulatedUpstream::demo());
    upstream.set_failure_rate(args.flaky);
    let service = LightService::new(upstream, &config);
    let correlation_id = Uuid::new_v4().to_string();
    tracing::debug!(%correlation_id, command = ?args.command, "Running command");

    match args.command {
        Command::List => print_json(&service.list_devices(&correlation_id).await?),
        Command::State { device } => {
            print_json(&service.device_state(&device, &correlation_id).await?)
        }
        Command::Power { device, state } => {
            print_json(&service.set_power(&device, state, &correlation_id).await?)
        }
        Command::Brightness { device, level } => {
            print_json(&service.set_brightness(&device, level, &correlation_id).await?)
        }
        Command::Color { device, color } => {
            print_json(&service.set_color(&device, color, &correlation_id).await?)
        }
        Command::Burst { device, levels } => {
            run_burst(&service, &device, &levels, &correlation_id).await
        }
        Command::Config => Ok(()),
    }
}

/// Fire every level concurrently; requests within the coalesce window share
/// one upstream call.
async fn run_burst(
    service: &LightService,
    device: &str,
    levels: &[u8],
    correlation_id: &str,
) -> Result<()> {
    let requests = levels.iter().enumerate().map(|(index, level)| {
        let request_id = format!("{}-{}", correlation_id, index);
        async move { service.set_brightness(device, *level, &request_id).await }
    });

    let mut receipts = Vec::with_capacity(levels.len());
    for result in futures::future::join_all(requests).await {
        receipts.push(result?);
    }

    print_json(&serde_json::json!({
        "receipts": receipts,
        "queue": service.queue_stats(),
    }))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "lumagate=debug" } else { "lumagate=info" };

    // JSON output for log collectors
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}
