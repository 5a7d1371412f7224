use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::{LogFormat, LoggingConfig};
use gatekeeper::{AdmissionLimiter, GatekeeperConfig, Policy, WindowStore};

/// Sliding-window admission control toolkit.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured log format
    #[arg(long, global = true, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective named policies
    Presets,
    /// Replay a burst of requests for one key and print every decision
    Simulate(SimulateArgs),
}

#[derive(Debug, Args)]
struct SimulateArgs {
    /// Key to throttle, e.g. an address or `password-reset:<email>`
    #[arg(long, default_value = "127.0.0.1")]
    key: String,

    /// Named policy to apply
    #[arg(long, default_value = "auth", conflicts_with_all = ["window_ms", "max_requests"])]
    policy: String,

    /// Custom policy window in milliseconds
    #[arg(long, requires = "max_requests")]
    window_ms: Option<u64>,

    /// Custom policy request limit
    #[arg(long, requires = "window_ms")]
    max_requests: Option<u32>,

    /// Number of requests to send
    #[arg(long, default_value_t = 10)]
    requests: u32,

    /// Delay between requests in milliseconds
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format `{other}` (expected text or json)")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GatekeeperConfig::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    init_tracing(&config.logging);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Presets => print_presets(&config),
        Command::Simulate(args) => simulate(&config, args).await,
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the config.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_presets(config: &GatekeeperConfig) -> anyhow::Result<()> {
    let policies = config.policy_set()?;

    println!("{:<20} {:>12} {:>8}  MESSAGE", "POLICY", "WINDOW", "LIMIT");
    for (name, policy) in policies.iter() {
        println!(
            "{:<20} {:>12} {:>8}  {}",
            name,
            format_window(policy.window()),
            policy.max_requests(),
            policy.message().unwrap_or("-")
        );
    }
    Ok(())
}

fn format_window(window: Duration) -> String {
    let ms = window.as_millis();
    if ms % 60_000 == 0 {
        format!("{}m", ms / 60_000)
    } else if ms % 1_000 == 0 {
        format!("{}s", ms / 1_000)
    } else {
        format!("{ms}ms")
    }
}

async fn simulate(config: &GatekeeperConfig, args: SimulateArgs) -> anyhow::Result<()> {
    let store = Arc::new(WindowStore::new());
    let limiter = AdmissionLimiter::with_store(store, config.policy_set()?);

    let policy = match (args.window_ms, args.max_requests) {
        (Some(window_ms), Some(max_requests)) => {
            Policy::try_new(Duration::from_millis(window_ms), max_requests)?
        }
        _ => limiter.policy(&args.policy)?,
    };

    info!(
        key = %args.key,
        window_ms = policy.window_ms(),
        max_requests = policy.max_requests(),
        requests = args.requests,
        "Starting simulation"
    );

    let sweeper = config
        .sweeper
        .enabled
        .then(|| limiter.start_sweeper(config.sweeper.settings()));

    let run = async {
        for seq in 1..=args.requests {
            let decision = limiter.check(&args.key, &policy);
            let line = serde_json::json!({
                "seq": seq,
                "key": args.key,
                "decision": decision,
                "reset_at": decision.reset_at().to_rfc3339(),
            });
            println!("{line}");

            if seq < args.requests {
                tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
            }
        }
    };

    tokio::select! {
        _ = run => {}
        _ = shutdown_signal() => {
            warn!("Simulation interrupted");
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    info!(tracked_keys = limiter.size(), "Simulation finished");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_custom_simulation() {
        let cli = Cli::try_parse_from([
            "gatekeeper",
            "simulate",
            "--key",
            "login:alice",
            "--window-ms",
            "1000",
            "--max-requests",
            "3",
            "--requests",
            "5",
        ])
        .unwrap();

        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.key, "login:alice");
        assert_eq!(args.window_ms, Some(1_000));
        assert_eq!(args.max_requests, Some(3));
        assert_eq!(args.requests, 5);
    }

    #[test]
    fn test_cli_rejects_half_custom_policy() {
        assert!(Cli::try_parse_from(["gatekeeper", "simulate", "--window-ms", "1000"]).is_err());
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("json").unwrap(), LogFormat::Json);
        assert!(parse_log_format("xml").is_err());
    }

    #[test]
    fn test_format_window() {
        assert_eq!(format_window(Duration::from_secs(900)), "15m");
        assert_eq!(format_window(Duration::from_secs(90)), "90s");
        assert_eq!(format_window(Duration::from_millis(1_500)), "1500ms");
    }
}
