//! vigil — run health checks from the command line.
//!
//! # Usage
//!
//! ```text
//! vigil check --config profiles.toml --profile default --service api.toml
//! vigil profiles --config profiles.toml
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// Log filter used when `RUST_LOG` is unset. Targets match by prefix, so
/// `vigil` covers every `vigil_*` crate.
const DEFAULT_LOG_FILTER: &str = "info,vigil=debug";

#[derive(Parser)]
#[command(
    name = "vigil",
    about = "Vigil — cascading service health checks",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check one service and print the result as JSON.
    ///
    /// Exits 0 when the service is healthy, degraded or starting, 1 otherwise.
    Check {
        /// Profile file (default settings when omitted).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Profile to use from the config file.
        #[arg(short, long, default_value = vigil_core::DEFAULT_PROFILE)]
        profile: String,
        /// Service description (TOML).
        #[arg(short, long)]
        service: PathBuf,
        /// Check this many times in a row, sharing breaker and cache state.
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
        /// Print Prometheus metrics to stderr afterwards.
        #[arg(long)]
        metrics: bool,
    },
    /// List the profiles defined in a config file.
    Profiles {
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    match cli.command {
        Commands::Check {
            config,
            profile,
            service,
            count,
            metrics,
        } => {
            let healthy = commands::check::run(commands::check::CheckArgs {
                config,
                profile,
                service,
                count,
                metrics,
            })
            .await?;
            if !healthy {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Profiles { config } => commands::profiles::list(&config),
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn default_filter_shows_engine_debug_logs() {
        let filter = tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).unwrap();
        let subscriber = tracing_subscriber::registry().with(filter);
        tracing::subscriber::with_default(subscriber, || {
            assert!(tracing::enabled!(target: "vigil_health::cascade", Level::DEBUG));
            assert!(tracing::enabled!(target: "vigil_core::config", Level::DEBUG));
            assert!(tracing::enabled!(target: "vigil", Level::DEBUG));
            assert!(!tracing::enabled!(target: "hyper_util::client", Level::DEBUG));
        });
    }
}
