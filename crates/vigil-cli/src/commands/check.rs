use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use vigil_core::{CheckerConfig, HealthStatus, ProfileSet, ServiceInfo};
use vigil_health::HealthChecker;
use vigil_metrics::MetricsCollector;

pub struct CheckArgs {
    pub config: Option<PathBuf>,
    pub profile: String,
    pub service: PathBuf,
    pub count: u32,
    pub metrics: bool,
}

/// Run the checks; returns whether the last result counts as passing.
pub async fn run(args: CheckArgs) -> anyhow::Result<bool> {
    let config = load_config(args.config.as_deref(), &args.profile)?;
    let service = load_service(&args.service)?;

    let collector = MetricsCollector::new();
    let checker = HealthChecker::with_metrics(config, Arc::new(collector.clone()))
        .context("failed to build health checker")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling health check");
            on_signal.cancel();
        }
    });

    let mut passing = false;
    for _ in 0..args.count.max(1) {
        let result = checker.check_service(&cancel, &service).await;
        info!(service = %service.name, status = %result.status, "check complete");
        println!("{}", serde_json::to_string_pretty(&result)?);
        passing = is_passing(result.status);
        if cancel.is_cancelled() {
            break;
        }
    }

    if args.metrics {
        eprint!("{}", collector.render_prometheus());
    }
    Ok(passing)
}

fn is_passing(status: HealthStatus) -> bool {
    matches!(
        status,
        HealthStatus::Healthy | HealthStatus::Degraded | HealthStatus::Starting
    )
}

fn load_config(path: Option<&Path>, profile: &str) -> anyhow::Result<CheckerConfig> {
    match path {
        Some(path) => Ok(ProfileSet::from_file(path)?.profile(profile)?),
        None => Ok(ProfileSet::default().profile(profile)?),
    }
}

fn load_service(path: &Path) -> anyhow::Result<ServiceInfo> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read service file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse service file {}", path.display()))
}
