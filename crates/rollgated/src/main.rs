//! rollgated — the Rollgate daemon.
//!
//! Loads a rollout plan from a TOML file, wires the HTTP collaborators
//! (Prometheus-compatible collector, traffic gateway admin API), and
//! drives the rollout to a terminal status. Ctrl-C aborts the rollout
//! and reverts traffic if any weight was applied.
//!
//! # Usage
//!
//! ```text
//! rollgated run --plan rollout.toml \
//!     --collector 127.0.0.1:9090 \
//!     --gateway 127.0.0.1:8081 \
//!     --query 'error_rate=sum(rate(http_requests_total{code=~"5.."}[1m]))'
//! rollgated validate --plan rollout.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use rollgate_controller::{
    ControllerSettings, EventSink, RolloutController, RolloutManager, RolloutEvent, RolloutStatus,
    TracingSink,
};
use rollgate_evaluator::Aggregation;
use rollgate_http::{GatewayClient, PromMetricsSource};
use rollgate_plan::PlanConfig;

#[derive(Parser)]
#[command(name = "rollgated", about = "Rollgate rollout daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a rollout from a plan file to completion or rollback.
    Run {
        /// Path to the rollout plan (TOML).
        #[arg(long)]
        plan: PathBuf,

        /// Prometheus-compatible collector address (host:port).
        #[arg(long, default_value = "127.0.0.1:9090")]
        collector: String,

        /// Traffic gateway admin address (host:port).
        #[arg(long, default_value = "127.0.0.1:8081")]
        gateway: String,

        /// PromQL query per metric, as metric=expr. Repeatable.
        /// Metrics without a mapping are queried by name.
        #[arg(long)]
        query: Vec<String>,

        /// Emit rollout events as JSON lines on stdout instead of logs.
        #[arg(long)]
        events_json: bool,
    },

    /// Validate a plan file and print its stages.
    Validate {
        /// Path to the rollout plan (TOML).
        #[arg(long)]
        plan: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rollgated=debug,rollgate=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            plan,
            collector,
            gateway,
            query,
            events_json,
        } => run(plan, collector, gateway, query, events_json).await,
        Command::Validate { plan } => validate(plan),
    }
}

async fn run(
    plan_path: PathBuf,
    collector: String,
    gateway: String,
    queries: Vec<String>,
    events_json: bool,
) -> anyhow::Result<()> {
    let config = PlanConfig::from_file(&plan_path)
        .with_context(|| format!("reading plan {}", plan_path.display()))?;
    let plan = config.to_plan().context("invalid rollout plan")?;
    let target = config.target.clone();

    let aggregation: Aggregation = config
        .aggregation
        .as_deref()
        .unwrap_or("most_recent")
        .parse()
        .map_err(anyhow::Error::msg)?;
    let settings = ControllerSettings {
        window: config.window(),
        tick_timeout: config.tick_timeout(),
        aggregation,
    };

    let mut source = PromMetricsSource::new(&collector, settings.tick_timeout);
    for mapping in &queries {
        let (metric, expr) = mapping
            .split_once('=')
            .with_context(|| format!("--query must be metric=expr, got {mapping:?}"))?;
        source = source.with_query(metric, expr);
    }

    let gateway = Arc::new(GatewayClient::new(&gateway, settings.tick_timeout));
    let sink: Arc<dyn EventSink> = if events_json {
        Arc::new(JsonLineSink)
    } else {
        Arc::new(TracingSink)
    };

    let controller = RolloutController::new(
        &target,
        plan,
        settings,
        Arc::new(source),
        gateway.clone(),
        gateway,
        sink,
    );
    let mut status_rx = controller.subscribe();

    let manager = RolloutManager::new();
    manager
        .launch(controller, config.tick_interval())
        .await
        .context("launching rollout")?;
    info!(%target, "rollout launched");

    let final_status = loop {
        tokio::select! {
            changed = status_rx.changed() => {
                if changed.is_err() {
                    // Loop finished and dropped the controller; the
                    // receiver still holds the last snapshot.
                    break status_rx.borrow().status;
                }
                let state = status_rx.borrow().clone();
                if state.status.is_terminal() {
                    break state.status;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!(%target, "interrupt received — aborting rollout");
                manager.abort(&target).await;
            }
        }
    };
    manager.shutdown_all().await;

    match final_status {
        RolloutStatus::Succeeded => {
            info!(%target, "rollout succeeded");
            Ok(())
        }
        other => anyhow::bail!("rollout for {target} finished with status {other:?}"),
    }
}

fn validate(plan_path: PathBuf) -> anyhow::Result<()> {
    let config = PlanConfig::from_file(&plan_path)
        .with_context(|| format!("reading plan {}", plan_path.display()))?;
    let plan = config.to_plan().context("invalid rollout plan")?;

    info!(
        target = %config.target,
        stages = plan.stage_count(),
        max_failures = plan.max_failures(),
        "plan is valid"
    );
    for index in 0..plan.stage_count() {
        if let Some(stage) = plan.stage_at(index) {
            info!(
                stage = index,
                weight = stage.target_weight,
                hold_secs = stage.hold.as_secs(),
                "stage"
            );
        }
    }
    Ok(())
}

/// Event sink that prints each event as one JSON line on stdout.
struct JsonLineSink;

impl EventSink for JsonLineSink {
    fn publish(&self, event: RolloutEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            println!("{line}");
        }
    }
}
