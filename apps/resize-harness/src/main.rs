use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use frame_resizer::{ControllerConfig, ResizeOptionsPatch};
use tracing::info;

mod scenario;
mod telemetry;

#[derive(Debug, Clone)]
struct HarnessConfig {
    scenario: PathBuf,
    controller: ControllerConfig,
    settle: Duration,
}

#[derive(Debug, Parser)]
#[command(
    name = "resize-harness",
    author,
    version,
    about = "Replays iframe auto-resize scenarios and prints every applied resize"
)]
struct Cli {
    /// Scenario file describing the host page, its frames and their events.
    #[arg(long, env = "RESIZE_HARNESS_SCENARIO")]
    scenario: PathBuf,

    /// Sender origin the host accepts announcements from (repeatable).
    /// Without any, every origin is accepted.
    #[arg(
        long = "allowed-origin",
        env = "RESIZE_HARNESS_ALLOWED_ORIGINS",
        value_delimiter = ','
    )]
    allowed_origins: Vec<String>,

    /// Controller-wide debounce override in milliseconds.
    #[arg(long, env = "RESIZE_HARNESS_DEBOUNCE_MS")]
    debounce_ms: Option<u64>,

    /// Time to keep running after the last scenario event.
    #[arg(long, env = "RESIZE_HARNESS_SETTLE_MS", default_value_t = 250)]
    settle_ms: u64,
}

impl TryFrom<Cli> for HarnessConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let mut controller = ControllerConfig::with_overrides(&ResizeOptionsPatch {
            debounce_ms: cli.debounce_ms.map(|ms| ms as f64),
            ..ResizeOptionsPatch::default()
        });
        for origin in cli.allowed_origins {
            let origin = origin.trim();
            if origin.is_empty() {
                continue;
            }
            anyhow::ensure!(
                origin != "*",
                "use no --allowed-origin instead of '*' to accept every origin"
            );
            controller = controller.allow_origin(origin);
        }
        Ok(HarnessConfig {
            scenario: cli.scenario,
            controller,
            settle: Duration::from_millis(cli.settle_ms),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init()?;

    let cli = Cli::parse();
    let config = HarnessConfig::try_from(cli)?;
    info!(
        scenario = %config.scenario.display(),
        allowed_origins = ?config.controller.allowed_origins,
        settle_ms = config.settle.as_millis() as u64,
        "starting resize harness"
    );

    let scenario = scenario::Scenario::load(&config.scenario)?;
    let outcome = scenario::run(&scenario, config.controller, config.settle).await?;

    for applied in &outcome.applied {
        let line = serde_json::to_string(applied).context("failed to encode applied resize")?;
        println!("{line}");
    }
    for skipped in &outcome.skipped {
        info!(frame_id = %skipped.frame, reason = %skipped.reason, "frame skipped");
    }
    for (frame_id, size) in &outcome.final_sizes {
        match size {
            Some(size) => info!(
                frame_id = %frame_id,
                width = size.width,
                height = size.height,
                "final size"
            ),
            None => info!(frame_id = %frame_id, "frame never resized"),
        }
    }
    Ok(())
}
