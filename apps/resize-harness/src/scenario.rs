use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use frame_bus::{ContextId, LocalBus, TargetOrigin};
use frame_resizer::{
    AppliedResize, Bootstrap, ControllerConfig, EmbeddedAnnouncer, EmbeddedContext,
    FrameElement, FrameId, FrameSize, MemoryDocument, MemoryFrame, SkippedFrame,
    AUTO_RESIZE_ATTRIBUTE,
};
use serde::Deserialize;
use tokio::sync::{broadcast, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const HOST_CONTEXT: ContextId = ContextId(0);

/// A host page, its iframes and a timeline of events inside them.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub host_origin: String,
    #[serde(default)]
    pub frames: Vec<FrameSpec>,
    #[serde(default)]
    pub events: Vec<TimedEvent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameSpec {
    pub id: u64,
    pub context: u64,
    pub origin: String,
    /// Raw `data-iframe-resize` value; absent means the frame is not flagged.
    #[serde(default)]
    pub resize: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEvent {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// The document in `context` reports its content size.
    Announce {
        context: u64,
        width: f64,
        height: f64,
        /// `"*"`, an explicit origin, or absent for the host's own origin.
        #[serde(default)]
        target_origin: Option<String>,
    },
    /// The iframe element is removed from the host document.
    Remove { frame: u64 },
}

#[derive(Debug)]
pub struct ScenarioOutcome {
    pub applied: Vec<AppliedResize>,
    pub skipped: Vec<SkippedFrame>,
    pub final_sizes: Vec<(FrameId, Option<FrameSize>)>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let scenario: Scenario = serde_json::from_str(&raw)
            .with_context(|| format!("invalid scenario {}", path.display()))?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        let mut contexts = HashMap::new();
        for frame in &self.frames {
            if frame.context == HOST_CONTEXT.0 {
                bail!("frame {} reuses the host context id 0", frame.id);
            }
            if let Some(other) = contexts.insert(frame.context, frame.id) {
                bail!(
                    "frames {} and {} share context {}",
                    other,
                    frame.id,
                    frame.context
                );
            }
        }
        for event in &self.events {
            if let Action::Announce { context, .. } = &event.action {
                if !contexts.contains_key(context) {
                    bail!("announcement at {}ms from unknown context {}", event.at_ms, context);
                }
            }
        }
        Ok(())
    }
}

/// Replays the scenario in real (or paused test) time and returns every
/// resize the controller applied.
pub async fn run(
    scenario: &Scenario,
    config: ControllerConfig,
    settle: Duration,
) -> Result<ScenarioOutcome> {
    let bus = Arc::new(LocalBus::new());
    bus.attach(HOST_CONTEXT, scenario.host_origin.clone());
    let document = MemoryDocument::new(scenario.host_origin.clone());

    let mut announcers = HashMap::new();
    let mut contexts = HashMap::new();
    let mut elements = Vec::with_capacity(scenario.frames.len());
    for spec in &scenario.frames {
        let child = ContextId(spec.context);
        bus.attach(child, spec.origin.clone());
        let mut frame = MemoryFrame::new(FrameId(spec.id)).with_content(child);
        if let Some(value) = &spec.resize {
            frame = frame.with_attribute(AUTO_RESIZE_ATTRIBUTE, value.clone());
        }
        elements.push(document.insert(frame));
        contexts.insert(spec.id, child);
        announcers.insert(
            spec.context,
            EmbeddedContext::nested(child, spec.origin.clone(), HOST_CONTEXT, HOST_CONTEXT),
        );
    }

    let bootstrap = Bootstrap::new(bus.clone(), HOST_CONTEXT, config);
    let report = bootstrap.on_document_ready(&*document);
    let skipped = report.skipped.clone();
    let collector = report.controller.as_ref().map(|controller| {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = spawn_collector(controller.subscribe_applied(), stop_rx);
        (stop_tx, handle)
    });

    let mut events = scenario.events.clone();
    events.sort_by_key(|event| event.at_ms);
    let start = Instant::now();
    for event in &events {
        sleep_until(start + Duration::from_millis(event.at_ms)).await;
        match &event.action {
            Action::Announce {
                context,
                width,
                height,
                target_origin,
            } => {
                let Some(embedded) = announcers.get(context) else {
                    continue;
                };
                let target = match target_origin.as_deref() {
                    Some("*") => TargetOrigin::Any,
                    Some(origin) => TargetOrigin::exact(origin),
                    None => TargetOrigin::exact(scenario.host_origin.clone()),
                };
                let announcer = EmbeddedAnnouncer::new(bus.clone(), embedded.clone(), target);
                if let Err(err) = announcer.announce_size(*width, *height) {
                    warn!(context, error = %err, "announcement failed");
                }
            }
            Action::Remove { frame } => {
                if document.remove(FrameId(*frame)).is_none() {
                    warn!(frame, "remove event for unknown frame");
                    continue;
                }
                // Removing the element destroys the document loaded in it.
                if let Some(child) = contexts.get(frame) {
                    bus.detach(*child);
                }
                debug!(frame, "removed frame from host document");
            }
        }
    }
    tokio::time::sleep(settle).await;

    let final_sizes = elements
        .iter()
        .map(|frame| (frame.frame_id(), frame.box_size()))
        .collect();

    if let Some(controller) = report.controller.as_ref() {
        controller.unregister_all();
    }
    let applied = match collector {
        Some((stop, handle)) => {
            let _ = stop.send(());
            handle.await.context("collector task failed")?
        }
        None => Vec::new(),
    };

    info!(
        applied = applied.len(),
        skipped = skipped.len(),
        "scenario finished"
    );
    Ok(ScenarioOutcome {
        applied,
        skipped,
        final_sizes,
    })
}

fn spawn_collector(
    mut rx: broadcast::Receiver<AppliedResize>,
    mut stop: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<Vec<AppliedResize>> {
    tokio::spawn(async move {
        let mut applied = Vec::new();
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => applied.push(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "applied-resize stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = &mut stop => {
                    while let Ok(event) = rx.try_recv() {
                        applied.push(event);
                    }
                    break;
                }
            }
        }
        applied
    })
}
