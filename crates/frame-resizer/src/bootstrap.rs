use std::sync::{Arc, OnceLock};

use frame_bus::{Bus, ContextId};
use tracing::{info, warn};

use crate::document::{FrameId, HostDocument, AUTO_RESIZE_ATTRIBUTE};
use crate::host::HostController;
use crate::options::{ControllerConfig, ResizeOptionsPatch};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFrame {
    pub frame: FrameId,
    pub reason: String,
}

/// Outcome of the one-time document scan.
#[derive(Debug)]
pub struct BootstrapReport<B: Bus + 'static> {
    /// Shared controller; only created when the document had flagged frames.
    pub controller: Option<HostController<B>>,
    pub registered: Vec<FrameId>,
    pub skipped: Vec<SkippedFrame>,
}

/// Registers every iframe carrying `data-iframe-resize` once the host
/// document is ready.
pub struct Bootstrap<B: Bus + 'static> {
    bus: Arc<B>,
    host: ContextId,
    config: ControllerConfig,
    report: OnceLock<BootstrapReport<B>>,
}

impl<B: Bus + 'static> Bootstrap<B> {
    pub fn new(bus: Arc<B>, host: ContextId, config: ControllerConfig) -> Self {
        Self {
            bus,
            host,
            config,
            report: OnceLock::new(),
        }
    }

    /// Scans `document` on the first call. Later calls return the first
    /// report without touching the document again.
    pub fn on_document_ready(&self, document: &dyn HostDocument) -> &BootstrapReport<B> {
        self.report.get_or_init(|| self.scan(document))
    }

    pub fn report(&self) -> Option<&BootstrapReport<B>> {
        self.report.get()
    }

    fn scan(&self, document: &dyn HostDocument) -> BootstrapReport<B> {
        let flagged = document.frames_with_attribute(AUTO_RESIZE_ATTRIBUTE);
        if flagged.is_empty() {
            return BootstrapReport {
                controller: None,
                registered: Vec::new(),
                skipped: Vec::new(),
            };
        }

        let controller =
            HostController::new(Arc::clone(&self.bus), self.host, self.config.clone());
        let mut registered = Vec::with_capacity(flagged.len());
        let mut skipped = Vec::new();

        for frame in flagged {
            let frame_id = frame.frame_id();
            match controller.register(frame, ResizeOptionsPatch::default()) {
                Ok(()) => registered.push(frame_id),
                Err(err) => {
                    warn!(
                        target = "resize.bootstrap",
                        frame_id = %frame_id,
                        error = %err,
                        "skipping frame with malformed options"
                    );
                    skipped.push(SkippedFrame {
                        frame: frame_id,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            target = "resize.bootstrap",
            registered = registered.len(),
            skipped = skipped.len(),
            "auto-resize bootstrap complete"
        );
        BootstrapReport {
            controller: Some(controller),
            registered,
            skipped,
        }
    }
}
