use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use frame_bus::{Bus, BusMessage, ContextId};
use parking_lot::Mutex;
use resize_proto::SizeAnnouncement;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::document::{FrameElement, FrameId, AUTO_RESIZE_ATTRIBUTE};
use crate::error::{ResizeError, ResizeResult};
use crate::options::{ControllerConfig, FrameSize, ResizeOptions, ResizeOptionsPatch};

const APPLIED_CHANNEL_DEPTH: usize = 64;

/// Emitted each time a deferred resize is written to an element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AppliedResize {
    pub frame_id: FrameId,
    pub size: FrameSize,
}

/// Parent-page side of the protocol.
///
/// Owns one registration per managed iframe. Each registration has its own
/// listener task on the host context's inbox and its own debounce slot.
/// Methods that schedule work must be called from within a Tokio runtime.
pub struct HostController<B: Bus + 'static> {
    inner: Arc<Inner<B>>,
}

struct Inner<B: Bus + 'static> {
    bus: Arc<B>,
    host: ContextId,
    config: ControllerConfig,
    registry: Mutex<HashMap<FrameId, Registration>>,
    tickets: AtomicU64,
    applied: broadcast::Sender<AppliedResize>,
}

struct Registration {
    ticket: u64,
    frame: Arc<dyn FrameElement>,
    options: ResizeOptions,
    listener: JoinHandle<()>,
    pending: Option<PendingResize>,
    last_applied: Option<FrameSize>,
}

struct PendingResize {
    ticket: u64,
    size: FrameSize,
    timer: JoinHandle<()>,
}

impl Registration {
    fn teardown(self) {
        self.listener.abort();
        if let Some(pending) = self.pending {
            pending.timer.abort();
        }
    }
}

impl<B: Bus + 'static> HostController<B> {
    pub fn new(bus: Arc<B>, host: ContextId, config: ControllerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                host,
                config,
                registry: Mutex::new(HashMap::new()),
                tickets: AtomicU64::new(1),
                applied: broadcast::channel(APPLIED_CHANNEL_DEPTH).0,
            }),
        }
    }

    /// Starts managing `frame`.
    ///
    /// Options resolve as controller defaults, then `options`, then the
    /// element's own `data-iframe-resize` value. Registering a frame that is
    /// already managed replaces the previous registration; its listener and
    /// any pending resize are torn down first. Fails only when the element's
    /// declarative value cannot be parsed, in which case nothing changes.
    pub fn register(
        &self,
        frame: Arc<dyn FrameElement>,
        options: ResizeOptionsPatch,
    ) -> ResizeResult<()> {
        let frame_id = frame.frame_id();
        let declared = match frame.attribute(AUTO_RESIZE_ATTRIBUTE) {
            Some(raw) => ResizeOptionsPatch::parse(&raw).map_err(|source| {
                ResizeError::MalformedOptions {
                    frame: frame_id,
                    attribute: AUTO_RESIZE_ATTRIBUTE,
                    source,
                }
            })?,
            None => ResizeOptionsPatch::default(),
        };
        let resolved = self.inner.config.defaults.merged(&options).merged(&declared);

        frame.set_style("overflow", "hidden");
        frame.set_style("border", "none");

        let ticket = self.inner.next_ticket();
        let mut registry = self.inner.registry.lock();
        if let Some(previous) = registry.remove(&frame_id) {
            debug!(
                target = "resize.host",
                frame_id = %frame_id,
                "replacing existing registration"
            );
            previous.teardown();
        }
        let listener = self.spawn_listener(frame_id, ticket);
        registry.insert(
            frame_id,
            Registration {
                ticket,
                frame,
                options: resolved,
                listener,
                pending: None,
                last_applied: None,
            },
        );
        drop(registry);

        debug!(
            target = "resize.host",
            frame_id = %frame_id,
            min_width = resolved.min_width,
            max_width = resolved.max_width,
            min_height = resolved.min_height,
            max_height = resolved.max_height,
            debounce_ms = resolved.debounce.as_millis() as u64,
            "registered frame"
        );
        Ok(())
    }

    /// Validates one inbound message against the registration for
    /// `frame_id` and forwards accepted announcements to
    /// [`apply_resize`](Self::apply_resize). Returns whether the message was
    /// accepted; rejected messages are otherwise ignored.
    pub fn handle_message(&self, frame_id: FrameId, message: &BusMessage) -> bool {
        self.inner.dispatch(frame_id, None, message)
    }

    /// Clamps the requested size and (re)starts the frame's debounce timer.
    /// Returns the size that will be written, or `None` when the frame is not
    /// registered.
    pub fn apply_resize(&self, frame_id: FrameId, width: f64, height: f64) -> Option<FrameSize> {
        self.inner.schedule(frame_id, None, FrameSize::new(width, height))
    }

    /// Stops managing the frame. Any pending resize is cancelled and will
    /// not be applied. Returns `false` if the frame was not registered.
    pub fn unregister(&self, frame_id: FrameId) -> bool {
        let removed = self.inner.registry.lock().remove(&frame_id);
        match removed {
            Some(registration) => {
                registration.teardown();
                debug!(target = "resize.host", frame_id = %frame_id, "unregistered frame");
                true
            }
            None => false,
        }
    }

    pub fn unregister_all(&self) {
        let drained: Vec<(FrameId, Registration)> =
            self.inner.registry.lock().drain().collect();
        let count = drained.len();
        for (_, registration) in drained {
            registration.teardown();
        }
        debug!(target = "resize.host", count, "unregistered all frames");
    }

    pub fn is_registered(&self, frame_id: FrameId) -> bool {
        self.inner.registry.lock().contains_key(&frame_id)
    }

    pub fn registered_frames(&self) -> Vec<FrameId> {
        let mut ids: Vec<FrameId> = self.inner.registry.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn options_for(&self, frame_id: FrameId) -> Option<ResizeOptions> {
        self.inner
            .registry
            .lock()
            .get(&frame_id)
            .map(|registration| registration.options)
    }

    /// Size waiting for its debounce window to elapse, if any.
    pub fn pending_size(&self, frame_id: FrameId) -> Option<FrameSize> {
        self.inner
            .registry
            .lock()
            .get(&frame_id)
            .and_then(|registration| registration.pending.as_ref().map(|p| p.size))
    }

    /// Last size written to the frame under its current registration.
    pub fn applied_size(&self, frame_id: FrameId) -> Option<FrameSize> {
        self.inner
            .registry
            .lock()
            .get(&frame_id)
            .and_then(|registration| registration.last_applied)
    }

    pub fn subscribe_applied(&self) -> broadcast::Receiver<AppliedResize> {
        self.inner.applied.subscribe()
    }

    fn spawn_listener(&self, frame_id: FrameId, ticket: u64) -> JoinHandle<()> {
        let mut rx = self.inner.bus.subscribe(self.inner.host);
        let inner: Weak<Inner<B>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        inner.dispatch(frame_id, Some(ticket), &message);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            target = "resize.host",
                            frame_id = %frame_id,
                            skipped,
                            "listener lagged behind host inbox"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl<B: Bus + 'static> Inner<B> {
    fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::Relaxed)
    }

    /// `registration` pins the call to one registration; listener tasks pass
    /// their own ticket so a replaced listener cannot act on its successor.
    fn dispatch(
        self: &Arc<Self>,
        frame_id: FrameId,
        registration: Option<u64>,
        message: &BusMessage,
    ) -> bool {
        let frame = {
            let registry = self.registry.lock();
            match registry.get(&frame_id) {
                Some(entry) if registration.map_or(true, |t| t == entry.ticket) => {
                    Arc::clone(&entry.frame)
                }
                _ => return false,
            }
        };

        if frame.content_context() != Some(message.source) {
            trace!(
                target = "resize.host",
                frame_id = %frame_id,
                source = %message.source,
                "ignoring message from foreign context"
            );
            return false;
        }

        if !self.config.accepts_origin(&message.origin) {
            trace!(
                target = "resize.host",
                frame_id = %frame_id,
                origin = %message.origin,
                "ignoring message from disallowed origin"
            );
            return false;
        }

        let announcement = match SizeAnnouncement::decode(&message.payload) {
            Ok(announcement) => announcement,
            Err(err) => {
                trace!(
                    target = "resize.host",
                    frame_id = %frame_id,
                    error = %err,
                    "ignoring non-resize message"
                );
                return false;
            }
        };

        self.schedule(
            frame_id,
            registration,
            FrameSize::new(announcement.width, announcement.height),
        )
        .is_some()
    }

    fn schedule(
        self: &Arc<Self>,
        frame_id: FrameId,
        registration: Option<u64>,
        requested: FrameSize,
    ) -> Option<FrameSize> {
        let mut registry = self.registry.lock();
        let entry = registry.get_mut(&frame_id)?;
        if registration.is_some_and(|t| t != entry.ticket) {
            return None;
        }

        let size = entry.options.clamp(requested);
        if let Some(previous) = entry.pending.take() {
            previous.timer.abort();
        }

        let ticket = self.next_ticket();
        let delay = entry.options.debounce;
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire(frame_id, ticket);
            }
        });
        entry.pending = Some(PendingResize {
            ticket,
            size,
            timer,
        });

        trace!(
            target = "resize.host",
            frame_id = %frame_id,
            requested_width = requested.width,
            requested_height = requested.height,
            width = size.width,
            height = size.height,
            "scheduled resize"
        );
        Some(size)
    }

    /// Runs when a debounce window elapses. The registry lock is held while
    /// the element is written so `unregister` cannot interleave.
    fn fire(&self, frame_id: FrameId, ticket: u64) {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.get_mut(&frame_id) else {
            return;
        };
        let size = match entry.pending.as_ref() {
            Some(pending) if pending.ticket == ticket => pending.size,
            _ => return,
        };
        entry.pending = None;

        if !entry.frame.is_connected() {
            debug!(
                target = "resize.host",
                frame_id = %frame_id,
                "frame detached before resize; skipping"
            );
            return;
        }

        entry.frame.set_style("width", &size.css_width());
        entry.frame.set_style("height", &size.css_height());
        entry.last_applied = Some(size);
        drop(registry);

        debug!(
            target = "resize.host",
            frame_id = %frame_id,
            width = size.width,
            height = size.height,
            "applied resize"
        );
        let _ = self.applied.send(AppliedResize { frame_id, size });
    }
}

impl<B: Bus + 'static> Drop for Inner<B> {
    fn drop(&mut self) {
        for (_, registration) in self.registry.get_mut().drain() {
            registration.teardown();
        }
    }
}

impl<B: Bus + 'static> Clone for HostController<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Bus + 'static> fmt::Debug for HostController<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostController")
            .field("host", &self.inner.host)
            .field("frames", &self.registered_frames())
            .finish()
    }
}
