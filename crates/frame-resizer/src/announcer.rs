use std::sync::Arc;

use bytes::Bytes;
use frame_bus::{Bus, BusMessage, ContextId, TargetOrigin};
use resize_proto::SizeAnnouncement;
use tracing::{debug, trace, warn};

use crate::document::{FrameId, ParentDocumentAccess};
use crate::error::ResizeResult;

/// Where a browsing context sits in the frame tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedContext {
    pub id: ContextId,
    pub origin: String,
    pub parent: Option<ContextId>,
    pub top: ContextId,
}

impl EmbeddedContext {
    pub fn top_level(id: ContextId, origin: impl Into<String>) -> Self {
        Self {
            id,
            origin: origin.into(),
            parent: None,
            top: id,
        }
    }

    pub fn nested(
        id: ContextId,
        origin: impl Into<String>,
        parent: ContextId,
        top: ContextId,
    ) -> Self {
        Self {
            id,
            origin: origin.into(),
            parent: Some(parent),
            top,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostFrameLookup {
    Found(FrameId),
    Unknown,
}

/// Embedded-document side of the protocol: reports content size to the
/// parent. Rate limiting is left to the host.
pub struct EmbeddedAnnouncer<B: Bus> {
    bus: Arc<B>,
    context: EmbeddedContext,
    target_origin: TargetOrigin,
    parent_document: Option<Arc<dyn ParentDocumentAccess>>,
}

impl<B: Bus> EmbeddedAnnouncer<B> {
    /// `target_origin` is the origin the host page is expected to have;
    /// [`TargetOrigin::Any`] delivers to whatever page embeds this document.
    pub fn new(bus: Arc<B>, context: EmbeddedContext, target_origin: TargetOrigin) -> Self {
        Self {
            bus,
            context,
            target_origin,
            parent_document: None,
        }
    }

    pub fn with_parent_document(mut self, access: Arc<dyn ParentDocumentAccess>) -> Self {
        self.parent_document = Some(access);
        self
    }

    pub fn context(&self) -> &EmbeddedContext {
        &self.context
    }

    pub fn is_embedded(&self) -> bool {
        self.context.id != self.context.top
    }

    /// Posts a size announcement to the parent, rounding both dimensions up.
    /// Returns `Ok(false)` when nothing was sent: the document is not
    /// embedded or the measurement was not a finite, non-negative number.
    pub fn announce_size(&self, width: f64, height: f64) -> ResizeResult<bool> {
        let parent = match self.context.parent {
            Some(parent) if self.is_embedded() => parent,
            _ => {
                trace!(
                    target = "resize.announcer",
                    context = %self.context.id,
                    "not embedded; skipping announcement"
                );
                return Ok(false);
            }
        };

        if !is_measurement(width) || !is_measurement(height) {
            warn!(
                target = "resize.announcer",
                context = %self.context.id,
                width,
                height,
                "dropping invalid content measurement"
            );
            return Ok(false);
        }

        let announcement = SizeAnnouncement::new(width.ceil(), height.ceil());
        let payload = announcement.encode()?;
        self.bus.post(
            parent,
            &self.target_origin,
            BusMessage {
                source: self.context.id,
                origin: self.context.origin.clone(),
                payload: Bytes::from(payload),
            },
        )?;
        trace!(
            target = "resize.announcer",
            context = %self.context.id,
            parent = %parent,
            target_origin = %self.target_origin,
            width = announcement.width,
            height = announcement.height,
            "announced content size"
        );
        Ok(true)
    }

    /// Finds the iframe in the parent document that hosts this context.
    /// Informational only; announcements do not depend on it.
    pub fn locate_host_frame(&self) -> HostFrameLookup {
        if !self.is_embedded() {
            return HostFrameLookup::Unknown;
        }
        let Some(access) = self.parent_document.as_ref() else {
            return HostFrameLookup::Unknown;
        };
        let frames = match access.parent_frames() {
            Ok(frames) => frames,
            Err(err) => {
                debug!(
                    target = "resize.announcer",
                    context = %self.context.id,
                    error = %err,
                    "parent document not accessible"
                );
                return HostFrameLookup::Unknown;
            }
        };
        frames
            .iter()
            .find(|frame| frame.content_context() == Some(self.context.id))
            .map(|frame| HostFrameLookup::Found(frame.frame_id()))
            .unwrap_or(HostFrameLookup::Unknown)
    }
}

fn is_measurement(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{MemoryDocument, MemoryFrame};
    use frame_bus::LocalBus;
    use tokio::sync::broadcast::error::TryRecvError;

    const TOP: ContextId = ContextId(1);
    const CHILD: ContextId = ContextId(2);
    const HOST_ORIGIN: &str = "https://host.example";
    const WIDGET_ORIGIN: &str = "https://widgets.example";

    fn bus() -> Arc<LocalBus> {
        let bus = Arc::new(LocalBus::new());
        bus.attach(TOP, HOST_ORIGIN);
        bus.attach(CHILD, WIDGET_ORIGIN);
        bus
    }

    fn child(bus: Arc<LocalBus>, target_origin: TargetOrigin) -> EmbeddedAnnouncer<LocalBus> {
        EmbeddedAnnouncer::new(
            bus,
            EmbeddedContext::nested(CHILD, WIDGET_ORIGIN, TOP, TOP),
            target_origin,
        )
    }

    #[test]
    fn detects_embedding() {
        let bus = bus();
        let top = EmbeddedAnnouncer::new(
            bus.clone(),
            EmbeddedContext::top_level(TOP, HOST_ORIGIN),
            TargetOrigin::Any,
        );
        assert!(!top.is_embedded());
        assert!(child(bus, TargetOrigin::Any).is_embedded());
    }

    #[tokio::test]
    async fn announces_rounded_size_to_parent() {
        let bus = bus();
        let mut inbox = bus.subscribe(TOP);
        let announcer = child(bus.clone(), TargetOrigin::exact(HOST_ORIGIN));

        assert!(announcer.announce_size(899.2, 1499.01).unwrap());
        let msg = inbox.recv().await.expect("delivered");
        assert_eq!(msg.source, CHILD);
        assert_eq!(msg.origin, WIDGET_ORIGIN);
        let decoded = SizeAnnouncement::decode(&msg.payload).unwrap();
        assert_eq!(decoded, SizeAnnouncement::new(900.0, 1500.0));
    }

    #[test]
    fn top_level_document_does_not_announce() {
        let bus = bus();
        let mut inbox = bus.subscribe(TOP);
        let top = EmbeddedAnnouncer::new(
            bus.clone(),
            EmbeddedContext::top_level(TOP, HOST_ORIGIN),
            TargetOrigin::Any,
        );
        assert!(!top.announce_size(100.0, 100.0).unwrap());
        assert!(matches!(inbox.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn invalid_measurements_are_dropped() {
        let bus = bus();
        let mut inbox = bus.subscribe(TOP);
        let announcer = child(bus.clone(), TargetOrigin::Any);
        assert!(!announcer.announce_size(f64::NAN, 10.0).unwrap());
        assert!(!announcer.announce_size(10.0, -1.0).unwrap());
        assert!(!announcer.announce_size(f64::INFINITY, 10.0).unwrap());
        assert!(matches!(inbox.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn wrong_host_origin_is_not_delivered() {
        let bus = bus();
        let mut inbox = bus.subscribe(TOP);
        let announcer = child(bus.clone(), TargetOrigin::exact("https://other-host.example"));
        assert!(announcer.announce_size(10.0, 10.0).unwrap());
        assert!(matches!(inbox.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn every_call_is_sent() {
        let bus = bus();
        let mut inbox = bus.subscribe(TOP);
        let announcer = child(bus.clone(), TargetOrigin::Any);
        for height in [100.0, 200.0, 300.0] {
            announcer.announce_size(50.0, height).unwrap();
        }
        let mut heights = Vec::new();
        while let Ok(msg) = inbox.try_recv() {
            heights.push(SizeAnnouncement::decode(&msg.payload).unwrap().height);
        }
        assert_eq!(heights, vec![100.0, 200.0, 300.0]);
    }

    #[test]
    fn locates_host_frame_when_same_origin() {
        let bus = bus();
        let doc = MemoryDocument::new(HOST_ORIGIN);
        doc.insert(MemoryFrame::new(FrameId(1)).with_content(ContextId(7)));
        doc.insert(MemoryFrame::new(FrameId(2)).with_content(CHILD));

        let announcer = EmbeddedAnnouncer::new(
            bus,
            EmbeddedContext::nested(CHILD, HOST_ORIGIN, TOP, TOP),
            TargetOrigin::Any,
        )
        .with_parent_document(Arc::new(doc.access_from(HOST_ORIGIN)));
        assert_eq!(announcer.locate_host_frame(), HostFrameLookup::Found(FrameId(2)));
    }

    #[test]
    fn cross_origin_lookup_is_unknown() {
        let bus = bus();
        let doc = MemoryDocument::new(HOST_ORIGIN);
        doc.insert(MemoryFrame::new(FrameId(2)).with_content(CHILD));

        let announcer = child(bus.clone(), TargetOrigin::Any)
            .with_parent_document(Arc::new(doc.access_from(WIDGET_ORIGIN)));
        assert_eq!(announcer.locate_host_frame(), HostFrameLookup::Unknown);

        let detached = child(bus, TargetOrigin::Any);
        assert_eq!(detached.locate_host_frame(), HostFrameLookup::Unknown);
    }
}
