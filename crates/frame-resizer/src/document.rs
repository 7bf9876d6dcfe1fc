use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use frame_bus::ContextId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::options::FrameSize;

/// Attribute flagging an iframe for automatic resizing. Its value is a JSON
/// options object (see [`crate::ResizeOptionsPatch`]).
pub const AUTO_RESIZE_ATTRIBUTE: &str = "data-iframe-resize";

/// Identity of an iframe element within its host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame-{}", self.0)
    }
}

/// The parts of an iframe element the resizer reads and writes.
pub trait FrameElement: Send + Sync {
    fn frame_id(&self) -> FrameId;

    /// Browsing context currently loaded inside the frame, if any.
    fn content_context(&self) -> Option<ContextId>;

    /// Whether the element is still attached to its document.
    fn is_connected(&self) -> bool;

    fn attribute(&self, name: &str) -> Option<String>;

    fn set_style(&self, property: &str, value: &str);
}

pub trait HostDocument: Send + Sync {
    /// All iframe elements in document order.
    fn frames(&self) -> Vec<Arc<dyn FrameElement>>;

    fn frames_with_attribute(&self, name: &str) -> Vec<Arc<dyn FrameElement>> {
        self.frames()
            .into_iter()
            .filter(|frame| frame.attribute(name).is_some())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cross-origin access to parent document denied")]
pub struct AccessDenied;

/// Enumeration of the iframes in a parent document, as seen from a child.
/// Same-origin policy may refuse it.
pub trait ParentDocumentAccess: Send + Sync {
    fn parent_frames(&self) -> Result<Vec<Arc<dyn FrameElement>>, AccessDenied>;
}

/// In-memory iframe element.
pub struct MemoryFrame {
    id: FrameId,
    content: RwLock<Option<ContextId>>,
    connected: AtomicBool,
    attributes: RwLock<HashMap<String, String>>,
    style: RwLock<BTreeMap<String, String>>,
}

impl fmt::Debug for MemoryFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFrame")
            .field("id", &self.id)
            .field("content", &*self.content.read())
            .field("connected", &self.is_connected())
            .field("style", &*self.style.read())
            .finish()
    }
}

impl MemoryFrame {
    pub fn new(id: FrameId) -> Self {
        Self {
            id,
            content: RwLock::new(None),
            connected: AtomicBool::new(false),
            attributes: RwLock::new(HashMap::new()),
            style: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_content(self, context: ContextId) -> Self {
        *self.content.write() = Some(context);
        self
    }

    pub fn with_attribute(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.write().insert(name.into(), value.into());
        self
    }

    /// Loads a different browsing context into the frame.
    pub fn navigate(&self, context: Option<ContextId>) {
        *self.content.write() = context;
    }

    pub fn style(&self, property: &str) -> Option<String> {
        self.style.read().get(property).cloned()
    }

    /// Width and height currently written to the element, if both are set
    /// in pixels.
    pub fn box_size(&self) -> Option<FrameSize> {
        let style = self.style.read();
        let px = |property: &str| {
            style
                .get(property)
                .and_then(|value| value.strip_suffix("px"))
                .and_then(|value| value.parse::<f64>().ok())
        };
        Some(FrameSize::new(px("width")?, px("height")?))
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl FrameElement for MemoryFrame {
    fn frame_id(&self) -> FrameId {
        self.id
    }

    fn content_context(&self) -> Option<ContextId> {
        *self.content.read()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes.read().get(name).cloned()
    }

    fn set_style(&self, property: &str, value: &str) {
        self.style
            .write()
            .insert(property.to_string(), value.to_string());
    }
}

/// In-memory host document holding iframe elements in insertion order.
#[derive(Debug)]
pub struct MemoryDocument {
    origin: String,
    frames: RwLock<Vec<Arc<MemoryFrame>>>,
}

impl MemoryDocument {
    pub fn new(origin: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            origin: origin.into(),
            frames: RwLock::new(Vec::new()),
        })
    }

    /// Attaches `frame` to the document and returns the shared handle.
    pub fn insert(&self, frame: MemoryFrame) -> Arc<MemoryFrame> {
        frame.set_connected(true);
        let frame = Arc::new(frame);
        self.frames.write().push(Arc::clone(&frame));
        frame
    }

    /// Detaches the frame. Handles held elsewhere stay valid but report
    /// `is_connected() == false`.
    pub fn remove(&self, id: FrameId) -> Option<Arc<MemoryFrame>> {
        let mut frames = self.frames.write();
        let index = frames.iter().position(|frame| frame.id == id)?;
        let frame = frames.remove(index);
        frame.set_connected(false);
        Some(frame)
    }

    /// View of this document from a child loaded at `requester_origin`.
    pub fn access_from(self: &Arc<Self>, requester_origin: impl Into<String>) -> OriginGate {
        OriginGate {
            document: Arc::clone(self),
            requester_origin: requester_origin.into(),
        }
    }
}

impl HostDocument for MemoryDocument {
    fn frames(&self) -> Vec<Arc<dyn FrameElement>> {
        self.frames
            .read()
            .iter()
            .map(|frame| Arc::clone(frame) as Arc<dyn FrameElement>)
            .collect()
    }
}

/// Parent document access that applies the same-origin rule.
#[derive(Debug, Clone)]
pub struct OriginGate {
    document: Arc<MemoryDocument>,
    requester_origin: String,
}

impl ParentDocumentAccess for OriginGate {
    fn parent_frames(&self) -> Result<Vec<Arc<dyn FrameElement>>, AccessDenied> {
        if self.document.origin != self.requester_origin {
            return Err(AccessDenied);
        }
        Ok(self.document.frames())
    }
}
