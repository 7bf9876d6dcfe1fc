//! Frame Resizer: keeps embedded iframes sized to their content.
//!
//! Responsibilities:
//! - host side: a registry of managed iframes, origin and sender checks on
//!   inbound announcements, min/max clamping and a per-frame debounced write
//! - embedded side: detecting embedding and announcing the content size
//! - bootstrap: wiring every iframe flagged with `data-iframe-resize`

pub mod announcer;
pub mod bootstrap;
pub mod document;
pub mod error;
pub mod host;
pub mod options;

pub use announcer::{EmbeddedAnnouncer, EmbeddedContext, HostFrameLookup};
pub use bootstrap::{Bootstrap, BootstrapReport, SkippedFrame};
pub use document::{
    AccessDenied, FrameElement, FrameId, HostDocument, MemoryDocument, MemoryFrame, OriginGate,
    ParentDocumentAccess, AUTO_RESIZE_ATTRIBUTE,
};
pub use error::{ResizeError, ResizeResult};
pub use host::{AppliedResize, HostController};
pub use options::{ControllerConfig, FrameSize, ResizeOptions, ResizeOptionsPatch};
