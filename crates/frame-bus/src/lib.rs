//! Message transport between browsing contexts.
//!
//! Every context (a top-level page or the document inside an iframe) owns an
//! inbox. Senders post to a target context and name the origin they expect
//! the target to have; the transport drops the message when the target's
//! origin differs, the way `postMessage` does.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

const INBOX_DEPTH: usize = 64;

/// Identity of a browsing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Origin a sender requires of the receiving context.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetOrigin {
    /// Deliver regardless of the receiver's origin (`"*"`).
    #[default]
    Any,
    Exact(String),
}

impl TargetOrigin {
    pub fn exact(origin: impl Into<String>) -> Self {
        TargetOrigin::Exact(origin.into())
    }

    pub fn matches(&self, origin: Option<&str>) -> bool {
        match self {
            TargetOrigin::Any => true,
            TargetOrigin::Exact(expected) => origin == Some(expected.as_str()),
        }
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOrigin::Any => f.write_str("*"),
            TargetOrigin::Exact(origin) => f.write_str(origin),
        }
    }
}

/// A message as seen by the receiving context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub source: ContextId,
    /// Origin of the sending context.
    pub origin: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("unknown browsing context {0}")]
    UnknownContext(ContextId),
}

pub type BusResult<T> = Result<T, BusError>;

pub trait Bus: Send + Sync {
    /// Listen on the inbox of `context`.
    fn subscribe(&self, context: ContextId) -> broadcast::Receiver<BusMessage>;

    /// Post `message` to `target`. A message whose `target_origin` does not
    /// match the target context is dropped and still reported as `Ok`.
    fn post(
        &self,
        target: ContextId,
        target_origin: &TargetOrigin,
        message: BusMessage,
    ) -> BusResult<()>;
}

struct Inbox {
    origin: Option<String>,
    sender: broadcast::Sender<BusMessage>,
}

impl Inbox {
    fn new(origin: Option<String>) -> Self {
        Self {
            origin,
            sender: broadcast::channel(INBOX_DEPTH).0,
        }
    }
}

/// In-memory bus for tests and simulated documents.
#[derive(Default)]
pub struct LocalBus {
    inboxes: RwLock<HashMap<ContextId, Inbox>>,
}

impl fmt::Debug for LocalBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalBus")
            .field("contexts", &self.inboxes.read().len())
            .finish()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `context` and the origin its document was loaded from.
    pub fn attach(&self, context: ContextId, origin: impl Into<String>) {
        let origin = origin.into();
        let mut guard = self.inboxes.write();
        guard
            .entry(context)
            .and_modify(|inbox| inbox.origin = Some(origin.clone()))
            .or_insert_with(|| Inbox::new(Some(origin)));
    }

    /// Tears down the context's inbox; later posts to it fail and its
    /// subscribers see the channel close.
    pub fn detach(&self, context: ContextId) {
        self.inboxes.write().remove(&context);
    }

    pub fn origin_of(&self, context: ContextId) -> Option<String> {
        self.inboxes
            .read()
            .get(&context)
            .and_then(|inbox| inbox.origin.clone())
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, context: ContextId) -> broadcast::Receiver<BusMessage> {
        let mut guard = self.inboxes.write();
        guard
            .entry(context)
            .or_insert_with(|| Inbox::new(None))
            .sender
            .subscribe()
    }

    fn post(
        &self,
        target: ContextId,
        target_origin: &TargetOrigin,
        message: BusMessage,
    ) -> BusResult<()> {
        let sender = {
            let guard = self.inboxes.read();
            let inbox = guard.get(&target).ok_or(BusError::UnknownContext(target))?;
            if !target_origin.matches(inbox.origin.as_deref()) {
                return Ok(());
            }
            inbox.sender.clone()
        };
        // Nobody listening is not an error for a fire-and-forget post.
        let _ = sender.send(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    const HOST: ContextId = ContextId(1);
    const CHILD: ContextId = ContextId(2);

    fn message(payload: &'static [u8]) -> BusMessage {
        BusMessage {
            source: CHILD,
            origin: "https://widgets.example".into(),
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn local_bus_round_trip() {
        let bus = LocalBus::new();
        bus.attach(HOST, "https://host.example");
        let mut inbox = bus.subscribe(HOST);
        bus.post(HOST, &TargetOrigin::Any, message(b"ping"))
            .expect("post ok");
        let msg = inbox.recv().await.expect("receive ok");
        assert_eq!(msg.source, CHILD);
        assert_eq!(msg.origin, "https://widgets.example");
        assert_eq!(msg.payload, Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn drops_messages_for_another_origin() {
        let bus = LocalBus::new();
        bus.attach(HOST, "https://host.example");
        let mut inbox = bus.subscribe(HOST);

        bus.post(
            HOST,
            &TargetOrigin::exact("https://elsewhere.example"),
            message(b"lost"),
        )
        .expect("mismatch is not an error");
        assert!(matches!(inbox.try_recv(), Err(TryRecvError::Empty)));

        bus.post(
            HOST,
            &TargetOrigin::exact("https://host.example"),
            message(b"kept"),
        )
        .expect("post ok");
        let msg = inbox.recv().await.expect("receive ok");
        assert_eq!(msg.payload, Bytes::from_static(b"kept"));
    }

    #[test]
    fn posting_to_unknown_context_fails() {
        let bus = LocalBus::new();
        let err = bus
            .post(ContextId(9), &TargetOrigin::Any, message(b"x"))
            .unwrap_err();
        assert!(matches!(err, BusError::UnknownContext(ContextId(9))));
    }

    #[tokio::test]
    async fn detached_context_stops_receiving() {
        let bus = LocalBus::new();
        bus.attach(CHILD, "https://widgets.example");
        let mut inbox = bus.subscribe(CHILD);

        bus.detach(CHILD);
        assert_eq!(bus.origin_of(CHILD), None);
        assert!(matches!(
            bus.post(CHILD, &TargetOrigin::Any, message(b"late")),
            Err(BusError::UnknownContext(CHILD))
        ));
        assert!(inbox.recv().await.is_err());
    }

    #[test]
    fn exact_origin_never_matches_unattached_context() {
        let bus = LocalBus::new();
        let _inbox = bus.subscribe(HOST);
        assert_eq!(bus.origin_of(HOST), None);
        assert!(!TargetOrigin::exact("https://host.example").matches(None));
        assert!(TargetOrigin::Any.matches(None));
    }
}
