//! Session-scoped signaling channel
//!
//! A [`SignalChannel`] is the handle both peers use to talk through the
//! relay: fire-and-forget `send`, per-event handlers, and an idempotent
//! `leave`. Transports build channels with [`SignalChannel::open`], handing
//! over the outbound queue they drain and the inbound queue they fill.

use super::protocol::{SignalEvent, SignalMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use docscan_core::SessionId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Handler invoked once per received message of its event kind
pub type EventHandler = Arc<dyn Fn(&SignalMessage) + Send + Sync>;

type HandlerTable = Arc<RwLock<HashMap<SignalEvent, Vec<EventHandler>>>>;

/// Joins session channels on a relay
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Join the channel for `session`
    ///
    /// Joining a session this transport already holds a live channel for
    /// returns that channel.
    ///
    /// # Errors
    ///
    /// `Connect` if the relay is unreachable, `SessionFull` if both seats
    /// are taken.
    async fn join(&self, session: &SessionId) -> Result<SignalChannel>;
}

struct ChannelInner {
    session_id: SessionId,
    outbound: Mutex<Option<mpsc::UnboundedSender<SignalMessage>>>,
    handlers: HandlerTable,
    dispatch: Mutex<Option<JoinHandle<()>>>,
    on_leave: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    left: AtomicBool,
}

impl ChannelInner {
    fn leave(&self) {
        if self.left.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropping the sender lets the transport drain what was already
        // queued before it releases the relay membership.
        self.outbound.lock().take();
        if let Some(task) = self.dispatch.lock().take() {
            task.abort();
        }
        self.handlers.write().clear();
        if let Some(hook) = self.on_leave.lock().take() {
            hook();
        }

        debug!(session = %self.session_id, "left signaling channel");
    }
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Cloneable handle to one joined session channel
///
/// The channel is left when [`leave`](Self::leave) is called or when the
/// last handle is dropped.
#[derive(Clone)]
pub struct SignalChannel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for SignalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalChannel")
            .field("session_id", &self.inner.session_id)
            .field("left", &self.is_left())
            .finish()
    }
}

impl SignalChannel {
    /// Wire a channel to a transport
    ///
    /// `outbound` receives every message passed to [`send`](Self::send);
    /// messages arriving on `inbound` are dispatched to handlers in order.
    /// `on_leave` runs once, synchronously, when the channel is left.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open<F>(
        session_id: SessionId,
        outbound: mpsc::UnboundedSender<SignalMessage>,
        mut inbound: mpsc::UnboundedReceiver<SignalMessage>,
        on_leave: F,
    ) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let handlers: HandlerTable = Arc::new(RwLock::new(HashMap::new()));

        let table = Arc::clone(&handlers);
        let session = session_id.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let event = message.event();
                let targets: Vec<EventHandler> =
                    table.read().get(&event).cloned().unwrap_or_default();
                if targets.is_empty() {
                    trace!(session = %session, %event, "no handler for signaling event");
                    continue;
                }
                for handler in targets {
                    handler(&message);
                }
            }
            debug!(session = %session, "signaling inbound closed");
        });

        Self {
            inner: Arc::new(ChannelInner {
                session_id,
                outbound: Mutex::new(Some(outbound)),
                handlers,
                dispatch: Mutex::new(Some(dispatch)),
                on_leave: Mutex::new(Some(Box::new(on_leave))),
                left: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.inner.session_id
    }

    /// Publish a message to the other participant
    ///
    /// Fire-and-forget: success means the message was queued.
    pub fn send(&self, message: SignalMessage) -> Result<()> {
        if self.is_left() {
            return Err(Error::ChannelClosed);
        }

        let event = message.event();
        let guard = self.inner.outbound.lock();
        let sender = guard.as_ref().ok_or(Error::ChannelClosed)?;
        sender.send(message).map_err(|_| Error::ChannelClosed)?;
        trace!(session = %self.inner.session_id, %event, "signaling message queued");
        Ok(())
    }

    /// Register a handler for one event kind; several may be registered
    pub fn on_event<F>(&self, event: SignalEvent, handler: F)
    where
        F: Fn(&SignalMessage) + Send + Sync + 'static,
    {
        if self.is_left() {
            return;
        }
        self.inner
            .handlers
            .write()
            .entry(event)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Unsubscribe and release relay resources; safe to call repeatedly
    pub fn leave(&self) {
        self.inner.leave();
    }

    pub fn is_left(&self) -> bool {
        self.inner.left.load(Ordering::SeqCst)
    }

    fn downgrade(&self) -> Weak<ChannelInner> {
        Arc::downgrade(&self.inner)
    }
}

/// Live channels of one transport, keyed by session
///
/// Holds weak references so that dropping every handle still leaves the
/// channel.
#[derive(Default)]
pub(crate) struct ChannelCache {
    channels: tokio::sync::Mutex<HashMap<SessionId, Weak<ChannelInner>>>,
}

impl ChannelCache {
    /// Return the live channel for `session`, or join a new one
    pub(crate) async fn get_or_join<F, Fut>(&self, session: &SessionId, join: F) -> Result<SignalChannel>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SignalChannel>>,
    {
        let mut channels = self.channels.lock().await;
        channels.retain(|_, weak| weak.strong_count() > 0);

        if let Some(inner) = channels.get(session).and_then(Weak::upgrade) {
            if !inner.left.load(Ordering::SeqCst) {
                debug!(%session, "reusing joined signaling channel");
                return Ok(SignalChannel { inner });
            }
        }

        let channel = join().await?;
        channels.insert(session.clone(), channel.downgrade());
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn open_pair() -> (
        SignalChannel,
        mpsc::UnboundedReceiver<SignalMessage>,
        mpsc::UnboundedSender<SignalMessage>,
        Arc<AtomicUsize>,
    ) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let leaves = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&leaves);
        let channel = SignalChannel::open(SessionId::generate(), out_tx, in_rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (channel, out_rx, in_tx, leaves)
    }

    #[tokio::test]
    async fn test_send_queues_outbound() {
        let (channel, mut out_rx, _in_tx, _) = open_pair();
        channel.send(SignalMessage::offer("sdp")).unwrap();
        assert_eq!(out_rx.recv().await, Some(SignalMessage::offer("sdp")));
    }

    #[tokio::test]
    async fn test_every_handler_for_kind_is_invoked() {
        let (channel, _out_rx, in_tx, _) = open_pair();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        for tag in ["first", "second"] {
            let tx = seen_tx.clone();
            channel.on_event(SignalEvent::PageCaptured, move |msg| {
                let _ = tx.send((tag, msg.clone()));
            });
        }
        let tx = seen_tx.clone();
        channel.on_event(SignalEvent::ScanDone, move |msg| {
            let _ = tx.send(("done", msg.clone()));
        });

        in_tx
            .send(SignalMessage::PageCaptured { page_number: 1 })
            .unwrap();

        let a = seen_rx.recv().await.unwrap();
        let b = seen_rx.recv().await.unwrap();
        assert_eq!(a.0, "first");
        assert_eq!(b.0, "second");
        assert_eq!(b.1, SignalMessage::PageCaptured { page_number: 1 });
        assert!(seen_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_is_idempotent() {
        let (channel, mut out_rx, _in_tx, leaves) = open_pair();
        let copy = channel.clone();

        channel.leave();
        copy.leave();
        channel.leave();

        assert!(copy.is_left());
        assert_eq!(leaves.load(Ordering::SeqCst), 1);
        assert!(matches!(
            channel.send(SignalMessage::PhoneConnected {}),
            Err(Error::ChannelClosed)
        ));
        // outbound sender dropped
        assert_eq!(out_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_dropping_last_handle_leaves() {
        let (channel, _out_rx, _in_tx, leaves) = open_pair();
        let copy = channel.clone();
        drop(channel);
        assert_eq!(leaves.load(Ordering::SeqCst), 0);
        drop(copy);
        assert_eq!(leaves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_reuses_live_channel() {
        let cache = ChannelCache::default();
        let session = SessionId::generate();
        let joins = AtomicUsize::new(0);

        let (joins_ref, session_ref) = (&joins, &session);
        let join = move || async move {
            joins_ref.fetch_add(1, Ordering::SeqCst);
            let (out_tx, _out_rx) = mpsc::unbounded_channel();
            let (_in_tx, in_rx) = mpsc::unbounded_channel();
            Ok(SignalChannel::open(session_ref.clone(), out_tx, in_rx, || {}))
        };

        let first = cache.get_or_join(&session, join).await.unwrap();
        let second = cache.get_or_join(&session, join).await.unwrap();
        assert_eq!(joins.load(Ordering::SeqCst), 1);

        first.leave();
        assert!(second.is_left());
        let third = cache.get_or_join(&session, join).await.unwrap();
        assert_eq!(joins.load(Ordering::SeqCst), 2);
        assert!(!third.is_left());
    }
}
