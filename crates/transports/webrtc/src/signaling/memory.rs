//! In-process signaling relay
//!
//! Behaves like the hosted relay: two seats per session, broadcasts go to
//! the other member only, and each publisher's messages are forwarded by a
//! single task so they arrive in publish order. Used by tests and by
//! single-process deployments.

use super::channel::{ChannelCache, SignalChannel, SignalingTransport};
use super::protocol::SignalMessage;
use crate::{Error, Result};
use async_trait::async_trait;
use docscan_core::SessionId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Participants per session
pub const SESSION_CAPACITY: usize = 2;

struct Member {
    id: Uuid,
    inbox: mpsc::UnboundedSender<SignalMessage>,
}

struct RelayState {
    rooms: Mutex<HashMap<String, Vec<Member>>>,
    reachable: AtomicBool,
}

impl RelayState {
    fn remove_member(&self, room: &str, id: Uuid) {
        let mut rooms = self.rooms.lock();
        if let Some(members) = rooms.get_mut(room) {
            members.retain(|m| m.id != id);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    fn peers_of(&self, room: &str, id: Uuid) -> Vec<mpsc::UnboundedSender<SignalMessage>> {
        self.rooms
            .lock()
            .get(room)
            .map(|members| {
                members
                    .iter()
                    .filter(|m| m.id != id)
                    .map(|m| m.inbox.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Shared in-process relay
#[derive(Clone)]
pub struct InMemoryRelay {
    state: Arc<RelayState>,
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RelayState {
                rooms: Mutex::new(HashMap::new()),
                reachable: AtomicBool::new(true),
            }),
        }
    }

    /// A transport endpoint on this relay, standing in for one process
    pub fn endpoint(&self) -> InMemorySignaling {
        InMemorySignaling {
            relay: self.clone(),
            channels: ChannelCache::default(),
        }
    }

    /// Simulate the relay going away; later joins fail with `Connect`
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Current member count of a session
    pub fn member_count(&self, session: &SessionId) -> usize {
        self.state
            .rooms
            .lock()
            .get(&session.channel_name())
            .map_or(0, Vec::len)
    }

    fn join_room(&self, session: &SessionId) -> Result<SignalChannel> {
        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(Error::Connect("in-memory relay unreachable".to_string()));
        }

        let room = session.channel_name();
        let id = Uuid::new_v4();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        {
            let mut rooms = self.state.rooms.lock();
            let members = rooms.entry(room.clone()).or_default();
            if members.len() >= SESSION_CAPACITY {
                return Err(Error::SessionFull(room));
            }
            members.push(Member {
                id,
                inbox: inbox_tx,
            });
            info!(%room, member = %id, members = members.len(), "joined in-memory relay");
        }

        // One forwarder per publisher keeps its messages in order.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let state = Arc::clone(&self.state);
        let forward_room = room.clone();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                for peer in state.peers_of(&forward_room, id) {
                    let _ = peer.send(message.clone());
                }
            }
            debug!(room = %forward_room, member = %id, "publisher closed");
        });

        let state = Arc::clone(&self.state);
        Ok(SignalChannel::open(
            session.clone(),
            out_tx,
            inbox_rx,
            move || state.remove_member(&room, id),
        ))
    }
}

/// One process's view of an [`InMemoryRelay`]
pub struct InMemorySignaling {
    relay: InMemoryRelay,
    channels: ChannelCache,
}

#[async_trait]
impl SignalingTransport for InMemorySignaling {
    async fn join(&self, session: &SessionId) -> Result<SignalChannel> {
        self.channels
            .get_or_join(session, || async { self.relay.join_room(session) })
            .await
    }
}
