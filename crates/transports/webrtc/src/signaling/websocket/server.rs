//! WebSocket signaling relay
//!
//! Pairs up to two WebSocket clients per session and forwards each
//! client's broadcasts to the other member. Message contents are opaque.

use crate::signaling::memory::SESSION_CAPACITY;
use crate::signaling::protocol::RelayFrame;
use crate::{Error, Result};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Relay server settings
#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    /// Address to bind (port 0 picks a free port)
    pub bind_addr: SocketAddr,

    /// Maximum concurrent sessions (default: 1000)
    pub max_sessions: usize,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_sessions: 1000,
        }
    }
}

struct RelayMember {
    id: Uuid,
    tx: mpsc::UnboundedSender<String>,
}

/// Sessions and their members, shared by every connection
#[derive(Default)]
pub struct RelayState {
    sessions: RwLock<HashMap<String, Vec<RelayMember>>>,
}

impl RelayState {
    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Members currently in `session`
    pub fn member_count(&self, session: &str) -> usize {
        self.sessions.read().get(session).map_or(0, Vec::len)
    }

    fn join(
        &self,
        session: &str,
        id: Uuid,
        tx: mpsc::UnboundedSender<String>,
        max_sessions: usize,
    ) -> std::result::Result<usize, String> {
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(session) && sessions.len() >= max_sessions {
            return Err(format!("relay at capacity ({} sessions)", max_sessions));
        }
        let members = sessions.entry(session.to_string()).or_default();
        if members.len() >= SESSION_CAPACITY {
            return Err(format!("session {} is full", session));
        }
        members.push(RelayMember { id, tx });
        Ok(members.len())
    }

    fn leave(&self, session: &str, id: Uuid) {
        let mut sessions = self.sessions.write();
        if let Some(members) = sessions.get_mut(session) {
            members.retain(|m| m.id != id);
            if members.is_empty() {
                sessions.remove(session);
                debug!(%session, "session closed");
            }
        }
    }

    fn forward(&self, session: &str, from: Uuid, text: &str) {
        let sessions = self.sessions.read();
        let Some(members) = sessions.get(session) else {
            return;
        };
        for member in members.iter().filter(|m| m.id != from) {
            let _ = member.tx.send(text.to_string());
        }
    }
}

/// WebSocket signaling relay
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<RelayState>,
    max_sessions: usize,
}

impl RelayServer {
    /// Bind the listening socket
    pub async fn bind(config: RelayServerConfig) -> Result<Self> {
        if config.max_sessions == 0 {
            return Err(Error::InvalidConfig(
                "max_sessions must be greater than 0".to_string(),
            ));
        }
        let listener = TcpListener::bind(config.bind_addr).await?;
        Ok(Self {
            listener,
            state: Arc::new(RelayState::default()),
            max_sessions: config.max_sessions,
        })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    /// Accept connections until a shutdown signal arrives
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let addr = self.local_addr()?;
        info!("Signaling relay listening on ws://{}", addr);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!("Accepted relay connection from {}", peer_addr);
                            let state = Arc::clone(&self.state);
                            let max_sessions = self.max_sessions;
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, state, max_sessions).await {
                                    warn!("Relay connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept relay connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Signaling relay shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Run on a background task
    pub fn spawn(self) -> Result<RelayServerHandle> {
        let addr = self.local_addr()?;
        let state = self.state();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(self.run(shutdown_rx));
        Ok(RelayServerHandle {
            addr,
            state,
            shutdown_tx,
            task,
        })
    }
}

/// Handle to a relay running on a background task
pub struct RelayServerHandle {
    addr: SocketAddr,
    state: Arc<RelayState>,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl RelayServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn state(&self) -> Arc<RelayState> {
        Arc::clone(&self.state)
    }

    /// Stop accepting and wait for the accept loop to exit
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Other(anyhow::anyhow!("relay task failed: {}", e))),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<RelayState>,
    max_sessions: usize,
) -> Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let member_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    // Everything written to this client goes through one task, so frames
    // from the other member keep their order.
    let forward_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = ws_tx.send(Message::Text(text)).await {
                debug!("Failed to write to relay client: {}", e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut joined: Option<String> = None;

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Relay client read error: {}", e);
                break;
            }
        };

        let frame = match RelayFrame::from_json(&text) {
            Ok(frame) => frame,
            Err(e) => {
                send_error(&tx, format!("malformed frame: {}", e));
                continue;
            }
        };

        match frame {
            RelayFrame::Join { session } => {
                if joined.is_some() {
                    send_error(&tx, "already joined a session".to_string());
                    continue;
                }
                match state.join(&session, member_id, tx.clone(), max_sessions) {
                    Ok(members) => {
                        info!(%session, member = %member_id, members, "relay member joined");
                        if let Ok(reply) = (RelayFrame::Joined {
                            session: session.clone(),
                            members,
                        })
                        .to_json()
                        {
                            let _ = tx.send(reply);
                        }
                        joined = Some(session);
                    }
                    Err(message) => {
                        warn!(%session, "relay join refused: {}", message);
                        send_error(&tx, message);
                    }
                }
            }
            RelayFrame::Broadcast { .. } => match &joined {
                // Forward the original text: the payload is opaque here.
                Some(session) => state.forward(session, member_id, &text),
                None => send_error(&tx, "broadcast before join".to_string()),
            },
            RelayFrame::Leave => {
                if let Some(session) = joined.take() {
                    state.leave(&session, member_id);
                    info!(%session, member = %member_id, "relay member left");
                }
            }
            RelayFrame::Joined { .. } | RelayFrame::Error { .. } => {
                send_error(&tx, "unexpected frame from client".to_string());
            }
        }
    }

    if let Some(session) = joined.take() {
        state.leave(&session, member_id);
        info!(%session, member = %member_id, "relay member disconnected");
    }

    drop(tx);
    let _ = forward_task.await;
    Ok(())
}

fn send_error(tx: &mpsc::UnboundedSender<String>, message: String) {
    if let Ok(text) = (RelayFrame::Error { message }).to_json() {
        let _ = tx.send(text);
    }
}
