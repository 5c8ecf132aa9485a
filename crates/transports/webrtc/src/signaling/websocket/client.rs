//! WebSocket signaling client
//!
//! Connects to a [`RelayServer`](super::RelayServer) (or any relay speaking
//! the same framing), joins the session channel and bridges it to a
//! [`SignalChannel`].

use crate::signaling::channel::{ChannelCache, SignalChannel, SignalingTransport};
use crate::signaling::protocol::{RelayFrame, SignalMessage};
use crate::{Error, Result};
use async_trait::async_trait;
use docscan_core::SessionId;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};

/// Default wait for the relay to confirm a join
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Signaling over a WebSocket relay
pub struct WebSocketSignaling {
    url: String,
    join_timeout: Duration,
    channels: ChannelCache,
}

impl WebSocketSignaling {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            channels: ChannelCache::default(),
        }
    }

    /// Override how long to wait for the relay's `joined`
    pub fn with_join_timeout(mut self, join_timeout: Duration) -> Self {
        self.join_timeout = join_timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self, session: &SessionId) -> Result<SignalChannel> {
        let (ws_stream, _) = timeout(self.join_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| Error::Connect(format!("timed out connecting to {}", self.url)))?
            .map_err(|e| Error::Connect(format!("failed to connect to {}: {}", self.url, e)))?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let room = session.channel_name();
        let join = RelayFrame::Join {
            session: room.clone(),
        }
        .to_json()?;
        ws_tx
            .send(Message::Text(join))
            .await
            .map_err(|e| Error::Connect(format!("failed to send join: {}", e)))?;

        let wait_joined = async {
            while let Some(msg) = ws_rx.next().await {
                let text = match msg {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => return Err(Error::Connect(e.to_string())),
                };
                match RelayFrame::from_json(&text)? {
                    RelayFrame::Joined { members, .. } => return Ok(members),
                    RelayFrame::Error { message } if message.contains("full") => {
                        return Err(Error::SessionFull(message));
                    }
                    RelayFrame::Error { message } => return Err(Error::Connect(message)),
                    other => debug!(?other, "ignoring frame before join confirmation"),
                }
            }
            Err(Error::Connect("relay closed before confirming join".to_string()))
        };
        let members = timeout(self.join_timeout, wait_joined)
            .await
            .map_err(|_| Error::Connect(format!("no join confirmation for {}", room)))??;
        info!(%room, members, "joined signaling relay");

        // Writer: outbound queue -> broadcast frames; `leave` once the queue closes.
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalMessage>();
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let frame = match message.to_value() {
                    Ok(value) => RelayFrame::Broadcast { message: value },
                    Err(e) => {
                        warn!("Dropping unserializable signaling message: {}", e);
                        continue;
                    }
                };
                let text = match frame.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Dropping unserializable relay frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    warn!("Failed to send signaling message: {}", e);
                    return;
                }
            }

            if let Ok(leave) = RelayFrame::Leave.to_json() {
                let _ = ws_tx.send(Message::Text(leave)).await;
            }
            let _ = ws_tx.close().await;
            debug!("signaling writer closed");
        });

        // Reader: broadcast frames -> inbound queue.
        let (in_tx, in_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => match RelayFrame::from_json(&text) {
                        Ok(RelayFrame::Broadcast { message }) => {
                            match SignalMessage::from_value(message) {
                                Ok(signal) => {
                                    if in_tx.send(signal).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => debug!("Dropping undecodable signaling message: {}", e),
                            }
                        }
                        Ok(RelayFrame::Error { message }) => warn!("Relay error: {}", message),
                        Ok(_) => {}
                        Err(e) => debug!("Dropping undecodable relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => {
                        info!("Signaling relay closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling connection error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(SignalChannel::open(
            session.clone(),
            out_tx,
            in_rx,
            move || reader.abort(),
        ))
    }
}

#[async_trait]
impl SignalingTransport for WebSocketSignaling {
    async fn join(&self, session: &SessionId) -> Result<SignalChannel> {
        self.channels
            .get_or_join(session, || self.connect(session))
            .await
    }
}
