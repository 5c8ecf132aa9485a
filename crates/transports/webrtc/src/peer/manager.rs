//! Peer connection manager
//!
//! Negotiates one peer connection per role over a [`SignalChannel`].
//! Signaling handlers only enqueue; a single driver task owns the
//! transport, the ICE candidate buffer and the state, so an ICE candidate
//! that arrives while the remote description is being applied waits its
//! turn instead of racing it.
//!
//! Receiver (desktop): receive-only video, answers the phone's offer.
//! Sender (phone): attaches the camera stream, announces itself and offers.

use super::ice_buffer::IceCandidateBuffer;
use super::state::PeerConnectionState;
use super::transport::{PeerTransport, PeerTransportProvider, RemoteStream, SdpKind, TransportEvent};
use crate::signaling::channel::SignalChannel;
use crate::signaling::protocol::{IceCandidate, SignalEvent, SignalMessage};
use crate::{Error, Result};
use docscan_core::LocalMediaStream;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Side of the scan a manager negotiates for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Phone: produces video, sends the offer
    Sender,
    /// Desktop: consumes video, sends the answer
    Receiver,
}

/// Notifications for the session that owns the manager
#[derive(Debug, Clone)]
pub enum PeerEvent {
    StateChanged(PeerConnectionState),
    /// Remote media arrived; may precede `Connected`
    RemoteStream(RemoteStream),
}

enum Command {
    Signal(SignalMessage),
    AttachLocalStream {
        stream: LocalMediaStream,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Owns one negotiated peer connection
pub struct PeerConnectionManager {
    role: PeerRole,
    channel: SignalChannel,
    transport: Arc<dyn PeerTransport>,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<PeerConnectionState>,
    events_rx: mpsc::UnboundedReceiver<PeerEvent>,
    driver: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PeerConnectionManager {
    /// Create the connection and subscribe to negotiation messages
    ///
    /// The receiver prepares its receive-only video transceiver here.
    pub async fn new(
        role: PeerRole,
        channel: SignalChannel,
        provider: &dyn PeerTransportProvider,
    ) -> Result<Self> {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = provider.create(transport_tx).await?;

        if role == PeerRole::Receiver {
            if let Err(e) = transport.prepare_receive_video().await {
                let _ = transport.close().await;
                return Err(e);
            }
        }

        let (commands, commands_rx) = mpsc::unbounded_channel();
        let subscribed = match role {
            PeerRole::Receiver => [SignalEvent::Offer, SignalEvent::IceCandidate],
            PeerRole::Sender => [SignalEvent::Answer, SignalEvent::IceCandidate],
        };
        for event in subscribed {
            let tx = commands.clone();
            channel.on_event(event, move |message| {
                let _ = tx.send(Command::Signal(message.clone()));
            });
        }

        let (state_tx, state_rx) = watch::channel(PeerConnectionState::New);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let negotiator = Negotiator {
            role,
            channel: channel.clone(),
            transport: Arc::clone(&transport),
            buffer: IceCandidateBuffer::new(),
            state_tx,
            events_tx,
        };
        let driver = tokio::spawn(negotiator.run(commands_rx, transport_rx));

        info!(?role, session = %channel.session_id(), "peer connection manager started");

        Ok(Self {
            role,
            channel,
            transport,
            commands,
            state_rx,
            events_rx,
            driver: Mutex::new(Some(driver)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn channel(&self) -> &SignalChannel {
        &self.channel
    }

    pub fn state(&self) -> PeerConnectionState {
        *self.state_rx.borrow()
    }

    /// Subscribe to state changes
    pub fn watch_state(&self) -> watch::Receiver<PeerConnectionState> {
        self.state_rx.clone()
    }

    /// Next state change or remote stream; `None` once closed
    pub async fn next_event(&mut self) -> Option<PeerEvent> {
        self.events_rx.recv().await
    }

    /// Sender only: attach every track of `stream`, then announce and offer
    ///
    /// Resolves once the offer has been published.
    pub async fn attach_local_stream(&self, stream: &LocalMediaStream) -> Result<()> {
        if self.role != PeerRole::Sender {
            return Err(Error::InvalidState(
                "only the sender attaches a local stream".to_string(),
            ));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::InvalidState("peer connection closed".to_string()));
        }

        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::AttachLocalStream {
                stream: stream.clone(),
                reply,
            })
            .map_err(|_| Error::InvalidState("peer connection closed".to_string()))?;

        reply_rx
            .await
            .map_err(|_| Error::InvalidState("peer connection closed".to_string()))?
    }

    /// Close the connection and leave the channel; buffered candidates are
    /// discarded. Safe to call repeatedly and before negotiation finished.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        if let Err(e) = self.transport.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
        self.channel.leave();

        info!(role = ?self.role, "peer connection manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for PeerConnectionManager {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }

        // Same order as `close`: the connection goes first, then the channel.
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let transport = Arc::clone(&self.transport);
                let channel = self.channel.clone();
                handle.spawn(async move {
                    if let Err(e) = transport.close().await {
                        warn!("Failed to close dropped peer connection: {}", e);
                    }
                    channel.leave();
                });
            }
            Err(_) => {
                debug!("no runtime to close dropped peer connection, leaving channel only");
                self.channel.leave();
            }
        }
    }
}

/// Driver task state
struct Negotiator {
    role: PeerRole,
    channel: SignalChannel,
    transport: Arc<dyn PeerTransport>,
    buffer: IceCandidateBuffer,
    state_tx: watch::Sender<PeerConnectionState>,
    events_tx: mpsc::UnboundedSender<PeerEvent>,
}

impl Negotiator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut transport_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                event = transport_events.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => transport_open = false,
                },
            }
        }

        self.buffer.clear();
        debug!(role = ?self.role, "negotiation driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Signal(SignalMessage::Offer { sdp }) if self.role == PeerRole::Receiver => {
                self.set_state(PeerConnectionState::Connecting);
                if let Err(e) = self.accept_offer(sdp).await {
                    warn!("Failed to answer offer: {}", e);
                    self.set_state(PeerConnectionState::Failed);
                }
            }
            Command::Signal(SignalMessage::Answer { sdp }) if self.role == PeerRole::Sender => {
                if let Err(e) = self.accept_answer(sdp).await {
                    warn!("Failed to apply answer: {}", e);
                    self.set_state(PeerConnectionState::Failed);
                }
            }
            Command::Signal(SignalMessage::IceCandidate { candidate }) => {
                match self.buffer.offer(candidate) {
                    Some(candidate) => self.apply_candidate(candidate).await,
                    None => debug!(
                        pending = self.buffer.pending(),
                        "buffered remote ICE candidate"
                    ),
                }
            }
            Command::Signal(other) => {
                debug!(event = %other.event(), role = ?self.role, "ignoring signaling message");
            }
            Command::AttachLocalStream { stream, reply } => {
                let result = self.start_offer(&stream).await;
                if let Err(e) = &result {
                    warn!("Failed to start negotiation: {}", e);
                    if e.is_negotiation_error() {
                        self.set_state(PeerConnectionState::Failed);
                    }
                }
                let _ = reply.send(result);
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.channel.send(SignalMessage::ice_candidate(candidate)) {
                    debug!("Dropping local ICE candidate: {}", e);
                }
            }
            TransportEvent::StateChanged(state) => self.set_state(state),
            TransportEvent::RemoteTrack(stream) => {
                info!(stream = %stream.stream_id, kind = stream.kind.as_str(), "remote stream arrived");
                let _ = self.events_tx.send(PeerEvent::RemoteStream(stream));
            }
        }
    }

    #[instrument(skip_all, fields(role = ?self.role))]
    async fn accept_offer(&mut self, sdp: String) -> Result<()> {
        self.transport
            .set_remote_description(SdpKind::Offer, sdp)
            .await?;
        self.flush_candidates().await;

        let answer = self.transport.create_answer().await?;
        self.channel.send(SignalMessage::answer(answer))?;
        debug!("answer published");
        Ok(())
    }

    #[instrument(skip_all, fields(role = ?self.role))]
    async fn accept_answer(&mut self, sdp: String) -> Result<()> {
        self.transport
            .set_remote_description(SdpKind::Answer, sdp)
            .await?;
        self.flush_candidates().await;
        debug!("answer applied");
        Ok(())
    }

    #[instrument(skip_all, fields(role = ?self.role))]
    async fn start_offer(&mut self, stream: &LocalMediaStream) -> Result<()> {
        self.transport.add_local_stream(stream).await?;
        self.set_state(PeerConnectionState::Connecting);

        self.channel.send(SignalMessage::PhoneConnected {})?;
        let offer = self.transport.create_offer().await?;
        self.channel.send(SignalMessage::offer(offer))?;
        debug!("offer published");
        Ok(())
    }

    async fn flush_candidates(&mut self) {
        let pending = self.buffer.mark_remote_description_set();
        if !pending.is_empty() {
            debug!(count = pending.len(), "flushing buffered ICE candidates");
        }
        for candidate in pending {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&self, candidate: IceCandidate) {
        // Late or duplicate candidates are expected; they are not errors.
        if let Err(e) = self.transport.add_ice_candidate(candidate).await {
            debug!("Ignoring ICE candidate that failed to apply: {}", e);
        }
    }

    fn set_state(&self, state: PeerConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(role = ?self.role, %state, "peer connection state changed");
            let _ = self.events_tx.send(PeerEvent::StateChanged(state));
        }
    }
}
