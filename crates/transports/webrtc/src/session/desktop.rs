//! Desktop scan orchestrator
//!
//! `connect -> scanning -> processing -> review -> confirm`
//!
//! The desktop generates the session id, waits for the phone's video, counts
//! captured pages as the phone announces them, runs extraction when the
//! phone finishes, and submits the reviewed record.

use crate::config::ScanTransportConfig;
use crate::peer::{
    PeerConnectionManager, PeerConnectionState, PeerEvent, PeerRole, PeerTransportProvider,
    RemoteStream,
};
use crate::signaling::{SignalEvent, SignalMessage, SignalingTransport};
use crate::{Error, Result};
use docscan_core::{
    EditableRecord, ExtractionService, FieldErrors, RecordStore, ScanReference, SessionId,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Desktop flow step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopStep {
    Connect,
    Scanning,
    Processing,
    Review,
    Confirm,
}

/// Everything the desktop UI renders
#[derive(Debug, Clone)]
pub struct DesktopView {
    pub step: DesktopStep,
    pub session_id: SessionId,
    /// Link encoded in the QR code for the phone
    pub scan_url: String,
    pub phone_connected: bool,
    pub connection: PeerConnectionState,
    pub remote_stream: Option<RemoteStream>,
    /// Highest page count the phone has announced
    pub page_count: u32,
    /// Final count from the phone's `done`
    pub total_pages: Option<u32>,
    /// No video arrived within the connect timeout
    pub timed_out: bool,
    pub extraction_error: Option<String>,
    pub record: EditableRecord,
    pub field_errors: FieldErrors,
    pub patient_id: Option<String>,
}

impl DesktopView {
    fn fresh(session_id: SessionId, base_url: &str) -> Self {
        Self {
            step: DesktopStep::Connect,
            scan_url: session_id.scan_url(base_url),
            session_id,
            phone_connected: false,
            connection: PeerConnectionState::New,
            remote_stream: None,
            page_count: 0,
            total_pages: None,
            timed_out: false,
            extraction_error: None,
            record: EditableRecord::default(),
            field_errors: FieldErrors::default(),
            patient_id: None,
        }
    }
}

/// External services the desktop flow calls
#[derive(Clone)]
pub struct DesktopCollaborators {
    pub extraction: Arc<dyn ExtractionService>,
    pub records: Arc<dyn RecordStore>,
    /// Care pathway pre-selected on the review form
    pub default_pathway: Option<String>,
}

/// Result of [`DesktopSession::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Patient created; the session moved to `confirm`
    Created(String),
    /// Validation failed; the session stays in `review`
    Rejected(FieldErrors),
}

enum Next {
    Peer(Option<PeerEvent>),
    App(Option<SignalMessage>),
    ConnectTimeout,
    Closed,
}

/// Desktop side of one scan
pub struct DesktopSession {
    config: ScanTransportConfig,
    join_base: String,
    signaling: Arc<dyn SignalingTransport>,
    provider: Arc<dyn PeerTransportProvider>,
    collaborators: DesktopCollaborators,
    manager: PeerConnectionManager,
    app_rx: mpsc::UnboundedReceiver<SignalMessage>,
    peer_open: bool,
    app_open: bool,
    deadline: Instant,
    view_tx: watch::Sender<DesktopView>,
}

impl DesktopSession {
    /// Generate a session id, join its channel and wait for the phone
    pub async fn connect(
        signaling: Arc<dyn SignalingTransport>,
        provider: Arc<dyn PeerTransportProvider>,
        collaborators: DesktopCollaborators,
        config: ScanTransportConfig,
    ) -> Result<Self> {
        config.validate()?;

        let join_base = config.join_base_url();
        let session_id = SessionId::generate();
        let (manager, app_rx) = open(&session_id, signaling.as_ref(), provider.as_ref()).await?;
        let (view_tx, _) = watch::channel(DesktopView::fresh(session_id.clone(), &join_base));

        info!(
            session = %session_id,
            scan_url = %view_tx.borrow().scan_url,
            "desktop scan session waiting for phone"
        );

        Ok(Self {
            deadline: Instant::now() + config.connect_timeout(),
            config,
            join_base,
            signaling,
            provider,
            collaborators,
            manager,
            app_rx,
            peer_open: true,
            app_open: true,
            view_tx,
        })
    }

    /// Subscribe to view updates
    pub fn view(&self) -> watch::Receiver<DesktopView> {
        self.view_tx.subscribe()
    }

    pub fn snapshot(&self) -> DesktopView {
        self.view_tx.borrow().clone()
    }

    pub fn step(&self) -> DesktopStep {
        self.view_tx.borrow().step
    }

    pub fn session_id(&self) -> SessionId {
        self.view_tx.borrow().session_id.clone()
    }

    pub fn scan_url(&self) -> String {
        self.view_tx.borrow().scan_url.clone()
    }

    /// Wait for and handle the next peer event, phone message or timeout
    ///
    /// # Errors
    ///
    /// `ChannelClosed` once neither the peer connection nor the signaling
    /// channel can produce anything more.
    pub async fn process_next(&mut self) -> Result<()> {
        let waiting_for_phone = {
            let view = self.view_tx.borrow();
            view.step == DesktopStep::Connect && !view.timed_out
        };
        let deadline = self.deadline;

        let next = tokio::select! {
            event = self.manager.next_event(), if self.peer_open => Next::Peer(event),
            message = self.app_rx.recv(), if self.app_open => Next::App(message),
            _ = sleep_until(deadline), if waiting_for_phone => Next::ConnectTimeout,
            else => Next::Closed,
        };

        match next {
            Next::Peer(Some(event)) => self.on_peer_event(event),
            Next::Peer(None) => self.peer_open = false,
            Next::App(Some(message)) => self.on_app_message(message).await,
            Next::App(None) => self.app_open = false,
            Next::ConnectTimeout => {
                warn!(session = %self.session_id(), "no video from phone before timeout");
                self.view_tx.send_modify(|v| v.timed_out = true);
            }
            Next::Closed => return Err(Error::ChannelClosed),
        }
        Ok(())
    }

    fn on_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::StateChanged(state) => {
                self.view_tx.send_modify(|v| v.connection = state);
            }
            // The first track is the trigger, not the aggregate `connected` state.
            PeerEvent::RemoteStream(stream) => {
                self.view_tx.send_modify(|v| {
                    if v.step == DesktopStep::Connect {
                        info!(session = %v.session_id, "phone video arrived, scanning");
                        v.step = DesktopStep::Scanning;
                        v.timed_out = false;
                    }
                    v.remote_stream = Some(stream);
                });
            }
        }
    }

    async fn on_app_message(&mut self, message: SignalMessage) {
        match message {
            SignalMessage::PhoneConnected {} => {
                self.view_tx.send_modify(|v| v.phone_connected = true);
            }
            SignalMessage::PageCaptured { page_number } => {
                self.view_tx.send_modify(|v| {
                    if matches!(v.step, DesktopStep::Connect | DesktopStep::Scanning) {
                        // Never decremented: retakes are not announced.
                        v.page_count = v.page_count.max(page_number);
                    }
                });
            }
            SignalMessage::ScanDone { total_pages } => {
                let started = self.view_tx.send_if_modified(|v| {
                    if !matches!(v.step, DesktopStep::Connect | DesktopStep::Scanning) {
                        return false;
                    }
                    v.step = DesktopStep::Processing;
                    // The running count keeps its high-water mark; the
                    // phone's final set is reported separately.
                    v.total_pages = Some(total_pages);
                    true
                });
                if started {
                    info!(total_pages, "phone finished scanning, extracting");
                    if let Err(e) = self.run_extraction().await {
                        warn!("Extraction failed: {}", e);
                    }
                } else {
                    debug!("ignoring scan-done outside of scanning");
                }
            }
            other => debug!(event = %other.event(), "ignoring app message"),
        }
    }

    async fn run_extraction(&mut self) -> Result<()> {
        let scan = {
            let view = self.view_tx.borrow();
            ScanReference {
                session_id: view.session_id.clone(),
                total_pages: view.total_pages.unwrap_or(view.page_count),
            }
        };

        match self.collaborators.extraction.extract(&scan).await {
            Ok(extracted) => {
                let record = EditableRecord::from_extracted(
                    &extracted,
                    self.collaborators.default_pathway.as_deref(),
                );
                self.view_tx.send_modify(|v| {
                    v.record = record;
                    v.extraction_error = None;
                    v.field_errors = FieldErrors::default();
                    v.step = DesktopStep::Review;
                });
                Ok(())
            }
            Err(e) => {
                self.view_tx
                    .send_modify(|v| v.extraction_error = Some(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Re-run extraction after a failure
    pub async fn retry_extraction(&mut self) -> Result<()> {
        if self.step() != DesktopStep::Processing {
            return Err(Error::InvalidState(
                "extraction only runs while processing".to_string(),
            ));
        }
        self.run_extraction().await
    }

    /// Edit the review form
    pub fn update_record<F>(&mut self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut EditableRecord),
    {
        if self.step() != DesktopStep::Review {
            return Err(Error::InvalidState(
                "the record can only be edited during review".to_string(),
            ));
        }
        self.view_tx.send_modify(|v| edit(&mut v.record));
        Ok(())
    }

    /// Validate and submit the reviewed record
    pub async fn submit(&mut self) -> Result<SubmitOutcome> {
        let (input, session_id) = {
            let view = self.view_tx.borrow();
            if view.step != DesktopStep::Review {
                return Err(Error::InvalidState(
                    "only a reviewed record can be submitted".to_string(),
                ));
            }
            (
                view.record.to_confirm_input(Some(view.session_id.as_str())),
                view.session_id.clone(),
            )
        };

        if let Err(errors) = input.validate() {
            self.view_tx
                .send_modify(|v| v.field_errors = errors.clone());
            return Ok(SubmitOutcome::Rejected(errors));
        }

        match self.collaborators.records.create_patient(&input).await {
            Ok(patient_id) => {
                info!(session = %session_id, patient = %patient_id, "patient created from scan");
                self.view_tx.send_modify(|v| {
                    v.field_errors = FieldErrors::default();
                    v.patient_id = Some(patient_id.clone());
                    v.step = DesktopStep::Confirm;
                });
                Ok(SubmitOutcome::Created(patient_id))
            }
            Err(e) => {
                warn!("Record creation failed: {}", e);
                let errors = e.into_field_errors();
                self.view_tx
                    .send_modify(|v| v.field_errors = errors.clone());
                Ok(SubmitOutcome::Rejected(errors))
            }
        }
    }

    /// Tear down and start over with a fresh session id
    pub async fn restart(&mut self) -> Result<()> {
        self.manager.close().await;

        let session_id = SessionId::generate();
        let (manager, app_rx) = open(
            &session_id,
            self.signaling.as_ref(),
            self.provider.as_ref(),
        )
        .await?;

        self.manager = manager;
        self.app_rx = app_rx;
        self.peer_open = true;
        self.app_open = true;
        self.deadline = Instant::now() + self.config.connect_timeout();
        self.view_tx
            .send_replace(DesktopView::fresh(session_id.clone(), &self.join_base));

        info!(session = %session_id, "desktop scan session restarted");
        Ok(())
    }

    /// Close the peer connection and leave the channel
    pub async fn shutdown(&mut self) {
        self.manager.close().await;
    }
}

/// Join the session channel, subscribe to app events, start the receiver
async fn open(
    session_id: &SessionId,
    signaling: &dyn SignalingTransport,
    provider: &dyn PeerTransportProvider,
) -> Result<(PeerConnectionManager, mpsc::UnboundedReceiver<SignalMessage>)> {
    let channel = signaling.join(session_id).await?;

    let (app_tx, app_rx) = mpsc::unbounded_channel();
    for event in [
        SignalEvent::PhoneConnected,
        SignalEvent::PageCaptured,
        SignalEvent::ScanDone,
    ] {
        let tx = app_tx.clone();
        channel.on_event(event, move |message| {
            let _ = tx.send(message.clone());
        });
    }

    let manager = match PeerConnectionManager::new(PeerRole::Receiver, channel.clone(), provider).await {
        Ok(manager) => manager,
        Err(e) => {
            channel.leave();
            return Err(e);
        }
    };
    Ok((manager, app_rx))
}
