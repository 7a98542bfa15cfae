//! Stream lifecycle controller
//!
//! Drives the host flow (credential check, media, signaling records, peer
//! session) and the viewer flow (offer lookup, answer), and tears both down.
//! At most one stream runs per controller. Starts while anything is already
//! in progress are ignored.

use crate::auth::{AllowAll, Authenticator, CredentialGate, Identity};
use crate::config::StreamConfig;
use crate::event::{Event, EventSink, EventStream};
use crate::session::{CancelToken, PeerSession, SessionContext};
use crate::stream::{
    Clock, StartOutcome, StreamId, StreamSession, StreamState, SystemClock,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use streamrtc_core::{DocumentStore, StreamRtcError, TrackKind, TransportFactory};
use streamrtc_diagnostics::{ConnectionAnalyzer, ConnectionInfo};
use streamrtc_media::{
    DisplaySink, LocalMediaStream, MediaCapture, RecordingSink, SinkSource,
};
use streamrtc_signaling::protocol::LIVE_FIELD;
use streamrtc_signaling::{
    make_channel_refs, serialize_stream_record, stream_record_ref, ChannelRefs, RawValue, Role,
    SignalChannel, SignalObserver, StreamRecord,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Builder for [`StreamController`]
#[derive(Debug, Default)]
pub struct StreamControllerBuilder {
    config: StreamConfig,
    store: Option<Arc<dyn DocumentStore>>,
    transport: Option<Arc<dyn TransportFactory>>,
    capture: Option<Arc<dyn MediaCapture>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    gate: Option<Arc<dyn CredentialGate>>,
    local_sink: Option<Arc<dyn DisplaySink>>,
    remote_sink: Option<Arc<dyn DisplaySink>>,
    clock: Option<Arc<dyn Clock>>,
    observers: Vec<Arc<dyn SignalObserver>>,
}

impl StreamControllerBuilder {
    /// Use this configuration instead of the defaults
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = config;
        self
    }

    /// Document store used as the signaling channel (required)
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Peer connection factory (required)
    pub fn transport(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(factory);
        self
    }

    /// Camera/microphone/screen source (required)
    pub fn capture(mut self, capture: Arc<dyn MediaCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Source of the signed-in user (required)
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Check run before hosting; defaults to [`AllowAll`]
    pub fn credential_gate(mut self, gate: Arc<dyn CredentialGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sink for the local preview; defaults to a [`RecordingSink`]
    pub fn local_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.local_sink = Some(sink);
        self
    }

    /// Sink for remote media; defaults to a [`RecordingSink`]
    pub fn remote_sink(mut self, sink: Arc<dyn DisplaySink>) -> Self {
        self.remote_sink = Some(sink);
        self
    }

    /// Source of stream creation times; defaults to the wall clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Also report every signal write to `observer`
    pub fn observer(mut self, observer: Arc<dyn SignalObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Build the controller
    pub fn build(self) -> Result<StreamController, StreamRtcError> {
        fn required<T>(value: Option<T>, field: &str) -> Result<T, StreamRtcError> {
            value.ok_or_else(|| StreamRtcError::MissingConfiguration {
                field: field.to_string(),
            })
        }

        let store = required(self.store, "store")?;
        let factory = required(self.transport, "transport")?;
        let capture = required(self.capture, "capture")?;
        let auth = required(self.authenticator, "authenticator")?;

        let channel = SignalChannel::new(store);
        for observer in self.observers {
            channel.add_observer(observer);
        }

        let (events, receiver) = EventSink::new();
        let ctx = SessionContext {
            channel,
            factory,
            config: self.config,
            remote_sink: self
                .remote_sink
                .unwrap_or_else(|| Arc::new(RecordingSink::new("remote"))),
            events: Arc::new(events),
            analyzer: Arc::new(ConnectionAnalyzer::new()),
        };

        Ok(StreamController {
            inner: Arc::new(ControllerInner {
                ctx,
                capture,
                auth,
                gate: self.gate.unwrap_or_else(|| Arc::new(AllowAll)),
                local_sink: self
                    .local_sink
                    .unwrap_or_else(|| Arc::new(RecordingSink::new("local"))),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                state: Mutex::new(StreamState::Idle),
                epoch: watch::channel(0).0,
                current: Mutex::new(None),
                session: tokio::sync::Mutex::new(None),
                receiver: Mutex::new(Some(receiver)),
            }),
        })
    }
}

#[derive(Debug)]
struct ControllerInner {
    ctx: SessionContext,
    capture: Arc<dyn MediaCapture>,
    auth: Arc<dyn Authenticator>,
    gate: Arc<dyn CredentialGate>,
    local_sink: Arc<dyn DisplaySink>,
    clock: Arc<dyn Clock>,
    state: Mutex<StreamState>,
    /// Bumped by every start and stop; in-flight starts compare against it
    epoch: watch::Sender<u64>,
    current: Mutex<Option<(StreamId, Role)>>,
    session: tokio::sync::Mutex<Option<StreamSession>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
}

/// Host/viewer lifecycle over one signaling store
///
/// Cheap to clone; clones drive the same stream, so a stop issued from one
/// clone cancels a start running on another.
#[derive(Debug, Clone)]
pub struct StreamController {
    inner: Arc<ControllerInner>,
}

impl StreamController {
    /// Start building a controller
    pub fn builder() -> StreamControllerBuilder {
        StreamControllerBuilder::default()
    }

    /// Current state
    pub fn state(&self) -> StreamState {
        *self.inner.state.lock()
    }

    /// Latest status line
    pub fn status(&self) -> String {
        self.inner.ctx.events.current_status()
    }

    /// Id of the running stream, if any
    pub fn current_stream_id(&self) -> Option<StreamId> {
        self.inner.current.lock().as_ref().map(|(id, _)| id.clone())
    }

    /// Event stream; handed out once
    pub fn events(&self) -> Option<EventStream> {
        self.inner.receiver.lock().take().map(EventStream::new)
    }

    /// State of the current or last peer connection
    pub fn connection_info(&self) -> ConnectionInfo {
        self.inner.ctx.analyzer.info()
    }

    /// Configuration in use
    pub fn config(&self) -> &StreamConfig {
        &self.inner.ctx.config
    }

    fn epoch(&self) -> u64 {
        *self.inner.epoch.borrow()
    }

    fn bump(&self) -> u64 {
        let mut next = 0;
        self.inner.epoch.send_modify(|epoch| {
            *epoch += 1;
            next = *epoch;
        });
        next
    }

    fn token(&self, epoch: u64, operation: &'static str) -> CancelToken {
        CancelToken::new(self.inner.epoch.subscribe(), epoch, operation)
    }

    /// Move from idle into `next`; `None` when something is already running
    fn begin(&self, next: StreamState) -> Option<u64> {
        let mut state = self.inner.state.lock();
        if *state != StreamState::Idle {
            info!(state = %*state, requested = %next, "start ignored, already in progress");
            return None;
        }
        *state = next;
        Some(self.bump())
    }

    /// Back to idle when the caller of a start stops waiting for it
    ///
    /// The start's own task notices the new epoch and releases whatever it
    /// acquired.
    fn abandon(&self, epoch: u64) {
        let mut state = self.inner.state.lock();
        if self.epoch() != epoch
            || matches!(
                *state,
                StreamState::Idle | StreamState::Active | StreamState::Watching
            )
        {
            return;
        }
        info!(state = %*state, "start abandoned by its caller");
        self.bump();
        *state = StreamState::Idle;
        drop(state);
        self.inner.ctx.events.status("Idle");
    }

    /// Wait for a spawned start or join to finish
    async fn settle(
        &self,
        epoch: u64,
        work: JoinHandle<Result<StartOutcome, StreamRtcError>>,
    ) -> Result<StartOutcome, StreamRtcError> {
        let mut pending = PendingStart {
            controller: self.clone(),
            epoch,
            armed: true,
        };
        match work.await {
            Ok(outcome) => {
                pending.armed = false;
                outcome
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(StreamRtcError::Cancelled {
                operation: "stream task".to_string(),
            }),
        }
    }

    fn advance(&self, epoch: u64, next: StreamState, operation: &str) -> Result<(), StreamRtcError> {
        let mut state = self.inner.state.lock();
        if self.epoch() != epoch {
            return Err(StreamRtcError::Cancelled {
                operation: operation.to_string(),
            });
        }
        debug!(from = %*state, to = %next, "state change");
        *state = next;
        Ok(())
    }

    fn ensure_current(&self, epoch: u64, operation: &str) -> Result<(), StreamRtcError> {
        if self.epoch() != epoch {
            info!(operation, "superseded by stop");
            return Err(StreamRtcError::Cancelled {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    /// Put the session in place and enter `next`, unless a stop got there first
    async fn commit(
        &self,
        epoch: u64,
        next: StreamState,
        mut session: StreamSession,
        operation: &str,
    ) -> Result<StreamId, StreamRtcError> {
        let mut slot = self.inner.session.lock().await;
        let cancelled = {
            let mut state = self.inner.state.lock();
            if self.epoch() == epoch {
                *state = next;
                false
            } else {
                true
            }
        };
        if cancelled {
            drop(slot);
            self.teardown(&mut session).await;
            return Err(StreamRtcError::Cancelled {
                operation: operation.to_string(),
            });
        }

        let id = session.id.clone();
        *self.inner.current.lock() = Some((id.clone(), session.role));
        *slot = Some(session);
        Ok(id)
    }

    fn fail(&self, epoch: u64, err: &StreamRtcError) {
        if let StreamRtcError::Cancelled { operation } = err {
            info!(operation = %operation, "abandoned after stop");
            return;
        }
        {
            let mut state = self.inner.state.lock();
            if self.epoch() == epoch {
                *state = StreamState::Idle;
            }
        }
        let message = err.user_message();
        error!(code = %err.error_code(), error = %err, "stream operation failed");
        self.inner.ctx.events.emit(Event::Error {
            code: err.error_code(),
            message: message.clone(),
        });
        self.inner.ctx.events.status(message);
    }

    fn identity(&self, operation: &str) -> Result<Identity, StreamRtcError> {
        self.inner
            .auth
            .current()
            .ok_or_else(|| StreamRtcError::NotAuthenticated {
                operation: operation.to_string(),
            })
    }

    /// Host a new stream
    ///
    /// `credential` goes to the credential gate. Returns
    /// [`StartOutcome::AlreadyInProgress`] without doing anything when the
    /// controller is not idle. Any failure leaves the controller idle with no
    /// connection open and no media held.
    ///
    /// The work runs on its own task. Dropping the returned future before it
    /// completes returns the controller to idle, and the task then cleans up
    /// after itself.
    pub async fn start_stream(&self, credential: Option<&str>) -> Result<StartOutcome, StreamRtcError> {
        let epoch = match self.begin(StreamState::ValidatingCredential) {
            Some(epoch) => epoch,
            None => return Ok(StartOutcome::AlreadyInProgress),
        };

        let controller = self.clone();
        let credential = credential.map(str::to_string);
        let work = tokio::spawn(async move { controller.finish_start(epoch, credential).await });
        self.settle(epoch, work).await
    }

    async fn finish_start(
        &self,
        epoch: u64,
        credential: Option<String>,
    ) -> Result<StartOutcome, StreamRtcError> {
        match self.run_start(epoch, credential.as_deref()).await {
            Ok(id) => {
                info!(stream_id = %id, "stream live");
                self.inner.ctx.events.emit(Event::StreamStarted {
                    stream_id: id.to_string(),
                    role: Role::Host,
                });
                self.inner.ctx.events.status("Live");
                Ok(StartOutcome::Started(id))
            }
            Err(e) => {
                self.fail(epoch, &e);
                Err(e)
            }
        }
    }

    async fn run_start(&self, epoch: u64, credential: Option<&str>) -> Result<StreamId, StreamRtcError> {
        let events = &self.inner.ctx.events;
        let identity = self.identity("start stream")?;

        events.status("Checking credentials...");
        self.inner.gate.check(&identity, credential).await?;
        self.advance(epoch, StreamState::AcquiringMedia, "start stream")?;

        events.status("Requesting camera and microphone...");
        let media = self
            .inner
            .capture
            .get_user_media(&self.inner.ctx.config.media)
            .await?;
        if let Err(e) = self.ensure_current(epoch, "start stream") {
            media.stop_all();
            return Err(e);
        }
        self.inner.local_sink.attach(SinkSource::Local(media.clone()));

        let created = self.inner.clock.now_millis();
        let id = StreamId::compose(&identity.uid, created);
        let mut peer = PeerSession::new(self.inner.ctx.clone(), &identity.uid, Role::Host);

        let published = self
            .publish(epoch, &identity, &id, created, &mut peer, &media)
            .await;
        let refs = match published {
            Ok(refs) => refs,
            Err(e) => {
                peer.stop().await;
                media.stop_all();
                self.inner.local_sink.detach();
                self.mark_offline(&id).await;
                return Err(e);
            }
        };

        let session = StreamSession {
            id: id.clone(),
            role: Role::Host,
            refs,
            peer,
            local_media: Some(media),
            screen: None,
            started_at: Utc::now(),
        };
        let result = self
            .commit(epoch, StreamState::Active, session, "start stream")
            .await;
        if result.is_err() {
            self.mark_offline(&id).await;
        }
        result
    }

    async fn publish(
        &self,
        epoch: u64,
        identity: &Identity,
        id: &StreamId,
        created: i64,
        peer: &mut PeerSession,
        media: &LocalMediaStream,
    ) -> Result<ChannelRefs, StreamRtcError> {
        let channel = &self.inner.ctx.channel;
        let refs = make_channel_refs(id.as_str())?;

        let listing = serialize_stream_record(&StreamRecord {
            host_id: identity.uid.clone(),
            host_name: Some(identity.name().to_string()),
            is_live: true,
            created_at: created,
        })?;
        channel
            .safe_set(&stream_record_ref(id.as_str())?, listing, "stream record")
            .await?;

        let base = RawValue::object()
            .with("hostId", identity.uid.as_str())
            .with(LIVE_FIELD, true)
            .with("createdAt", created);
        channel.safe_set(&refs.base, base, "signaling record").await?;

        self.inner.ctx.events.status("Connecting...");
        let token = self.token(epoch, "start stream");
        token.check()?;
        peer.create_connection().await?;
        peer.start_host(&refs, media, &token).await?;
        self.ensure_current(epoch, "start stream")?;
        Ok(refs)
    }

    async fn mark_offline(&self, id: &StreamId) {
        let channel = &self.inner.ctx.channel;
        let offline = || RawValue::object().with(LIVE_FIELD, false);

        match stream_record_ref(id.as_str()) {
            Ok(listing) => {
                if let Err(e) = channel.safe_set(&listing, offline(), "stream stop").await {
                    warn!(stream_id = %id, error = %e, "could not mark stream record offline");
                }
            }
            Err(e) => warn!(stream_id = %id, error = %e, "bad stream record path"),
        }
        match make_channel_refs(id.as_str()) {
            Ok(refs) => {
                if let Err(e) = channel.safe_set(&refs.base, offline(), "signaling stop").await {
                    warn!(stream_id = %id, error = %e, "could not mark signaling record offline");
                }
            }
            Err(e) => warn!(stream_id = %id, error = %e, "bad signaling path"),
        }
    }

    /// Stop hosting or watching
    ///
    /// Cancels a start still in flight. Always ends idle; failures to mark
    /// the records offline are logged and ignored.
    pub async fn stop_stream(&self) {
        let epoch = {
            let state = self.inner.state.lock();
            debug!(state = %*state, "stop requested");
            self.bump()
        };

        let taken = self.inner.session.lock().await.take();
        if let Some(mut session) = taken {
            self.teardown(&mut session).await;
            if session.role == Role::Host {
                self.mark_offline(&session.id).await;
            }
            self.inner.ctx.events.emit(Event::StreamStopped {
                stream_id: session.id.to_string(),
                role: session.role,
            });
            info!(stream_id = %session.id, role = %session.role, "stream stopped");
        }

        let mut state = self.inner.state.lock();
        // a start that began after this stop keeps its state
        if self.epoch() == epoch {
            *state = StreamState::Idle;
            *self.inner.current.lock() = None;
            drop(state);
            self.inner.ctx.events.status("Idle");
        }
    }

    async fn teardown(&self, session: &mut StreamSession) {
        session.peer.stop().await;
        session.release_media();
        if session.local_media.is_some() {
            self.inner.local_sink.detach();
        }
    }

    /// Watch someone else's stream
    ///
    /// A stop while the offer is still being polled for abandons the join
    /// before any connection is created or answer written. Like
    /// [`start_stream`](Self::start_stream), dropping the future returns the
    /// controller to idle.
    pub async fn join_stream(&self, stream_id: &str) -> Result<StartOutcome, StreamRtcError> {
        let epoch = match self.begin(StreamState::Joining) {
            Some(epoch) => epoch,
            None => return Ok(StartOutcome::AlreadyInProgress),
        };

        let controller = self.clone();
        let stream_id = stream_id.to_string();
        let work = tokio::spawn(async move { controller.finish_join(epoch, &stream_id).await });
        self.settle(epoch, work).await
    }

    async fn finish_join(&self, epoch: u64, stream_id: &str) -> Result<StartOutcome, StreamRtcError> {
        match self.run_join(epoch, stream_id).await {
            Ok(id) => {
                info!(stream_id = %id, "watching");
                self.inner.ctx.events.emit(Event::StreamStarted {
                    stream_id: id.to_string(),
                    role: Role::Viewer,
                });
                self.inner.ctx.events.status("Watching");
                Ok(StartOutcome::Started(id))
            }
            Err(e) => {
                self.fail(epoch, &e);
                Err(e)
            }
        }
    }

    async fn run_join(&self, epoch: u64, stream_id: &str) -> Result<StreamId, StreamRtcError> {
        let identity = self.identity("join stream")?;
        let refs = make_channel_refs(stream_id)?;
        self.inner.ctx.events.status("Looking for the stream...");

        let mut peer = PeerSession::new(self.inner.ctx.clone(), &identity.uid, Role::Viewer);
        let mut token = self.token(epoch, "join stream");
        let joined = async {
            peer.join_as_viewer(&refs, &mut token).await?;
            self.ensure_current(epoch, "join stream")
        }
        .await;
        if let Err(e) = joined {
            peer.stop().await;
            return Err(e);
        }

        let session = StreamSession {
            id: StreamId::from_existing(stream_id),
            role: Role::Viewer,
            refs,
            peer,
            local_media: None,
            screen: None,
            started_at: Utc::now(),
        };
        self.commit(epoch, StreamState::Watching, session, "join stream")
            .await
    }

    /// Stop watching; writes nothing to the store
    pub async fn leave_stream(&self) -> Result<(), StreamRtcError> {
        let role = self.inner.current.lock().as_ref().map(|(_, role)| *role);
        match role {
            Some(Role::Host) => Err(StreamRtcError::InvalidState {
                expected: StreamState::Watching.to_string(),
                actual: self.state().to_string(),
            }),
            _ => {
                self.stop_stream().await;
                Ok(())
            }
        }
    }

    fn hosted<'a>(
        &self,
        slot: &'a mut Option<StreamSession>,
    ) -> Result<&'a mut StreamSession, StreamRtcError> {
        match slot.as_mut() {
            Some(session) if session.role == Role::Host => Ok(session),
            _ => Err(StreamRtcError::InvalidState {
                expected: StreamState::Active.to_string(),
                actual: self.state().to_string(),
            }),
        }
    }

    /// Mute or unmute the microphone; returns how many tracks changed
    pub async fn toggle_audio(&self, enabled: bool) -> Result<usize, StreamRtcError> {
        self.toggle(TrackKind::Audio, enabled).await
    }

    /// Turn the camera on or off; returns how many tracks changed
    pub async fn toggle_video(&self, enabled: bool) -> Result<usize, StreamRtcError> {
        self.toggle(TrackKind::Video, enabled).await
    }

    async fn toggle(&self, kind: TrackKind, enabled: bool) -> Result<usize, StreamRtcError> {
        let mut slot = self.inner.session.lock().await;
        let session = self.hosted(&mut slot)?;
        let media = session
            .local_media
            .as_ref()
            .ok_or_else(|| StreamRtcError::InvalidState {
                expected: "local media".to_string(),
                actual: "none".to_string(),
            })?;
        Ok(media.set_enabled(kind, enabled))
    }

    /// Send the screen instead of the camera
    pub async fn share_screen(&self) -> Result<(), StreamRtcError> {
        let mut slot = self.inner.session.lock().await;
        let session = self.hosted(&mut slot)?;

        let screen = self.inner.capture.get_display_media().await?;
        let track = match screen.video_track() {
            Some(track) => track,
            None => {
                screen.stop_all();
                return Err(StreamRtcError::MediaAcquisition {
                    reason: "display capture returned no video track".to_string(),
                });
            }
        };

        if let Err(e) = session.peer.replace_video(track.info(screen.id())).await {
            screen.stop_all();
            return Err(e);
        }
        if let Some(previous) = session.screen.replace(screen.clone()) {
            previous.stop_all();
        }
        self.inner.local_sink.attach(SinkSource::Local(screen));
        info!(stream_id = %session.id, "screen share started");
        Ok(())
    }

    /// Go back to the camera after [`share_screen`](Self::share_screen)
    pub async fn stop_screen_share(&self) -> Result<(), StreamRtcError> {
        let mut slot = self.inner.session.lock().await;
        let session = self.hosted(&mut slot)?;
        let screen = match session.screen.take() {
            Some(screen) => screen,
            None => return Ok(()),
        };
        screen.stop_all();

        if let Some(media) = session.local_media.clone() {
            if let Some(camera) = media.video_track() {
                session.peer.replace_video(camera.info(media.id())).await?;
            }
            self.inner.local_sink.attach(SinkSource::Local(media));
        }
        info!(stream_id = %session.id, "screen share stopped");
        Ok(())
    }
}

/// Armed while a caller waits on a spawned start or join
struct PendingStart {
    controller: StreamController,
    epoch: u64,
    armed: bool,
}

impl Drop for PendingStart {
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon(self.epoch);
        }
    }
}
