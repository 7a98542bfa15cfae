//! Peer session
//!
//! Owns one peer connection and the signaling around it. Handlers for the
//! connection's events are installed when the connection is created and
//! live in a task owned by the session; the subscriptions that apply remote
//! answers and candidates are tasks too. Stopping the session aborts all of
//! them and closes the connection.

use crate::config::{CandidatePolicy, StreamConfig};
use crate::event::{Event, EventSink};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamrtc_core::{
    IceCandidateInit, OfferOptions, PeerConnectionState, PeerEvent, PeerEvents, PeerTransport,
    SdpType, SessionDescription, StreamRtcError, TrackInfo, TrackKind, TransportFactory,
};
use streamrtc_diagnostics::ConnectionAnalyzer;
use streamrtc_media::{DisplaySink, LocalMediaStream, SinkSource};
use streamrtc_signaling::codec::{decode_answer, decode_base, decode_candidate};
use streamrtc_signaling::protocol::{LIVE_FIELD, OFFER_FIELD};
use streamrtc_signaling::{
    serialize_answer, serialize_ice_candidate, serialize_offer, AddedRecords, ChannelRefs,
    RawValue, Role, SignalChannel,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Collaborators shared by every session a controller creates
#[derive(Debug, Clone)]
pub(crate) struct SessionContext {
    pub(crate) channel: SignalChannel,
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) config: StreamConfig,
    pub(crate) remote_sink: Arc<dyn DisplaySink>,
    pub(crate) events: Arc<EventSink>,
    pub(crate) analyzer: Arc<ConnectionAnalyzer>,
}

/// Lets a stop abandon a host or viewer flow between its steps
///
/// Holds the epoch the flow started under; any later epoch means a stop
/// (or a newer start) has taken over.
#[derive(Debug)]
pub(crate) struct CancelToken {
    epoch: u64,
    watch: watch::Receiver<u64>,
    operation: &'static str,
}

impl CancelToken {
    pub(crate) fn new(watch: watch::Receiver<u64>, epoch: u64, operation: &'static str) -> Self {
        Self {
            epoch,
            watch,
            operation,
        }
    }

    /// Token that is never cancelled
    #[cfg(test)]
    pub(crate) fn detached(operation: &'static str) -> Self {
        let (_, watch) = watch::channel(0);
        Self::new(watch, 0, operation)
    }

    pub(crate) fn check(&self) -> Result<(), StreamRtcError> {
        if *self.watch.borrow() != self.epoch {
            info!(operation = self.operation, "superseded by stop");
            return Err(StreamRtcError::Cancelled {
                operation: self.operation.to_string(),
            });
        }
        Ok(())
    }

    /// Sleep for `period`, waking early on a stop
    async fn sleep(&mut self, period: Duration) -> Result<(), StreamRtcError> {
        let watch = &mut self.watch;
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            changed = watch.changed() => {
                if changed.is_err() {
                    // nobody left to cancel us
                    tokio::time::sleep(period).await;
                }
            }
        }
        self.check()
    }
}

#[derive(Debug, Default)]
struct Outbox {
    refs: Option<ChannelRefs>,
    pending: Vec<Value>,
}

/// Sends local candidates, holding or dropping them until refs are bound
#[derive(Debug, Clone)]
struct CandidateSender {
    channel: SignalChannel,
    uid: String,
    role: Role,
    policy: CandidatePolicy,
    outbox: Arc<Mutex<Outbox>>,
}

impl CandidateSender {
    async fn write(&self, refs: &ChannelRefs, candidate: Value) {
        let record = RawValue::from(candidate)
            .with("from", self.uid.as_str())
            .with("role", self.role.as_str());
        let label = format!("{} ICE", self.role);
        if let Err(e) = self.channel.safe_add(&refs.candidates, record, &label).await {
            warn!(stream_id = %refs.stream_id, role = %self.role, error = %e, "candidate not delivered");
        }
    }

    async fn offer(&self, candidate: Option<IceCandidateInit>) {
        let value = match serialize_ice_candidate(candidate.as_ref()) {
            Some(value) => value,
            None => {
                debug!(role = %self.role, "end of candidates");
                return;
            }
        };

        let mut outbox = self.outbox.lock().await;
        match outbox.refs.clone() {
            Some(refs) => self.write(&refs, value).await,
            None => match self.policy {
                CandidatePolicy::Buffer => {
                    outbox.pending.push(value);
                    debug!(role = %self.role, pending = outbox.pending.len(), "candidate held until signaling is bound");
                }
                CandidatePolicy::Drop => {
                    debug!(role = %self.role, "candidate dropped, no stream id yet");
                }
            },
        }
    }

    async fn bind(&self, refs: &ChannelRefs) -> usize {
        let mut outbox = self.outbox.lock().await;
        let pending = std::mem::take(&mut outbox.pending);
        outbox.refs = Some(refs.clone());
        for value in &pending {
            self.write(refs, value.clone()).await;
        }
        if !pending.is_empty() {
            info!(stream_id = %refs.stream_id, count = pending.len(), "flushed held candidates");
        }
        pending.len()
    }

    async fn unbind(&self) {
        let mut outbox = self.outbox.lock().await;
        outbox.refs = None;
        outbox.pending.clear();
    }
}

/// One peer connection plus the signaling that drives it
#[derive(Debug)]
pub struct PeerSession {
    ctx: SessionContext,
    uid: String,
    role: Role,
    candidates: CandidateSender,
    remote_attached: Arc<AtomicBool>,
    remote_ready: watch::Sender<bool>,
    transport: Option<Arc<dyn PeerTransport>>,
    tasks: Vec<JoinHandle<()>>,
}

impl PeerSession {
    pub(crate) fn new(ctx: SessionContext, uid: &str, role: Role) -> Self {
        let candidates = CandidateSender {
            channel: ctx.channel.clone(),
            uid: uid.to_string(),
            role,
            policy: ctx.config.candidate_policy,
            outbox: Arc::new(Mutex::new(Outbox::default())),
        };
        let (remote_ready, _) = watch::channel(false);
        Self {
            ctx,
            uid: uid.to_string(),
            role,
            candidates,
            remote_attached: Arc::new(AtomicBool::new(false)),
            remote_ready,
            transport: None,
            tasks: Vec::new(),
        }
    }

    /// Local role
    pub fn role(&self) -> Role {
        self.role
    }

    /// State of the current connection, if one exists
    pub fn connection_state(&self) -> Option<PeerConnectionState> {
        self.transport.as_ref().map(|t| t.connection_state())
    }

    /// Whether a connection has been created and not yet closed
    pub fn has_connection(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&self) -> Result<Arc<dyn PeerTransport>, StreamRtcError> {
        self.transport
            .clone()
            .ok_or_else(|| StreamRtcError::InvalidState {
                expected: "open peer connection".to_string(),
                actual: "no connection".to_string(),
            })
    }

    async fn close_connection(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!(role = %self.role, error = %e, "closing peer connection failed");
            }
        }
    }

    /// Replace any existing connection with a fresh one and install its
    /// event handlers
    pub async fn create_connection(&mut self) -> Result<(), StreamRtcError> {
        self.close_connection().await;
        self.remote_attached.store(false, Ordering::SeqCst);
        self.remote_ready.send_replace(false);
        self.ctx.analyzer.reset();

        let (transport, events) = self.ctx.factory.create(&self.ctx.config.ice).await?;
        info!(role = %self.role, uid = %self.uid, "peer connection created");

        let handlers = tokio::spawn(run_peer_events(
            events,
            self.candidates.clone(),
            self.ctx.clone(),
            self.remote_attached.clone(),
        ));
        self.tasks.push(handlers);
        self.transport = Some(transport);
        Ok(())
    }

    /// Start sending local candidates to `refs`, flushing any held ones
    pub async fn bind(&self, refs: &ChannelRefs) -> usize {
        self.candidates.bind(refs).await
    }

    /// Host side: publish local tracks, write the offer, and apply answers
    /// and viewer candidates as they arrive
    pub(crate) async fn start_host(
        &mut self,
        refs: &ChannelRefs,
        media: &LocalMediaStream,
        token: &CancelToken,
    ) -> Result<(), StreamRtcError> {
        let transport = self.transport()?;
        self.bind(refs).await;

        for track in media.track_infos() {
            transport.add_track(track).await?;
        }
        let offer = transport.create_offer(OfferOptions::default()).await?;
        transport.set_local_description(offer.clone()).await?;

        let record = RawValue::object()
            .with(OFFER_FIELD, serialize_offer(Some(&offer)))
            .with("hostId", self.uid.as_str())
            .with(LIVE_FIELD, true);
        token.check()?;
        self.ctx
            .channel
            .safe_set(&refs.base, record, "host offer")
            .await?;
        info!(stream_id = %refs.stream_id, "offer published");

        let answers = self.ctx.channel.watch_added(&refs.answers).await?;
        self.tasks.push(tokio::spawn(apply_answers(
            answers,
            transport.clone(),
            self.remote_ready.clone(),
            refs.stream_id.clone(),
        )));
        self.watch_candidates(refs, transport).await
    }

    /// Viewer side: wait for the host's offer, answer it, and apply host
    /// candidates as they arrive
    ///
    /// No connection is created unless an offer is found, and nothing is
    /// created or written once `token` is cancelled.
    pub(crate) async fn join_as_viewer(
        &mut self,
        refs: &ChannelRefs,
        token: &mut CancelToken,
    ) -> Result<(), StreamRtcError> {
        let offer = self.await_offer(refs, token).await?;
        token.check()?;
        if self.transport.is_none() {
            self.create_connection().await?;
        }
        let transport = self.transport()?;
        self.bind(refs).await;

        transport.set_remote_description(offer).await?;
        self.remote_ready.send_replace(true);
        let answer = transport.create_answer().await?;
        transport.set_local_description(answer.clone()).await?;

        let record = RawValue::from(serialize_answer(Some(&answer))).with("from", self.uid.as_str());
        token.check()?;
        self.ctx
            .channel
            .safe_add(&refs.answers, record, "viewer answer")
            .await?;
        info!(stream_id = %refs.stream_id, "answer published");

        self.watch_candidates(refs, transport).await
    }

    async fn await_offer(
        &self,
        refs: &ChannelRefs,
        token: &mut CancelToken,
    ) -> Result<SessionDescription, StreamRtcError> {
        let attempts = self.ctx.config.offer_poll_attempts.max(1);
        for attempt in 1..=attempts {
            token.check()?;
            match self.ctx.channel.read(&refs.base).await {
                Ok(Some(doc)) => match decode_base(&doc)?.offer {
                    Some(offer) => {
                        debug!(stream_id = %refs.stream_id, attempt, "offer found");
                        return Ok(offer);
                    }
                    None => debug!(stream_id = %refs.stream_id, attempt, "base record has no offer yet"),
                },
                Ok(None) => debug!(stream_id = %refs.stream_id, attempt, "no base record yet"),
                Err(e) => warn!(stream_id = %refs.stream_id, attempt, error = %e, "offer poll failed"),
            }
            if attempt < attempts {
                token.sleep(self.ctx.config.offer_poll_interval).await?;
            }
        }

        warn!(stream_id = %refs.stream_id, attempts, "gave up waiting for an offer");
        Err(StreamRtcError::NoOfferFound {
            stream_id: refs.stream_id.clone(),
            attempts,
        })
    }

    async fn watch_candidates(
        &mut self,
        refs: &ChannelRefs,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<(), StreamRtcError> {
        let records = self.ctx.channel.watch_added(&refs.candidates).await?;
        self.tasks.push(tokio::spawn(apply_candidates(
            records,
            transport,
            self.role.remote(),
            self.remote_ready.subscribe(),
            refs.stream_id.clone(),
        )));
        Ok(())
    }

    /// Swap the outgoing video track on the live connection
    pub async fn replace_video(&self, track: TrackInfo) -> Result<(), StreamRtcError> {
        let transport = self.transport()?;
        transport.replace_track(TrackKind::Video, track).await
    }

    /// Abort signaling tasks, close the connection and clear the remote sink
    pub async fn stop(&mut self) {
        self.close_connection().await;
        self.candidates.unbind().await;
        self.remote_ready.send_replace(false);
        if self.remote_attached.swap(false, Ordering::SeqCst) {
            self.ctx.remote_sink.detach();
        }
        debug!(role = %self.role, "peer session stopped");
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => return,
        };
        let role = self.role;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = transport.close().await {
                        warn!(role = %role, error = %e, "closing dropped peer connection failed");
                    }
                });
            }
            Err(_) => warn!(role = %role, "peer session dropped outside a runtime, connection left open"),
        }
    }
}

async fn run_peer_events(
    mut events: PeerEvents,
    candidates: CandidateSender,
    ctx: SessionContext,
    remote_attached: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PeerEvent::IceCandidate(candidate) => candidates.offer(candidate).await,
            PeerEvent::Track(stream) => {
                if remote_attached.swap(true, Ordering::SeqCst) {
                    debug!(stream = %stream.id, "further remote track ignored");
                    continue;
                }
                info!(stream = %stream.id, tracks = stream.tracks.len(), "remote stream attached");
                let event = Event::RemoteTrack {
                    stream_id: stream.id.clone(),
                    tracks: stream.tracks.len(),
                };
                ctx.remote_sink.attach(SinkSource::Remote(stream));
                ctx.events.emit(event);
            }
            PeerEvent::ConnectionStateChanged(state) => {
                ctx.analyzer.record(state);
                ctx.events.emit(Event::ConnectionStateChanged { state });
                ctx.events.status(state.describe());
            }
        }
    }
}

async fn apply_answers(
    mut records: AddedRecords,
    transport: Arc<dyn PeerTransport>,
    remote_ready: watch::Sender<bool>,
    stream_id: String,
) {
    while let Some((id, doc)) = records.next().await {
        let answer = match decode_answer(&doc) {
            Ok(answer) => answer,
            Err(e) => {
                warn!(stream_id = %stream_id, record = %id, error = %e, "ignoring malformed answer");
                continue;
            }
        };
        if answer.description.sdp_type != SdpType::Answer {
            warn!(stream_id = %stream_id, record = %id, sdp_type = %answer.description.sdp_type, "ignoring non-answer record");
            continue;
        }

        match transport.set_remote_description(answer.description).await {
            Ok(()) => {
                info!(stream_id = %stream_id, record = %id, from = ?answer.from, "answer applied");
                remote_ready.send_replace(true);
            }
            Err(e) => {
                warn!(stream_id = %stream_id, record = %id, error = %e, "answer could not be applied")
            }
        }
    }
}

async fn apply_candidates(
    mut records: AddedRecords,
    transport: Arc<dyn PeerTransport>,
    accept: Role,
    mut remote_ready: watch::Receiver<bool>,
    stream_id: String,
) {
    while let Some((id, doc)) = records.next().await {
        let record = match decode_candidate(&doc) {
            Ok(record) => record,
            Err(e) => {
                warn!(stream_id = %stream_id, record = %id, error = %e, "ignoring malformed candidate");
                continue;
            }
        };
        if record.role != accept {
            continue;
        }

        // remote candidates wait for the remote description
        while !*remote_ready.borrow_and_update() {
            if remote_ready.changed().await.is_err() {
                return;
            }
        }

        match transport.add_ice_candidate(record.to_init()).await {
            Ok(()) => debug!(stream_id = %stream_id, record = %id, from = %accept, "remote candidate applied"),
            Err(e) => {
                warn!(stream_id = %stream_id, record = %id, error = %e, "remote candidate could not be applied")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use streamrtc_core::{LoopbackFactory, MemoryStore};
    use streamrtc_media::{MediaTrack, RecordingSink, TrackSource};
    use streamrtc_signaling::make_channel_refs;

    struct Harness {
        store: MemoryStore,
        factory: Arc<LoopbackFactory>,
        remote_sink: Arc<RecordingSink>,
        ctx: SessionContext,
    }

    fn harness(config: StreamConfig) -> Harness {
        let store = MemoryStore::new();
        let factory = Arc::new(LoopbackFactory::new());
        let remote_sink = Arc::new(RecordingSink::new("remote"));
        let (events, _receiver) = EventSink::new();
        let ctx = SessionContext {
            channel: SignalChannel::new(Arc::new(store.clone())),
            factory: factory.clone(),
            config,
            remote_sink: remote_sink.clone(),
            events: Arc::new(events),
            analyzer: Arc::new(ConnectionAnalyzer::new()),
        };
        Harness {
            store,
            factory,
            remote_sink,
            ctx,
        }
    }

    fn early_candidate(n: u32) -> PeerEvent {
        PeerEvent::IceCandidate(Some(IceCandidateInit {
            candidate: format!("candidate:{} 1 udp 1 10.0.0.{} 5000 typ host", n, n),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_early_candidates_are_flushed_in_order() {
        let h = harness(StreamConfig::fast_polling());
        let mut session = PeerSession::new(h.ctx.clone(), "U1", Role::Host);
        session.create_connection().await.unwrap();

        let transport = h.factory.latest().unwrap();
        transport.emit(early_candidate(1));
        transport.emit(early_candidate(2));
        transport.emit(PeerEvent::IceCandidate(None));
        settle().await;
        assert!(h.store.documents_in("signaling/U1-1000/candidates").is_empty());

        let refs = make_channel_refs("U1-1000").unwrap();
        assert_eq!(session.bind(&refs).await, 2);

        let stored = h.store.documents_in("signaling/U1-1000/candidates");
        let lines: Vec<_> = stored
            .iter()
            .map(|(_, doc)| doc["candidate"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("candidate:1 "));
        assert!(lines[1].starts_with("candidate:2 "));
        assert_eq!(stored[0].1["role"], "host");
        assert_eq!(stored[0].1["from"], "U1");

        session.stop().await;
    }

    #[tokio::test]
    async fn test_drop_policy_discards_early_candidates() {
        let h = harness(StreamConfig::fast_polling().with_candidate_policy(CandidatePolicy::Drop));
        let mut session = PeerSession::new(h.ctx.clone(), "U1", Role::Host);
        session.create_connection().await.unwrap();

        h.factory.latest().unwrap().emit(early_candidate(1));
        settle().await;

        let refs = make_channel_refs("U1-1000").unwrap();
        assert_eq!(session.bind(&refs).await, 0);
        assert!(h.store.documents_in("signaling/U1-1000/candidates").is_empty());
        session.stop().await;
    }

    #[tokio::test]
    async fn test_create_connection_closes_previous() {
        let h = harness(StreamConfig::fast_polling());
        let mut session = PeerSession::new(h.ctx.clone(), "U1", Role::Host);

        session.create_connection().await.unwrap();
        session.create_connection().await.unwrap();
        assert_eq!(h.factory.created_count(), 2);
        assert_eq!(h.factory.open_count(), 1);
        assert!(h.factory.transports()[0].is_closed());

        session.stop().await;
        assert_eq!(h.factory.open_count(), 0);
        assert!(!session.has_connection());
    }

    #[tokio::test]
    async fn test_dropped_session_closes_its_connection() {
        let h = harness(StreamConfig::fast_polling());
        let mut session = PeerSession::new(h.ctx.clone(), "U1", Role::Host);
        session.create_connection().await.unwrap();
        assert_eq!(h.factory.open_count(), 1);

        drop(session);
        settle().await;
        assert_eq!(h.factory.open_count(), 0);
        assert!(h.factory.transports()[0].is_closed());
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_offer_polling() {
        let h = harness(StreamConfig::fast_polling());
        let refs = make_channel_refs("U1-1000").unwrap();
        let (epoch, watch) = watch::channel(1u64);
        let mut token = CancelToken::new(watch, 1, "join stream");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            epoch.send_replace(2);
            epoch
        });
        let mut viewer = PeerSession::new(h.ctx.clone(), "V1", Role::Viewer);
        let err = viewer.join_as_viewer(&refs, &mut token).await.unwrap_err();
        assert_eq!(err.error_code(), "CANCELLED");
        assert_eq!(h.factory.created_count(), 0);
        drop(canceller.await.unwrap());
    }

    #[tokio::test]
    async fn test_viewer_without_offer_opens_nothing() {
        let h = harness(StreamConfig::fast_polling());
        let mut viewer = PeerSession::new(h.ctx.clone(), "V1", Role::Viewer);
        let refs = make_channel_refs("U1-1000").unwrap();

        let mut token = CancelToken::detached("join stream");
        let err = viewer.join_as_viewer(&refs, &mut token).await.unwrap_err();
        match err {
            StreamRtcError::NoOfferFound { attempts, .. } => assert_eq!(attempts, 5),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(h.factory.created_count(), 0);
        assert!(h.store.documents_in("signaling/U1-1000/answers").is_empty());
    }

    #[tokio::test]
    async fn test_bad_records_do_not_stop_the_appliers() {
        let h = harness(StreamConfig::fast_polling());
        let refs = make_channel_refs("U1-1000").unwrap();
        let channel = h.ctx.channel.clone();

        // garbage arrives before the real answer
        channel
            .safe_add(&refs.answers, RawValue::object().with("sdp", "no type"), "junk")
            .await
            .unwrap();
        channel
            .safe_add(
                &refs.candidates,
                RawValue::object()
                    .with("candidate", "not-a-candidate")
                    .with("role", "viewer"),
                "junk",
            )
            .await
            .unwrap();

        let media = LocalMediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            TrackSource::Camera,
            "cam",
        )]);
        let mut host = PeerSession::new(h.ctx.clone(), "U1", Role::Host);
        host.create_connection().await.unwrap();
        host.start_host(&refs, &media, &CancelToken::detached("start stream"))
            .await
            .unwrap();

        let mut viewer = PeerSession::new(h.ctx.clone(), "V1", Role::Viewer);
        let mut token = CancelToken::detached("join stream");
        viewer.join_as_viewer(&refs, &mut token).await.unwrap();
        settle().await;

        assert_eq!(host.connection_state(), Some(PeerConnectionState::Connected));
        assert_eq!(viewer.connection_state(), Some(PeerConnectionState::Connected));
        assert_eq!(h.remote_sink.attach_count(), 1);

        viewer.stop().await;
        host.stop().await;
        assert_eq!(h.remote_sink.attached_id(), None);
    }
}
