//! Display sinks for local preview and remote playback

use crate::tracks::LocalMediaStream;
use parking_lot::Mutex;
use std::fmt;
use streamrtc_core::RemoteStream;
use tracing::debug;

/// What a sink is showing
#[derive(Debug, Clone)]
pub enum SinkSource {
    /// Local camera or screen preview
    Local(LocalMediaStream),
    /// Media received from the peer
    Remote(RemoteStream),
}

impl SinkSource {
    /// Id of the underlying stream
    pub fn stream_id(&self) -> &str {
        match self {
            SinkSource::Local(stream) => stream.id(),
            SinkSource::Remote(stream) => &stream.id,
        }
    }
}

/// Something that renders a media stream
pub trait DisplaySink: Send + Sync + fmt::Debug {
    /// Show a stream, replacing whatever was shown before
    fn attach(&self, source: SinkSource);

    /// Stop showing anything
    fn detach(&self);
}

/// Attach/detach operation recorded by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Stream attached
    Attached(String),
    /// Sink cleared
    Detached,
}

#[derive(Debug, Default)]
struct RecordingState {
    current: Option<SinkSource>,
    history: Vec<SinkEvent>,
}

/// Sink that renders nothing and remembers what it was asked to show
#[derive(Debug, Default)]
pub struct RecordingSink {
    name: String,
    state: Mutex<RecordingState>,
}

impl RecordingSink {
    /// Named sink, the name only appears in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(RecordingState::default()),
        }
    }

    /// Currently attached stream id
    pub fn attached_id(&self) -> Option<String> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|s| s.stream_id().to_string())
    }

    /// Currently attached source
    pub fn current(&self) -> Option<SinkSource> {
        self.state.lock().current.clone()
    }

    /// Number of attach calls so far
    pub fn attach_count(&self) -> usize {
        self.state
            .lock()
            .history
            .iter()
            .filter(|e| matches!(e, SinkEvent::Attached(_)))
            .count()
    }

    /// Every attach/detach in order
    pub fn history(&self) -> Vec<SinkEvent> {
        self.state.lock().history.clone()
    }
}

impl DisplaySink for RecordingSink {
    fn attach(&self, source: SinkSource) {
        let id = source.stream_id().to_string();
        debug!(sink = %self.name, stream = %id, "sink attached");
        let mut state = self.state.lock();
        state.history.push(SinkEvent::Attached(id));
        state.current = Some(source);
    }

    fn detach(&self) {
        debug!(sink = %self.name, "sink detached");
        let mut state = self.state.lock();
        state.history.push(SinkEvent::Detached);
        state.current = None;
    }
}
