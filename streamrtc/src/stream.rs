//! Stream identity, controller state and the live session record

use crate::session::PeerSession;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use streamrtc_media::LocalMediaStream;
use streamrtc_signaling::{ChannelRefs, Role};

/// Identifier of a stream, `{hostUid}-{createdMillis}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamId(String);

impl StreamId {
    /// Id for a stream created by `uid` at `created_millis`
    pub fn compose(uid: &str, created_millis: i64) -> Self {
        Self(format!("{}-{}", uid, created_millis))
    }

    /// Wrap an id received from elsewhere, e.g. a viewer's link
    pub fn from_existing(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// String form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Controller state
///
/// Hosts move `Idle → ValidatingCredential → AcquiringMedia → Active`,
/// viewers `Idle → Joining → Watching`. Every failure returns to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Nothing in progress
    Idle,
    /// Host credential check running
    ValidatingCredential,
    /// Waiting for camera/microphone
    AcquiringMedia,
    /// Hosting
    Active,
    /// Viewer waiting for the offer and negotiating
    Joining,
    /// Viewing
    Watching,
}

impl StreamState {
    /// Name used in logs and errors
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::ValidatingCredential => "validating-credential",
            StreamState::AcquiringMedia => "acquiring-media",
            StreamState::Active => "active",
            StreamState::Joining => "joining",
            StreamState::Watching => "watching",
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a start or join request that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// The stream is up under this id
    Started(StreamId),
    /// Another start or join was already running; nothing was done
    AlreadyInProgress,
}

impl StartOutcome {
    /// Stream id when this call did the starting
    pub fn stream_id(&self) -> Option<&StreamId> {
        match self {
            StartOutcome::Started(id) => Some(id),
            StartOutcome::AlreadyInProgress => None,
        }
    }
}

/// Source of stream creation times
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Clock reading `millis`
    pub fn new(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Move the clock
    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Everything owned by one running stream, host or viewer side
#[derive(Debug)]
pub struct StreamSession {
    /// Stream id
    pub id: StreamId,
    /// Local role
    pub role: Role,
    /// Signaling addresses
    pub refs: ChannelRefs,
    /// Peer connection and its signaling tasks
    pub peer: PeerSession,
    /// Camera/microphone, host only
    pub local_media: Option<LocalMediaStream>,
    /// Active screen capture, host only
    pub screen: Option<LocalMediaStream>,
    /// When the session went live
    pub started_at: DateTime<Utc>,
}

impl StreamSession {
    /// Stop every local track this session holds
    pub fn release_media(&mut self) {
        if let Some(screen) = self.screen.take() {
            screen.stop_all();
        }
        if let Some(media) = &self.local_media {
            media.stop_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id_format() {
        assert_eq!(StreamId::compose("U1", 1000).as_str(), "U1-1000");
        assert_eq!(StreamId::from_existing("U1-1000"), StreamId::compose("U1", 1000));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now_millis(), 1000);
        clock.set(2000);
        assert_eq!(clock.now_millis(), 2000);
        assert!(SystemClock.now_millis() > 0);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(StreamState::ValidatingCredential.to_string(), "validating-credential");
        assert_eq!(
            StartOutcome::Started(StreamId::compose("U1", 1)).stream_id().map(|s| s.as_str()),
            Some("U1-1")
        );
        assert!(StartOutcome::AlreadyInProgress.stream_id().is_none());
    }
}
