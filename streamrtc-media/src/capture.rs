//! Media capture abstraction
//!
//! [`MediaCapture`] stands in for the platform's camera/microphone and
//! screen capture APIs. [`MockCapture`] produces synthetic tracks and can be
//! told to refuse permission, fail, or take a while to answer.

use crate::error::{MediaError, MediaResult};
use crate::tracks::{LocalMediaStream, MediaTrack, TrackSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use streamrtc_core::TrackKind;
use tracing::{debug, warn};

/// Which kinds of media to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Request a camera track
    pub video: bool,
    /// Request a microphone track
    pub audio: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

impl MediaConstraints {
    /// Audio only
    pub fn audio_only() -> Self {
        Self {
            video: false,
            audio: true,
        }
    }

    /// Reject requests for nothing
    pub fn validate(&self) -> MediaResult<()> {
        if !self.video && !self.audio {
            return Err(MediaError::InvalidConfiguration {
                message: "at least one of audio or video must be requested".to_string(),
            });
        }
        Ok(())
    }
}

/// Source of local media
#[async_trait]
pub trait MediaCapture: Send + Sync + fmt::Debug {
    /// Camera and/or microphone, per the constraints
    async fn get_user_media(&self, constraints: &MediaConstraints) -> MediaResult<LocalMediaStream>;

    /// Screen capture, video only
    async fn get_display_media(&self) -> MediaResult<LocalMediaStream>;
}

#[derive(Debug, Default)]
struct MockState {
    user_failure: Option<MediaError>,
    display_failure: Option<MediaError>,
    delay: Option<Duration>,
    acquired: Vec<LocalMediaStream>,
}

/// Synthetic capture device
#[derive(Debug, Default)]
pub struct MockCapture {
    state: Mutex<MockState>,
}

impl MockCapture {
    /// Capture that grants every request immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse camera/microphone access from now on
    pub fn deny_permission(&self) {
        self.fail_with(MediaError::PermissionDenied {
            device: "camera".to_string(),
        });
    }

    /// Fail camera/microphone requests with the given error
    pub fn fail_with(&self, error: MediaError) {
        self.state.lock().user_failure = Some(error);
    }

    /// Fail screen capture requests with the given error
    pub fn fail_display_with(&self, error: MediaError) {
        self.state.lock().display_failure = Some(error);
    }

    /// Grant requests again
    pub fn allow(&self) {
        let mut state = self.state.lock();
        state.user_failure = None;
        state.display_failure = None;
    }

    /// Wait this long before answering each request
    pub fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    /// Every stream handed out so far
    pub fn acquired(&self) -> Vec<LocalMediaStream> {
        self.state.lock().acquired.clone()
    }

    /// Whether every stream handed out has been fully stopped
    pub fn all_released(&self) -> bool {
        self.state.lock().acquired.iter().all(|s| !s.is_active())
    }

    async fn pause(&self) {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn hand_out(&self, stream: LocalMediaStream) -> LocalMediaStream {
        self.state.lock().acquired.push(stream.clone());
        stream
    }
}

#[async_trait]
impl MediaCapture for MockCapture {
    async fn get_user_media(&self, constraints: &MediaConstraints) -> MediaResult<LocalMediaStream> {
        constraints.validate()?;
        self.pause().await;

        let failure = self.state.lock().user_failure.clone();
        if let Some(err) = failure {
            warn!(error = %err, "user media request refused");
            return Err(err);
        }

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(
                TrackKind::Audio,
                TrackSource::Microphone,
                "Mock Microphone",
            ));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(
                TrackKind::Video,
                TrackSource::Camera,
                "Mock Camera",
            ));
        }
        let stream = LocalMediaStream::new(tracks);
        debug!(stream = %stream.id(), audio = constraints.audio, video = constraints.video, "user media granted");
        Ok(self.hand_out(stream))
    }

    async fn get_display_media(&self) -> MediaResult<LocalMediaStream> {
        self.pause().await;

        let failure = self.state.lock().display_failure.clone();
        if let Some(err) = failure {
            warn!(error = %err, "display media request refused");
            return Err(err);
        }

        let stream = LocalMediaStream::new(vec![MediaTrack::new(
            TrackKind::Video,
            TrackSource::Screen,
            "Mock Screen",
        )]);
        debug!(stream = %stream.id(), "display media granted");
        Ok(self.hand_out(stream))
    }
}
