//! Local media tracks and streams

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use streamrtc_core::{TrackInfo, TrackKind};
use tracing::debug;
use uuid::Uuid;

/// Where a track's media comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    /// Camera video
    Camera,
    /// Microphone audio
    Microphone,
    /// Captured screen or window
    Screen,
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackSource::Camera => f.write_str("camera"),
            TrackSource::Microphone => f.write_str("microphone"),
            TrackSource::Screen => f.write_str("screen"),
        }
    }
}

/// A single local audio or video track
///
/// Enabling and disabling only mutes the track; stopping it releases the
/// device and is permanent.
#[derive(Debug)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    source: TrackSource,
    label: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl MediaTrack {
    /// Create new live, enabled track
    pub fn new(kind: TrackKind, source: TrackSource, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            source,
            label: label.into(),
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    /// Get track ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Audio or video
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Device the track reads from
    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// Device label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether media is flowing (not muted)
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Mute or unmute
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Release the device; idempotent
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!(track = %self.id, kind = %self.kind, source = %self.source, "track stopped");
        }
    }

    /// Whether [`stop`](Self::stop) was called
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Transport-facing description of this track
    pub fn info(&self, stream_id: &str) -> TrackInfo {
        TrackInfo {
            id: self.id.clone(),
            kind: self.kind,
            stream_id: stream_id.to_string(),
        }
    }
}

/// Local media stream: a group of tracks captured together
#[derive(Debug, Clone)]
pub struct LocalMediaStream {
    id: String,
    tracks: Vec<Arc<MediaTrack>>,
}

impl LocalMediaStream {
    /// Group tracks into a new stream
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks: tracks.into_iter().map(Arc::new).collect(),
        }
    }

    /// Stream id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks
    pub fn tracks(&self) -> &[Arc<MediaTrack>] {
        &self.tracks
    }

    /// Tracks of one kind
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Arc<MediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    /// First video track, if any
    pub fn video_track(&self) -> Option<Arc<MediaTrack>> {
        self.tracks_of(TrackKind::Video).next().cloned()
    }

    /// Transport-facing descriptions of every track
    pub fn track_infos(&self) -> Vec<TrackInfo> {
        self.tracks.iter().map(|t| t.info(&self.id)).collect()
    }

    /// Enable or disable every track of a kind; returns how many were touched
    pub fn set_enabled(&self, kind: TrackKind, enabled: bool) -> usize {
        let mut touched = 0;
        for track in self.tracks_of(kind) {
            track.set_enabled(enabled);
            touched += 1;
        }
        debug!(stream = %self.id, %kind, enabled, touched, "tracks toggled");
        touched
    }

    /// Stop every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Whether any track is still live
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| !t.is_stopped())
    }
}
