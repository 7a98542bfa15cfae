//! Integration tests for capture, tracks and sinks
//!
//! Drives the mock capture device through the `MediaCapture` trait object the
//! stream controller holds, and checks track state as a host would see it.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

use streamrtc_core::{StreamRtcError, TrackKind};
use streamrtc_media::*;

// ============================================================================
// CAPTURE LIFECYCLE TESTS
// ============================================================================

#[tokio::test]
async fn test_camera_and_microphone_by_default() {
    let capture: Arc<dyn MediaCapture> = Arc::new(MockCapture::new());
    let stream = assert_ok!(capture.get_user_media(&MediaConstraints::default()).await);

    assert_eq!(stream.tracks_of(TrackKind::Audio).count(), 1);
    assert_eq!(stream.tracks_of(TrackKind::Video).count(), 1);
    assert!(stream.tracks().iter().all(|t| t.is_enabled()));
    assert_eq!(stream.video_track().unwrap().source(), TrackSource::Camera);
}

#[tokio::test]
async fn test_delay_is_honoured() {
    let capture = MockCapture::new();
    capture.set_delay(Duration::from_millis(30));

    let started = Instant::now();
    assert_ok!(capture.get_user_media(&MediaConstraints::default()).await);
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_busy_device_is_not_a_permission_error() {
    let capture = MockCapture::new();
    capture.fail_with(MediaError::ResourceNotAvailable {
        resource: "camera in use by another application".to_string(),
    });

    let err = assert_err!(capture.get_user_media(&MediaConstraints::default()).await);
    assert!(err.is_recoverable());

    let err: StreamRtcError = err.into();
    assert!(!err.is_permission_denied());
    assert!(err.user_message().starts_with("Something went wrong"));
}

#[tokio::test]
async fn test_screen_share_denial_leaves_camera_alone() {
    let capture = MockCapture::new();
    let camera = assert_ok!(capture.get_user_media(&MediaConstraints::default()).await);

    capture.fail_display_with(MediaError::PermissionDenied {
        device: "screen".to_string(),
    });
    let err = assert_err!(capture.get_display_media().await);
    assert!(err.is_permission_denied());

    assert!(camera.is_active());
    assert_eq!(capture.acquired().len(), 1);
}

// ============================================================================
// TRACK STATE TESTS
// ============================================================================

#[tokio::test]
async fn test_muted_tracks_remain_live() {
    let capture = MockCapture::new();
    let stream = assert_ok!(capture.get_user_media(&MediaConstraints::default()).await);

    stream.set_enabled(TrackKind::Video, false);
    stream.set_enabled(TrackKind::Audio, false);
    assert!(stream.is_active());
    assert!(stream.tracks().iter().all(|t| !t.is_enabled()));

    stream.stop_all();
    assert!(capture.all_released());
}

// ============================================================================
// SINK TESTS
// ============================================================================

#[tokio::test]
async fn test_local_preview_sink() {
    let capture = MockCapture::new();
    let stream = assert_ok!(capture.get_user_media(&MediaConstraints::default()).await);
    let recorder = Arc::new(RecordingSink::new("local"));
    let sink: Arc<dyn DisplaySink> = recorder.clone();

    sink.attach(SinkSource::Local(stream.clone()));
    sink.attach(SinkSource::Local(stream.clone()));
    assert_eq!(recorder.attached_id().as_deref(), Some(stream.id()));

    sink.detach();
    assert_eq!(recorder.attach_count(), 2);
    assert_eq!(recorder.history().last(), Some(&SinkEvent::Detached));
}
