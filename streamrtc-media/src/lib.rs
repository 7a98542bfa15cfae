//! # StreamRTC Media
//!
//! Local media for StreamRTC: the capture abstraction that produces camera,
//! microphone and screen tracks, the tracks themselves, and the display
//! sinks local previews and remote streams are rendered into.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod error;
pub mod sink;
pub mod tracks;

// Re-export main types
pub use capture::{MediaCapture, MediaConstraints, MockCapture};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use sink::{DisplaySink, RecordingSink, SinkEvent, SinkSource};
pub use tracks::{LocalMediaStream, MediaTrack, TrackSource};
