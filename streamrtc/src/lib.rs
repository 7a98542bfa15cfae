//! # StreamRTC - Live Streaming over a Document Store
//!
//! StreamRTC lets one host broadcast camera and microphone to viewers over
//! WebRTC, using a shared document store as the signaling channel. The host
//! publishes an offer and its ICE candidates under `signaling/{streamId}`;
//! viewers poll for the offer, answer it and trade candidates the same way.
//!
//! ## Key Features
//!
//! - **Store-backed signaling**: appends and merges picked from path shape
//! - **Sanitized writes**: no undefined values ever reach the store
//! - **Ordered candidates**: early ICE candidates buffered until the stream id exists
//! - **Clean lifecycle**: every failure ends idle with media released
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamrtc::{
//!     Identity, LoopbackFactory, MemoryStore, MockCapture, StaticAuthenticator,
//!     StreamController,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let controller = StreamController::builder()
//!         .store(Arc::new(MemoryStore::new()))
//!         .transport(Arc::new(LoopbackFactory::new()))
//!         .capture(Arc::new(MockCapture::new()))
//!         .authenticator(Arc::new(StaticAuthenticator::signed_in(Identity::new("U1"))))
//!         .build()?;
//!
//!     let outcome = controller.start_stream(None).await?;
//!     println!("live as {:?}", outcome.stream_id());
//!
//!     let mut events = controller.events().expect("first call");
//!     for event in events.drain() {
//!         println!("event: {:?}", event);
//!     }
//!
//!     controller.stop_stream().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use streamrtc_core::{
    server_timestamp, ChangeKind, CollectionRef, DocPath, Document, DocumentChange, DocumentRef,
    DocumentStore, IceCandidateInit, IceConfig, IceServer, LoopbackFactory, MemoryStore,
    OfferOptions, PeerConnectionState, PeerEvent, PeerTransport, RemoteStream, SdpType,
    SessionDescription, StoreError, StreamRtcError, TrackInfo, TrackKind, TransportFactory,
};

pub use streamrtc_media::{
    DisplaySink, LocalMediaStream, MediaCapture, MediaConstraints, MediaError, MediaTrack,
    MockCapture, RecordingSink, SinkSource, TrackSource,
};

pub use streamrtc_signaling::{
    make_channel_refs, sanitize, serialize_answer, serialize_ice_candidate, serialize_offer,
    ChannelRefs, RawValue, Role, SignalChannel, SignalObserver, SignalReceipt, SignalTarget,
    WriteMode, WriteOutcome,
};

pub use streamrtc_diagnostics::{ConnectionAnalyzer, ConnectionInfo, DebugLogger, SignalTrace};

pub mod auth;
pub mod config;
pub mod controller;
pub mod event;
pub mod session;
pub mod stream;

pub use auth::{AllowAll, Authenticator, CredentialGate, Identity, PasswordGate, StaticAuthenticator};
pub use config::{CandidatePolicy, StreamConfig};
pub use controller::{StreamController, StreamControllerBuilder};
pub use event::{Event, EventStream};
pub use session::PeerSession;
pub use stream::{
    Clock, ManualClock, StartOutcome, StreamId, StreamSession, StreamState, SystemClock,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
