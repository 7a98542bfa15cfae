//! # StreamRTC Core
//!
//! Foundational types for the StreamRTC live-streaming stack: the error
//! taxonomy, the path-addressed document store used as a signaling channel,
//! and the peer-connection transport abstraction. In-process implementations
//! of both collaborators ([`MemoryStore`], [`LoopbackFactory`]) are included.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod store;
pub mod transport;

// Re-export main types
pub use error::{StoreError, StreamRtcError};
pub use store::{
    server_timestamp, ChangeKind, CollectionRef, DocPath, Document, DocumentChange, DocumentRef,
    DocumentStore, MemoryStore, Subscription,
};
pub use transport::{
    IceCandidateInit, IceConfig, IceServer, LoopbackFactory, LoopbackOptions, LoopbackTransport,
    OfferOptions, PeerConnectionState, PeerEvent, PeerEvents, PeerTransport, RemoteStream,
    SdpType, SessionDescription, TrackInfo, TrackKind, TransportFactory,
};
