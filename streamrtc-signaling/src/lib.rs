//! # StreamRTC Signaling
//!
//! Signal codec and signal channel for StreamRTC. Offers, answers and ICE
//! candidates travel between host and viewer as records in a shared
//! document store; this crate defines their shape and the logged,
//! sanitized write path they go through.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod codec;
pub mod protocol;

// Re-export main types
pub use channel::{
    make_channel_refs, stream_record_ref, AddedRecords, ChannelRefs, SignalChannel,
    SignalObserver, SignalReceipt, SignalTarget, WriteMode, WriteOutcome,
};
pub use codec::{
    sanitize, serialize_answer, serialize_ice_candidate, serialize_offer,
    serialize_stream_record, RawValue,
};
pub use protocol::{AnswerRecord, BaseRecord, CandidateRecord, Role, StreamRecord};
