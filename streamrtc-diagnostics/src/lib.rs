//! # StreamRTC Diagnostics
//!
//! Debugging and diagnostic tools for StreamRTC.
//! Provides logging setup, a trace of signal writes and connection analysis.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod connection_analyzer;
pub mod debug_logger;
pub mod signal_trace;

// Re-export main types
pub use connection_analyzer::{ConnectionAnalyzer, ConnectionInfo, StateTransition};
pub use debug_logger::DebugLogger;
pub use signal_trace::{SignalTrace, TraceSummary};
