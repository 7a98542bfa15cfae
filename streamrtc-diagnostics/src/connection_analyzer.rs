//! Connection state analysis and diagnostics

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use streamrtc_core::PeerConnectionState;
use tracing::{debug, warn};

/// One observed state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateTransition {
    /// State before the change
    pub from: PeerConnectionState,
    /// State after the change
    pub to: PeerConnectionState,
    /// Time since the analyzer was started
    pub elapsed: Duration,
    /// Wall-clock time of the change
    pub at: DateTime<Utc>,
}

/// Connection information and statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    /// Current connection state
    pub state: PeerConnectionState,
    /// Number of state changes observed
    pub transitions: usize,
    /// Time from start to the first `connected`
    pub time_to_connect: Option<Duration>,
    /// How long the current connected period has lasted
    pub connected_for: Option<Duration>,
    /// Number of times the connection entered `failed`
    pub failures: u32,
    /// Number of times the connection entered `disconnected`
    pub interruptions: u32,
}

#[derive(Debug)]
struct AnalyzerInner {
    started: Instant,
    current: PeerConnectionState,
    connected_since: Option<Instant>,
    time_to_connect: Option<Duration>,
    history: Vec<StateTransition>,
    failures: u32,
    interruptions: u32,
}

impl AnalyzerInner {
    fn fresh() -> Self {
        Self {
            started: Instant::now(),
            current: PeerConnectionState::New,
            connected_since: None,
            time_to_connect: None,
            history: Vec::new(),
            failures: 0,
            interruptions: 0,
        }
    }
}

/// Follows one peer connection's state changes
#[derive(Debug)]
pub struct ConnectionAnalyzer {
    inner: Mutex<AnalyzerInner>,
}

impl ConnectionAnalyzer {
    /// Analyzer with the clock started now
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(AnalyzerInner::fresh()),
        }
    }

    /// Forget history and restart the clock for a new connection
    pub fn reset(&self) {
        *self.inner.lock() = AnalyzerInner::fresh();
    }

    /// Record a state; repeated states are ignored. Returns whether it changed.
    pub fn record(&self, state: PeerConnectionState) -> bool {
        let mut inner = self.inner.lock();
        if inner.current == state {
            return false;
        }

        let now = Instant::now();
        let elapsed = now.duration_since(inner.started);
        let from = inner.current;
        inner.history.push(StateTransition {
            from,
            to: state,
            elapsed,
            at: Utc::now(),
        });
        inner.current = state;

        match state {
            PeerConnectionState::Connected => {
                inner.connected_since = Some(now);
                if inner.time_to_connect.is_none() {
                    inner.time_to_connect = Some(elapsed);
                    debug!(?elapsed, "connection established");
                }
            }
            PeerConnectionState::Failed => {
                inner.failures += 1;
                inner.connected_since = None;
                warn!(%from, "connection failed");
            }
            PeerConnectionState::Disconnected => {
                inner.interruptions += 1;
                inner.connected_since = None;
            }
            _ => inner.connected_since = None,
        }
        true
    }

    /// Snapshot of the current connection
    pub fn info(&self) -> ConnectionInfo {
        let inner = self.inner.lock();
        ConnectionInfo {
            state: inner.current,
            transitions: inner.history.len(),
            time_to_connect: inner.time_to_connect,
            connected_for: inner.connected_since.map(|since| since.elapsed()),
            failures: inner.failures,
            interruptions: inner.interruptions,
        }
    }

    /// Every recorded transition, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.inner.lock().history.clone()
    }
}

impl Default for ConnectionAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}
