//! Event system for stream and connection events

use futures::Stream;
use parking_lot::Mutex;
use std::pin::Pin;
use std::task::{Context, Poll};
use streamrtc_core::PeerConnectionState;
use streamrtc_signaling::Role;
use tokio::sync::mpsc;
use tracing::info;

/// Events raised while hosting or watching a stream
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Human-readable status line changed
    StatusChanged {
        /// New status
        status: String,
    },
    /// Peer connection changed state
    ConnectionStateChanged {
        /// New connection state
        state: PeerConnectionState,
    },
    /// First remote media arrived and was attached to the remote sink
    RemoteTrack {
        /// Remote stream id
        stream_id: String,
        /// Number of tracks it carries
        tracks: usize,
    },
    /// Hosting or watching began
    StreamStarted {
        /// Stream id
        stream_id: String,
        /// Local role
        role: Role,
    },
    /// Hosting or watching ended
    StreamStopped {
        /// Stream id
        stream_id: String,
        /// Local role
        role: Role,
    },
    /// An operation failed
    Error {
        /// Stable error code
        code: String,
        /// Message for the user
        message: String,
    },
}

impl Event {
    /// Get event type as string
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StatusChanged { .. } => "status_changed",
            Event::ConnectionStateChanged { .. } => "connection_state_changed",
            Event::RemoteTrack { .. } => "remote_track",
            Event::StreamStarted { .. } => "stream_started",
            Event::StreamStopped { .. } => "stream_stopped",
            Event::Error { .. } => "error",
        }
    }

    /// Check if this is a connection-related event
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            Event::ConnectionStateChanged { .. } | Event::RemoteTrack { .. }
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, Event::Error { .. })
    }
}

/// Stream of events handed out by the controller
#[derive(Debug)]
pub struct EventStream {
    /// Receiver for events
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<Event>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Everything already queued, without waiting
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.receiver.poll_recv(cx)
    }
}

/// Sending half shared by the controller and its sessions
///
/// Keeps the latest status line so it can be read without consuming events.
#[derive(Debug)]
pub(crate) struct EventSink {
    sender: mpsc::UnboundedSender<Event>,
    status: Mutex<String>,
}

impl EventSink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let sink = Self {
            sender,
            status: Mutex::new("Idle".to_string()),
        };
        (sink, receiver)
    }

    pub(crate) fn emit(&self, event: Event) {
        // nobody listening is fine
        let _ = self.sender.send(event);
    }

    pub(crate) fn status(&self, status: impl Into<String>) {
        let status = status.into();
        info!(status = %status, "status");
        *self.status.lock() = status.clone();
        self.emit(Event::StatusChanged { status });
    }

    pub(crate) fn current_status(&self) -> String {
        self.status.lock().clone()
    }
}
