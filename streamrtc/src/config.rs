//! Configuration types and defaults

use std::time::Duration;
use streamrtc_core::IceConfig;
use streamrtc_media::MediaConstraints;

/// What to do with local ICE candidates gathered before the stream id is known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidatePolicy {
    /// Hold them and send them, in order, once signaling is bound
    #[default]
    Buffer,
    /// Discard them
    Drop,
}

/// Stream-wide configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Relay/reflection servers handed to every peer connection
    pub ice: IceConfig,
    /// Pause between viewer reads of the base record
    pub offer_poll_interval: Duration,
    /// Number of viewer reads before giving up on an offer
    pub offer_poll_attempts: u32,
    /// Handling of early ICE candidates
    pub candidate_policy: CandidatePolicy,
    /// Media requested when a host starts
    pub media: MediaConstraints,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ice: IceConfig::default(),
            offer_poll_interval: Duration::from_secs(1),
            offer_poll_attempts: 10,
            candidate_policy: CandidatePolicy::Buffer,
            media: MediaConstraints::default(),
        }
    }
}

impl StreamConfig {
    /// Short polling for tests and demos: 20 ms between reads, 5 reads
    pub fn fast_polling() -> Self {
        Self {
            offer_poll_interval: Duration::from_millis(20),
            offer_poll_attempts: 5,
            ..Self::default()
        }
    }

    /// Same configuration with another candidate policy
    pub fn with_candidate_policy(mut self, policy: CandidatePolicy) -> Self {
        self.candidate_policy = policy;
        self
    }

    /// Upper bound on how long a viewer waits for an offer
    pub fn offer_wait_budget(&self) -> Duration {
        self.offer_poll_interval * self.offer_poll_attempts.saturating_sub(1)
    }
}
