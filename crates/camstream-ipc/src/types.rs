//! Common types used across IPC messages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where encoded datagrams are sent. Fixed for the lifetime of one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    /// Host name or IP address.
    pub host: String,

    /// UDP port.
    pub port: u16,
}

impl Destination {
    /// Create a destination from a host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Configuration for starting a stream. Immutable once a session starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Frame width in pixels (default: 1280).
    pub width: u32,

    /// Frame height in pixels (default: 720).
    pub height: u32,

    /// Target bitrate in bits per second (default: 2,000,000).
    pub bitrate_bps: u32,

    /// Target frames per second (default: 30).
    pub frame_rate: u32,

    /// Maximum seconds between keyframes (default: 1).
    pub keyframe_interval_secs: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            bitrate_bps: 2_000_000,
            frame_rate: 30,
            keyframe_interval_secs: 1,
        }
    }
}

/// What the pipeline does when the camera or capture session fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionErrorAction {
    /// Tear the whole pipeline down and report an error.
    #[default]
    Teardown,

    /// Log, keep every resource, and wait for an explicit stop.
    Stall,
}

/// What the transport does with a payload above the practical datagram size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OversizePolicy {
    /// Hand it to the OS anyway; it may be truncated or dropped in transit.
    #[default]
    Send,

    /// Count it and skip the transmission.
    Drop,
}

/// Named error-handling choices for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelinePolicy {
    /// Reaction to camera disconnects, device errors and session failures.
    pub session_errors: SessionErrorAction,

    /// Extra attempts per datagram after a send failure (0 = never retried).
    pub send_retries: u32,

    /// Handling of payloads larger than one datagram.
    pub oversize: OversizePolicy,

    /// Bounded wait of each encoder output poll, in milliseconds.
    pub drain_poll_timeout_ms: u64,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            session_errors: SessionErrorAction::Teardown,
            send_retries: 0,
            oversize: OversizePolicy::Send,
            drain_poll_timeout_ms: 10,
        }
    }
}

/// Stream metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Datagrams handed to the socket.
    pub datagrams_sent: u64,

    /// Payload bytes handed to the socket.
    pub bytes_sent: u64,

    /// Average bitrate since start in bits per second.
    pub bitrate_bps: u64,

    /// Target bitrate in bits per second.
    pub target_bitrate_bps: u32,

    /// Encoder output buffers per second since the last report.
    pub output_rate: f32,

    /// Output buffers returned to the encoder.
    pub buffers_released: u64,

    /// Zero-size output buffers released without transmission.
    pub empty_buffers: u64,

    /// Keyframe output buffers.
    pub keyframes: u64,

    /// Datagrams that failed to send.
    pub send_failures: u64,

    /// Payloads above the practical datagram size.
    pub oversized_payloads: u64,

    /// Encoder output format changes.
    pub format_changes: u64,

    /// Stream uptime in seconds.
    pub uptime_seconds: u64,
}

/// Types of performance warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WarningType {
    /// Datagrams are failing to send.
    SendFailures { count: u64 },

    /// Access units exceed one datagram and may be truncated in transit.
    OversizedPayloads { count: u64 },
}
