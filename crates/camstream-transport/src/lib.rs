//! Best-effort datagram transport.
//!
//! Each encoder output buffer becomes exactly one datagram addressed to a
//! fixed destination. There is no fragmentation, ordering, or
//! acknowledgement; a lost datagram is simply gone.

mod error;
mod retry;
mod udp;

pub use error::TransportError;
pub use retry::RetryPolicy;
pub use udp::{resolve_destination, SinkStats, UdpSink, UdpSinkFactory};

use std::sync::Arc;

use camstream_ipc::{Destination, OversizePolicy, PipelinePolicy};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Largest UDP payload over IPv4 (65,535 - 8 byte UDP header - 20 byte IP header).
pub const MAX_DATAGRAM_PAYLOAD: usize = 65_507;

/// Base retry delay in milliseconds.
pub const BASE_RETRY_DELAY_MS: u64 = 1;

/// Maximum retry delay in milliseconds. Kept below one frame interval.
pub const MAX_RETRY_DELAY_MS: u64 = 8;

/// Send-side options of a sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkOptions {
    /// Handling of payloads above [`MAX_DATAGRAM_PAYLOAD`].
    pub oversize: OversizePolicy,

    /// Retry policy for failed sends.
    pub retry: RetryPolicy,
}

impl From<&PipelinePolicy> for SinkOptions {
    fn from(policy: &PipelinePolicy) -> Self {
        Self {
            oversize: policy.oversize,
            retry: RetryPolicy::with_retries(policy.send_retries),
        }
    }
}

/// A connectionless sink bound to one destination.
pub trait DatagramSink: Send + Sync {
    /// Send `payload` as one datagram. Returns the number of bytes sent.
    fn send(&self, payload: &[u8]) -> TransportResult<usize>;

    /// Release the socket. Idempotent; later sends fail with
    /// [`TransportError::Closed`].
    fn close(&self);

    /// Check if the sink has been closed.
    fn is_closed(&self) -> bool;

    /// Destination this sink sends to.
    fn destination(&self) -> &Destination;
}

/// Opens sinks.
pub trait SinkFactory: Send + Sync {
    /// Open a sink for `destination`.
    fn open(
        &self,
        destination: &Destination,
        options: &SinkOptions,
    ) -> TransportResult<Arc<dyn DatagramSink>>;
}
