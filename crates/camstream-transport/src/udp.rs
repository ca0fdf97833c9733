//! UDP datagram sink.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use camstream_ipc::{Destination, OversizePolicy};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::TransportError;
use crate::{DatagramSink, SinkFactory, SinkOptions, TransportResult, MAX_DATAGRAM_PAYLOAD};

/// Resolve a destination to its first socket address.
pub fn resolve_destination(destination: &Destination) -> TransportResult<SocketAddr> {
    (destination.host.as_str(), destination.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Resolve(format!("{destination}: {e}")))?
        .next()
        .ok_or_else(|| TransportError::Resolve(destination.to_string()))
}

/// Counters of one sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkStats {
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub oversized: u64,
}

#[derive(Default)]
struct Counters {
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    oversized: AtomicU64,
}

/// Unconnected UDP socket sending every payload to one address.
pub struct UdpSink {
    destination: Destination,
    addr: SocketAddr,
    socket: RwLock<Option<UdpSocket>>,
    options: SinkOptions,
    counters: Counters,
}

impl UdpSink {
    /// Resolve `destination` and bind an ephemeral local socket.
    #[instrument(name = "udp_sink_open", skip_all, fields(destination = %destination))]
    pub fn open(destination: &Destination, options: SinkOptions) -> TransportResult<Self> {
        let addr = resolve_destination(destination)?;
        let local: SocketAddr = match addr {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).map_err(|e| TransportError::Bind(e.to_string()))?;

        info!(
            local = ?socket.local_addr().ok(),
            remote = %addr,
            "UDP sink opened"
        );

        Ok(Self {
            destination: destination.clone(),
            addr,
            socket: RwLock::new(Some(socket)),
            options,
            counters: Counters::default(),
        })
    }

    /// Resolved remote address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Local address, while open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.read().as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Snapshot of the sink counters.
    pub fn stats(&self) -> SinkStats {
        SinkStats {
            datagrams_sent: self.counters.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
            oversized: self.counters.oversized.load(Ordering::Relaxed),
        }
    }
}

impl DatagramSink for UdpSink {
    fn send(&self, payload: &[u8]) -> TransportResult<usize> {
        let guard = self.socket.read();
        let socket = guard.as_ref().ok_or(TransportError::Closed)?;

        if payload.len() > MAX_DATAGRAM_PAYLOAD {
            self.counters.oversized.fetch_add(1, Ordering::Relaxed);
            if self.options.oversize == OversizePolicy::Drop {
                return Err(TransportError::Oversized {
                    size: payload.len(),
                    limit: MAX_DATAGRAM_PAYLOAD,
                });
            }
        }

        let mut retries = 0;
        loop {
            match socket.send_to(payload, self.addr) {
                Ok(sent) => {
                    self.counters.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .bytes_sent
                        .fetch_add(sent as u64, Ordering::Relaxed);
                    return Ok(sent);
                }
                Err(e) if self.options.retry.should_retry(retries) => {
                    retries += 1;
                    let delay = self.options.retry.delay_for_attempt(retries);
                    debug!(retries, ?delay, "Send failed, retrying: {}", e);
                    thread::sleep(delay);
                }
                Err(e) => {
                    self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                    return Err(TransportError::SendFailed(e.to_string()));
                }
            }
        }
    }

    fn close(&self) {
        if self.socket.write().take().is_some() {
            let stats = self.stats();
            info!(
                datagrams = stats.datagrams_sent,
                bytes = stats.bytes_sent,
                failures = stats.send_failures,
                "UDP sink closed"
            );
        }
    }

    fn is_closed(&self) -> bool {
        self.socket.read().is_none()
    }

    fn destination(&self) -> &Destination {
        &self.destination
    }
}

impl Drop for UdpSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`UdpSink`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpSinkFactory;

impl SinkFactory for UdpSinkFactory {
    fn open(
        &self,
        destination: &Destination,
        options: &SinkOptions,
    ) -> TransportResult<Arc<dyn DatagramSink>> {
        Ok(Arc::new(UdpSink::open(destination, options.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn receiver() -> (UdpSocket, Destination) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, Destination::new("127.0.0.1", port))
    }

    #[test]
    fn test_send_one_datagram_per_payload() {
        let (rx, destination) = receiver();
        let sink = UdpSink::open(&destination, SinkOptions::default()).unwrap();

        assert_eq!(sink.send(b"first").unwrap(), 5);
        assert_eq!(sink.send(&[7u8; 1200]).unwrap(), 1200);

        let mut buf = [0u8; 2048];
        let (n, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"first");
        let (n, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(n, 1200);

        let stats = sink.stats();
        assert_eq!(stats.datagrams_sent, 2);
        assert_eq!(stats.bytes_sent, 1205);
    }

    #[test]
    fn test_send_after_close_fails_cleanly() {
        let (_rx, destination) = receiver();
        let sink = UdpSink::open(&destination, SinkOptions::default()).unwrap();

        sink.close();
        sink.close();
        assert!(sink.is_closed());
        assert!(sink.local_addr().is_none());
        assert!(matches!(sink.send(b"late"), Err(TransportError::Closed)));
    }

    #[test]
    fn test_oversize_drop_policy() {
        let (rx, destination) = receiver();
        let options = SinkOptions {
            oversize: OversizePolicy::Drop,
            ..Default::default()
        };
        let sink = UdpSink::open(&destination, options).unwrap();

        let payload = vec![1u8; MAX_DATAGRAM_PAYLOAD + 1];
        assert!(matches!(
            sink.send(&payload),
            Err(TransportError::Oversized { .. })
        ));
        assert_eq!(sink.stats().oversized, 1);
        assert_eq!(sink.stats().datagrams_sent, 0);

        sink.send(&[2u8; 10]).unwrap();
        let mut buf = [0u8; 64];
        let (n, _) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(n, 10);
    }

    #[test]
    fn test_oversize_send_policy_counts() {
        let (_rx, destination) = receiver();
        let sink = UdpSink::open(&destination, SinkOptions::default()).unwrap();

        // The OS may refuse it; either way it is counted and nothing panics.
        let _ = sink.send(&vec![1u8; MAX_DATAGRAM_PAYLOAD + 100]);
        assert_eq!(sink.stats().oversized, 1);
    }

    #[test]
    fn test_resolve_destination() {
        let addr = resolve_destination(&Destination::new("127.0.0.1", 5000)).unwrap();
        assert_eq!(addr, "127.0.0.1:5000".parse().unwrap());

        let addr = resolve_destination(&Destination::new("::1", 5000)).unwrap();
        assert!(addr.is_ipv6());
    }

    #[test]
    fn test_options_from_policy() {
        let policy = camstream_ipc::PipelinePolicy {
            send_retries: 3,
            oversize: OversizePolicy::Drop,
            ..Default::default()
        };
        let options = SinkOptions::from(&policy);
        assert_eq!(options.retry.max_retries, 3);
        assert_eq!(options.oversize, OversizePolicy::Drop);
    }
}
