//! heartbeat.rs
//! Best-effort presence announcement: one UDP datagram per period to a group address.
//!
//! Payload is the wall-clock time in epoch seconds as text, NUL-terminated. TTL (IPv4) or
//! hop limit (IPv6) bounds the scope. Independent of the stream server's client state;
//! send errors are logged and counted, never retried.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::{Duration, Instant, SystemTime},
};
use log::{debug, info, warn};

use crate::component_a::serializer::{epoch_secs, float_text};
use crate::utils::{
    cancel::CancelToken,
    metrics::{SharedMetrics, lock_metrics},
};

pub struct Heartbeat {
    socket: Socket,
    target: SockAddr,
    target_addr: SocketAddr,
    period: Duration,
    metrics: SharedMetrics,
}

impl Heartbeat {
    pub fn new(
        group: IpAddr,
        port: u16,
        ttl: u32,
        period: Duration,
        metrics: SharedMetrics,
    ) -> io::Result<Self> {
        let target_addr = SocketAddr::new(group, port);
        let domain = Domain::for_address(target_addr);
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        let local: SocketAddr = match group {
            IpAddr::V4(_) => {
                socket.set_multicast_ttl_v4(ttl)?;
                SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
            }
            IpAddr::V6(_) => {
                socket.set_multicast_hops_v6(ttl)?;
                SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
            }
        };
        socket.bind(&local.into())?;

        Ok(Self {
            socket,
            target: target_addr.into(),
            target_addr,
            period,
            metrics,
        })
    }

    /// Sends one announcement stamped `now`.
    pub fn beat(&self, now: SystemTime) -> io::Result<usize> {
        self.socket.send_to(&payload(now), &self.target)
    }

    pub fn run(&self, cancel: &CancelToken) {
        info!(
            "[Heartbeat] announcing to {} every {:?}",
            self.target_addr, self.period
        );
        let mut next = Instant::now();

        while !cancel.is_cancelled() {
            match self.beat(SystemTime::now()) {
                Ok(_) => lock_metrics(&self.metrics).heartbeats_sent += 1,
                Err(e) => {
                    warn!("[Heartbeat] send to {} failed: {}", self.target_addr, e);
                    lock_metrics(&self.metrics).heartbeat_failures += 1;
                }
            }
            next += self.period;
            if !cancel.sleep_until(next) {
                break;
            }
        }

        debug!("[Heartbeat] stopped.");
    }
}

pub fn payload(now: SystemTime) -> Vec<u8> {
    let mut bytes = float_text(epoch_secs(now)).into_bytes();
    bytes.push(0);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::metrics::shared_metrics;
    use std::{
        net::UdpSocket,
        thread,
        time::UNIX_EPOCH,
    };

    #[test]
    fn payload_is_nul_terminated_timestamp() {
        let bytes = payload(UNIX_EPOCH + Duration::from_millis(1_500));
        assert_eq!(bytes, b"1.5\0");
    }

    #[test]
    fn announcements_reach_a_listener() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = receiver.local_addr().unwrap().port();

        let metrics = shared_metrics();
        let heartbeat = Heartbeat::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            1,
            Duration::from_millis(20),
            metrics.clone(),
        )
        .unwrap();

        let cancel = CancelToken::new();
        let handle = {
            let cancel = cancel.clone();
            thread::spawn(move || heartbeat.run(&cancel))
        };

        let mut buf = [0u8; 64];
        for _ in 0..2 {
            let n = receiver.recv(&mut buf).unwrap();
            assert_eq!(buf[n - 1], 0);
            let text = std::str::from_utf8(&buf[..n - 1]).unwrap();
            let secs: f64 = text.parse().unwrap();
            assert!(secs > 1.0e9, "{text}");
        }

        cancel.cancel();
        handle.join().unwrap();
        assert!(lock_metrics(&metrics).heartbeats_sent >= 2);
    }
}
