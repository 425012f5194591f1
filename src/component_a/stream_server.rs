//! stream_server.rs
//! Pushes serialized snapshots to one TCP client at a fixed cadence (~30 Hz).
//! - Listening → Connected → Listening, until cancelled
//! - backlog of 1: a second client waits in the kernel queue until the first leaves
//! - a failed write means the client is gone; the server goes back to accept
//! - each frame is a full `read_snapshot()` copy, so a client never sees a partial snapshot

use socket2::{Domain, Protocol, Socket, Type};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::{
    io::{self, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    time::{Duration, Instant},
};
use log::{debug, error, info, warn};

use crate::component_a::{
    serializer::{WireFormat, serialize},
    state_cell::SharedStateCell,
};
use crate::utils::{
    cancel::CancelToken,
    metrics::{DeadlineComponent, SharedMetrics, lock_metrics},
};

const ACCEPT_POLL: Duration = Duration::from_millis(50);
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct StreamServer {
    listener: TcpListener,
    cell: Arc<SharedStateCell>,
    format: WireFormat,
    period: Duration,
    metrics: SharedMetrics,
}

impl StreamServer {
    /// Binds `addr` with a single-connection backlog.
    pub fn bind(
        addr: SocketAddr,
        cell: Arc<SharedStateCell>,
        format: WireFormat,
        period: Duration,
        metrics: SharedMetrics,
    ) -> io::Result<Self> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            cell,
            format,
            period,
            metrics,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn run(&self, cancel: &CancelToken) {
        match self.local_addr() {
            Ok(addr) => info!("[StreamServer] starting up on {}", addr),
            Err(e) => warn!("[StreamServer] starting up (local addr unknown: {})", e),
        }

        while !cancel.is_cancelled() {
            debug!("[StreamServer] waiting for a connection");
            let Some((stream, peer)) = self.accept(cancel) else {
                break;
            };
            info!("[StreamServer] client connected: {}", peer);
            lock_metrics(&self.metrics).clients_served += 1;

            let frames = self.serve_client(stream, cancel);
            info!("[StreamServer] client {} disconnected after {} frames", peer, frames);
        }

        debug!("[StreamServer] stopped.");
    }

    /// Polls the non-blocking listener until a client arrives or `cancel` fires.
    fn accept(&self, cancel: &CancelToken) -> Option<(TcpStream, SocketAddr)> {
        loop {
            match self.listener.accept() {
                Ok(conn) => return Some(conn),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !cancel.sleep(ACCEPT_POLL) {
                        return None;
                    }
                }
                Err(e) => {
                    error!("[StreamServer] accept failed: {}", e);
                    if !cancel.sleep(ACCEPT_POLL) {
                        return None;
                    }
                }
            }
        }
    }

    /// Send loop for one client. Returns the number of frames written.
    fn serve_client(&self, mut stream: TcpStream, cancel: &CancelToken) -> u64 {
        if let Err(e) = prepare_client(&stream) {
            warn!("[StreamServer] could not configure client socket: {}", e);
            return 0;
        }

        let sleeper = SpinSleeper::new(100_000)
            .with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_deadline = Instant::now();
        let mut frames = 0u64;

        while !cancel.is_cancelled() {
            let snapshot = self.cell.read_snapshot();
            let text = match serialize(&snapshot, self.format) {
                Ok(text) => text,
                Err(e) => {
                    error!("[StreamServer] could not encode snapshot {}: {}", snapshot.seq, e);
                    lock_metrics(&self.metrics).encode_failures += 1;
                    String::new()
                }
            };

            if !text.is_empty() {
                if let Err(e) = stream.write_all(text.as_bytes()) {
                    debug!("[StreamServer] write failed: {}", e);
                    break;
                }
                frames += 1;
                lock_metrics(&self.metrics).frames_sent += 1;
            }

            next_deadline += self.period;
            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
            } else {
                lock_metrics(&self.metrics).record_deadline_miss(DeadlineComponent::Stream);
                next_deadline = now;
            }
        }

        frames
    }
}

fn prepare_client(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::metrics::shared_metrics;
    use std::{io::Read, thread};

    #[test]
    fn binds_ephemeral_port_and_stops_on_cancel() {
        let server = StreamServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(SharedStateCell::new()),
            WireFormat::Json,
            Duration::from_millis(10),
            shared_metrics(),
        )
        .unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);

        let cancel = CancelToken::new();
        let handle = {
            let cancel = cancel.clone();
            thread::spawn(move || server.run(&cancel))
        };
        thread::sleep(Duration::from_millis(60));
        cancel.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn client_receives_xml_frames() {
        let server = StreamServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(SharedStateCell::new()),
            WireFormat::Xml,
            Duration::from_millis(10),
            shared_metrics(),
        )
        .unwrap();
        let addr = server.local_addr().unwrap();
        let cancel = CancelToken::new();
        let handle = {
            let cancel = cancel.clone();
            thread::spawn(move || server.run(&cancel))
        };

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut buf = vec![0u8; 4096];
        let mut text = String::new();
        while text.matches("</GripperData>").count() < 2 {
            let n = client.read(&mut buf).unwrap();
            assert!(n > 0, "server closed early");
            text.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }
        assert!(text.starts_with("<?xml"));
        assert!(text.contains("<pmm>-1.0</pmm>"));

        drop(client);
        cancel.cancel();
        handle.join().unwrap();
    }
}
