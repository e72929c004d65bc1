//! UDP query server.
//!
//! ```text
//!              ┌──────────────┐   push    ┌──────────────┐   pop    ┌──────────────┐
//! datagram ──► │   receiver   │ ────────► │ RequestQueue │ ───────► │    worker    │ ──► reply
//!              │ authenticate │  (drop if │  (bounded)   │          │ parse, look  │
//!              └──────────────┘   full)   └──────────────┘          │ up, answer   │
//!                                                                   └──────────────┘
//! ```
//!
//! The receiver authenticates every datagram before it touches the queue
//! and never waits for the worker: unauthenticated datagrams and datagrams
//! arriving while the queue is full are dropped without an answer. The
//! socket receive timeout bounds how long shutdown takes to be noticed.

pub mod config;
pub mod protocol;
pub mod queue;

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::lookup::LookupEngine;
use crate::{Error, Result};

pub use config::{ServerConfig, ServerSettings};
use protocol::Request;
use queue::{PendingQuery, RequestQueue, INCOMING_BUFFER_SIZE};

/// Request counters, updated by both loops.
#[derive(Debug, Default)]
pub struct ServerStats {
    /// Datagrams read from the socket
    pub received: AtomicU64,
    /// Datagrams failing framing or password checks
    pub rejected: AtomicU64,
    /// Authenticated datagrams dropped because the queue was full
    pub dropped: AtomicU64,
    /// Replies sent
    pub answered: AtomicU64,
}

impl ServerStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A bound query server.
pub struct QueryServer {
    socket: UdpSocket,
    local_addr: SocketAddrV4,
    config: ServerConfig,
    engine: Arc<LookupEngine>,
    queue: Arc<RequestQueue>,
    stats: Arc<ServerStats>,
}

impl QueryServer {
    /// Validate `config` and bind the socket.
    pub fn bind(config: ServerConfig, engine: Arc<LookupEngine>) -> Result<Self> {
        config.validate()?;

        let socket = UdpSocket::bind(config.listen)?;
        socket.set_read_timeout(Some(config.receive_timeout))?;
        let local_addr = match socket.local_addr()? {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(addr) => {
                return Err(Error::Config(format!("bound to IPv6 address {}", addr)))
            }
        };

        log::info!(
            "Listening on {} (queue capacity {})",
            local_addr,
            config.queue_capacity
        );

        Ok(Self {
            socket,
            local_addr,
            queue: Arc::new(RequestQueue::new(config.queue_capacity)),
            config,
            engine,
            stats: Arc::new(ServerStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Serve until halted.
    ///
    /// The receiver runs on the calling thread and the worker on a new one,
    /// which is joined before returning. A socket fault in the receiver
    /// halts the server and is returned as [`Error::Receive`].
    pub fn run(self) -> Result<()> {
        let worker = Worker {
            socket: self.socket.try_clone()?,
            engine: Arc::clone(&self.engine),
            queue: Arc::clone(&self.queue),
            stats: Arc::clone(&self.stats),
            quit_address: self.config.quit_address(),
        };
        let worker = thread::Builder::new()
            .name("ip2loc-worker".into())
            .spawn(move || worker.run())?;

        let received = self.receive_loop();
        self.queue.halt();
        if worker.join().is_err() {
            log::error!("Worker thread panicked");
        }

        match received {
            Ok(()) => {
                log::info!("Server on {} stopped", self.local_addr);
                Ok(())
            }
            Err(e) => {
                log::error!("Encountered error in receive loop, exiting");
                Err(Error::Receive(e))
            }
        }
    }

    /// Run the server on a background thread.
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr;
        let queue = Arc::clone(&self.queue);
        let stats = Arc::clone(&self.stats);
        let thread = thread::Builder::new()
            .name("ip2loc-receiver".into())
            .spawn(move || self.run())?;

        Ok(ServerHandle {
            local_addr,
            queue,
            stats,
            thread,
        })
    }

    fn receive_loop(&self) -> std::io::Result<()> {
        let mut buf = [0u8; INCOMING_BUFFER_SIZE];
        let password = self.config.password.as_slice();

        while !self.queue.is_halted() {
            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok((len, SocketAddr::V4(peer))) => (len, peer),
                Ok((_, SocketAddr::V6(_))) => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) if is_per_datagram_error(&e) => {
                    log::debug!("Dropping datagram after receive error: {}", e);
                    continue;
                }
                Err(e) => {
                    log::error!("Problem in recv_from(): {}", e);
                    self.queue.halt();
                    return Err(e);
                }
            };
            ServerStats::bump(&self.stats.received);

            let Some((legacy, payload)) = protocol::authenticate(&buf[..len], password) else {
                log::debug!("Dropping unauthenticated datagram from {}", peer);
                ServerStats::bump(&self.stats.rejected);
                continue;
            };
            if !self.queue.push(PendingQuery::new(payload, peer, legacy)) {
                log::debug!("Request queue full, dropping datagram from {}", peer);
                ServerStats::bump(&self.stats.dropped);
            }
        }
        Ok(())
    }
}

/// Receive errors caused by a single datagram rather than the socket.
///
/// Windows reports an ICMP port unreachable for an earlier reply as
/// `WSAECONNRESET` and a datagram larger than the buffer as `WSAEMSGSIZE`.
fn is_per_datagram_error(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::ConnectionReset || is_oversized_datagram(e)
}

#[cfg(windows)]
fn is_oversized_datagram(e: &std::io::Error) -> bool {
    const WSAEMSGSIZE: i32 = 10040;
    e.raw_os_error() == Some(WSAEMSGSIZE)
}

#[cfg(not(windows))]
fn is_oversized_datagram(_: &std::io::Error) -> bool {
    false
}

struct Worker {
    socket: UdpSocket,
    engine: Arc<LookupEngine>,
    queue: Arc<RequestQueue>,
    stats: Arc<ServerStats>,
    quit_address: Ipv4Addr,
}

impl Worker {
    fn run(self) {
        while let Some(query) = self.queue.pop() {
            self.handle(&query);
        }
        log::debug!("Worker exiting");
    }

    fn handle(&self, query: &PendingQuery) {
        let Some(request) = protocol::parse_request(query.payload(), query.legacy) else {
            log::debug!("Ignoring malformed request from {}", query.peer);
            return;
        };

        match request {
            Request::Quit => {
                if *query.peer.ip() != self.quit_address {
                    log::debug!("Ignoring quit from {}", query.peer);
                    return;
                }
                log::info!("Quit requested by {}", query.peer);
                self.queue.halt();
            }
            Request::GetLocationForIp {
                command,
                address_text,
                addr,
            } => {
                let location = self.engine.location_for_ip(addr);
                let reply =
                    protocol::location_reply(query.legacy, command, address_text, &location);
                log::trace!(
                    "{} -> {} ({})",
                    Ipv4Addr::from(addr),
                    location.city(),
                    query.peer
                );
                self.send(&reply, query.peer);
            }
        }
    }

    fn send(&self, reply: &[u8], peer: SocketAddrV4) {
        match self.socket.send_to(reply, peer) {
            Ok(sent) if sent == reply.len() => ServerStats::bump(&self.stats.answered),
            Ok(sent) => {
                log::warn!(
                    "In send_to() sending to {}, only {} out of {} bytes sent",
                    peer,
                    sent,
                    reply.len()
                );
            }
            Err(e) => log::warn!("Problem in send_to() sending to {}: {}", peer, e),
        }
    }
}

/// Handle to a server running on a background thread.
pub struct ServerHandle {
    local_addr: SocketAddrV4,
    queue: Arc<RequestQueue>,
    stats: Arc<ServerStats>,
    thread: JoinHandle<Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddrV4 {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Ask the server to stop. Takes effect within one receive timeout.
    pub fn shutdown(&self) {
        self.queue.halt();
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }

    /// Wait for the server to stop and return how it ended.
    pub fn join(self) -> Result<()> {
        self.thread.join().unwrap_or_else(|_| {
            Err(Error::Io(std::io::Error::new(
                ErrorKind::Other,
                "server thread panicked",
            )))
        })
    }
}
