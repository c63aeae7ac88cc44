use std::fmt;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use derive_more::From;

use crate::osc::decode::{DecodeError, OscMessage, decode};
use crate::shared::Shared;

/// Largest payload a UDP datagram can carry (IPv4, no jumbograms).
pub const MAX_UDP_PAYLOAD: usize = 65_507;

const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(200);

/// Configuration for [`OscListener::start`].
#[derive(Clone, Debug)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    /// Size of the receive buffer. Datagrams larger than this are truncated
    /// by the OS before we ever see them, so keep it above
    /// `max_datagram_size` for the oversize check to be meaningful.
    pub read_buffer_size: usize,
    /// Socket read timeout. Bounds how long a stop request can go unnoticed
    /// while the loop is blocked in recv.
    pub receive_timeout: Duration,
    /// Datagrams above this size are reported via the error callback and
    /// skipped instead of decoded.
    pub max_datagram_size: usize,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            read_buffer_size: MAX_UDP_PAYLOAD,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            max_datagram_size: MAX_UDP_PAYLOAD,
        }
    }
}

/// Lifecycle of a listener. There is no resurrection out of `Stopped` or
/// `Failed`; start a new listener to retry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Bound,
    Running,
    Stopping,
    Stopped,
    Failed(String),
}

/// Why `start` could not bind the socket. Returned synchronously; no worker
/// thread exists when this comes back.
#[derive(Debug)]
pub enum BindError {
    AddrInUse(io::Error),
    PermissionDenied(io::Error),
    InvalidAddress(io::Error),
    Io(io::Error),
}

impl BindError {
    fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AddrInUse => BindError::AddrInUse(err),
            io::ErrorKind::PermissionDenied => BindError::PermissionDenied(err),
            io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => {
                BindError::InvalidAddress(err)
            }
            _ => BindError::Io(err),
        }
    }

    fn io(&self) -> &io::Error {
        match self {
            BindError::AddrInUse(err)
            | BindError::PermissionDenied(err)
            | BindError::InvalidAddress(err)
            | BindError::Io(err) => err,
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::AddrInUse(err) => write!(f, "address already in use: {}", err),
            BindError::PermissionDenied(err) => write!(f, "permission denied: {}", err),
            BindError::InvalidAddress(err) => write!(f, "invalid bind address: {}", err),
            BindError::Io(err) => write!(f, "could not bind socket: {}", err),
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.io())
    }
}

/// Everything the error callback can receive. Only `Socket` is fatal to the
/// listener; the other two are per-datagram diagnostics and the loop keeps
/// going.
#[derive(Debug, From)]
pub enum ListenerError {
    #[from]
    Decode(DecodeError),
    TooLarge { size: usize, limit: usize },
    #[from]
    Socket(io::Error),
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Decode(err) => write!(f, "decode error: {}", err),
            ListenerError::TooLarge { size, limit } => {
                write!(f, "datagram too large: {} bytes (limit {})", size, limit)
            }
            ListenerError::Socket(err) => write!(f, "socket error: {}", err),
        }
    }
}

impl std::error::Error for ListenerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ListenerError::Decode(err) => Some(err),
            ListenerError::TooLarge { .. } => None,
            ListenerError::Socket(err) => Some(err),
        }
    }
}

/// Handle to a running receive loop.
///
/// One worker thread owns the socket and delivers every decoded message (or
/// per-datagram error) through the callbacks, synchronously and in arrival
/// order. The callbacks run on the worker thread; anything that needs a
/// particular thread must redispatch itself, e.g. over a channel.
pub struct OscListener {
    local_addr: SocketAddr,
    state: Shared<ListenerState>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl OscListener {
    /// Bind `config.bind_addr` and spawn the receive loop.
    ///
    /// A bind failure is returned here and no thread is spawned, so neither
    /// callback will ever fire for a failed start.
    pub fn start<M, E>(
        config: ListenerConfig,
        on_message: M,
        on_error: E,
    ) -> Result<OscListener, BindError>
    where
        M: FnMut(OscMessage) + Send + 'static,
        E: FnMut(ListenerError) + Send + 'static,
    {
        let state = Shared::new(ListenerState::Idle);

        let socket = UdpSocket::bind(config.bind_addr).map_err(BindError::from_io)?;
        socket
            .set_read_timeout(Some(config.receive_timeout))
            .map_err(BindError::Io)?;
        let local_addr = socket.local_addr().map_err(BindError::Io)?;
        state.set(ListenerState::Bound);

        let stop = Arc::new(AtomicBool::new(false));
        let worker = thread::spawn({
            let state = state.clone();
            let stop = Arc::clone(&stop);
            move || receive_loop(socket, config, state, stop, on_message, on_error)
        });

        Ok(OscListener {
            local_addr,
            state,
            stop,
            worker: Some(worker),
        })
    }

    /// Address the socket actually bound, useful when the config asked for
    /// port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        self.state.get()
    }

    /// Ask the receive loop to exit and wait for it.
    ///
    /// Idempotent, and safe to call from any thread. Returns only once the
    /// worker has exited and the socket is closed, so no callback fires
    /// after `stop` returns. Observed stop latency is bounded by
    /// `receive_timeout`.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for OscListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop<M, E>(
    socket: UdpSocket,
    config: ListenerConfig,
    state: Shared<ListenerState>,
    stop: Arc<AtomicBool>,
    mut on_message: M,
    mut on_error: E,
) where
    M: FnMut(OscMessage),
    E: FnMut(ListenerError),
{
    state.set(ListenerState::Running);
    let mut buf = vec![0u8; config.read_buffer_size];
    let mut failed = false;

    loop {
        if stop.load(Ordering::SeqCst) {
            state.set(ListenerState::Stopping);
            break;
        }

        match socket.recv_from(&mut buf) {
            Ok((size, _peer)) => {
                if size > config.max_datagram_size {
                    on_error(ListenerError::TooLarge {
                        size,
                        limit: config.max_datagram_size,
                    });
                    continue;
                }
                match decode(&buf[..size]) {
                    Ok(msg) => on_message(msg),
                    Err(err) => on_error(ListenerError::Decode(err)),
                }
            }
            // Timeout expiry is just the loop's chance to check the stop flag.
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(err) => {
                // A socket error caused by stop() tearing things down is not
                // a failure; anything else kills this listener.
                if !stop.load(Ordering::SeqCst) {
                    state.set(ListenerState::Failed(err.to_string()));
                    on_error(ListenerError::Socket(err));
                    failed = true;
                }
                break;
            }
        }
    }

    // Close the socket before the state flips, so Stopped implies closed.
    drop(socket);
    if !failed {
        state.set(ListenerState::Stopped);
    }
}

#[cfg(test)]
mod tests {
    // The loop's fatal path needs a socket error that is not a timeout.
    // A UDP socket connected to a closed loopback port gets the ICMP
    // rejection back on a later recv, which produces exactly that without
    // any privileges. The start/stop lifecycle around the loop is covered
    // in tests/listener_tests.rs.
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn socket_failure_fails_the_listener_with_one_final_callback() {
        let dead_addr = {
            let placeholder = UdpSocket::bind("127.0.0.1:0").unwrap();
            placeholder.local_addr().unwrap()
            // placeholder dropped here, the port is now closed
        };

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        socket.connect(dead_addr).unwrap();
        socket.send(b"poke").unwrap();

        let config = ListenerConfig::new(socket.local_addr().unwrap());
        let state = Shared::new(ListenerState::Bound);
        let stop = Arc::new(AtomicBool::new(false));

        let (tx, rx) = unbounded();
        let err_tx = tx.clone();
        let worker = thread::spawn({
            let state = state.clone();
            let stop = Arc::clone(&stop);
            move || {
                receive_loop(
                    socket,
                    config,
                    state,
                    stop,
                    move |msg| {
                        let _ = tx.send(Ok(msg));
                    },
                    move |err| {
                        let _ = err_tx.send(Err(err));
                    },
                )
            }
        });

        let event = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("the refused send must surface as a callback");
        match event {
            Err(ListenerError::Socket(_)) => (),
            Err(other) => panic!("expected a socket error, got {}", other),
            Ok(msg) => panic!("expected a socket error, got message to {}", msg.addr),
        }

        // Fatal means the loop exits on its own, the state records the
        // failure, and no further callback fires.
        worker.join().expect("loop thread must exit after a fatal error");
        assert!(matches!(state.get(), ListenerState::Failed(_)));
        assert!(rx.try_recv().is_err());
    }
}
