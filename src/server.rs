use crate::protocol::{self, LineFramer, MAX_MESSAGE_LEN, RECV_CHUNK_LEN};
use crate::store::SampleStore;
use crate::types::Role;
use crate::{BridgeError, Result};
use socket2::{Domain, Socket, Type};
use std::io::{ErrorKind, Read};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between retries after a failed accept, and between accept polls
/// while no peer is connected.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Upper bound on how long a blocked read can hide a stop request.
pub const READ_POLL: Duration = Duration::from_millis(100);

/// Pending-connection queue length. One peer is served at a time.
pub const LISTEN_BACKLOG: i32 = 1;

/// Where and how the telemetry listener runs.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub role: Role,
    pub bind_addr: IpAddr,
    /// 0 picks an ephemeral port; see [`TelemetryServer::local_addr`].
    pub port: u16,
    pub backoff: Duration,
    pub read_poll: Duration,
}

impl ServerConfig {
    /// All interfaces on the role's well-known port.
    pub fn for_role(role: Role) -> Self {
        Self {
            role,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: role.default_port(),
            backoff: ACCEPT_BACKOFF,
            read_poll: READ_POLL,
        }
    }
}

/// Observable phase of the server thread.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Starting = 0,
    /// Listening with no peer connected.
    Listening = 1,
    Connected = 2,
    Stopping = 3,
    Stopped = 4,
}

impl ServerState {
    fn from_u8(v: u8) -> ServerState {
        match v {
            0 => ServerState::Starting,
            1 => ServerState::Listening,
            2 => ServerState::Connected,
            3 => ServerState::Stopping,
            _ => ServerState::Stopped,
        }
    }
}

/// State shared between the server thread and its controlling handle.
struct Shared {
    active: AtomicBool,
    state: AtomicU8,
    /// Second handle to the live client socket. Shutting it down from the
    /// controlling thread is what unblocks a pending read.
    client: Mutex<Option<TcpStream>>,
    local_addr: Mutex<Option<SocketAddr>>,
    accepted: AtomicU64,
}

impl Shared {
    fn new() -> Shared {
        Shared {
            active: AtomicBool::new(true),
            state: AtomicU8::new(ServerState::Starting as u8),
            client: Mutex::new(None),
            local_addr: Mutex::new(None),
            accepted: AtomicU64::new(0),
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn set_client(&self, client: Option<TcpStream>) {
        if let Ok(mut slot) = self.client.lock() {
            *slot = client;
        }
    }
}

/// Handle to the single-client telemetry server thread.
///
/// The thread binds the role's port, accepts one peer at a time, decodes
/// every received line and publishes good samples into the shared store.
/// Peers may disconnect and reconnect freely; the server returns to
/// accepting on its own.
pub struct TelemetryServer {
    shared: Arc<Shared>,
    role: Role,
    thread: Option<JoinHandle<()>>,
}

impl TelemetryServer {
    /// Spawn the server thread.
    ///
    /// Socket setup happens on the new thread. A bind or listen failure is
    /// logged there and leaves the server in [`ServerState::Stopped`]; it is
    /// not reported here.
    pub fn start(config: ServerConfig, store: Arc<SampleStore>) -> Result<TelemetryServer> {
        let shared = Arc::new(Shared::new());
        let role = config.role;
        let thread_shared = shared.clone();

        let thread = std::thread::Builder::new()
            .name(format!("simplecontroller-tcp-{}", role))
            .spawn(move || {
                server_loop(config, store, thread_shared);
            })
            .map_err(|e| BridgeError::ThreadSpawn(format!("telemetry server: {}", e)))?;

        Ok(TelemetryServer {
            shared,
            role,
            thread: Some(thread),
        })
    }

    /// True until [`TelemetryServer::stop`] is called or socket setup fails.
    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Address the listener is bound to, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared.local_addr.lock().ok().and_then(|a| *a)
    }

    /// Number of peers accepted since start.
    pub fn connections_accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::Acquire)
    }

    /// Stop the server and wait for its thread to exit.
    ///
    /// Shuts down the client socket (if any) to unblock a pending read; the
    /// listener is polled and closes within one backoff interval. Calling
    /// this again is a no-op.
    pub fn stop(&mut self) {
        if self.shared.active.swap(false, Ordering::AcqRel) {
            let client = self.shared.client.lock().ok().and_then(|mut c| c.take());
            if let Some(client) = client {
                let _ = client.shutdown(Shutdown::Both);
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Telemetry server thread for {} hand panicked", self.role);
            }
        }
    }
}

impl Drop for TelemetryServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn open_listener(config: &ServerConfig) -> std::io::Result<TcpListener> {
    let addr = SocketAddr::new(config.bind_addr, config.port);
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    // Accept is polled so a stop request is seen within one backoff.
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// Accept one pending peer, or `Ok(None)` if nobody is waiting.
fn accept_client(listener: &TcpListener, config: &ServerConfig) -> std::io::Result<Option<TcpStream>> {
    let (stream, addr) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
        Err(e) => return Err(e),
    };
    // Some platforms hand back the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(config.read_poll))?;
    log::info!("Controller {} connected to {} hand server", addr, config.role);
    Ok(Some(stream))
}

/// One accept attempt while no peer is connected.
///
/// Sleeps one backoff when nobody is waiting or when accept fails. A failure
/// after stop was requested is expected and not logged.
fn poll_accept(listener: &TcpListener, config: &ServerConfig, shared: &Shared) -> Option<TcpStream> {
    match accept_client(listener, config) {
        Ok(Some(accepted)) => {
            match accepted.try_clone() {
                Ok(handle) => shared.set_client(Some(handle)),
                Err(e) => log::warn!("Failed to clone {} hand client socket: {}", config.role, e),
            }
            shared.accepted.fetch_add(1, Ordering::AcqRel);
            shared.set_state(ServerState::Connected);
            Some(accepted)
        }
        Ok(None) => {
            std::thread::sleep(config.backoff);
            None
        }
        Err(e) => {
            if shared.is_active() {
                log::warn!("Accept failed for {} hand: {}", config.role, e);
                std::thread::sleep(config.backoff);
            }
            None
        }
    }
}

fn publish_chunk(chunk: &[u8], framer: &mut LineFramer, store: &SampleStore, role: Role) {
    framer.push(chunk, |line| {
        match protocol::decode_bytes(line) {
            Ok(sample) => {
                log::trace!("{} hand sample: {:?}", role, sample);
                store.publish(sample);
            }
            Err(e) => {
                log::warn!(
                    "Malformed data from {} hand controller: {:?} ({})",
                    role,
                    String::from_utf8_lossy(line),
                    e
                );
            }
        }
    });
}

/// The telemetry server loop runs in a dedicated thread.
///
/// States: Starting -> Listening <-> Connected -> Stopping -> Stopped.
/// At most one client socket exists; accept is not attempted while one is
/// open, so a second peer waits in the listen backlog until the first leaves.
fn server_loop(config: ServerConfig, store: Arc<SampleStore>, shared: Arc<Shared>) {
    let role = config.role;
    log::info!(
        "Telemetry server thread started for {} hand on port {}",
        role,
        config.port
    );

    let listener = match open_listener(&config) {
        Ok(l) => l,
        Err(e) => {
            log::error!(
                "Telemetry server for {} hand failed to listen on {}:{}: {}",
                role,
                config.bind_addr,
                config.port,
                e
            );
            shared.active.store(false, Ordering::Release);
            shared.set_state(ServerState::Stopped);
            return;
        }
    };

    if let Ok(addr) = listener.local_addr() {
        if let Ok(mut slot) = shared.local_addr.lock() {
            *slot = Some(addr);
        }
        log::info!("Telemetry server listening on {} for {} hand", addr, role);
    }
    shared.set_state(ServerState::Listening);

    let mut client: Option<TcpStream> = None;
    let mut framer = LineFramer::new();
    let mut buf = [0u8; MAX_MESSAGE_LEN];

    while shared.is_active() {
        if client.is_none() {
            client = poll_accept(&listener, &config, &shared);
            if client.is_some() {
                framer.reset();
            }
            continue;
        }
        let Some(stream) = client.as_mut() else {
            continue;
        };

        match stream.read(&mut buf[..RECV_CHUNK_LEN]) {
            Ok(0) => {
                if shared.is_active() {
                    log::info!("Controller disconnected from {} hand server", role);
                }
                client = None;
                shared.set_client(None);
                shared.set_state(ServerState::Listening);
            }
            Ok(n) => publish_chunk(&buf[..n], &mut framer, &store, role),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                client = None;
                shared.set_client(None);
                if !shared.is_active() {
                    break;
                }
                log::warn!("Recv failed for {} hand: {}", role, e);
                shared.set_state(ServerState::Listening);
            }
        }
    }

    shared.set_state(ServerState::Stopping);
    drop(client);
    shared.set_client(None);
    drop(listener);
    shared.set_state(ServerState::Stopped);
    log::info!("Telemetry server thread stopped for {} hand", role);
}
