//! Client for the privileged VPN daemon.
//!
//! [`DaemonClient`] owns at most one socket to the daemon. Requests are written
//! from the caller's thread; a dedicated reader thread frames and decodes
//! everything the daemon sends, applies it to the local [`ClientState`],
//! notifies subscribers, and hands replies to the callers waiting for them.
//!
//! # Example
//! ```no_run
//! use vpnd_client::{ClientConfig, DaemonClient};
//!
//! let client = DaemonClient::new(ClientConfig::default());
//! client.open(true).unwrap();
//! let state = client.vpn_state().unwrap();
//! println!("tunnel state: {:?}", state.state_val);
//! ```
mod commands;
mod events;
mod lifecycle;
mod state;
mod thread;
mod waiter;

#[cfg(test)]
pub(crate) mod testing;

use std::{
    io,
    net::{Shutdown, TcpStream},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::Receiver,
    },
    time::Duration,
};

use log::{debug, warn};
use thiserror::Error;

use crate::{
    config::ClientConfig,
    portfile::{PortFile, PortInfoError, PortInfoSource},
    protocol::{
        CodecError, Envelope, ProtocolTransport, Request, Response, ResponseKind,
        TransportError, response::PingServersResp,
    },
    servers::SelectionError,
};

pub use commands::{ConnectOutcome, ConnectSettings, Credentials, ServerChoice};
pub use events::ClientEvent;
pub use state::ClientState;

use events::Subscribers;
use state::{ApplyOptions, FollowUp};
use thread::ThreadPool;
use waiter::{Matcher, Pending, Waiters};

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("not connected to the daemon")]
    NotConnected,
    #[error("connection to the daemon closed")]
    ConnectionClosed,
    #[error("transport error: {0}")]
    Transport(Arc<TransportError>),
    #[error("no response from the daemon to '{command}'")]
    Timeout { command: &'static str },
    #[error("{message}")]
    Daemon { message: String, error_type: i64 },
    #[error("unsupported daemon version v{daemon} (minimum required v{required})")]
    UnsupportedVersion { daemon: String, required: String },
    #[error("timeout obtaining the servers list")]
    ServersTimeout,
    #[error("unexpected '{command}' response")]
    Unexpected { command: String },
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error("daemon connection parameters unknown: {0}")]
    PortInfo(Arc<PortInfoError>),
    #[error("bad response payload: {0}")]
    Codec(Arc<CodecError>),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("superseded by a newer request")]
    Superseded,
}

impl From<TransportError> for ClientError {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Closed => ClientError::ConnectionClosed,
            other => ClientError::Transport(Arc::new(other)),
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(value: io::Error) -> Self {
        TransportError::Io(value).into()
    }
}

impl From<PortInfoError> for ClientError {
    fn from(value: PortInfoError) -> Self {
        ClientError::PortInfo(Arc::new(value))
    }
}

impl From<CodecError> for ClientError {
    fn from(value: CodecError) -> Self {
        ClientError::Codec(Arc::new(value))
    }
}

/// Availability of the daemon channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    NotConnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PauseState {
    #[default]
    Resumed,
    Pausing,
    Paused,
    Resuming,
}

/// The live socket.
struct Link {
    generation: u64,
    transport: ProtocolTransport<TcpStream>,
}

impl Link {
    fn shutdown(&self) {
        // Unblocks the reader thread of this socket.
        let _ = self.transport.get_ref().shutdown(Shutdown::Both);
    }
}

/// One coalesced ping round.
#[derive(Default)]
struct Flight {
    outcome: Mutex<Option<Result<PingServersResp, ClientError>>>,
    done: Condvar,
}

impl Flight {
    fn finish(&self, outcome: Result<PingServersResp, ClientError>) {
        *lock(&self.outcome) = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> Result<PingServersResp, ClientError> {
        let mut outcome = lock(&self.outcome);
        loop {
            if let Some(outcome) = outcome.as_ref() {
                return outcome.clone();
            }
            outcome = self
                .done
                .wait(outcome)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) struct Inner {
    config: ClientConfig,
    port_source: Box<dyn PortInfoSource>,
    /// Identifies the current socket; bumped on every (re)connect and close.
    generation: AtomicU64,
    next_idx: AtomicU64,
    link: Mutex<Option<Link>>,
    connection: Mutex<ConnectionState>,
    handshake: Mutex<()>,
    waiters: Arc<Waiters>,
    state: Mutex<ClientState>,
    subscribers: Subscribers,
    pool: ThreadPool,
    ping_flight: Mutex<Option<Arc<Flight>>>,
    connect_request: AtomicU64,
    geo_request: AtomicU64,
    /// Restored by `resume`.
    firewall_before_pause: AtomicBool,
    /// Bumped by `close` to stop a running retry loop.
    close_epoch: AtomicU64,
    this: Weak<Inner>,
}

impl Inner {
    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn connection_state(&self) -> ConnectionState {
        *lock(&self.connection)
    }

    fn set_connection_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = lock(&self.connection);
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            debug!("daemon connection: {state:?}");
            self.subscribers.emit(ClientEvent::ConnectionState(state));
        }
    }

    fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            min_daemon_version: self.config.min_daemon_version.clone(),
            firewall_off_on_disconnect: self.config.firewall_off_on_disconnect,
            geo_lookup_on_change: self.config.geo_lookup_on_change,
        }
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        lock(&self.state)
    }

    /// Write one request on the current socket and return its index.
    ///
    /// With a matcher, the waiter is registered before the write.
    fn write(
        &self,
        request: &Request,
        kinds: Option<&[ResponseKind]>,
    ) -> Result<(u64, Option<Pending>), ClientError> {
        let mut link = lock(&self.link);
        let link = link.as_mut().ok_or(ClientError::NotConnected)?;

        let idx = self.next_idx.fetch_add(1, Ordering::SeqCst);
        let pending = kinds.map(|kinds| {
            self.waiters.register(
                link.generation,
                Matcher::idx(idx).with_kinds(kinds),
                request.command(),
            )
        });

        let envelope =
            Envelope::new(request, idx).with_secret(self.config.protocol_secret.as_deref());
        debug!("==> {} [{idx}]", request.command());
        link.transport.write_request(&envelope)?;

        Ok((idx, pending))
    }

    /// Fire-and-forget send.
    fn send(&self, request: &Request) -> Result<u64, ClientError> {
        Ok(self.write(request, None)?.0)
    }

    /// Send and wait for the reply carrying the request's index, or for any
    /// response of the `kinds` given.
    fn send_and_wait(
        &self,
        request: &Request,
        kinds: &[ResponseKind],
        timeout: Duration,
    ) -> Result<Response, ClientError> {
        let (_, pending) = self.write(request, Some(kinds))?;
        match pending {
            Some(pending) => pending.wait(timeout),
            None => Err(ClientError::NotConnected),
        }
    }

    fn request(&self, request: &Request) -> Result<Response, ClientError> {
        self.send_and_wait(request, &[], self.config.response_timeout())
    }

    /// Handle one message read from socket `generation`.
    fn handle_response(&self, generation: u64, response: Response) {
        debug!("<== {} [{}]", response.command, response.idx);
        if generation != self.current_generation() {
            debug!("dropping message from a replaced socket");
            return;
        }

        let applied = self.state().apply(&response, &self.apply_options());
        for event in applied.events {
            self.subscribers.emit(event);
        }
        for follow_up in applied.follow_ups {
            self.spawn_follow_up(follow_up);
        }

        let resolved = self.waiters.dispatch(generation, &response);
        if resolved == 0 && !response.is_push() {
            debug!("no waiter for {} [{}]", response.command, response.idx);
        }
    }

    fn spawn_follow_up(&self, follow_up: FollowUp) {
        let Some(inner) = self.this.upgrade() else {
            return;
        };
        self.pool.execute(move || {
            let client = DaemonClient { inner };
            let result = match follow_up {
                FollowUp::AccountStatus => client.account_status().map(drop),
                FollowUp::DisableFirewall => client.apply_firewall(false),
                FollowUp::GeoLookup => client.geo_lookup(false).map(drop),
            };
            if let Err(e) = result {
                warn!("{follow_up:?} after daemon push failed: {e}");
            }
        });
    }

    /// Drop the current socket, if any, and fail its waiters.
    fn drop_link(&self, error: ClientError) {
        let link = lock(&self.link).take();
        if let Some(link) = link {
            link.shutdown();
            self.waiters.reject_generation(link.generation, error);
        }
    }
}

impl Drop for Inner {
    // Also reached on the reader thread when it held the last strong
    // reference, in which case `DaemonClient::drop` skipped `close`.
    fn drop(&mut self) {
        if let Some(link) = lock(&self.link).take() {
            link.shutdown();
        }
        self.waiters.reject_all(ClientError::ConnectionClosed);
    }
}

/// Handle to the daemon.
///
/// Clones share one socket; dropping the last clone closes it.
#[derive(Clone)]
pub struct DaemonClient {
    inner: Arc<Inner>,
}

impl DaemonClient {
    /// Client reading the daemon's port and secret from the configured port file.
    pub fn new(config: ClientConfig) -> Self {
        let source = PortFile(config.port_file.clone());
        Self::with_port_source(config, source)
    }

    pub fn with_port_source(config: ClientConfig, source: impl PortInfoSource + 'static) -> Self {
        let pool = ThreadPool::new(config.worker_threads);
        let inner = Arc::new_cyclic(|this| Inner {
            config,
            port_source: Box::new(source),
            generation: AtomicU64::new(0),
            next_idx: AtomicU64::new(1),
            link: Mutex::new(None),
            connection: Mutex::new(ConnectionState::NotConnected),
            handshake: Mutex::new(()),
            waiters: Waiters::new(),
            state: Mutex::new(ClientState::default()),
            subscribers: Subscribers::default(),
            pool,
            ping_flight: Mutex::new(None),
            connect_request: AtomicU64::new(0),
            geo_request: AtomicU64::new(0),
            firewall_before_pause: AtomicBool::new(true),
            close_epoch: AtomicU64::new(0),
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    /// Snapshot of the local view of the daemon.
    pub fn state(&self) -> ClientState {
        self.inner.state().clone()
    }

    /// Run `f` against the local view without copying it.
    pub fn with_state<T>(&self, f: impl FnOnce(&ClientState) -> T) -> T {
        f(&self.inner.state())
    }

    /// Receive every [`ClientEvent`] from now on.
    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        self.inner.subscribers.subscribe()
    }

    /// Number of callers currently waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.waiters.len()
    }

    /// Close the socket. Waiting callers fail with [`ClientError::ConnectionClosed`].
    pub fn close(&self) {
        self.inner.close_epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.drop_link(ClientError::ConnectionClosed);
        self.inner.waiters.reject_all(ClientError::ConnectionClosed);
        self.inner.set_connection_state(ConnectionState::NotConnected);
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        match self.connection_state() {
            ConnectionState::Connected => Ok(()),
            _ => Err(ClientError::NotConnected),
        }
    }
}

impl Drop for DaemonClient {
    fn drop(&mut self) {
        // The reader thread only holds a weak reference.
        if Arc::strong_count(&self.inner) == 1 {
            self.close();
        }
    }
}
