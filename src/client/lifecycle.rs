//! Opening, authenticating and tearing down the daemon socket.
use std::{
    net::{Ipv4Addr, SocketAddr, TcpStream},
    sync::{Arc, atomic::Ordering},
    thread,
};

use log::{debug, error, info, warn};

use crate::{
    protocol::{
        ProtocolTransport, Request, ResponseKind, ResponseReader, TransportError,
        response::HelloResp,
    },
    version,
};

use super::{ClientError, ConnectionState, DaemonClient, Inner, Link, lock, waiter::Matcher};

impl DaemonClient {
    /// Connect and authenticate to the daemon.
    ///
    /// With `retry`, failed attempts are repeated after
    /// `reconnect_delay_ms`, up to `reconnect_attempts` in total. An
    /// unsupported daemon version is never retried.
    pub fn open(&self, retry: bool) -> Result<(), ClientError> {
        if !retry {
            return self.connect_once();
        }

        let epoch = self.inner.close_epoch.load(Ordering::SeqCst);
        let attempts = self.inner.config.reconnect_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match self.connect_once() {
                Ok(()) => return Ok(()),
                Err(e @ ClientError::UnsupportedVersion { .. }) => return Err(e),
                Err(e) => e,
            };
            if attempt >= attempts {
                error!("giving up on the daemon after {attempts} attempts: {err}");
                return Err(err);
            }

            let delay = self.inner.config.reconnect_delay();
            warn!("daemon connection attempt {attempt}/{attempts} failed: {err}; retrying in {delay:?}");
            thread::sleep(delay);
            if self.inner.close_epoch.load(Ordering::SeqCst) != epoch {
                debug!("client closed while waiting to reconnect");
                return Err(err);
            }
            attempt += 1;
        }
    }

    /// One connection attempt. Replaces any existing socket.
    fn connect_once(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let _handshake = lock(&inner.handshake);

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.drop_link(ClientError::ConnectionClosed);
        inner.set_connection_state(ConnectionState::Connecting);

        if let Err(e) = self.handshake(generation) {
            inner.drop_link_of(generation, e.clone());
            if inner.current_generation() == generation {
                inner.set_connection_state(ConnectionState::NotConnected);
            }
            return Err(e);
        }

        if inner.current_generation() != generation {
            return Err(ClientError::ConnectionClosed);
        }
        inner.set_connection_state(ConnectionState::Connected);
        info!(
            "connected to daemon v{}",
            inner.state().daemon_version
        );
        self.after_handshake();
        Ok(())
    }

    fn handshake(&self, generation: u64) -> Result<(), ClientError> {
        let inner = &self.inner;
        let config = &inner.config;

        let port = inner.port_source.port_info()?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port.port));
        debug!("connecting to daemon at {addr}");
        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout())?;
        stream.set_nodelay(true)?;
        let read_half = stream.try_clone()?;

        *lock(&inner.link) = Some(Link {
            generation,
            transport: ProtocolTransport::new(stream),
        });
        spawn_reader(inner, generation, read_half)?;

        // The list follows the Hello reply under the same index, so it is
        // awaited by kind and registered before the Hello goes out.
        let servers = inner.waiters.register(
            generation,
            Matcher::kinds(&[ResponseKind::ServerListResp]),
            "GetServers",
        );

        let hello = Request::Hello {
            version: config.app_version.clone(),
            secret: port.secret,
            get_servers_list: true,
            get_status: true,
            get_config_params: true,
            keep_daemon_alone: true,
            get_split_tunnel_status: true,
            get_wifi_current_state: true,
        };
        let reply = inner.send_and_wait(&hello, &[ResponseKind::HelloResp], config.hello_timeout())?;
        if reply.kind != ResponseKind::HelloResp {
            return Err(ClientError::Unexpected {
                command: reply.command,
            });
        }

        let hello: HelloResp = reply.parse()?;
        if version::is_older(&hello.version, &config.min_daemon_version) {
            return Err(ClientError::UnsupportedVersion {
                daemon: hello.version,
                required: config.min_daemon_version.clone(),
            });
        }

        servers
            .wait(config.servers_timeout())
            .map_err(|e| match e {
                ClientError::Timeout { .. } => ClientError::ServersTimeout,
                other => other,
            })?;
        Ok(())
    }

    fn after_handshake(&self) {
        for (key, value) in &self.inner.config.daemon_preferences {
            if let Err(e) = self.set_preference(key, value) {
                warn!("failed to push preference '{key}': {e}");
            }
        }

        if self.inner.config.ping_on_connect {
            let client = self.clone();
            self.inner.pool.execute(move || {
                if let Err(e) = client.ping_servers() {
                    warn!("initial ping failed: {e}");
                }
            });
        }
    }
}

/// Read loop for one socket. Holds only a weak reference so that dropping the
/// last client handle tears everything down.
fn spawn_reader(inner: &Arc<Inner>, generation: u64, stream: TcpStream) -> Result<(), ClientError> {
    let weak = Arc::downgrade(inner);
    thread::Builder::new()
        .name(format!("vpnd-reader-{generation}"))
        .spawn(move || {
            let mut reader = ResponseReader::new(stream);
            loop {
                let result = reader.read_response();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                match result {
                    Ok(response) => inner.handle_response(generation, response),
                    Err(e) if !e.is_fatal() => warn!("skipping daemon message: {e}"),
                    Err(e) => {
                        inner.on_socket_closed(generation, e);
                        break;
                    }
                }
            }
            debug!("reader for socket {generation} stopped");
        })?;
    Ok(())
}

impl Inner {
    /// Drop the socket `generation` if it is still the live one.
    pub(super) fn drop_link_of(&self, generation: u64, error: ClientError) {
        let link = {
            let mut link = lock(&self.link);
            match link.as_ref() {
                Some(l) if l.generation == generation => link.take(),
                _ => None,
            }
        };
        if let Some(link) = link {
            link.shutdown();
        }
        self.waiters.reject_generation(generation, error);
    }

    fn on_socket_closed(&self, generation: u64, error: TransportError) {
        let error = ClientError::from(error);
        if generation != self.current_generation() {
            debug!("replaced socket {generation} closed: {error}");
            self.waiters.reject_generation(generation, error);
            return;
        }

        info!("daemon connection lost: {error}");
        self.set_connection_state(ConnectionState::NotConnected);
        self.drop_link_of(generation, error);
    }
}
