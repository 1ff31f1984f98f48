//! In-process daemon for client tests.
use std::{
    io::{Read, Write},
    net::{Shutdown, TcpListener, TcpStream},
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};
use serde_json::{Value, json};

use crate::{
    config::ClientConfig,
    portfile::PortInfo,
    protocol::{
        LineFramer, Request, Response, ResponseKind,
        codec::{decode_request, encode_response},
    },
};

pub(crate) const DAEMON_VERSION: &str = "3.11.15";

pub(crate) enum Reply {
    Send(Response),
    /// Wait before the next reply.
    Delay(Duration),
    Close,
}

type Handler = dyn Fn(u64, &Request) -> Vec<Reply> + Send + Sync;

pub(crate) struct FakeDaemon {
    port: u16,
    secret: u64,
    received: Arc<Mutex<Vec<Request>>>,
}

impl FakeDaemon {
    pub fn start(handler: impl Fn(u64, &Request) -> Vec<Reply> + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let secret = 0xdead_beef_0042;
        let received = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<Handler> = Arc::new(handler);

        let log = Arc::clone(&received);
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        let handler = Arc::clone(&handler);
                        let log = Arc::clone(&log);
                        thread::spawn(move || handle_connection(stream, secret, handler, log));
                    }
                    Err(e) => warn!("broken connection: {e:?}"),
                }
            }
        });

        Self {
            port,
            secret,
            received,
        }
    }

    /// Answers the handshake and acknowledges everything else.
    pub fn standard() -> Self {
        Self::start(standard)
    }

    pub fn port_info(&self) -> PortInfo {
        PortInfo {
            port: self.port,
            secret: self.secret,
        }
    }

    pub fn received(&self) -> Vec<Request> {
        self.received.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<&'static str> {
        self.received().iter().map(Request::command).collect()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| **c == command).count()
    }

    /// Wait until a request named `command` has been received.
    pub fn wait_for(&self, command: &str) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.count(command) > 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }
}

fn handle_connection(
    mut stream: TcpStream,
    secret: u64,
    handler: Arc<Handler>,
    log: Arc<Mutex<Vec<Request>>>,
) {
    let mut framer = LineFramer::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for message in framer.push(&chunk[..n]) {
            let (idx, request) = match decode_request(&message) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("fake daemon: bad request: {e}");
                    continue;
                }
            };
            debug!("fake daemon <== {} [{idx}]", request.command());
            log.lock().unwrap().push(request.clone());

            let replies = match &request {
                Request::Hello { secret: s, .. } if *s != secret => vec![
                    reply(
                        ResponseKind::ErrorResp,
                        idx,
                        json!({"ErrorMessage": "secret verification error"}),
                    ),
                    Reply::Close,
                ],
                _ => handler(idx, &request),
            };

            for reply in replies {
                match reply {
                    Reply::Send(response) => {
                        let mut line = encode_response(&response).unwrap();
                        line.push('\n');
                        if stream.write_all(line.as_bytes()).is_err() {
                            return;
                        }
                    }
                    Reply::Delay(delay) => thread::sleep(delay),
                    Reply::Close => {
                        let _ = stream.shutdown(Shutdown::Both);
                        return;
                    }
                }
            }
        }
    }
}

pub(crate) fn reply(kind: ResponseKind, idx: u64, payload: Value) -> Reply {
    let payload = match payload {
        Value::Object(map) => map,
        _ => Default::default(),
    };
    Reply::Send(Response::new(kind, idx, payload))
}

pub(crate) fn servers_json() -> Value {
    json!({
        "wireguard": [
            {"gateway": "us-tx1.wg.example.net", "country_code": "US", "country": "USA",
             "city": "Dallas", "latitude": 32.78, "longitude": -96.8, "isp": "Acme",
             "hosts": [{"hostname": "us-tx1", "host": "10.0.0.1", "public_key": "a=",
                        "local_ip": "172.16.0.1/12", "multihop_port": 2049}]},
            {"gateway": "de-fra1.wg.example.net", "country_code": "DE", "country": "Germany",
             "city": "Frankfurt", "latitude": 50.11, "longitude": 8.68, "isp": "Hetz",
             "hosts": [{"hostname": "de-fra1", "host": "10.0.1.1", "public_key": "b=",
                        "local_ip": "172.16.0.2/12", "multihop_port": 2050}]}
        ],
        "openvpn": [],
        "config": {"ports": {"wireguard": [{"type": "UDP", "port": 2049}]}}
    })
}

/// Handshake replies of a daemon reporting `version`.
pub(crate) fn hello(idx: u64, version: &str) -> Vec<Reply> {
    vec![
        reply(
            ResponseKind::HelloResp,
            idx,
            json!({"Version": version, "ProcessorArch": "x86_64",
                   "Session": {"AccountID": "i-XXXX", "Session": "s3cr3t"}}),
        ),
        reply(
            ResponseKind::ServerListResp,
            idx,
            json!({"VpnServers": servers_json()}),
        ),
    ]
}

pub(crate) fn standard(idx: u64, request: &Request) -> Vec<Reply> {
    match request {
        Request::Hello { .. } => hello(idx, DAEMON_VERSION),
        Request::AccountStatus => vec![reply(
            ResponseKind::AccountStatusResp,
            idx,
            json!({"APIStatus": 200, "Account": {"Active": true, "CurrentPlan": "Pro"}}),
        )],
        Request::GetVpnState => vec![reply(
            ResponseKind::VpnStateResp,
            idx,
            json!({"State": "DISCONNECTED", "StateVal": 0}),
        )],
        Request::Disconnect => vec![reply(
            ResponseKind::DisconnectedResp,
            0,
            json!({"Failure": false, "ReasonDescription": ""}),
        )],
        Request::PingServers { .. } => vec![reply(
            ResponseKind::PingServersResp,
            0,
            json!({"PingResults": [{"Host": "10.0.0.1", "Ping": 80}, {"Host": "10.0.1.1", "Ping": 20}]}),
        )],
        _ => vec![reply(ResponseKind::EmptyResp, idx, json!({}))],
    }
}

/// Short timeouts and no background pings.
pub(crate) fn test_config() -> ClientConfig {
    ClientConfig {
        hello_timeout_ms: 2_000,
        servers_timeout_ms: 2_000,
        response_timeout_ms: 2_000,
        login_timeout_ms: 2_000,
        reconnect_attempts: 3,
        reconnect_delay_ms: 50,
        geo_lookup_retry_delay_ms: 20,
        ping_on_connect: false,
        ..ClientConfig::default()
    }
}
