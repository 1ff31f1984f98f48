//! Daemon communication protocol.
//!
//! The daemon speaks newline-delimited JSON over a local TCP socket. Every
//! message is a single JSON object with a `Command` member naming its kind.
//! Requests also carry an `Idx` chosen by the client; the daemon copies it into
//! the response it sends back. Messages with `Idx` 0 are unsolicited pushes.
//!
//! # Key Components
//!
//! - [`LineFramer`]: splits the byte stream into complete messages.
//! - [`codec`]: JSON encoding of [`Request`] envelopes and decoding of [`Response`]s.
//! - [`ProtocolTransport`] / [`ResponseReader`]: the write and read halves of a socket.
//!
//! 64-bit integers are carried as plain JSON numbers and kept exact in both
//! directions.
pub mod codec;
mod framing;
mod request;
pub mod response;
mod transport;
pub mod types;

pub use codec::CodecError;
pub use framing::{DELIMITER, LineFramer};
pub use request::{
    ConnectParams, Envelope, HostList, MultihopExit, OpenVpnParameters, PortParams, Request,
    WireGuardParameters,
};
pub use response::{ErrorResp, Response, ResponseKind};
pub use transport::{ProtocolTransport, ResponseReader, TransportError};
pub use types::{DnsSettings, IpProtocol, PortProtocol, VpnState, VpnType};
