//! Small value types shared by requests, responses and the server catalog.
//!
//! The daemon encodes these as plain integers on the wire, so each enum
//! converts to and from its integer form through serde's `from`/`into`.
use std::fmt;

use serde::{Deserialize, Serialize};

/// VPN protocol family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum VpnType {
    OpenVpn,
    #[default]
    WireGuard,
}

impl From<u8> for VpnType {
    fn from(value: u8) -> Self {
        match value {
            0 => VpnType::OpenVpn,
            _ => VpnType::WireGuard,
        }
    }
}

impl From<VpnType> for u8 {
    fn from(value: VpnType) -> Self {
        match value {
            VpnType::OpenVpn => 0,
            VpnType::WireGuard => 1,
        }
    }
}

impl fmt::Display for VpnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VpnType::OpenVpn => write!(f, "OpenVPN"),
            VpnType::WireGuard => write!(f, "WireGuard"),
        }
    }
}

/// Tunnel state as reported by the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum VpnState {
    #[default]
    Disconnected,
    Connecting,
    Wait,
    Auth,
    GetConfig,
    AssignIp,
    AddRoutes,
    Connected,
    Reconnecting,
    TcpConnect,
    Exiting,
    Initialised,
    Unknown(u8),
}

impl VpnState {
    /// Any of the intermediate states between "disconnected" and "connected".
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            VpnState::Connecting
                | VpnState::Wait
                | VpnState::Auth
                | VpnState::GetConfig
                | VpnState::AssignIp
                | VpnState::AddRoutes
                | VpnState::Reconnecting
                | VpnState::TcpConnect
                | VpnState::Initialised
        )
    }
}

impl From<u8> for VpnState {
    fn from(value: u8) -> Self {
        match value {
            0 => VpnState::Disconnected,
            1 => VpnState::Connecting,
            2 => VpnState::Wait,
            3 => VpnState::Auth,
            4 => VpnState::GetConfig,
            5 => VpnState::AssignIp,
            6 => VpnState::AddRoutes,
            7 => VpnState::Connected,
            8 => VpnState::Reconnecting,
            9 => VpnState::TcpConnect,
            10 => VpnState::Exiting,
            11 => VpnState::Initialised,
            other => VpnState::Unknown(other),
        }
    }
}

impl From<VpnState> for u8 {
    fn from(value: VpnState) -> Self {
        match value {
            VpnState::Disconnected => 0,
            VpnState::Connecting => 1,
            VpnState::Wait => 2,
            VpnState::Auth => 3,
            VpnState::GetConfig => 4,
            VpnState::AssignIp => 5,
            VpnState::AddRoutes => 6,
            VpnState::Connected => 7,
            VpnState::Reconnecting => 8,
            VpnState::TcpConnect => 9,
            VpnState::Exiting => 10,
            VpnState::Initialised => 11,
            VpnState::Unknown(other) => other,
        }
    }
}

/// IP protocol an API request must be routed over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum IpProtocol {
    #[default]
    Any,
    V4,
    V6,
}

impl From<u8> for IpProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => IpProtocol::V4,
            2 => IpProtocol::V6,
            _ => IpProtocol::Any,
        }
    }
}

impl From<IpProtocol> for u8 {
    fn from(value: IpProtocol) -> Self {
        match value {
            IpProtocol::Any => 0,
            IpProtocol::V4 => 1,
            IpProtocol::V6 => 2,
        }
    }
}

/// Transport protocol of a VPN port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum PortProtocol {
    #[default]
    Udp,
    Tcp,
}

impl From<u8> for PortProtocol {
    fn from(value: u8) -> Self {
        match value {
            1 => PortProtocol::Tcp,
            _ => PortProtocol::Udp,
        }
    }
}

impl From<PortProtocol> for u8 {
    fn from(value: PortProtocol) -> Self {
        match value {
            PortProtocol::Udp => 0,
            PortProtocol::Tcp => 1,
        }
    }
}

/// DNS configuration pushed to, and reported by, the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DnsSettings {
    pub dns_host: String,
    /// 0 = plain, 1 = DNS over TLS, 2 = DNS over HTTPS.
    pub encryption: u8,
    pub doh_template: String,
}

impl DnsSettings {
    pub fn plain(host: impl Into<String>) -> Self {
        Self {
            dns_host: host.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dns_host.is_empty()
    }
}
