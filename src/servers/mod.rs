//! Server catalog delivered by the daemon, and the algorithms that pick from it.
//!
//! The catalog is replaced wholesale on every server-list push. Latency samples
//! live in a separate [`PingTable`] keyed by host address, so they survive a
//! catalog replacement and are re-applied to the new entries.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{VpnType, response::PingResult};

pub mod geo;
pub mod selection;

pub use geo::{GeoLocation, GeoLookup};
pub use selection::{
    Conflict, ConflictCheck, Exclusion, SelectionError, check_inaccessible, fastest_server,
    random_multihop_pair, random_server, resolve_isp_overlap,
};

/// Complete server list as sent by the daemon (`ServerListResp.VpnServers`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServersInfo {
    pub wireguard: Vec<Server>,
    pub openvpn: Vec<Server>,
    pub config: ServersConfig,
}

/// One gateway (location) and the hosts behind it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub gateway: String,
    pub country_code: String,
    pub country: String,
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    pub isp: String,
    pub hosts: Vec<Host>,

    /// Best host latency in ms; filled from the ping table.
    #[serde(skip)]
    pub ping: Option<u32>,
    #[serde(skip)]
    pub ping_quality: Option<PingQuality>,
}

impl Server {
    pub fn location(&self) -> GeoLocation {
        GeoLocation::new(self.latitude, self.longitude)
    }

    /// At least one host can carry IPv6 inside the tunnel.
    pub fn supports_ipv6(&self) -> bool {
        self.hosts
            .iter()
            .any(|h| h.ipv6.as_ref().is_some_and(|v6| !v6.local_ip.is_empty()))
    }

    /// Multihop exit id: the gateway name up to the first '.'.
    pub fn exit_id(&self) -> &str {
        self.gateway.split('.').next().unwrap_or_default()
    }

    pub fn has_host_ip(&self, ip: &str) -> bool {
        self.hosts.iter().any(|h| h.host == ip)
    }

    fn refresh_ping(&mut self, table: &PingTable) {
        for host in &mut self.hosts {
            host.ping = table.get(&host.host);
        }
        self.ping = self.hosts.iter().filter_map(|h| h.ping).min();
        self.ping_quality = self.ping.and_then(|p| table.quality(p));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Host {
    pub hostname: String,
    pub host: String,
    pub dns_name: String,
    pub multihop_port: u16,
    pub load: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub public_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub local_ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<HostIpv6>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfs: Option<ObfsParams>,

    #[serde(skip)]
    pub ping: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostIpv6 {
    pub host: String,
    pub local_ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfsParams {
    pub obfs3_multihop_port: u16,
    pub obfs4_multihop_port: u16,
    pub obfs4_key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServersConfig {
    pub antitracker: AntitrackerInfo,
    pub api: ApiInfo,
    pub ports: PortsInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntitrackerInfo {
    pub default: DnsInfo,
    pub hardcore: DnsInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsInfo {
    pub ip: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiInfo {
    pub ips: Vec<String>,
    pub ipv6s: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsInfo {
    pub openvpn: Vec<PortInfo>,
    pub wireguard: Vec<PortInfo>,
}

/// A port (or port range) a VPN protocol may be reached on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortInfo {
    /// `"UDP"` or `"TCP"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub port: u16,
    pub range: PortRange,
}

impl PortInfo {
    pub fn is_tcp(&self) -> bool {
        self.kind.trim().eq_ignore_ascii_case("tcp")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingQuality {
    Good,
    Moderate,
    Bad,
}

/// Latest latency sample per host address, in ms.
///
/// Hosts that did not answer (non-positive ping) are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingTable {
    samples: HashMap<String, u32>,
    min: u32,
    max: u32,
}

impl PingTable {
    pub fn from_results(results: &[PingResult]) -> Self {
        let samples: HashMap<String, u32> = results
            .iter()
            .filter(|r| r.ping > 0)
            .map(|r| (r.host.clone(), u32::try_from(r.ping).unwrap_or(u32::MAX)))
            .collect();
        let min = samples.values().copied().min().unwrap_or(0);
        let max = samples.values().copied().max().unwrap_or(0);

        Self { samples, min, max }
    }

    pub fn get(&self, host: &str) -> Option<u32> {
        self.samples.get(host).copied()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Where `ping` sits between the fastest and slowest sample.
    ///
    /// Undefined when every sample is equal.
    pub fn quality(&self, ping: u32) -> Option<PingQuality> {
        if self.max <= self.min {
            return None;
        }
        let relative = f64::from(ping.saturating_sub(self.min)) / f64::from(self.max - self.min);
        Some(if relative <= 0.5 {
            PingQuality::Good
        } else if relative <= 0.8 {
            PingQuality::Moderate
        } else {
            PingQuality::Bad
        })
    }
}

/// The current server list, indexed by gateway.
#[derive(Debug, Clone, Default)]
pub struct ServerCatalog {
    info: ServersInfo,
    by_gateway: HashMap<String, (VpnType, usize)>,
    pings: PingTable,
}

impl ServerCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole catalog, keeping known latencies.
    pub fn replace(&mut self, mut info: ServersInfo) {
        for list in [&mut info.wireguard, &mut info.openvpn] {
            list.sort_by(|a, b| {
                a.country_code
                    .cmp(&b.country_code)
                    .then_with(|| a.city.cmp(&b.city))
            });
            for server in list.iter_mut() {
                server.refresh_ping(&self.pings);
            }
        }

        self.info = info;
        self.reindex();
    }

    /// Replace the ping table and refresh every server's latency.
    pub fn update_pings(&mut self, results: &[PingResult]) {
        self.pings = PingTable::from_results(results);
        let pings = &self.pings;
        for server in self
            .info
            .wireguard
            .iter_mut()
            .chain(self.info.openvpn.iter_mut())
        {
            server.refresh_ping(pings);
        }
    }

    fn reindex(&mut self) {
        self.by_gateway.clear();
        for (vpn_type, list) in [
            (VpnType::WireGuard, &self.info.wireguard),
            (VpnType::OpenVpn, &self.info.openvpn),
        ] {
            for (i, server) in list.iter().enumerate() {
                self.by_gateway
                    .entry(server.gateway.clone())
                    .or_insert((vpn_type, i));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.info.wireguard.is_empty() && self.info.openvpn.is_empty()
    }

    pub fn info(&self) -> &ServersInfo {
        &self.info
    }

    pub fn config(&self) -> &ServersConfig {
        &self.info.config
    }

    pub fn pings(&self) -> &PingTable {
        &self.pings
    }

    pub fn servers(&self, vpn_type: VpnType) -> &[Server] {
        match vpn_type {
            VpnType::WireGuard => &self.info.wireguard,
            VpnType::OpenVpn => &self.info.openvpn,
        }
    }

    /// Servers usable for `vpn_type`; with `ipv6_only` WireGuard servers
    /// without an IPv6-capable host are left out.
    pub fn active_servers(&self, vpn_type: VpnType, ipv6_only: bool) -> Vec<&Server> {
        let servers = self.servers(vpn_type).iter();
        match vpn_type {
            VpnType::WireGuard if ipv6_only => servers.filter(|s| s.supports_ipv6()).collect(),
            _ => servers.collect(),
        }
    }

    pub fn get(&self, gateway: &str) -> Option<&Server> {
        let (vpn_type, i) = self.by_gateway.get(gateway)?;
        self.servers(*vpn_type).get(*i)
    }

    pub fn find_by_ip(&self, vpn_type: VpnType, ip: &str) -> Option<&Server> {
        self.servers(vpn_type).iter().find(|s| s.has_host_ip(ip))
    }

    pub fn find_by_exit_id(&self, vpn_type: VpnType, exit_id: &str) -> Option<&Server> {
        self.servers(vpn_type).iter().find(|s| s.exit_id() == exit_id)
    }

    /// Every indexed gateway resolves to a server with that gateway.
    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        self.by_gateway
            .iter()
            .all(|(gw, _)| self.get(gw).is_some_and(|s| &s.gateway == gw))
    }
}
