//! Local view of the daemon, kept current by pushed responses.
use log::{debug, warn};
use serde_json::{Map, Value};

use crate::{
    protocol::{
        Response, ResponseKind, VpnState,
        response::{
            AccountStatusResp, ConnectedResp, DisabledFunctions, DisconnectedResp, ErrorResp,
            HelloResp, KillSwitchStatusResp, PingServersResp, ServerListResp, SessionInfo,
            SetAlternateDnsResp, SplitTunnelConfig, VpnStateResp, WifiAvailableNetworksResp,
            WifiCurrentNetworkResp, WifiNetwork,
        },
        types::DnsSettings,
    },
    servers::{GeoLookup, ServerCatalog},
    version,
};

use super::{ClientEvent, PauseState};

/// Round trips a push asks for; run off the reader thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FollowUp {
    AccountStatus,
    DisableFirewall,
    GeoLookup,
}

/// What applying one response produced.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub events: Vec<ClientEvent>,
    pub follow_ups: Vec<FollowUp>,
}

/// Settings that change how pushes are applied.
#[derive(Debug, Clone, Default)]
pub(crate) struct ApplyOptions {
    pub min_daemon_version: String,
    pub firewall_off_on_disconnect: bool,
    pub geo_lookup_on_change: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub daemon_version: String,
    /// The daemon is older than the configured minimum.
    pub daemon_is_old: bool,
    pub processor_arch: String,
    pub session: SessionInfo,
    pub account: Option<AccountStatusResp>,
    pub disabled_functions: DisabledFunctions,
    pub config_params: Map<String, Value>,
    pub vpn_state: VpnState,
    pub connection: Option<ConnectedResp>,
    pub last_disconnect: Option<DisconnectedResp>,
    pub pause: PauseState,
    pub catalog: ServerCatalog,
    pub firewall: KillSwitchStatusResp,
    pub dns: DnsSettings,
    pub split_tunnel: SplitTunnelConfig,
    pub wifi_current: Option<WifiCurrentNetworkResp>,
    pub wifi_networks: Vec<WifiNetwork>,
    /// Last location looked up while the tunnel was down.
    pub real_location: Option<GeoLookup>,
    /// Last location looked up through the tunnel.
    pub tunnel_location: Option<GeoLookup>,
}

impl ClientState {
    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    /// Update the local view from one daemon message.
    ///
    /// Malformed payloads are logged and skipped.
    pub(crate) fn apply(&mut self, response: &Response, options: &ApplyOptions) -> Applied {
        let mut applied = Applied::default();
        if let Err(e) = self.try_apply(response, options, &mut applied) {
            warn!("ignoring '{}' push: {e}", response.command);
        }
        applied
    }

    fn try_apply(
        &mut self,
        response: &Response,
        options: &ApplyOptions,
        out: &mut Applied,
    ) -> Result<(), crate::protocol::CodecError> {
        match response.kind {
            ResponseKind::HelloResp => {
                let hello: HelloResp = response.parse()?;
                self.daemon_is_old = version::is_older(&hello.version, &options.min_daemon_version);
                self.daemon_version = hello.version;
                self.processor_arch = hello.processor_arch;
                out.events.push(ClientEvent::DaemonVersion {
                    version: self.daemon_version.clone(),
                    is_old: self.daemon_is_old,
                });
                if self.daemon_is_old {
                    return Ok(());
                }

                self.session = hello.session;
                out.events.push(ClientEvent::Session(self.session.clone()));
                if hello.account.is_initialized() {
                    self.account = Some(AccountStatusResp {
                        account: hello.account,
                        ..Default::default()
                    });
                }
                if self.session.is_logged_in() && self.account.is_none() {
                    out.follow_ups.push(FollowUp::AccountStatus);
                }
                self.disabled_functions = hello.disabled_functions;
            }
            ResponseKind::ConfigParamsResp => {
                self.config_params = response.payload.clone();
            }
            ResponseKind::AccountStatusResp => {
                let status: AccountStatusResp = response.parse()?;
                self.account = Some(status.clone());
                out.events.push(ClientEvent::AccountStatus(status));
            }
            ResponseKind::VpnStateResp => {
                let state: VpnStateResp = response.parse()?;
                self.vpn_state = state.state_val;
                out.events.push(ClientEvent::VpnState(state.state_val));
            }
            ResponseKind::ConnectedResp => {
                let info: ConnectedResp = response.parse()?;
                self.vpn_state = VpnState::Connected;
                self.connection = Some(info.clone());
                out.events.push(ClientEvent::VpnState(VpnState::Connected));
                out.events.push(ClientEvent::Connected(info));
                if options.geo_lookup_on_change && self.pause == PauseState::Resumed {
                    out.follow_ups.push(FollowUp::GeoLookup);
                }
            }
            ResponseKind::DisconnectedResp => {
                let info: DisconnectedResp = response.parse()?;
                self.vpn_state = VpnState::Disconnected;
                self.connection = None;
                if self.pause != PauseState::Resumed {
                    self.pause = PauseState::Resumed;
                    out.events.push(ClientEvent::PauseState(PauseState::Resumed));
                }
                out.events.push(ClientEvent::VpnState(VpnState::Disconnected));
                out.events.push(ClientEvent::Disconnected {
                    failure: info.failure,
                    reason: info.reason_description.clone(),
                });
                self.last_disconnect = Some(info);
                if options.firewall_off_on_disconnect {
                    out.follow_ups.push(FollowUp::DisableFirewall);
                }
                if options.geo_lookup_on_change {
                    out.follow_ups.push(FollowUp::GeoLookup);
                }
            }
            ResponseKind::ServerListResp => {
                let list: ServerListResp = response.parse()?;
                self.catalog.replace(list.vpn_servers);
                out.events.push(ClientEvent::ServersUpdated);
            }
            ResponseKind::PingServersResp => {
                let pings: PingServersResp = response.parse()?;
                self.catalog.update_pings(&pings.ping_results);
                out.events.push(ClientEvent::PingsUpdated);
            }
            ResponseKind::SetAlternateDnsResp => {
                let dns: SetAlternateDnsResp = response.parse()?;
                if dns.is_success {
                    self.dns = dns.changed_dns.clone();
                    out.events.push(ClientEvent::Dns(dns.changed_dns));
                }
            }
            ResponseKind::KillSwitchStatusResp => {
                let firewall: KillSwitchStatusResp = response.parse()?;
                self.firewall = firewall.clone();
                out.events.push(ClientEvent::Firewall(firewall));
            }
            ResponseKind::SplitTunnelConfig => {
                let config: SplitTunnelConfig = response.parse()?;
                self.split_tunnel = config.clone();
                out.events.push(ClientEvent::SplitTunnel(config));
            }
            ResponseKind::WifiCurrentNetworkResp => {
                let wifi: WifiCurrentNetworkResp = response.parse()?;
                self.wifi_current = (!wifi.ssid.is_empty()).then(|| wifi.clone());
                out.events.push(ClientEvent::WifiCurrent(wifi));
            }
            ResponseKind::WifiAvailableNetworksResp => {
                let wifi: WifiAvailableNetworksResp = response.parse()?;
                self.wifi_networks = wifi.networks.clone();
                out.events.push(ClientEvent::WifiNetworks(wifi.networks));
            }
            ResponseKind::ServiceExitingResp => {
                out.events.push(ClientEvent::DaemonExiting);
            }
            ResponseKind::ErrorRespDelayed => {
                let err: ErrorResp = response.parse()?;
                warn!("daemon reported a background error: {}", err.error_message);
                out.events.push(ClientEvent::DelayedError(err));
            }
            ResponseKind::ErrorResp if response.is_push() => {
                warn!("daemon reported an error without a request");
            }
            ResponseKind::Unknown => {
                debug!("unknown daemon message '{}'", response.command);
            }
            _ => {}
        }
        Ok(())
    }

    /// Record a finished geo lookup.
    pub(crate) fn set_location(&mut self, lookup: GeoLookup, through_tunnel: bool) {
        if through_tunnel {
            self.tunnel_location = Some(lookup);
        } else {
            self.real_location = Some(lookup);
        }
    }

    /// Forget the session, e.g. after a logout the daemon could not complete.
    pub(crate) fn clear_session(&mut self) -> ClientEvent {
        self.session = SessionInfo::default();
        self.account = None;
        ClientEvent::Session(self.session.clone())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::protocol::codec;

    use super::*;

    fn msg(value: Value) -> Response {
        codec::decode_response(value.to_string().as_bytes()).unwrap()
    }

    fn options() -> ApplyOptions {
        ApplyOptions {
            min_daemon_version: crate::config::MIN_DAEMON_VERSION.into(),
            firewall_off_on_disconnect: true,
            geo_lookup_on_change: false,
        }
    }

    #[test]
    fn hello_with_session_requests_account_status() {
        let mut state = ClientState::default();
        let applied = state.apply(
            &msg(json!({"Command": "HelloResp", "Idx": 1, "Version": "3.11.20",
                        "Session": {"AccountID": "acc", "Session": "tok"}})),
            &options(),
        );

        assert!(!state.daemon_is_old);
        assert!(state.is_logged_in());
        assert_eq!(applied.follow_ups, vec![FollowUp::AccountStatus]);
        assert!(applied.events.contains(&ClientEvent::DaemonVersion {
            version: "3.11.0".into(),
            is_old: false
        }));
    }

    #[test]
    fn old_daemon_is_flagged_and_session_ignored() {
        let mut state = ClientState::default();
        let applied = state.apply(
            &msg(json!({"Command": "HelloResp", "Idx": 1, "Version": "3.3.1",
                        "Session": {"Session": "tok"}})),
            &options(),
        );

        assert!(state.daemon_is_old);
        assert!(!state.is_logged_in());
        assert!(applied.follow_ups.is_empty());
    }

    #[test]
    fn connect_and_disconnect_pushes() {
        let mut state = ClientState::default();
        state.pause = PauseState::Paused;

        state.apply(
            &msg(json!({"Command": "ConnectedResp", "ServerIP": "10.0.0.1", "VpnType": 0})),
            &options(),
        );
        assert_eq!(state.vpn_state, VpnState::Connected);
        assert_eq!(state.connection.as_ref().unwrap().server_ip, "10.0.0.1");

        let applied = state.apply(
            &msg(json!({"Command": "DisconnectedResp", "Failure": true, "ReasonDescription": "timeout"})),
            &options(),
        );
        assert_eq!(state.vpn_state, VpnState::Disconnected);
        assert!(state.connection.is_none());
        assert_eq!(state.pause, PauseState::Resumed);
        assert_eq!(applied.follow_ups, vec![FollowUp::DisableFirewall]);
        assert!(applied.events.contains(&ClientEvent::Disconnected {
            failure: true,
            reason: "timeout".into()
        }));
    }

    #[test]
    fn catalog_and_pings() {
        let mut state = ClientState::default();
        state.apply(
            &msg(json!({"Command": "ServerListResp", "VpnServers": {
                "wireguard": [{"gateway": "a.wg", "country_code": "SE", "city": "Malmo",
                               "hosts": [{"hostname": "a1", "host": "1.1.1.1"}]}],
                "openvpn": []
            }})),
            &options(),
        );
        let applied = state.apply(
            &msg(json!({"Command": "PingServersResp", "PingResults": [{"Host": "1.1.1.1", "Ping": 33}]})),
            &options(),
        );

        assert_eq!(applied.events, vec![ClientEvent::PingsUpdated]);
        assert_eq!(state.catalog.get("a.wg").unwrap().ping, Some(33));
    }

    #[test]
    fn failed_dns_change_is_ignored() {
        let mut state = ClientState::default();
        let applied = state.apply(
            &msg(json!({"Command": "SetAlternateDNSResp", "IsSuccess": false,
                        "ChangedDNS": {"DnsHost": "1.1.1.1"}})),
            &options(),
        );
        assert!(applied.events.is_empty());
        assert!(state.dns.is_empty());
    }

    #[test]
    fn malformed_push_is_skipped() {
        let mut state = ClientState::default();
        let applied = state.apply(
            &msg(json!({"Command": "VpnStateResp", "StateVal": "connected"})),
            &options(),
        );
        assert!(applied.events.is_empty());
        assert_eq!(state.vpn_state, VpnState::Disconnected);
    }
}
