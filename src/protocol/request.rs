use serde::{Deserialize, Serialize};

use crate::servers::Host;

use super::types::{DnsSettings, IpProtocol, PortProtocol, VpnType};

/// Requests understood by the daemon.
///
/// Serialized as a JSON object whose `Command` member names the variant; the
/// request index and optional protocol secret are added by [`Envelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Command", rename_all_fields = "PascalCase")]
pub enum Request {
    Hello {
        version: String,
        secret: u64,
        get_servers_list: bool,
        get_status: bool,
        get_config_params: bool,
        keep_daemon_alone: bool,
        get_split_tunnel_status: bool,
        #[serde(rename = "GetWiFiCurrentState")]
        get_wifi_current_state: bool,
    },
    #[serde(rename = "APIRequest")]
    ApiRequest {
        #[serde(rename = "APIPath")]
        api_path: String,
        #[serde(rename = "IPProtocolRequired")]
        ip_protocol_required: IpProtocol,
    },
    GenerateDiagnostics,
    PingServers {
        retry_count: u32,
        #[serde(rename = "TimeOutMs")]
        timeout_ms: u64,
    },
    SessionNew {
        #[serde(rename = "AccountID")]
        account_id: String,
        force_login: bool,
        #[serde(rename = "CaptchaID")]
        captcha_id: String,
        captcha: String,
        #[serde(rename = "Confirmation2FA")]
        confirmation_2fa: String,
    },
    SessionDelete {
        need_to_reset_settings: bool,
        need_to_disable_firewall: bool,
        is_can_delete_session_locally: bool,
    },
    AccountStatus,
    Connect(ConnectParams),
    Disconnect,
    PauseConnection,
    ResumeConnection,
    #[serde(rename = "GetVPNState")]
    GetVpnState,
    GetServers,
    CheckAccessiblePorts,
    KillSwitchGetStatus,
    KillSwitchSetEnabled {
        is_enabled: bool,
    },
    KillSwitchSetAllowApiServers {
        is_allow_api_servers: bool,
    },
    #[serde(rename = "KillSwitchSetAllowLANMulticast")]
    KillSwitchSetAllowLanMulticast {
        #[serde(rename = "AllowLANMulticast")]
        allow_lan_multicast: bool,
        synchronously: bool,
    },
    #[serde(rename = "KillSwitchSetAllowLAN")]
    KillSwitchSetAllowLan {
        #[serde(rename = "AllowLAN")]
        allow_lan: bool,
        synchronously: bool,
    },
    KillSwitchSetIsPersistent {
        is_persistent: bool,
    },
    SplitTunnelSetConfig {
        is_enabled: bool,
        split_tunnel_apps: Vec<String>,
    },
    GetInstalledApps,
    GetAppIcon {
        app_binary_path: String,
    },
    SetAlternateDns {
        dns: DnsSettings,
    },
    WireGuardGenerateNewKeys {
        only_update_if_necessary: bool,
    },
    SetPreference {
        key: String,
        value: String,
    },
    WireGuardSetKeysRotationInterval {
        interval: i64,
    },
    #[serde(rename = "WiFiAvailableNetworks")]
    WifiAvailableNetworks,
}

impl Request {
    /// Wire name of the request, as carried in the `Command` member.
    pub fn command(&self) -> &'static str {
        match self {
            Request::Hello { .. } => "Hello",
            Request::ApiRequest { .. } => "APIRequest",
            Request::GenerateDiagnostics => "GenerateDiagnostics",
            Request::PingServers { .. } => "PingServers",
            Request::SessionNew { .. } => "SessionNew",
            Request::SessionDelete { .. } => "SessionDelete",
            Request::AccountStatus => "AccountStatus",
            Request::Connect(_) => "Connect",
            Request::Disconnect => "Disconnect",
            Request::PauseConnection => "PauseConnection",
            Request::ResumeConnection => "ResumeConnection",
            Request::GetVpnState => "GetVPNState",
            Request::GetServers => "GetServers",
            Request::CheckAccessiblePorts => "CheckAccessiblePorts",
            Request::KillSwitchGetStatus => "KillSwitchGetStatus",
            Request::KillSwitchSetEnabled { .. } => "KillSwitchSetEnabled",
            Request::KillSwitchSetAllowApiServers { .. } => "KillSwitchSetAllowApiServers",
            Request::KillSwitchSetAllowLanMulticast { .. } => "KillSwitchSetAllowLANMulticast",
            Request::KillSwitchSetAllowLan { .. } => "KillSwitchSetAllowLAN",
            Request::KillSwitchSetIsPersistent { .. } => "KillSwitchSetIsPersistent",
            Request::SplitTunnelSetConfig { .. } => "SplitTunnelSetConfig",
            Request::GetInstalledApps => "GetInstalledApps",
            Request::GetAppIcon { .. } => "GetAppIcon",
            Request::SetAlternateDns { .. } => "SetAlternateDns",
            Request::WireGuardGenerateNewKeys { .. } => "WireGuardGenerateNewKeys",
            Request::SetPreference { .. } => "SetPreference",
            Request::WireGuardSetKeysRotationInterval { .. } => "WireGuardSetKeysRotationInterval",
            Request::WifiAvailableNetworks => "WiFiAvailableNetworks",
        }
    }
}

/// A request as written to the socket: payload plus per-socket index.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    #[serde(flatten)]
    pub request: &'a Request,
    #[serde(rename = "Idx")]
    pub idx: u64,
    #[serde(rename = "ProtocolSecret", skip_serializing_if = "Option::is_none")]
    pub secret: Option<&'a str>,
}

impl<'a> Envelope<'a> {
    pub fn new(request: &'a Request, idx: u64) -> Self {
        Self {
            request,
            idx,
            secret: None,
        }
    }

    pub fn with_secret(mut self, secret: Option<&'a str>) -> Self {
        self.secret = secret;
        self
    }
}

/// Parameters of a `Connect` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConnectParams {
    pub vpn_type: VpnType,
    #[serde(rename = "ManualDNS")]
    pub manual_dns: DnsSettings,
    pub firewall_on: bool,
    pub firewall_on_during_connection: bool,
    /// Prefer IPv6 inside the tunnel when the server supports it.
    #[serde(rename = "IPv6")]
    pub ipv6: bool,
    /// Only use IPv6-capable hosts; ignored unless `ipv6` is set.
    #[serde(rename = "IPv6Only")]
    pub ipv6_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wire_guard_parameters: Option<WireGuardParameters>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_vpn_parameters: Option<OpenVpnParameters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WireGuardParameters {
    pub port: PortParams,
    pub entry_vpn_server: HostList,
    pub multihop_exit_server: MultihopExit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct OpenVpnParameters {
    pub port: PortParams,
    pub entry_vpn_server: HostList,
    /// Exit gateway id, e.g. `"us-tx1"` for `"us-tx1.gw.example.net"`.
    pub multihop_exit_srv_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MultihopExit {
    pub exit_srv_id: String,
    pub hosts: Vec<Host>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostList {
    pub hosts: Vec<Host>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortParams {
    pub port: u16,
    pub protocol: PortProtocol,
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;

    #[test]
    fn hello_wire_names() {
        let request = Request::Hello {
            version: "1.0:cli".into(),
            secret: u64::MAX,
            get_servers_list: true,
            get_status: true,
            get_config_params: false,
            keep_daemon_alone: true,
            get_split_tunnel_status: false,
            get_wifi_current_state: true,
        };
        let value = serde_json::to_value(Envelope::new(&request, 3)).unwrap();

        assert_eq!(value["Command"], "Hello");
        assert_eq!(value["Idx"], 3);
        assert_eq!(value["Secret"].as_u64(), Some(u64::MAX));
        assert_eq!(value["GetWiFiCurrentState"], true);
        assert!(value.get("ProtocolSecret").is_none());
    }

    #[test]
    fn unit_request_carries_only_command_and_index() {
        let value = serde_json::to_value(Envelope::new(&Request::GetVpnState, 9)).unwrap();
        assert_eq!(value, json!({"Command": "GetVPNState", "Idx": 9}));
    }

    #[test]
    fn protocol_secret_is_attached_when_present() {
        let request = Request::KillSwitchSetAllowLan {
            allow_lan: true,
            synchronously: true,
        };
        let value =
            serde_json::to_value(Envelope::new(&request, 1).with_secret(Some("pass"))).unwrap();

        assert_eq!(value["Command"], "KillSwitchSetAllowLAN");
        assert_eq!(value["AllowLAN"], true);
        assert_eq!(value["ProtocolSecret"], "pass");
    }

    #[test]
    fn connect_omits_unused_protocol_parameters() {
        let request = Request::Connect(ConnectParams {
            vpn_type: VpnType::WireGuard,
            wire_guard_parameters: Some(WireGuardParameters::default()),
            ..Default::default()
        });
        let value = serde_json::to_value(Envelope::new(&request, 1)).unwrap();

        assert_eq!(value["Command"], "Connect");
        assert_eq!(value["VpnType"], 1);
        assert!(value.get("WireGuardParameters").is_some());
        assert_eq!(value.get("OpenVpnParameters"), None::<&Value>);
    }

    #[test]
    fn command_matches_serialized_tag() {
        let requests = vec![
            Request::ApiRequest {
                api_path: "geo-lookup".into(),
                ip_protocol_required: IpProtocol::V4,
            },
            Request::WifiAvailableNetworks,
            Request::KillSwitchSetAllowLanMulticast {
                allow_lan_multicast: false,
                synchronously: true,
            },
            Request::PingServers {
                retry_count: 4,
                timeout_ms: 4000,
            },
        ];

        for request in requests {
            let value = serde_json::to_value(Envelope::new(&request, 1)).unwrap();
            assert_eq!(value["Command"], request.command());
        }
    }
}
