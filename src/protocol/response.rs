use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::servers::ServersInfo;

use super::codec::CodecError;
use super::types::{DnsSettings, VpnState, VpnType};

/// Kinds of message the daemon sends, named after the `Command` member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    HelloResp,
    #[serde(rename = "APIResponse")]
    ApiResponse,
    ConfigParamsResp,
    DiagnosticsGeneratedResp,
    VpnStateResp,
    ConnectedResp,
    DisconnectedResp,
    ServerListResp,
    PingServersResp,
    #[serde(rename = "SetAlternateDNSResp")]
    SetAlternateDnsResp,
    KillSwitchStatusResp,
    AccountStatusResp,
    SessionNewResp,
    SplitTunnelConfig,
    InstalledAppsResp,
    AppIconResp,
    #[serde(rename = "WiFiAvailableNetworksResp")]
    WifiAvailableNetworksResp,
    #[serde(rename = "WiFiCurrentNetworkResp")]
    WifiCurrentNetworkResp,
    CheckAccessiblePortsResponse,
    EmptyResp,
    ErrorResp,
    ErrorRespDelayed,
    ServiceExitingResp,
    #[serde(other)]
    Unknown,
}

impl ResponseKind {
    pub fn from_command(command: &str) -> Self {
        serde_json::from_value(Value::String(command.to_string())).unwrap_or(ResponseKind::Unknown)
    }
}

/// A decoded daemon message.
///
/// Only `Command` and `Idx` are interpreted eagerly; everything else stays as
/// a JSON object until a consumer asks for a typed view with [`Response::parse`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub kind: ResponseKind,
    /// Raw `Command` value, kept for unknown kinds.
    pub command: String,
    /// Index of the request this answers; 0 for unsolicited pushes.
    pub idx: u64,
    pub payload: Map<String, Value>,
}

impl Response {
    pub fn new(kind: ResponseKind, idx: u64, payload: Map<String, Value>) -> Self {
        let command = match serde_json::to_value(kind) {
            Ok(Value::String(name)) => name,
            _ => String::from("Unknown"),
        };
        Self {
            kind,
            command,
            idx,
            payload,
        }
    }

    /// Deserialize the payload into one of the typed response bodies.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|source| {
            CodecError::Payload {
                command: self.command.clone(),
                source,
            }
        })
    }

    pub fn is_push(&self) -> bool {
        self.idx == 0
    }

    /// Error details if this is an `ErrorResp` carrying a message.
    pub fn error(&self) -> Option<ErrorResp> {
        if self.kind != ResponseKind::ErrorResp {
            return None;
        }
        self.parse::<ErrorResp>()
            .ok()
            .filter(|e| !e.error_message.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ErrorResp {
    pub error_message: String,
    pub error_title: String,
    pub error_type: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HelloResp {
    pub version: String,
    pub processor_arch: String,
    pub session: SessionInfo,
    pub account: AccountInfo,
    pub disabled_functions: DisabledFunctions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionInfo {
    #[serde(rename = "AccountID")]
    pub account_id: String,
    pub session: String,
    pub wg_public_key: String,
    #[serde(rename = "WgLocalIP")]
    pub wg_local_ip: String,
    /// Unix time.
    pub wg_key_generated: i64,
    /// Seconds. The daemon spells the member `WgKeysRegenInerval`.
    #[serde(rename = "WgKeysRegenInerval")]
    pub wg_keys_regen_interval: i64,
    pub wg_use_preshared_key: bool,
}

impl SessionInfo {
    pub fn is_logged_in(&self) -> bool {
        !self.session.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AccountInfo {
    pub active: bool,
    pub active_until: i64,
    pub current_plan: String,
    pub payment_method: String,
    pub is_renewable: bool,
    pub will_auto_rebill: bool,
    pub is_free_trial: bool,
    pub capabilities: Vec<String>,
    pub upgradable: bool,
    pub upgrade_to_plan: String,
    #[serde(rename = "UpgradeToURL")]
    pub upgrade_to_url: String,
    pub limit: i64,
}

impl AccountInfo {
    pub fn is_initialized(&self) -> bool {
        !self.current_plan.is_empty() || !self.capabilities.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DisabledFunctions {
    pub wire_guard_error: String,
    #[serde(rename = "OpenVPNError")]
    pub open_vpn_error: String,
    pub obfsproxy_error: String,
    pub split_tunnel_error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AccountStatusResp {
    #[serde(rename = "APIStatus")]
    pub api_status: i64,
    #[serde(rename = "APIErrorMessage")]
    pub api_error_message: String,
    pub session_token: String,
    pub account: AccountInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SessionNewResp {
    #[serde(rename = "APIStatus")]
    pub api_status: i64,
    #[serde(rename = "APIErrorMessage")]
    pub api_error_message: String,
    pub session: SessionInfo,
    pub account: AccountInfo,
    pub raw_response: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct KillSwitchStatusResp {
    pub is_enabled: bool,
    pub is_persistent: bool,
    #[serde(rename = "IsAllowLAN")]
    pub is_allow_lan: bool,
    pub is_allow_multicast: bool,
    pub is_allow_api_servers: bool,
    pub user_exceptions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DiagnosticsGeneratedResp {
    #[serde(rename = "Log0_Old", default)]
    pub log_previous: String,
    #[serde(rename = "Log1_Active", default)]
    pub log_active: String,
    #[serde(rename = "ExtraInfo", default)]
    pub extra_info: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SetAlternateDnsResp {
    pub is_success: bool,
    #[serde(rename = "ChangedDNS")]
    pub changed_dns: DnsSettings,
    pub error_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ConnectedResp {
    pub vpn_type: VpnType,
    pub time_sec_from1970: i64,
    #[serde(rename = "ClientIP")]
    pub client_ip: String,
    #[serde(rename = "ClientIPv6")]
    pub client_ipv6: String,
    #[serde(rename = "ServerIP")]
    pub server_ip: String,
    pub server_port: u16,
    pub exit_hostname: String,
    #[serde(rename = "ExitServerID")]
    pub exit_server_id: String,
    #[serde(rename = "ManualDNS")]
    pub manual_dns: DnsSettings,
    pub is_can_pause: Option<bool>,
    #[serde(rename = "IsTCP")]
    pub is_tcp: bool,
    pub mtu: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DisconnectedResp {
    pub failure: bool,
    pub reason: i64,
    pub reason_description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct VpnStateResp {
    pub state: String,
    pub state_val: VpnState,
    pub state_additional_info: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServerListResp {
    pub vpn_servers: ServersInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PingResult {
    pub host: String,
    /// Milliseconds; zero or negative when the host did not answer.
    pub ping: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct PingServersResp {
    pub ping_results: Vec<PingResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SplitTunnelConfig {
    pub is_enabled: bool,
    pub split_tunnel_apps: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstalledApp {
    pub app_name: String,
    pub app_group: String,
    pub app_binary_path: String,
    pub app_icon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InstalledAppsResp {
    pub apps: Vec<InstalledApp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AppIconResp {
    pub app_binary_path: String,
    pub app_icon: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WifiNetwork {
    #[serde(rename = "SSID")]
    pub ssid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WifiAvailableNetworksResp {
    pub networks: Vec<WifiNetwork>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WifiCurrentNetworkResp {
    #[serde(rename = "SSID")]
    pub ssid: String,
    pub is_insecure_network: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApiResponse {
    #[serde(rename = "APIPath")]
    pub api_path: String,
    pub response_data: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccessiblePort {
    #[serde(rename = "type")]
    pub kind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CheckAccessiblePortsResponse {
    pub ports: Vec<AccessiblePort>,
}
