//! Operations offered on top of the correlation engine.
use std::{
    sync::{Arc, atomic::Ordering},
    thread,
};

use log::{debug, info, warn};
use rand::Rng;
use serde::de::DeserializeOwned;

use crate::{
    protocol::{
        ConnectParams, DnsSettings, HostList, IpProtocol, MultihopExit, OpenVpnParameters,
        PortParams, PortProtocol, Request, Response, ResponseKind, VpnState, VpnType,
        WireGuardParameters,
        response::{
            AccountStatusResp, ApiResponse, AppIconResp, CheckAccessiblePortsResponse,
            DiagnosticsGeneratedResp, InstalledApp, InstalledAppsResp, KillSwitchStatusResp,
            PingServersResp, ServerListResp, SessionNewResp, SetAlternateDnsResp,
            SplitTunnelConfig, VpnStateResp,
        },
    },
    servers::{
        Conflict, ConflictCheck, Exclusion, GeoLookup, SelectionError, ServersInfo,
        check_inaccessible, fastest_server, random_multihop_pair, random_server,
    },
};

use super::{
    ClientError, ClientEvent, ClientState, DaemonClient, Flight, Inner, PauseState, lock,
};

/// Backend status code of a successful login.
const API_SUCCESS: i64 = 200;
/// Port used when the catalog lists none for the protocol.
const FALLBACK_PORT: u16 = 2049;
const GEO_LOOKUP_PATH: &str = "geo-lookup";
const GEO_LOOKUP_RETRIES: u32 = 3;

/// How to pick the server for one leg of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerChoice {
    Gateway(String),
    Fastest,
    Random,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectSettings {
    pub vpn_type: VpnType,
    pub entry: ServerChoice,
    /// Exit leg; `Some` makes the connection multihop.
    pub exit: Option<ServerChoice>,
    /// Defaults to the first port the catalog lists for `vpn_type`.
    pub port: Option<PortParams>,
    pub dns: DnsSettings,
    /// Use the antitracker resolver instead of `dns`.
    pub antitracker: bool,
    pub antitracker_hardcore: bool,
    pub firewall_on: bool,
    pub firewall_on_during_connection: bool,
    pub ipv6: bool,
    pub ipv6_only: bool,
    /// Gateways never chosen as the fastest server.
    pub fastest_exclude: Vec<String>,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            vpn_type: VpnType::WireGuard,
            entry: ServerChoice::Fastest,
            exit: None,
            port: None,
            dns: DnsSettings::default(),
            antitracker: false,
            antitracker_hardcore: false,
            firewall_on: false,
            firewall_on_during_connection: true,
            ipv6: false,
            ipv6_only: false,
            fastest_exclude: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The request went out; progress arrives as pushes.
    Sent {
        entry: String,
        exit: Option<String>,
    },
    /// A disconnect or a newer connect came in during server selection.
    Cancelled,
}

/// Login parameters of `SessionNew`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: String,
    /// Log out the oldest session when the device limit is reached.
    pub force: bool,
    pub captcha_id: String,
    pub captcha: String,
    pub confirmation_2fa: String,
}

impl Credentials {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            ..Default::default()
        }
    }
}

/// Typed body of `response`, which must be of `kind`.
fn typed<T: DeserializeOwned>(response: Response, kind: ResponseKind) -> Result<T, ClientError> {
    if response.kind != kind {
        return Err(ClientError::Unexpected {
            command: response.command,
        });
    }
    Ok(response.parse()?)
}

impl Inner {
    fn set_pause(&self, pause: PauseState) {
        let changed = {
            let mut state = self.state();
            let changed = state.pause != pause;
            state.pause = pause;
            changed
        };
        if changed {
            self.subscribers.emit(ClientEvent::PauseState(pause));
        }
    }
}

impl DaemonClient {
    // Fire-and-forget.

    pub fn set_preference(&self, key: &str, value: &str) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.inner
            .send(&Request::SetPreference {
                key: key.to_string(),
                value: value.to_string(),
            })
            .map(drop)
    }

    pub fn set_logging(&self, enable: bool) -> Result<(), ClientError> {
        self.set_preference("enable_logging", &enable.to_string())
    }

    pub fn set_obfsproxy(&self, enable: bool) -> Result<(), ClientError> {
        self.set_preference("enable_obfsproxy", &enable.to_string())
    }

    /// The list arrives as a [`ClientEvent::WifiNetworks`] push.
    pub fn request_wifi_networks(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.inner.send(&Request::WifiAvailableNetworks).map(drop)
    }

    // Keyed by request index.

    fn request(&self, request: Request) -> Result<Response, ClientError> {
        self.ensure_connected()?;
        self.inner.request(&request)
    }

    /// Create a session. A backend refusal is not an error; check `api_status`.
    pub fn login(&self, credentials: &Credentials) -> Result<SessionNewResp, ClientError> {
        self.ensure_connected()?;
        let request = Request::SessionNew {
            account_id: credentials.account_id.clone(),
            force_login: credentials.force,
            captcha_id: credentials.captcha_id.clone(),
            captcha: credentials.captcha.clone(),
            confirmation_2fa: credentials.confirmation_2fa.clone(),
        };
        let response = self
            .inner
            .send_and_wait(&request, &[], self.inner.config.login_timeout())?;
        let session: SessionNewResp = typed(response, ResponseKind::SessionNewResp)?;

        if session.api_status == API_SUCCESS {
            {
                let mut state = self.inner.state();
                state.session = session.session.clone();
                if session.account.is_initialized() {
                    state.account = Some(AccountStatusResp {
                        account: session.account.clone(),
                        ..Default::default()
                    });
                }
            }
            self.inner
                .subscribers
                .emit(ClientEvent::Session(session.session.clone()));
        } else {
            info!("login refused by the backend ({})", session.api_status);
        }
        Ok(session)
    }

    /// Log out. The local session is forgotten even when the daemon fails to
    /// delete it.
    pub fn logout(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        if let Err(e) = self.firewall_set_persistent(false) {
            warn!("logout: failed to turn off persistent firewall: {e}");
        }
        if let Err(e) = self.apply_firewall(false) {
            warn!("logout: failed to disable firewall: {e}");
        }
        if let Err(e) = self.disconnect_vpn() {
            warn!("logout: disconnect failed: {e}");
        }

        let delete = Request::SessionDelete {
            need_to_reset_settings: false,
            need_to_disable_firewall: true,
            is_can_delete_session_locally: true,
        };
        if let Err(e) = self.request(delete) {
            warn!("logout: daemon could not delete the session: {e}");
        }

        let event = self.inner.state().clear_session();
        self.inner.subscribers.emit(event);
        Ok(())
    }

    pub fn account_status(&self) -> Result<AccountStatusResp, ClientError> {
        typed(
            self.request(Request::AccountStatus)?,
            ResponseKind::AccountStatusResp,
        )
    }

    /// Call the backend API through the daemon.
    pub fn api_request(
        &self,
        path: &str,
        ip_protocol: IpProtocol,
    ) -> Result<ApiResponse, ClientError> {
        let request = Request::ApiRequest {
            api_path: path.to_string(),
            ip_protocol_required: ip_protocol,
        };
        typed(self.request(request)?, ResponseKind::ApiResponse)
    }

    /// Look up the public location, over IPv4 or IPv6.
    ///
    /// Failed lookups are retried with a growing delay, except when the
    /// daemon reports no IPv6 support. Starting another lookup makes this one
    /// return [`ClientError::Superseded`].
    pub fn geo_lookup(&self, ipv6: bool) -> Result<GeoLookup, ClientError> {
        let id = self.inner.geo_request.fetch_add(1, Ordering::SeqCst) + 1;
        let protocol = if ipv6 { IpProtocol::V6 } else { IpProtocol::V4 };
        let base_delay = self.inner.config.geo_lookup_retry_delay();

        let mut attempt = 0;
        loop {
            if self.inner.geo_request.load(Ordering::SeqCst) != id {
                debug!("geo lookup {id} superseded");
                return Err(ClientError::Superseded);
            }

            let err = match self.geo_lookup_once(protocol) {
                Ok(lookup) => return Ok(lookup),
                Err(e @ ClientError::Daemon { .. })
                    if e.to_string().to_lowercase().contains("no ipv6 support") =>
                {
                    return Err(e);
                }
                Err(e) => e,
            };

            attempt += 1;
            if attempt > GEO_LOOKUP_RETRIES {
                return Err(err);
            }
            warn!("geo lookup ({protocol:?}) failed: {err}; retry {attempt}");
            thread::sleep(base_delay * attempt);
        }
    }

    fn geo_lookup_once(&self, protocol: IpProtocol) -> Result<GeoLookup, ClientError> {
        let is_real = |state: &ClientState| {
            state.vpn_state == VpnState::Disconnected || state.pause == PauseState::Paused
        };
        let real_at_start = self.with_state(is_real);

        let response = self.api_request(GEO_LOOKUP_PATH, protocol)?;
        if !response.error.is_empty() {
            return Err(ClientError::Daemon {
                message: response.error,
                error_type: 0,
            });
        }
        if self.with_state(is_real) != real_at_start {
            return Err(ClientError::Superseded);
        }

        let lookup: GeoLookup = serde_json::from_str(&response.response_data)
            .map_err(|_| ClientError::Unexpected {
                command: response.api_path.clone(),
            })?;
        if lookup.location().is_none() {
            return Err(ClientError::Unexpected {
                command: response.api_path,
            });
        }

        self.inner
            .state()
            .set_location(lookup.clone(), !real_at_start);
        self.inner
            .subscribers
            .emit(ClientEvent::Location(lookup.clone()));
        Ok(lookup)
    }

    pub fn diagnostics(&self) -> Result<DiagnosticsGeneratedResp, ClientError> {
        typed(
            self.request(Request::GenerateDiagnostics)?,
            ResponseKind::DiagnosticsGeneratedResp,
        )
    }

    pub fn vpn_state(&self) -> Result<VpnStateResp, ClientError> {
        typed(self.request(Request::GetVpnState)?, ResponseKind::VpnStateResp)
    }

    pub fn get_servers(&self) -> Result<ServersInfo, ClientError> {
        let list: ServerListResp =
            typed(self.request(Request::GetServers)?, ResponseKind::ServerListResp)?;
        Ok(list.vpn_servers)
    }

    pub fn check_accessible_ports(&self) -> Result<CheckAccessiblePortsResponse, ClientError> {
        typed(
            self.request(Request::CheckAccessiblePorts)?,
            ResponseKind::CheckAccessiblePortsResponse,
        )
    }

    /// Pause the tunnel and turn the firewall off until [`resume`](Self::resume).
    pub fn pause(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let (vpn_state, pause, firewall) =
            self.with_state(|s| (s.vpn_state, s.pause, s.firewall.clone()));
        if vpn_state != VpnState::Connected {
            return Err(ClientError::Forbidden("not connected to a VPN server"));
        }
        if pause == PauseState::Paused {
            return Ok(());
        }
        if !firewall.is_persistent {
            self.inner
                .firewall_before_pause
                .store(firewall.is_enabled, Ordering::SeqCst);
        }

        self.inner.set_pause(PauseState::Pausing);
        if let Err(e) = self.request(Request::PauseConnection) {
            self.inner.set_pause(pause);
            return Err(e);
        }

        let firewall = self.apply_firewall(false);
        self.inner.set_pause(PauseState::Paused);
        self.refresh_location();
        firewall
    }

    pub fn resume(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        let (vpn_state, pause) = self.with_state(|s| (s.vpn_state, s.pause));
        if vpn_state != VpnState::Connected {
            return Err(ClientError::Forbidden("not connected to a VPN server"));
        }
        if pause == PauseState::Resumed {
            return Ok(());
        }

        self.inner.set_pause(PauseState::Resuming);
        if let Err(e) = self.request(Request::ResumeConnection) {
            self.inner.set_pause(pause);
            return Err(e);
        }
        self.inner.set_pause(PauseState::Resumed);

        let firewall = if self.inner.firewall_before_pause.load(Ordering::SeqCst) {
            self.apply_firewall(true)
        } else {
            Ok(())
        };
        self.refresh_location();
        firewall
    }

    fn refresh_location(&self) {
        if self.inner.config.geo_lookup_on_change {
            self.inner.spawn_follow_up(super::state::FollowUp::GeoLookup);
        }
    }

    fn forbid_enable_while_paused(&self) -> Result<(), ClientError> {
        if self.with_state(|s| s.pause) != PauseState::Resumed {
            return Err(ClientError::Forbidden(
                "resume the connection first to enable the firewall",
            ));
        }
        Ok(())
    }

    /// Firewall change made on behalf of another operation. A persistent
    /// firewall is left as it is.
    pub(super) fn apply_firewall(&self, enable: bool) -> Result<(), ClientError> {
        if self.with_state(|s| s.firewall.is_persistent) {
            debug!("firewall is persistent, leaving it unchanged");
            return Ok(());
        }
        self.enable_firewall(enable)
    }

    pub fn enable_firewall(&self, enable: bool) -> Result<(), ClientError> {
        self.ensure_connected()?;
        if self.with_state(|s| s.firewall.is_persistent) {
            return Err(ClientError::Forbidden(
                "the firewall state cannot change in persistent mode",
            ));
        }
        if enable {
            self.forbid_enable_while_paused()?;
        }
        self.request(Request::KillSwitchSetEnabled { is_enabled: enable })
            .map(drop)
    }

    pub fn firewall_status(&self) -> Result<KillSwitchStatusResp, ClientError> {
        typed(
            self.request(Request::KillSwitchGetStatus)?,
            ResponseKind::KillSwitchStatusResp,
        )
    }

    pub fn firewall_allow_api_servers(&self, allow: bool) -> Result<(), ClientError> {
        self.request(Request::KillSwitchSetAllowApiServers {
            is_allow_api_servers: allow,
        })
        .map(drop)
    }

    pub fn firewall_allow_lan(&self, allow: bool) -> Result<(), ClientError> {
        self.request(Request::KillSwitchSetAllowLan {
            allow_lan: allow,
            synchronously: true,
        })
        .map(drop)
    }

    pub fn firewall_allow_lan_multicast(&self, allow: bool) -> Result<(), ClientError> {
        self.request(Request::KillSwitchSetAllowLanMulticast {
            allow_lan_multicast: allow,
            synchronously: true,
        })
        .map(drop)
    }

    pub fn firewall_set_persistent(&self, persistent: bool) -> Result<(), ClientError> {
        self.ensure_connected()?;
        if persistent {
            self.forbid_enable_while_paused()?;
        }
        self.request(Request::KillSwitchSetIsPersistent {
            is_persistent: persistent,
        })
        .map(drop)
    }

    pub fn get_app_icon(&self, app_binary_path: &str) -> Result<AppIconResp, ClientError> {
        let request = Request::GetAppIcon {
            app_binary_path: app_binary_path.to_string(),
        };
        typed(self.request(request)?, ResponseKind::AppIconResp)
    }

    /// Change the tunnel's DNS. Nothing is sent while the tunnel is down.
    pub fn set_dns(&self, dns: DnsSettings) -> Result<Option<SetAlternateDnsResp>, ClientError> {
        self.ensure_connected()?;
        if self.with_state(|s| s.vpn_state) == VpnState::Disconnected {
            debug!("tunnel is down, DNS change not sent");
            return Ok(None);
        }
        let response = self.request(Request::SetAlternateDns { dns })?;
        typed(response, ResponseKind::SetAlternateDnsResp).map(Some)
    }

    pub fn wg_regenerate_keys(&self) -> Result<(), ClientError> {
        self.request(Request::WireGuardGenerateNewKeys {
            only_update_if_necessary: false,
        })
        .map(drop)
    }

    pub fn wg_set_rotation_interval(&self, interval_secs: i64) -> Result<(), ClientError> {
        self.request(Request::WireGuardSetKeysRotationInterval {
            interval: interval_secs,
        })
        .map(drop)
    }

    // Keyed by response kind.

    /// Disconnect the tunnel and wait for the daemon to confirm.
    ///
    /// Also cancels a [`connect_vpn`](Self::connect_vpn) still selecting servers.
    pub fn disconnect_vpn(&self) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.inner.connect_request.fetch_add(1, Ordering::SeqCst);
        // The daemon resumes on disconnect by itself.
        self.inner.set_pause(PauseState::Resumed);
        self.inner
            .send_and_wait(
                &Request::Disconnect,
                &[ResponseKind::DisconnectedResp],
                self.inner.config.response_timeout(),
            )
            .map(drop)
    }

    /// Measure latency to every host.
    ///
    /// Concurrent calls share one round trip to the daemon.
    pub fn ping_servers(&self) -> Result<PingServersResp, ClientError> {
        self.ensure_connected()?;
        let (flight, leader) = {
            let mut slot = lock(&self.inner.ping_flight);
            match slot.as_ref() {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::default());
                    *slot = Some(Arc::clone(&flight));
                    (flight, true)
                }
            }
        };
        if !leader {
            debug!("ping already in flight, waiting for it");
            return flight.wait();
        }

        let config = &self.inner.config;
        let request = Request::PingServers {
            retry_count: config.ping_retry_count,
            timeout_ms: config.ping_timeout_ms,
        };
        let outcome = self
            .inner
            .send_and_wait(&request, &[ResponseKind::PingServersResp], config.ping_wait())
            .and_then(|r| typed(r, ResponseKind::PingServersResp));

        *lock(&self.inner.ping_flight) = None;
        flight.finish(outcome.clone());
        outcome
    }

    pub fn split_tunnel_set_config(
        &self,
        enabled: bool,
        apps: Vec<String>,
    ) -> Result<SplitTunnelConfig, ClientError> {
        self.ensure_connected()?;
        let request = Request::SplitTunnelSetConfig {
            is_enabled: enabled,
            split_tunnel_apps: apps,
        };
        let response = self.inner.send_and_wait(
            &request,
            &[ResponseKind::SplitTunnelConfig],
            self.inner.config.response_timeout(),
        )?;
        typed(response, ResponseKind::SplitTunnelConfig)
    }

    pub fn installed_apps(&self) -> Result<Vec<InstalledApp>, ClientError> {
        self.ensure_connected()?;
        let response = self.inner.send_and_wait(
            &Request::GetInstalledApps,
            &[ResponseKind::InstalledAppsResp],
            self.inner.config.installed_apps_timeout(),
        )?;
        let apps: InstalledAppsResp = typed(response, ResponseKind::InstalledAppsResp)?;
        Ok(apps.apps)
    }

    /// Choose servers and ask the daemon to connect.
    ///
    /// Choosing the fastest server pings first when no latency is known yet.
    pub fn connect_vpn(&self, settings: &ConnectSettings) -> Result<ConnectOutcome, ClientError> {
        self.ensure_connected()?;
        let connect_id = self.inner.connect_request.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.set_pause(PauseState::Resumed);

        let needs_pings = settings.entry == ServerChoice::Fastest
            || settings.exit == Some(ServerChoice::Fastest);
        if needs_pings && self.with_state(|s| s.catalog.pings().is_empty()) {
            info!("no latency data yet, pinging servers before connecting");
            if let Err(e) = self.ping_servers() {
                warn!("ping before connect failed: {e}");
            }
        }

        let (params, outcome) =
            self.with_state(|s| connect_params(s, settings, &mut rand::thread_rng()))?;

        if self.inner.connect_request.load(Ordering::SeqCst) != connect_id {
            info!("connection request cancelled");
            return Ok(ConnectOutcome::Cancelled);
        }
        self.inner.send(&Request::Connect(params))?;
        Ok(outcome)
    }
}

/// Resolve the servers of `settings` against the catalog and build the
/// `Connect` parameters.
fn connect_params<R: Rng + ?Sized>(
    state: &ClientState,
    settings: &ConnectSettings,
    rng: &mut R,
) -> Result<(ConnectParams, ConnectOutcome), ClientError> {
    let catalog = &state.catalog;
    let servers = catalog.active_servers(settings.vpn_type, settings.ipv6 && settings.ipv6_only);
    if servers.is_empty() {
        return Err(SelectionError::NoServers.into());
    }
    let location = state.real_location.as_ref().and_then(GeoLookup::location);

    let by_gateway = |gateway: &str| {
        servers
            .iter()
            .copied()
            .find(|s| s.gateway == gateway)
            .ok_or_else(|| SelectionError::UnknownGateway(gateway.to_string()))
    };
    let fastest = |exclude: &[String]| {
        fastest_server(&servers, exclude, location.as_ref()).ok_or(SelectionError::NoServers)
    };

    let (entry, exit) = match (&settings.entry, &settings.exit) {
        (ServerChoice::Random, Some(ServerChoice::Random)) => {
            let (entry, exit) = random_multihop_pair(&servers, &servers, &mut *rng)?;
            (entry, Some(exit))
        }
        (entry_choice, exit_choice) => {
            let fixed_exit = match exit_choice {
                Some(ServerChoice::Gateway(gw)) => Some(by_gateway(gw)?),
                _ => None,
            };
            let entry = match entry_choice {
                ServerChoice::Gateway(gw) => by_gateway(gw)?,
                ServerChoice::Fastest => {
                    let mut exclude = settings.fastest_exclude.clone();
                    exclude.extend(fixed_exit.map(|s| s.gateway.clone()));
                    fastest(&exclude)?
                }
                ServerChoice::Random => {
                    let exclusion = fixed_exit
                        .map(|s| Exclusion::other_leg(s, true))
                        .unwrap_or_else(Exclusion::none);
                    random_server(&servers, &exclusion, &mut *rng).ok_or(SelectionError::NoServers)?
                }
            };
            let exit = match exit_choice {
                None => None,
                Some(ServerChoice::Gateway(_)) => fixed_exit,
                Some(ServerChoice::Fastest) => {
                    let mut exclude = settings.fastest_exclude.clone();
                    exclude.push(entry.gateway.clone());
                    Some(fastest(&exclude)?)
                }
                Some(ServerChoice::Random) => Some(
                    random_server(&servers, &Exclusion::other_leg(entry, true), &mut *rng)
                        .ok_or(SelectionError::NoServers)?,
                ),
            };
            (entry, exit)
        }
    };

    if let Some(exit) = exit {
        match check_inaccessible(exit, Some(entry), ConflictCheck::default()) {
            Some(Conflict::SameGateway) => return Err(SelectionError::SameGateway.into()),
            Some(conflict) => warn!("{}", conflict.message()),
            None => {}
        }
    }

    let port = settings.port.unwrap_or_else(|| default_port(state, settings.vpn_type));
    let dns = if settings.antitracker {
        let antitracker = &catalog.config().antitracker;
        let info = if settings.antitracker_hardcore {
            &antitracker.hardcore
        } else {
            &antitracker.default
        };
        DnsSettings::plain(info.ip.clone())
    } else {
        settings.dns.clone()
    };

    let mut params = ConnectParams {
        vpn_type: settings.vpn_type,
        manual_dns: dns,
        firewall_on: settings.firewall_on,
        firewall_on_during_connection: settings.firewall_on_during_connection,
        ipv6: settings.ipv6,
        ipv6_only: settings.ipv6_only,
        ..Default::default()
    };
    let entry_hosts = HostList {
        hosts: entry.hosts.clone(),
    };
    match settings.vpn_type {
        VpnType::WireGuard => {
            params.wire_guard_parameters = Some(WireGuardParameters {
                port,
                entry_vpn_server: entry_hosts,
                multihop_exit_server: exit
                    .map(|exit| MultihopExit {
                        exit_srv_id: exit.exit_id().to_string(),
                        hosts: exit.hosts.clone(),
                    })
                    .unwrap_or_default(),
            });
        }
        VpnType::OpenVpn => {
            params.open_vpn_parameters = Some(OpenVpnParameters {
                port,
                entry_vpn_server: entry_hosts,
                multihop_exit_srv_id: exit.map(|e| e.exit_id().to_string()).unwrap_or_default(),
            });
        }
    }

    debug!(
        "connecting via {}{}",
        entry.gateway,
        exit.map(|e| format!(" -> {}", e.gateway)).unwrap_or_default()
    );
    let outcome = ConnectOutcome::Sent {
        entry: entry.gateway.clone(),
        exit: exit.map(|e| e.gateway.clone()),
    };
    Ok((params, outcome))
}

/// First fixed port the catalog offers for `vpn_type`.
fn default_port(state: &ClientState, vpn_type: VpnType) -> PortParams {
    let ports = &state.catalog.config().ports;
    let ports = match vpn_type {
        VpnType::WireGuard => &ports.wireguard,
        VpnType::OpenVpn => &ports.openvpn,
    };
    ports
        .iter()
        .find(|p| p.port != 0)
        .map(|p| PortParams {
            port: p.port,
            protocol: if p.is_tcp() {
                PortProtocol::Tcp
            } else {
                PortProtocol::Udp
            },
        })
        .unwrap_or(PortParams {
            port: FALLBACK_PORT,
            protocol: PortProtocol::Udp,
        })
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, time::Duration};

    use rand::{SeedableRng, rngs::StdRng};
    use serde_json::json;

    use crate::{
        client::testing::{FakeDaemon, Reply, reply, standard, test_config},
        protocol::response::PingResult,
        servers::{PortInfo, tests::server},
    };

    use super::*;

    fn state() -> ClientState {
        let mut state = ClientState::default();
        let mut info = ServersInfo {
            wireguard: vec![
                server("us-tx1.wg.example.net", "US", "Dallas", "Acme", &["10.0.0.1"]),
                server("de-fra1.wg.example.net", "DE", "Frankfurt", "Hetz", &["10.0.1.1"]),
                server("nl-ams1.wg.example.net", "NL", "Amsterdam", "Lease", &["10.0.2.1"]),
            ],
            openvpn: vec![server("se-sto1.gw.example.net", "SE", "Stockholm", "Acme", &["10.1.0.1"])],
            ..Default::default()
        };
        info.config.antitracker.default.ip = "10.0.254.2".into();
        info.config.ports.wireguard = vec![
            PortInfo {
                kind: "UDP".into(),
                port: 0,
                ..Default::default()
            },
            PortInfo {
                kind: "UDP".into(),
                port: 53,
                ..Default::default()
            },
        ];
        state.catalog.replace(info);
        state.catalog.update_pings(&[
            PingResult {
                host: "10.0.0.1".into(),
                ping: 50,
            },
            PingResult {
                host: "10.0.1.1".into(),
                ping: 10,
            },
        ]);
        state
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn fastest_single_hop() {
        let (params, outcome) =
            connect_params(&state(), &ConnectSettings::default(), &mut rng()).unwrap();

        assert_eq!(outcome, ConnectOutcome::Sent {
            entry: "de-fra1.wg.example.net".into(),
            exit: None
        });
        let wg = params.wire_guard_parameters.unwrap();
        assert_eq!(wg.entry_vpn_server.hosts[0].host, "10.0.1.1");
        assert_eq!(wg.port, PortParams {
            port: 53,
            protocol: PortProtocol::Udp
        });
        assert_eq!(wg.multihop_exit_server, MultihopExit::default());
        assert!(params.open_vpn_parameters.is_none());
    }

    #[test]
    fn fastest_respects_exclusions() {
        let settings = ConnectSettings {
            fastest_exclude: vec!["de-fra1.wg.example.net".into()],
            ..Default::default()
        };
        let (_, outcome) = connect_params(&state(), &settings, &mut rng()).unwrap();
        assert_eq!(outcome, ConnectOutcome::Sent {
            entry: "us-tx1.wg.example.net".into(),
            exit: None
        });
    }

    #[test]
    fn multihop_with_fixed_gateways() {
        let settings = ConnectSettings {
            entry: ServerChoice::Gateway("us-tx1.wg.example.net".into()),
            exit: Some(ServerChoice::Gateway("nl-ams1.wg.example.net".into())),
            antitracker: true,
            ..Default::default()
        };
        let (params, _) = connect_params(&state(), &settings, &mut rng()).unwrap();

        assert_eq!(params.manual_dns, DnsSettings::plain("10.0.254.2"));
        let exit = params.wire_guard_parameters.unwrap().multihop_exit_server;
        assert_eq!(exit.exit_srv_id, "nl-ams1");
        assert_eq!(exit.hosts[0].host, "10.0.2.1");
    }

    #[test]
    fn same_entry_and_exit_is_refused() {
        let gw = "us-tx1.wg.example.net".to_string();
        let settings = ConnectSettings {
            entry: ServerChoice::Gateway(gw.clone()),
            exit: Some(ServerChoice::Gateway(gw)),
            ..Default::default()
        };
        assert!(matches!(
            connect_params(&state(), &settings, &mut rng()),
            Err(ClientError::Selection(SelectionError::SameGateway))
        ));
    }

    #[test]
    fn unknown_gateway() {
        let settings = ConnectSettings {
            entry: ServerChoice::Gateway("xx.wg.example.net".into()),
            ..Default::default()
        };
        assert!(matches!(
            connect_params(&state(), &settings, &mut rng()),
            Err(ClientError::Selection(SelectionError::UnknownGateway(_)))
        ));
    }

    #[test]
    fn random_exit_avoids_entry_country() {
        for seed in 0..20 {
            let settings = ConnectSettings {
                entry: ServerChoice::Gateway("de-fra1.wg.example.net".into()),
                exit: Some(ServerChoice::Random),
                ..Default::default()
            };
            let (_, outcome) =
                connect_params(&state(), &settings, &mut StdRng::seed_from_u64(seed)).unwrap();
            let ConnectOutcome::Sent { exit: Some(exit), .. } = outcome else {
                panic!("expected a multihop connection");
            };
            assert_ne!(exit, "de-fra1.wg.example.net");
        }
    }

    #[test]
    fn random_pair_uses_distinct_isps() {
        let settings = ConnectSettings {
            entry: ServerChoice::Random,
            exit: Some(ServerChoice::Random),
            ..Default::default()
        };
        let state = state();
        let (_, outcome) = connect_params(&state, &settings, &mut rng()).unwrap();
        let ConnectOutcome::Sent {
            entry,
            exit: Some(exit),
        } = outcome
        else {
            panic!("expected a multihop connection");
        };
        let isp = |gw: &str| state.catalog.get(gw).unwrap().isp.clone();
        assert_ne!(isp(&entry), isp(&exit));
    }

    #[test]
    fn openvpn_parameters() {
        let settings = ConnectSettings {
            vpn_type: VpnType::OpenVpn,
            entry: ServerChoice::Random,
            ..Default::default()
        };
        let (params, _) = connect_params(&state(), &settings, &mut rng()).unwrap();

        let ovpn = params.open_vpn_parameters.unwrap();
        assert_eq!(ovpn.entry_vpn_server.hosts[0].host, "10.1.0.1");
        assert_eq!(ovpn.multihop_exit_srv_id, "");
        assert_eq!(ovpn.port.port, FALLBACK_PORT);
        assert!(params.wire_guard_parameters.is_none());
    }

    #[test]
    fn empty_catalog() {
        assert!(matches!(
            connect_params(&ClientState::default(), &ConnectSettings::default(), &mut rng()),
            Err(ClientError::Selection(SelectionError::NoServers))
        ));
    }

    fn connected(daemon: &FakeDaemon) -> DaemonClient {
        let client = DaemonClient::with_port_source(test_config(), daemon.port_info());
        client.open(false).unwrap();
        client
    }

    /// Daemon that reports an established tunnel and an enabled firewall.
    fn tunnel_up(idx: u64, request: &Request) -> Vec<Reply> {
        match request {
            Request::Hello { .. } => {
                let mut replies = standard(idx, request);
                replies.insert(
                    1,
                    reply(
                        ResponseKind::KillSwitchStatusResp,
                        0,
                        json!({"IsEnabled": true}),
                    ),
                );
                replies.insert(
                    1,
                    reply(
                        ResponseKind::ConnectedResp,
                        0,
                        json!({"VpnType": 1, "ServerIP": "10.0.1.1", "IsCanPause": true}),
                    ),
                );
                replies
            }
            other => standard(idx, other),
        }
    }

    #[test]
    fn concurrent_pings_share_one_request() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::PingServers { .. } => {
                let mut replies = vec![Reply::Delay(Duration::from_millis(300))];
                replies.extend(standard(idx, request));
                replies
            }
            other => standard(idx, other),
        });
        let client = connected(&daemon);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let client = client.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    client.ping_servers()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(daemon.count("PingServers"), 1);
        for result in results {
            assert_eq!(result.unwrap().ping_results.len(), 2);
        }
        assert_eq!(
            client.with_state(|s| s.catalog.get("de-fra1.wg.example.net").unwrap().ping),
            Some(20)
        );

        // Settled flights are not reused.
        client.ping_servers().unwrap();
        assert_eq!(daemon.count("PingServers"), 2);
    }

    #[test]
    fn disconnect_waits_for_the_push() {
        let daemon = FakeDaemon::start(tunnel_up);
        let client = connected(&daemon);
        assert_eq!(client.with_state(|s| s.vpn_state), VpnState::Connected);

        client.disconnect_vpn().unwrap();

        let state = client.state();
        assert_eq!(state.vpn_state, VpnState::Disconnected);
        assert!(state.connection.is_none());
    }

    #[test]
    fn daemon_errors_reach_the_caller() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::SessionNew { .. } => vec![reply(
                ResponseKind::ErrorResp,
                idx,
                json!({"ErrorMessage": "invalid account id", "ErrorType": 2}),
            )],
            other => standard(idx, other),
        });
        let client = connected(&daemon);

        match client.login(&Credentials::new("i-bad")) {
            Err(ClientError::Daemon {
                message,
                error_type,
            }) => {
                assert_eq!(message, "invalid account id");
                assert_eq!(error_type, 2);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.connection_state(), crate::client::ConnectionState::Connected);
    }

    #[test]
    fn successful_login_stores_session() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::SessionNew { account_id, .. } => vec![reply(
                ResponseKind::SessionNewResp,
                idx,
                json!({"APIStatus": 200, "Session": {"AccountID": account_id, "Session": "new"},
                       "Account": {"CurrentPlan": "Pro", "Active": true}}),
            )],
            other => standard(idx, other),
        });
        let client = connected(&daemon);

        let resp = client.login(&Credentials::new("i-good")).unwrap();

        assert_eq!(resp.api_status, 200);
        let state = client.state();
        assert_eq!(state.session.account_id, "i-good");
        assert_eq!(state.account.unwrap().account.current_plan, "Pro");
    }

    #[test]
    fn logout_runs_the_full_sequence() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::SessionDelete { .. } => vec![reply(
                ResponseKind::ErrorResp,
                idx,
                json!({"ErrorMessage": "API unreachable"}),
            )],
            other => standard(idx, other),
        });
        let client = connected(&daemon);
        assert!(client.state().is_logged_in());

        client.logout().unwrap();

        let sequence: Vec<_> = daemon
            .commands()
            .into_iter()
            .filter(|c| !matches!(*c, "Hello" | "AccountStatus"))
            .collect();
        assert_eq!(sequence, vec![
            "KillSwitchSetIsPersistent",
            "KillSwitchSetEnabled",
            "Disconnect",
            "SessionDelete"
        ]);
        assert!(!client.state().is_logged_in());
    }

    #[test]
    fn pause_and_resume_restore_the_firewall() {
        let daemon = FakeDaemon::start(tunnel_up);
        let client = connected(&daemon);
        assert!(client.with_state(|s| s.firewall.is_enabled));

        client.pause().unwrap();
        assert_eq!(client.with_state(|s| s.pause), PauseState::Paused);
        assert!(matches!(
            client.enable_firewall(true),
            Err(ClientError::Forbidden(_))
        ));
        assert!(matches!(
            client.firewall_set_persistent(true),
            Err(ClientError::Forbidden(_))
        ));

        client.resume().unwrap();
        assert_eq!(client.with_state(|s| s.pause), PauseState::Resumed);

        let toggles: Vec<bool> = daemon
            .received()
            .into_iter()
            .filter_map(|r| match r {
                Request::KillSwitchSetEnabled { is_enabled } => Some(is_enabled),
                _ => None,
            })
            .collect();
        assert_eq!(toggles, vec![false, true]);
    }

    #[test]
    fn persistent_firewall_is_left_alone_by_pause_and_resume() {
        let daemon = FakeDaemon::start(|idx, request| {
            let mut replies = tunnel_up(idx, request);
            if matches!(request, Request::Hello { .. }) {
                // Before the server list, after the plain firewall status.
                let at = replies.len() - 1;
                replies.insert(
                    at,
                    reply(
                        ResponseKind::KillSwitchStatusResp,
                        0,
                        json!({"IsEnabled": true, "IsPersistent": true}),
                    ),
                );
            }
            replies
        });
        let client = connected(&daemon);
        assert!(client.with_state(|s| s.firewall.is_persistent));

        client.pause().unwrap();
        assert_eq!(client.with_state(|s| s.pause), PauseState::Paused);
        client.resume().unwrap();
        assert_eq!(client.with_state(|s| s.pause), PauseState::Resumed);

        assert_eq!(daemon.count("PauseConnection"), 1);
        assert_eq!(daemon.count("ResumeConnection"), 1);
        assert_eq!(daemon.count("KillSwitchSetEnabled"), 0);

        // Explicit changes are still refused.
        assert!(matches!(
            client.enable_firewall(false),
            Err(ClientError::Forbidden(_))
        ));
    }

    #[test]
    fn pause_requires_a_tunnel() {
        let daemon = FakeDaemon::standard();
        let client = connected(&daemon);
        assert!(matches!(client.pause(), Err(ClientError::Forbidden(_))));
        assert_eq!(daemon.count("PauseConnection"), 0);
    }

    #[test]
    fn connect_sends_selected_servers() {
        let daemon = FakeDaemon::standard();
        let client = connected(&daemon);

        let outcome = client
            .connect_vpn(&ConnectSettings {
                entry: ServerChoice::Gateway("us-tx1.wg.example.net".into()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(outcome, ConnectOutcome::Sent {
            entry: "us-tx1.wg.example.net".into(),
            exit: None
        });
        assert!(daemon.wait_for("Connect"));
        let Some(Request::Connect(params)) = daemon
            .received()
            .into_iter()
            .find(|r| r.command() == "Connect")
        else {
            unreachable!()
        };
        let wg = params.wire_guard_parameters.unwrap();
        assert_eq!(wg.entry_vpn_server.hosts[0].hostname, "us-tx1");
        assert_eq!(wg.port.port, 2049);
    }

    #[test]
    fn fastest_connect_pings_first() {
        let daemon = FakeDaemon::standard();
        let client = connected(&daemon);

        let outcome = client.connect_vpn(&ConnectSettings::default()).unwrap();

        assert_eq!(daemon.count("PingServers"), 1);
        assert_eq!(outcome, ConnectOutcome::Sent {
            entry: "de-fra1.wg.example.net".into(),
            exit: None
        });
    }

    #[test]
    fn disconnect_cancels_a_pending_connect() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::PingServers { .. } => {
                let mut replies = vec![Reply::Delay(Duration::from_millis(300))];
                replies.extend(standard(idx, request));
                replies
            }
            other => standard(idx, other),
        });
        let client = connected(&daemon);

        let connecting = {
            let client = client.clone();
            thread::spawn(move || client.connect_vpn(&ConnectSettings::default()))
        };
        thread::sleep(Duration::from_millis(100));
        client.disconnect_vpn().unwrap();

        assert_eq!(connecting.join().unwrap().unwrap(), ConnectOutcome::Cancelled);
        assert_eq!(daemon.count("Connect"), 0);
    }

    #[test]
    fn geo_lookup_records_real_location() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::ApiRequest { .. } => vec![reply(
                ResponseKind::ApiResponse,
                idx,
                json!({"APIPath": "geo-lookup", "Error": "",
                       "ResponseData": r#"{"ip_address":"1.2.3.4","country_code":"DE","city":"Berlin","latitude":52.52,"longitude":13.4,"isIvpnServer":false}"#}),
            )],
            other => standard(idx, other),
        });
        let client = connected(&daemon);

        let lookup = client.geo_lookup(false).unwrap();

        assert_eq!(lookup.city, "Berlin");
        assert_eq!(client.state().real_location, Some(lookup));
        let api = daemon
            .received()
            .into_iter()
            .find(|r| r.command() == "APIRequest");
        assert_eq!(
            api,
            Some(Request::ApiRequest {
                api_path: "geo-lookup".into(),
                ip_protocol_required: IpProtocol::V4,
            })
        );
    }

    #[test]
    fn geo_lookup_without_ipv6_is_not_retried() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::ApiRequest { .. } => vec![reply(
                ResponseKind::ApiResponse,
                idx,
                json!({"APIPath": "geo-lookup", "Error": "No IPv6 support", "ResponseData": ""}),
            )],
            other => standard(idx, other),
        });
        let client = connected(&daemon);

        assert!(matches!(
            client.geo_lookup(true),
            Err(ClientError::Daemon { .. })
        ));
        assert_eq!(daemon.count("APIRequest"), 1);
    }

    #[test]
    fn failed_geo_lookup_is_retried() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::ApiRequest { .. } => vec![reply(
                ResponseKind::ApiResponse,
                idx,
                json!({"APIPath": "geo-lookup", "Error": "", "ResponseData": "{}"}),
            )],
            other => standard(idx, other),
        });
        let client = connected(&daemon);

        assert!(client.geo_lookup(false).is_err());
        assert_eq!(daemon.count("APIRequest"), 1 + GEO_LOOKUP_RETRIES as usize);
    }

    #[test]
    fn installed_apps_accept_any_index() {
        let daemon = FakeDaemon::start(|idx, request| match request {
            Request::GetInstalledApps => vec![reply(
                ResponseKind::InstalledAppsResp,
                0,
                json!({"Apps": [{"AppName": "Firefox", "AppBinaryPath": "/usr/bin/firefox"}]}),
            )],
            other => standard(idx, other),
        });
        let client = connected(&daemon);

        let apps = client.installed_apps().unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].app_binary_path, "/usr/bin/firefox");
    }
}
