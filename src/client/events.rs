use std::sync::{
    Mutex,
    mpsc::{self, Receiver, Sender},
};

use crate::{
    protocol::{
        ErrorResp, VpnState,
        response::{
            AccountStatusResp, ConnectedResp, KillSwitchStatusResp, SessionInfo,
            SplitTunnelConfig, WifiCurrentNetworkResp, WifiNetwork,
        },
        types::DnsSettings,
    },
    servers::GeoLookup,
};

use super::{ConnectionState, PauseState};

/// State changes reported to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionState(ConnectionState),
    DaemonVersion { version: String, is_old: bool },
    Session(SessionInfo),
    AccountStatus(AccountStatusResp),
    VpnState(VpnState),
    Connected(ConnectedResp),
    Disconnected { failure: bool, reason: String },
    PauseState(PauseState),
    ServersUpdated,
    PingsUpdated,
    Firewall(KillSwitchStatusResp),
    Dns(DnsSettings),
    SplitTunnel(SplitTunnelConfig),
    WifiCurrent(WifiCurrentNetworkResp),
    WifiNetworks(Vec<WifiNetwork>),
    Location(GeoLookup),
    DaemonExiting,
    /// An error the daemon hit after the triggering request had returned.
    DelayedError(ErrorResp),
}

#[derive(Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<Sender<ClientEvent>>>,
}

impl Subscribers {
    pub fn subscribe(&self) -> Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel();
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, forgetting dropped ones.
    pub fn emit(&self, event: ClientEvent) {
        self.senders
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
