//! CLI utilities for the daemon client.
//!
//! [`prompt`] reads one [`Command`] from the user and [`execute`] runs it
//! against a [`DaemonClient`], writing a human readable report.
use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::{
    client::{ClientError, ConnectOutcome, ConnectSettings, Credentials, DaemonClient},
    command::{Command, CommandError},
    protocol::VpnType,
    servers::fastest_server,
};

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Prompt user for a command. End of input reads as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CliError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }
    Ok(s.as_str().try_into()?)
}

/// Run `command` and report the result to `writer`.
pub fn execute<W: Write>(
    client: &DaemonClient,
    command: &Command,
    mut writer: W,
) -> Result<(), CliError> {
    match command {
        Command::Exit => client.close(),
        Command::Status => {
            let state = client.state();
            writeln!(writer, "daemon:   {:?}", client.connection_state())?;
            if !state.daemon_version.is_empty() {
                let old = if state.daemon_is_old { " (outdated)" } else { "" };
                writeln!(writer, "version:  {}{old}", state.daemon_version)?;
            }
            writeln!(writer, "tunnel:   {:?}", state.vpn_state)?;
            if let Some(connection) = &state.connection {
                writeln!(writer, "server:   {}", connection.server_ip)?;
            }
            writeln!(writer, "pause:    {:?}", state.pause)?;
            writeln!(
                writer,
                "firewall: {}",
                if state.firewall.is_enabled { "on" } else { "off" }
            )?;
            if state.is_logged_in() {
                writeln!(writer, "account:  {}", state.session.account_id)?;
            } else {
                writeln!(writer, "account:  not logged in")?;
            }
        }
        Command::Servers => client.with_state(|state| -> io::Result<()> {
            for server in state.catalog.servers(VpnType::WireGuard) {
                let ping = server.ping.map_or("-".to_string(), |p| format!("{p} ms"));
                writeln!(
                    writer,
                    "{:<28} {:<16} {:<3} {ping}",
                    server.gateway, server.city, server.country_code
                )?;
            }
            Ok(())
        })?,
        Command::Ping => {
            let pings = client.ping_servers()?;
            writeln!(writer, "{} hosts answered", pings.ping_results.len())?;
        }
        Command::Fastest => {
            let fastest = client.with_state(|state| {
                let servers = state.catalog.active_servers(VpnType::WireGuard, false);
                let location = state.real_location.as_ref().and_then(|l| l.location());
                fastest_server(&servers, &[], location.as_ref()).map(|s| s.gateway.clone())
            });
            match fastest {
                Some(gateway) => writeln!(writer, "{gateway}")?,
                None => writeln!(writer, "no servers known")?,
            }
        }
        Command::Connect { entry, exit } => {
            let settings = ConnectSettings {
                entry: entry.clone(),
                exit: exit.clone(),
                ..ConnectSettings::default()
            };
            match client.connect_vpn(&settings)? {
                ConnectOutcome::Sent { entry, exit: None } => {
                    writeln!(writer, "connecting to {entry}")?
                }
                ConnectOutcome::Sent {
                    entry,
                    exit: Some(exit),
                } => writeln!(writer, "connecting to {entry} via {exit}")?,
                ConnectOutcome::Cancelled => writeln!(writer, "connect cancelled")?,
            }
        }
        Command::Disconnect => {
            client.disconnect_vpn()?;
            writeln!(writer, "disconnected")?;
        }
        Command::Firewall(enable) => {
            client.enable_firewall(*enable)?;
            writeln!(writer, "firewall {}", if *enable { "on" } else { "off" })?;
        }
        Command::Login(account) => {
            let session = client.login(&Credentials::new(account.as_str()))?;
            if client.with_state(|s| s.is_logged_in()) {
                writeln!(writer, "logged in as {}", session.session.account_id)?;
            } else {
                writeln!(
                    writer,
                    "login refused ({}): {}",
                    session.api_status, session.api_error_message
                )?;
            }
        }
        Command::Logout => {
            client.logout()?;
            writeln!(writer, "logged out")?;
        }
        Command::Account => {
            let status = client.account_status()?;
            let account = &status.account;
            writeln!(writer, "plan:   {}", account.current_plan)?;
            writeln!(writer, "active: {}", account.active)?;
        }
    }
    Ok(())
}
