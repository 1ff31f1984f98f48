//! Commands accepted by the interactive client.
//!
//! A [`Command`] is parsed from one line of user input:
//!
//! - `.exit`: close the daemon connection and quit.
//! - `status`: print the daemon, tunnel and firewall state.
//! - `servers`: list the WireGuard servers with their latency.
//! - `ping`: measure latency to every server.
//! - `fastest`: show the server `connect fastest` would pick.
//! - `connect [gateway|fastest|random] [exit-gateway|random]`: connect, multihop
//!   when an exit is given.
//! - `disconnect`, `logout`, `account`.
//! - `firewall on|off`.
//! - `login <account-id>`.
//!
//! # Example
//! ```rust
//! use vpnd_client::{Command, ServerChoice};
//!
//! let cmd: Command = "connect random".try_into().unwrap();
//! assert_eq!(cmd, Command::Connect { entry: ServerChoice::Random, exit: None });
//! ```
use thiserror::Error;

use crate::client::ServerChoice;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),

    #[error("invalid '{command}' command, {reason}")]
    InvalidCommandArguments { command: String, reason: String },

    #[error("no command provided")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Close the connection and terminate the process.
    Exit,
    Status,
    Servers,
    Ping,
    Fastest,
    Connect {
        entry: ServerChoice,
        exit: Option<ServerChoice>,
    },
    Disconnect,
    Firewall(bool),
    Login(String),
    Logout,
    Account,
}

fn server_choice(arg: &str) -> ServerChoice {
    match arg.to_lowercase().as_str() {
        "fastest" => ServerChoice::Fastest,
        "random" => ServerChoice::Random,
        _ => ServerChoice::Gateway(arg.to_string()),
    }
}

fn invalid(command: &str, reason: &str) -> CommandError {
    CommandError::InvalidCommandArguments {
        command: command.to_string(),
        reason: reason.to_string(),
    }
}

impl TryInto<Command> for &str {
    type Error = CommandError;

    fn try_into(self) -> Result<Command, Self::Error> {
        let parts = self.split_whitespace().collect::<Vec<&str>>();
        let Some((name, args)) = parts.split_first() else {
            return Err(CommandError::Empty);
        };

        let no_args = |command: Command| {
            if args.is_empty() {
                Ok(command)
            } else {
                Err(invalid(name, "takes no arguments"))
            }
        };

        match name.to_lowercase().as_str() {
            ".exit" => Ok(Command::Exit),
            "status" => no_args(Command::Status),
            "servers" => no_args(Command::Servers),
            "ping" => no_args(Command::Ping),
            "fastest" => no_args(Command::Fastest),
            "disconnect" => no_args(Command::Disconnect),
            "logout" => no_args(Command::Logout),
            "account" => no_args(Command::Account),
            "connect" => match args {
                [] => Ok(Command::Connect {
                    entry: ServerChoice::Fastest,
                    exit: None,
                }),
                [entry] => Ok(Command::Connect {
                    entry: server_choice(entry),
                    exit: None,
                }),
                [entry, exit] => {
                    let exit = server_choice(exit);
                    if exit == ServerChoice::Fastest {
                        return Err(invalid(name, "the exit server is a gateway or 'random'"));
                    }
                    Ok(Command::Connect {
                        entry: server_choice(entry),
                        exit: Some(exit),
                    })
                }
                _ => Err(invalid(
                    name,
                    "expects at most an entry and an exit server. Example: connect fastest random",
                )),
            },
            "firewall" => match args {
                ["on"] => Ok(Command::Firewall(true)),
                ["off"] => Ok(Command::Firewall(false)),
                _ => Err(invalid(name, "expects 'on' or 'off'. Example: firewall on")),
            },
            "login" => match args {
                [account] => Ok(Command::Login(account.to_string())),
                _ => Err(invalid(name, "requires an account id. Example: login i-XXXX-XXXX")),
            },
            _ => Err(CommandError::UnrecognizedCommand(self.trim().to_string())),
        }
    }
}
