pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod portfile;
pub mod protocol;
pub mod servers;
pub mod version;

pub use cli::{CliError, execute, prompt};
pub use client::{
    ClientError, ClientEvent, ClientState, ConnectOutcome, ConnectSettings, ConnectionState,
    Credentials, DaemonClient, PauseState, ServerChoice,
};
pub use command::{Command, CommandError};
pub use config::ClientConfig;
pub use portfile::{PortFile, PortInfo, PortInfoSource};
