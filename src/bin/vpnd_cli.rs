use clap::Parser;
use std::{
    error::Error,
    io::{self, Write},
    path::PathBuf,
    process,
};

use log::{error, info};
use vpnd_client::{CliError, ClientConfig, Command, DaemonClient, execute, prompt};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Daemon port file; overrides the config
    #[arg(short, long)]
    port_file: Option<PathBuf>,

    /// Give up after the first failed connection attempt
    #[arg(long)]
    no_retry: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load_from_path(path),
        None => ClientConfig::default(),
    };
    if let Some(port_file) = cli.port_file {
        config.port_file = port_file;
    }

    let client = DaemonClient::new(config);
    {
        let client = client.clone();
        ctrlc::set_handler(move || {
            info!("interrupted, closing the daemon connection");
            client.close();
            process::exit(130);
        })?;
    }

    if let Err(e) = client.open(!cli.no_retry) {
        error!("failed to connect to the daemon: {e}");
        return Err(e.into());
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        let cmd = match prompt(stdin.lock(), &mut stdout) {
            Ok(c) => c,
            Err(CliError::Io(e)) => return Err(e.into()),
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        let exit = cmd == Command::Exit;
        if let Err(e) = execute(&client, &cmd, &mut stdout) {
            eprintln!("error: {e}");
        }
        stdout.flush()?;
        if exit {
            break;
        }
    }

    Ok(())
}
