//! # Musa
//!
//! Entry point of the bootstrapper.
//!
//! ```text
//! musa [OPTIONS]          run the daemon
//! musa keygen             print a fresh private key and its peer id
//! ```
//!
//! Exit status: 0 after a signal-triggered stop, 1 on a fatal error,
//! 2 on a malformed flag or environment value.

use std::process::ExitCode;

use anyhow::Result;
use musa::{Cli, Command, Identity};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::resolve() {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    let outcome = match cli.command {
        Some(Command::Keygen) => keygen(),
        None => musa::daemon::run(cli.config)
            .await
            .map_err(anyhow::Error::from),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn keygen() -> Result<()> {
    let identity = Identity::generate()?;
    println!("private key: {}", identity.encode()?);
    println!("peer id:     {}", identity.peer_id());
    Ok(())
}
