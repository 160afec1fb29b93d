//! Command-line entry points, adapted from the teacher's `cli::cert` /
//! `cli::server` pair: a `cert` family for working with the spoofed CA
//! outside of a running proxy, and a `run` subcommand that starts one.

pub mod cert;
pub mod run;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "citadel-proxy", about = "Transparent TLS-intercepting filtering proxy for HTTP/1.x, HTTPS and WebSocket traffic")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect or generate the spoofed root certificate authority.
    Cert {
        #[command(subcommand)]
        command: cert::CertCommand,
    },
    /// Start the proxy core standalone, without an external diverter.
    Run(run::RunArgs),
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Command::Cert { command } => command.execute().await,
            Command::Run(args) => args.execute().await,
        }
    }
}
