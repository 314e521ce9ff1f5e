//! # CLI Interface
//!
//! Command-line argument structure for the `walletgate` binary, via `clap`
//! derive. Three subcommands: `run`, `init`, and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use walletgate_core::config::{DEFAULT_API_PORT, DEFAULT_CHALLENGE_DOMAIN, DEFAULT_METRICS_PORT};

/// WalletGate service.
///
/// Serves wallet sign-in, wallet linking, and credit endpoints over HTTP,
/// with Prometheus metrics on a separate port.
#[derive(Parser, Debug)]
#[command(
    name = "walletgate",
    about = "WalletGate auth and credit service",
    version,
    propagate_version = true
)]
pub struct WalletGateCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the WalletGate binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP service.
    Run(RunArgs),
    /// Initialize a new data directory.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the data directory holding the embedded database.
    ///
    /// Created on first run if it does not exist.
    #[arg(long, short = 'd', env = "WALLETGATE_DATA_DIR", default_value = "~/.walletgate")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "WALLETGATE_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "WALLETGATE_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Domain presented in challenge messages, so wallets show users who is
    /// asking them to sign.
    #[arg(long, env = "WALLETGATE_CHALLENGE_DOMAIN", default_value = DEFAULT_CHALLENGE_DOMAIN)]
    pub challenge_domain: String,

    /// Log output format: "pretty" or "json".
    #[arg(long, env = "WALLETGATE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "WALLETGATE_DATA_DIR", default_value = "~/.walletgate")]
    pub data_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        // Ensures the derive macros produce a valid CLI definition.
        WalletGateCli::command().debug_assert();
    }
}
