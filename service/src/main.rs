// Copyright (c) 2026 WalletGate Maintainers. MIT License.
// See LICENSE for details.

//! # WalletGate Service
//!
//! Entry point for the `walletgate` binary. Parses CLI arguments, initializes
//! logging and metrics, wires the domain stores over the embedded database,
//! and serves the HTTP API plus a Prometheus metrics endpoint.
//!
//! The binary supports three subcommands:
//!
//! - `run`     — start the service
//! - `init`    — initialize the data directory
//! - `version` — print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use walletgate_core::auth::{NonceStore, WalletAuthenticator, WalletLinker};
use walletgate_core::bindings::BindingStore;
use walletgate_core::config::LINK_NONCE_WINDOW;
use walletgate_core::db::GateDb;
use walletgate_core::identity::InMemoryIdentityProvider;
use walletgate_core::ledger::CreditLedger;

use cli::{Commands, WalletGateCli};
use logging::LogFormat;
use metrics::GateMetrics;

/// How often the background sweep reclaims expired challenge nonces.
/// Expired nonces are already unusable; this is purely space hygiene.
const NONCE_PURGE_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = WalletGateCli::parse();

    match cli.command {
        Commands::Run(args) => run_service(args).await,
        Commands::Init(args) => init_service(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the full service: API server, metrics endpoint, and the nonce
/// purge sweep.
async fn run_service(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "walletgate=info,walletgate_core=info,tower_http=debug",
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        challenge_domain = %args.challenge_domain,
        "starting walletgate"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = GateDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Domain stores ---
    let nonces = NonceStore::new(&db).context("failed to open nonce tree")?;
    let bindings = BindingStore::new(&db).context("failed to open bindings tree")?;
    let ledger = CreditLedger::new(&db).context("failed to open ledger trees")?;

    // --- Identity platform ---
    // The in-memory provider covers dev and test deployments. A hosted
    // platform slots in behind the same trait without touching the flows.
    let identity = Arc::new(InMemoryIdentityProvider::new());

    let authenticator =
        WalletAuthenticator::new(nonces.clone(), bindings.clone(), identity.clone());
    let linker = WalletLinker::new(nonces.clone(), bindings, identity.clone());

    // --- Metrics ---
    let gate_metrics = Arc::new(GateMetrics::new());

    // --- Application state ---
    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        challenge_domain: args.challenge_domain,
        nonces: nonces.clone(),
        authenticator,
        linker,
        ledger,
        identity,
        metrics: Arc::clone(&gate_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&gate_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Nonce purge sweep ---
    let purge_nonces = nonces.clone();
    let purge_db = db.clone();
    let purge_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            NONCE_PURGE_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            // The link window is the longer of the two, so anything older
            // than it is dead for every flow.
            match purge_nonces.purge_expired(LINK_NONCE_WINDOW) {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "expired nonces reclaimed"),
                Err(e) => tracing::warn!(error = %e, "nonce purge failed"),
            }
            if let Err(e) = purge_db.flush() {
                tracing::warn!(error = %e, "database flush failed");
            }
        }
    });

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    purge_loop.abort();
    db.flush().context("final database flush failed")?;
    tracing::info!("walletgate stopped");
    Ok(())
}

/// Initializes the data directory and creates the database trees.
fn init_service(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("walletgate=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing data directory");

    let db_path = data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    // Opening the stores once creates every tree, so a later `run` starts
    // against a fully laid-out database.
    let db = GateDb::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    NonceStore::new(&db).context("failed to create nonce tree")?;
    BindingStore::new(&db).context("failed to create bindings tree")?;
    CreditLedger::new(&db).context("failed to create ledger trees")?;
    db.flush().context("failed to flush database")?;

    println!("WalletGate initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Database       : {}", db_path.display());

    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("walletgate {}", env!("CARGO_PKG_VERSION"));
    println!("rustc      {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
