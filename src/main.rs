//! DriftKV server binary
//!
//! Parses the command line, sets up logging, binds the listener and serves
//! clients until Ctrl+C.

use anyhow::Context;
use clap::Parser;
use driftkv::server::{Server, ServerConfig};
use driftkv::storage::ExpiryConfig;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "driftkv", version = driftkv::VERSION, about = "In-memory key-value server with key expiry")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = driftkv::DEFAULT_HOST)]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = driftkv::DEFAULT_PORT)]
    port: u16,

    /// Milliseconds between background expiry sweeps
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    sweep_interval_ms: u64,

    /// Log filter, e.g. `info` or `driftkv=debug`
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            expiry: ExpiryConfig {
                interval: Duration::from_millis(self.sweep_interval_ms),
            },
        }
    }
}

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
DriftKV v{} - In-Memory Key-Value Server
──────────────────────────────────────────
Server started on {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        driftkv::VERSION,
        config.bind_address()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level)
        .with_context(|| format!("invalid log filter '{}'", args.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = args.server_config();
    let server = Server::bind(&config)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    print_banner(&config);
    info!(
        sweep_interval_ms = args.sweep_interval_ms,
        "Background expiry sweeper configured"
    );

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    server.run(shutdown).await;
    Ok(())
}
