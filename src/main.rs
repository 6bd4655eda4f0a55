//! recgate server entry point.
//!
//! Loads configuration, builds the store, context and command table, then
//! serves clients until Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use recgate::commands::{CommandHandler, CommandTable};
use recgate::config::{CliAction, Config};
use recgate::connection::{handle_connection, ConnectionStats};
use recgate::context::Context;
use recgate::store::MemoryStore;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_help() {
    println!(
        r#"
recgate - Redis-protocol gateway over a record store

USAGE:
    recgate [OPTIONS]

OPTIONS:
    -c, --config <PATH>  JSON configuration file
    -h, --host <HOST>    Host to bind to (default: {host})
    -p, --port <PORT>    Port to listen on (default: {port})
    -v, --version        Print version information
        --help           Print this help message

CONFIG FILE KEYS:
    namespace, set, backward_write_compat, expanded_map_default_ttl,
    expanded_map_cache, expanded_map_cache_ttl, expanded_map_cache_capacity,
    write_back_target, write_back_setTimeout, write_back_hIncrBy,
    host, port, store_default_ttl

EXAMPLES:
    recgate                              # Start on {host}:{port}
    recgate --config gateway.json        # Load settings from a file
    recgate -c gateway.json --port 6380  # File settings, port overridden
"#,
        host = recgate::DEFAULT_HOST,
        port = recgate::DEFAULT_PORT,
    );
}

fn print_banner(config: &Config) {
    println!(
        r#"
recgate v{} - Redis-protocol gateway
──────────────────────────────────────────────
Listening on   {}
Namespace/set  {}/{}
Write-back     {}

Use Ctrl+C to shutdown gracefully.
"#,
        recgate::VERSION,
        config.bind_address(),
        config.namespace,
        config.set,
        config.write_back_target.as_deref().unwrap_or("disabled"),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_args(std::env::args().skip(1))? {
        CliAction::Serve(config) => config,
        CliAction::Help => {
            print_help();
            return Ok(());
        }
        CliAction::Version => {
            println!("recgate version {}", recgate::VERSION);
            return Ok(());
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    print_banner(&config);

    let default_ttl = (config.store_default_ttl > 0)
        .then(|| Duration::from_secs(config.store_default_ttl));
    let store = Arc::new(MemoryStore::with_default_ttl(default_ttl));
    info!("Serving from the in-process record store");

    let ctx = Arc::new(
        Context::from_config(store, &config).context("invalid namespace or set")?,
    );
    let table = recgate::write_back::install(CommandTable::standard(), &config)
        .context("failed to set up write-back")?;
    info!(commands = table.len(), "Command table ready");
    let handler = CommandHandler::new(Arc::clone(&ctx), Arc::new(table));

    let stats = Arc::new(ConnectionStats::new());
    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(addr = %config.bind_address(), "Listening");

    tokio::select! {
        _ = accept_loop(listener, handler, Arc::clone(&stats)) => {}
        result = signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown signal received, stopping server...");
        }
    }

    let metrics = ctx.metrics.snapshot();
    info!(
        commands_ok = metrics.commands_ok,
        commands_err = metrics.commands_err,
        open_connections = metrics.connections,
        connections_accepted = stats.connections_accepted.load(std::sync::atomic::Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

async fn accept_loop(listener: TcpListener, handler: CommandHandler, stats: Arc<ConnectionStats>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(
                    stream,
                    addr,
                    handler.clone(),
                    Arc::clone(&stats),
                ));
            }
            Err(e) => error!(error = %e, "Failed to accept connection"),
        }
    }
}
