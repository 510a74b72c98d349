//! avrorpc - Avro RPC server
//!
//! Serves one Avro protocol over TCP, negotiating protocol versions with
//! each client through the Avro handshake.

use avrorpc_ipc::{RemoteError, Responder};
use avrorpc_protocol::Message;
use avrorpc_schema::Value;
use avrorpc_server::{simple_protocol, Config, Server, ServerConfig, SimpleHandler};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if AVRORPC_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("AVRORPC_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    tracing::info!("Starting avrorpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Framing: {}", config.protocol.framing);

    let responder = match config.protocol.load_protocol()? {
        Some(protocol) => {
            tracing::info!(
                "  Protocol: {} (no handlers bound, calls answer with an error)",
                protocol.fullname()
            );
            Responder::new(protocol, |message: &Message, _: &Value| {
                Err::<Value, _>(RemoteError::system(format!(
                    "message '{}' is not implemented",
                    message.name()
                )))
            })
        }
        None => {
            tracing::info!("  Protocol: built-in Simple");
            Responder::new(simple_protocol()?, SimpleHandler)
        }
    };

    let server = Arc::new(Server::new(ServerConfig::from(&config), responder));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
