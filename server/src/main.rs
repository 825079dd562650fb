//! Huddle Relay – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet das Relay.

use anyhow::Result;
use huddle_relay::{config::RelayConfig, Server};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("HUDDLE_RELAY_CONFIG").unwrap_or_else(|_| "relay.toml".into());

    let config = RelayConfig::laden(&config_pfad)?;
    huddle_observability::logging_initialisieren(&config.logging.level, &config.logging.format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Huddle Relay wird initialisiert"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(Server::neu(config).starten(shutdown_rx, None));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown-Signal empfangen, Relay wird beendet");
    let _ = shutdown_tx.send(true);

    server.await?
}
