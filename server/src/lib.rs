//! huddle-relay – Bibliotheks-Root
//!
//! Stellt das Signaling-Relay als eigenstaendigen Dienst bereit und bietet
//! den Einstiegspunkt fuer Integrationstests.

pub mod config;

use anyhow::{Context, Result};
use config::RelayConfig;
use huddle_signaling::{Relay, RelayServer};
use std::net::SocketAddr;
use tokio::sync::{oneshot, watch};

/// Haelt Konfiguration und Relay-Zustand zusammen
pub struct Server {
    pub config: RelayConfig,
    relay: Relay,
}

impl Server {
    pub fn neu(config: RelayConfig) -> Self {
        Self {
            config,
            relay: Relay::neu(),
        }
    }

    /// Zugriff auf das Relay (Statistik, Roster)
    pub fn relay(&self) -> &Relay {
        &self.relay
    }

    /// Startet Listener und Roster-Resync und laeuft bis `shutdown_rx` `true` meldet
    ///
    /// Ist `gebunden_tx` gesetzt, wird die tatsaechlich gebundene Adresse
    /// gemeldet (Port 0 in Tests).
    pub async fn starten(
        self,
        shutdown_rx: watch::Receiver<bool>,
        gebunden_tx: Option<oneshot::Sender<SocketAddr>>,
    ) -> Result<()> {
        let adresse = self.config.bind_adresse()?;
        tracing::info!(
            adresse = %adresse,
            resync_sek = self.config.relay.resync_intervall_sek,
            max_frame_size = self.config.relay.max_frame_size,
            "Relay startet"
        );

        let resync = self.config.resync_intervall().map(|intervall| {
            let relay = self.relay.clone();
            let rx = shutdown_rx.clone();
            tokio::spawn(async move { relay.resync_schleife(intervall, rx).await })
        });

        let server = RelayServer::neu(self.relay.clone(), adresse)
            .mit_max_frame_size(self.config.relay.max_frame_size);
        let ergebnis = server
            .starten(shutdown_rx, gebunden_tx)
            .await
            .with_context(|| format!("TCP-Listener auf {adresse} fehlgeschlagen"));

        if let Some(task) = resync {
            task.abort();
        }

        let statistik = self.relay.statistik();
        tracing::info!(
            offers = statistik.offers,
            answers = statistik.answers,
            kandidaten = statistik.kandidaten,
            verworfen = statistik.verworfen,
            "Relay beendet"
        );
        ergebnis
    }
}
