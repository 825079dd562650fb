//! TCP-Listener – stellt das Relay ueber TCP bereit
//!
//! Der `RelayServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task. Frames werden mit
//! `FrameCodec` dekodiert und an `Relay::verbindung_bedienen` uebergeben.

use huddle_protocol::FrameCodec;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};

use crate::relay::Relay;
use crate::transport::stream_bruecke;

/// TCP-Relay-Server
pub struct RelayServer {
    relay: Relay,
    bind_addr: SocketAddr,
    max_frame_size: usize,
}

impl RelayServer {
    pub fn neu(relay: Relay, bind_addr: SocketAddr) -> Self {
        Self {
            relay,
            bind_addr,
            max_frame_size: FrameCodec::new().max_frame_size(),
        }
    }

    pub fn mit_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Startet den Listener und akzeptiert Verbindungen
    ///
    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt. Ist
    /// `gebunden_tx` gesetzt, wird die tatsaechliche Adresse gemeldet
    /// (Port 0 in Tests).
    pub async fn starten(
        self,
        mut shutdown_rx: watch::Receiver<bool>,
        gebunden_tx: Option<oneshot::Sender<SocketAddr>>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        let lokale_addr = listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TCP Relay-Server gestartet");
        if let Some(tx) = gebunden_tx {
            let _ = tx.send(lokale_addr);
        }

        loop {
            tokio::select! {
                ergebnis = listener.accept() => {
                    match ergebnis {
                        Ok((stream, peer_addr)) => {
                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");
                            let relay = self.relay.clone();
                            let codec = FrameCodec::with_max_size(self.max_frame_size);
                            let shutdown = shutdown_rx.clone();
                            tokio::spawn(verbindung_bedienen(relay, stream, peer_addr, codec, shutdown));
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Relay-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("TCP Relay-Server gestoppt");
        Ok(())
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

async fn verbindung_bedienen(
    relay: Relay,
    stream: TcpStream,
    peer_addr: SocketAddr,
    codec: FrameCodec,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);
    let (ausgehend, eingehend) = stream_bruecke(stream, codec, peer_addr.to_string());

    tokio::select! {
        _ = relay.verbindung_bedienen(eingehend, ausgehend) => {}
        _ = async {
            while shutdown_rx.changed().await.is_ok() {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        } => {
            tracing::debug!(peer = %peer_addr, "Shutdown – Verbindung wird getrennt");
        }
    }
    tracing::debug!(peer = %peer_addr, "Verbindungs-Task beendet");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
