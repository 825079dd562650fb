//! Relay-Transport – Verbindungsaufbau zum Relay
//!
//! Der `SignalingLink` kennt nur einen Nachrichtenkanal in beide
//! Richtungen (`RelayKanal`). Wie dieser Kanal zustande kommt, entscheidet
//! ein `RelayConnector`:
//!
//! - `TcpRelayConnector` – TCP + `FrameCodec` (produktiv)
//! - `SpeicherConnector` – In-Memory direkt am `Relay` (Tests, Einbettung)
//!
//! Ein geschlossener Eingangskanal bedeutet: Verbindung verloren.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use huddle_protocol::{FrameCodec, SignalingMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// RelayKanal / RelayConnector
// ---------------------------------------------------------------------------

/// Bidirektionaler Nachrichtenkanal zum Relay
#[derive(Debug)]
pub struct RelayKanal {
    /// Nachrichten an das Relay (Drop schliesst die Verbindung)
    pub ausgehend: mpsc::UnboundedSender<SignalingMessage>,
    /// Nachrichten vom Relay (None = Verbindung verloren)
    pub eingehend: mpsc::UnboundedReceiver<SignalingMessage>,
}

/// Stellt Verbindungen zum Relay her
#[async_trait]
pub trait RelayConnector: Send + Sync {
    /// Oeffnet eine neue Verbindung zum Relay
    async fn verbinden(&self) -> SignalingResult<RelayKanal>;
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

/// Verbindet sich per TCP mit einem `RelayServer`
#[derive(Debug, Clone)]
pub struct TcpRelayConnector {
    adresse: String,
    max_frame_size: usize,
}

impl TcpRelayConnector {
    /// Erstellt einen Connector fuer `host:port`
    pub fn neu(adresse: impl Into<String>) -> Self {
        Self {
            adresse: adresse.into(),
            max_frame_size: FrameCodec::new().max_frame_size(),
        }
    }

    pub fn mit_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

#[async_trait]
impl RelayConnector for TcpRelayConnector {
    async fn verbinden(&self) -> SignalingResult<RelayKanal> {
        let stream = TcpStream::connect(&self.adresse).await.map_err(|e| {
            SignalingError::verbindung(format!("{} nicht erreichbar: {}", self.adresse, e))
        })?;
        // Signaling-Nachrichten sind klein und latenzkritisch
        let _ = stream.set_nodelay(true);

        tracing::debug!(adresse = %self.adresse, "TCP-Verbindung zum Relay hergestellt");
        let (ausgehend, eingehend) = stream_bruecke(
            stream,
            FrameCodec::with_max_size(self.max_frame_size),
            self.adresse.clone(),
        );
        Ok(RelayKanal {
            ausgehend,
            eingehend,
        })
    }
}

/// Verbindet einen Byte-Stream ueber `FrameCodec` mit einem Kanalpaar
///
/// Der Bruecken-Task endet, wenn die Gegenstelle trennt, ein Frame-Fehler
/// auftritt oder alle Sender des Ausgangskanals gedroppt wurden. In allen
/// Faellen wird der Eingangskanal geschlossen.
pub(crate) fn stream_bruecke<S>(
    stream: S,
    codec: FrameCodec,
    gegenstelle: String,
) -> (
    mpsc::UnboundedSender<SignalingMessage>,
    mpsc::UnboundedReceiver<SignalingMessage>,
)
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (aus_tx, mut aus_rx) = mpsc::unbounded_channel::<SignalingMessage>();
    let (ein_tx, ein_rx) = mpsc::unbounded_channel::<SignalingMessage>();

    tokio::spawn(async move {
        let mut framed = Framed::new(stream, codec);
        loop {
            tokio::select! {
                frame = framed.next() => {
                    match frame {
                        Some(Ok(nachricht)) => {
                            tracing::trace!(gegenstelle = %gegenstelle, typ = ?nachricht.wire_type(), "Frame empfangen");
                            if ein_tx.send(nachricht).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(gegenstelle = %gegenstelle, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                        None => {
                            tracing::debug!(gegenstelle = %gegenstelle, "Verbindung von Gegenstelle getrennt");
                            break;
                        }
                    }
                }

                ausgehend = aus_rx.recv() => {
                    match ausgehend {
                        Some(nachricht) => {
                            if let Err(e) = framed.send(nachricht).await {
                                tracing::warn!(gegenstelle = %gegenstelle, fehler = %e, "Senden fehlgeschlagen");
                                break;
                            }
                        }
                        // Lokale Seite hat geschlossen
                        None => break,
                    }
                }
            }
        }
        tracing::trace!(gegenstelle = %gegenstelle, "Stream-Bruecke beendet");
    });

    (aus_tx, ein_rx)
}
