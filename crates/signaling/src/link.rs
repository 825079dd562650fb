//! SignalingLink – typisierte Verbindung zum Relay
//!
//! Duenne Huelle ueber einen `RelayKanal`:
//!
//! - `open` stellt die Verbindung her; Fehler werden synchron gemeldet
//! - `send` ist fire-and-forget, Fehler werden nur geloggt
//! - `on_message` liefert eingehende Nachrichten in Empfangsreihenfolge
//!   an einen Handler, danach genau einmal `LinkEvent::Getrennt` falls die
//!   Verbindung nicht lokal geschlossen wurde
//! - `close` schliesst die Verbindung, weitere Sendungen werden verworfen

use huddle_core::types::{ChannelId, Participant, ParticipantId};
use huddle_protocol::SignalingMessage;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SignalingResult;
use crate::transport::RelayConnector;

/// Ereignis an den Handler von `on_message`
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Nachricht(SignalingMessage),
    /// Verbindung zum Relay verloren (nicht nach `close`)
    Getrennt,
}

// ---------------------------------------------------------------------------
// LinkSender
// ---------------------------------------------------------------------------

/// Klonbarer Sende-Handle eines `SignalingLink`
///
/// Alle Klone teilen denselben Ausgangskanal; nach `close()` verwerfen sie
/// jede Nachricht.
#[derive(Clone, Debug)]
pub struct LinkSender {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<SignalingMessage>>>>,
}

impl LinkSender {
    /// Sendet eine Nachricht an das Relay (fire-and-forget)
    pub fn send(&self, nachricht: SignalingMessage) {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                tracing::trace!(typ = ?nachricht.wire_type(), "Signal gesendet");
                if tx.send(nachricht).is_err() {
                    tracing::debug!("Relay-Verbindung geschlossen – Nachricht verworfen");
                }
            }
            None => tracing::debug!("Link geschlossen – Nachricht verworfen"),
        }
    }

    /// True nach lokalem `close()`
    pub fn ist_geschlossen(&self) -> bool {
        self.tx.lock().is_none()
    }

    fn schliessen(&self) -> bool {
        self.tx.lock().take().is_some()
    }
}

// ---------------------------------------------------------------------------
// SignalingLink
// ---------------------------------------------------------------------------

/// Verbindung eines Teilnehmers zum Relay fuer einen Voice-Kanal
pub struct SignalingLink {
    channel_id: ChannelId,
    teilnehmer: Participant,
    sender: LinkSender,
    eingehend: Option<mpsc::UnboundedReceiver<SignalingMessage>>,
    weiterleitung: Option<JoinHandle<()>>,
}

impl SignalingLink {
    /// Oeffnet eine Verbindung zum Relay
    ///
    /// # Fehler
    /// `SignalingError::Verbindung` / `Io` wenn das Relay nicht erreichbar ist
    pub async fn open(
        connector: &dyn RelayConnector,
        channel_id: ChannelId,
        participant_id: ParticipantId,
        display_name: impl Into<String>,
    ) -> SignalingResult<Self> {
        let kanal = connector.verbinden().await?;
        tracing::debug!(channel = %channel_id, participant = %participant_id, "Signaling-Link geoeffnet");
        Ok(Self {
            channel_id,
            teilnehmer: Participant::new(participant_id, display_name),
            sender: LinkSender {
                tx: Arc::new(Mutex::new(Some(kanal.ausgehend))),
            },
            eingehend: Some(kanal.eingehend),
            weiterleitung: None,
        })
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    /// Lokaler Teilnehmer dieses Links
    pub fn teilnehmer(&self) -> &Participant {
        &self.teilnehmer
    }

    /// Sendet eine Nachricht an das Relay (fire-and-forget)
    pub fn send(&self, nachricht: SignalingMessage) {
        self.sender.send(nachricht);
    }

    /// Gibt einen klonbaren Sende-Handle zurueck
    pub fn sender(&self) -> LinkSender {
        self.sender.clone()
    }

    /// Registriert den Handler fuer eingehende Nachrichten
    ///
    /// Kann nur einmal aufgerufen werden; weitere Aufrufe werden ignoriert.
    pub fn on_message<F>(&mut self, mut handler: F)
    where
        F: FnMut(LinkEvent) + Send + 'static,
    {
        let Some(mut rx) = self.eingehend.take() else {
            tracing::warn!(channel = %self.channel_id, "on_message mehrfach aufgerufen – ignoriert");
            return;
        };
        let sender = self.sender.clone();
        let channel_id = self.channel_id.clone();

        self.weiterleitung = Some(tokio::spawn(async move {
            while let Some(nachricht) = rx.recv().await {
                handler(LinkEvent::Nachricht(nachricht));
            }
            if !sender.ist_geschlossen() {
                tracing::info!(channel = %channel_id, "Relay-Verbindung verloren");
                handler(LinkEvent::Getrennt);
            }
        }));
    }

    /// Schliesst die Verbindung (idempotent)
    pub fn close(&mut self) {
        if self.sender.schliessen() {
            tracing::debug!(channel = %self.channel_id, participant = %self.teilnehmer.id, "Signaling-Link geschlossen");
        }
        if let Some(handle) = self.weiterleitung.take() {
            handle.abort();
        }
        self.eingehend = None;
    }
}

impl Drop for SignalingLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
