//! Peer-Verbindung – Plattform-Schnittstelle
//!
//! Eine `PeerConnection` kapselt die Medienverbindung zu genau einem
//! entfernten Teilnehmer (WebRTC `RTCPeerConnection` o.ae.). Asynchrone
//! Rueckmeldungen der Plattform (eigene ICE-Kandidaten, Transportzustand,
//! eingehende Audiospur) laufen ueber den `PeerEventSender` zurueck in den
//! Orchestrator.

use async_trait::async_trait;
use huddle_audio::{RemoteAudioTrack, SharedTrack};
use huddle_core::types::ParticipantId;
use huddle_protocol::{IceCandidate, SessionDescription};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::inbox::{Eingang, Herkunft};

/// Fehler der Peer-Verbindung
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    #[error("Session-Beschreibung ungueltig: {0}")]
    Beschreibung(String),

    #[error("ICE-Kandidat vor Remote-Beschreibung")]
    KeineRemoteBeschreibung,

    #[error("ICE-Kandidat abgelehnt: {0}")]
    Kandidat(String),

    #[error("Verbindung geschlossen")]
    Geschlossen,

    #[error("Plattform-Fehler: {0}")]
    Plattform(String),
}

/// Transportzustand wie ihn die Plattform meldet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Medienverbindung zu einem einzelnen Peer
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, beschreibung: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, beschreibung: SessionDescription) -> Result<(), PeerError>;

    /// Darf erst nach `set_remote_description` aufgerufen werden
    async fn add_ice_candidate(&self, kandidat: IceCandidate) -> Result<(), PeerError>;

    async fn close(&self);
}

/// Erstellt Peer-Verbindungen
pub trait PeerConnectionFactory: Send + Sync {
    /// Erstellt eine Verbindung zu `peer`
    ///
    /// Die lokale Spur wird nur lesend angehaengt; Mute und Freigabe
    /// bleiben beim `LocalMediaController`.
    fn erstellen(
        &self,
        peer: &ParticipantId,
        ice_server_urls: &[String],
        lokale_spur: SharedTrack,
        ereignisse: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

// ---------------------------------------------------------------------------
// Ereignisse der Plattform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) enum PeerEreignis {
    Kandidat(IceCandidate),
    Transport(TransportState),
    Spur(Arc<dyn RemoteAudioTrack>),
}

/// Rueckkanal einer Peer-Verbindung in den Orchestrator
///
/// Ereignisse sind an Sitzung und Generation gebunden; nach einem
/// Neuaufbau oder dem Schliessen werden spaete Meldungen verworfen.
#[derive(Clone)]
pub struct PeerEventSender {
    herkunft: Herkunft,
    inbox: mpsc::UnboundedSender<Eingang>,
}

impl PeerEventSender {
    pub(crate) fn neu(herkunft: Herkunft, inbox: mpsc::UnboundedSender<Eingang>) -> Self {
        Self { herkunft, inbox }
    }

    pub fn peer(&self) -> &ParticipantId {
        &self.herkunft.peer
    }

    /// Lokal erzeugter ICE-Kandidat
    pub fn kandidat(&self, kandidat: IceCandidate) {
        self.senden(PeerEreignis::Kandidat(kandidat));
    }

    pub fn zustand(&self, zustand: TransportState) {
        self.senden(PeerEreignis::Transport(zustand));
    }

    /// Eingehende Audiospur des Peers
    pub fn entfernte_spur(&self, spur: Arc<dyn RemoteAudioTrack>) {
        self.senden(PeerEreignis::Spur(spur));
    }

    fn senden(&self, ereignis: PeerEreignis) {
        let _ = self.inbox.send(Eingang::Peer {
            herkunft: self.herkunft.clone(),
            ereignis,
        });
    }
}
