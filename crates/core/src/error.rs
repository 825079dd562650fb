//! Fehlertypen fuer Huddle
//!
//! Zentraler Fehler-Enum des Voice-Orchestrators. Untermodule definieren
//! eigene Fehler und konvertieren via `From` in diese Taxonomie.

use crate::types::ParticipantId;
use thiserror::Error;

/// Globaler Result-Alias fuer Huddle
pub type Result<T> = std::result::Result<T, HuddleError>;

/// Alle Fehlerzustaende des Voice-Orchestrators
#[derive(Debug, Error)]
pub enum HuddleError {
    // --- Beitritt (fatal fuer join) ---
    /// Mikrofon-Zugriff verweigert
    #[error("Mikrofon-Zugriff verweigert: {0}")]
    PermissionDenied(String),

    /// Signaling-Verbindung konnte nicht geoeffnet werden
    #[error("Verbindung zum Relay fehlgeschlagen: {0}")]
    ConnectionError(String),

    /// join() waehrend einer bestehenden Mitgliedschaft
    #[error("Bereits einem Kanal beigetreten: {0}")]
    AlreadyJoined(String),

    // --- Einzelne Peers (lokal behoben) ---
    /// Verbindungsaufbau zu einem Peer ueberschritt das Zeitlimit
    #[error("Zeitlimit beim Verbindungsaufbau zu {0}")]
    NegotiationTimeout(ParticipantId),

    /// Peer nach Wiederholungsversuch nicht erreichbar
    #[error("Teilnehmer nicht erreichbar: {0}")]
    ParticipantUnreachable(ParticipantId),

    // --- Mitgliedschaft ---
    /// Signaling-Verbindung waehrend der Mitgliedschaft verloren
    #[error("Verbindung zum Relay verloren")]
    RelayDisconnected,

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Configuration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Internal(String),
}

impl HuddleError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Gibt true zurueck wenn der Fehler die gesamte Mitgliedschaft betrifft
    ///
    /// Fehler einzelner Peers werden lokal behoben (Sitzung entfernen),
    /// Mitgliedschaft und alle anderen Sitzungen bleiben bestehen.
    pub fn ist_fatal(&self) -> bool {
        !matches!(
            self,
            Self::NegotiationTimeout(_) | Self::ParticipantUnreachable(_)
        )
    }
}
