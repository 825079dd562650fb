//! Fehlertypen fuer Signaling-Link und Relay

use huddle_core::HuddleError;
use thiserror::Error;

/// Fehlertyp fuer Signaling-Link, Transport und Relay
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Verbindung zum Relay konnte nicht hergestellt werden
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    /// Verbindung wurde getrennt
    #[error("Verbindung getrennt")]
    VerbindungGetrennt,

    /// Protokollfehler (ungueltiges Frame, unerwartete Nachricht)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Senden fehlgeschlagen (Channel geschlossen)
    #[error("Senden fehlgeschlagen")]
    SendFehler,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen Verbindungsfehler
    pub fn verbindung(msg: impl Into<String>) -> Self {
        Self::Verbindung(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;

impl From<SignalingError> for HuddleError {
    fn from(e: SignalingError) -> Self {
        match e {
            SignalingError::VerbindungGetrennt => HuddleError::RelayDisconnected,
            SignalingError::Intern(msg) => HuddleError::Internal(msg),
            andere => HuddleError::ConnectionError(andere.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oeffnungsfehler_wird_zu_connection_error() {
        let e: HuddleError = SignalingError::verbindung("Relay nicht erreichbar").into();
        assert!(matches!(e, HuddleError::ConnectionError(_)));
        assert!(e.to_string().contains("Relay nicht erreichbar"));

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let e: HuddleError = SignalingError::from(io).into();
        assert!(matches!(e, HuddleError::ConnectionError(_)));
    }

    #[test]
    fn trennung_wird_zu_relay_disconnected() {
        let e: HuddleError = SignalingError::VerbindungGetrennt.into();
        assert!(matches!(e, HuddleError::RelayDisconnected));
    }
}
