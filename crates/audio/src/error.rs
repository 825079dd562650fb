//! Fehlertypen fuer Aufnahme und Wiedergabe

use huddle_core::HuddleError;
use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Schicht
#[derive(Debug, Error)]
pub enum AudioError {
    /// Benutzer oder Plattform verweigert den Mikrofon-Zugriff
    #[error("Mikrofon-Zugriff verweigert: {0}")]
    PermissionDenied(String),

    #[error("Audio-Geraet nicht gefunden: {0}")]
    GeraetNichtGefunden(String),

    /// `acquire()` ohne vorheriges `release()`
    #[error("Aufnahme ist bereits aktiv")]
    BereitsAktiv,

    #[error("Stream-Fehler: {0}")]
    StreamFehler(String),
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for HuddleError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::PermissionDenied(grund) => HuddleError::PermissionDenied(grund),
            andere => HuddleError::Internal(andere.to_string()),
        }
    }
}
