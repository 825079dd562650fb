//! Mikrofon-Aufnahme – Plattform-Schnittstelle
//!
//! Die Plattform liefert eine `LocalAudioTrack`, die der
//! `LocalMediaController` exklusiv besitzt. Peer-Verbindungen erhalten nur
//! eine `SharedTrack` (lesender Zugriff, kein Mute, kein Stop).

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::error::AudioResult;

/// Feste Aufnahme-Einstellungen fuer Sprache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl CaptureConstraints {
    /// Echo-Unterdrueckung, Rauschunterdrueckung und AGC aktiv
    pub const fn sprache() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::sprache()
    }
}

/// Eine laufende Mikrofon-Aufnahme
pub trait LocalAudioTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Aktiviert/deaktiviert das Signal an der Quelle (Mute)
    fn set_enabled(&self, enabled: bool);

    fn is_enabled(&self) -> bool;

    /// Beendet die Aufnahme und gibt das Geraet frei
    fn stop(&self);

    fn ist_beendet(&self) -> bool;
}

/// Mikrofon der Plattform
#[async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Fordert eine Aufnahme mit den gegebenen Einstellungen an
    ///
    /// # Fehler
    /// `AudioError::PermissionDenied` wenn der Zugriff verweigert wird
    async fn anfordern(
        &self,
        constraints: &CaptureConstraints,
    ) -> AudioResult<Arc<dyn LocalAudioTrack>>;
}

/// Lesende Sicht auf die lokale Spur fuer Peer-Verbindungen
#[derive(Clone, Debug)]
pub struct SharedTrack(Arc<dyn LocalAudioTrack>);

impl SharedTrack {
    pub(crate) fn neu(spur: Arc<dyn LocalAudioTrack>) -> Self {
        Self(spur)
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub fn is_enabled(&self) -> bool {
        self.0.is_enabled()
    }

    pub fn ist_beendet(&self) -> bool {
        self.0.ist_beendet()
    }
}
