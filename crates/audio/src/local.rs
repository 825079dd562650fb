//! LocalMediaController – exklusiver Besitzer der Mikrofon-Aufnahme
//!
//! Auf jedes erfolgreiche `acquire()` folgt genau ein `release()`.
//! Mute schaltet nur das Signal der Spur ab; die Spur bleibt an allen
//! Peer-Verbindungen haengen, es wird nie neu verhandelt.

use std::sync::Arc;

use crate::capture::{CaptureConstraints, CaptureDevice, LocalAudioTrack, SharedTrack};
use crate::error::{AudioError, AudioResult};

pub struct LocalMediaController {
    geraet: Arc<dyn CaptureDevice>,
    constraints: CaptureConstraints,
    spur: Option<Arc<dyn LocalAudioTrack>>,
    /// Mute-Wunsch, gilt auch fuer die naechste Aufnahme
    stumm: bool,
}

impl LocalMediaController {
    pub fn new(geraet: Arc<dyn CaptureDevice>) -> Self {
        Self {
            geraet,
            constraints: CaptureConstraints::sprache(),
            spur: None,
            stumm: false,
        }
    }

    /// Fordert das Mikrofon an
    ///
    /// # Fehler
    /// - `AudioError::BereitsAktiv` wenn bereits eine Aufnahme gehalten wird
    /// - `AudioError::PermissionDenied` wenn der Zugriff verweigert wird
    pub async fn acquire(&mut self) -> AudioResult<SharedTrack> {
        if self.spur.is_some() {
            return Err(AudioError::BereitsAktiv);
        }
        let spur = self.geraet.anfordern(&self.constraints).await?;
        spur.set_enabled(!self.stumm);
        tracing::info!(spur = %spur.id(), stumm = self.stumm, "Mikrofon angefordert");
        let geteilt = SharedTrack::neu(Arc::clone(&spur));
        self.spur = Some(spur);
        Ok(geteilt)
    }

    /// Gibt das Mikrofon frei (idempotent)
    ///
    /// Gibt `true` zurueck wenn eine Aufnahme beendet wurde.
    pub fn release(&mut self) -> bool {
        match self.spur.take() {
            Some(spur) => {
                spur.stop();
                tracing::info!(spur = %spur.id(), "Mikrofon freigegeben");
                true
            }
            None => false,
        }
    }

    pub fn mute(&mut self) {
        self.stumm_setzen(true);
    }

    pub fn unmute(&mut self) {
        self.stumm_setzen(false);
    }

    fn stumm_setzen(&mut self, stumm: bool) {
        self.stumm = stumm;
        if let Some(spur) = &self.spur {
            spur.set_enabled(!stumm);
        }
        tracing::debug!(stumm, "Mikrofon-Mute geaendert");
    }

    pub fn is_muted(&self) -> bool {
        self.stumm
    }

    pub fn is_acquired(&self) -> bool {
        self.spur.is_some()
    }

    /// Lesende Sicht auf die aktuelle Spur
    pub fn shared_track(&self) -> Option<SharedTrack> {
        self.spur.as_ref().map(|s| SharedTrack::neu(Arc::clone(s)))
    }
}

impl Drop for LocalMediaController {
    fn drop(&mut self) {
        self.release();
    }
}
