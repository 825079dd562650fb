//! In-Memory-Geraete fuer Tests und Headless-Betrieb
//!
//! - `SimMicrophone`: zaehlt aktive Aufnahmen, kann den Zugriff verweigern
//! - `SimOutput`: protokolliert Wiedergabe-Elemente und ihre Lautstaerke

use async_trait::async_trait;
use huddle_core::types::ParticipantId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::capture::{CaptureConstraints, CaptureDevice, LocalAudioTrack};
use crate::error::{AudioError, AudioResult};
use crate::playback::{AudioOutput, PlaybackHandle, RemoteAudioTrack};

// ---------------------------------------------------------------------------
// Mikrofon
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SimMicrophone {
    verweigert: AtomicBool,
    aktiv: Arc<AtomicUsize>,
    angefordert: AtomicUsize,
    letzte_constraints: Mutex<Option<CaptureConstraints>>,
}

impl SimMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// Laesst kuenftige Anforderungen mit `PermissionDenied` scheitern
    pub fn verweigern(&self, verweigert: bool) {
        self.verweigert.store(verweigert, Ordering::SeqCst);
    }

    /// Anzahl noch nicht gestoppter Aufnahmen
    pub fn aktive_aufnahmen(&self) -> usize {
        self.aktiv.load(Ordering::SeqCst)
    }

    /// Anzahl erfolgreicher Anforderungen insgesamt
    pub fn anforderungen(&self) -> usize {
        self.angefordert.load(Ordering::SeqCst)
    }

    pub fn letzte_constraints(&self) -> Option<CaptureConstraints> {
        *self.letzte_constraints.lock()
    }
}

#[async_trait]
impl CaptureDevice for SimMicrophone {
    async fn anfordern(
        &self,
        constraints: &CaptureConstraints,
    ) -> AudioResult<Arc<dyn LocalAudioTrack>> {
        if self.verweigert.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied(
                "vom Benutzer abgelehnt".into(),
            ));
        }
        *self.letzte_constraints.lock() = Some(*constraints);
        let nr = self.angefordert.fetch_add(1, Ordering::SeqCst) + 1;
        self.aktiv.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimTrack {
            id: format!("mikro-{}", nr),
            aktiv: AtomicBool::new(true),
            beendet: AtomicBool::new(false),
            zaehler: Arc::clone(&self.aktiv),
        }))
    }
}

#[derive(Debug)]
struct SimTrack {
    id: String,
    aktiv: AtomicBool,
    beendet: AtomicBool,
    zaehler: Arc<AtomicUsize>,
}

impl LocalAudioTrack for SimTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_enabled(&self, enabled: bool) {
        self.aktiv.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.aktiv.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if !self.beendet.swap(true, Ordering::SeqCst) {
            self.zaehler.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn ist_beendet(&self) -> bool {
        self.beendet.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Entfernte Spur
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimRemoteTrack {
    id: String,
}

impl SimRemoteTrack {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl RemoteAudioTrack for SimRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }
}

// ---------------------------------------------------------------------------
// Ausgabe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SimWiedergabe {
    spur: String,
    lautstaerke: f32,
    spielt: bool,
    erstellt: usize,
}

#[derive(Default)]
pub struct SimOutput {
    wiedergaben: Arc<Mutex<HashMap<ParticipantId, SimWiedergabe>>>,
}

impl SimOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lautstaerke(&self, peer: &ParticipantId) -> Option<f32> {
        self.wiedergaben.lock().get(peer).map(|w| w.lautstaerke)
    }

    pub fn spielt(&self, peer: &ParticipantId) -> bool {
        self.wiedergaben.lock().get(peer).is_some_and(|w| w.spielt)
    }

    pub fn spur(&self, peer: &ParticipantId) -> Option<String> {
        self.wiedergaben.lock().get(peer).map(|w| w.spur.clone())
    }

    /// Wie oft fuer diesen Peer ein Wiedergabe-Element erstellt wurde
    pub fn erstellt(&self, peer: &ParticipantId) -> usize {
        self.wiedergaben.lock().get(peer).map_or(0, |w| w.erstellt)
    }

    /// Anzahl laufender Wiedergaben
    pub fn aktive(&self) -> usize {
        self.wiedergaben.lock().values().filter(|w| w.spielt).count()
    }
}

impl AudioOutput for SimOutput {
    fn erstellen(
        &self,
        peer: &ParticipantId,
        spur: Arc<dyn RemoteAudioTrack>,
    ) -> AudioResult<Box<dyn PlaybackHandle>> {
        {
            let mut w = self.wiedergaben.lock();
            let eintrag = w.entry(peer.clone()).or_default();
            eintrag.spur = spur.id().to_string();
            eintrag.spielt = false;
            eintrag.erstellt += 1;
        }
        Ok(Box::new(SimHandle {
            peer: peer.clone(),
            wiedergaben: Arc::clone(&self.wiedergaben),
        }))
    }
}

struct SimHandle {
    peer: ParticipantId,
    wiedergaben: Arc<Mutex<HashMap<ParticipantId, SimWiedergabe>>>,
}

impl SimHandle {
    fn aendern(&self, f: impl FnOnce(&mut SimWiedergabe)) {
        if let Some(w) = self.wiedergaben.lock().get_mut(&self.peer) {
            f(w);
        }
    }
}

impl PlaybackHandle for SimHandle {
    fn play(&mut self) -> AudioResult<()> {
        self.aendern(|w| w.spielt = true);
        Ok(())
    }

    fn stop(&mut self) {
        self.aendern(|w| w.spielt = false);
    }

    fn set_volume(&mut self, volume: f32) {
        self.aendern(|w| w.lautstaerke = volume);
    }

    fn spur_ersetzen(&mut self, spur: Arc<dyn RemoteAudioTrack>) {
        let id = spur.id().to_string();
        self.aendern(|w| w.spur = id);
    }
}
