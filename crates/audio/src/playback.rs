//! Wiedergabe entfernter Audiospuren
//!
//! Pro Peer-Sitzung gibt es hoechstens einen `RemoteAudioSink`. Er wird beim
//! ersten eintreffenden Audiostrom erstellt und beim Schliessen der Sitzung
//! zerstoert. Trifft nach einer Neuverhandlung eine neue Spur ein, wird sie
//! an den bestehenden Sink gehaengt.
//!
//! Deafen setzt nur die Lautstaerke aller Sinks auf 0; eingehendes Audio
//! laeuft weiter, Undeafen wirkt sofort.

use huddle_core::types::ParticipantId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::AudioResult;
use crate::volume::VolumeController;

// ---------------------------------------------------------------------------
// Plattform-Schnittstelle
// ---------------------------------------------------------------------------

/// Eingehende Audiospur eines Peers (von der Peer-Verbindung geliefert)
pub trait RemoteAudioTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
}

/// Ein Wiedergabe-Element der Plattform (play/stop/set-volume)
pub trait PlaybackHandle: Send {
    fn play(&mut self) -> AudioResult<()>;
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    /// Haengt eine neue Spur an das bestehende Element
    fn spur_ersetzen(&mut self, spur: Arc<dyn RemoteAudioTrack>);
}

/// Audio-Ausgabe der Plattform
pub trait AudioOutput: Send + Sync {
    fn erstellen(
        &self,
        peer: &ParticipantId,
        spur: Arc<dyn RemoteAudioTrack>,
    ) -> AudioResult<Box<dyn PlaybackHandle>>;
}

// ---------------------------------------------------------------------------
// RemoteAudioSink
// ---------------------------------------------------------------------------

/// Wiedergabe eines einzelnen Peers
pub struct RemoteAudioSink {
    peer: ParticipantId,
    handle: Box<dyn PlaybackHandle>,
    spur_id: String,
    lautstaerke: f32,
    gestoppt: bool,
}

impl RemoteAudioSink {
    /// Erstellt das Wiedergabe-Element und startet die Wiedergabe
    pub fn neu(
        ausgabe: &dyn AudioOutput,
        peer: ParticipantId,
        spur: Arc<dyn RemoteAudioTrack>,
        lautstaerke: f32,
    ) -> AudioResult<Self> {
        let spur_id = spur.id().to_string();
        let mut handle = ausgabe.erstellen(&peer, spur)?;
        handle.set_volume(lautstaerke);
        handle.play()?;
        Ok(Self {
            peer,
            handle,
            spur_id,
            lautstaerke,
            gestoppt: false,
        })
    }

    pub fn peer(&self) -> &ParticipantId {
        &self.peer
    }

    pub fn spur_id(&self) -> &str {
        &self.spur_id
    }

    /// Haengt eine neue Spur an (nach Neuverhandlung)
    pub fn spur_anhaengen(&mut self, spur: Arc<dyn RemoteAudioTrack>) {
        if spur.id() == self.spur_id {
            return;
        }
        self.spur_id = spur.id().to_string();
        self.handle.spur_ersetzen(spur);
    }

    pub fn set_volume(&mut self, lautstaerke: f32) {
        self.lautstaerke = lautstaerke;
        self.handle.set_volume(lautstaerke);
    }

    pub fn volume(&self) -> f32 {
        self.lautstaerke
    }

    /// Stoppt die Wiedergabe (idempotent)
    pub fn stop(&mut self) {
        if !self.gestoppt {
            self.gestoppt = true;
            self.handle.stop();
        }
    }
}

impl Drop for RemoteAudioSink {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// SinkSet
// ---------------------------------------------------------------------------

/// Alle Sinks einer Mitgliedschaft plus Lautstaerke-Einstellungen
pub struct SinkSet {
    ausgabe: Arc<dyn AudioOutput>,
    sinks: HashMap<ParticipantId, RemoteAudioSink>,
    lautstaerke: VolumeController,
}

impl SinkSet {
    pub fn new(ausgabe: Arc<dyn AudioOutput>) -> Self {
        Self {
            ausgabe,
            sinks: HashMap::new(),
            lautstaerke: VolumeController::new(),
        }
    }

    /// Verarbeitet eine eingehende Spur eines Peers
    ///
    /// Erstellt beim ersten Mal den Sink, danach wird die Spur angehaengt.
    pub fn spur_empfangen(
        &mut self,
        peer: &ParticipantId,
        spur: Arc<dyn RemoteAudioTrack>,
    ) -> AudioResult<()> {
        if let Some(sink) = self.sinks.get_mut(peer) {
            tracing::debug!(participant = %peer, spur = %spur.id(), "Neue Spur an bestehenden Sink gehaengt");
            sink.spur_anhaengen(spur);
            return Ok(());
        }
        let sink = RemoteAudioSink::neu(
            self.ausgabe.as_ref(),
            peer.clone(),
            spur,
            self.lautstaerke.effektive_lautstaerke(peer),
        )?;
        tracing::debug!(participant = %peer, spur = %sink.spur_id(), "Wiedergabe gestartet");
        self.sinks.insert(peer.clone(), sink);
        Ok(())
    }

    /// Zerstoert den Sink eines Peers
    pub fn entfernen(&mut self, peer: &ParticipantId) -> bool {
        self.sinks.remove(peer).is_some()
    }

    pub fn alle_entfernen(&mut self) {
        self.sinks.clear();
    }

    pub fn deafen(&mut self) {
        self.deafened_setzen(true);
    }

    pub fn undeafen(&mut self) {
        self.deafened_setzen(false);
    }

    fn deafened_setzen(&mut self, deafened: bool) {
        self.lautstaerke.set_deafened(deafened);
        self.lautstaerken_anwenden();
    }

    pub fn is_deafened(&self) -> bool {
        self.lautstaerke.is_deafened()
    }

    /// Setzt die Lautstaerke eines Teilnehmers (wirkt erst nach Undeafen hoerbar)
    pub fn set_participant_volume(&mut self, peer: ParticipantId, lautstaerke: f32) {
        self.lautstaerke.set_participant_volume(peer.clone(), lautstaerke);
        let effektiv = self.lautstaerke.effektive_lautstaerke(&peer);
        if let Some(sink) = self.sinks.get_mut(&peer) {
            sink.set_volume(effektiv);
        }
    }

    /// Vergisst die Lautstaerke-Einstellung eines Teilnehmers
    pub fn teilnehmer_vergessen(&mut self, peer: &ParticipantId) {
        self.lautstaerke.remove_participant(peer);
    }

    fn lautstaerken_anwenden(&mut self) {
        for (peer, sink) in self.sinks.iter_mut() {
            sink.set_volume(self.lautstaerke.effektive_lautstaerke(peer));
        }
    }

    pub fn hat_sink(&self, peer: &ParticipantId) -> bool {
        self.sinks.contains_key(peer)
    }

    pub fn anzahl(&self) -> usize {
        self.sinks.len()
    }
}
