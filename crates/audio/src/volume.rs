//! Per-Teilnehmer Lautstaerke-Kontrolle
//!
//! Verwaltet die Lautstaerke pro Teilnehmer und den Deafen-Zustand.
//! Deafen wirkt wie ein Master-Mute: die effektive Lautstaerke ist 0,
//! die eingestellten Werte bleiben erhalten.

use huddle_core::types::ParticipantId;
use std::collections::HashMap;

/// Lautstaerke-Kontroller fuer die Wiedergabe
#[derive(Debug, Clone)]
pub struct VolumeController {
    /// Deafen (alle Wiedergaben stumm)
    deafened: bool,
    /// Per-Teilnehmer Lautstaerke (0.0..2.0, 1.0 = normal)
    participant_volumes: HashMap<ParticipantId, f32>,
}

impl VolumeController {
    pub fn new() -> Self {
        Self {
            deafened: false,
            participant_volumes: HashMap::new(),
        }
    }

    pub fn set_deafened(&mut self, deafened: bool) {
        self.deafened = deafened;
    }

    pub fn is_deafened(&self) -> bool {
        self.deafened
    }

    /// Setzt die Lautstaerke eines Teilnehmers (geclamped auf 0.0..2.0)
    pub fn set_participant_volume(&mut self, participant: ParticipantId, volume: f32) {
        self.participant_volumes
            .insert(participant, volume.clamp(0.0, 2.0));
    }

    /// Eingestellte Lautstaerke eines Teilnehmers (1.0 wenn unbekannt)
    pub fn participant_volume(&self, participant: &ParticipantId) -> f32 {
        *self.participant_volumes.get(participant).unwrap_or(&1.0)
    }

    /// Entfernt einen Teilnehmer (z.B. wenn er den Kanal verlaesst)
    pub fn remove_participant(&mut self, participant: &ParticipantId) {
        self.participant_volumes.remove(participant);
    }

    /// Lautstaerke, mit der tatsaechlich wiedergegeben wird
    pub fn effektive_lautstaerke(&self, participant: &ParticipantId) -> f32 {
        if self.deafened {
            0.0
        } else {
            self.participant_volume(participant)
        }
    }
}

impl Default for VolumeController {
    fn default() -> Self {
        Self::new()
    }
}
