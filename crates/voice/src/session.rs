//! PeerSession – Zustand der Verbindung zu einem entfernten Teilnehmer
//!
//! ## Verbindungszustand
//! ```text
//! New -> Connecting -> Connected
//!   |        |            |
//!   |        v            v
//!   +----> Failed <-- Disconnected
//!            |
//!            v  (ein Neuaufbau, dann entfernt)
//!          Closed
//! ```

use huddle_core::types::ParticipantId;
use huddle_protocol::IceCandidate;
use std::collections::VecDeque;

use crate::worker::{PeerBefehl, PeerWorker};

/// Rolle im Verbindungsaufbau
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    /// Die lexikografisch kleinere ID initiiert
    pub fn bestimmen(lokal: &ParticipantId, entfernt: &ParticipantId) -> Self {
        if lokal < entfernt {
            Role::Initiator
        } else {
            Role::Responder
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Stand des Offer/Answer-Austauschs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// Noch kein Offer (Responder wartet, Initiator vor dem Offer)
    Neu,
    /// Eigenes Offer in Arbeit oder gesendet, Answer ausstehend
    LokalesAngebot,
    /// Fremdes Offer wird angewendet, Answer in Arbeit
    EntferntesAngebot,
    /// Beide Beschreibungen ausgetauscht
    Stabil,
}

/// Momentaufnahme einer Sitzung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub participant_id: ParticipantId,
    pub role: Role,
    pub negotiation: NegotiationState,
    pub connection_state: ConnectionState,
    pub pending_candidates: usize,
    pub generation: u64,
}

pub struct PeerSession {
    participant_id: ParticipantId,
    pub(crate) role: Role,
    pub(crate) negotiation: NegotiationState,
    pending_candidates: VecDeque<IceCandidate>,
    /// Seit der letzten Remote-Beschreibung angewendete Kandidaten
    seit_remote: Vec<IceCandidate>,
    /// Eigene Kandidaten, zurueckgehalten bis Offer oder Answer gesendet ist
    ausgehende_kandidaten: VecDeque<IceCandidate>,
    beschreibung_gesendet: bool,
    pub(crate) connection_state: ConnectionState,
    pub(crate) remote_description_set: bool,
    generation: u64,
    /// Einziger Neuaufbau bereits verbraucht
    pub(crate) erneut_versucht: bool,
    /// Kennung des zuletzt gestellten Zeitlimits
    pub(crate) zeitlimit_nr: u64,
    worker: PeerWorker,
}

impl PeerSession {
    pub(crate) fn neu(
        participant_id: ParticipantId,
        role: Role,
        generation: u64,
        worker: PeerWorker,
    ) -> Self {
        Self {
            participant_id,
            role,
            negotiation: NegotiationState::Neu,
            pending_candidates: VecDeque::new(),
            seit_remote: Vec::new(),
            ausgehende_kandidaten: VecDeque::new(),
            beschreibung_gesendet: false,
            connection_state: ConnectionState::New,
            remote_description_set: false,
            generation,
            erneut_versucht: false,
            zeitlimit_nr: 0,
            worker,
        }
    }

    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn negotiation(&self) -> NegotiationState {
        self.negotiation
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub(crate) fn worker(&self) -> &PeerWorker {
        &self.worker
    }

    pub(crate) fn befehl(&self, befehl: PeerBefehl) {
        self.worker.senden(befehl);
    }

    /// Kandidat anwenden oder puffern, je nach Remote-Beschreibung
    pub(crate) fn kandidat(&mut self, kandidat: IceCandidate) {
        if self.remote_description_set {
            self.seit_remote.push(kandidat.clone());
            self.worker.senden(PeerBefehl::KandidatAnwenden(kandidat));
        } else {
            self.pending_candidates.push_back(kandidat);
        }
    }

    /// Remote-Beschreibung ist gesetzt: Puffer in Eingangsreihenfolge leeren
    pub(crate) fn remote_gesetzt(&mut self) -> usize {
        self.remote_description_set = true;
        self.seit_remote.clear();
        let anzahl = self.pending_candidates.len();
        while let Some(k) = self.pending_candidates.pop_front() {
            self.worker.senden(PeerBefehl::KandidatAnwenden(k));
        }
        anzahl
    }

    /// Eigener Kandidat: gibt ihn zum Senden zurueck oder haelt ihn zurueck
    ///
    /// Kandidaten gehen erst nach der eigenen Beschreibung auf den Weg, damit
    /// der Peer das Offer vor den zugehoerigen Kandidaten erhaelt.
    pub(crate) fn lokaler_kandidat(&mut self, kandidat: IceCandidate) -> Option<IceCandidate> {
        if self.beschreibung_gesendet {
            return Some(kandidat);
        }
        self.ausgehende_kandidaten.push_back(kandidat);
        None
    }

    /// Offer oder Answer ist gesendet: zurueckgehaltene Kandidaten freigeben
    pub(crate) fn beschreibung_versendet(&mut self) -> Vec<IceCandidate> {
        self.beschreibung_gesendet = true;
        self.ausgehende_kandidaten.drain(..).collect()
    }

    /// Ersetzt Verbindung und Worker (Neuaufbau), Verhandlungszustand von vorn
    pub(crate) fn neu_verbinden(&mut self, generation: u64, worker: PeerWorker) {
        self.verbindung_tauschen(generation, worker);
        self.seit_remote.clear();
        self.pending_candidates.clear();
    }

    /// Ersetzt die Verbindung fuer ein neues Offer des Peers
    ///
    /// Kandidaten seit der letzten Remote-Beschreibung und gepufferte
    /// Kandidaten koennen zum neuen Offer gehoeren und werden fuer die neue
    /// Verbindung erneut gepuffert.
    pub(crate) fn fuer_angebot_ersetzen(&mut self, generation: u64, worker: PeerWorker) {
        self.verbindung_tauschen(generation, worker);
        let mut behalten: VecDeque<IceCandidate> = std::mem::take(&mut self.seit_remote).into();
        behalten.append(&mut self.pending_candidates);
        self.pending_candidates = behalten;
    }

    fn verbindung_tauschen(&mut self, generation: u64, worker: PeerWorker) {
        // Alter Worker bricht ab und schliesst seine Verbindung
        self.worker.beenden();
        self.worker = worker;
        self.generation = generation;
        self.negotiation = NegotiationState::Neu;
        self.connection_state = ConnectionState::New;
        self.remote_description_set = false;
        self.ausgehende_kandidaten.clear();
        self.beschreibung_gesendet = false;
    }

    /// Bricht alle laufende Arbeit ab und verwirft gepufferte Kandidaten
    pub(crate) fn schliessen(&mut self) {
        self.worker.beenden();
        self.pending_candidates.clear();
        self.seit_remote.clear();
        self.ausgehende_kandidaten.clear();
        self.connection_state = ConnectionState::Closed;
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            participant_id: self.participant_id.clone(),
            role: self.role,
            negotiation: self.negotiation,
            connection_state: self.connection_state,
            pending_candidates: self.pending_candidates.len(),
            generation: self.generation,
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("participant_id", &self.participant_id)
            .field("role", &self.role)
            .field("negotiation", &self.negotiation)
            .field("connection_state", &self.connection_state)
            .field("generation", &self.generation)
            .finish()
    }
}
