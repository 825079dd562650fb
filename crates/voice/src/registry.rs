//! PeerSessionRegistry – alle Peer-Sitzungen einer Mitgliedschaft
//!
//! Arena, indiziert nach Teilnehmer-ID. Hoechstens eine Sitzung pro
//! entferntem Teilnehmer, nie eine Sitzung zum lokalen Teilnehmer. Die
//! Registry lebt genau so lange wie die Mitgliedschaft und wird bei
//! `leave()` komplett geschlossen.

use huddle_core::types::ParticipantId;
use std::collections::BTreeMap;

use crate::session::{ConnectionState, PeerSession, SessionInfo};

pub struct PeerSessionRegistry {
    lokal: ParticipantId,
    /// Geordnet nach Teilnehmer-ID
    sitzungen: BTreeMap<ParticipantId, PeerSession>,
}

impl PeerSessionRegistry {
    pub fn new(lokal: ParticipantId) -> Self {
        Self {
            lokal,
            sitzungen: BTreeMap::new(),
        }
    }

    pub fn lokal(&self) -> &ParticipantId {
        &self.lokal
    }

    /// Fuegt eine Sitzung ein
    ///
    /// Lehnt Sitzungen zum lokalen Teilnehmer und Duplikate ab; die
    /// abgelehnte Sitzung wird geschlossen zurueckgegeben.
    pub fn einfuegen(&mut self, mut sitzung: PeerSession) -> Result<(), PeerSession> {
        let peer = sitzung.participant_id().clone();
        if peer == self.lokal || self.sitzungen.contains_key(&peer) {
            tracing::warn!(participant = %peer, "Sitzung abgelehnt (lokal oder doppelt)");
            sitzung.schliessen();
            return Err(sitzung);
        }
        self.sitzungen.insert(peer, sitzung);
        Ok(())
    }

    pub fn get(&self, peer: &ParticipantId) -> Option<&PeerSession> {
        self.sitzungen.get(peer)
    }

    pub fn get_mut(&mut self, peer: &ParticipantId) -> Option<&mut PeerSession> {
        self.sitzungen.get_mut(peer)
    }

    pub fn enthaelt(&self, peer: &ParticipantId) -> bool {
        self.sitzungen.contains_key(peer)
    }

    /// Schliesst und entfernt die Sitzung eines Peers
    pub fn schliessen(&mut self, peer: &ParticipantId) -> bool {
        match self.sitzungen.remove(peer) {
            Some(mut s) => {
                s.schliessen();
                tracing::debug!(participant = %peer, "Sitzung geschlossen");
                true
            }
            None => false,
        }
    }

    /// Schliesst alle Sitzungen
    pub fn alle_schliessen(&mut self) -> usize {
        let sitzungen = std::mem::take(&mut self.sitzungen);
        let anzahl = sitzungen.len();
        for (_, mut s) in sitzungen {
            s.schliessen();
        }
        anzahl
    }

    pub fn anzahl(&self) -> usize {
        self.sitzungen.len()
    }

    pub fn ist_leer(&self) -> bool {
        self.sitzungen.is_empty()
    }

    pub fn verbundene(&self) -> usize {
        self.sitzungen
            .values()
            .filter(|s| s.connection_state() == ConnectionState::Connected)
            .count()
    }

    /// Momentaufnahme aller Sitzungen, nach Teilnehmer-ID sortiert
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        self.sitzungen.values().map(|s| s.info()).collect()
    }
}

impl Drop for PeerSessionRegistry {
    fn drop(&mut self) {
        self.alle_schliessen();
    }
}
