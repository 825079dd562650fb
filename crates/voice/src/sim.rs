//! Simuliertes Peer-Netz fuer Tests und Headless-Betrieb
//!
//! `SimNetwork` verbindet die `SimPeerConnection`s aller Teilnehmer eines
//! Prozesses. Eine Verbindung meldet `Connected`, sobald lokale und
//! entfernte Beschreibung gesetzt sind und mindestens ein ICE-Kandidat
//! angewendet wurde. Wie ein echter Stack lehnt sie Kandidaten vor der
//! Remote-Beschreibung ab.
//!
//! Fehlerinjektion: `blockieren` verhindert den Verbindungsaufbau eines
//! Paares (Zeitlimit greift), `trennen` laesst bestehende Verbindungen mit
//! `Failed` abbrechen (`einseitig_trennen` nur auf einer Seite),
//! `fabrik_sperren` laesst das Erstellen scheitern.

use async_trait::async_trait;
use huddle_audio::sim::SimRemoteTrack;
use huddle_audio::SharedTrack;
use huddle_core::types::ParticipantId;
use huddle_protocol::{IceCandidate, SessionDescription};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use crate::peer::{PeerConnection, PeerConnectionFactory, PeerError, PeerEventSender, TransportState};

type Paar = (ParticipantId, ParticipantId);

fn ungeordnet(a: &ParticipantId, b: &ParticipantId) -> Paar {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

// ---------------------------------------------------------------------------
// Netz
// ---------------------------------------------------------------------------

#[derive(Default)]
struct NetzZustand {
    blockiert: HashSet<Paar>,
    gesperrt: HashSet<ParticipantId>,
    /// (lokal, peer) -> alle je erstellten Verbindungen
    verbindungen: HashMap<Paar, Vec<Weak<SimPeerConnection>>>,
    erstellt: HashMap<Paar, usize>,
    angewendet: HashMap<Paar, Vec<IceCandidate>>,
    naechste_nr: u64,
}

/// Gemeinsames In-Memory-Netz aller simulierten Peer-Verbindungen
#[derive(Clone, Default)]
pub struct SimNetwork {
    inner: Arc<Mutex<NetzZustand>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fabrik fuer die Verbindungen eines Teilnehmers
    pub fn fabrik(&self, lokal: impl Into<ParticipantId>) -> SimPeerFactory {
        SimPeerFactory {
            lokal: lokal.into(),
            netz: self.clone(),
        }
    }

    /// Verhindert kuenftige Verbindungen zwischen `a` und `b`
    pub fn blockieren(&self, a: &ParticipantId, b: &ParticipantId) {
        self.inner.lock().blockiert.insert(ungeordnet(a, b));
    }

    pub fn freigeben(&self, a: &ParticipantId, b: &ParticipantId) {
        self.inner.lock().blockiert.remove(&ungeordnet(a, b));
    }

    fn ist_blockiert(&self, a: &ParticipantId, b: &ParticipantId) -> bool {
        self.inner.lock().blockiert.contains(&ungeordnet(a, b))
    }

    /// Laesst `erstellen` fuer den Teilnehmer scheitern
    pub fn fabrik_sperren(&self, lokal: &ParticipantId, gesperrt: bool) {
        let mut netz = self.inner.lock();
        if gesperrt {
            netz.gesperrt.insert(lokal.clone());
        } else {
            netz.gesperrt.remove(lokal);
        }
    }

    /// Bricht alle bestehenden Verbindungen zwischen `a` und `b` mit `Failed` ab
    pub fn trennen(&self, a: &ParticipantId, b: &ParticipantId) -> usize {
        self.einseitig_trennen(a, b) + self.einseitig_trennen(b, a)
    }

    /// Wie `trennen`, aber nur die Verbindungen von `lokal` zu `peer`
    pub fn einseitig_trennen(&self, lokal: &ParticipantId, peer: &ParticipantId) -> usize {
        let betroffen: Vec<Arc<SimPeerConnection>> = {
            let netz = self.inner.lock();
            netz.verbindungen
                .get(&(lokal.clone(), peer.clone()))
                .into_iter()
                .flatten()
                .filter_map(Weak::upgrade)
                .collect()
        };
        betroffen.iter().filter(|v| v.abbrechen()).count()
    }

    /// Kandidaten, die `lokal` auf Verbindungen zu `peer` angewendet hat
    pub fn angewendete_kandidaten(&self, lokal: &ParticipantId, peer: &ParticipantId) -> Vec<IceCandidate> {
        self.inner
            .lock()
            .angewendet
            .get(&(lokal.clone(), peer.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Anzahl der von `lokal` zu `peer` erstellten Verbindungen
    pub fn verbindungen_erstellt(&self, lokal: &ParticipantId, peer: &ParticipantId) -> usize {
        self.inner
            .lock()
            .erstellt
            .get(&(lokal.clone(), peer.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Noch nicht geschlossene Verbindungen von `lokal`
    pub fn offene_verbindungen(&self, lokal: &ParticipantId) -> usize {
        let lebende: Vec<Arc<SimPeerConnection>> = {
            let netz = self.inner.lock();
            netz.verbindungen
                .iter()
                .filter(|((l, _), _)| l == lokal)
                .flat_map(|(_, v)| v.iter())
                .filter_map(Weak::upgrade)
                .collect()
        };
        lebende.iter().filter(|v| !v.ist_geschlossen()).count()
    }

    fn kandidat_protokollieren(&self, lokal: &ParticipantId, peer: &ParticipantId, kandidat: IceCandidate) {
        self.inner
            .lock()
            .angewendet
            .entry((lokal.clone(), peer.clone()))
            .or_default()
            .push(kandidat);
    }
}

// ---------------------------------------------------------------------------
// Fabrik
// ---------------------------------------------------------------------------

pub struct SimPeerFactory {
    lokal: ParticipantId,
    netz: SimNetwork,
}

impl PeerConnectionFactory for SimPeerFactory {
    fn erstellen(
        &self,
        peer: &ParticipantId,
        _ice_server_urls: &[String],
        lokale_spur: SharedTrack,
        ereignisse: PeerEventSender,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let mut netz = self.netz.inner.lock();
        if netz.gesperrt.contains(&self.lokal) {
            return Err(PeerError::Plattform("Verbindung kann nicht erstellt werden".into()));
        }
        netz.naechste_nr += 1;
        let verbindung = Arc::new(SimPeerConnection {
            lokal: self.lokal.clone(),
            peer: peer.clone(),
            nr: netz.naechste_nr,
            netz: self.netz.clone(),
            _lokale_spur: lokale_spur,
            ereignisse,
            zustand: Mutex::new(SimZustand::default()),
        });
        let paar = (self.lokal.clone(), peer.clone());
        netz.verbindungen
            .entry(paar.clone())
            .or_default()
            .push(Arc::downgrade(&verbindung));
        *netz.erstellt.entry(paar).or_default() += 1;
        Ok(verbindung)
    }
}

// ---------------------------------------------------------------------------
// Verbindung
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SimZustand {
    lokal_gesetzt: bool,
    remote_gesetzt: bool,
    kandidaten: usize,
    verbunden: bool,
    geschlossen: bool,
    pruefung_gemeldet: bool,
}

pub struct SimPeerConnection {
    lokal: ParticipantId,
    peer: ParticipantId,
    nr: u64,
    netz: SimNetwork,
    _lokale_spur: SharedTrack,
    ereignisse: PeerEventSender,
    zustand: Mutex<SimZustand>,
}

impl SimPeerConnection {
    fn offen(&self) -> Result<(), PeerError> {
        if self.zustand.lock().geschlossen {
            return Err(PeerError::Geschlossen);
        }
        Ok(())
    }

    fn ist_geschlossen(&self) -> bool {
        self.zustand.lock().geschlossen
    }

    fn kandidaten_sammeln(&self) {
        for komponente in 1..=2u16 {
            let mut k = IceCandidate::new(format!(
                "candidate:{} {} udp 2122260223 10.0.{}.{} {} typ host",
                self.nr,
                komponente,
                self.nr % 256,
                komponente,
                50_000 + komponente
            ));
            k.sdp_mid = Some("0".into());
            k.sdp_m_line_index = Some(0);
            self.ereignisse.kandidat(k);
        }
    }

    fn verbindung_pruefen(&self) {
        let mut z = self.zustand.lock();
        if z.verbunden || z.geschlossen || !z.lokal_gesetzt || !z.remote_gesetzt || z.kandidaten == 0 {
            return;
        }
        if !z.pruefung_gemeldet {
            z.pruefung_gemeldet = true;
            self.ereignisse.zustand(TransportState::Checking);
        }
        if self.netz.ist_blockiert(&self.lokal, &self.peer) {
            return;
        }
        z.verbunden = true;
        self.ereignisse.zustand(TransportState::Connected);
        self.ereignisse
            .entfernte_spur(Arc::new(SimRemoteTrack::new(format!("{}-audio-{}", self.peer, self.nr))));
    }

    /// Bricht eine bestehende Verbindung ab
    fn abbrechen(&self) -> bool {
        let mut z = self.zustand.lock();
        if !z.verbunden || z.geschlossen {
            return false;
        }
        z.verbunden = false;
        self.ereignisse.zustand(TransportState::Failed);
        true
    }
}

#[async_trait]
impl PeerConnection for SimPeerConnection {
    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.offen()?;
        Ok(SessionDescription::offer(format!(
            "v=0\r\no=sim {} 1 IN IP4 0.0.0.0\r\ns={}->{}\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            self.nr, self.lokal, self.peer
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.offen()?;
        if !self.zustand.lock().remote_gesetzt {
            return Err(PeerError::Beschreibung("Answer ohne Remote-Beschreibung".into()));
        }
        Ok(SessionDescription::answer(format!(
            "v=0\r\no=sim {} 1 IN IP4 0.0.0.0\r\ns={}->{}\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
            self.nr, self.lokal, self.peer
        )))
    }

    async fn set_local_description(&self, beschreibung: SessionDescription) -> Result<(), PeerError> {
        self.offen()?;
        if beschreibung.sdp.is_empty() {
            return Err(PeerError::Beschreibung("leere SDP".into()));
        }
        self.zustand.lock().lokal_gesetzt = true;
        self.kandidaten_sammeln();
        self.verbindung_pruefen();
        Ok(())
    }

    async fn set_remote_description(&self, beschreibung: SessionDescription) -> Result<(), PeerError> {
        self.offen()?;
        if beschreibung.sdp.is_empty() {
            return Err(PeerError::Beschreibung("leere SDP".into()));
        }
        self.zustand.lock().remote_gesetzt = true;
        self.verbindung_pruefen();
        Ok(())
    }

    async fn add_ice_candidate(&self, kandidat: IceCandidate) -> Result<(), PeerError> {
        self.offen()?;
        {
            let mut z = self.zustand.lock();
            if !z.remote_gesetzt {
                return Err(PeerError::KeineRemoteBeschreibung);
            }
            z.kandidaten += 1;
        }
        self.netz.kandidat_protokollieren(&self.lokal, &self.peer, kandidat);
        self.verbindung_pruefen();
        Ok(())
    }

    async fn close(&self) {
        let mut z = self.zustand.lock();
        if !z.geschlossen {
            z.geschlossen = true;
            z.verbunden = false;
        }
    }
}
