//! MembershipCoordinator – Beitritt, Roster und Verdrahtung
//!
//! ## Zustaende
//! ```text
//! Idle -> Joining -> Joined -> Leaving -> Idle
//!            |          |
//!            v          v  (Relay-Verbindung verloren)
//!          Idle    Disconnected -> Joining (erneuter join) / Idle (leave)
//! ```
//!
//! ## Aufbau
//! Der `MembershipCoordinator` ist ein klonbarer Handle auf einen einzigen
//! Orchestrator-Task. Der Task besitzt Mikrofon, Sinks, Signaling-Link,
//! Registry und Engine und verarbeitet alle Eingaenge seriell (siehe
//! `inbox`). Jede Mitgliedschaft hat eine Epoche und ein Abbruch-Token;
//! `leave()` bricht damit alle laufenden Verhandlungen, Timer und
//! Staffelungen ab.
//!
//! Nach aussen gibt es drei Kanaele: Anfragen (oneshot-Antwort), den
//! Status (`watch`) und nicht-fatale Ereignisse (`broadcast`).

use huddle_audio::{AudioOutput, CaptureDevice, LocalMediaController, SinkSet};
use huddle_core::types::{ChannelId, LocalIdentity, Participant, ParticipantId};
use huddle_core::{HuddleError, Result, VoiceEvent};
use huddle_protocol::{IceCandidate, SignalingMessage};
use huddle_signaling::{LinkEvent, RelayConnector, SignalingLink};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::config::VoiceConfig;
use crate::inbox::Eingang;
use crate::negotiation::{EngineKontext, Folge, NegotiationEngine};
use crate::peer::PeerConnectionFactory;
use crate::registry::PeerSessionRegistry;
use crate::session::SessionInfo;

/// Kapazitaet des Ereignis-Kanals
const EREIGNIS_KAPAZITAET: usize = 64;
/// Obergrenze fuer Kandidaten eines aufgegebenen Peers vor seinem naechsten Offer
const VORAB_KANDIDATEN_MAX: usize = 32;

// ---------------------------------------------------------------------------
// Oeffentliche Typen
// ---------------------------------------------------------------------------

/// Plattform-Faehigkeiten des Orchestrators
pub struct Plattform {
    pub connector: Arc<dyn RelayConnector>,
    pub mikrofon: Arc<dyn CaptureDevice>,
    pub ausgabe: Arc<dyn AudioOutput>,
    pub peer_fabrik: Arc<dyn PeerConnectionFactory>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Idle,
    Joining,
    Joined,
    Leaving,
    /// Relay-Verbindung verloren, alle Sitzungen abgebaut
    Disconnected,
}

/// Beobachtbarer Zustand der Mitgliedschaft
#[derive(Debug, Clone, PartialEq)]
pub struct MitgliedschaftStatus {
    pub zustand: MembershipState,
    pub channel_id: Option<ChannelId>,
    /// Roster inklusive lokalem Teilnehmer, nach ID sortiert
    pub teilnehmer: Vec<Participant>,
    pub sitzungen: usize,
    pub verbunden: usize,
    pub stumm: bool,
    pub taub: bool,
    /// ID der lokalen Aufnahme-Spur, solange sie gehalten wird
    pub lokale_spur: Option<String>,
}

impl MitgliedschaftStatus {
    fn leer() -> Self {
        Self {
            zustand: MembershipState::Idle,
            channel_id: None,
            teilnehmer: Vec::new(),
            sitzungen: 0,
            verbunden: 0,
            stumm: false,
            taub: false,
            lokale_spur: None,
        }
    }

    /// Anzahl der Teilnehmer im Kanal (inklusive lokal)
    pub fn user_count(&self) -> usize {
        self.teilnehmer.len()
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle auf den Orchestrator eines Clients
///
/// Alle Klone teilen denselben Orchestrator. Wird der letzte Klon
/// verworfen, verlaesst der Orchestrator den Kanal und beendet sich.
#[derive(Clone)]
pub struct MembershipCoordinator {
    inner: Arc<KoordinatorInner>,
}

struct KoordinatorInner {
    tx: mpsc::UnboundedSender<Eingang>,
    status_rx: watch::Receiver<MitgliedschaftStatus>,
    ereignisse: broadcast::Sender<VoiceEvent>,
    _stopp: DropGuard,
}

impl MembershipCoordinator {
    /// Startet den Orchestrator-Task (benoetigt eine laufende Tokio-Runtime)
    ///
    /// Eine ungueltige Konfiguration wird als `Configuration` abgelehnt.
    pub fn new(config: VoiceConfig, plattform: Plattform) -> Result<Self> {
        config.pruefen()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(MitgliedschaftStatus::leer());
        let (ereignisse, _) = broadcast::channel(EREIGNIS_KAPAZITAET);
        let stopp = CancellationToken::new();

        let orchestrator = Orchestrator {
            connector: plattform.connector,
            peer_fabrik: plattform.peer_fabrik,
            identitaet: None,
            zustand: MembershipState::Idle,
            epoch: 0,
            medien: LocalMediaController::new(plattform.mikrofon),
            umgebung: Umgebung {
                config,
                inbox: tx.clone(),
                sinks: SinkSet::new(plattform.ausgabe),
                ereignisse: ereignisse.clone(),
            },
            mitgliedschaft: None,
            status_tx,
        };
        tokio::spawn(orchestrator.laufen(rx, stopp.clone()));

        Ok(Self {
            inner: Arc::new(KoordinatorInner {
                tx,
                status_rx,
                ereignisse,
                _stopp: stopp.drop_guard(),
            }),
        })
    }

    async fn anfrage<T>(&self, eingang: impl FnOnce(oneshot::Sender<T>) -> Eingang) -> Result<T> {
        let (antwort_tx, antwort_rx) = oneshot::channel();
        self.inner
            .tx
            .send(eingang(antwort_tx))
            .map_err(|_| HuddleError::intern("Orchestrator beendet"))?;
        antwort_rx
            .await
            .map_err(|_| HuddleError::intern("Orchestrator beendet"))
    }

    /// Setzt die lokale Identitaet (vor `join()`)
    pub async fn identitaet_setzen(&self, identitaet: LocalIdentity) -> Result<()> {
        self.anfrage(|antwort| Eingang::IdentitaetSetzen { identitaet, antwort })
            .await?
    }

    /// Tritt einem Voice-Kanal bei
    ///
    /// # Fehler
    /// - `PermissionDenied` wenn das Mikrofon verweigert wird
    /// - `ConnectionError` wenn das Relay nicht erreichbar ist
    /// - `AlreadyJoined` waehrend einer bestehenden Mitgliedschaft
    /// - `Configuration` ohne lokale Identitaet
    pub async fn join(&self, channel_id: impl Into<ChannelId>) -> Result<()> {
        let channel_id = channel_id.into();
        self.anfrage(|antwort| Eingang::Beitreten { channel_id, antwort })
            .await?
    }

    /// Verlaesst den Kanal (idempotent, auch waehrend laufender Verhandlungen)
    pub async fn leave(&self) -> Result<()> {
        self.anfrage(|antwort| Eingang::Verlassen { antwort }).await
    }

    /// Schaltet das Mikrofon stumm (ohne Neuverhandlung)
    pub async fn mute(&self) -> Result<()> {
        self.anfrage(|antwort| Eingang::Stumm { stumm: true, antwort }).await
    }

    pub async fn unmute(&self) -> Result<()> {
        self.anfrage(|antwort| Eingang::Stumm { stumm: false, antwort }).await
    }

    /// Setzt die Wiedergabe aller Peers auf 0; Verbindungen bleiben bestehen
    pub async fn deafen(&self) -> Result<()> {
        self.anfrage(|antwort| Eingang::Taub { taub: true, antwort }).await
    }

    pub async fn undeafen(&self) -> Result<()> {
        self.anfrage(|antwort| Eingang::Taub { taub: false, antwort }).await
    }

    /// Lautstaerke eines Teilnehmers (0.0 bis 2.0)
    pub async fn set_participant_volume(&self, peer: impl Into<ParticipantId>, wert: f32) -> Result<()> {
        let peer = peer.into();
        self.anfrage(|antwort| Eingang::Lautstaerke { peer, wert, antwort })
            .await
    }

    /// Momentaufnahme aller Peer-Sitzungen
    pub async fn sessions(&self) -> Result<Vec<SessionInfo>> {
        self.anfrage(|antwort| Eingang::Sitzungen { antwort }).await
    }

    pub fn status(&self) -> MitgliedschaftStatus {
        self.inner.status_rx.borrow().clone()
    }

    pub fn status_abonnieren(&self) -> watch::Receiver<MitgliedschaftStatus> {
        self.inner.status_rx.clone()
    }

    pub fn ereignisse(&self) -> broadcast::Receiver<VoiceEvent> {
        self.inner.ereignisse.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator-Task
// ---------------------------------------------------------------------------

/// Was jede Mitgliedschaft vom Orchestrator mitbenutzt
struct Umgebung {
    config: VoiceConfig,
    inbox: mpsc::UnboundedSender<Eingang>,
    sinks: SinkSet,
    ereignisse: broadcast::Sender<VoiceEvent>,
}

impl Umgebung {
    fn melden(&self, ereignis: VoiceEvent) {
        // Ohne Abonnenten gehen Ereignisse verloren
        let _ = self.ereignisse.send(ereignis);
    }
}

struct Orchestrator {
    connector: Arc<dyn RelayConnector>,
    peer_fabrik: Arc<dyn PeerConnectionFactory>,
    identitaet: Option<LocalIdentity>,
    zustand: MembershipState,
    /// Wird bei jedem Beitritt und Abbau erhoeht
    epoch: u64,
    medien: LocalMediaController,
    umgebung: Umgebung,
    mitgliedschaft: Option<Mitgliedschaft>,
    status_tx: watch::Sender<MitgliedschaftStatus>,
}

impl Orchestrator {
    async fn laufen(mut self, mut rx: mpsc::UnboundedReceiver<Eingang>, stopp: CancellationToken) {
        loop {
            let eingang = tokio::select! {
                _ = stopp.cancelled() => break,
                eingang = rx.recv() => match eingang {
                    Some(e) => e,
                    None => break,
                },
            };
            self.verarbeiten(eingang).await;
            self.status_veroeffentlichen();
        }
        self.abbauen(true);
        tracing::debug!("Orchestrator beendet");
    }

    async fn verarbeiten(&mut self, eingang: Eingang) {
        match eingang {
            Eingang::Beitreten { channel_id, antwort } => {
                let ergebnis = self.beitreten(channel_id).await;
                self.status_veroeffentlichen();
                let _ = antwort.send(ergebnis);
            }
            Eingang::Verlassen { antwort } => {
                self.verlassen();
                self.status_veroeffentlichen();
                let _ = antwort.send(());
            }
            Eingang::IdentitaetSetzen { identitaet, antwort } => {
                let _ = antwort.send(self.identitaet_setzen(identitaet));
            }
            Eingang::Stumm { stumm, antwort } => {
                if stumm {
                    self.medien.mute();
                } else {
                    self.medien.unmute();
                }
                self.status_veroeffentlichen();
                let _ = antwort.send(());
            }
            Eingang::Taub { taub, antwort } => {
                if taub {
                    self.umgebung.sinks.deafen();
                } else {
                    self.umgebung.sinks.undeafen();
                }
                tracing::info!(taub, "Wiedergabe umgeschaltet");
                self.status_veroeffentlichen();
                let _ = antwort.send(());
            }
            Eingang::Lautstaerke { peer, wert, antwort } => {
                self.umgebung.sinks.set_participant_volume(peer, wert);
                let _ = antwort.send(());
            }
            Eingang::Sitzungen { antwort } => {
                let infos = self
                    .mitgliedschaft
                    .as_ref()
                    .map(|m| m.registry.snapshot())
                    .unwrap_or_default();
                let _ = antwort.send(infos);
            }

            Eingang::Link { epoch, ereignis } => {
                if epoch != self.epoch {
                    return;
                }
                match ereignis {
                    LinkEvent::Nachricht(nachricht) => {
                        if let Some(m) = self.mitgliedschaft.as_mut() {
                            m.nachricht(&mut self.umgebung, nachricht);
                        }
                    }
                    LinkEvent::Getrennt => self.relay_getrennt(),
                }
            }
            Eingang::Aufbauen { epoch, peer } => {
                if epoch != self.epoch {
                    return;
                }
                if let Some(m) = self.mitgliedschaft.as_mut() {
                    m.geplant_aufbauen(&mut self.umgebung, peer);
                }
            }
            Eingang::Schritt { herkunft, ergebnis } => {
                if herkunft.epoch != self.epoch {
                    return;
                }
                if let Some(m) = self.mitgliedschaft.as_mut() {
                    let folge = m.engine.schritt_ergebnis(&mut m.registry, herkunft, ergebnis);
                    m.folge(&mut self.umgebung, folge);
                }
            }
            Eingang::Peer { herkunft, ereignis } => {
                if herkunft.epoch != self.epoch {
                    return;
                }
                if let Some(m) = self.mitgliedschaft.as_mut() {
                    let folge = m.engine.peer_ereignis(&mut m.registry, herkunft, ereignis);
                    m.folge(&mut self.umgebung, folge);
                }
            }
            Eingang::Zeitlimit { herkunft, nr } => {
                if herkunft.epoch != self.epoch {
                    return;
                }
                if let Some(m) = self.mitgliedschaft.as_mut() {
                    let folge = m.engine.zeitlimit(&mut m.registry, herkunft, nr);
                    m.folge(&mut self.umgebung, folge);
                }
            }
        }
    }

    fn identitaet_setzen(&mut self, identitaet: LocalIdentity) -> Result<()> {
        if let Some(m) = &self.mitgliedschaft {
            return Err(HuddleError::AlreadyJoined(m.channel_id.to_string()));
        }
        tracing::debug!(participant = %identitaet.id, "Lokale Identitaet gesetzt");
        self.identitaet = Some(identitaet);
        Ok(())
    }

    async fn beitreten(&mut self, channel_id: ChannelId) -> Result<()> {
        if let Some(m) = &self.mitgliedschaft {
            return Err(HuddleError::AlreadyJoined(m.channel_id.to_string()));
        }
        let ich = self
            .identitaet
            .clone()
            .ok_or_else(|| HuddleError::Configuration("Keine lokale Identitaet gesetzt".into()))?;

        self.zustand = MembershipState::Joining;
        self.status_veroeffentlichen();
        tracing::info!(channel = %channel_id, participant = %ich.id, "Trete Kanal bei");

        let spur = match self.medien.acquire().await {
            Ok(spur) => spur,
            Err(e) => {
                self.zustand = MembershipState::Idle;
                tracing::warn!(channel = %channel_id, fehler = %e, "Beitritt abgebrochen: Mikrofon nicht verfuegbar");
                return Err(e.into());
            }
        };

        let mut link = match SignalingLink::open(
            self.connector.as_ref(),
            channel_id.clone(),
            ich.id.clone(),
            ich.display_name.clone(),
        )
        .await
        {
            Ok(link) => link,
            Err(e) => {
                self.medien.release();
                self.zustand = MembershipState::Idle;
                tracing::warn!(channel = %channel_id, fehler = %e, "Beitritt abgebrochen: Relay nicht erreichbar");
                return Err(HuddleError::ConnectionError(e.to_string()));
            }
        };

        self.epoch += 1;
        let epoch = self.epoch;
        let inbox = self.umgebung.inbox.clone();
        link.on_message(move |ereignis| {
            let _ = inbox.send(Eingang::Link { epoch, ereignis });
        });

        let abbruch = CancellationToken::new();
        let engine = NegotiationEngine::neu(EngineKontext {
            lokal: ich.id.clone(),
            channel_id: channel_id.clone(),
            epoch,
            fabrik: self.peer_fabrik.clone(),
            ice_server_urls: self.umgebung.config.ice_server_urls.clone(),
            zeitlimit: self.umgebung.config.verbindungs_timeout(),
            lokale_spur: spur,
            link: link.sender(),
            inbox: self.umgebung.inbox.clone(),
            abbruch: abbruch.clone(),
        });

        let mut roster = BTreeMap::new();
        roster.insert(ich.id.clone(), ich.als_teilnehmer());

        link.send(SignalingMessage::Join {
            channel_id: channel_id.clone(),
            participant: ich.als_teilnehmer(),
        });

        self.mitgliedschaft = Some(Mitgliedschaft {
            channel_id: channel_id.clone(),
            lokal: ich.id.clone(),
            epoch,
            link,
            roster,
            engine,
            registry: PeerSessionRegistry::new(ich.id),
            unerreichbar: HashSet::new(),
            vorab_kandidaten: HashMap::new(),
            geplant: HashSet::new(),
            abbruch,
        });
        self.zustand = MembershipState::Joined;
        self.umgebung.melden(VoiceEvent::KanalBeigetreten { channel_id });
        Ok(())
    }

    fn verlassen(&mut self) {
        match self.abbauen(true) {
            Some(channel_id) => {
                self.zustand = MembershipState::Idle;
                self.umgebung.melden(VoiceEvent::KanalVerlassen { channel_id });
            }
            None => {
                if self.zustand != MembershipState::Idle {
                    tracing::debug!(zustand = ?self.zustand, "leave ohne Mitgliedschaft");
                }
                self.zustand = MembershipState::Idle;
            }
        }
    }

    fn relay_getrennt(&mut self) {
        if let Some(channel_id) = self.abbauen(false) {
            tracing::warn!(channel = %channel_id, "{}", HuddleError::RelayDisconnected);
            self.zustand = MembershipState::Disconnected;
            self.umgebung.melden(VoiceEvent::RelayGetrennt { channel_id });
        }
    }

    /// Baut die Mitgliedschaft vollstaendig ab
    ///
    /// Bricht alle Verhandlungen ab, schliesst alle Sitzungen und Sinks,
    /// gibt das Mikrofon frei und schliesst den Link.
    fn abbauen(&mut self, leave_senden: bool) -> Option<ChannelId> {
        let Mitgliedschaft {
            channel_id,
            lokal,
            mut link,
            mut registry,
            abbruch,
            ..
        } = self.mitgliedschaft.take()?;

        self.zustand = MembershipState::Leaving;
        self.status_veroeffentlichen();

        if leave_senden {
            link.send(SignalingMessage::Leave {
                channel_id: channel_id.clone(),
                participant_id: lokal,
            });
        }
        abbruch.cancel();
        let sitzungen = registry.alle_schliessen();
        self.umgebung.sinks.alle_entfernen();
        self.medien.release();
        link.close();
        self.epoch += 1;

        tracing::info!(channel = %channel_id, sitzungen, "Kanal verlassen");
        Some(channel_id)
    }

    fn status_veroeffentlichen(&self) {
        let m = self.mitgliedschaft.as_ref();
        let neu = MitgliedschaftStatus {
            zustand: self.zustand,
            channel_id: m.map(|m| m.channel_id.clone()),
            teilnehmer: m.map(|m| m.roster.values().cloned().collect()).unwrap_or_default(),
            sitzungen: m.map(|m| m.registry.anzahl()).unwrap_or(0),
            verbunden: m.map(|m| m.registry.verbundene()).unwrap_or(0),
            stumm: self.medien.is_muted(),
            taub: self.umgebung.sinks.is_deafened(),
            lokale_spur: self.medien.shared_track().map(|s| s.id().to_string()),
        };
        self.status_tx.send_if_modified(|alt| {
            if *alt == neu {
                return false;
            }
            *alt = neu;
            true
        });
    }
}

// ---------------------------------------------------------------------------
// Mitgliedschaft
// ---------------------------------------------------------------------------

/// Zustand einer aktiven Kanal-Mitgliedschaft
struct Mitgliedschaft {
    channel_id: ChannelId,
    lokal: ParticipantId,
    epoch: u64,
    link: SignalingLink,
    /// Inklusive lokalem Teilnehmer
    roster: BTreeMap<ParticipantId, Participant>,
    engine: NegotiationEngine,
    registry: PeerSessionRegistry,
    /// Nach Neuaufbau aufgegebene Peers, werden beim Resync nicht neu angewaehlt
    unerreichbar: HashSet<ParticipantId>,
    /// Kandidaten aufgegebener Peers, bis deren naechstes Offer eintrifft
    vorab_kandidaten: HashMap<ParticipantId, VecDeque<IceCandidate>>,
    /// Peers mit laufender Staffelung
    geplant: HashSet<ParticipantId>,
    abbruch: CancellationToken,
}

impl Mitgliedschaft {
    fn nachricht(&mut self, u: &mut Umgebung, nachricht: SignalingMessage) {
        if *nachricht.channel_id() != self.channel_id {
            tracing::debug!(channel = %nachricht.channel_id(), "Nachricht fuer fremden Kanal ignoriert");
            return;
        }
        if let Some(ziel) = nachricht.ziel() {
            if *ziel != self.lokal {
                tracing::debug!(ziel = %ziel, "Signal fuer anderen Teilnehmer ignoriert");
                return;
            }
        }

        match nachricht {
            SignalingMessage::RosterSnapshot { participants, .. } => {
                self.roster_abgleichen(u, participants)
            }
            SignalingMessage::UserJoined { participant, .. } => {
                self.teilnehmer_beigetreten(u, participant)
            }
            SignalingMessage::UserLeft { participant_id, .. } => {
                self.teilnehmer_gegangen(u, &participant_id)
            }
            SignalingMessage::Offer { from, description, .. } => {
                if !self.roster.contains_key(&from) {
                    tracing::debug!(participant = %from, "Offer von unbekanntem Teilnehmer verworfen");
                    return;
                }
                self.unerreichbar.remove(&from);
                let folge = self.engine.angebot_empfangen(&mut self.registry, &from, description);
                let vorab = self.vorab_kandidaten.remove(&from).unwrap_or_default();
                if !vorab.is_empty() && self.registry.enthaelt(&from) {
                    tracing::debug!(participant = %from, anzahl = vorab.len(), "Vorab empfangene ICE-Kandidaten uebernommen");
                    for kandidat in vorab {
                        self.engine.kandidat_empfangen(&mut self.registry, &from, kandidat);
                    }
                }
                self.folge(u, folge);
            }
            SignalingMessage::Answer { from, description, .. } => {
                self.engine.antwort_empfangen(&mut self.registry, &from, description);
            }
            SignalingMessage::IceCandidate { from, candidate, .. } => {
                if !self.roster.contains_key(&from) {
                    tracing::debug!(participant = %from, "ICE-Kandidat ohne Sitzung verworfen");
                    return;
                }
                if self.unerreichbar.contains(&from) {
                    // Kann zu einem neuen Offer des Peers gehoeren
                    let puffer = self.vorab_kandidaten.entry(from.clone()).or_default();
                    if puffer.len() == VORAB_KANDIDATEN_MAX {
                        puffer.pop_front();
                    }
                    puffer.push_back(candidate);
                    tracing::trace!(participant = %from, "ICE-Kandidat bis zum naechsten Offer gepuffert");
                    return;
                }
                if self.engine.kandidat_empfangen(&mut self.registry, &from, candidate.clone()) {
                    return;
                }
                // Kandidat vor eigener Sitzung: Sitzung jetzt anlegen und puffern
                self.geplant.remove(&from);
                let folge = self.engine.aufbauen(&mut self.registry, &from);
                self.folge(u, folge);
                self.engine.kandidat_empfangen(&mut self.registry, &from, candidate);
            }
            SignalingMessage::Join { .. } | SignalingMessage::Leave { .. } => {
                tracing::debug!(typ = ?nachricht.wire_type(), "Unerwartete Nachricht vom Relay ignoriert");
            }
        }
    }

    /// Gleicht den Roster mit einem vollstaendigen Snapshot ab
    ///
    /// Fehlende Teilnehmer gelten als gegangen; neue und nicht verbundene
    /// werden (gestaffelt) angewaehlt.
    fn roster_abgleichen(&mut self, u: &mut Umgebung, teilnehmer: Vec<Participant>) {
        let snapshot: BTreeMap<ParticipantId, Participant> =
            teilnehmer.into_iter().map(|p| (p.id.clone(), p)).collect();

        let gegangen: Vec<ParticipantId> = self
            .roster
            .keys()
            .filter(|id| **id != self.lokal && !snapshot.contains_key(*id))
            .cloned()
            .collect();
        for id in gegangen {
            self.teilnehmer_gegangen(u, &id);
        }

        for (id, teilnehmer) in snapshot {
            if id == self.lokal {
                continue;
            }
            if self.roster.insert(id.clone(), teilnehmer.clone()).is_none() {
                tracing::info!(participant = %id, name = %teilnehmer.display_name, "Teilnehmer im Kanal");
                u.melden(VoiceEvent::TeilnehmerBeigetreten { participant: teilnehmer });
            }
            if !self.registry.enthaelt(&id) && !self.unerreichbar.contains(&id) {
                self.planen(u, id);
            }
        }
    }

    fn teilnehmer_beigetreten(&mut self, u: &mut Umgebung, teilnehmer: Participant) {
        let id = teilnehmer.id.clone();
        if id == self.lokal {
            return;
        }
        if self.roster.contains_key(&id) {
            // Erneuter Beitritt: alte Sitzung ist wertlos
            tracing::info!(participant = %id, "Teilnehmer erneut beigetreten");
            self.registry.schliessen(&id);
            u.sinks.entfernen(&id);
        } else {
            tracing::info!(participant = %id, name = %teilnehmer.display_name, "Teilnehmer beigetreten");
            u.melden(VoiceEvent::TeilnehmerBeigetreten {
                participant: teilnehmer.clone(),
            });
        }
        self.roster.insert(id.clone(), teilnehmer);
        self.unerreichbar.remove(&id);
        self.vorab_kandidaten.remove(&id);
        self.planen(u, id);
    }

    fn teilnehmer_gegangen(&mut self, u: &mut Umgebung, id: &ParticipantId) {
        if *id == self.lokal || self.roster.remove(id).is_none() {
            return;
        }
        let hatte_sitzung = self.registry.schliessen(id);
        u.sinks.entfernen(id);
        u.sinks.teilnehmer_vergessen(id);
        self.unerreichbar.remove(id);
        self.vorab_kandidaten.remove(id);
        self.geplant.remove(id);
        tracing::info!(participant = %id, hatte_sitzung, "Teilnehmer gegangen");
        u.melden(VoiceEvent::TeilnehmerGegangen {
            participant_id: id.clone(),
        });
    }

    /// Plant den Aufbau nach zufaelliger Staffelung
    fn planen(&mut self, u: &Umgebung, peer: ParticipantId) {
        if !self.geplant.insert(peer.clone()) {
            return;
        }
        let dauer = u.config.staffelung();
        let inbox = u.inbox.clone();
        let abbruch = self.abbruch.clone();
        let epoch = self.epoch;
        tracing::trace!(participant = %peer, verzoegerung_ms = dauer.as_millis() as u64, "Aufbau geplant");
        tokio::spawn(async move {
            tokio::select! {
                _ = abbruch.cancelled() => {}
                _ = tokio::time::sleep(dauer) => {
                    let _ = inbox.send(Eingang::Aufbauen { epoch, peer });
                }
            }
        });
    }

    fn geplant_aufbauen(&mut self, u: &mut Umgebung, peer: ParticipantId) {
        self.geplant.remove(&peer);
        if !self.roster.contains_key(&peer) || self.unerreichbar.contains(&peer) {
            return;
        }
        let folge = self.engine.aufbauen(&mut self.registry, &peer);
        self.folge(u, folge);
    }

    fn folge(&mut self, u: &mut Umgebung, folge: Option<Folge>) {
        match folge {
            None => {}
            Some(Folge::Verbunden(peer)) => {
                u.melden(VoiceEvent::PeerVerbunden { participant_id: peer });
            }
            Some(Folge::Unerreichbar(peer)) => {
                u.sinks.entfernen(&peer);
                self.unerreichbar.insert(peer.clone());
                u.melden(VoiceEvent::TeilnehmerUnerreichbar { participant_id: peer });
            }
            Some(Folge::Spur(peer, spur)) => {
                if let Err(e) = u.sinks.spur_empfangen(&peer, spur) {
                    tracing::warn!(participant = %peer, fehler = %e, "Wiedergabe konnte nicht gestartet werden");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimNetwork;
    use async_trait::async_trait;
    use huddle_audio::sim::{SimMicrophone, SimOutput};
    use huddle_signaling::{Relay, RelayKanal, SignalingError, SignalingResult};
    use std::time::Duration;

    struct AbgelehnterConnector;

    #[async_trait]
    impl RelayConnector for AbgelehnterConnector {
        async fn verbinden(&self) -> SignalingResult<RelayKanal> {
            Err(SignalingError::verbindung("Relay offline"))
        }
    }

    fn koordinator(
        connector: Arc<dyn RelayConnector>,
        mikrofon: Arc<SimMicrophone>,
        id: &str,
    ) -> MembershipCoordinator {
        let netz = SimNetwork::new();
        MembershipCoordinator::new(
            VoiceConfig::default(),
            Plattform {
                connector,
                mikrofon,
                ausgabe: Arc::new(SimOutput::new()),
                peer_fabrik: Arc::new(netz.fabrik(id)),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn ungueltige_konfiguration_wird_abgelehnt() {
        let relay = Relay::neu();
        let netz = SimNetwork::new();
        let config = VoiceConfig {
            verbindungs_timeout_ms: 0,
            ..VoiceConfig::default()
        };
        let e = MembershipCoordinator::new(
            config,
            Plattform {
                connector: Arc::new(relay.connector()),
                mikrofon: Arc::new(SimMicrophone::new()),
                ausgabe: Arc::new(SimOutput::new()),
                peer_fabrik: Arc::new(netz.fabrik("a")),
            },
        )
        .err()
        .unwrap();
        assert!(matches!(e, HuddleError::Configuration(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn kandidaten_eines_aufgegebenen_peers_gelten_fuer_sein_naechstes_offer() {
        let relay = Relay::neu();
        let netz = SimNetwork::new();
        let kanal = ChannelId::new("42");
        let a = ParticipantId::new("a");
        let b = ParticipantId::new("b");

        // "a" spricht nur Signaling und schweigt zunaechst
        let link_a = SignalingLink::open(&relay.connector(), kanal.clone(), a.clone(), "Anna")
            .await
            .unwrap();
        link_a.send(SignalingMessage::Join {
            channel_id: kanal.clone(),
            participant: Participant::new("a", "Anna"),
        });

        let k = MembershipCoordinator::new(
            VoiceConfig::default(),
            Plattform {
                connector: Arc::new(relay.connector()),
                mikrofon: Arc::new(SimMicrophone::new()),
                ausgabe: Arc::new(SimOutput::new()),
                peer_fabrik: Arc::new(netz.fabrik("b")),
            },
        )
        .unwrap();
        let mut ereignisse = k.ereignisse();
        k.identitaet_setzen(LocalIdentity::new("b", "Bert")).await.unwrap();
        k.join("42").await.unwrap();

        // Ohne Offer: Zeitlimit, ein Neuaufbau, dann aufgegeben
        tokio::time::timeout(Duration::from_secs(60), async {
            loop {
                if let Ok(VoiceEvent::TeilnehmerUnerreichbar { participant_id }) = ereignisse.recv().await {
                    if participant_id == a {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();

        for nr in 1..=2 {
            link_a.send(SignalingMessage::IceCandidate {
                channel_id: kanal.clone(),
                from: a.clone(),
                to: b.clone(),
                candidate: IceCandidate::new(format!("candidate:{} 1 udp 1 10.9.0.{} 4000 typ host", nr, nr)),
            });
        }
        link_a.send(SignalingMessage::Offer {
            channel_id: kanal.clone(),
            from: a.clone(),
            to: b.clone(),
            description: huddle_protocol::SessionDescription::offer("v=0 a"),
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(VoiceEvent::PeerVerbunden { participant_id }) = ereignisse.recv().await {
                    if participant_id == a {
                        break;
                    }
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(netz.angewendete_kandidaten(&b, &a).len(), 2);
    }

    #[tokio::test]
    async fn join_ohne_identitaet_ist_konfigurationsfehler() {
        let relay = Relay::neu();
        let k = koordinator(Arc::new(relay.connector()), Arc::new(SimMicrophone::new()), "a");
        let e = k.join("42").await.unwrap_err();
        assert!(matches!(e, HuddleError::Configuration(_)));
        assert_eq!(k.status().zustand, MembershipState::Idle);
    }

    #[tokio::test]
    async fn verweigertes_mikrofon_bricht_join_ab() {
        let relay = Relay::neu();
        let mikro = Arc::new(SimMicrophone::new());
        mikro.verweigern(true);
        let k = koordinator(Arc::new(relay.connector()), mikro.clone(), "a");
        k.identitaet_setzen(LocalIdentity::new("a", "Anna")).await.unwrap();

        let e = k.join("42").await.unwrap_err();
        assert!(matches!(e, HuddleError::PermissionDenied(_)));
        assert_eq!(k.status().zustand, MembershipState::Idle);
        assert_eq!(relay.verbindungen(), 0);
    }

    #[tokio::test]
    async fn relay_nicht_erreichbar_gibt_mikrofon_frei() {
        let mikro = Arc::new(SimMicrophone::new());
        let k = koordinator(Arc::new(AbgelehnterConnector), mikro.clone(), "a");
        k.identitaet_setzen(LocalIdentity::new("a", "Anna")).await.unwrap();

        let e = k.join("42").await.unwrap_err();
        assert!(matches!(e, HuddleError::ConnectionError(_)));
        assert_eq!(mikro.aktive_aufnahmen(), 0);
        assert_eq!(k.status().zustand, MembershipState::Idle);
    }

    #[tokio::test]
    async fn zweiter_join_wird_abgelehnt() {
        let relay = Relay::neu();
        let k = koordinator(Arc::new(relay.connector()), Arc::new(SimMicrophone::new()), "a");
        k.identitaet_setzen(LocalIdentity::new("a", "Anna")).await.unwrap();

        k.join("42").await.unwrap();
        let e = k.join("43").await.unwrap_err();
        assert!(matches!(e, HuddleError::AlreadyJoined(_)));
        assert!(matches!(
            k.identitaet_setzen(LocalIdentity::new("x", "X")).await,
            Err(HuddleError::AlreadyJoined(_))
        ));
    }

    #[tokio::test]
    async fn join_und_leave_allein() {
        let relay = Relay::neu();
        let mikro = Arc::new(SimMicrophone::new());
        let k = koordinator(Arc::new(relay.connector()), mikro.clone(), "a");
        let mut ereignisse = k.ereignisse();
        k.identitaet_setzen(LocalIdentity::new("a", "Anna")).await.unwrap();

        k.join("42").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = k.status();
        assert_eq!(status.zustand, MembershipState::Joined);
        assert_eq!(status.user_count(), 1);
        assert!(status.lokale_spur.is_some());
        assert_eq!(mikro.aktive_aufnahmen(), 1);
        assert_eq!(relay.roster(&ChannelId::new("42")).len(), 1);

        k.leave().await.unwrap();
        k.leave().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(k.status(), MitgliedschaftStatus::leer());
        assert_eq!(mikro.aktive_aufnahmen(), 0);
        assert!(relay.roster(&ChannelId::new("42")).is_empty());

        assert_eq!(
            ereignisse.recv().await.unwrap(),
            VoiceEvent::KanalBeigetreten { channel_id: ChannelId::new("42") }
        );
        assert_eq!(
            ereignisse.recv().await.unwrap(),
            VoiceEvent::KanalVerlassen { channel_id: ChannelId::new("42") }
        );
    }

    #[tokio::test]
    async fn stumm_vor_dem_beitritt_gilt_fuer_die_aufnahme() {
        let relay = Relay::neu();
        let k = koordinator(Arc::new(relay.connector()), Arc::new(SimMicrophone::new()), "a");
        k.identitaet_setzen(LocalIdentity::new("a", "Anna")).await.unwrap();

        k.mute().await.unwrap();
        k.join("42").await.unwrap();
        assert!(k.status().stumm);
        k.unmute().await.unwrap();
        assert!(!k.status().stumm);
    }

    #[tokio::test]
    async fn letzter_handle_verlaesst_den_kanal() {
        let relay = Relay::neu();
        let mikro = Arc::new(SimMicrophone::new());
        let k = koordinator(Arc::new(relay.connector()), mikro.clone(), "a");
        k.identitaet_setzen(LocalIdentity::new("a", "Anna")).await.unwrap();
        k.join("42").await.unwrap();

        let klon = k.clone();
        drop(k);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mikro.aktive_aufnahmen(), 1);

        drop(klon);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mikro.aktive_aufnahmen(), 0);
        assert!(relay.roster(&ChannelId::new("42")).is_empty());
    }
}
