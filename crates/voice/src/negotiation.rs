//! NegotiationEngine – Offer/Answer-Protokoll pro Peer
//!
//! ## Initiator-Regel
//! Die lexikografisch kleinere Teilnehmer-ID initiiert. Treffen trotzdem
//! zwei Offers aufeinander (Glare), verwirft die Seite mit der groesseren
//! ID ihr eigenes Offer und beantwortet das fremde; die kleinere ignoriert
//! das fremde Offer.
//!
//! ## ICE-Kandidaten
//! Eigene Kandidaten gehen erst nach dem eigenen Offer bzw. der eigenen
//! Answer an den Peer, danach sofort. Empfangene Kandidaten werden bis zur
//! Remote-Beschreibung gepuffert und danach in Eingangsreihenfolge
//! angewendet. Ersetzt ein neues Offer des Peers die Verbindung, werden die
//! seit der letzten Remote-Beschreibung empfangenen Kandidaten fuer die neue
//! Verbindung erneut gepuffert.
//!
//! ## Fehler und Zeitlimit
//! Jede Verbindung hat ein Zeitlimit fuer den Aufbau. Transportfehler oder
//! Zeitueberschreitung fuehren zu genau einem Neuaufbau mit denselben
//! Rollen; scheitert auch dieser, wird die Sitzung entfernt und der Peer
//! als unerreichbar gemeldet. Erreicht der Neuaufbau `Connected`, steht
//! fuer spaetere Ausfaelle wieder ein Neuaufbau zur Verfuegung.
//!
//! Die Engine arbeitet ausschliesslich im Orchestrator-Task. Alle
//! Plattform-Operationen laufen in den Peer-Workern; deren Ergebnisse
//! kommen mit Epoche und Generation zurueck, veraltete werden verworfen.

use huddle_audio::{RemoteAudioTrack, SharedTrack};
use huddle_core::types::{ChannelId, ParticipantId};
use huddle_core::HuddleError;
use huddle_protocol::{IceCandidate, SessionDescription, SignalingMessage};
use huddle_signaling::LinkSender;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::inbox::{Eingang, Herkunft};
use crate::peer::{PeerConnectionFactory, PeerError, PeerEreignis, PeerEventSender, TransportState};
use crate::registry::PeerSessionRegistry;
use crate::session::{ConnectionState, NegotiationState, PeerSession, Role};
use crate::worker::{PeerBefehl, PeerWorker, SchrittErgebnis};

/// Ergebnis eines Verhandlungsschritts, das die Mitgliedschaft betrifft
#[derive(Debug)]
pub(crate) enum Folge {
    Verbunden(ParticipantId),
    /// Sitzung nach Neuaufbau aufgegeben und entfernt
    Unerreichbar(ParticipantId),
    Spur(ParticipantId, Arc<dyn RemoteAudioTrack>),
}

pub(crate) struct NegotiationEngine {
    lokal: ParticipantId,
    channel_id: ChannelId,
    epoch: u64,
    fabrik: Arc<dyn PeerConnectionFactory>,
    ice_server_urls: Vec<String>,
    zeitlimit: Duration,
    lokale_spur: SharedTrack,
    link: LinkSender,
    inbox: mpsc::UnboundedSender<Eingang>,
    /// Token der Mitgliedschaft, Elternteil aller Sitzungs-Tokens
    abbruch: CancellationToken,
    naechste_generation: u64,
}

/// Parameter einer Engine (eine pro Mitgliedschaft)
pub(crate) struct EngineKontext {
    pub lokal: ParticipantId,
    pub channel_id: ChannelId,
    pub epoch: u64,
    pub fabrik: Arc<dyn PeerConnectionFactory>,
    pub ice_server_urls: Vec<String>,
    pub zeitlimit: Duration,
    pub lokale_spur: SharedTrack,
    pub link: LinkSender,
    pub inbox: mpsc::UnboundedSender<Eingang>,
    pub abbruch: CancellationToken,
}

impl NegotiationEngine {
    pub fn neu(kontext: EngineKontext) -> Self {
        Self {
            lokal: kontext.lokal,
            channel_id: kontext.channel_id,
            epoch: kontext.epoch,
            fabrik: kontext.fabrik,
            ice_server_urls: kontext.ice_server_urls,
            zeitlimit: kontext.zeitlimit,
            lokale_spur: kontext.lokale_spur,
            link: kontext.link,
            inbox: kontext.inbox,
            abbruch: kontext.abbruch,
            naechste_generation: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Sitzungen aufbauen
    // -----------------------------------------------------------------------

    /// Baut eine Sitzung zu `peer` auf, falls noch keine existiert
    ///
    /// Als Initiator wird sofort ein Offer erstellt, als Responder wartet
    /// die Sitzung auf das Offer des Peers.
    pub fn aufbauen(&mut self, reg: &mut PeerSessionRegistry, peer: &ParticipantId) -> Option<Folge> {
        if *peer == self.lokal || reg.enthaelt(peer) {
            return None;
        }
        let role = Role::bestimmen(&self.lokal, peer);
        let mut sitzung = match self.sitzung_erstellen(peer, role) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(participant = %peer, fehler = %e, "Peer-Verbindung konnte nicht erstellt werden");
                return Some(Folge::Unerreichbar(peer.clone()));
            }
        };
        tracing::debug!(participant = %peer, ?role, generation = sitzung.generation(), "Sitzung erstellt");
        if role == Role::Initiator {
            sitzung.negotiation = NegotiationState::LokalesAngebot;
            sitzung.befehl(PeerBefehl::AngebotErstellen);
        }
        // Lokal und Duplikate sind oben ausgeschlossen
        let _ = reg.einfuegen(sitzung);
        None
    }

    fn sitzung_erstellen(&mut self, peer: &ParticipantId, role: Role) -> Result<PeerSession, PeerError> {
        let (generation, worker) = self.verbindung_starten(peer)?;
        let mut sitzung = PeerSession::neu(peer.clone(), role, generation, worker);
        self.zeitlimit_stellen(&mut sitzung);
        Ok(sitzung)
    }

    /// Erstellt eine Plattform-Verbindung samt Worker mit neuer Generation
    fn verbindung_starten(&mut self, peer: &ParticipantId) -> Result<(u64, PeerWorker), PeerError> {
        self.naechste_generation += 1;
        let generation = self.naechste_generation;
        let herkunft = Herkunft {
            epoch: self.epoch,
            peer: peer.clone(),
            generation,
        };
        let ereignisse = PeerEventSender::neu(herkunft.clone(), self.inbox.clone());
        let verbindung = self.fabrik.erstellen(
            peer,
            &self.ice_server_urls,
            self.lokale_spur.clone(),
            ereignisse,
        )?;
        let worker = PeerWorker::starten(
            verbindung,
            herkunft,
            self.inbox.clone(),
            self.abbruch.child_token(),
        );
        Ok((generation, worker))
    }

    /// Stellt das Aufbau-Zeitlimit der aktuellen Verbindung (neu)
    fn zeitlimit_stellen(&self, sitzung: &mut PeerSession) {
        sitzung.zeitlimit_nr += 1;
        let nr = sitzung.zeitlimit_nr;
        let herkunft = Herkunft {
            epoch: self.epoch,
            peer: sitzung.participant_id().clone(),
            generation: sitzung.generation(),
        };
        let abbruch = sitzung.worker().abbruch().clone();
        let inbox = self.inbox.clone();
        let dauer = self.zeitlimit;
        tokio::spawn(async move {
            tokio::select! {
                _ = abbruch.cancelled() => {}
                _ = tokio::time::sleep(dauer) => {
                    let _ = inbox.send(Eingang::Zeitlimit { herkunft, nr });
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // Eingehende Signale
    // -----------------------------------------------------------------------

    /// Verarbeitet ein Offer von `from`
    pub fn angebot_empfangen(
        &mut self,
        reg: &mut PeerSessionRegistry,
        from: &ParticipantId,
        angebot: SessionDescription,
    ) -> Option<Folge> {
        let Some(sitzung) = reg.get_mut(from) else {
            let mut sitzung = match self.sitzung_erstellen(from, Role::Responder) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(participant = %from, fehler = %e, "Peer-Verbindung konnte nicht erstellt werden");
                    return Some(Folge::Unerreichbar(from.clone()));
                }
            };
            tracing::debug!(participant = %from, "Sitzung fuer eingehendes Offer erstellt");
            Self::angebot_anwenden(&mut sitzung, angebot);
            let _ = reg.einfuegen(sitzung);
            return None;
        };

        match sitzung.negotiation {
            NegotiationState::LokalesAngebot if self.lokal < *from => {
                tracing::debug!(participant = %from, "Glare: fremdes Offer ignoriert, eigenes bleibt");
                None
            }
            NegotiationState::Neu if !sitzung.remote_description_set => {
                Self::angebot_anwenden(sitzung, angebot);
                None
            }
            vorher => {
                // Eigenes Offer verloren oder neue Verhandlung des Peers:
                // Verbindung ersetzen, Neuaufbau-Versuch bleibt erhalten
                match self.verbindung_starten(from) {
                    Ok((generation, worker)) => {
                        tracing::debug!(participant = %from, ?vorher, generation, "Verbindung fuer fremdes Offer ersetzt");
                        sitzung.fuer_angebot_ersetzen(generation, worker);
                        self.zeitlimit_stellen(sitzung);
                        Self::angebot_anwenden(sitzung, angebot);
                        None
                    }
                    Err(e) => {
                        tracing::warn!(participant = %from, fehler = %e, "Peer-Verbindung konnte nicht ersetzt werden");
                        reg.schliessen(from);
                        Some(Folge::Unerreichbar(from.clone()))
                    }
                }
            }
        }
    }

    fn angebot_anwenden(sitzung: &mut PeerSession, angebot: SessionDescription) {
        sitzung.role = Role::Responder;
        sitzung.negotiation = NegotiationState::EntferntesAngebot;
        sitzung.befehl(PeerBefehl::AngebotBeantworten(angebot));
    }

    /// Verarbeitet die Answer von `from` auf das eigene Offer
    pub fn antwort_empfangen(
        &mut self,
        reg: &mut PeerSessionRegistry,
        from: &ParticipantId,
        antwort: SessionDescription,
    ) {
        let Some(sitzung) = reg.get_mut(from) else {
            tracing::debug!(participant = %from, "Answer ohne Sitzung verworfen");
            return;
        };
        if sitzung.role != Role::Initiator || sitzung.negotiation != NegotiationState::LokalesAngebot {
            tracing::debug!(
                participant = %from,
                negotiation = ?sitzung.negotiation,
                "Unerwartete Answer verworfen"
            );
            return;
        }
        sitzung.negotiation = NegotiationState::Stabil;
        sitzung.connection_state = ConnectionState::Connecting;
        sitzung.befehl(PeerBefehl::AntwortAnwenden(antwort));
    }

    /// Verarbeitet einen ICE-Kandidaten von `from`
    ///
    /// Gibt false zurueck wenn keine Sitzung existiert.
    pub fn kandidat_empfangen(
        &mut self,
        reg: &mut PeerSessionRegistry,
        from: &ParticipantId,
        kandidat: IceCandidate,
    ) -> bool {
        match reg.get_mut(from) {
            Some(sitzung) => {
                if !sitzung.remote_description_set {
                    tracing::trace!(participant = %from, "ICE-Kandidat gepuffert");
                }
                sitzung.kandidat(kandidat);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Rueckmeldungen von Worker, Plattform und Timer
    // -----------------------------------------------------------------------

    fn aktuelle_sitzung<'r>(
        &self,
        reg: &'r mut PeerSessionRegistry,
        herkunft: &Herkunft,
    ) -> Option<&'r mut PeerSession> {
        if herkunft.epoch != self.epoch {
            return None;
        }
        reg.get_mut(&herkunft.peer)
            .filter(|s| s.generation() == herkunft.generation)
    }

    pub fn schritt_ergebnis(
        &mut self,
        reg: &mut PeerSessionRegistry,
        herkunft: Herkunft,
        ergebnis: SchrittErgebnis,
    ) -> Option<Folge> {
        let Some(sitzung) = self.aktuelle_sitzung(reg, &herkunft) else {
            tracing::trace!(participant = %herkunft.peer, generation = herkunft.generation, "Veraltetes Schritt-Ergebnis verworfen");
            return None;
        };
        let peer = herkunft.peer;

        match ergebnis {
            SchrittErgebnis::AngebotBereit(angebot) => {
                if sitzung.negotiation == NegotiationState::LokalesAngebot {
                    tracing::debug!(participant = %peer, "Offer gesendet");
                    self.link.send(SignalingMessage::Offer {
                        channel_id: self.channel_id.clone(),
                        from: self.lokal.clone(),
                        to: peer.clone(),
                        description: angebot,
                    });
                    let zurueckgehalten = sitzung.beschreibung_versendet();
                    self.kandidaten_senden(&peer, zurueckgehalten);
                }
                None
            }
            SchrittErgebnis::RemoteGesetzt => {
                let angewendet = sitzung.remote_gesetzt();
                if angewendet > 0 {
                    tracing::debug!(participant = %peer, anzahl = angewendet, "Gepufferte ICE-Kandidaten angewendet");
                }
                None
            }
            SchrittErgebnis::AntwortBereit(antwort) => {
                if sitzung.negotiation == NegotiationState::EntferntesAngebot {
                    sitzung.negotiation = NegotiationState::Stabil;
                    sitzung.connection_state = ConnectionState::Connecting;
                    tracing::debug!(participant = %peer, "Answer gesendet");
                    self.link.send(SignalingMessage::Answer {
                        channel_id: self.channel_id.clone(),
                        from: self.lokal.clone(),
                        to: peer.clone(),
                        description: antwort,
                    });
                    let zurueckgehalten = sitzung.beschreibung_versendet();
                    self.kandidaten_senden(&peer, zurueckgehalten);
                }
                None
            }
            SchrittErgebnis::Fehlgeschlagen(e) => {
                tracing::warn!(participant = %peer, fehler = %e, "Verhandlungsschritt fehlgeschlagen");
                self.fehlschlag(reg, &peer)
            }
        }
    }

    pub fn peer_ereignis(
        &mut self,
        reg: &mut PeerSessionRegistry,
        herkunft: Herkunft,
        ereignis: PeerEreignis,
    ) -> Option<Folge> {
        let Some(sitzung) = self.aktuelle_sitzung(reg, &herkunft) else {
            tracing::trace!(participant = %herkunft.peer, generation = herkunft.generation, "Veraltetes Peer-Ereignis verworfen");
            return None;
        };
        let peer = herkunft.peer;

        match ereignis {
            PeerEreignis::Kandidat(kandidat) => {
                match sitzung.lokaler_kandidat(kandidat) {
                    Some(kandidat) => self.kandidaten_senden(&peer, vec![kandidat]),
                    None => tracing::trace!(participant = %peer, "Eigener ICE-Kandidat bis zur Beschreibung zurueckgehalten"),
                }
                None
            }
            PeerEreignis::Transport(TransportState::Checking) => {
                if sitzung.connection_state == ConnectionState::New {
                    sitzung.connection_state = ConnectionState::Connecting;
                }
                None
            }
            PeerEreignis::Transport(TransportState::Connected) => {
                if sitzung.connection_state == ConnectionState::Connected {
                    return None;
                }
                sitzung.connection_state = ConnectionState::Connected;
                if sitzung.erneut_versucht {
                    sitzung.erneut_versucht = false;
                    tracing::debug!(participant = %peer, generation = herkunft.generation, "Neuaufbau erfolgreich");
                }
                tracing::info!(participant = %peer, role = ?sitzung.role, "Peer verbunden");
                Some(Folge::Verbunden(peer))
            }
            PeerEreignis::Transport(TransportState::Disconnected) => {
                tracing::debug!(participant = %peer, "Peer-Transport unterbrochen");
                sitzung.connection_state = ConnectionState::Disconnected;
                self.zeitlimit_stellen(sitzung);
                None
            }
            PeerEreignis::Transport(TransportState::Failed) => {
                tracing::warn!(participant = %peer, "Peer-Transport fehlgeschlagen");
                self.fehlschlag(reg, &peer)
            }
            PeerEreignis::Transport(TransportState::Closed) => None,
            PeerEreignis::Spur(spur) => Some(Folge::Spur(peer, spur)),
        }
    }

    pub fn zeitlimit(&mut self, reg: &mut PeerSessionRegistry, herkunft: Herkunft, nr: u64) -> Option<Folge> {
        let sitzung = self.aktuelle_sitzung(reg, &herkunft)?;
        if sitzung.zeitlimit_nr != nr || sitzung.connection_state == ConnectionState::Connected {
            return None;
        }
        let peer = herkunft.peer;
        tracing::warn!(
            participant = %peer,
            zustand = ?sitzung.connection_state,
            "{}",
            HuddleError::NegotiationTimeout(peer.clone())
        );
        self.fehlschlag(reg, &peer)
    }

    fn kandidaten_senden(&self, peer: &ParticipantId, kandidaten: Vec<IceCandidate>) {
        for kandidat in kandidaten {
            self.link.send(SignalingMessage::IceCandidate {
                channel_id: self.channel_id.clone(),
                from: self.lokal.clone(),
                to: peer.clone(),
                candidate: kandidat,
            });
        }
    }

    /// Failed: einmal neu aufbauen, beim zweiten Mal aufgeben
    fn fehlschlag(&mut self, reg: &mut PeerSessionRegistry, peer: &ParticipantId) -> Option<Folge> {
        let bereits_versucht = {
            let sitzung = reg.get_mut(peer)?;
            sitzung.connection_state = ConnectionState::Failed;
            sitzung.erneut_versucht
        };
        if bereits_versucht {
            reg.schliessen(peer);
            tracing::info!(participant = %peer, "{}", HuddleError::ParticipantUnreachable(peer.clone()));
            return Some(Folge::Unerreichbar(peer.clone()));
        }

        let (generation, worker) = match self.verbindung_starten(peer) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(participant = %peer, fehler = %e, "Neuaufbau nicht moeglich");
                reg.schliessen(peer);
                return Some(Folge::Unerreichbar(peer.clone()));
            }
        };
        let sitzung = reg.get_mut(peer)?;
        sitzung.erneut_versucht = true;
        sitzung.neu_verbinden(generation, worker);
        sitzung.role = Role::bestimmen(&self.lokal, peer);
        self.zeitlimit_stellen(sitzung);
        tracing::info!(participant = %peer, role = ?sitzung.role, generation, "Verbindung wird neu aufgebaut");
        if sitzung.role == Role::Initiator {
            sitzung.negotiation = NegotiationState::LokalesAngebot;
            sitzung.befehl(PeerBefehl::AngebotErstellen);
        }
        None
    }
}
