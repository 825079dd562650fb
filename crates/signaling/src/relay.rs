//! Referenz-Relay – vermittelt Signaling-Nachrichten innerhalb eines Kanals
//!
//! Das Relay transportiert nie Medien. Es verwaltet pro Kanal die geordnete
//! Mitgliederliste und leitet WebRTC-Signale zwischen Mitgliedern desselben
//! Kanals weiter.
//!
//! ## Nachrichtenvertrag
//! - `join-voice`: Joiner erhaelt `channel-users` (inkl. sich selbst), alle
//!   anderen Mitglieder `user-joined`
//! - `leave-voice` oder Verbindungsverlust: verbleibende Mitglieder erhalten
//!   `user-left`
//! - `webrtc-signal`: an `to` weitergeleitet, `from` wird mit der an die
//!   Verbindung gebundenen Identitaet ueberschrieben
//! - Resync: `channel-users` periodisch an alle Mitglieder
//!
//! Tritt eine ID erneut bei, ersetzt die neue Verbindung die aeltere.

use async_trait::async_trait;
use dashmap::DashMap;
use huddle_core::types::{ChannelId, Participant, ParticipantId};
use huddle_protocol::SignalingMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::SignalingResult;
use crate::transport::{RelayConnector, RelayKanal};

// ---------------------------------------------------------------------------
// Statistik
// ---------------------------------------------------------------------------

/// Zaehlerstand der weitergeleiteten Signale
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatistik {
    pub offers: u64,
    pub answers: u64,
    pub kandidaten: u64,
    /// Signale ohne gueltiges Ziel im selben Kanal
    pub verworfen: u64,
}

impl RelayStatistik {
    /// Offers + Answers
    pub fn verhandlungen(&self) -> u64 {
        self.offers + self.answers
    }
}

#[derive(Default)]
struct Zaehler {
    offers: AtomicU64,
    answers: AtomicU64,
    kandidaten: AtomicU64,
    verworfen: AtomicU64,
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Eine an eine Teilnehmer-ID gebundene Verbindung
struct RelayClient {
    verbindung: u64,
    teilnehmer: Participant,
    kanal: Option<ChannelId>,
    tx: mpsc::UnboundedSender<SignalingMessage>,
    abbruch: CancellationToken,
}

/// Signaling-Relay
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    /// Gebundene Verbindungen, indiziert nach Teilnehmer-ID
    clients: DashMap<ParticipantId, RelayClient>,
    /// Kanal -> Mitglieder in Beitrittsreihenfolge
    kanaele: DashMap<ChannelId, Vec<ParticipantId>>,
    naechste_verbindung: AtomicU64,
    zaehler: Zaehler,
}

impl Relay {
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(RelayInner {
                clients: DashMap::new(),
                kanaele: DashMap::new(),
                naechste_verbindung: AtomicU64::new(1),
                zaehler: Zaehler::default(),
            }),
        }
    }

    /// In-Memory-Connector fuer dieses Relay
    pub fn connector(&self) -> SpeicherConnector {
        SpeicherConnector {
            relay: self.clone(),
        }
    }

    /// Bedient eine Verbindung bis sie endet
    ///
    /// Die Verbindung wird beim ersten `join-voice` an die Teilnehmer-ID
    /// gebunden. Beim Ende werden die uebrigen Kanalmitglieder informiert.
    pub async fn verbindung_bedienen(
        &self,
        mut eingehend: mpsc::UnboundedReceiver<SignalingMessage>,
        ausgehend: mpsc::UnboundedSender<SignalingMessage>,
    ) {
        let verbindung = self.inner.naechste_verbindung.fetch_add(1, Ordering::Relaxed);
        let abbruch = CancellationToken::new();
        let mut gebunden: Option<ParticipantId> = None;

        loop {
            tokio::select! {
                _ = abbruch.cancelled() => {
                    tracing::debug!(verbindung, "Relay-Verbindung abgebrochen");
                    break;
                }
                nachricht = eingehend.recv() => {
                    match nachricht {
                        Some(n) => self.nachricht_verarbeiten(verbindung, &abbruch, &ausgehend, &mut gebunden, n),
                        None => break,
                    }
                }
            }
        }

        if let Some(pid) = gebunden {
            self.verbindung_entfernen(&pid, verbindung);
        }
    }

    fn nachricht_verarbeiten(
        &self,
        verbindung: u64,
        abbruch: &CancellationToken,
        ausgehend: &mpsc::UnboundedSender<SignalingMessage>,
        gebunden: &mut Option<ParticipantId>,
        nachricht: SignalingMessage,
    ) {
        match nachricht {
            SignalingMessage::Join {
                channel_id,
                participant,
            } => {
                if let Some(alt) = gebunden.take() {
                    if alt != participant.id {
                        self.verbindung_entfernen(&alt, verbindung);
                    }
                }
                let pid = participant.id.clone();
                let alter_kanal = self.binden(verbindung, abbruch, ausgehend, participant);
                if let Some(k) = alter_kanal {
                    if k != channel_id {
                        self.aus_kanal_entfernen(&pid, &k);
                    }
                }
                self.kanal_beitreten(&pid, channel_id);
                *gebunden = Some(pid);
            }

            SignalingMessage::Leave { channel_id, .. } => {
                let Some(pid) = gebunden.as_ref() else {
                    tracing::debug!(verbindung, "leave-voice vor join-voice – ignoriert");
                    return;
                };
                let im_kanal = self
                    .inner
                    .clients
                    .get(pid)
                    .is_some_and(|c| c.verbindung == verbindung && c.kanal.as_ref() == Some(&channel_id));
                if im_kanal {
                    if let Some(mut c) = self.inner.clients.get_mut(pid) {
                        c.kanal = None;
                    }
                    self.aus_kanal_entfernen(pid, &channel_id);
                }
            }

            mut signal @ (SignalingMessage::Offer { .. }
            | SignalingMessage::Answer { .. }
            | SignalingMessage::IceCandidate { .. }) => {
                let Some(pid) = gebunden.as_ref() else {
                    self.inner.zaehler.verworfen.fetch_add(1, Ordering::Relaxed);
                    return;
                };
                signal.absender_setzen(pid.clone());
                self.signal_weiterleiten(pid, signal);
            }

            andere => {
                tracing::warn!(verbindung, typ = ?andere.wire_type(), "Unerwartete Nachricht vom Client");
            }
        }
    }

    /// Bindet die Verbindung an die ID; ersetzt eine aeltere Verbindung
    ///
    /// Gibt den Kanal der ersetzten Verbindung zurueck.
    fn binden(
        &self,
        verbindung: u64,
        abbruch: &CancellationToken,
        ausgehend: &mpsc::UnboundedSender<SignalingMessage>,
        teilnehmer: Participant,
    ) -> Option<ChannelId> {
        let pid = teilnehmer.id.clone();
        let ersetzt = self.inner.clients.insert(
            pid.clone(),
            RelayClient {
                verbindung,
                teilnehmer,
                kanal: None,
                tx: ausgehend.clone(),
                abbruch: abbruch.clone(),
            },
        )?;
        if ersetzt.verbindung != verbindung {
            tracing::info!(participant = %pid, "Aeltere Verbindung ersetzt");
            ersetzt.abbruch.cancel();
        }
        ersetzt.kanal
    }

    fn kanal_beitreten(&self, pid: &ParticipantId, channel_id: ChannelId) {
        if let Some(mut c) = self.inner.clients.get_mut(pid) {
            c.kanal = Some(channel_id.clone());
        }
        {
            let mut mitglieder = self.inner.kanaele.entry(channel_id.clone()).or_default();
            if !mitglieder.contains(pid) {
                mitglieder.push(pid.clone());
            }
        }

        let roster = self.roster(&channel_id);
        let Some(teilnehmer) = roster.iter().find(|p| &p.id == pid).cloned() else {
            return;
        };
        tracing::info!(participant = %pid, channel = %channel_id, mitglieder = roster.len(), "Kanal beigetreten");

        self.an_teilnehmer_senden(
            pid,
            SignalingMessage::RosterSnapshot {
                channel_id: channel_id.clone(),
                participants: roster,
            },
        );
        self.an_kanal_ausser_senden(
            &channel_id,
            pid,
            SignalingMessage::UserJoined {
                channel_id: channel_id.clone(),
                participant: teilnehmer,
            },
        );
    }

    fn aus_kanal_entfernen(&self, pid: &ParticipantId, channel_id: &ChannelId) {
        let entfernt = match self.inner.kanaele.get_mut(channel_id) {
            Some(mut mitglieder) => {
                let vorher = mitglieder.len();
                mitglieder.retain(|m| m != pid);
                vorher != mitglieder.len()
            }
            None => false,
        };
        self.inner.kanaele.retain(|_, m| !m.is_empty());

        if entfernt {
            tracing::info!(participant = %pid, channel = %channel_id, "Kanal verlassen");
            self.an_kanal_ausser_senden(
                channel_id,
                pid,
                SignalingMessage::UserLeft {
                    channel_id: channel_id.clone(),
                    participant_id: pid.clone(),
                },
            );
        }
    }

    /// Entfernt die Bindung, sofern sie noch zu dieser Verbindung gehoert
    fn verbindung_entfernen(&self, pid: &ParticipantId, verbindung: u64) {
        let Some((_, client)) = self
            .inner
            .clients
            .remove_if(pid, |_, c| c.verbindung == verbindung)
        else {
            return;
        };
        tracing::debug!(participant = %pid, "Relay-Verbindung beendet");
        if let Some(k) = client.kanal {
            self.aus_kanal_entfernen(pid, &k);
        }
    }

    fn signal_weiterleiten(&self, absender: &ParticipantId, signal: SignalingMessage) {
        let kanal = signal.channel_id().clone();
        let Some(ziel) = signal.ziel().cloned() else {
            return;
        };

        let absender_im_kanal = self
            .inner
            .clients
            .get(absender)
            .is_some_and(|c| c.kanal.as_ref() == Some(&kanal));
        let ziel_im_kanal = self
            .inner
            .kanaele
            .get(&kanal)
            .is_some_and(|m| m.contains(&ziel));

        if !absender_im_kanal || !ziel_im_kanal || &ziel == absender {
            tracing::debug!(von = %absender, an = %ziel, channel = %kanal, "Signal ohne gueltiges Ziel verworfen");
            self.inner.zaehler.verworfen.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let zaehler = match &signal {
            SignalingMessage::Offer { .. } => &self.inner.zaehler.offers,
            SignalingMessage::Answer { .. } => &self.inner.zaehler.answers,
            _ => &self.inner.zaehler.kandidaten,
        };
        zaehler.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(von = %absender, an = %ziel, typ = ?signal.wire_type(), "Signal weitergeleitet");
        self.an_teilnehmer_senden(&ziel, signal);
    }

    // -----------------------------------------------------------------------
    // Senden
    // -----------------------------------------------------------------------

    fn an_teilnehmer_senden(&self, pid: &ParticipantId, nachricht: SignalingMessage) -> bool {
        match self.inner.clients.get(pid) {
            Some(c) => c.tx.send(nachricht).is_ok(),
            None => {
                tracing::debug!(participant = %pid, "Senden an unbekannten Teilnehmer");
                false
            }
        }
    }

    fn an_kanal_ausser_senden(
        &self,
        channel_id: &ChannelId,
        ausgeschlossen: &ParticipantId,
        nachricht: SignalingMessage,
    ) -> usize {
        self.mitglieder(channel_id)
            .iter()
            .filter(|pid| *pid != ausgeschlossen)
            .filter(|pid| self.an_teilnehmer_senden(pid, nachricht.clone()))
            .count()
    }

    // -----------------------------------------------------------------------
    // Resync / Abfragen
    // -----------------------------------------------------------------------

    /// Sendet jedem Kanalmitglied den aktuellen Roster seines Kanals
    pub fn roster_an_alle_senden(&self) -> usize {
        let kanaele: Vec<ChannelId> = self.inner.kanaele.iter().map(|e| e.key().clone()).collect();
        let mut gesendet = 0;
        for kanal in kanaele {
            let roster = self.roster(&kanal);
            for p in &roster {
                let snapshot = SignalingMessage::RosterSnapshot {
                    channel_id: kanal.clone(),
                    participants: roster.clone(),
                };
                if self.an_teilnehmer_senden(&p.id, snapshot) {
                    gesendet += 1;
                }
            }
        }
        gesendet
    }

    /// Periodischer Roster-Resync bis zum Shutdown-Signal
    pub async fn resync_schleife(&self, intervall: Duration, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(intervall);
        // Erster Tick feuert sofort
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let n = self.roster_an_alle_senden();
                    tracing::trace!(gesendet = n, "Roster-Resync");
                }
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Trennt die Verbindung eines Teilnehmers (wie ein Verbindungsabbruch)
    pub fn trennen(&self, pid: &ParticipantId) -> bool {
        let Some((_, client)) = self.inner.clients.remove(pid) else {
            return false;
        };
        tracing::info!(participant = %pid, "Verbindung vom Relay getrennt");
        client.abbruch.cancel();
        if let Some(k) = client.kanal {
            self.aus_kanal_entfernen(pid, &k);
        }
        true
    }

    /// Roster eines Kanals in Beitrittsreihenfolge
    pub fn roster(&self, channel_id: &ChannelId) -> Vec<Participant> {
        self.mitglieder(channel_id)
            .iter()
            .filter_map(|pid| self.inner.clients.get(pid).map(|c| c.teilnehmer.clone()))
            .collect()
    }

    fn mitglieder(&self, channel_id: &ChannelId) -> Vec<ParticipantId> {
        self.inner
            .kanaele
            .get(channel_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Anzahl gebundener Verbindungen
    pub fn verbindungen(&self) -> usize {
        self.inner.clients.len()
    }

    pub fn statistik(&self) -> RelayStatistik {
        let z = &self.inner.zaehler;
        RelayStatistik {
            offers: z.offers.load(Ordering::Relaxed),
            answers: z.answers.load(Ordering::Relaxed),
            kandidaten: z.kandidaten.load(Ordering::Relaxed),
            verworfen: z.verworfen.load(Ordering::Relaxed),
        }
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// In-Memory-Connector
// ---------------------------------------------------------------------------

/// Verbindet sich ohne Netzwerk direkt mit einem `Relay`
#[derive(Clone)]
pub struct SpeicherConnector {
    relay: Relay,
}

#[async_trait]
impl RelayConnector for SpeicherConnector {
    async fn verbinden(&self) -> SignalingResult<RelayKanal> {
        let (c2r_tx, c2r_rx) = mpsc::unbounded_channel();
        let (r2c_tx, r2c_rx) = mpsc::unbounded_channel();
        let relay = self.relay.clone();
        tokio::spawn(async move {
            relay.verbindung_bedienen(c2r_rx, r2c_tx).await;
        });
        Ok(RelayKanal {
            ausgehend: c2r_tx,
            eingehend: r2c_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
