//! Eingang des Orchestrator-Tasks
//!
//! Alles, was den Zustand veraendert, laeuft als Nachricht durch einen
//! einzigen Kanal und wird seriell verarbeitet: Befehle der Handles,
//! Relay-Nachrichten, Ergebnisse der Peer-Worker, Plattform-Ereignisse und
//! Timer. Mitgliedschaftsgebundene Nachrichten tragen die Epoche; Peer-
//! gebundene zusaetzlich die Generation der Sitzung.

use huddle_core::types::{ChannelId, LocalIdentity, ParticipantId};
use huddle_core::Result;
use huddle_signaling::LinkEvent;
use tokio::sync::oneshot;

use crate::peer::PeerEreignis;
use crate::session::SessionInfo;
use crate::worker::SchrittErgebnis;

/// Zuordnung einer Meldung zu Mitgliedschaft, Peer und Verbindungsgeneration
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Herkunft {
    pub epoch: u64,
    pub peer: ParticipantId,
    pub generation: u64,
}

pub(crate) enum Eingang {
    // --- Befehle ---
    Beitreten {
        channel_id: ChannelId,
        antwort: oneshot::Sender<Result<()>>,
    },
    Verlassen {
        antwort: oneshot::Sender<()>,
    },
    IdentitaetSetzen {
        identitaet: LocalIdentity,
        antwort: oneshot::Sender<Result<()>>,
    },
    Stumm {
        stumm: bool,
        antwort: oneshot::Sender<()>,
    },
    Taub {
        taub: bool,
        antwort: oneshot::Sender<()>,
    },
    Lautstaerke {
        peer: ParticipantId,
        wert: f32,
        antwort: oneshot::Sender<()>,
    },
    Sitzungen {
        antwort: oneshot::Sender<Vec<SessionInfo>>,
    },

    // --- Mitgliedschaft ---
    Link {
        epoch: u64,
        ereignis: LinkEvent,
    },
    Aufbauen {
        epoch: u64,
        peer: ParticipantId,
    },

    // --- Peer-Sitzungen ---
    Schritt {
        herkunft: Herkunft,
        ergebnis: SchrittErgebnis,
    },
    Peer {
        herkunft: Herkunft,
        ereignis: PeerEreignis,
    },
    Zeitlimit {
        herkunft: Herkunft,
        nr: u64,
    },
}
