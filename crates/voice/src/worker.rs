//! Peer-Worker – fuehrt Verbindungsoperationen einer Sitzung seriell aus
//!
//! Jede Sitzung hat genau einen Worker-Task. Befehle werden in
//! Eingangsreihenfolge abgearbeitet (Kandidaten bleiben geordnet),
//! Ergebnisse gehen mit Herkunft zurueck an den Orchestrator. Der Abbruch
//! der Sitzung bricht eine laufende Operation sofort ab und schliesst die
//! Verbindung.

use huddle_protocol::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::inbox::{Eingang, Herkunft};
use crate::peer::{PeerConnection, PeerError};

#[derive(Debug)]
pub(crate) enum PeerBefehl {
    /// Offer erstellen und lokal setzen
    AngebotErstellen,
    /// Offer als Remote-Beschreibung setzen, Answer erstellen und lokal setzen
    AngebotBeantworten(SessionDescription),
    /// Answer als Remote-Beschreibung setzen
    AntwortAnwenden(SessionDescription),
    KandidatAnwenden(IceCandidate),
}

#[derive(Debug)]
pub(crate) enum SchrittErgebnis {
    AngebotBereit(SessionDescription),
    RemoteGesetzt,
    AntwortBereit(SessionDescription),
    Fehlgeschlagen(PeerError),
}

/// Handle auf den Worker einer Sitzung
#[derive(Debug)]
pub(crate) struct PeerWorker {
    tx: mpsc::UnboundedSender<PeerBefehl>,
    abbruch: CancellationToken,
}

impl PeerWorker {
    /// Startet den Worker-Task fuer eine Verbindung
    pub fn starten(
        verbindung: Arc<dyn PeerConnection>,
        herkunft: Herkunft,
        inbox: mpsc::UnboundedSender<Eingang>,
        abbruch: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker_schleife(verbindung, herkunft, inbox, rx, abbruch.clone()));
        Self { tx, abbruch }
    }

    pub fn senden(&self, befehl: PeerBefehl) {
        if self.tx.send(befehl).is_err() {
            tracing::trace!("Peer-Worker beendet – Befehl verworfen");
        }
    }

    /// Bricht laufende Arbeit ab und schliesst die Verbindung
    pub fn beenden(&self) {
        self.abbruch.cancel();
    }

    /// Token der Sitzung (fuer Timer derselben Generation)
    pub fn abbruch(&self) -> &CancellationToken {
        &self.abbruch
    }
}

impl Drop for PeerWorker {
    fn drop(&mut self) {
        self.abbruch.cancel();
    }
}

async fn worker_schleife(
    verbindung: Arc<dyn PeerConnection>,
    herkunft: Herkunft,
    inbox: mpsc::UnboundedSender<Eingang>,
    mut rx: mpsc::UnboundedReceiver<PeerBefehl>,
    abbruch: CancellationToken,
) {
    let melden = |ergebnis: SchrittErgebnis| {
        let _ = inbox.send(Eingang::Schritt {
            herkunft: herkunft.clone(),
            ergebnis,
        });
    };

    loop {
        let befehl = tokio::select! {
            _ = abbruch.cancelled() => break,
            befehl = rx.recv() => match befehl {
                Some(b) => b,
                None => break,
            },
        };

        let schritt = ausfuehren(verbindung.as_ref(), befehl, &melden);
        let ergebnis = tokio::select! {
            _ = abbruch.cancelled() => break,
            ergebnis = schritt => ergebnis,
        };
        if let Err(e) = ergebnis {
            melden(SchrittErgebnis::Fehlgeschlagen(e));
        }
    }

    verbindung.close().await;
    tracing::trace!(participant = %herkunft.peer, generation = herkunft.generation, "Peer-Worker beendet");
}

async fn ausfuehren(
    verbindung: &dyn PeerConnection,
    befehl: PeerBefehl,
    melden: &(impl Fn(SchrittErgebnis) + Sync),
) -> Result<(), PeerError> {
    match befehl {
        PeerBefehl::AngebotErstellen => {
            let angebot = verbindung.create_offer().await?;
            verbindung.set_local_description(angebot.clone()).await?;
            melden(SchrittErgebnis::AngebotBereit(angebot));
        }
        PeerBefehl::AngebotBeantworten(angebot) => {
            verbindung.set_remote_description(angebot).await?;
            melden(SchrittErgebnis::RemoteGesetzt);
            let antwort = verbindung.create_answer().await?;
            verbindung.set_local_description(antwort.clone()).await?;
            melden(SchrittErgebnis::AntwortBereit(antwort));
        }
        PeerBefehl::AntwortAnwenden(antwort) => {
            verbindung.set_remote_description(antwort).await?;
            melden(SchrittErgebnis::RemoteGesetzt);
        }
        PeerBefehl::KandidatAnwenden(kandidat) => {
            // Abgelehnte Kandidaten sind nicht fatal, andere Pfade koennen tragen
            if let Err(e) = verbindung.add_ice_candidate(kandidat).await {
                tracing::debug!(fehler = %e, "ICE-Kandidat nicht angewendet");
            }
        }
    }
    Ok(())
}
