//! Ereignisse des Voice-Orchestrators
//!
//! Nicht-fatale Zustandsaenderungen, die an die Anwendungsschicht (UI)
//! gemeldet werden. Die Verteilung erfolgt im Voice-Crate via
//! tokio-broadcast.

use crate::types::{ChannelId, Participant, ParticipantId};
use serde::{Deserialize, Serialize};

/// Alle Ereignisse die der Orchestrator nach oben meldet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VoiceEvent {
    /// Kanal beigetreten (Join wurde gesendet)
    KanalBeigetreten { channel_id: ChannelId },
    /// Kanal verlassen (lokal ausgeloest)
    KanalVerlassen { channel_id: ChannelId },
    /// Ein Teilnehmer ist dem Roster hinzugefuegt worden
    TeilnehmerBeigetreten { participant: Participant },
    /// Ein Teilnehmer hat den Kanal verlassen
    TeilnehmerGegangen { participant_id: ParticipantId },
    /// Peer-Verbindung hergestellt
    PeerVerbunden { participant_id: ParticipantId },
    /// Peer nach Wiederholungsversuch aufgegeben (nicht fatal)
    TeilnehmerUnerreichbar { participant_id: ParticipantId },
    /// Relay-Verbindung verloren, alle Sitzungen abgebaut
    RelayGetrennt { channel_id: ChannelId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_ist_serde_kompatibel() {
        let event = VoiceEvent::TeilnehmerUnerreichbar {
            participant_id: ParticipantId::new("b"),
        };
        let json = serde_json::to_string(&event).unwrap();
        let zurueck: VoiceEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck, event);
    }
}
