//! Signaling-Protokoll (Relay)
//!
//! Definiert alle Nachrichten die ueber die Relay-Verbindung zwischen
//! Voice-Client und Relay ausgetauscht werden.
//!
//! ## Design
//! - Wire-Format: flaches JSON-Objekt mit `type`-Feld (`WireMessage`),
//!   kompatibel zu bestehenden Web-Clients
//! - Intern: typisierter Enum (`SignalingMessage`), der ueber
//!   `try_from`/`into` auf das Wire-Format abgebildet wird. Nachrichten mit
//!   fehlenden Pflichtfeldern werden beim Deserialisieren abgelehnt.
//!
//! ```text
//! { "type": "webrtc-signal", "channelId": "42", "userId": "a",
//!   "from": "a", "to": "b",
//!   "signal": { "type": "offer", "offer": { "type": "offer", "sdp": "..." } } }
//! ```

use huddle_core::types::{ChannelId, Participant, ParticipantId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Fehler
// ---------------------------------------------------------------------------

/// Fehler bei der Umwandlung zwischen Wire-Format und typisierter Nachricht
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Pflichtfeld fehlt in '{nachricht}': {feld}")]
    FeldFehlt {
        nachricht: &'static str,
        feld: &'static str,
    },

    #[error("Signal-Typ passt nicht zum Inhalt: {0}")]
    UngueltigesSignal(String),
}

impl ProtocolError {
    fn fehlt(nachricht: &'static str, feld: &'static str) -> Self {
        Self::FeldFehlt { nachricht, feld }
    }
}

// ---------------------------------------------------------------------------
// Session-Beschreibungen und ICE-Kandidaten
// ---------------------------------------------------------------------------

/// Typ einer Session-Beschreibung
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// Session-Beschreibung (Offer oder Answer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE-Kandidat (Netzwerkpfad-Beschreibung)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire-Format
// ---------------------------------------------------------------------------

/// Nachrichtentyp im Wire-Format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireType {
    JoinVoice,
    LeaveVoice,
    ChannelUsers,
    UserJoined,
    UserLeft,
    WebrtcSignal,
}

/// Typ des eingebetteten WebRTC-Signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireSignalType {
    Offer,
    Answer,
    Ice,
}

/// Eingebettetes WebRTC-Signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSignal {
    #[serde(rename = "type")]
    pub signal_type: WireSignalType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

/// Roster-Eintrag in `channel-users`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUser {
    pub user_id: ParticipantId,
    pub user_name: String,
}

/// Flaches Nachrichtenobjekt wie es ueber die Relay-Verbindung laeuft
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub message_type: WireType,
    pub channel_id: ChannelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<WireSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<WireUser>>,
}

impl WireMessage {
    fn leer(message_type: WireType, channel_id: ChannelId) -> Self {
        Self {
            message_type,
            channel_id,
            user_id: None,
            user_name: None,
            to: None,
            from: None,
            signal: None,
            users: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Typisierte Nachricht
// ---------------------------------------------------------------------------

/// Alle Signaling-Nachrichten, typisiert
///
/// Jede Variante traegt die Kanal-ID sowie Absender- bzw. Ziel-IDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub enum SignalingMessage {
    /// Client -> Relay: Kanal beitreten (`join-voice`)
    Join {
        channel_id: ChannelId,
        participant: Participant,
    },
    /// Client -> Relay: Kanal verlassen (`leave-voice`)
    Leave {
        channel_id: ChannelId,
        participant_id: ParticipantId,
    },
    /// Relay -> Client: vollstaendiger Roster (`channel-users`)
    RosterSnapshot {
        channel_id: ChannelId,
        participants: Vec<Participant>,
    },
    /// Relay -> Client: neuer Teilnehmer (`user-joined`)
    UserJoined {
        channel_id: ChannelId,
        participant: Participant,
    },
    /// Relay -> Client: Teilnehmer gegangen oder getrennt (`user-left`)
    UserLeft {
        channel_id: ChannelId,
        participant_id: ParticipantId,
    },
    /// Offer eines Initiators
    Offer {
        channel_id: ChannelId,
        from: ParticipantId,
        to: ParticipantId,
        description: SessionDescription,
    },
    /// Answer eines Responders
    Answer {
        channel_id: ChannelId,
        from: ParticipantId,
        to: ParticipantId,
        description: SessionDescription,
    },
    /// ICE-Kandidat fuer das Ziel
    IceCandidate {
        channel_id: ChannelId,
        from: ParticipantId,
        to: ParticipantId,
        candidate: IceCandidate,
    },
}

impl SignalingMessage {
    /// Gibt die Kanal-ID der Nachricht zurueck
    pub fn channel_id(&self) -> &ChannelId {
        match self {
            Self::Join { channel_id, .. }
            | Self::Leave { channel_id, .. }
            | Self::RosterSnapshot { channel_id, .. }
            | Self::UserJoined { channel_id, .. }
            | Self::UserLeft { channel_id, .. }
            | Self::Offer { channel_id, .. }
            | Self::Answer { channel_id, .. }
            | Self::IceCandidate { channel_id, .. } => channel_id,
        }
    }

    /// Gibt den Wire-Typ der Nachricht zurueck
    pub fn wire_type(&self) -> WireType {
        match self {
            Self::Join { .. } => WireType::JoinVoice,
            Self::Leave { .. } => WireType::LeaveVoice,
            Self::RosterSnapshot { .. } => WireType::ChannelUsers,
            Self::UserJoined { .. } => WireType::UserJoined,
            Self::UserLeft { .. } => WireType::UserLeft,
            Self::Offer { .. } | Self::Answer { .. } | Self::IceCandidate { .. } => {
                WireType::WebrtcSignal
            }
        }
    }

    /// Ziel eines Peer-Signals (nur Offer/Answer/IceCandidate)
    pub fn ziel(&self) -> Option<&ParticipantId> {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::IceCandidate { to, .. } => {
                Some(to)
            }
            _ => None,
        }
    }

    /// Setzt den Absender eines Peer-Signals (Relay ueberschreibt ihn)
    pub fn absender_setzen(&mut self, absender: ParticipantId) {
        match self {
            Self::Offer { from, .. } | Self::Answer { from, .. } | Self::IceCandidate { from, .. } => {
                *from = absender
            }
            _ => {}
        }
    }

    /// True fuer Offer und Answer (Verhandlungsnachrichten)
    pub fn ist_verhandlung(&self) -> bool {
        matches!(self, Self::Offer { .. } | Self::Answer { .. })
    }

    /// Serialisiert die Nachricht als JSON-String
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialisiert eine Nachricht aus einem JSON-String
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

// ---------------------------------------------------------------------------
// Umwandlung typisiert -> Wire
// ---------------------------------------------------------------------------

impl From<SignalingMessage> for WireMessage {
    fn from(nachricht: SignalingMessage) -> Self {
        match nachricht {
            SignalingMessage::Join {
                channel_id,
                participant,
            } => WireMessage {
                user_id: Some(participant.id),
                user_name: Some(participant.display_name),
                ..WireMessage::leer(WireType::JoinVoice, channel_id)
            },
            SignalingMessage::Leave {
                channel_id,
                participant_id,
            } => WireMessage {
                user_id: Some(participant_id),
                ..WireMessage::leer(WireType::LeaveVoice, channel_id)
            },
            SignalingMessage::RosterSnapshot {
                channel_id,
                participants,
            } => WireMessage {
                users: Some(
                    participants
                        .into_iter()
                        .map(|p| WireUser {
                            user_id: p.id,
                            user_name: p.display_name,
                        })
                        .collect(),
                ),
                ..WireMessage::leer(WireType::ChannelUsers, channel_id)
            },
            SignalingMessage::UserJoined {
                channel_id,
                participant,
            } => WireMessage {
                user_id: Some(participant.id),
                user_name: Some(participant.display_name),
                ..WireMessage::leer(WireType::UserJoined, channel_id)
            },
            SignalingMessage::UserLeft {
                channel_id,
                participant_id,
            } => WireMessage {
                user_id: Some(participant_id),
                ..WireMessage::leer(WireType::UserLeft, channel_id)
            },
            SignalingMessage::Offer {
                channel_id,
                from,
                to,
                description,
            } => peer_signal(
                channel_id,
                from,
                to,
                WireSignal {
                    signal_type: WireSignalType::Offer,
                    offer: Some(description),
                    answer: None,
                    candidate: None,
                },
            ),
            SignalingMessage::Answer {
                channel_id,
                from,
                to,
                description,
            } => peer_signal(
                channel_id,
                from,
                to,
                WireSignal {
                    signal_type: WireSignalType::Answer,
                    offer: None,
                    answer: Some(description),
                    candidate: None,
                },
            ),
            SignalingMessage::IceCandidate {
                channel_id,
                from,
                to,
                candidate,
            } => peer_signal(
                channel_id,
                from,
                to,
                WireSignal {
                    signal_type: WireSignalType::Ice,
                    offer: None,
                    answer: None,
                    candidate: Some(candidate),
                },
            ),
        }
    }
}

fn peer_signal(
    channel_id: ChannelId,
    from: ParticipantId,
    to: ParticipantId,
    signal: WireSignal,
) -> WireMessage {
    WireMessage {
        user_id: Some(from.clone()),
        from: Some(from),
        to: Some(to),
        signal: Some(signal),
        ..WireMessage::leer(WireType::WebrtcSignal, channel_id)
    }
}

// ---------------------------------------------------------------------------
// Umwandlung Wire -> typisiert
// ---------------------------------------------------------------------------

impl TryFrom<WireMessage> for SignalingMessage {
    type Error = ProtocolError;

    fn try_from(w: WireMessage) -> Result<Self, Self::Error> {
        let channel_id = w.channel_id;
        match w.message_type {
            WireType::JoinVoice | WireType::UserJoined => {
                let name = if w.message_type == WireType::JoinVoice {
                    "join-voice"
                } else {
                    "user-joined"
                };
                let id = w.user_id.ok_or(ProtocolError::fehlt(name, "userId"))?;
                // Ohne Anzeigename wird die ID angezeigt
                let display_name = w.user_name.unwrap_or_else(|| id.to_string());
                let participant = Participant { id, display_name };
                Ok(if w.message_type == WireType::JoinVoice {
                    Self::Join {
                        channel_id,
                        participant,
                    }
                } else {
                    Self::UserJoined {
                        channel_id,
                        participant,
                    }
                })
            }
            WireType::LeaveVoice => Ok(Self::Leave {
                channel_id,
                participant_id: w
                    .user_id
                    .ok_or(ProtocolError::fehlt("leave-voice", "userId"))?,
            }),
            WireType::UserLeft => Ok(Self::UserLeft {
                channel_id,
                participant_id: w
                    .user_id
                    .ok_or(ProtocolError::fehlt("user-left", "userId"))?,
            }),
            WireType::ChannelUsers => Ok(Self::RosterSnapshot {
                channel_id,
                participants: w
                    .users
                    .ok_or(ProtocolError::fehlt("channel-users", "users"))?
                    .into_iter()
                    .map(|u| Participant {
                        id: u.user_id,
                        display_name: u.user_name,
                    })
                    .collect(),
            }),
            WireType::WebrtcSignal => {
                // `from` faellt auf `userId` zurueck (aeltere Clients setzen nur userId)
                let from = w
                    .from
                    .or(w.user_id)
                    .ok_or(ProtocolError::fehlt("webrtc-signal", "from"))?;
                let to = w.to.ok_or(ProtocolError::fehlt("webrtc-signal", "to"))?;
                let signal = w
                    .signal
                    .ok_or(ProtocolError::fehlt("webrtc-signal", "signal"))?;
                match signal.signal_type {
                    WireSignalType::Offer => Ok(Self::Offer {
                        channel_id,
                        from,
                        to,
                        description: signal
                            .offer
                            .ok_or(ProtocolError::fehlt("webrtc-signal", "signal.offer"))?,
                    }),
                    WireSignalType::Answer => Ok(Self::Answer {
                        channel_id,
                        from,
                        to,
                        description: signal
                            .answer
                            .ok_or(ProtocolError::fehlt("webrtc-signal", "signal.answer"))?,
                    }),
                    WireSignalType::Ice => Ok(Self::IceCandidate {
                        channel_id,
                        from,
                        to,
                        candidate: signal
                            .candidate
                            .ok_or(ProtocolError::fehlt("webrtc-signal", "signal.candidate"))?,
                    }),
                }
            }
        }
        .and_then(pruefe_sdp_typ)
    }
}

/// Offer muss eine Offer-Beschreibung tragen, Answer eine Answer-Beschreibung
fn pruefe_sdp_typ(nachricht: SignalingMessage) -> Result<SignalingMessage, ProtocolError> {
    match &nachricht {
        SignalingMessage::Offer { description, .. } if description.sdp_type != SdpType::Offer => {
            Err(ProtocolError::UngueltigesSignal(
                "offer enthaelt keine Offer-Beschreibung".into(),
            ))
        }
        SignalingMessage::Answer { description, .. }
            if description.sdp_type != SdpType::Answer =>
        {
            Err(ProtocolError::UngueltigesSignal(
                "answer enthaelt keine Answer-Beschreibung".into(),
            ))
        }
        _ => Ok(nachricht),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn kanal() -> ChannelId {
        ChannelId::new("42")
    }

    #[test]
    fn join_wire_format() {
        let msg = SignalingMessage::Join {
            channel_id: kanal(),
            participant: Participant::new("a", "Anna"),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "join-voice");
        assert_eq!(json["channelId"], "42");
        assert_eq!(json["userId"], "a");
        assert_eq!(json["userName"], "Anna");
        assert!(json.get("to").is_none(), "Leere Felder werden ausgelassen");
    }

    #[test]
    fn offer_wire_format() {
        let msg = SignalingMessage::Offer {
            channel_id: kanal(),
            from: ParticipantId::new("a"),
            to: ParticipantId::new("b"),
            description: SessionDescription::offer("v=0"),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "webrtc-signal");
        assert_eq!(json["from"], "a");
        assert_eq!(json["to"], "b");
        assert_eq!(json["signal"]["type"], "offer");
        assert_eq!(json["signal"]["offer"]["type"], "offer");
        assert_eq!(json["signal"]["offer"]["sdp"], "v=0");
    }

    #[test]
    fn ice_kandidat_aus_browser_json() {
        let json = r#"{
            "type": "webrtc-signal",
            "channelId": "42",
            "userId": "b",
            "to": "a",
            "signal": {
                "type": "ice",
                "candidate": {"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
                              "sdpMid": "0", "sdpMLineIndex": 0}
            }
        }"#;
        let msg = SignalingMessage::from_json(json).unwrap();
        match msg {
            SignalingMessage::IceCandidate {
                from,
                to,
                candidate,
                ..
            } => {
                assert_eq!(from, ParticipantId::new("b"), "from faellt auf userId zurueck");
                assert_eq!(to, ParticipantId::new("a"));
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            andere => panic!("IceCandidate erwartet, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn channel_users_mit_roster() {
        let json = r#"{"type":"channel-users","channelId":"42",
            "users":[{"userId":"a","userName":"Anna"},{"userId":"b","userName":"Ben"}]}"#;
        let msg = SignalingMessage::from_json(json).unwrap();
        match msg {
            SignalingMessage::RosterSnapshot { participants, .. } => {
                assert_eq!(participants.len(), 2);
                assert_eq!(participants[1].display_name, "Ben");
            }
            andere => panic!("RosterSnapshot erwartet, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn fehlendes_pflichtfeld_wird_abgelehnt() {
        let json = r#"{"type":"user-left","channelId":"42"}"#;
        assert!(SignalingMessage::from_json(json).is_err());

        let json = r#"{"type":"webrtc-signal","channelId":"42","from":"a","to":"b",
            "signal":{"type":"answer"}}"#;
        assert!(SignalingMessage::from_json(json).is_err());
    }

    #[test]
    fn offer_mit_answer_beschreibung_wird_abgelehnt() {
        let json = r#"{"type":"webrtc-signal","channelId":"42","from":"a","to":"b",
            "signal":{"type":"offer","offer":{"type":"answer","sdp":"x"}}}"#;
        assert!(SignalingMessage::from_json(json).is_err());
    }

    #[test]
    fn user_joined_ohne_namen_nutzt_id() {
        let json = r#"{"type":"user-joined","channelId":"42","userId":"c"}"#;
        match SignalingMessage::from_json(json).unwrap() {
            SignalingMessage::UserJoined { participant, .. } => {
                assert_eq!(participant.display_name, "c");
            }
            andere => panic!("UserJoined erwartet, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn absender_wird_ueberschrieben() {
        let mut msg = SignalingMessage::IceCandidate {
            channel_id: kanal(),
            from: ParticipantId::new("gefaelscht"),
            to: ParticipantId::new("b"),
            candidate: IceCandidate::new("c"),
        };
        msg.absender_setzen(ParticipantId::new("a"));
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["from"], "a");
        assert!(!msg.ist_verhandlung());
        assert_eq!(msg.ziel(), Some(&ParticipantId::new("b")));
    }
}
