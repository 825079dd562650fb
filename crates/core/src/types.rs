//! Gemeinsame Identifikationstypen fuer Huddle
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! Teilnehmer- und Kanal-IDs zur Compilezeit auszuschliessen.
//!
//! Teilnehmer-IDs sind total geordnet (lexikografisch). Die Ordnung ist
//! Grundlage der Initiator-Regel: die kleinere ID initiiert.

use serde::{Deserialize, Serialize};

/// Eindeutige Teilnehmer-ID (vom Identitaets-Dienst aufgeloest)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
    /// Erstellt eine ParticipantId aus einem beliebigen String
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Eindeutige Kanal-ID eines Voice-Kanals
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Erstellt eine ChannelId aus einem beliebigen String
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die ID als String-Slice zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "channel:{}", self.0)
    }
}

/// Ein Teilnehmer eines Voice-Kanals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: impl Into<ParticipantId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Lokale Identitaet (aufgeloeste ID + Anzeigename)
///
/// Wird vom Identitaets-Dienst geliefert und muss vor `join()` bekannt sein.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub id: ParticipantId,
    pub display_name: String,
}

impl LocalIdentity {
    pub fn new(id: impl Into<ParticipantId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Gibt die Identitaet als Roster-Eintrag zurueck
    pub fn als_teilnehmer(&self) -> Participant {
        Participant {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
        }
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
