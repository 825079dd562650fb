//! huddle-core – Gemeinsame Typen, Fehlertypen und Ereignisse
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Huddle-Crates gemeinsam genutzt werden: Teilnehmer- und Kanal-IDs,
//! die Fehler-Taxonomie des Voice-Orchestrators und die Ereignisse, die an die
//! Anwendungsschicht gemeldet werden.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{HuddleError, Result};
pub use event::VoiceEvent;
pub use types::{ChannelId, LocalIdentity, Participant, ParticipantId};
