//! huddle-voice – Orchestrator fuer Voice-Kanaele
//!
//! Baut eine Full-Mesh-Konferenz zwischen allen Teilnehmern eines Kanals
//! auf: jeder Teilnehmer haelt genau eine Peer-Verbindung zu jedem anderen.
//! Koordiniert wird ueber das Signaling-Relay, Audio laeuft direkt.
//!
//! ## Module
//! - [`coordinator`] – Beitritt, Roster, Verdrahtung (Orchestrator-Task)
//! - [`negotiation`] – Offer/Answer, Glare-Aufloesung, Kandidaten-Puffer
//! - [`registry`] – alle Peer-Sitzungen einer Mitgliedschaft
//! - [`session`] – Zustand einer Peer-Sitzung
//! - [`peer`] – Plattform-Schnittstelle der Peer-Verbindungen
//! - [`channel`] – Facade fuer die Anwendungsschicht
//! - [`config`] – Konfiguration (ICE-Server, Zeitlimit, Staffelung)
//! - [`sim`] – simuliertes Peer-Netz

pub mod channel;
pub mod config;
pub mod coordinator;
mod inbox;
mod negotiation;
pub mod peer;
pub mod registry;
pub mod session;
pub mod sim;
mod worker;

pub use channel::{VoiceChannel, VoiceChannelState};
pub use config::VoiceConfig;
pub use coordinator::{MembershipCoordinator, MembershipState, MitgliedschaftStatus, Plattform};
pub use peer::{PeerConnection, PeerConnectionFactory, PeerError, PeerEventSender, TransportState};
pub use registry::PeerSessionRegistry;
pub use session::{ConnectionState, NegotiationState, PeerSession, Role, SessionInfo};
