//! huddle-signaling – Signaling-Link und Referenz-Relay
//!
//! ## Architektur
//!
//! ```text
//! Client                                  Relay
//! SignalingLink                           RelayServer (TCP Listener)
//!     |                                       |
//!     v                                       v
//! RelayConnector ---- FrameCodec/TCP ---> Relay (Kanal-Mitglieder, Weiterleitung)
//!  (TcpRelayConnector | SpeicherConnector)
//! ```
//!
//! Das Relay leitet nur Signaling-Nachrichten weiter, nie Medien.

pub mod error;
pub mod link;
pub mod relay;
pub mod tcp;
pub mod transport;

// Bequeme Re-Exporte
pub use error::{SignalingError, SignalingResult};
pub use link::{LinkEvent, LinkSender, SignalingLink};
pub use relay::{Relay, RelayStatistik, SpeicherConnector};
pub use tcp::RelayServer;
pub use transport::{RelayConnector, RelayKanal, TcpRelayConnector};
