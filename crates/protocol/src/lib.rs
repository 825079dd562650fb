//! huddle-protocol – Signaling-Nachrichtenformat
//!
//! Dieses Crate definiert alle Nachrichten, die zwischen Voice-Client und
//! Relay ausgetauscht werden, sowie den Frame-Codec fuer Stream-Transporte.
//!
//! - [`signal`] – Wire-Format (`WireMessage`) und typisierte `SignalingMessage`
//! - [`wire`] – Laengen-praefixierte JSON-Frames fuer TCP

pub mod signal;
pub mod wire;

pub use signal::{
    IceCandidate, ProtocolError, SdpType, SessionDescription, SignalingMessage, WireMessage,
    WireType,
};
pub use wire::FrameCodec;
