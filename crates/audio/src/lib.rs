//! huddle-audio – Lokale Aufnahme und Wiedergabe
//!
//! - `LocalMediaController`: Mikrofon anfordern/freigeben, Mute in-place
//! - `RemoteAudioSink` / `SinkSet`: Wiedergabe pro Peer, Deafen
//! - `VolumeController`: Deafen + Lautstaerke pro Teilnehmer
//! - Plattform-Schnittstellen `CaptureDevice` / `AudioOutput`
//! - `sim`: In-Memory-Geraete fuer Tests

pub mod capture;
pub mod error;
pub mod local;
pub mod playback;
pub mod sim;
pub mod volume;

// Bequeme Re-Exporte der wichtigsten Typen
pub use capture::{CaptureConstraints, CaptureDevice, LocalAudioTrack, SharedTrack};
pub use error::{AudioError, AudioResult};
pub use local::LocalMediaController;
pub use playback::{AudioOutput, PlaybackHandle, RemoteAudioSink, RemoteAudioTrack, SinkSet};
pub use volume::VolumeController;
