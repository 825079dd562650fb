//! # huddle-observability
//!
//! Structured Logging fuer alle Huddle-Binaries via tracing-subscriber
//! (Text oder JSON, Filter per Umgebungsvariable).

pub mod logging;

pub use logging::{logging_initialisieren, LogFormat, LoggingError};
