//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (ueberschreibt die Argumente):
//! - `HUDDLE_LOG_LEVEL`: Filter, z.B. `debug` oder `huddle_voice=trace,info`
//! - `HUDDLE_LOG_FORMAT`: `text` oder `json`

use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "HUDDLE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "HUDDLE_LOG_FORMAT";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Ungueltiges Log-Format: {0} (erlaubt: text, json)")]
    UngueltigesFormat(String),

    #[error("Ungueltiger Log-Filter '{filter}': {grund}")]
    UngueltigerFilter { filter: String, grund: String },

    #[error("Logging bereits initialisiert")]
    BereitsInitialisiert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            andere => Err(LoggingError::UngueltigesFormat(andere.to_string())),
        }
    }
}

/// Waehlt den Wert aus der Umgebung, sonst das Argument
fn wert_waehlen(env_wert: Option<String>, argument: &str) -> String {
    env_wert
        .filter(|w| !w.trim().is_empty())
        .unwrap_or_else(|| argument.to_string())
}

fn filter_bauen(filter: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(filter).map_err(|e| LoggingError::UngueltigerFilter {
        filter: filter.to_string(),
        grund: e.to_string(),
    })
}

/// Initialisiert das Logging-System
///
/// `HUDDLE_LOG_LEVEL` / `HUDDLE_LOG_FORMAT` haben Vorrang vor `level` und
/// `format`. Darf pro Prozess nur einmal erfolgreich aufgerufen werden.
pub fn logging_initialisieren(level: &str, format: &str) -> Result<(), LoggingError> {
    let level = wert_waehlen(std::env::var(ENV_LOG_LEVEL).ok(), level);
    let format: LogFormat = wert_waehlen(std::env::var(ENV_LOG_FORMAT).ok(), format).parse()?;
    let filter = filter_bauen(&level)?;

    let ergebnis = match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
    };
    ergebnis.map_err(|_| LoggingError::BereitsInitialisiert)?;

    tracing::debug!(filter = %level, ?format, "Logging initialisiert");
    Ok(())
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    format.parse::<LogFormat>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_gueltige_werte() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_gueltig(level));
        }
    }

    #[test]
    fn log_level_ungueltige_werte() {
        assert!(!log_level_gueltig("verbose"));
        assert!(!log_level_gueltig("INFO")); // Gross-/Kleinschreibung
        assert!(!log_level_gueltig(""));
    }

    #[test]
    fn log_format_parsen() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!(matches!(
            "xml".parse::<LogFormat>(),
            Err(LoggingError::UngueltigesFormat(f)) if f == "xml"
        ));
        assert!(!log_format_gueltig("JSON"));
    }

    #[test]
    fn umgebung_hat_vorrang() {
        assert_eq!(wert_waehlen(Some("debug".into()), "info"), "debug");
        assert_eq!(wert_waehlen(None, "info"), "info");
        assert_eq!(wert_waehlen(Some("  ".into()), "warn"), "warn");
    }

    #[test]
    fn filter_mit_modul_direktiven() {
        assert!(filter_bauen("huddle_voice=trace,info").is_ok());
        assert!(matches!(
            filter_bauen("huddle_voice=laut"),
            Err(LoggingError::UngueltigerFilter { .. })
        ));
    }

    #[test]
    fn zweite_initialisierung_schlaegt_fehl() {
        // Erster Aufruf kann durch andere Tests bereits erfolgt sein
        let _ = logging_initialisieren("warn", "text");
        assert!(matches!(
            logging_initialisieren("warn", "text"),
            Err(LoggingError::BereitsInitialisiert)
        ));
    }
}
