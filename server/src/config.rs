//! Relay-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass das Relay ohne Konfigurationsdatei
//! lauffaehig ist.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Konfigurationsdatei '{pfad}' nicht lesbar: {quelle}")]
    NichtLesbar {
        pfad: String,
        #[source]
        quelle: std::io::Error,
    },

    #[error("Konfigurationsfehler in '{pfad}': {quelle}")]
    Syntax {
        pfad: String,
        #[source]
        quelle: toml::de::Error,
    },

    #[error("Ungueltiger Wert fuer {feld}: {grund}")]
    UngueltigerWert { feld: &'static str, grund: String },
}

/// Vollstaendige Relay-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Relay-Verhalten (Resync, Frame-Groesse)
    pub relay: RelayEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer den TCP-Listener
    pub bind_adresse: String,
    /// Port fuer den TCP-Listener
    pub port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 9988,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayEinstellungen {
    /// Intervall fuer den periodischen Roster-Resync in Sekunden (0 = aus)
    pub resync_intervall_sek: u64,
    /// Maximale Frame-Groesse in Bytes
    pub max_frame_size: usize,
}

impl Default for RelayEinstellungen {
    fn default() -> Self {
        Self {
            resync_intervall_sek: 30,
            max_frame_size: huddle_protocol::wire::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder Filter-Direktive, z.B. "info" oder "huddle_signaling=debug"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl RelayConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(pfad, &inhalt),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(quelle) => Err(ConfigError::NichtLesbar {
                pfad: pfad.to_string(),
                quelle,
            }),
        }
    }

    fn aus_toml(pfad: &str, inhalt: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(inhalt).map_err(|quelle| ConfigError::Syntax {
            pfad: pfad.to_string(),
            quelle,
        })?;
        config.validieren()?;
        Ok(config)
    }

    pub fn validieren(&self) -> Result<(), ConfigError> {
        if self.relay.max_frame_size == 0 {
            return Err(ConfigError::UngueltigerWert {
                feld: "relay.max_frame_size",
                grund: "muss groesser als 0 sein".into(),
            });
        }
        if !huddle_observability::logging::log_format_gueltig(&self.logging.format) {
            return Err(ConfigError::UngueltigerWert {
                feld: "logging.format",
                grund: format!("'{}' (erlaubt: text, json)", self.logging.format),
            });
        }
        self.bind_adresse()?;
        Ok(())
    }

    /// Gibt die vollstaendige Bind-Adresse fuer TCP zurueck
    pub fn bind_adresse(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::UngueltigerWert {
                feld: "netzwerk.bind_adresse",
                grund: e.to_string(),
            })
    }

    /// Resync-Intervall, `None` wenn deaktiviert
    pub fn resync_intervall(&self) -> Option<Duration> {
        match self.relay.resync_intervall_sek {
            0 => None,
            sek => Some(Duration::from_secs(sek)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_config_ist_valide() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.netzwerk.port, 9988);
        assert_eq!(cfg.relay.resync_intervall_sek, 30);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validieren().is_ok());
    }

    #[test]
    fn bind_adresse() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.bind_adresse().unwrap().to_string(), "0.0.0.0:9988");
    }

    #[test]
    fn config_aus_toml_string() {
        let toml = r#"
            [netzwerk]
            port = 10000

            [relay]
            resync_intervall_sek = 0
        "#;
        let cfg = RelayConfig::aus_toml("test.toml", toml).unwrap();
        assert_eq!(cfg.netzwerk.port, 10000);
        assert_eq!(cfg.resync_intervall(), None);
        // Nicht angegebene Felder behalten Standardwerte
        assert_eq!(cfg.netzwerk.bind_adresse, "0.0.0.0");
        assert_eq!(cfg.logging.format, "text");
    }

    #[test]
    fn ungueltiges_log_format_wird_abgelehnt() {
        let toml = r#"
            [logging]
            format = "xml"
        "#;
        assert!(matches!(
            RelayConfig::aus_toml("test.toml", toml),
            Err(ConfigError::UngueltigerWert { feld: "logging.format", .. })
        ));
    }

    #[test]
    fn ungueltige_bind_adresse_wird_abgelehnt() {
        let mut cfg = RelayConfig::default();
        cfg.netzwerk.bind_adresse = "kein-host".into();
        assert!(cfg.bind_adresse().is_err());
    }

    #[test]
    fn syntaxfehler_nennt_pfad() {
        let fehler = RelayConfig::aus_toml("relay.toml", "[netzwerk\nport = 1").unwrap_err();
        assert!(fehler.to_string().contains("relay.toml"));
    }

    #[test]
    fn fehlende_datei_liefert_standardwerte() {
        let cfg = RelayConfig::laden("/nicht/vorhanden/relay.toml").unwrap();
        assert_eq!(cfg.netzwerk.port, 9988);
    }
}
