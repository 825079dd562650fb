//! Konfiguration des Voice-Orchestrators
//!
//! Alle Felder haben Standardwerte; eine leere TOML-Tabelle ergibt die
//! Standardkonfiguration.
//!
//! ```toml
//! ice_server_urls = ["stun:stun.l.google.com:19302"]
//! verbindungs_timeout_ms = 10000
//! staffelung_min_ms = 50
//! staffelung_max_ms = 250
//! ```

use huddle_core::HuddleError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Oeffentlicher STUN-Server (Standard)
pub const STANDARD_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Adress-Ermittlungs-Server (STUN) fuer den Verbindungsaufbau
    pub ice_server_urls: Vec<String>,
    /// Zeitlimit fuer den Aufbau einer Peer-Verbindung
    pub verbindungs_timeout_ms: u64,
    /// Untere Grenze der zufaelligen Staffelung beim Verbindungsaufbau
    pub staffelung_min_ms: u64,
    /// Obere Grenze der zufaelligen Staffelung beim Verbindungsaufbau
    pub staffelung_max_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            ice_server_urls: vec![STANDARD_ICE_SERVER.into()],
            verbindungs_timeout_ms: 10_000,
            staffelung_min_ms: 50,
            staffelung_max_ms: 250,
        }
    }
}

impl VoiceConfig {
    /// Parst und prueft eine TOML-Konfiguration
    pub fn aus_toml(inhalt: &str) -> Result<Self, HuddleError> {
        let config: Self = toml::from_str(inhalt)
            .map_err(|e| HuddleError::Configuration(format!("Ungueltiges TOML: {}", e)))?;
        config.pruefen()?;
        Ok(config)
    }

    pub fn pruefen(&self) -> Result<(), HuddleError> {
        if self.verbindungs_timeout_ms == 0 {
            return Err(HuddleError::Configuration(
                "verbindungs_timeout_ms muss groesser als 0 sein".into(),
            ));
        }
        if self.staffelung_min_ms > self.staffelung_max_ms {
            return Err(HuddleError::Configuration(format!(
                "staffelung_min_ms ({}) groesser als staffelung_max_ms ({})",
                self.staffelung_min_ms, self.staffelung_max_ms
            )));
        }
        Ok(())
    }

    pub fn verbindungs_timeout(&self) -> Duration {
        Duration::from_millis(self.verbindungs_timeout_ms)
    }

    /// Zufaellige Verzoegerung aus dem Staffelungsfenster
    pub fn staffelung(&self) -> Duration {
        let (min, max) = (self.staffelung_min_ms, self.staffelung_max_ms);
        if min >= max {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::random_range(min..=max))
    }
}
