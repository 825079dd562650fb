//! VoiceChannel – Schnittstelle zur Anwendungsschicht (UI)
//!
//! Bildet den Mitgliedschafts-Status auf die Felder ab, die eine
//! Oberflaeche braucht, und bietet die vier Aktionen `connect`,
//! `disconnect`, `toggle_mute` und `toggle_deafen`.

use huddle_core::types::{ChannelId, LocalIdentity, ParticipantId};
use huddle_core::{Result, VoiceEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::VoiceConfig;
use crate::coordinator::{MembershipCoordinator, MembershipState, MitgliedschaftStatus, Plattform};

/// Zustand wie ihn die Oberflaeche anzeigt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceChannelState {
    pub is_connected: bool,
    pub is_connecting: bool,
    /// Teilnehmer im Kanal inklusive lokal
    pub user_count: usize,
    /// ID der lokalen Aufnahme-Spur
    pub local_stream: Option<String>,
    pub is_muted: bool,
    pub is_deafened: bool,
    pub channel_id: Option<ChannelId>,
    pub channel_name: Option<String>,
}

fn abbilden(status: &MitgliedschaftStatus, kanal_name: Option<String>) -> VoiceChannelState {
    VoiceChannelState {
        is_connected: status.zustand == MembershipState::Joined,
        is_connecting: status.zustand == MembershipState::Joining,
        user_count: status.user_count(),
        local_stream: status.lokale_spur.clone(),
        is_muted: status.stumm,
        is_deafened: status.taub,
        channel_id: status.channel_id.clone(),
        channel_name: status.channel_id.as_ref().and(kanal_name),
    }
}

pub struct VoiceChannel {
    koordinator: MembershipCoordinator,
    kanal_name: Arc<Mutex<Option<String>>>,
    state_tx: Arc<watch::Sender<VoiceChannelState>>,
    abbild: JoinHandle<()>,
}

impl VoiceChannel {
    /// Erstellt Orchestrator und Facade (benoetigt eine laufende Tokio-Runtime)
    pub fn new(config: VoiceConfig, plattform: Plattform) -> Result<Self> {
        Ok(Self::mit_koordinator(MembershipCoordinator::new(config, plattform)?))
    }

    pub fn mit_koordinator(koordinator: MembershipCoordinator) -> Self {
        let kanal_name = Arc::new(Mutex::new(None));
        let (state_tx, _) = watch::channel(VoiceChannelState::default());
        let state_tx = Arc::new(state_tx);

        let mut status_rx = koordinator.status_abonnieren();
        let name = Arc::clone(&kanal_name);
        let tx = Arc::clone(&state_tx);
        let abbild = tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let neu = abbilden(&status_rx.borrow_and_update(), name.lock().clone());
                tx.send_if_modified(|alt| {
                    if *alt == neu {
                        return false;
                    }
                    *alt = neu;
                    true
                });
            }
        });

        Self {
            koordinator,
            kanal_name,
            state_tx,
            abbild,
        }
    }

    /// Tritt einem Kanal bei; eine bestehende Verbindung wird vorher getrennt
    pub async fn connect(
        &self,
        channel_id: impl Into<ChannelId>,
        channel_name: impl Into<String>,
        user_id: impl Into<ParticipantId>,
        user_name: impl Into<String>,
    ) -> Result<()> {
        if self.koordinator.status().zustand != MembershipState::Idle {
            self.disconnect().await?;
        }
        self.koordinator
            .identitaet_setzen(LocalIdentity::new(user_id, user_name))
            .await?;
        *self.kanal_name.lock() = Some(channel_name.into());

        let ergebnis = self.koordinator.join(channel_id).await;
        if ergebnis.is_err() {
            *self.kanal_name.lock() = None;
        }
        ergebnis
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.koordinator.leave().await?;
        *self.kanal_name.lock() = None;
        Ok(())
    }

    /// Schaltet Mute um und gibt den neuen Zustand zurueck
    pub async fn toggle_mute(&self) -> Result<bool> {
        if self.koordinator.status().stumm {
            self.koordinator.unmute().await?;
            Ok(false)
        } else {
            self.koordinator.mute().await?;
            Ok(true)
        }
    }

    /// Schaltet Deafen um und gibt den neuen Zustand zurueck
    pub async fn toggle_deafen(&self) -> Result<bool> {
        if self.koordinator.status().taub {
            self.koordinator.undeafen().await?;
            Ok(false)
        } else {
            self.koordinator.deafen().await?;
            Ok(true)
        }
    }

    /// Aktueller Zustand (direkt aus dem Orchestrator-Status)
    pub fn state(&self) -> VoiceChannelState {
        abbilden(&self.koordinator.status(), self.kanal_name.lock().clone())
    }

    pub fn abonnieren(&self) -> watch::Receiver<VoiceChannelState> {
        self.state_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<VoiceEvent> {
        self.koordinator.ereignisse()
    }

    pub fn koordinator(&self) -> &MembershipCoordinator {
        &self.koordinator
    }
}

impl Drop for VoiceChannel {
    fn drop(&mut self) {
        self.abbild.abort();
    }
}
