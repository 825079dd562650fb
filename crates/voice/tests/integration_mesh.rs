//! Integration-Tests: mehrere Orchestratoren ueber ein In-Memory-Relay

use huddle_audio::sim::{SimMicrophone, SimOutput};
use huddle_core::types::{ChannelId, LocalIdentity, ParticipantId};
use huddle_core::VoiceEvent;
use huddle_signaling::Relay;
use huddle_voice::sim::SimNetwork;
use huddle_voice::{
    ConnectionState, MembershipCoordinator, MembershipState, Plattform, Role, VoiceConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Teilnehmer {
    id: ParticipantId,
    k: MembershipCoordinator,
    mikro: Arc<SimMicrophone>,
    ausgabe: Arc<SimOutput>,
    ereignisse: broadcast::Receiver<VoiceEvent>,
}

fn config() -> VoiceConfig {
    VoiceConfig {
        staffelung_min_ms: 0,
        staffelung_max_ms: 20,
        ..Default::default()
    }
}

async fn teilnehmer(relay: &Relay, netz: &SimNetwork, id: &str) -> Teilnehmer {
    let mikro = Arc::new(SimMicrophone::new());
    let ausgabe = Arc::new(SimOutput::new());
    let k = MembershipCoordinator::new(
        config(),
        Plattform {
            connector: Arc::new(relay.connector()),
            mikrofon: mikro.clone(),
            ausgabe: ausgabe.clone(),
            peer_fabrik: Arc::new(netz.fabrik(id)),
        },
    )
    .expect("Konfiguration ungueltig");
    k.identitaet_setzen(LocalIdentity::new(id, id.to_uppercase()))
        .await
        .expect("Identitaet konnte nicht gesetzt werden");
    let ereignisse = k.ereignisse();
    Teilnehmer {
        id: ParticipantId::new(id),
        k,
        mikro,
        ausgabe,
        ereignisse,
    }
}

/// Wartet bis `bedingung` gilt (hoechstens `ms` Millisekunden)
async fn warten_bis(ms: u64, mut bedingung: impl FnMut() -> bool) -> bool {
    let ende = tokio::time::Instant::now() + Duration::from_millis(ms);
    while tokio::time::Instant::now() < ende {
        if bedingung() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bedingung()
}

fn voll_verbunden(t: &Teilnehmer, peers: usize) -> bool {
    let s = t.k.status();
    s.sitzungen == peers && s.verbunden == peers
}

/// Wartet auf ein bestimmtes Ereignis
async fn ereignis_abwarten(
    rx: &mut broadcast::Receiver<VoiceEvent>,
    ms: u64,
    gesucht: impl Fn(&VoiceEvent) -> bool,
) -> bool {
    tokio::time::timeout(Duration::from_millis(ms), async {
        loop {
            match rx.recv().await {
                Ok(e) if gesucht(&e) => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    })
    .await
    .unwrap_or(false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mesh_mit_vier_teilnehmern_ist_vollstaendig() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let mut alle = Vec::new();
    for id in ["c", "a", "d", "b"] {
        let t = teilnehmer(&relay, &netz, id).await;
        t.k.join("42").await.unwrap();
        alle.push(t);
    }

    for t in &alle {
        assert!(warten_bis(5_000, || voll_verbunden(t, 3)).await, "{} nicht voll verbunden", t.id);
    }

    for t in &alle {
        let sitzungen = t.k.sessions().await.unwrap();
        assert_eq!(sitzungen.len(), 3);
        assert!(sitzungen.iter().all(|s| s.participant_id != t.id));
        assert!(sitzungen.iter().all(|s| s.connection_state == ConnectionState::Connected));
        assert_eq!(t.k.status().user_count(), 4);
        assert!(warten_bis(1_000, || t.ausgabe.aktive() == 3).await);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rollen_sind_fuer_jedes_paar_eindeutig() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let mut alle = Vec::new();
    for id in ["anna", "ben", "carl"] {
        let t = teilnehmer(&relay, &netz, id).await;
        t.k.join("42").await.unwrap();
        alle.push(t);
    }
    for t in &alle {
        assert!(warten_bis(5_000, || voll_verbunden(t, 2)).await);
    }

    for x in &alle {
        for s in x.k.sessions().await.unwrap() {
            let erwartet = if x.id < s.participant_id {
                Role::Initiator
            } else {
                Role::Responder
            };
            assert_eq!(s.role, erwartet, "{} -> {}", x.id, s.participant_id);
        }
    }
    // Genau ein Offer und eine Answer pro Paar
    let stat = relay.statistik();
    assert_eq!(stat.offers, 3);
    assert_eq!(stat.answers, 3);
}

#[tokio::test]
async fn kanal_42_a_initiiert_gegenueber_b() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let mut a = teilnehmer(&relay, &netz, "a").await;
    let mut b = teilnehmer(&relay, &netz, "b").await;

    a.k.join("42").await.unwrap();
    assert!(warten_bis(500, || relay.roster(&ChannelId::new("42")).len() == 1).await);
    assert_eq!(a.k.status().user_count(), 1);

    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && voll_verbunden(&b, 1)).await);

    let sa = a.k.sessions().await.unwrap();
    let sb = b.k.sessions().await.unwrap();
    assert_eq!(sa.len(), 1);
    assert_eq!(sb.len(), 1);
    assert_eq!(sa[0].role, Role::Initiator);
    assert_eq!(sb[0].role, Role::Responder);
    assert_eq!(relay.statistik().offers, 1);
    assert_eq!(relay.statistik().answers, 1);

    assert!(ereignis_abwarten(&mut a.ereignisse, 500, |e| {
        matches!(e, VoiceEvent::PeerVerbunden { participant_id } if participant_id.as_str() == "b")
    })
    .await);
    assert!(ereignis_abwarten(&mut b.ereignisse, 500, |e| {
        matches!(e, VoiceEvent::PeerVerbunden { participant_id } if participant_id.as_str() == "a")
    })
    .await);
}

#[tokio::test]
async fn kandidaten_werden_in_sendereihenfolge_angewendet() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    a.k.join("42").await.unwrap();
    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && voll_verbunden(&b, 1)).await);

    // Die Kandidaten von a folgen seinem Offer und gehen bei b in Reihenfolge ein
    let bei_b = netz.angewendete_kandidaten(&b.id, &a.id);
    assert_eq!(bei_b.len(), 2);
    assert!(bei_b[0].candidate.split(' ').nth(1) == Some("1"));
    assert!(bei_b[1].candidate.split(' ').nth(1) == Some("2"));
    assert_eq!(netz.angewendete_kandidaten(&a.id, &b.id).len(), 2);
}

#[tokio::test]
async fn mute_loest_keine_neuverhandlung_aus() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    a.k.join("42").await.unwrap();
    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && voll_verbunden(&b, 1)).await);

    let vorher = relay.statistik().verhandlungen();
    let generation = a.k.sessions().await.unwrap()[0].generation;
    for _ in 0..10 {
        a.k.mute().await.unwrap();
        assert!(a.k.status().stumm);
        a.k.unmute().await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(relay.statistik().verhandlungen(), vorher);
    let sitzung = &a.k.sessions().await.unwrap()[0];
    assert_eq!(sitzung.generation, generation);
    assert_eq!(sitzung.connection_state, ConnectionState::Connected);
    assert_eq!(a.mikro.anforderungen(), 1);
}

#[tokio::test]
async fn deafen_setzt_nur_die_wiedergabe_auf_null() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    a.k.join("42").await.unwrap();
    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && a.ausgabe.spielt(&b.id)).await);

    a.k.set_participant_volume("b", 1.5).await.unwrap();
    assert_eq!(a.ausgabe.lautstaerke(&b.id), Some(1.5));

    a.k.deafen().await.unwrap();
    assert_eq!(a.ausgabe.lautstaerke(&b.id), Some(0.0));
    assert!(a.ausgabe.spielt(&b.id));
    assert!(voll_verbunden(&a, 1));

    a.k.undeafen().await.unwrap();
    assert_eq!(a.ausgabe.lautstaerke(&b.id), Some(1.5));
    assert_eq!(a.ausgabe.erstellt(&b.id), 1);
}

#[tokio::test]
async fn leave_waehrend_verhandlung_raeumt_alles_ab() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    // Blockiert: Verhandlung bleibt in Connecting haengen
    netz.blockieren(&a.id, &b.id);

    a.k.join("42").await.unwrap();
    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || a.k.status().sitzungen == 1 && b.k.status().sitzungen == 1).await);
    assert_eq!(a.k.status().verbunden, 0);

    a.k.leave().await.unwrap();
    a.k.leave().await.unwrap();

    assert!(a.k.sessions().await.unwrap().is_empty());
    assert_eq!(a.k.status().zustand, MembershipState::Idle);
    assert_eq!(a.mikro.aktive_aufnahmen(), 0);
    assert!(warten_bis(500, || netz.offene_verbindungen(&a.id) == 0).await);

    // Die Gegenseite entfernt a ueber user-left
    assert!(warten_bis(1_000, || b.k.status().sitzungen == 0).await);
    assert_eq!(b.k.status().user_count(), 1);
}

#[tokio::test]
async fn verlorene_relay_verbindung_betrifft_nur_diesen_peer() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let mut a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    let c = teilnehmer(&relay, &netz, "c").await;
    for t in [&a, &b, &c] {
        t.k.join("42").await.unwrap();
    }
    for t in [&a, &b, &c] {
        assert!(warten_bis(3_000, || voll_verbunden(t, 2)).await);
    }

    assert!(relay.trennen(&a.id));

    assert!(ereignis_abwarten(&mut a.ereignisse, 1_000, |e| matches!(e, VoiceEvent::RelayGetrennt { .. })).await);
    assert_eq!(a.k.status().zustand, MembershipState::Disconnected);
    assert_eq!(a.mikro.aktive_aufnahmen(), 0);
    assert!(a.k.sessions().await.unwrap().is_empty());

    assert!(warten_bis(1_000, || b.k.status().user_count() == 2).await);
    let sitzungen = b.k.sessions().await.unwrap();
    assert_eq!(sitzungen.len(), 1);
    assert_eq!(sitzungen[0].participant_id, c.id);
    assert_eq!(sitzungen[0].connection_state, ConnectionState::Connected);
    assert!(voll_verbunden(&c, 1));
}

#[tokio::test]
async fn wiederbeitritt_baut_die_sitzung_neu_auf() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    a.k.join("42").await.unwrap();
    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && voll_verbunden(&b, 1)).await);

    b.k.leave().await.unwrap();
    assert!(warten_bis(1_000, || a.k.status().sitzungen == 0).await);
    assert_eq!(b.mikro.aktive_aufnahmen(), 0);

    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && voll_verbunden(&b, 1)).await);
    assert_eq!(b.mikro.anforderungen(), 2);
    assert_eq!(netz.verbindungen_erstellt(&a.id, &b.id), 2);
}

#[tokio::test]
async fn getrennte_verbindung_wird_einmal_neu_aufgebaut() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    a.k.join("42").await.unwrap();
    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && voll_verbunden(&b, 1)).await);

    assert_eq!(netz.trennen(&a.id, &b.id), 2);

    assert!(warten_bis(2_000, || {
        netz.verbindungen_erstellt(&a.id, &b.id) == 2
            && netz.verbindungen_erstellt(&b.id, &a.id) == 2
            && voll_verbunden(&a, 1)
            && voll_verbunden(&b, 1)
    })
    .await);
    for t in [&a, &b] {
        let sitzungen = t.k.sessions().await.unwrap();
        assert_eq!(sitzungen.len(), 1);
        assert_eq!(sitzungen[0].connection_state, ConnectionState::Connected);
    }
}

#[tokio::test]
async fn zweiter_ausfall_nach_erholung_wird_erneut_aufgebaut() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let mut a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    a.k.join("42").await.unwrap();
    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && voll_verbunden(&b, 1)).await);

    for runde in 2..=3 {
        assert_eq!(netz.trennen(&a.id, &b.id), 2);
        assert!(
            warten_bis(2_000, || {
                netz.verbindungen_erstellt(&a.id, &b.id) == runde
                    && voll_verbunden(&a, 1)
                    && voll_verbunden(&b, 1)
            })
            .await,
            "Runde {} nicht wieder verbunden",
            runde
        );
    }
    assert!(!ereignis_abwarten(&mut a.ereignisse, 100, |e| {
        matches!(e, VoiceEvent::TeilnehmerUnerreichbar { .. })
    })
    .await);
}

#[tokio::test]
async fn einseitiger_ausfall_wird_vom_initiator_neu_verhandelt() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    a.k.join("42").await.unwrap();
    b.k.join("42").await.unwrap();
    assert!(warten_bis(2_000, || voll_verbunden(&a, 1) && voll_verbunden(&b, 1)).await);

    // Nur a bemerkt den Ausfall, b ersetzt seine Verbindung fuer das neue Offer
    assert_eq!(netz.einseitig_trennen(&a.id, &b.id), 1);

    assert!(warten_bis(2_000, || {
        netz.verbindungen_erstellt(&a.id, &b.id) == 2
            && netz.verbindungen_erstellt(&b.id, &a.id) == 2
            && voll_verbunden(&a, 1)
            && voll_verbunden(&b, 1)
    })
    .await);
    assert_eq!(b.k.sessions().await.unwrap()[0].generation, 2);
    assert_eq!(relay.statistik().offers, 2);
}

#[tokio::test(start_paused = true)]
async fn blockiertes_paar_wird_nach_neuaufbau_aufgegeben() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let mut a = teilnehmer(&relay, &netz, "a").await;
    let mut b = teilnehmer(&relay, &netz, "b").await;
    let c = teilnehmer(&relay, &netz, "c").await;
    netz.blockieren(&a.id, &b.id);

    for t in [&a, &b, &c] {
        t.k.join("42").await.unwrap();
    }

    let unerreichbar = |gesucht: &'static str| {
        move |e: &VoiceEvent| {
            matches!(e, VoiceEvent::TeilnehmerUnerreichbar { participant_id } if participant_id.as_str() == gesucht)
        }
    };
    assert!(ereignis_abwarten(&mut a.ereignisse, 60_000, unerreichbar("b")).await);
    assert!(ereignis_abwarten(&mut b.ereignisse, 60_000, unerreichbar("a")).await);

    // Genau ein Neuaufbau
    assert_eq!(netz.verbindungen_erstellt(&a.id, &b.id), 2);

    // Mitgliedschaft und die uebrigen Sitzungen bleiben bestehen
    for t in [&a, &b] {
        let s = t.k.status();
        assert_eq!(s.zustand, MembershipState::Joined);
        assert_eq!(s.user_count(), 3);
        assert_eq!(s.sitzungen, 1);
        assert_eq!(s.verbunden, 1);
    }
    assert!(voll_verbunden(&c, 2));
}

#[tokio::test]
async fn verweigertes_mikrofon_erzeugt_keine_mitgliedschaft() {
    let relay = Relay::neu();
    let netz = SimNetwork::new();
    let a = teilnehmer(&relay, &netz, "a").await;
    let b = teilnehmer(&relay, &netz, "b").await;
    b.k.join("42").await.unwrap();
    a.mikro.verweigern(true);

    assert!(a.k.join("42").await.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(relay.roster(&ChannelId::new("42")).len(), 1);
    assert_eq!(b.k.status().user_count(), 1);
    assert_eq!(b.k.status().sitzungen, 0);
}
