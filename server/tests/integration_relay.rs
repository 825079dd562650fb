//! Integrationstests: Relay-Dienst ueber echtes TCP

use huddle_audio::sim::{SimMicrophone, SimOutput};
use huddle_core::types::{ChannelId, Participant, ParticipantId};
use huddle_protocol::{SessionDescription, SignalingMessage};
use huddle_relay::config::RelayConfig;
use huddle_relay::Server;
use huddle_signaling::{RelayConnector, RelayKanal, TcpRelayConnector};
use huddle_voice::sim::SimNetwork;
use huddle_voice::{ConnectionState, Plattform, VoiceChannel, VoiceConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

struct Laufend {
    adresse: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<anyhow::Result<()>>,
}

async fn relay_starten(resync_sek: u64) -> Laufend {
    let mut config = RelayConfig::default();
    config.netzwerk.bind_adresse = "127.0.0.1".into();
    config.netzwerk.port = 0;
    config.relay.resync_intervall_sek = resync_sek;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (gebunden_tx, gebunden_rx) = oneshot::channel();
    let task = tokio::spawn(Server::neu(config).starten(shutdown_rx, Some(gebunden_tx)));
    let adresse = gebunden_rx.await.unwrap();
    Laufend {
        adresse,
        shutdown_tx,
        task,
    }
}

async fn beitreten(adresse: SocketAddr, id: &str) -> RelayKanal {
    let kanal = TcpRelayConnector::neu(adresse.to_string())
        .verbinden()
        .await
        .unwrap();
    kanal
        .ausgehend
        .send(SignalingMessage::Join {
            channel_id: ChannelId::new("42"),
            participant: Participant::new(id, id.to_uppercase()),
        })
        .unwrap();
    kanal
}

async fn naechste(kanal: &mut RelayKanal) -> SignalingMessage {
    tokio::time::timeout(Duration::from_secs(2), kanal.eingehend.recv())
        .await
        .expect("Zeitlimit beim Warten auf Nachricht")
        .expect("Verbindung geschlossen")
}

#[tokio::test]
async fn offer_wird_ueber_tcp_weitergeleitet() {
    let relay = relay_starten(0).await;
    let mut a = beitreten(relay.adresse, "a").await;
    assert!(matches!(naechste(&mut a).await, SignalingMessage::RosterSnapshot { .. }));

    let mut b = beitreten(relay.adresse, "b").await;
    match naechste(&mut b).await {
        SignalingMessage::RosterSnapshot { participants, .. } => assert_eq!(participants.len(), 2),
        andere => panic!("RosterSnapshot erwartet, erhalten: {andere:?}"),
    }
    assert!(matches!(
        naechste(&mut a).await,
        SignalingMessage::UserJoined { ref participant, .. } if participant.id == ParticipantId::new("b")
    ));

    a.ausgehend
        .send(SignalingMessage::Offer {
            channel_id: ChannelId::new("42"),
            from: ParticipantId::new("a"),
            to: ParticipantId::new("b"),
            description: SessionDescription::offer("v=0"),
        })
        .unwrap();
    match naechste(&mut b).await {
        SignalingMessage::Offer { from, description, .. } => {
            assert_eq!(from, ParticipantId::new("a"));
            assert_eq!(description.sdp, "v=0");
        }
        andere => panic!("Offer erwartet, erhalten: {andere:?}"),
    }

    // Verbindungsabbruch von a wird b als UserLeft gemeldet
    drop(a);
    assert!(matches!(
        naechste(&mut b).await,
        SignalingMessage::UserLeft { ref participant_id, .. } if participant_id == &ParticipantId::new("a")
    ));

    let _ = relay.shutdown_tx.send(true);
    relay.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn resync_sendet_roster_periodisch() {
    let relay = relay_starten(1).await;
    let mut a = beitreten(relay.adresse, "a").await;
    assert!(matches!(naechste(&mut a).await, SignalingMessage::RosterSnapshot { .. }));

    // Ohne weitere Aktivitaet kommt der naechste Snapshot vom Resync
    let resync = tokio::time::timeout(Duration::from_secs(3), a.eingehend.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(resync, SignalingMessage::RosterSnapshot { ref participants, .. } if participants.len() == 1));

    let _ = relay.shutdown_tx.send(true);
    relay.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn belegter_port_liefert_fehler() {
    let relay = relay_starten(0).await;
    let mut config = RelayConfig::default();
    config.netzwerk.bind_adresse = "127.0.0.1".into();
    config.netzwerk.port = relay.adresse.port();

    let (_tx, rx) = watch::channel(false);
    let ergebnis = Server::neu(config).starten(rx, None).await;
    assert!(ergebnis.is_err());

    let _ = relay.shutdown_tx.send(true);
    relay.task.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zwei_kanaele_verbinden_sich_ueber_tcp() {
    let relay = relay_starten(0).await;
    let netz = SimNetwork::new();
    let kanal = |id: &str| {
        VoiceChannel::new(
            VoiceConfig::default(),
            Plattform {
                connector: Arc::new(TcpRelayConnector::neu(relay.adresse.to_string())),
                mikrofon: Arc::new(SimMicrophone::new()),
                ausgabe: Arc::new(SimOutput::new()),
                peer_fabrik: Arc::new(netz.fabrik(id)),
            },
        )
        .unwrap()
    };
    let a = kanal("a");
    let b = kanal("b");

    a.connect("42", "Lobby", "a", "Anna").await.unwrap();
    b.connect("42", "Lobby", "b", "Ben").await.unwrap();

    let verbunden = |vc: &VoiceChannel| vc.koordinator().status().verbunden == 1;
    let ende = tokio::time::Instant::now() + Duration::from_secs(5);
    while !(verbunden(&a) && verbunden(&b)) {
        assert!(tokio::time::Instant::now() < ende, "Mesh nicht rechtzeitig verbunden");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(a.state().user_count, 2);
    assert_eq!(b.state().user_count, 2);
    let sitzungen = a.koordinator().sessions().await.unwrap();
    assert_eq!(sitzungen[0].connection_state, ConnectionState::Connected);

    a.disconnect().await.unwrap();
    b.disconnect().await.unwrap();
    let _ = relay.shutdown_tx.send(true);
    relay.task.await.unwrap().unwrap();
}
