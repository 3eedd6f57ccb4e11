//! Integrationstests: vollstaendiger Rufaufbau ueber echte TCP-Verbindungen
//!
//! Startet den SignalingServer auf einem freien Port und spielt die
//! Szenarien mit echten Client-Sockets durch: Annahme, Ablehnung,
//! unerreichbares Ziel und Verbindungsabbruch.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;

use visavis_core::types::UserId;
use visavis_protocol::control::{
    AnnounceRequest, CallAcceptRequest, CallInitiateRequest, CallRejectRequest, ControlMessage,
    ControlPayload,
};
use visavis_protocol::wire::FrameCodec;
use visavis_signaling::server_state::{SignalingConfig, SignalingState};
use visavis_signaling::tcp::SignalingServer;

type ClientFramed = Framed<TcpStream, FrameCodec>;

const WARTEZEIT: Duration = Duration::from_secs(5);

/// Startet einen Server auf einem freien Port und gibt Adresse + Shutdown zurueck
async fn server_starten() -> (SocketAddr, watch::Sender<bool>) {
    let config = SignalingConfig {
        // Keepalive weit weg vom Testfenster halten
        keepalive_sek: 300,
        verbindungs_timeout_sek: 600,
        ..SignalingConfig::default()
    };
    let state = SignalingState::neu(config);
    let server = SignalingServer::binden(state, "127.0.0.1:0".parse().unwrap())
        .await
        .expect("Server muss binden");
    let adresse = server.lokale_adresse();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = server.starten(shutdown_rx).await;
    });

    (adresse, shutdown_tx)
}

/// Verbindet einen Client und meldet ihn unter der gegebenen Identitaet an
///
/// Wartet auf die Bestaetigung, damit die Anmelde-Reihenfolge zwischen
/// mehreren Clients deterministisch ist.
async fn verbinden_und_anmelden(adresse: SocketAddr, user: &str, name: &str) -> ClientFramed {
    let stream = TcpStream::connect(adresse).await.expect("Connect muss klappen");
    let mut framed = Framed::new(stream, FrameCodec::neu());

    framed
        .send(ControlMessage::neu(
            1,
            ControlPayload::Announce(AnnounceRequest {
                user_id: UserId::neu(user),
                display_name: name.into(),
            }),
        ))
        .await
        .expect("Announce muss gesendet werden");

    erwarte(&mut framed, "AnnounceOk", |p| {
        matches!(p, ControlPayload::AnnounceOk(_))
    })
    .await;

    framed
}

/// Liest Frames bis eines dem Filter entspricht (Pings werden uebersprungen)
async fn erwarte<F>(framed: &mut ClientFramed, beschreibung: &str, filter: F) -> ControlPayload
where
    F: Fn(&ControlPayload) -> bool,
{
    let ergebnis = tokio::time::timeout(WARTEZEIT, async {
        loop {
            let frame = framed
                .next()
                .await
                .unwrap_or_else(|| panic!("Verbindung zu frueh getrennt ({})", beschreibung))
                .expect("Frame-Lesefehler");
            if matches!(frame.payload, ControlPayload::Ping(_)) {
                continue;
            }
            if filter(&frame.payload) {
                return frame.payload;
            }
        }
    })
    .await;

    ergebnis.unwrap_or_else(|_| panic!("Timeout beim Warten auf: {}", beschreibung))
}

/// Wartet bis ein PresenceChanged genau die erwartete Benutzermenge traegt
async fn erwarte_praesenz(framed: &mut ClientFramed, erwartet: &[&str]) {
    let mut erwartet: Vec<UserId> = erwartet.iter().map(|u| UserId::neu(*u)).collect();
    erwartet.sort();

    erwarte(framed, "PresenceChanged", |payload| match payload {
        ControlPayload::PresenceChanged(ev) => ev.online == erwartet,
        _ => false,
    })
    .await;
}

#[tokio::test]
async fn szenario_a_rufaufbau_mit_annahme() {
    let (adresse, _shutdown) = server_starten().await;

    let mut c1 = verbinden_und_anmelden(adresse, "u1", "Alice").await;
    let mut c2 = verbinden_und_anmelden(adresse, "u2", "Bob").await;

    // Beide sehen die vollstaendige Praesenz
    erwarte_praesenz(&mut c1, &["u1", "u2"]).await;
    erwarte_praesenz(&mut c2, &["u1", "u2"]).await;

    // C1 ruft u2 mit Angebot P
    let angebot = serde_json::json!({"type": "offer", "sdp": "P"});
    c1.send(ControlMessage::neu(
        2,
        ControlPayload::CallInitiate(CallInitiateRequest {
            target_user_id: UserId::neu("u2"),
            signal_payload: angebot.clone(),
            from_user_id: UserId::neu("u1"),
            from_display_name: "Alice".into(),
        }),
    ))
    .await
    .unwrap();

    // C2 bekommt den eingehenden Ruf mit unveraendertem Payload
    let eingehend = erwarte(&mut c2, "CallIncoming", |p| {
        matches!(p, ControlPayload::CallIncoming(_))
    })
    .await;
    match eingehend {
        ControlPayload::CallIncoming(ev) => {
            assert_eq!(ev.signal_payload, angebot);
            assert_eq!(ev.from_user_id, UserId::neu("u1"));
            assert_eq!(ev.from_display_name, "Alice");
        }
        _ => unreachable!(),
    }

    // C2 nimmt an mit Antwort Q
    let antwort = serde_json::json!({"type": "answer", "sdp": "Q"});
    c2.send(ControlMessage::neu(
        3,
        ControlPayload::CallAccept(CallAcceptRequest {
            target_user_id: UserId::neu("u1"),
            signal_payload: antwort.clone(),
        }),
    ))
    .await
    .unwrap();

    // C1 bekommt die Annahme mit unveraendertem Payload
    let angenommen = erwarte(&mut c1, "CallAccepted", |p| {
        matches!(p, ControlPayload::CallAccepted(_))
    })
    .await;
    match angenommen {
        ControlPayload::CallAccepted(ev) => assert_eq!(ev.signal_payload, antwort),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn szenario_b_rufaufbau_mit_ablehnung() {
    let (adresse, _shutdown) = server_starten().await;

    let mut c1 = verbinden_und_anmelden(adresse, "u1", "Alice").await;
    let mut c2 = verbinden_und_anmelden(adresse, "u2", "Bob").await;
    erwarte_praesenz(&mut c1, &["u1", "u2"]).await;
    erwarte_praesenz(&mut c2, &["u1", "u2"]).await;

    c1.send(ControlMessage::neu(
        2,
        ControlPayload::CallInitiate(CallInitiateRequest {
            target_user_id: UserId::neu("u2"),
            signal_payload: serde_json::json!({"sdp": "P"}),
            from_user_id: UserId::neu("u1"),
            from_display_name: "Alice".into(),
        }),
    ))
    .await
    .unwrap();

    erwarte(&mut c2, "CallIncoming", |p| {
        matches!(p, ControlPayload::CallIncoming(_))
    })
    .await;

    // C2 lehnt ab
    c2.send(ControlMessage::neu(
        3,
        ControlPayload::CallReject(CallRejectRequest {
            target_user_id: UserId::neu("u1"),
        }),
    ))
    .await
    .unwrap();

    // C1 bekommt die Ablehnung
    erwarte(&mut c1, "CallRejected", |p| {
        matches!(p, ControlPayload::CallRejected)
    })
    .await;
}

#[tokio::test]
async fn szenario_c_unerreichbares_ziel() {
    let (adresse, _shutdown) = server_starten().await;

    let mut c1 = verbinden_und_anmelden(adresse, "u1", "Alice").await;
    erwarte_praesenz(&mut c1, &["u1"]).await;

    // u2 hat keine Verbindung
    c1.send(ControlMessage::neu(
        2,
        ControlPayload::CallInitiate(CallInitiateRequest {
            target_user_id: UserId::neu("u2"),
            signal_payload: serde_json::json!({"sdp": "P"}),
            from_user_id: UserId::neu("u1"),
            from_display_name: "Alice".into(),
        }),
    ))
    .await
    .unwrap();

    // Der Rufversuch endet mit einem expliziten Unreachable statt zu haengen
    let unerreichbar = erwarte(&mut c1, "TargetUnreachable", |p| {
        matches!(p, ControlPayload::TargetUnreachable(_))
    })
    .await;
    match unerreichbar {
        ControlPayload::TargetUnreachable(ev) => {
            assert_eq!(ev.target_user_id, UserId::neu("u2"));
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn verbindungsabbruch_aktualisiert_praesenz() {
    let (adresse, _shutdown) = server_starten().await;

    let mut c1 = verbinden_und_anmelden(adresse, "u1", "Alice").await;
    let c2 = verbinden_und_anmelden(adresse, "u2", "Bob").await;
    erwarte_praesenz(&mut c1, &["u1", "u2"]).await;

    // C2 trennt abrupt (Socket zu, kein Leave)
    drop(c2);

    // C1 sieht innerhalb eines Benachrichtigungszyklus die bereinigte Menge
    erwarte_praesenz(&mut c1, &["u1"]).await;
}

#[tokio::test]
async fn zwei_geraete_ruf_trifft_genau_eines() {
    let (adresse, _shutdown) = server_starten().await;

    let mut rufer = verbinden_und_anmelden(adresse, "u1", "Alice").await;
    let mut geraet_a = verbinden_und_anmelden(adresse, "u2", "Bob").await;
    let mut geraet_b = verbinden_und_anmelden(adresse, "u2", "Bob").await;

    erwarte_praesenz(&mut rufer, &["u1", "u2"]).await;
    erwarte_praesenz(&mut geraet_a, &["u1", "u2"]).await;
    erwarte_praesenz(&mut geraet_b, &["u1", "u2"]).await;

    rufer
        .send(ControlMessage::neu(
            2,
            ControlPayload::CallInitiate(CallInitiateRequest {
                target_user_id: UserId::neu("u2"),
                signal_payload: serde_json::json!({"sdp": "P"}),
                from_user_id: UserId::neu("u1"),
                from_display_name: "Alice".into(),
            }),
        ))
        .await
        .unwrap();

    // Das zuletzt angemeldete Geraet bekommt den Ruf
    erwarte(&mut geraet_b, "CallIncoming", |p| {
        matches!(p, ControlPayload::CallIncoming(_))
    })
    .await;

    // Das andere Geraet bekommt innerhalb des Fensters nichts ausser Praesenz
    let nichts = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            match geraet_a.next().await {
                Some(Ok(frame)) => match frame.payload {
                    ControlPayload::Ping(_) | ControlPayload::PresenceChanged(_) => continue,
                    andere => return andere,
                },
                _ => panic!("Verbindung zu frueh getrennt"),
            }
        }
    })
    .await;
    assert!(nichts.is_err(), "Geraet A darf keinen Ruf erhalten");
}
