//! Control-Protokoll (TCP)
//!
//! Definiert alle Steuerungsnachrichten die ueber die TCP-Verbindung
//! zwischen Client und Server ausgetauscht werden.
//!
//! ## Design
//! - Jede Nachricht traegt eine `request_id: u32` zur Zuordnung
//! - JSON-Serialisierung via serde (Signalisierung ist nicht zeitkritisch)
//! - Tagged Enums fuer typsichere Nachrichtentypen
//! - `signal_payload` ist ein opakes JSON-Blob der externen
//!   Peer-Verbindungs-Bibliothek und wird unveraendert weitergereicht

use serde::{Deserialize, Serialize};
use visavis_core::types::{ConnectionId, UserId};

// ---------------------------------------------------------------------------
// Fehler-Codes
// ---------------------------------------------------------------------------

/// Standardisierte Fehler-Codes fuer Error-Responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Allgemein
    InternalError,
    InvalidRequest,
    // Praesenz
    NotAnnounced,
    IdentityMismatch,
    // Server
    ServerFull,
}

// ---------------------------------------------------------------------------
// Praesenz-Nachrichten
// ---------------------------------------------------------------------------

/// Anmeldung einer Verbindung unter einer Benutzer-Identitaet
///
/// Wird einmal pro Verbindung nach dem Aufbau gesendet. Die Identitaet
/// stammt vom externen Auth-Dienst; der Server prueft sie nicht.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRequest {
    pub user_id: UserId,
    /// Menschenlesbarer Anzeigename fuer eingehende Rufe
    pub display_name: String,
}

/// Bestaetigung der Anmeldung
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceOk {
    /// Vom Server vergebene Verbindungs-ID
    pub connection_id: ConnectionId,
}

/// Praesenz-Aenderung – an alle Verbindungen gesendet
///
/// Enthaelt die vollstaendige Menge der aktuell angemeldeten Benutzer
/// (Mehrfach-Verbindungen eines Benutzers erscheinen nur einmal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceChangedEvent {
    pub online: Vec<UserId>,
}

// ---------------------------------------------------------------------------
// Ruf-Nachrichten
// ---------------------------------------------------------------------------

/// Rufaufbau: Client -> Server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInitiateRequest {
    /// Der gerufene Benutzer
    pub target_user_id: UserId,
    /// Opakes Verhandlungs-Angebot der Peer-Verbindungs-Bibliothek
    pub signal_payload: serde_json::Value,
    /// Identitaet des Rufenden (muss zur angemeldeten Identitaet passen)
    pub from_user_id: UserId,
    /// Anzeigename des Rufenden
    pub from_display_name: String,
}

/// Eingehender Ruf: Server -> gerufener Client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallIncomingEvent {
    pub signal_payload: serde_json::Value,
    pub from_user_id: UserId,
    pub from_display_name: String,
}

/// Rufannahme: Client -> Server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAcceptRequest {
    /// Der urspruengliche Rufer
    pub target_user_id: UserId,
    /// Opake Verhandlungs-Antwort
    pub signal_payload: serde_json::Value,
}

/// Annahme-Zustellung: Server -> urspruenglicher Rufer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallAcceptedEvent {
    pub signal_payload: serde_json::Value,
}

/// Rufablehnung: Client -> Server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRejectRequest {
    /// Der urspruengliche Rufer
    pub target_user_id: UserId,
}

/// Ziel nicht erreichbar: Server -> rufender Client
///
/// Explizites Signal statt stillem Verwerfen, damit der Rufer nicht
/// unbegrenzt im Zustand "ruft" haengen bleibt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetUnreachableEvent {
    pub target_user_id: UserId,
}

// ---------------------------------------------------------------------------
// Keepalive
// ---------------------------------------------------------------------------

/// Keepalive-Ping (Server -> Client)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingMessage {
    pub timestamp_ms: u64,
}

/// Keepalive-Pong (Client -> Server)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongMessage {
    pub echo_timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Payload-Enum
// ---------------------------------------------------------------------------

/// Alle Nachrichtentypen des Control-Protokolls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ControlPayload {
    // Praesenz
    Announce(AnnounceRequest),
    AnnounceOk(AnnounceOk),
    Leave,
    PresenceChanged(PresenceChangedEvent),

    // Rufaufbau
    CallInitiate(CallInitiateRequest),
    CallIncoming(CallIncomingEvent),
    CallAccept(CallAcceptRequest),
    CallAccepted(CallAcceptedEvent),
    CallReject(CallRejectRequest),
    CallRejected,
    TargetUnreachable(TargetUnreachableEvent),

    // Keepalive
    Ping(PingMessage),
    Pong(PongMessage),

    // Error
    Error(ErrorResponse),
}

/// Standardisierte Fehler-Antwort
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Control-Frame (Umschlag fuer alle Nachrichten)
// ---------------------------------------------------------------------------

/// Control-Protokoll-Nachricht mit Request-Zuordnung
///
/// Jede Nachricht traegt eine `request_id`. Bei Client-Anfragen vergibt der
/// Client die ID und der Server kopiert sie in die Antwort; vom Server
/// initiierte Ereignisse (Praesenz, Rufzustellungen) tragen die ID 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Nachrichten-ID fuer Request/Response-Zuordnung
    pub request_id: u32,
    /// Inhalt der Nachricht
    pub payload: ControlPayload,
}

/// Request-ID fuer server-initiierte Ereignisse
pub const EVENT_REQUEST_ID: u32 = 0;

impl ControlMessage {
    /// Erstellt eine neue Control-Nachricht
    pub fn neu(request_id: u32, payload: ControlPayload) -> Self {
        Self {
            request_id,
            payload,
        }
    }

    /// Erstellt ein server-initiiertes Ereignis (request_id = 0)
    pub fn ereignis(payload: ControlPayload) -> Self {
        Self::neu(EVENT_REQUEST_ID, payload)
    }

    /// Erstellt eine Ping-Nachricht
    pub fn ping(request_id: u32, timestamp_ms: u64) -> Self {
        Self::neu(
            request_id,
            ControlPayload::Ping(PingMessage { timestamp_ms }),
        )
    }

    /// Erstellt eine Pong-Antwort
    pub fn pong(request_id: u32, echo_timestamp_ms: u64) -> Self {
        Self::neu(
            request_id,
            ControlPayload::Pong(PongMessage { echo_timestamp_ms }),
        )
    }

    /// Erstellt eine Praesenz-Aenderung aus einer Benutzermenge
    ///
    /// Die Menge wird sortiert damit die Zustellung deterministisch ist.
    pub fn praesenz_geaendert(online: impl IntoIterator<Item = UserId>) -> Self {
        let mut online: Vec<UserId> = online.into_iter().collect();
        online.sort();
        Self::ereignis(ControlPayload::PresenceChanged(PresenceChangedEvent {
            online,
        }))
    }

    /// Erstellt eine Fehler-Antwort
    pub fn fehler(request_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::neu(
            request_id,
            ControlPayload::Error(ErrorResponse {
                code,
                message: message.into(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trip() {
        let msg = ControlMessage::neu(
            7,
            ControlPayload::CallInitiate(CallInitiateRequest {
                target_user_id: UserId::neu("u2"),
                signal_payload: serde_json::json!({"sdp": "v=0..."}),
                from_user_id: UserId::neu("u1"),
                from_display_name: "Alice".into(),
            }),
        );

        let json = serde_json::to_string(&msg).unwrap();
        let zurueck: ControlMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(zurueck.request_id, 7);
        match zurueck.payload {
            ControlPayload::CallInitiate(req) => {
                assert_eq!(req.target_user_id, UserId::neu("u2"));
                assert_eq!(req.from_display_name, "Alice");
                assert_eq!(req.signal_payload["sdp"], "v=0...");
            }
            andere => panic!("Erwartet CallInitiate, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn signal_payload_bleibt_unangetastet() {
        // Beliebig verschachteltes JSON muss strukturgleich ueberleben
        let blob = serde_json::json!({
            "type": "offer",
            "sdp": "v=0\r\no=- 1 2 IN IP4 0.0.0.0",
            "ice": [{"candidate": "a", "mid": 0}],
        });
        let msg = ControlMessage::ereignis(ControlPayload::CallIncoming(CallIncomingEvent {
            signal_payload: blob.clone(),
            from_user_id: UserId::neu("u1"),
            from_display_name: "Alice".into(),
        }));

        let json = serde_json::to_vec(&msg).unwrap();
        let zurueck: ControlMessage = serde_json::from_slice(&json).unwrap();
        match zurueck.payload {
            ControlPayload::CallIncoming(ev) => assert_eq!(ev.signal_payload, blob),
            andere => panic!("Erwartet CallIncoming, erhalten: {:?}", andere),
        }
    }

    #[test]
    fn praesenz_geaendert_sortiert() {
        let msg = ControlMessage::praesenz_geaendert(vec![
            UserId::neu("zeta"),
            UserId::neu("alpha"),
        ]);
        match msg.payload {
            ControlPayload::PresenceChanged(ev) => {
                assert_eq!(ev.online, vec![UserId::neu("alpha"), UserId::neu("zeta")]);
            }
            andere => panic!("Erwartet PresenceChanged, erhalten: {:?}", andere),
        }
        assert_eq!(msg.request_id, EVENT_REQUEST_ID);
    }

    #[test]
    fn fehler_konstruktor() {
        let msg = ControlMessage::fehler(3, ErrorCode::NotAnnounced, "Nicht angemeldet");
        match msg.payload {
            ControlPayload::Error(e) => {
                assert_eq!(e.code, ErrorCode::NotAnnounced);
                assert_eq!(e.message, "Nicht angemeldet");
            }
            andere => panic!("Erwartet Error, erhalten: {:?}", andere),
        }
    }
}
