//! Client-seitige TCP-Verbindung zum Visavis-Server
//!
//! Nutzt den FrameCodec aus visavis-protocol fuer das Wire-Format
//! (u32 BE Laenge + JSON-Payload). Alle Operationen sind async.
//!
//! Nach `anmelden` uebernimmt `ereignis_schleife` die Verbindung: sie
//! uebersetzt Server-Zustellungen in Sitzungs-Ereignisse, haelt den
//! Praesenz-Kanal aktuell, beantwortet Keepalive-Pings und sendet
//! ausgehende Sitzungs-Signale. Reisst die Verbindung ab, bekommt die
//! Sitzung ein `TransportGetrennt` und baut sofort ab.

use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::codec::Framed;

use visavis_core::types::{ConnectionId, UserId};
use visavis_protocol::control::{
    AnnounceRequest, ControlMessage, ControlPayload, ErrorCode,
};
use visavis_protocol::wire::FrameCodec;
use visavis_session::SitzungsEreignis;

// ---------------------------------------------------------------------------
// Fehler-Typ
// ---------------------------------------------------------------------------

/// Fehler die bei der Server-Verbindung auftreten koennen
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// TCP-Verbindung fehlgeschlagen
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Server hat mit Fehler geantwortet
    #[error("Server-Fehler ({code:?}): {message}")]
    ServerFehler { code: ErrorCode, message: String },

    /// Unerwartete Antwort vom Server
    #[error("Unerwartete Antwort: {0}")]
    UnerwarteteAntwort(String),

    /// Verbindung vom Server getrennt
    #[error("Verbindung vom Server getrennt")]
    Getrennt,
}

// ---------------------------------------------------------------------------
// Uebersetzung Server-Nachricht -> lokale Kanaele
// ---------------------------------------------------------------------------

/// Wohin eine Server-Nachricht gehoert
#[derive(Debug)]
enum Uebersetzung {
    /// In die Ereignis-Queue der Sitzung
    Sitzung(SitzungsEreignis),
    /// In den Praesenz-Kanal
    Praesenz(Vec<UserId>),
    /// Keepalive: Pong mit diesem Echo senden
    PongFaellig { request_id: u32, echo_ms: u64 },
    /// Nur loggen
    Nichts,
}

fn uebersetzen(nachricht: ControlMessage) -> Uebersetzung {
    match nachricht.payload {
        ControlPayload::PresenceChanged(ev) => Uebersetzung::Praesenz(ev.online),
        ControlPayload::CallIncoming(ev) => Uebersetzung::Sitzung(SitzungsEreignis::EingehenderRuf {
            von: ev.from_user_id,
            anzeigename: ev.from_display_name,
            angebot: ev.signal_payload,
        }),
        ControlPayload::CallAccepted(ev) => Uebersetzung::Sitzung(SitzungsEreignis::RufAngenommen {
            antwort: ev.signal_payload,
        }),
        ControlPayload::CallRejected => Uebersetzung::Sitzung(SitzungsEreignis::RufAbgelehnt),
        ControlPayload::TargetUnreachable(_) => {
            Uebersetzung::Sitzung(SitzungsEreignis::ZielUnerreichbar)
        }
        ControlPayload::Ping(ping) => Uebersetzung::PongFaellig {
            request_id: nachricht.request_id,
            echo_ms: ping.timestamp_ms,
        },
        ControlPayload::Error(e) => {
            tracing::warn!(code = ?e.code, nachricht = %e.message, "Fehler vom Server");
            Uebersetzung::Nichts
        }
        andere => {
            tracing::debug!(?andere, "Unerwartete Server-Nachricht ignoriert");
            Uebersetzung::Nichts
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConnection
// ---------------------------------------------------------------------------

/// TCP-Verbindung zum Visavis Signaling-Server
pub struct ServerConnection {
    /// Framed TCP-Stream mit FrameCodec
    framed: Framed<TcpStream, FrameCodec>,
    /// Vom Server vergebene Verbindungs-ID nach erfolgreichem Announce
    connection_id: Option<ConnectionId>,
    /// Monoton steigender Request-ID Zaehler
    next_request_id: AtomicU32,
}

impl ServerConnection {
    /// Baut eine TCP-Verbindung zum Server auf
    pub async fn verbinden(adresse: &str, port: u16) -> Result<Self, ConnectionError> {
        let ziel = format!("{}:{}", adresse, port);
        tracing::info!("Verbinde mit {}", ziel);
        let stream = TcpStream::connect(&ziel).await?;
        tracing::info!("TCP-Verbindung hergestellt zu {}", ziel);

        Ok(Self {
            framed: Framed::new(stream, FrameCodec::neu()),
            connection_id: None,
            next_request_id: AtomicU32::new(1),
        })
    }

    /// Generiert die naechste Request-ID
    pub fn naechste_id(&self) -> u32 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Gibt die vom Server vergebene Verbindungs-ID zurueck
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    /// Meldet die extern vergebene Identitaet beim Server an
    ///
    /// Wartet auf die Bestaetigung; Keepalive-Pings werden dabei
    /// automatisch beantwortet, Praesenz-Ereignisse uebersprungen (der
    /// naechste Fanout enthaelt ohnehin die volle Menge).
    pub async fn anmelden(
        &mut self,
        user_id: UserId,
        display_name: &str,
    ) -> Result<ConnectionId, ConnectionError> {
        let request_id = self.naechste_id();
        self.framed
            .send(ControlMessage::neu(
                request_id,
                ControlPayload::Announce(AnnounceRequest {
                    user_id: user_id.clone(),
                    display_name: display_name.to_string(),
                }),
            ))
            .await?;

        loop {
            let antwort = match self.framed.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(ConnectionError::Io(e)),
                None => return Err(ConnectionError::Getrennt),
            };

            match antwort.payload {
                ControlPayload::AnnounceOk(ok) => {
                    self.connection_id = Some(ok.connection_id);
                    tracing::info!(user = %user_id, conn = %ok.connection_id, "Angemeldet");
                    return Ok(ok.connection_id);
                }
                ControlPayload::Error(e) => {
                    return Err(ConnectionError::ServerFehler {
                        code: e.code,
                        message: e.message,
                    });
                }
                ControlPayload::Ping(ping) => {
                    let pong = ControlMessage::pong(antwort.request_id, ping.timestamp_ms);
                    self.framed.send(pong).await?;
                }
                ControlPayload::PresenceChanged(_) => continue,
                andere => {
                    return Err(ConnectionError::UnerwarteteAntwort(format!(
                        "Erwartet AnnounceOk, erhalten: {:?}",
                        std::mem::discriminant(&andere)
                    )));
                }
            }
        }
    }

    /// Pumpt Ereignisse bis die Verbindung endet
    ///
    /// - Server-Zustellungen gehen in die Sitzungs-Queue bzw. den
    ///   Praesenz-Kanal, in Empfangsreihenfolge
    /// - `signale` (ausgehende Sitzungs-Signale) gehen auf den Socket
    /// - beim Verbindungsende bekommt die Sitzung `TransportGetrennt`
    pub async fn ereignis_schleife(
        mut self,
        ereignisse: mpsc::UnboundedSender<SitzungsEreignis>,
        praesenz: watch::Sender<Vec<UserId>>,
        mut signale: mpsc::UnboundedReceiver<ControlPayload>,
    ) -> Result<(), ConnectionError> {
        loop {
            tokio::select! {
                frame = self.framed.next() => {
                    let nachricht = match frame {
                        Some(Ok(n)) => n,
                        Some(Err(e)) => {
                            tracing::warn!(fehler = %e, "Frame-Lesefehler");
                            let _ = ereignisse.send(SitzungsEreignis::TransportGetrennt);
                            return Err(ConnectionError::Io(e));
                        }
                        None => {
                            tracing::info!("Verbindung vom Server getrennt");
                            let _ = ereignisse.send(SitzungsEreignis::TransportGetrennt);
                            return Err(ConnectionError::Getrennt);
                        }
                    };

                    match uebersetzen(nachricht) {
                        Uebersetzung::Sitzung(ereignis) => {
                            if ereignisse.send(ereignis).is_err() {
                                tracing::debug!("Sitzung beendet, Schleife endet");
                                return Ok(());
                            }
                        }
                        Uebersetzung::Praesenz(online) => {
                            let _ = praesenz.send(online);
                        }
                        Uebersetzung::PongFaellig { request_id, echo_ms } => {
                            self.framed.send(ControlMessage::pong(request_id, echo_ms)).await?;
                        }
                        Uebersetzung::Nichts => {}
                    }
                }

                signal = signale.recv() => {
                    match signal {
                        Some(payload) => {
                            let id = self.naechste_id();
                            self.framed.send(ControlMessage::neu(id, payload)).await?;
                        }
                        None => {
                            // Sitzung weg: Verbindung sauber schliessen
                            let _ = self.framed.close().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
