//! Client-Connection – Verwaltet eine einzelne TCP-Verbindung
//!
//! Jede TCP-Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task und eine frische, nie wiederverwendete ConnectionId.
//! Eingehende Frames laufen durch den MessageDispatcher; Zustellungen an
//! diese Verbindung kommen ueber die Send-Queue des Broadcasters herein
//! und verlassen den Task in Einreihungs-Reihenfolge.
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen Ping
//! - Client muss innerhalb von `verbindungs_timeout_sek` irgendein Frame
//!   senden (Pong genuegt)
//! - Bei Timeout wird die Verbindung getrennt
//!
//! Das Ende des Tasks – egal ob sauberer Close, Lesefehler oder Timeout –
//! ist das implizite Abmelden aus der Praesenz-Registry.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use visavis_core::types::ConnectionId;
use visavis_protocol::control::{ControlMessage, ErrorCode};
use visavis_protocol::wire::FrameCodec;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::server_state::SignalingState;

/// Verarbeitet eine einzelne TCP-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr) -> Self {
        Self { state, peer_addr }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis die Verbindung getrennt wird oder ein Shutdown-Signal
    /// eingeht. Bereinigt beim Ende immer Registry und Broadcaster.
    pub async fn verarbeiten(
        self,
        stream: TcpStream,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let peer_addr = self.peer_addr;
        let connection_id = ConnectionId::neu();
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek);
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek);

        tracing::info!(peer = %peer_addr, conn = %connection_id, "Neue Verbindung");

        let mut framed = Framed::new(stream, FrameCodec::neu());

        // Send-Queue dieser Verbindung (Router/Fanout -> TCP)
        let mut sende_rx = self.state.broadcaster.registrieren(connection_id);

        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));
        let mut ctx = DispatcherContext::neu(connection_id);

        // Zeitpunkt des letzten empfangenen Frames
        let mut letzter_empfang = Instant::now();
        // Zeitpunkt des naechsten Ping
        let mut naechster_ping = Instant::now() + keepalive_intervall;
        let mut ping_request_id: u32 = 0;

        loop {
            let jetzt = Instant::now();

            if jetzt.duration_since(letzter_empfang) > timeout_dauer {
                tracing::warn!(peer = %peer_addr, conn = %connection_id, "Verbindungs-Timeout");
                break;
            }

            let ping_verzoegerung = if jetzt < naechster_ping {
                naechster_ping.duration_since(jetzt)
            } else {
                Duration::from_millis(1)
            };

            tokio::select! {
                // Eingehende Nachricht vom Client
                frame = framed.next() => {
                    match frame {
                        Some(Ok(nachricht)) => {
                            letzter_empfang = Instant::now();
                            tracing::trace!(
                                conn = %connection_id,
                                request_id = nachricht.request_id,
                                "Nachricht empfangen"
                            );

                            if let Some(antwort) = dispatcher.dispatch(nachricht, &mut ctx) {
                                if let Err(e) = framed.send(antwort).await {
                                    tracing::warn!(
                                        conn = %connection_id,
                                        fehler = %e,
                                        "Senden fehlgeschlagen"
                                    );
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                conn = %connection_id,
                                fehler = %e,
                                "Frame-Lesefehler"
                            );
                            break;
                        }
                        None => {
                            tracing::info!(conn = %connection_id, "Verbindung vom Client getrennt");
                            break;
                        }
                    }
                }

                // Zustellung aus der Send-Queue (Router, Praesenz-Fanout)
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = framed.send(ausgehend).await {
                        tracing::warn!(
                            conn = %connection_id,
                            fehler = %e,
                            "Zustellung fehlgeschlagen"
                        );
                        break;
                    }
                }

                // Keepalive-Ping
                _ = tokio::time::sleep(ping_verzoegerung) => {
                    if Instant::now() >= naechster_ping {
                        ping_request_id = ping_request_id.wrapping_add(1);
                        let ts = std::time::SystemTime::now()
                            .duration_since(std::time::UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_millis() as u64;

                        if let Err(e) = framed.send(ControlMessage::ping(ping_request_id, ts)).await {
                            tracing::warn!(
                                conn = %connection_id,
                                fehler = %e,
                                "Ping-Senden fehlgeschlagen"
                            );
                            break;
                        }
                        naechster_ping = Instant::now() + keepalive_intervall;
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(conn = %connection_id, "Shutdown-Signal – Verbindung wird getrennt");
                        let abschied = ControlMessage::fehler(
                            0,
                            ErrorCode::InternalError,
                            "Server wird heruntergefahren",
                        );
                        let _ = framed.send(abschied).await;
                        break;
                    }
                }
            }
        }

        // Implizites Abmelden beim Verbindungsende
        dispatcher.verbindung_bereinigen(&connection_id);

        tracing::info!(peer = %peer_addr, conn = %connection_id, "Verbindungs-Task beendet");
    }
}
