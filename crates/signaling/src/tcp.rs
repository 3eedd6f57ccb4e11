//! TCP-Listener – Bindet Socket, akzeptiert Verbindungen
//!
//! Der `SignalingServer` bindet einen TCP-Socket und startet fuer jede
//! eingehende Verbindung einen eigenen tokio-Task mit einer
//! `ClientConnection`. Bindung und Accept-Loop sind getrennt, damit Tests
//! und der Server-Binary die tatsaechlich vergebene Adresse (Port 0)
//! abfragen koennen bevor die Loop laeuft.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::connection::ClientConnection;
use crate::server_state::SignalingState;

/// TCP-Signaling-Server
///
/// Haelt den gebundenen Listener und akzeptiert Verbindungen in einer
/// Loop. Jede Verbindung laeuft als eigener tokio-Task.
pub struct SignalingServer {
    state: Arc<SignalingState>,
    listener: TcpListener,
    lokale_adresse: SocketAddr,
}

impl SignalingServer {
    /// Bindet den TCP-Socket
    pub async fn binden(
        state: Arc<SignalingState>,
        bind_addr: SocketAddr,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_addr).await?;
        let lokale_adresse = listener.local_addr()?;

        tracing::info!(adresse = %lokale_adresse, "TCP Signaling-Server gebunden");

        Ok(Self {
            state,
            listener,
            lokale_adresse,
        })
    }

    /// Gibt die tatsaechlich gebundene Adresse zurueck
    pub fn lokale_adresse(&self) -> SocketAddr {
        self.lokale_adresse
    }

    /// Akzeptiert Verbindungen bis `shutdown_rx` ein `true`-Signal empfaengt
    pub async fn starten(
        self,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        tracing::info!(adresse = %self.lokale_adresse, "TCP Signaling-Server gestartet");

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            // Client-Limit: offene Verbindungen, nicht nur
                            // angemeldete Benutzer
                            let offen = self.state.broadcaster.anzahl() as u32;
                            if offen >= self.state.config.max_clients {
                                tracing::warn!(
                                    peer = %peer_addr,
                                    max = self.state.config.max_clients,
                                    "Server voll – Verbindung abgelehnt"
                                );
                                drop(stream);
                                continue;
                            }

                            tracing::debug!(peer = %peer_addr, "Verbindung akzeptiert");

                            let verbindung = ClientConnection::neu(
                                Arc::clone(&self.state),
                                peer_addr,
                            );
                            let shutdown_rx_clone = shutdown_rx.clone();

                            tokio::spawn(async move {
                                verbindung.verarbeiten(stream, shutdown_rx_clone).await;
                            });
                        }
                        Err(e) => {
                            tracing::error!(fehler = %e, "TCP-Accept-Fehler");
                            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("TCP Signaling-Server gestoppt");
        Ok(())
    }
}
