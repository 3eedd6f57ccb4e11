//! visavis-server – Bibliotheks-Root
//!
//! Deklariert die Server-Module und stellt den oeffentlichen
//! Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use visavis_signaling::server_state::{SignalingConfig, SignalingState};
use visavis_signaling::tcp::SignalingServer;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet den Signaling-Server und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Signaling-Zustand aufbauen (Registry, Broadcaster, Router)
    /// 2. TCP-Listener binden und Accept-Loop starten
    /// 3. Auf Ctrl-C warten, dann Shutdown an alle Verbindungen
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            server_name = %self.config.server.name,
            tcp = %self.config.tcp_bind_adresse(),
            "Server startet"
        );

        let signaling_config = SignalingConfig {
            server_name: self.config.server.name.clone(),
            max_clients: self.config.server.max_clients,
            keepalive_sek: self.config.rufe.keepalive_sek,
            verbindungs_timeout_sek: self.config.rufe.verbindungs_timeout_sek,
        };
        let state = SignalingState::neu(signaling_config);

        let bind_addr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .map_err(|e| anyhow::anyhow!("Ungueltige Bind-Adresse: {e}"))?;
        let server = SignalingServer::binden(state, bind_addr).await?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let listener_task = tokio::spawn(server.starten(shutdown_rx));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(true);
        let _ = listener_task.await;

        Ok(())
    }
}
