//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt Registry, Broadcaster und Router als geteilte Referenzen, die
//! sicher zwischen tokio-Tasks geteilt werden koennen. Es gibt bewusst
//! keine Persistenz: Registry-Lebensdauer = Prozess-Lebensdauer.

use std::sync::Arc;
use std::time::Instant;

use crate::broadcast::EventBroadcaster;
use crate::presence::PresenceRegistry;
use crate::router::CallRouter;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Anzeigename des Servers (nur fuers Logging)
    pub server_name: String,
    /// Maximale gleichzeitige Verbindungen
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            server_name: "Visavis Server".to_string(),
            max_clients: 512,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
        }
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    /// Server-Konfiguration
    pub config: Arc<SignalingConfig>,
    /// Praesenz-Registry (Verbindung <-> Benutzer)
    pub registry: PresenceRegistry,
    /// Event-Broadcaster (Send-Queues aller Verbindungen)
    pub broadcaster: EventBroadcaster,
    /// Ruf-Vermittlung
    pub router: CallRouter,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig) -> Arc<Self> {
        let registry = PresenceRegistry::neu();
        let broadcaster = EventBroadcaster::neu();
        let router = CallRouter::neu(registry.clone(), broadcaster.clone());
        Arc::new(Self {
            config: Arc::new(config),
            registry,
            broadcaster,
            router,
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_teilt_registry_mit_router() {
        let state = SignalingState::neu(SignalingConfig::default());
        let conn = visavis_core::types::ConnectionId::neu();
        let user = visavis_core::types::UserId::neu("u1");

        state.registry.anmelden(conn, user.clone(), "Alice");
        // Der Router sieht dieselbe Registry
        let _rx = state.broadcaster.registrieren(conn);
        let ergebnis = state.router.ruf_annehmen(visavis_protocol::control::CallAcceptRequest {
            target_user_id: user,
            signal_payload: serde_json::json!({}),
        });
        assert!(ergebnis.ist_zugestellt());
    }

    #[test]
    fn standard_config() {
        let cfg = SignalingConfig::default();
        assert_eq!(cfg.max_clients, 512);
        assert_eq!(cfg.keepalive_sek, 30);
    }
}
