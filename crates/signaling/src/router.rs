//! Ruf-Vermittlung – loest Ziele auf und stellt Signale zu
//!
//! Der CallRouter verbindet Praesenz-Registry und Event-Broadcaster: er
//! loest die Ziel-Identitaet eines Ruf-Ereignisses zu einer lebenden
//! Verbindung auf und reiht das passende Ereignis in deren Send-Queue ein.
//!
//! ## Zustellgarantie
//! At-most-once, best-effort. Kein Retry, keine Warteschlange fuer
//! Offline-Ziele, keine Bestaetigung. Trennt sich das Ziel zwischen
//! Aufloesung und Einreihung, ist die Nachricht verloren – der Rufer
//! muss per Timeout aufgeben (siehe Session-Crate).
//!
//! Ein nicht aufloesbares Ziel ist ein erwartetes Ergebnis, kein Fehler:
//! beim Rufaufbau bekommt der Rufer ein explizites `TargetUnreachable`,
//! bei Annahme/Ablehnung eines inzwischen verschwundenen Rufers passiert
//! bewusst nichts.

use visavis_core::types::ConnectionId;
use visavis_protocol::control::{
    CallAcceptRequest, CallAcceptedEvent, CallIncomingEvent, CallInitiateRequest,
    CallRejectRequest, ControlMessage, ControlPayload, TargetUnreachableEvent,
};

use crate::broadcast::EventBroadcaster;
use crate::presence::PresenceRegistry;

/// Ergebnis einer Vermittlung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingErgebnis {
    /// In die Send-Queue genau einer Verbindung eingereiht
    Zugestellt(ConnectionId),
    /// Ziel hat keine angemeldete Verbindung
    ZielOffline,
    /// Ziel wurde aufgeloest, aber die Queue war voll oder schon
    /// geschlossen – Nachricht verloren (best-effort)
    Verloren(ConnectionId),
}

impl RoutingErgebnis {
    /// Prueft ob die Nachricht eingereiht wurde
    pub fn ist_zugestellt(&self) -> bool {
        matches!(self, Self::Zugestellt(_))
    }
}

/// Vermittelt Ruf-Ereignisse zwischen Verbindungen
#[derive(Clone)]
pub struct CallRouter {
    registry: PresenceRegistry,
    broadcaster: EventBroadcaster,
}

impl CallRouter {
    /// Erstellt einen neuen CallRouter ueber Registry und Broadcaster
    pub fn neu(registry: PresenceRegistry, broadcaster: EventBroadcaster) -> Self {
        Self {
            registry,
            broadcaster,
        }
    }

    /// Vermittelt einen Rufaufbau an den gerufenen Benutzer
    ///
    /// Ist das Ziel offline, bekommt der Rufer (ueber seine eigene
    /// Send-Queue, also in Sende-Reihenfolge) ein `TargetUnreachable`.
    pub fn ruf_einleiten(
        &self,
        absender: ConnectionId,
        anfrage: CallInitiateRequest,
    ) -> RoutingErgebnis {
        let ziel_user = anfrage.target_user_id.clone();

        let ergebnis = match self.registry.aufloesen(&ziel_user) {
            Some(ziel_conn) => {
                let ereignis = ControlMessage::ereignis(ControlPayload::CallIncoming(
                    CallIncomingEvent {
                        signal_payload: anfrage.signal_payload,
                        from_user_id: anfrage.from_user_id,
                        from_display_name: anfrage.from_display_name,
                    },
                ));
                if self.broadcaster.an_verbindung_senden(&ziel_conn, ereignis) {
                    RoutingErgebnis::Zugestellt(ziel_conn)
                } else {
                    RoutingErgebnis::Verloren(ziel_conn)
                }
            }
            None => RoutingErgebnis::ZielOffline,
        };

        match ergebnis {
            RoutingErgebnis::Zugestellt(ziel) => {
                tracing::debug!(von = %absender, ziel = %ziel, user = %ziel_user, "Ruf zugestellt");
            }
            RoutingErgebnis::ZielOffline => {
                tracing::debug!(von = %absender, user = %ziel_user, "Rufziel offline");
                let unerreichbar = ControlMessage::ereignis(ControlPayload::TargetUnreachable(
                    TargetUnreachableEvent {
                        target_user_id: ziel_user,
                    },
                ));
                // Antwort an den Rufer ist selbst best-effort
                let _ = self.broadcaster.an_verbindung_senden(&absender, unerreichbar);
            }
            RoutingErgebnis::Verloren(ziel) => {
                tracing::debug!(von = %absender, ziel = %ziel, user = %ziel_user, "Ruf verloren (Queue zu)");
            }
        }

        ergebnis
    }

    /// Vermittelt eine Rufannahme an den urspruenglichen Rufer
    ///
    /// Ist der Rufer inzwischen weg, passiert nichts – es gibt niemanden
    /// mehr, dem ein Fehler gemeldet werden koennte.
    pub fn ruf_annehmen(&self, anfrage: CallAcceptRequest) -> RoutingErgebnis {
        match self.registry.aufloesen(&anfrage.target_user_id) {
            Some(ziel_conn) => {
                let ereignis = ControlMessage::ereignis(ControlPayload::CallAccepted(
                    CallAcceptedEvent {
                        signal_payload: anfrage.signal_payload,
                    },
                ));
                if self.broadcaster.an_verbindung_senden(&ziel_conn, ereignis) {
                    RoutingErgebnis::Zugestellt(ziel_conn)
                } else {
                    RoutingErgebnis::Verloren(ziel_conn)
                }
            }
            None => {
                tracing::debug!(user = %anfrage.target_user_id, "Annahme: Rufer schon weg");
                RoutingErgebnis::ZielOffline
            }
        }
    }

    /// Vermittelt eine Rufablehnung an den urspruenglichen Rufer
    pub fn ruf_ablehnen(&self, anfrage: CallRejectRequest) -> RoutingErgebnis {
        match self.registry.aufloesen(&anfrage.target_user_id) {
            Some(ziel_conn) => {
                let ereignis = ControlMessage::ereignis(ControlPayload::CallRejected);
                if self.broadcaster.an_verbindung_senden(&ziel_conn, ereignis) {
                    RoutingErgebnis::Zugestellt(ziel_conn)
                } else {
                    RoutingErgebnis::Verloren(ziel_conn)
                }
            }
            None => {
                tracing::debug!(user = %anfrage.target_user_id, "Ablehnung: Rufer schon weg");
                RoutingErgebnis::ZielOffline
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
