//! Message-Dispatcher – verarbeitet Nachrichten einer Verbindung
//!
//! Der Dispatcher empfaengt ControlMessages von einer ClientConnection,
//! prueft den Verbindungszustand und den Umschlag, und gibt die direkte
//! Antwort zurueck. Zustellungen an andere Verbindungen laufen ueber den
//! CallRouter und die Send-Queues, nie ueber den Rueckgabewert.
//!
//! ## Umschlag-Pruefung
//! Ruf-Ereignisse werden nur angenommen wenn die Verbindung angemeldet
//! ist, das Ziel nicht leer ist und die behauptete Absender-Identitaet
//! zur angemeldeten Identitaet passt. Ein fehlgeformter Umschlag wird
//! mit einem Fehler beantwortet statt weitergeleitet.

use visavis_core::types::{ConnectionId, UserId};
use visavis_protocol::control::{
    AnnounceOk, ControlMessage, ControlPayload, ErrorCode,
};

use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Zustand der aktuellen Verbindung
pub struct DispatcherContext {
    /// Vom Server vergebene Verbindungs-ID
    pub connection_id: ConnectionId,
    /// Angemeldete Identitaet (None vor dem Announce)
    pub user_id: Option<UserId>,
    /// Anzeigename aus dem Announce
    pub display_name: Option<String>,
}

impl DispatcherContext {
    /// Erstellt einen frischen Kontext fuer eine neue Verbindung
    pub fn neu(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            user_id: None,
            display_name: None,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: std::sync::Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: std::sync::Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine eingehende ControlMessage und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn keine direkte Antwort faellig ist (Ruf-
    /// Ereignisse werden ueber die Send-Queues zugestellt, Pongs nur
    /// registriert).
    pub fn dispatch(
        &self,
        nachricht: ControlMessage,
        ctx: &mut DispatcherContext,
    ) -> Option<ControlMessage> {
        let request_id = nachricht.request_id;

        match nachricht.payload {
            // -------------------------------------------------------------------
            // Praesenz
            // -------------------------------------------------------------------
            ControlPayload::Announce(anfrage) => {
                if anfrage.user_id.ist_leer() {
                    return Some(ControlMessage::fehler(
                        request_id,
                        ErrorCode::InvalidRequest,
                        "Leere Benutzer-ID",
                    ));
                }

                self.state.registry.anmelden(
                    ctx.connection_id,
                    anfrage.user_id.clone(),
                    anfrage.display_name.clone(),
                );
                ctx.user_id = Some(anfrage.user_id);
                ctx.display_name = Some(anfrage.display_name);

                // Praesenz-Fanout an alle Verbindungen (auch den Melder)
                self.praesenz_verteilen();

                Some(ControlMessage::neu(
                    request_id,
                    ControlPayload::AnnounceOk(AnnounceOk {
                        connection_id: ctx.connection_id,
                    }),
                ))
            }

            ControlPayload::Leave => {
                if self.state.registry.abmelden(&ctx.connection_id) {
                    self.praesenz_verteilen();
                }
                ctx.user_id = None;
                ctx.display_name = None;
                None
            }

            // -------------------------------------------------------------------
            // Rufaufbau
            // -------------------------------------------------------------------
            ControlPayload::CallInitiate(anfrage) => {
                let angemeldet = match &ctx.user_id {
                    Some(uid) => uid,
                    None => return Some(Self::nicht_angemeldet(request_id)),
                };

                if anfrage.target_user_id.ist_leer() {
                    return Some(ControlMessage::fehler(
                        request_id,
                        ErrorCode::InvalidRequest,
                        "Leeres Rufziel",
                    ));
                }
                if anfrage.from_user_id != *angemeldet {
                    tracing::warn!(
                        conn = %ctx.connection_id,
                        behauptet = %anfrage.from_user_id,
                        angemeldet = %angemeldet,
                        "Absender-Identitaet passt nicht zur Anmeldung"
                    );
                    return Some(ControlMessage::fehler(
                        request_id,
                        ErrorCode::IdentityMismatch,
                        "Absender-Identitaet passt nicht zur Anmeldung",
                    ));
                }

                self.state.router.ruf_einleiten(ctx.connection_id, anfrage);
                None
            }

            ControlPayload::CallAccept(anfrage) => {
                if ctx.user_id.is_none() {
                    return Some(Self::nicht_angemeldet(request_id));
                }
                if anfrage.target_user_id.ist_leer() {
                    return Some(ControlMessage::fehler(
                        request_id,
                        ErrorCode::InvalidRequest,
                        "Leeres Rufziel",
                    ));
                }

                self.state.router.ruf_annehmen(anfrage);
                None
            }

            ControlPayload::CallReject(anfrage) => {
                if ctx.user_id.is_none() {
                    return Some(Self::nicht_angemeldet(request_id));
                }
                if anfrage.target_user_id.ist_leer() {
                    return Some(ControlMessage::fehler(
                        request_id,
                        ErrorCode::InvalidRequest,
                        "Leeres Rufziel",
                    ));
                }

                self.state.router.ruf_ablehnen(anfrage);
                None
            }

            // -------------------------------------------------------------------
            // Keepalive
            // -------------------------------------------------------------------
            ControlPayload::Ping(ping) => {
                Some(ControlMessage::pong(request_id, ping.timestamp_ms))
            }

            ControlPayload::Pong(_) => {
                // Antwort auf unseren Keepalive-Ping; der Empfang selbst
                // hat den Timeout bereits zurueckgesetzt
                tracing::trace!(conn = %ctx.connection_id, "Pong empfangen");
                None
            }

            // -------------------------------------------------------------------
            // Server->Client Nachrichten vom Client sind Protokollverletzungen
            // -------------------------------------------------------------------
            ControlPayload::AnnounceOk(_)
            | ControlPayload::PresenceChanged(_)
            | ControlPayload::CallIncoming(_)
            | ControlPayload::CallAccepted(_)
            | ControlPayload::CallRejected
            | ControlPayload::TargetUnreachable(_)
            | ControlPayload::Error(_) => {
                tracing::warn!(
                    conn = %ctx.connection_id,
                    request_id,
                    "Unerwartete Server->Client Nachricht vom Client empfangen"
                );
                Some(ControlMessage::fehler(
                    request_id,
                    ErrorCode::InvalidRequest,
                    "Unerwartete Nachricht",
                ))
            }
        }
    }

    /// Bereinigt alle Ressourcen einer Verbindung beim Trennen
    ///
    /// Das Schliessen der Verbindung ist das implizite Abmelden: der
    /// Praesenz-Fanout laeuft nur wenn tatsaechlich ein Eintrag entfernt
    /// wurde.
    pub fn verbindung_bereinigen(&self, connection_id: &ConnectionId) {
        let entfernt = self.state.registry.abmelden(connection_id);
        self.state.broadcaster.entfernen(connection_id);
        if entfernt {
            self.praesenz_verteilen();
        }
        tracing::debug!(conn = %connection_id, "Verbindungs-Ressourcen bereinigt");
    }

    /// Sendet den aktuellen Praesenz-Schnappschuss an alle Verbindungen
    fn praesenz_verteilen(&self) {
        let schnappschuss = self.state.registry.schnappschuss();
        let nachricht = ControlMessage::praesenz_geaendert(schnappschuss);
        let empfaenger = self.state.broadcaster.an_alle_senden(nachricht);
        tracing::trace!(empfaenger, "Praesenz-Schnappschuss verteilt");
    }

    fn nicht_angemeldet(request_id: u32) -> ControlMessage {
        ControlMessage::fehler(
            request_id,
            ErrorCode::NotAnnounced,
            "Nicht angemeldet – bitte zuerst Announce senden",
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
