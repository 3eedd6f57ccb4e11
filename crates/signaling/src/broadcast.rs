//! Event-Broadcaster – Send-Queues aller offenen Verbindungen
//!
//! Der EventBroadcaster verwaltet pro Verbindung eine begrenzte Send-Queue
//! und stellt Methoden bereit, um Nachrichten gezielt an eine Verbindung
//! oder an alle zu senden. Jede Queue ist ein eigener in-order Kanal: die
//! Reihenfolge der an einer Verbindung zugestellten Ereignisse entspricht
//! der Sende-Reihenfolge der Vermittlung.
//!
//! Senden ist nicht-blockierend (`try_send`). Eine volle oder geschlossene
//! Queue verwirft die Nachricht nur fuer diese eine Verbindung; andere
//! Empfaenger sind davon nie betroffen. Der Fanout blockiert damit auch
//! keine Registry-Mutation.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use visavis_core::types::ConnectionId;
use visavis_protocol::control::ControlMessage;

/// Groesse der Send-Queue pro Verbindung
const SEND_QUEUE_GROESSE: usize = 64;

/// Handle auf die Send-Queue einer offenen Verbindung
#[derive(Clone, Debug)]
pub struct VerbindungsSender {
    pub connection_id: ConnectionId,
    pub tx: mpsc::Sender<ControlMessage>,
}

impl VerbindungsSender {
    /// Reiht eine Nachricht nicht-blockierend in die Queue ein
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: ControlMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(conn = %self.connection_id, "Send-Queue voll – Nachricht verworfen");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(conn = %self.connection_id, "Send-Queue geschlossen (Verbindung getrennt)");
                false
            }
        }
    }
}

/// Zentraler Event-Broadcaster fuer alle offenen Verbindungen
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct EventBroadcaster {
    verbindungen: Arc<DashMap<ConnectionId, VerbindungsSender>>,
}

impl EventBroadcaster {
    /// Erstellt einen neuen EventBroadcaster
    pub fn neu() -> Self {
        Self {
            verbindungen: Arc::new(DashMap::new()),
        }
    }

    /// Registriert eine Verbindung und gibt ihre Empfangs-Queue zurueck
    ///
    /// Die `ClientConnection` liest aus dieser Queue und sendet via TCP.
    pub fn registrieren(&self, connection_id: ConnectionId) -> mpsc::Receiver<ControlMessage> {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_GROESSE);
        self.verbindungen
            .insert(connection_id, VerbindungsSender { connection_id, tx });
        tracing::debug!(conn = %connection_id, "Verbindung im Broadcaster registriert");
        rx
    }

    /// Entfernt eine Verbindung aus dem Broadcaster
    pub fn entfernen(&self, connection_id: &ConnectionId) {
        self.verbindungen.remove(connection_id);
        tracing::debug!(conn = %connection_id, "Verbindung aus Broadcaster entfernt");
    }

    /// Sendet eine Nachricht an eine einzelne Verbindung
    ///
    /// Gibt `true` zurueck wenn die Verbindung registriert war und die
    /// Nachricht eingereiht wurde. `false` heisst: verloren – die
    /// Vermittlung ist best-effort, der Aufrufer behandelt das nicht als
    /// Fehler.
    pub fn an_verbindung_senden(
        &self,
        connection_id: &ConnectionId,
        nachricht: ControlMessage,
    ) -> bool {
        match self.verbindungen.get(connection_id) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(conn = %connection_id, "Senden an unbekannte Verbindung");
                false
            }
        }
    }

    /// Sendet eine Nachricht an alle registrierten Verbindungen
    ///
    /// Fehler einzelner Verbindungen sind isoliert. Gibt die Anzahl der
    /// erfolgreichen Einreihungen zurueck.
    pub fn an_alle_senden(&self, nachricht: ControlMessage) -> usize {
        let mut gesendet = 0;
        self.verbindungen.iter().for_each(|eintrag| {
            if eintrag.value().senden(nachricht.clone()) {
                gesendet += 1;
            }
        });
        gesendet
    }

    /// Anzahl der registrierten Verbindungen
    pub fn anzahl(&self) -> usize {
        self.verbindungen.len()
    }

    /// Prueft ob eine Verbindung registriert ist
    pub fn ist_registriert(&self, connection_id: &ConnectionId) -> bool {
        self.verbindungen.contains_key(connection_id)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_nachricht(id: u32) -> ControlMessage {
        ControlMessage::ping(id, 12345)
    }

    #[tokio::test]
    async fn registrieren_und_senden() {
        let broadcaster = EventBroadcaster::neu();
        let conn = ConnectionId::neu();

        let mut rx = broadcaster.registrieren(conn);
        assert!(broadcaster.ist_registriert(&conn));

        assert!(broadcaster.an_verbindung_senden(&conn, test_nachricht(1)));

        let empfangen = rx.try_recv().expect("Nachricht muss vorhanden sein");
        assert_eq!(empfangen.request_id, 1);
    }

    #[tokio::test]
    async fn senden_an_unbekannte_verbindung() {
        let broadcaster = EventBroadcaster::neu();
        assert!(!broadcaster.an_verbindung_senden(&ConnectionId::neu(), test_nachricht(1)));
    }

    #[tokio::test]
    async fn an_alle_senden_mit_isolation() {
        let broadcaster = EventBroadcaster::neu();

        let conns: Vec<ConnectionId> = (0..4).map(|_| ConnectionId::neu()).collect();
        let mut receivers: Vec<_> = conns
            .iter()
            .map(|cid| broadcaster.registrieren(*cid))
            .collect();

        // Eine Verbindung "stirbt": Receiver droppen, Queue ist geschlossen
        let tote = receivers.pop().unwrap();
        drop(tote);

        let gesendet = broadcaster.an_alle_senden(test_nachricht(99));
        // Die tote Verbindung zaehlt nicht, die anderen bekommen die Nachricht
        assert_eq!(gesendet, 3);
        for rx in &mut receivers {
            assert!(rx.try_recv().is_ok());
        }
    }

    #[tokio::test]
    async fn reihenfolge_pro_verbindung_bleibt_erhalten() {
        let broadcaster = EventBroadcaster::neu();
        let conn = ConnectionId::neu();
        let mut rx = broadcaster.registrieren(conn);

        for i in 0..10u32 {
            assert!(broadcaster.an_verbindung_senden(&conn, test_nachricht(i)));
        }

        for i in 0..10u32 {
            assert_eq!(rx.try_recv().unwrap().request_id, i);
        }
    }

    #[tokio::test]
    async fn volle_queue_verwirft_statt_zu_blockieren() {
        let broadcaster = EventBroadcaster::neu();
        let conn = ConnectionId::neu();
        let _rx = broadcaster.registrieren(conn);

        // Queue bis zum Limit fuellen
        for i in 0..SEND_QUEUE_GROESSE as u32 {
            assert!(broadcaster.an_verbindung_senden(&conn, test_nachricht(i)));
        }
        // Die naechste Nachricht wird verworfen, kein Haengen
        assert!(!broadcaster.an_verbindung_senden(&conn, test_nachricht(9999)));
    }

    #[test]
    fn entfernen_bereinigt_registrierung() {
        let broadcaster = EventBroadcaster::neu();
        let conn = ConnectionId::neu();

        let _rx = broadcaster.registrieren(conn);
        assert_eq!(broadcaster.anzahl(), 1);

        broadcaster.entfernen(&conn);
        assert!(!broadcaster.ist_registriert(&conn));
        assert_eq!(broadcaster.anzahl(), 0);
    }
}
