//! Praesenz-Registry – Wer ist gerade erreichbar?
//!
//! Bidirektionale Abbildung zwischen Verbindungs-ID und Benutzer-Identitaet.
//! Ein Eintrag existiert genau dann, wenn die zugehoerige Verbindung offen
//! ist und sich angemeldet hat. Es gibt keine Persistenz: ein Neustart
//! verliert alle Praesenz, Clients melden sich beim Reconnect neu an.
//!
//! ## Nebenlaeufigkeit
//! Anmelden/Abmelden/Aufloesen koennen aus verschiedenen Verbindungs-Tasks
//! gleichzeitig eintreffen. Vorwaerts- und Rueckwaerts-Index stehen unter
//! EINEM Mutex, damit kein Zeitfenster existiert in dem `aufloesen` eine
//! Verbindung liefert die `schnappschuss` nicht mehr kennt.
//!
//! ## Mehrgeraete-Aufloesung
//! Ein Benutzer darf mehrere Verbindungen gleichzeitig anmelden. Beim
//! Aufloesen gewinnt die zuletzt angemeldete Verbindung (last-writer-wins
//! ueber eine Anmelde-Sequenznummer) – bewusst keine Mehrgeraete-Zustellung.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use visavis_core::types::{ConnectionId, UserId};

/// Eintrag einer angemeldeten Verbindung
#[derive(Debug, Clone)]
struct PresenceEintrag {
    user_id: UserId,
    display_name: String,
    /// Anmelde-Sequenznummer, monoton steigend ueber alle Anmeldungen
    seq: u64,
}

#[derive(Default)]
struct RegistryInner {
    /// Verbindung -> angemeldete Identitaet
    vorwaerts: HashMap<ConnectionId, PresenceEintrag>,
    /// Identitaet -> alle angemeldeten Verbindungen (Rueckwaerts-Index fuer
    /// O(1)-Aufloesung statt linearer Suche ueber alle Eintraege)
    rueckwaerts: HashMap<UserId, Vec<ConnectionId>>,
    /// Naechste Anmelde-Sequenznummer
    naechste_seq: u64,
}

/// Praesenz-Registry
///
/// Thread-safe via Arc + Mutex. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl PresenceRegistry {
    /// Erstellt eine neue, leere Registry
    pub fn neu() -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
        }
    }

    /// Meldet eine Verbindung unter einer Benutzer-Identitaet an
    ///
    /// Idempotent: eine erneute Anmeldung derselben Verbindung ueberschreibt
    /// den Eintrag und macht die Verbindung zur zuletzt angemeldeten fuer
    /// diese Identitaet. Meldet die Verbindung vorher eine andere Identitaet
    /// an, wird der alte Eintrag ersetzt.
    ///
    /// Gibt `true` zurueck wenn die Verbindung neu angemeldet wurde (also
    /// vorher keinen Eintrag hatte).
    pub fn anmelden(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        display_name: impl Into<String>,
    ) -> bool {
        let display_name = display_name.into();
        let mut inner = self.inner.lock();

        let seq = inner.naechste_seq;
        inner.naechste_seq += 1;

        // Alten Eintrag der Verbindung (falls vorhanden) aus dem
        // Rueckwaerts-Index loesen
        let vorheriger = inner.vorwaerts.insert(
            connection_id,
            PresenceEintrag {
                user_id: user_id.clone(),
                display_name,
                seq,
            },
        );
        if let Some(alt) = &vorheriger {
            Self::aus_rueckwaerts_entfernen(&mut inner, &alt.user_id, &connection_id);
        }

        inner
            .rueckwaerts
            .entry(user_id.clone())
            .or_default()
            .push(connection_id);

        tracing::info!(conn = %connection_id, user = %user_id, "Verbindung angemeldet");
        vorheriger.is_none()
    }

    /// Entfernt den Eintrag einer Verbindung
    ///
    /// Kein Fehler wenn die Verbindung nie angemeldet war. Gibt `true`
    /// zurueck wenn tatsaechlich ein Eintrag entfernt wurde – nur dann ist
    /// eine Praesenz-Benachrichtigung faellig.
    pub fn abmelden(&self, connection_id: &ConnectionId) -> bool {
        let mut inner = self.inner.lock();

        match inner.vorwaerts.remove(connection_id) {
            Some(eintrag) => {
                Self::aus_rueckwaerts_entfernen(&mut inner, &eintrag.user_id, connection_id);
                tracing::info!(conn = %connection_id, user = %eintrag.user_id, "Verbindung abgemeldet");
                true
            }
            None => false,
        }
    }

    /// Loest eine Benutzer-Identitaet zu einer lebenden Verbindung auf
    ///
    /// Bei mehreren angemeldeten Verbindungen gewinnt die mit der hoechsten
    /// Anmelde-Sequenznummer (zuletzt angemeldet).
    pub fn aufloesen(&self, user_id: &UserId) -> Option<ConnectionId> {
        let inner = self.inner.lock();
        let kandidaten = inner.rueckwaerts.get(user_id)?;
        kandidaten
            .iter()
            .filter_map(|cid| inner.vorwaerts.get(cid).map(|e| (cid, e.seq)))
            .max_by_key(|(_, seq)| *seq)
            .map(|(cid, _)| *cid)
    }

    /// Gibt die angemeldete Identitaet einer Verbindung zurueck
    pub fn benutzer_von(&self, connection_id: &ConnectionId) -> Option<UserId> {
        self.inner
            .lock()
            .vorwaerts
            .get(connection_id)
            .map(|e| e.user_id.clone())
    }

    /// Gibt den Anzeigenamen einer Verbindung zurueck
    pub fn anzeigename_von(&self, connection_id: &ConnectionId) -> Option<String> {
        self.inner
            .lock()
            .vorwaerts
            .get(connection_id)
            .map(|e| e.display_name.clone())
    }

    /// Menge der aktuell angemeldeten Benutzer (Mehrgeraete kollabieren)
    pub fn schnappschuss(&self) -> HashSet<UserId> {
        self.inner.lock().rueckwaerts.keys().cloned().collect()
    }

    /// Anzahl der unterschiedlichen angemeldeten Benutzer
    pub fn benutzer_anzahl(&self) -> usize {
        self.inner.lock().rueckwaerts.len()
    }

    /// Anzahl der angemeldeten Verbindungen
    pub fn verbindungs_anzahl(&self) -> usize {
        self.inner.lock().vorwaerts.len()
    }

    /// Prueft ob ein Benutzer mit mindestens einer Verbindung angemeldet ist
    pub fn ist_erreichbar(&self, user_id: &UserId) -> bool {
        self.inner.lock().rueckwaerts.contains_key(user_id)
    }

    fn aus_rueckwaerts_entfernen(
        inner: &mut RegistryInner,
        user_id: &UserId,
        connection_id: &ConnectionId,
    ) {
        if let Some(conns) = inner.rueckwaerts.get_mut(user_id) {
            conns.retain(|cid| cid != connection_id);
            if conns.is_empty() {
                inner.rueckwaerts.remove(user_id);
            }
        }
    }
}

impl Default for PresenceRegistry {
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

    #[test]
    fn anmelden_und_abmelden() {
        let registry = PresenceRegistry::neu();
        let conn = ConnectionId::neu();
        let user = UserId::neu("u1");

        assert!(registry.anmelden(conn, user.clone(), "Alice"));
        assert!(registry.ist_erreichbar(&user));
        assert_eq!(registry.aufloesen(&user), Some(conn));
        assert_eq!(registry.benutzer_anzahl(), 1);

        assert!(registry.abmelden(&conn));
        assert!(!registry.ist_erreichbar(&user));
        assert_eq!(registry.aufloesen(&user), None);
        assert_eq!(registry.benutzer_anzahl(), 0);
    }

    #[test]
    fn abmelden_unbekannter_verbindung_ist_kein_fehler() {
        let registry = PresenceRegistry::neu();
        assert!(!registry.abmelden(&ConnectionId::neu()));
    }

    #[test]
    fn anmelden_ist_idempotent() {
        let registry = PresenceRegistry::neu();
        let conn = ConnectionId::neu();
        let user = UserId::neu("u1");

        assert!(registry.anmelden(conn, user.clone(), "Alice"));
        // Zweite Anmeldung derselben Verbindung: kein neuer Eintrag
        assert!(!registry.anmelden(conn, user.clone(), "Alice"));
        assert_eq!(registry.verbindungs_anzahl(), 1);
        assert_eq!(registry.benutzer_anzahl(), 1);
        assert_eq!(registry.aufloesen(&user), Some(conn));
    }

    #[test]
    fn letzte_anmeldung_gewinnt_bei_mehreren_geraeten() {
        let registry = PresenceRegistry::neu();
        let user = UserId::neu("u1");
        let geraet_a = ConnectionId::neu();
        let geraet_b = ConnectionId::neu();

        registry.anmelden(geraet_a, user.clone(), "Alice");
        registry.anmelden(geraet_b, user.clone(), "Alice");

        // Zuletzt angemeldetes Geraet gewinnt
        assert_eq!(registry.aufloesen(&user), Some(geraet_b));

        // Erneute Anmeldung von Geraet A macht es wieder zum Gewinner
        registry.anmelden(geraet_a, user.clone(), "Alice");
        assert_eq!(registry.aufloesen(&user), Some(geraet_a));

        // Im Schnappschuss erscheint der Benutzer genau einmal
        assert_eq!(registry.schnappschuss().len(), 1);
        assert_eq!(registry.verbindungs_anzahl(), 2);
    }

    #[test]
    fn abmelden_eines_geraets_laesst_benutzer_erreichbar() {
        let registry = PresenceRegistry::neu();
        let user = UserId::neu("u1");
        let geraet_a = ConnectionId::neu();
        let geraet_b = ConnectionId::neu();

        registry.anmelden(geraet_a, user.clone(), "Alice");
        registry.anmelden(geraet_b, user.clone(), "Alice");

        assert!(registry.abmelden(&geraet_b));
        // Benutzer bleibt ueber das andere Geraet erreichbar
        assert!(registry.ist_erreichbar(&user));
        assert_eq!(registry.aufloesen(&user), Some(geraet_a));
    }

    #[test]
    fn identitaetswechsel_ersetzt_alten_eintrag() {
        let registry = PresenceRegistry::neu();
        let conn = ConnectionId::neu();
        let alt = UserId::neu("u1");
        let neu = UserId::neu("u2");

        registry.anmelden(conn, alt.clone(), "Alice");
        registry.anmelden(conn, neu.clone(), "Alice");

        assert!(!registry.ist_erreichbar(&alt));
        assert_eq!(registry.aufloesen(&neu), Some(conn));
        assert_eq!(registry.benutzer_anzahl(), 1);
    }

    #[test]
    fn schnappschuss_entspricht_lebenden_eintraegen() {
        let registry = PresenceRegistry::neu();
        let c1 = ConnectionId::neu();
        let c2 = ConnectionId::neu();
        let c3 = ConnectionId::neu();

        registry.anmelden(c1, UserId::neu("u1"), "Alice");
        registry.anmelden(c2, UserId::neu("u2"), "Bob");
        registry.anmelden(c3, UserId::neu("u2"), "Bob");

        let erwartet: HashSet<UserId> =
            [UserId::neu("u1"), UserId::neu("u2")].into_iter().collect();
        assert_eq!(registry.schnappschuss(), erwartet);

        registry.abmelden(&c2);
        registry.abmelden(&c3);
        let erwartet: HashSet<UserId> = [UserId::neu("u1")].into_iter().collect();
        assert_eq!(registry.schnappschuss(), erwartet);
    }

    #[test]
    fn aufloesen_none_genau_wenn_nicht_im_schnappschuss() {
        let registry = PresenceRegistry::neu();
        let user = UserId::neu("u1");
        assert!(registry.aufloesen(&user).is_none());
        assert!(!registry.schnappschuss().contains(&user));

        let conn = ConnectionId::neu();
        registry.anmelden(conn, user.clone(), "Alice");
        assert!(registry.aufloesen(&user).is_some());
        assert!(registry.schnappschuss().contains(&user));
    }

    #[test]
    fn anzeigename_und_benutzer_von() {
        let registry = PresenceRegistry::neu();
        let conn = ConnectionId::neu();
        registry.anmelden(conn, UserId::neu("u1"), "Alice");

        assert_eq!(registry.benutzer_von(&conn), Some(UserId::neu("u1")));
        assert_eq!(registry.anzeigename_von(&conn), Some("Alice".to_string()));
        assert_eq!(registry.benutzer_von(&ConnectionId::neu()), None);
    }

    #[test]
    fn clone_teilt_inneren_state() {
        let r1 = PresenceRegistry::neu();
        let r2 = r1.clone();
        let conn = ConnectionId::neu();

        r1.anmelden(conn, UserId::neu("u1"), "Alice");
        assert!(r2.ist_erreichbar(&UserId::neu("u1")));
    }
}
