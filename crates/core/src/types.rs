//! Gemeinsame Identifikationstypen fuer Visavis
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen
//! verschiedenen ID-Arten zur Compilezeit auszuschliessen. Insbesondere
//! duerfen UserId und ConnectionId nie vertauscht werden: eine UserId ist
//! eine stabile, extern vergebene Identitaet, eine ConnectionId gilt nur
//! solange die zugehoerige Verbindung offen ist.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stabile Benutzer-Identitaet
///
/// Wird vom externen Auth-Dienst vergeben und hier nur durchgereicht –
/// Visavis interpretiert den Inhalt nicht. Ein Benutzer kann gleichzeitig
/// mehrere Verbindungen (Geraete/Tabs) unter derselben UserId haben.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Erstellt eine UserId aus einem beliebigen String-artigen Wert
    pub fn neu(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Gibt die ID als &str zurueck
    pub fn als_str(&self) -> &str {
        &self.0
    }

    /// Prueft ob die ID leer ist (ungueltig als Routing-Ziel)
    pub fn ist_leer(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "user:{}", self.0)
    }
}

/// Eindeutige Verbindungs-ID
///
/// Wird vom Server pro akzeptierter Verbindung vergeben. Solange die
/// Verbindung offen ist wird die ID nicht wiederverwendet; nach dem
/// Schliessen hat sie keine Bedeutung mehr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Erstellt eine neue zufaellige ConnectionId
    pub fn neu() -> Self {
        Self(Uuid::new_v4())
    }

    /// Gibt die innere UUID zurueck
    pub fn inner(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::neu()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}
