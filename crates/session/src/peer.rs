//! Peer-Seam – Schnittstelle zur externen Verhandlungs-Bibliothek
//!
//! Die eigentliche Medienverbindung (Transport, Codecs, ICE) handelt eine
//! externe Peer-Verbindungs-Bibliothek aus. Die Sitzung sieht davon nur
//! opake JSON-Payloads: ein Angebot beim Start, eine Antwort beim
//! Abschluss. Inhalte werden nie interpretiert.

use async_trait::async_trait;
use thiserror::Error;

/// Fehler der Peer-Verhandlung
///
/// Wird von der Sitzung wie eine Ablehnung durch die Gegenseite
/// behandelt: Abbau und Rueckfall auf Leerlauf.
#[derive(Debug, Clone, Error)]
#[error("Verhandlung fehlgeschlagen: {0}")]
pub struct VerhandlungsFehler(pub String);

/// Laufende oder halboffene Peer-Verhandlung
#[async_trait]
pub trait PeerVerbindung: Send {
    /// Schliesst eine ausgehende Verhandlung mit der Antwort der Gegenseite ab
    async fn antwort_anwenden(
        &mut self,
        antwort: serde_json::Value,
    ) -> Result<(), VerhandlungsFehler>;

    /// Baut die Verbindung ab (idempotent)
    fn schliessen(&mut self);
}

/// Fabrik fuer Peer-Verhandlungen
#[async_trait]
pub trait PeerFabrik: Send + Sync {
    /// Startet eine ausgehende Verhandlung und liefert das generierte Angebot
    async fn ausgehend(
        &self,
    ) -> Result<(Box<dyn PeerVerbindung>, serde_json::Value), VerhandlungsFehler>;

    /// Startet eine eingehende Verhandlung aus dem Angebot der Gegenseite
    /// und liefert die generierte Antwort
    async fn eingehend(
        &self,
        angebot: serde_json::Value,
    ) -> Result<(Box<dyn PeerVerbindung>, serde_json::Value), VerhandlungsFehler>;
}
