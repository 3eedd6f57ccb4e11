//! Medien-Seam – Schnittstelle zur lokalen Medienerfassung
//!
//! Kamera und Mikrofon gehoeren einem externen Kollaborateur; die
//! Zustandsmaschine startet und stoppt ihn nur. Die Schnittstelle ist
//! bewusst schmal: erfassen, Spuren schalten, stoppen.

use async_trait::async_trait;
use thiserror::Error;

/// Grund warum die Medienerfassung fehlschlug
///
/// Terminal fuer den Rufversuch – es gibt keinen Retry-Loop. Die Maschine
/// faellt auf Leerlauf zurueck und der Benutzer bekommt einen Hinweis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MedienFehler {
    /// Geraet wird von einer anderen Anwendung benutzt
    #[error("Kamera oder Mikrofon ist belegt")]
    Belegt,

    /// Benutzer oder System hat den Zugriff verweigert
    #[error("Zugriff auf Kamera/Mikrofon verweigert")]
    ZugriffVerweigert,

    /// Sonstiger Erfassungsfehler
    #[error("Medienerfassung fehlgeschlagen: {0}")]
    Andere(String),
}

/// Handle auf laufende lokale Medien (Kamera + Mikrofon)
///
/// Spuren schalten ist zustandserhaltend: die Sitzung bleibt in ihrem
/// Zustand, nur die Spur wird deaktiviert. `stoppen` gibt die Geraete
/// endgueltig frei.
pub trait MedienStrom: Send {
    /// Aktiviert oder deaktiviert die Mikrofon-Spur
    fn mikrofon_aktivieren(&mut self, aktiv: bool);

    /// Aktiviert oder deaktiviert die Kamera-Spur
    fn kamera_aktivieren(&mut self, aktiv: bool);

    /// Stoppt alle Spuren und gibt die Geraete frei
    fn stoppen(&mut self);
}

/// Erfasst lokale Medien
///
/// Die Erfassung ist eine blockierende/suspendierende Operation; die
/// Zustandsmaschine ruft sie nur aus ihrer einzigen Ereignis-Schleife
/// auf, sodass nie zwei Erfassungen gleichzeitig laufen.
#[async_trait]
pub trait MedienQuelle: Send + Sync {
    /// Erfasst Kamera und Mikrofon
    async fn erfassen(&self) -> Result<Box<dyn MedienStrom>, MedienFehler>;
}
