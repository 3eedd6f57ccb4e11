//! visavis-session – Ruf-Sitzungs-Zustandsmaschine
//!
//! Dieser Crate implementiert die Clientseite eines Rufs: eine explizite
//! Zustandsmaschine die genau eine Sitzung gleichzeitig fuehrt und die
//! Medienerfassung sowie die Peer-Verhandlung an ihren Uebergaengen
//! startet und stoppt.
//!
//! ## Zustaende
//!
//! ```text
//! Leerlauf --RufStarten-->       Rufaufbau --RufAngenommen--> Verbunden
//! Leerlauf --EingehenderRuf-->   Klingelt  --Annehmen-->      Verbunden
//!                                Klingelt  --Ablehnen-->      Leerlauf
//! jeder Zustand --Auflegen/Trennung/Fehler--> Leerlauf
//! ```
//!
//! Medienerfassung und Peer-Verhandlung sind externe Kollaborateure und
//! haengen als Traits an der Maschine (`MedienQuelle`, `PeerFabrik`);
//! Tests haengen Mocks ein.

pub mod media;
pub mod peer;
pub mod session;

// Bequeme Re-Exporte
pub use media::{MedienFehler, MedienQuelle, MedienStrom};
pub use peer::{PeerFabrik, PeerVerbindung, VerhandlungsFehler};
pub use session::{
    CallSession, NutzerHinweis, RufZustand, SessionConfig, SessionHandles, SitzungsEreignis,
};
