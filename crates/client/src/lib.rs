//! visavis-client – Client-seitige Verbindung zum Signaling-Server
//!
//! Baut die TCP-Verbindung auf, meldet die extern vergebene Identitaet an
//! und pumpt danach Ereignisse: Server-Zustellungen in die Sitzungs-Queue
//! und den Praesenz-Kanal, ausgehende Sitzungs-Signale auf den Socket.

pub mod connection;

pub use connection::{ConnectionError, ServerConnection};
