//! visavis-signaling – Praesenz und Ruf-Vermittlung
//!
//! Dieser Crate implementiert die Serverseite von Visavis: er verwaltet
//! TCP-Verbindungen, die Praesenz-Registry (wer ist gerade erreichbar) und
//! die Vermittlung von Ruf-Signalen zwischen zwei Clients.
//!
//! ## Architektur
//!
//! ```text
//! TCP Listener (SignalingServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- PresenceRegistry  (announce/leave, ConnectionId <-> UserId)
//!     +-- CallRouter        (call-initiate/accept/reject vermitteln)
//!
//! EventBroadcaster – Send-Queues aller Verbindungen, Praesenz-Fanout
//! ```
//!
//! Vermittlung ist at-most-once und best-effort: kein Retry, keine
//! Warteschlange fuer Offline-Ziele, keine Zustellbestaetigung.

pub mod broadcast;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod router;
pub mod server_state;
pub mod tcp;

// Bequeme Re-Exporte
pub use broadcast::EventBroadcaster;
pub use connection::ClientConnection;
pub use dispatcher::MessageDispatcher;
pub use error::{SignalingError, SignalingResult};
pub use presence::PresenceRegistry;
pub use router::{CallRouter, RoutingErgebnis};
pub use server_state::{SignalingConfig, SignalingState};
pub use tcp::SignalingServer;
