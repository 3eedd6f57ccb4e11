//! visavis-protocol – Signalisierungsprotokoll zwischen Client und Server
//!
//! Definiert die Steuerungsnachrichten (Anmeldung, Praesenz, Rufaufbau)
//! und das Frame-basierte Wire-Format fuer die TCP-Verbindung.

pub mod control;
pub mod wire;

pub use control::{ControlMessage, ControlPayload, ErrorCode};
pub use wire::FrameCodec;
