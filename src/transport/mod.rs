//! Transport Module - WebSocket Verbindung zum Tutoring-Server
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Server:
//! - WebSocket-Verbindung mit InitSession-Handshake
//! - Senden von Audio-Chunks und Kontroll-Nachrichten
//! - Eingehende Frames klassifizieren und an Abonnenten verteilen
//!

mod channel;
mod messages;
mod router;

pub use channel::{ConnectionStatus, Handshake, TransportChannel};
pub use messages::*;
pub use router::{HandshakeResult, MessageRouter};
