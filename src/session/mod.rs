//! Session Module - Öffentliche Schnittstelle einer Tutoring-Session
//!
//! Dieses Modul verbindet Transport und Capture:
//! - Handshake und Session-Identität
//! - connect / disconnect / send_audio / status
//! - Lifecycle-Events und Error-Kanal für die UI
//!

mod controller;
mod error;
mod events;

pub use controller::TutorSession;
pub use error::SessionError;
pub use events::SessionEvent;
