//! Tutor Session - Echtzeit-Transport für Tutoring-Sessions
//!
//! Eine Client-Bibliothek für sprachbasierte Tutoring-Sessions mit:
//! - WebSocket-Verbindung mit InitSession-Handshake
//! - Mikrofon-Aufnahme in festen PCM-Chunks
//! - Verteilung eingehender Audio- und Event-Frames an Abonnenten
//! - Deterministischer Freigabe des Mikrofons beim Trennen

pub mod capture;
pub mod config;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use capture::{AudioError, CaptureDevice, CaptureState, MockCaptureDevice};
pub use config::{CaptureConfig, ConfigError, TransportConfig};
pub use session::{SessionError, SessionEvent, TutorSession};
pub use transport::{ConnectionStatus, ServerEvent, SessionConfig};

/// Initialisiert das Logging (`RUST_LOG` überschreibt die Defaults)
pub fn init_logging() {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["tutor_session=debug", "tungstenite=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    // Zweiter Aufruf (z.B. in Tests) ist harmlos
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
