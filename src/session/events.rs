//! Events, die eine Session an interessierte Beobachter verteilt

use super::SessionError;
use crate::capture::CaptureState;
use crate::transport::ConnectionStatus;

/// Lifecycle-Events einer Tutoring-Session
///
/// Werden über einen `tokio::sync::broadcast`-Kanal verteilt; jeder
/// Abonnent sieht die Events in der Reihenfolge, in der sie ausgelöst wurden.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Verbindungsstatus hat sich geändert
    StatusChanged(ConnectionStatus),

    /// Capture-Status hat sich geändert
    CaptureStateChanged(CaptureState),

    /// Handshake abgeschlossen
    SessionStarted { session_id: String },

    /// Fehler (Error-Kanal für die UI)
    Error(SessionError),
}
