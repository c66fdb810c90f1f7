//! Fehlerarten, die über den Error-Kanal an die UI gemeldet werden

use crate::capture::AudioError;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Unterscheidbare Fehlerarten der Session
///
/// Die UI muss Berechtigungs- und Handshake-Fehler von allgemeinen
/// Verbindungsfehlern unterscheiden können, daher eigene Varianten statt
/// eines generischen Strings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport is not connected")]
    TransportNotReady,

    #[error("Session handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Kurzer, stabiler Name der Fehlerart (für Logs und UI-Mapping)
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::DeviceUnavailable(_) => "device_unavailable",
            SessionError::PermissionDenied(_) => "permission_denied",
            SessionError::TransportNotReady => "transport_not_ready",
            SessionError::HandshakeFailed(_) => "handshake_failed",
            SessionError::Transport(_) => "transport_error",
        }
    }

    /// Fehler, bei denen der Benutzer etwas tun muss (Berechtigung erteilen,
    /// Mikrofon anschließen), statt einfach erneut zu verbinden
    pub fn needs_user_action(&self) -> bool {
        matches!(
            self,
            SessionError::PermissionDenied(_) | SessionError::DeviceUnavailable(_)
        )
    }
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::PermissionDenied(reason) => SessionError::PermissionDenied(reason),
            other => SessionError::DeviceUnavailable(other.to_string()),
        }
    }
}
