//! Message Types für das Tutoring-Protokoll
//!
//! Kontroll-Nachrichten sind JSON-Text-Frames, Audio wird als Binary-Frame
//! ohne zusätzliches Framing übertragen (ein Chunk = ein Frame).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Typ der Handshake-Antwort
pub const SESSION_STARTED: &str = "session_started";

// ============================================================================
// SESSION CONFIGURATION
// ============================================================================

/// Konfiguration einer Tutoring-Session, wird nur für den Handshake benutzt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub subject: String,
    pub skill: String,
    pub subskill: String,
    pub student_id: i64,
    pub competency_score: f64,
}

// ============================================================================
// CLIENT → SERVER MESSAGES
// ============================================================================

/// Initialisierung der Session, wird genau einmal direkt nach dem Öffnen
/// der Verbindung gesendet
#[derive(Debug, Clone, Serialize)]
pub struct InitSessionPayload<'a> {
    pub text: &'static str,
    pub data: &'a SessionConfig,
}

impl<'a> InitSessionPayload<'a> {
    pub fn new(data: &'a SessionConfig) -> Self {
        Self {
            text: "InitSession",
            data,
        }
    }
}

/// Ausgehendes Frame
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// Audio-Chunk (Binary-Frame)
    Audio(Vec<u8>),
    /// Strukturierte Nachricht (JSON-Text-Frame)
    Event(Value),
}

// ============================================================================
// SERVER → CLIENT MESSAGES
// ============================================================================

/// Eingehendes Frame, nur nach Art klassifiziert, noch nicht interpretiert
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Binary(Vec<u8>),
    Text(String),
}

/// Strukturierte Server-Nachricht `{"type": "...", ...}`
///
/// Außer `session_started` werden alle Nachrichten unverändert an die
/// Abonnenten weitergereicht.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ServerEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn is_session_started(&self) -> bool {
        self.event_type == SESSION_STARTED
    }

    /// `session_id` aus einer `session_started`-Nachricht
    pub fn session_id(&self) -> Option<&str> {
        self.field("session_id").and_then(Value::as_str)
    }
}
