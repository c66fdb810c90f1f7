//! Konfiguration für Transport und Audio-Capture
//!
//! Alle Werte haben sinnvolle Defaults und können über Umgebungsvariablen
//! überschrieben werden:
//! - `TUTOR_SESSION_URL` - WebSocket-Endpunkt des Tutoring-Servers
//! - `TUTOR_HANDSHAKE_TIMEOUT_SECS` - Timeout für `session_started`
//! - `TUTOR_OUTBOUND_QUEUE` - Kapazität der Sende-Queue
//! - `TUTOR_SAMPLE_RATE` / `TUTOR_CHUNK_MS` - Audio-Format der Chunks

use std::time::Duration;
use thiserror::Error;
use url::Url;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Standard-Endpunkt (lokaler Entwicklungsserver)
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8000/ws/tutoring";

/// Handshake-Timeout bis `session_started` eintreffen muss
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(12);

/// Maximale Anzahl Frames, die auf den Writer-Task warten dürfen
///
/// Ein Chunk: alles, was nicht sofort weg kann, wird verworfen.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1;

/// Kapazität des Broadcast-Kanals für Session-Events
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Sample Rate der gesendeten Chunks (16kHz reicht für Sprache)
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Dauer eines Audio-Chunks
pub const DEFAULT_CHUNK_DURATION: Duration = Duration::from_millis(100);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported URL scheme '{0}' (expected ws, wss, http or https)")]
    UnsupportedScheme(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

// ============================================================================
// TRANSPORT CONFIG
// ============================================================================

/// Einstellungen für den Transport-Kanal
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub server_url: Url,
    pub handshake_timeout: Duration,
    pub outbound_capacity: usize,
    pub event_capacity: usize,
}

impl TransportConfig {
    /// Erstellt eine Konfiguration für den gegebenen Endpunkt
    ///
    /// `http://` und `https://` werden wie beim Signaling-Server zu
    /// `ws://` bzw. `wss://` umgeschrieben.
    pub fn new(server_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            server_url: parse_ws_url(server_url)?,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        })
    }

    /// Liest die Konfiguration aus der Umgebung
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = std::env::var("TUTOR_SESSION_URL")
            .unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());

        let mut config = Self::new(&url)?;

        if let Some(secs) = env_number::<u64>("TUTOR_HANDSHAKE_TIMEOUT_SECS")? {
            config = config.with_handshake_timeout(Duration::from_secs(secs));
        }
        if let Some(capacity) = env_number::<usize>("TUTOR_OUTBOUND_QUEUE")? {
            config = config.with_outbound_capacity(capacity);
        }

        Ok(config)
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Setzt die Queue-Kapazität (mindestens 1, damit das Init-Frame Platz hat)
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server_url: Url::parse(DEFAULT_SERVER_URL).expect("default URL is valid"),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

// ============================================================================
// CAPTURE CONFIG
// ============================================================================

/// Format der erzeugten Audio-Chunks (immer Mono, 16-bit PCM little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub chunk_duration: Duration,
}

impl CaptureConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(rate) = env_number::<u32>("TUTOR_SAMPLE_RATE")? {
            if rate == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "TUTOR_SAMPLE_RATE",
                    value: rate.to_string(),
                });
            }
            config.sample_rate = rate;
        }
        if let Some(ms) = env_number::<u64>("TUTOR_CHUNK_MS")? {
            if ms == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "TUTOR_CHUNK_MS",
                    value: ms.to_string(),
                });
            }
            config.chunk_duration = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Anzahl Samples pro Chunk
    pub fn chunk_samples(&self) -> usize {
        let samples = self.sample_rate as u128 * self.chunk_duration.as_millis() / 1000;
        (samples as usize).max(1)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_duration: DEFAULT_CHUNK_DURATION,
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn parse_ws_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };

    if url.scheme() != scheme {
        // http/ws sind beide "special schemes", der Wechsel ist erlaubt
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
    }

    Ok(url)
}

fn env_number<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}
