//! Capture-Device Abstraktion
//!
//! Ein `CaptureDevice` liefert nach `acquire()` fortlaufend Audio-Chunks an
//! einen registrierten Sink. Der zurückgegebene `CaptureHandle` hält das
//! Gerät belegt, bis er freigegeben (oder gedroppt) wird.

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("Microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("Unsupported audio configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

impl AudioError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, AudioError::PermissionDenied(_))
    }
}

// ============================================================================
// SINK
// ============================================================================

/// Empfänger für produzierte Audio-Chunks
pub type AudioSink = Box<dyn FnMut(Vec<u8>) + Send>;

/// Geteilter Platz für den Sink eines belegten Geräts
///
/// Der Lock wird während des gesamten Sink-Aufrufs gehalten. `close()` muss
/// daher auf einen laufenden Callback warten, danach ist der Sink entfernt und
/// wird nie wieder aufgerufen.
#[derive(Clone)]
pub struct SinkSlot {
    sink: Arc<Mutex<Option<AudioSink>>>,
}

impl SinkSlot {
    pub fn new(sink: AudioSink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Some(sink))),
        }
    }

    /// Übergibt einen Chunk an den Sink. Gibt `false` zurück, wenn der Sink
    /// bereits geschlossen wurde.
    pub fn deliver(&self, chunk: Vec<u8>) -> bool {
        let mut guard = self.sink.lock();
        match guard.as_mut() {
            Some(sink) => {
                sink(chunk);
                true
            }
            None => false,
        }
    }

    pub fn close(&self) {
        self.sink.lock().take();
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }
}

impl std::fmt::Debug for SinkSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkSlot")
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// CAPTURE HANDLE
// ============================================================================

/// Belegtes Capture-Gerät
///
/// `release()` ist idempotent. Reihenfolge beim Freigeben: erst den Sink
/// schließen (wartet auf einen laufenden Callback), dann das Gerät selbst
/// freigeben (schaltet die "Mikrofon aktiv"-Anzeige des OS ab).
pub struct CaptureHandle {
    slot: SinkSlot,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureHandle {
    pub fn new(slot: SinkSlot, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            slot,
            on_release: Some(Box::new(on_release)),
        }
    }

    pub fn release(&mut self) {
        self.slot.close();
        if let Some(release) = self.on_release.take() {
            release();
            tracing::debug!("Capture device released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.on_release.is_none()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("released", &self.is_released())
            .finish()
    }
}

// ============================================================================
// CAPTURE DEVICE
// ============================================================================

/// Adapter für ein physisches (oder simuliertes) Mikrofon
///
/// Der Adapter serialisiert `acquire`/`release` nicht selbst; das übernimmt
/// der `CaptureCoordinator`. `acquire` darf blockieren (Berechtigungsdialog,
/// Treiberinitialisierung) und wird deshalb auf einem Blocking-Thread
/// aufgerufen.
pub trait CaptureDevice: Send + Sync + 'static {
    fn acquire(&self, sink: AudioSink) -> Result<CaptureHandle, AudioError>;

    fn release(&self, handle: &mut CaptureHandle) {
        handle.release();
    }
}
