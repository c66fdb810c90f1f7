//! Mock Capture-Device für Tests ohne Audio-Hardware
//!
//! Zählt Belegungen und Freigaben, simuliert die "Mikrofon aktiv"-Anzeige
//! und erlaubt es, Chunks gezielt auszulösen.

use super::device::{AudioError, AudioSink, CaptureDevice, CaptureHandle, SinkSlot};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct MockState {
    acquisitions: AtomicUsize,
    releases: AtomicUsize,
    in_use: AtomicBool,
    failure: Mutex<Option<AudioError>>,
    acquire_delay: Mutex<Option<Duration>>,
    active_sink: Mutex<Option<SinkSlot>>,
}

/// Simuliertes Mikrofon
#[derive(Clone, Default)]
pub struct MockCaptureDevice {
    state: Arc<MockState>,
}

impl MockCaptureDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jede Belegung schlägt mit `err` fehl
    pub fn failing(err: AudioError) -> Self {
        let device = Self::new();
        device.set_failure(Some(err));
        device
    }

    /// Verzögert `acquire` (simuliert Berechtigungsdialog / Treiberstart)
    pub fn with_acquire_delay(self, delay: Duration) -> Self {
        *self.state.acquire_delay.lock() = Some(delay);
        self
    }

    pub fn set_failure(&self, failure: Option<AudioError>) {
        *self.state.failure.lock() = failure;
    }

    pub fn acquisitions(&self) -> usize {
        self.state.acquisitions.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    /// Entspricht der Mikrofon-Anzeige des Betriebssystems
    pub fn in_use(&self) -> bool {
        self.state.in_use.load(Ordering::SeqCst)
    }

    /// Liefert einen Chunk an den aktuell registrierten Sink
    ///
    /// Gibt `false` zurück, wenn das Gerät nicht belegt ist.
    pub fn emit(&self, chunk: Vec<u8>) -> bool {
        let slot = self.state.active_sink.lock().clone();
        match slot {
            Some(slot) => slot.deliver(chunk),
            None => false,
        }
    }
}

impl CaptureDevice for MockCaptureDevice {
    fn acquire(&self, sink: AudioSink) -> Result<CaptureHandle, AudioError> {
        let delay = *self.state.acquire_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if let Some(err) = self.state.failure.lock().clone() {
            tracing::debug!("Mock capture device refusing acquisition: {}", err);
            return Err(err);
        }

        let slot = SinkSlot::new(sink);
        self.state.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.state.in_use.store(true, Ordering::SeqCst);
        *self.state.active_sink.lock() = Some(slot.clone());

        let state = Arc::clone(&self.state);
        Ok(CaptureHandle::new(slot, move || {
            state.active_sink.lock().take();
            state.in_use.store(false, Ordering::SeqCst);
            state.releases.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

impl std::fmt::Debug for MockCaptureDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCaptureDevice")
            .field("acquisitions", &self.acquisitions())
            .field("releases", &self.releases())
            .field("in_use", &self.in_use())
            .finish()
    }
}
