//! Audio Capture Coordinator
//!
//! Verwaltet den Capture-Status und koordiniert das Capture-Device mit dem
//! Transport:
//! - Startet das Mikrofon nur bei verbundenem Transport
//! - Ignoriert doppelte start/stop-Aufrufe
//! - Leitet jeden Chunk unverändert weiter oder verwirft ihn
//!
//! Alle Übergänge laufen nacheinander durch einen fairen (FIFO) async Mutex.
//! Dadurch endet jede Folge von schnellen start/stop-Aufrufen im Zustand des
//! letzten Aufrufs, und jede Belegung des Geräts wird genau einmal freigegeben.

use super::device::{AudioSink, CaptureDevice, CaptureHandle};
use crate::session::{SessionError, SessionEvent};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

// ============================================================================
// CAPTURE STATE
// ============================================================================

/// Aktueller Status der Audio-Aufnahme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// Kein Gerät belegt
    Idle,
    /// Gerät wird belegt
    Starting,
    /// Aufnahme läuft
    Capturing,
    /// Gerät wird freigegeben
    Stopping,
}

impl CaptureState {
    /// Aus Sicht der UI "hört zu"
    pub fn is_listening(self) -> bool {
        matches!(self, CaptureState::Starting | CaptureState::Capturing)
    }
}

// ============================================================================
// AUDIO OUTLET
// ============================================================================

/// Ziel für aufgenommene Chunks (in der Praxis der Transport-Kanal)
pub trait AudioOutlet: Send + Sync + 'static {
    /// Kann gerade gesendet werden?
    fn is_ready(&self) -> bool;

    /// Sendet einen Chunk; `false` heißt verworfen
    fn send_audio(&self, chunk: Vec<u8>) -> bool;
}

// ============================================================================
// COORDINATOR
// ============================================================================

struct CaptureInner {
    state: CaptureState,
    handle: Option<CaptureHandle>,
}

#[derive(Default)]
struct ChunkStats {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Koordiniert Mikrofon und Transport für eine Session
pub struct CaptureCoordinator {
    device: Arc<dyn CaptureDevice>,
    outlet: Arc<dyn AudioOutlet>,
    inner: Mutex<CaptureInner>,
    transitions: tokio::sync::Mutex<()>,
    stats: Arc<ChunkStats>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl CaptureCoordinator {
    pub fn new(
        device: Arc<dyn CaptureDevice>,
        outlet: Arc<dyn AudioOutlet>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            device,
            outlet,
            inner: Mutex::new(CaptureInner {
                state: CaptureState::Idle,
                handle: None,
            }),
            transitions: tokio::sync::Mutex::new(()),
            stats: Arc::new(ChunkStats::default()),
            event_tx,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.inner.lock().state
    }

    pub fn is_listening(&self) -> bool {
        self.state().is_listening()
    }

    /// Anzahl an den Transport übergebener Chunks
    pub fn forwarded_chunks(&self) -> u64 {
        self.stats.forwarded.load(Ordering::Relaxed)
    }

    /// Anzahl verworfener Chunks (Transport nicht verbunden / Queue voll)
    pub fn dropped_chunks(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }

    /// Startet die Aufnahme
    ///
    /// Bereits laufende Aufnahme: no-op. Fehler: `TransportNotReady`,
    /// `PermissionDenied` oder `DeviceUnavailable`; der Status ist danach
    /// wieder `Idle`.
    pub async fn start(&self) -> Result<(), SessionError> {
        let _turn = self.transitions.lock().await;
        self.start_locked().await
    }

    /// Stoppt die Aufnahme und gibt das Gerät frei
    pub async fn stop(&self) {
        let _turn = self.transitions.lock().await;
        self.stop_locked();
    }

    /// Schaltet zwischen Aufnahme und Pause um
    ///
    /// Gibt zurück, ob danach aufgenommen wird.
    pub async fn toggle(&self) -> Result<bool, SessionError> {
        let _turn = self.transitions.lock().await;
        if self.state().is_listening() {
            self.stop_locked();
            Ok(false)
        } else {
            self.start_locked().await?;
            Ok(true)
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    async fn start_locked(&self) -> Result<(), SessionError> {
        if self.state().is_listening() {
            tracing::debug!("Capture already running, ignoring start");
            return Ok(());
        }

        if !self.outlet.is_ready() {
            return Err(self.report(SessionError::TransportNotReady));
        }

        self.set_state(CaptureState::Starting);
        // Setzt auf Idle zurück, falls wir vor dem Ende abbrechen
        let mut starting = StartingGuard {
            coordinator: self,
            armed: true,
        };

        let device = Arc::clone(&self.device);
        let sink = self.make_sink();
        let acquired = tokio::task::spawn_blocking(move || device.acquire(sink)).await;

        let mut handle = match acquired {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                tracing::warn!("Failed to acquire capture device: {}", err);
                return Err(self.report(err.into()));
            }
            Err(join_err) => {
                return Err(self.report(SessionError::DeviceUnavailable(join_err.to_string())));
            }
        };

        // Transport während der Belegung verloren: Gerät nicht behalten
        if !self.outlet.is_ready() {
            self.device.release(&mut handle);
            tracing::info!("Transport dropped while acquiring microphone, releasing it");
            return Err(self.report(SessionError::TransportNotReady));
        }

        {
            let mut inner = self.inner.lock();
            inner.handle = Some(handle);
            inner.state = CaptureState::Capturing;
            let _ = self
                .event_tx
                .send(SessionEvent::CaptureStateChanged(CaptureState::Capturing));
        }
        starting.armed = false;

        tracing::info!("Audio capture started");
        Ok(())
    }

    fn stop_locked(&self) {
        let handle = {
            let mut inner = self.inner.lock();
            match inner.state {
                CaptureState::Idle | CaptureState::Stopping => return,
                CaptureState::Starting | CaptureState::Capturing => {}
            }
            inner.state = CaptureState::Stopping;
            let _ = self
                .event_tx
                .send(SessionEvent::CaptureStateChanged(CaptureState::Stopping));
            inner.handle.take()
        };

        // Außerhalb des Locks: release wartet auf einen laufenden Sink-Callback
        if let Some(mut handle) = handle {
            self.device.release(&mut handle);
        }

        self.set_state(CaptureState::Idle);
        tracing::info!("Audio capture stopped");
    }

    /// Sink, der jeden Chunk an den Outlet weiterreicht
    fn make_sink(&self) -> AudioSink {
        let outlet = Arc::clone(&self.outlet);
        let stats = Arc::clone(&self.stats);

        Box::new(move |chunk: Vec<u8>| {
            if outlet.send_audio(chunk) {
                stats.forwarded.fetch_add(1, Ordering::Relaxed);
            } else {
                let dropped = stats.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!("Dropped audio chunk (total dropped: {})", dropped);
            }
        })
    }

    fn set_state(&self, state: CaptureState) {
        let mut inner = self.inner.lock();
        if inner.state != state {
            inner.state = state;
            let _ = self.event_tx.send(SessionEvent::CaptureStateChanged(state));
        }
    }

    fn report(&self, err: SessionError) -> SessionError {
        let _ = self.event_tx.send(SessionEvent::Error(err.clone()));
        err
    }
}

impl Drop for CaptureCoordinator {
    fn drop(&mut self) {
        // Gerät nie belegt zurücklassen
        if let Some(mut handle) = self.inner.get_mut().handle.take() {
            self.device.release(&mut handle);
        }
    }
}

impl std::fmt::Debug for CaptureCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureCoordinator")
            .field("state", &self.state())
            .field("forwarded_chunks", &self.forwarded_chunks())
            .field("dropped_chunks", &self.dropped_chunks())
            .finish()
    }
}

struct StartingGuard<'a> {
    coordinator: &'a CaptureCoordinator,
    armed: bool,
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.set_state(CaptureState::Idle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{AudioError, MockCaptureDevice};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeOutlet {
        ready: AtomicBool,
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeOutlet {
        fn ready() -> Arc<Self> {
            let outlet = Self::default();
            outlet.ready.store(true, Ordering::SeqCst);
            Arc::new(outlet)
        }
    }

    impl AudioOutlet for FakeOutlet {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn send_audio(&self, chunk: Vec<u8>) -> bool {
            if !self.is_ready() {
                return false;
            }
            self.sent.lock().push(chunk);
            true
        }
    }

    fn coordinator(
        device: &MockCaptureDevice,
        outlet: &Arc<FakeOutlet>,
    ) -> (CaptureCoordinator, broadcast::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = broadcast::channel(64);
        let coordinator = CaptureCoordinator::new(
            Arc::new(device.clone()),
            Arc::clone(outlet) as Arc<dyn AudioOutlet>,
            event_tx,
        );
        (coordinator, event_rx)
    }

    #[tokio::test]
    async fn test_start_without_transport_fails_without_acquiring() {
        let device = MockCaptureDevice::new();
        let outlet = Arc::new(FakeOutlet::default());
        let (coordinator, mut events) = coordinator(&device, &outlet);

        let err = coordinator.start().await.unwrap_err();

        assert_eq!(err, SessionError::TransportNotReady);
        assert_eq!(coordinator.state(), CaptureState::Idle);
        assert_eq!(device.acquisitions(), 0);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Error(SessionError::TransportNotReady)
        );
    }

    #[tokio::test]
    async fn test_permission_denied_returns_to_idle() {
        let device = MockCaptureDevice::failing(AudioError::PermissionDenied("blocked".into()));
        let outlet = FakeOutlet::ready();
        let (coordinator, _events) = coordinator(&device, &outlet);

        let err = coordinator.start().await.unwrap_err();

        assert_eq!(err, SessionError::PermissionDenied("blocked".into()));
        assert_eq!(coordinator.state(), CaptureState::Idle);
        assert!(!device.in_use());
    }

    #[tokio::test]
    async fn test_missing_device_is_reported_as_unavailable() {
        let device = MockCaptureDevice::failing(AudioError::NoInputDevice);
        let outlet = FakeOutlet::ready();
        let (coordinator, _events) = coordinator(&device, &outlet);

        let err = coordinator.start().await.unwrap_err();

        assert!(matches!(err, SessionError::DeviceUnavailable(_)));
        assert_eq!(coordinator.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_releases() {
        let device = MockCaptureDevice::new();
        let outlet = FakeOutlet::ready();
        let (coordinator, _events) = coordinator(&device, &outlet);

        coordinator.start().await.unwrap();
        coordinator.start().await.unwrap();
        assert_eq!(coordinator.state(), CaptureState::Capturing);
        assert_eq!(device.acquisitions(), 1);
        assert!(device.in_use());

        coordinator.stop().await;
        coordinator.stop().await;
        assert_eq!(coordinator.state(), CaptureState::Idle);
        assert_eq!(device.releases(), 1);
        assert!(!device.in_use());
    }

    #[tokio::test]
    async fn test_state_events_follow_transitions() {
        let device = MockCaptureDevice::new();
        let outlet = FakeOutlet::ready();
        let (coordinator, mut events) = coordinator(&device, &outlet);

        coordinator.start().await.unwrap();
        coordinator.stop().await;

        let mut states = Vec::new();
        while let Ok(SessionEvent::CaptureStateChanged(state)) = events.try_recv() {
            states.push(state);
        }
        assert_eq!(
            states,
            vec![
                CaptureState::Starting,
                CaptureState::Capturing,
                CaptureState::Stopping,
                CaptureState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn test_chunks_forwarded_or_dropped() {
        let device = MockCaptureDevice::new();
        let outlet = FakeOutlet::ready();
        let (coordinator, _events) = coordinator(&device, &outlet);

        coordinator.start().await.unwrap();
        assert!(device.emit(vec![1, 2, 3]));

        // Transport weg: Chunk wird verworfen, nicht gepuffert
        outlet.ready.store(false, Ordering::SeqCst);
        assert!(device.emit(vec![4, 5, 6]));
        outlet.ready.store(true, Ordering::SeqCst);
        assert!(device.emit(vec![7, 8, 9]));

        assert_eq!(*outlet.sent.lock(), vec![vec![1, 2, 3], vec![7, 8, 9]]);
        assert_eq!(coordinator.forwarded_chunks(), 2);
        assert_eq!(coordinator.dropped_chunks(), 1);

        coordinator.stop().await;
        assert!(!device.emit(vec![0]));
    }

    #[tokio::test]
    async fn test_rapid_start_stop_ends_with_last_call() {
        let device = MockCaptureDevice::new().with_acquire_delay(Duration::from_millis(5));
        let outlet = FakeOutlet::ready();
        let (coordinator, _events) = coordinator(&device, &outlet);
        let c = &coordinator;

        type Op<'a> = Pin<Box<dyn Future<Output = ()> + 'a>>;
        let ops: Vec<Op<'_>> = vec![
            Box::pin(async move { c.start().await.unwrap() }),
            Box::pin(async move { c.stop().await }),
            Box::pin(async move { c.start().await.unwrap() }),
            Box::pin(async move { c.start().await.unwrap() }),
            Box::pin(async move { c.stop().await }),
            Box::pin(async move { c.start().await.unwrap() }),
        ];
        futures::future::join_all(ops).await;

        assert_eq!(coordinator.state(), CaptureState::Capturing);
        assert_eq!(device.acquisitions(), 3);
        assert_eq!(device.releases(), 2);

        let ops: Vec<Op<'_>> = vec![
            Box::pin(async move { c.stop().await }),
            Box::pin(async move { c.start().await.unwrap() }),
            Box::pin(async move { c.stop().await }),
        ];
        futures::future::join_all(ops).await;

        assert_eq!(coordinator.state(), CaptureState::Idle);
        assert_eq!(device.acquisitions(), device.releases());
        assert!(!device.in_use());
    }

    #[tokio::test]
    async fn test_concurrent_toggles_do_not_both_start() {
        let device = MockCaptureDevice::new().with_acquire_delay(Duration::from_millis(5));
        let outlet = FakeOutlet::ready();
        let (coordinator, _events) = coordinator(&device, &outlet);

        let (first, second) = tokio::join!(coordinator.toggle(), coordinator.toggle());

        assert_eq!(first, Ok(true));
        assert_eq!(second, Ok(false));
        assert_eq!(coordinator.state(), CaptureState::Idle);
        assert_eq!(device.acquisitions(), 1);
        assert_eq!(device.releases(), 1);
    }

    #[tokio::test]
    async fn test_transport_lost_during_acquisition_releases_device() {
        let device = MockCaptureDevice::new().with_acquire_delay(Duration::from_millis(50));
        let outlet = FakeOutlet::ready();
        let (coordinator, _events) = coordinator(&device, &outlet);

        let drop_transport = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            outlet.ready.store(false, Ordering::SeqCst);
        };
        let (result, _) = tokio::join!(coordinator.start(), drop_transport);

        assert_eq!(result, Err(SessionError::TransportNotReady));
        assert_eq!(coordinator.state(), CaptureState::Idle);
        assert_eq!(device.acquisitions(), 1);
        assert_eq!(device.releases(), 1);
        assert!(!device.in_use());
    }

    #[tokio::test]
    async fn test_dropping_coordinator_releases_device() {
        let device = MockCaptureDevice::new();
        let outlet = FakeOutlet::ready();
        let (coordinator, _events) = coordinator(&device, &outlet);

        coordinator.start().await.unwrap();
        drop(coordinator);

        assert!(!device.in_use());
        assert_eq!(device.releases(), 1);
    }
}
