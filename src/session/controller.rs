//! Session Lifecycle Controller
//!
//! Setzt Transport, Router und Capture zu einer Tutoring-Session zusammen.
//! Jede Session besitzt ihre eigenen Instanzen; `disconnect()` stoppt die
//! Aufnahme und gibt das Mikrofon deterministisch frei.

use super::{SessionError, SessionEvent};
use crate::capture::{AudioOutlet, CaptureCoordinator, CaptureDevice, CaptureState};
use crate::config::TransportConfig;
use crate::transport::{
    ConnectionStatus, MessageRouter, OutboundFrame, ServerEvent, SessionConfig, TransportChannel,
};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};

/// Aktive Session-Identität, gebunden an den Verbindungsversuch
#[derive(Debug, Clone)]
struct SessionIdentity {
    session_id: String,
    epoch: u64,
}

/// Öffentliche Schnittstelle einer Tutoring-Session
pub struct TutorSession {
    channel: Arc<TransportChannel>,
    capture: Arc<CaptureCoordinator>,
    identity: Arc<RwLock<Option<SessionIdentity>>>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl TutorSession {
    pub fn new(config: TransportConfig, device: Arc<dyn CaptureDevice>) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);
        let router = Arc::new(MessageRouter::new());
        let channel = Arc::new(TransportChannel::new(config, router, event_tx.clone()));
        let capture = Arc::new(CaptureCoordinator::new(
            device,
            Arc::clone(&channel) as Arc<dyn AudioOutlet>,
            event_tx.clone(),
        ));

        Self {
            channel,
            capture,
            identity: Arc::new(RwLock::new(None)),
            event_tx,
        }
    }

    /// Lifecycle-Events (Status, Capture, Fehler)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Empfangene Audio-Chunks (für die Wiedergabe)
    pub fn subscribe_audio(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        self.channel.router().subscribe_audio()
    }

    /// Strukturierte Server-Nachrichten außer `session_started`
    pub fn subscribe_messages(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        self.channel.router().subscribe_events()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.channel.status()
    }

    /// Session-ID, solange die Verbindung des Handshakes besteht
    pub fn session_id(&self) -> Option<String> {
        let identity = self.identity.read();
        identity
            .as_ref()
            .filter(|id| id.epoch == self.channel.epoch() && self.channel.is_connected())
            .map(|id| id.session_id.clone())
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    pub fn is_listening(&self) -> bool {
        self.capture.is_listening()
    }

    /// Anzahl verworfener Mikrofon-Chunks
    pub fn dropped_audio_chunks(&self) -> u64 {
        self.capture.dropped_chunks()
    }

    /// Verbindet und wartet auf die Session-ID
    pub async fn connect(&self, config: SessionConfig) -> Result<String, SessionError> {
        // Frischer Versuch: alte Aufnahme und Identität verwerfen
        self.identity.write().take();
        self.capture.stop().await;

        tracing::info!(
            "Starting tutoring session: {} / {} / {} (student {})",
            config.subject,
            config.skill,
            config.subskill,
            config.student_id
        );

        let handshake = self.channel.connect(&config).await?;

        {
            let mut identity = self.identity.write();
            if self.channel.epoch() != handshake.epoch || !self.channel.is_connected() {
                return Err(SessionError::HandshakeFailed(
                    "connection lost during handshake".to_string(),
                ));
            }
            *identity = Some(SessionIdentity {
                session_id: handshake.session_id.clone(),
                epoch: handshake.epoch,
            });
        }

        let _ = self.event_tx.send(SessionEvent::SessionStarted {
            session_id: handshake.session_id.clone(),
        });

        self.spawn_connection_watch(handshake.epoch);
        Ok(handshake.session_id)
    }

    /// Beendet die Session (idempotent)
    pub async fn disconnect(&self) {
        self.channel.disconnect();
        self.identity.write().take();
        self.capture.stop().await;
    }

    /// Sendet einen Audio-Chunk; no-op ohne Session
    pub fn send_audio(&self, chunk: Vec<u8>) -> bool {
        if self.session_id().is_none() {
            return false;
        }
        self.channel.send(OutboundFrame::Audio(chunk))
    }

    /// Sendet eine strukturierte Nachricht an den Server; no-op ohne Session
    pub fn send_event(&self, message: serde_json::Value) -> bool {
        if self.session_id().is_none() {
            return false;
        }
        self.channel.send(OutboundFrame::Event(message))
    }

    pub async fn start_listening(&self) -> Result<(), SessionError> {
        self.capture.start().await
    }

    pub async fn stop_listening(&self) {
        self.capture.stop().await
    }

    /// Mute/Unmute; gibt zurück, ob danach aufgenommen wird
    pub async fn toggle_listening(&self) -> Result<bool, SessionError> {
        self.capture.toggle().await
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Räumt auf, wenn der Server die Verbindung beendet
    ///
    /// Hält nur schwache Referenzen, damit ein Drop der Session den Kanal
    /// schließt und der Watcher über `Closed` endet.
    fn spawn_connection_watch(&self, epoch: u64) {
        let mut events = self.event_tx.subscribe();
        let channel = Arc::downgrade(&self.channel);
        let capture = Arc::downgrade(&self.capture);
        let identity = Arc::clone(&self.identity);

        let still_current = move |channel: &Weak<TransportChannel>| {
            channel
                .upgrade()
                .is_some_and(|c| c.epoch() == epoch && c.is_connected())
        };

        tokio::spawn(async move {
            // Verbindung kann schon vor dem Abonnieren geendet haben
            if still_current(&channel) {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::StatusChanged(ConnectionStatus::Connected)) => {}
                        Ok(SessionEvent::StatusChanged(status)) => {
                            tracing::debug!("Session connection ended with status {:?}", status);
                            break;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!("Session watch lagged by {} events", skipped);
                            if !still_current(&channel) {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }

            {
                let mut identity = identity.write();
                if identity.as_ref().map(|id| id.epoch) == Some(epoch) {
                    *identity = None;
                }
            }

            // Neuer Verbindungsversuch hat seine eigene Aufnahme
            let (Some(channel), Some(capture)) = (channel.upgrade(), capture.upgrade()) else {
                return;
            };
            if channel.epoch() == epoch {
                capture.stop().await;
            }
        });
    }
}

impl std::fmt::Debug for TutorSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TutorSession")
            .field("status", &self.status())
            .field("session_id", &self.session_id())
            .field("capture_state", &self.capture_state())
            .finish()
    }
}
