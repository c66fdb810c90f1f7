//! WebSocket Transport-Kanal
//!
//! Verwaltet die persistente Verbindung zum Tutoring-Server:
//! - Verbindungsaufbau mit InitSession-Handshake
//! - Senden von Audio- und Kontroll-Frames (verwerfen statt puffern)
//! - Empfang und Weitergabe an den MessageRouter
//! - Kein automatischer Reconnect
//!
//! Jeder Verbindungsversuch bekommt eine Epoche. `disconnect()` erhöht sie,
//! dadurch werden verspätete Abschlüsse eines alten Versuchs ignoriert.

use super::messages::{InboundFrame, InitSessionPayload, OutboundFrame, SessionConfig};
use super::router::MessageRouter;
use crate::capture::AudioOutlet;
use crate::config::TransportConfig;
use crate::session::{SessionError, SessionEvent};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

// ============================================================================
// CONNECTION STATUS
// ============================================================================

/// Status der Verbindung zum Tutoring-Server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Erfolgreicher Handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub session_id: String,
    pub epoch: u64,
}

// ============================================================================
// CHANNEL STATE
// ============================================================================

struct ChannelState {
    status: ConnectionStatus,
    epoch: u64,
    outbound: Option<mpsc::Sender<Message>>,
    cancel: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    /// Verbindung endete, während der Handshake noch lief
    lost: Option<String>,
}

impl ChannelState {
    /// Schließt die aktuelle Verbindung (Writer beendet sich, wenn der
    /// Sender gedroppt wird, und sendet dabei ein Close-Frame)
    fn teardown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        self.outbound = None;
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Warum die Verbindung endete
enum ConnectionLoss {
    Closed,
    Fault(String),
}

// ============================================================================
// TRANSPORT CHANNEL
// ============================================================================

/// Persistente Duplex-Verbindung für eine Tutoring-Session
pub struct TransportChannel {
    config: TransportConfig,
    router: Arc<MessageRouter>,
    state: Arc<Mutex<ChannelState>>,
    event_tx: broadcast::Sender<SessionEvent>,
    frames_sent: AtomicU64,
}

impl TransportChannel {
    pub fn new(
        config: TransportConfig,
        router: Arc<MessageRouter>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            config,
            router,
            state: Arc::new(Mutex::new(ChannelState {
                status: ConnectionStatus::Disconnected,
                epoch: 0,
                outbound: None,
                cancel: None,
                reader: None,
                lost: None,
            })),
            event_tx,
            frames_sent: AtomicU64::new(0),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Epoche des aktuellen (oder letzten) Verbindungsversuchs
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Anzahl angenommener Frames seit Erstellung (inkl. InitSession)
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Verbindet und führt den Handshake durch
    ///
    /// Eine bestehende Verbindung wird vorher geschlossen. Schlägt mit
    /// `HandshakeFailed` fehl, wenn die Verbindung vor `session_started`
    /// endet, das Timeout abläuft oder `disconnect()` dazwischenkommt.
    pub async fn connect(&self, session: &SessionConfig) -> Result<Handshake, SessionError> {
        let (epoch, cancel_rx, handshake_rx) = {
            let mut state = self.state.lock();
            state.teardown();
            state.epoch += 1;
            state.lost = None;
            let (cancel_tx, cancel_rx) = oneshot::channel();
            state.cancel = Some(cancel_tx);
            state.status = ConnectionStatus::Connecting;
            // Handshake gehört zur Epoche dieses Versuchs
            let handshake_rx = self.router.begin_handshake();
            let _ = self
                .event_tx
                .send(SessionEvent::StatusChanged(ConnectionStatus::Connecting));
            (state.epoch, cancel_rx, handshake_rx)
        };

        tracing::info!(
            "Connecting to tutoring server: {} (attempt {})",
            self.config.server_url,
            epoch
        );

        let attempt = tokio::time::timeout(
            self.config.handshake_timeout,
            self.open_and_handshake(epoch, session, handshake_rx),
        );

        let result = tokio::select! {
            result = attempt => match result {
                Ok(result) => result,
                Err(_) => Err(SessionError::HandshakeFailed(format!(
                    "no session_started within {:?}",
                    self.config.handshake_timeout
                ))),
            },
            _ = cancel_rx => Err(SessionError::HandshakeFailed(
                "connection attempt cancelled".to_string(),
            )),
        };

        self.finish_handshake(epoch, result)
    }

    /// Sendet ein Frame
    ///
    /// Gibt `false` zurück (ohne Fehler), wenn nicht verbunden oder die
    /// Sende-Queue voll ist. Das Frame wird dann verworfen.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        let state = self.state.lock();
        if state.status != ConnectionStatus::Connected {
            return false;
        }
        let Some(tx) = state.outbound.as_ref() else {
            return false;
        };

        let msg = match MessageRouter::encode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Failed to encode outbound message: {}", e);
                return false;
            }
        };

        match tx.try_send(msg) {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Outbound queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Trennt die Verbindung (idempotent)
    ///
    /// Bricht auch einen laufenden `connect()` ab.
    pub fn disconnect(&self) {
        let mut state = self.state.lock();
        state.epoch += 1;
        state.teardown();
        self.router.abort_handshake("disconnected");

        if state.status != ConnectionStatus::Disconnected {
            state.status = ConnectionStatus::Disconnected;
            let _ = self
                .event_tx
                .send(SessionEvent::StatusChanged(ConnectionStatus::Disconnected));
            tracing::info!("Disconnected from tutoring server");
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    /// Übernimmt das Ergebnis eines Verbindungsversuchs in den Status
    ///
    /// Ergebnisse abgelöster Versuche ändern nichts. Ist die Verbindung schon
    /// vor diesem Punkt weggebrochen, zählt der Handshake als gescheitert.
    fn finish_handshake(
        &self,
        epoch: u64,
        result: Result<String, SessionError>,
    ) -> Result<Handshake, SessionError> {
        let mut state = self.state.lock();
        if state.epoch != epoch || state.status != ConnectionStatus::Connecting {
            tracing::debug!("Discarding late handshake for attempt {}", epoch);
            return Err(result.err().unwrap_or_else(|| {
                SessionError::HandshakeFailed("connection attempt cancelled".to_string())
            }));
        }

        let result = match (result, state.lost.take()) {
            (Ok(session_id), None) => Ok(session_id),
            (Ok(_), Some(reason)) => Err(SessionError::HandshakeFailed(reason)),
            (Err(err), _) => Err(err),
        };

        match result {
            Ok(session_id) => {
                state.cancel = None;
                state.status = ConnectionStatus::Connected;
                let _ = self
                    .event_tx
                    .send(SessionEvent::StatusChanged(ConnectionStatus::Connected));
                tracing::info!("Connected, session id {}", session_id);
                Ok(Handshake { session_id, epoch })
            }
            Err(err) => {
                state.teardown();
                self.router.abort_handshake(&err.to_string());
                state.status = ConnectionStatus::Error;
                let _ = self
                    .event_tx
                    .send(SessionEvent::StatusChanged(ConnectionStatus::Error));
                let _ = self.event_tx.send(SessionEvent::Error(err.clone()));
                tracing::error!("Handshake failed: {}", err);
                Err(err)
            }
        }
    }

    /// Öffnet den WebSocket, sendet InitSession und wartet auf die Session-ID
    async fn open_and_handshake(
        &self,
        epoch: u64,
        session: &SessionConfig,
        handshake_rx: oneshot::Receiver<Result<String, String>>,
    ) -> Result<String, SessionError> {
        let (ws_stream, _) = connect_async(self.config.server_url.as_str())
            .await
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;

        let (mut write, read) = ws_stream.split();

        let init = serde_json::to_string(&InitSessionPayload::new(session))
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;

        // Message-Sender erstellen, InitSession ist immer das erste Frame
        let (tx, mut rx) = mpsc::channel::<Message>(self.config.outbound_capacity);
        tx.try_send(Message::Text(init))
            .map_err(|e| SessionError::HandshakeFailed(e.to_string()))?;
        self.frames_sent.fetch_add(1, Ordering::Relaxed);

        {
            let mut state = self.state.lock();
            if state.epoch != epoch {
                return Err(SessionError::HandshakeFailed(
                    "connection attempt cancelled".to_string(),
                ));
            }
            state.outbound = Some(tx);
        }

        // Write-Task starten
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        // Read-Task starten
        let reader = tokio::spawn(Self::read_loop(
            read,
            epoch,
            Arc::clone(&self.state),
            Arc::clone(&self.router),
            self.event_tx.clone(),
        ));
        {
            let mut state = self.state.lock();
            if state.epoch == epoch {
                state.reader = Some(reader);
            } else {
                reader.abort();
            }
        }

        match handshake_rx.await {
            Ok(Ok(session_id)) => Ok(session_id),
            Ok(Err(reason)) => Err(SessionError::HandshakeFailed(reason)),
            Err(_) => Err(SessionError::HandshakeFailed(
                "handshake superseded".to_string(),
            )),
        }
    }

    async fn read_loop<S>(
        mut read: S,
        epoch: u64,
        state: Arc<Mutex<ChannelState>>,
        router: Arc<MessageRouter>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        let mut loss = ConnectionLoss::Closed;

        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => router.route(InboundFrame::Text(text)),
                Ok(Message::Binary(data)) => router.route(InboundFrame::Binary(data)),
                Ok(Message::Close(frame)) => {
                    tracing::info!("WebSocket closed by server: {:?}", frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("WebSocket error: {}", e);
                    loss = ConnectionLoss::Fault(e.to_string());
                    break;
                }
            }
        }

        Self::connection_lost(epoch, loss, &state, &router, &event_tx);
    }

    /// Verbindung endete ohne `disconnect()`
    fn connection_lost(
        epoch: u64,
        loss: ConnectionLoss,
        state: &Arc<Mutex<ChannelState>>,
        router: &Arc<MessageRouter>,
        event_tx: &broadcast::Sender<SessionEvent>,
    ) {
        let mut state = state.lock();
        if state.epoch != epoch {
            return;
        }

        match state.status {
            // Handshake läuft noch: connect() meldet den Fehler, auch wenn
            // `session_started` schon angekommen ist
            ConnectionStatus::Connecting => {
                let reason = match loss {
                    ConnectionLoss::Closed => "connection closed during handshake".to_string(),
                    ConnectionLoss::Fault(e) => e,
                };
                state.outbound = None;
                state.reader = None;
                router.abort_handshake(&reason);
                state.lost = Some(reason);
            }
            ConnectionStatus::Connected => {
                state.outbound = None;
                state.reader = None;
                let status = match loss {
                    ConnectionLoss::Closed => ConnectionStatus::Disconnected,
                    ConnectionLoss::Fault(e) => {
                        let _ = event_tx.send(SessionEvent::Error(SessionError::Transport(e)));
                        ConnectionStatus::Error
                    }
                };
                state.status = status;
                let _ = event_tx.send(SessionEvent::StatusChanged(status));
                tracing::warn!("Connection lost, status now {:?}", status);
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error => {}
        }
    }
}

impl AudioOutlet for TransportChannel {
    fn is_ready(&self) -> bool {
        self.is_connected()
    }

    fn send_audio(&self, chunk: Vec<u8>) -> bool {
        self.send(OutboundFrame::Audio(chunk))
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.state.lock().teardown();
    }
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransportChannel")
            .field("server_url", &self.config.server_url.as_str())
            .field("status", &state.status)
            .field("epoch", &state.epoch)
            .finish()
    }
}
