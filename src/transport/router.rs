//! Message Router
//!
//! Verteilt eingehende Frames an registrierte Abonnenten:
//! - Binary-Frames unverändert an Audio-Abonnenten
//! - JSON-Frames geparst an Event-Abonnenten
//! - `session_started` an den wartenden Handshake
//!
//! Solange ein Handshake läuft, werden alle anderen Frames gepuffert und erst
//! nach `session_started` (in Ankunftsreihenfolge) ausgeliefert.

use super::messages::{InboundFrame, OutboundFrame, ServerEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;

/// Ergebnis des Handshakes: Session-ID oder Grund des Scheiterns
pub type HandshakeResult = Result<String, String>;

enum HandshakeState {
    /// Kein Handshake aktiv, Frames werden direkt ausgeliefert
    Idle,
    /// Warten auf `session_started`
    Pending {
        tx: oneshot::Sender<HandshakeResult>,
        buffered_events: Vec<ServerEvent>,
        buffered_audio: Vec<Vec<u8>>,
    },
    /// Session-ID wurde übergeben
    Complete,
}

struct RouterState {
    handshake: HandshakeState,
    audio_subscribers: Vec<mpsc::UnboundedSender<Vec<u8>>>,
    event_subscribers: Vec<mpsc::UnboundedSender<ServerEvent>>,
}

/// Demultiplexer für eingehende Frames
pub struct MessageRouter {
    state: Mutex<RouterState>,
    malformed_frames: AtomicU64,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RouterState {
                handshake: HandshakeState::Idle,
                audio_subscribers: Vec::new(),
                event_subscribers: Vec::new(),
            }),
            malformed_frames: AtomicU64::new(0),
        }
    }

    /// Registriert einen Empfänger für eingehende Audio-Chunks
    pub fn subscribe_audio(&self) -> mpsc::UnboundedReceiver<Vec<u8>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().audio_subscribers.push(tx);
        rx
    }

    /// Registriert einen Empfänger für strukturierte Server-Nachrichten
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().event_subscribers.push(tx);
        rx
    }

    /// Anzahl verworfener, nicht parsebarer Frames
    pub fn malformed_frames(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }

    /// Startet einen neuen Handshake
    ///
    /// Ein noch offener Handshake wird dabei verworfen (sein Empfänger sieht
    /// einen geschlossenen Kanal).
    pub fn begin_handshake(&self) -> oneshot::Receiver<HandshakeResult> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().handshake = HandshakeState::Pending {
            tx,
            buffered_events: Vec::new(),
            buffered_audio: Vec::new(),
        };
        rx
    }

    /// Bricht einen laufenden Handshake ab und verwirft gepufferte Frames
    pub fn abort_handshake(&self, reason: &str) {
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.handshake, HandshakeState::Idle);
        if let HandshakeState::Pending {
            tx,
            buffered_events,
            buffered_audio,
        } = previous
        {
            tracing::debug!(
                "Handshake aborted ({}), discarding {} event(s) and {} audio frame(s)",
                reason,
                buffered_events.len(),
                buffered_audio.len()
            );
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// Verarbeitet ein eingehendes Frame
    pub fn route(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::Binary(data) => self.route_audio(data),
            InboundFrame::Text(text) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(event) => self.route_event(event),
                Err(e) => {
                    self.malformed_frames.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Dropping malformed server message: {}", e);
                }
            },
        }
    }

    /// Serialisiert ein ausgehendes Frame
    pub fn encode(frame: OutboundFrame) -> Result<Message, serde_json::Error> {
        match frame {
            OutboundFrame::Audio(data) => Ok(Message::Binary(data)),
            OutboundFrame::Event(value) => serde_json::to_string(&value).map(Message::Text),
        }
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn route_audio(&self, data: Vec<u8>) {
        let mut state = self.state.lock();
        if let HandshakeState::Pending { buffered_audio, .. } = &mut state.handshake {
            buffered_audio.push(data);
            return;
        }
        state
            .audio_subscribers
            .retain(|tx| tx.send(data.clone()).is_ok());
    }

    fn route_event(&self, event: ServerEvent) {
        let mut state = self.state.lock();

        if event.is_session_started() {
            self.complete_handshake(&mut state, event);
            return;
        }

        if let HandshakeState::Pending {
            buffered_events, ..
        } = &mut state.handshake
        {
            tracing::debug!("Buffering '{}' until session has started", event.event_type);
            buffered_events.push(event);
            return;
        }

        state
            .event_subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn complete_handshake(&self, state: &mut RouterState, event: ServerEvent) {
        let HandshakeState::Pending { .. } = state.handshake else {
            tracing::warn!("Ignoring unexpected session_started message");
            return;
        };

        let previous = std::mem::replace(&mut state.handshake, HandshakeState::Complete);
        let HandshakeState::Pending {
            tx,
            buffered_events,
            buffered_audio,
        } = previous
        else {
            return;
        };

        let Some(session_id) = event.session_id().map(str::to_string) else {
            self.malformed_frames.fetch_add(1, Ordering::Relaxed);
            state.handshake = HandshakeState::Idle;
            let _ = tx.send(Err("session_started without session_id".to_string()));
            return;
        };

        tracing::info!("Session started with id {}", session_id);
        let _ = tx.send(Ok(session_id));

        for event in buffered_events {
            state
                .event_subscribers
                .retain(|sub| sub.send(event.clone()).is_ok());
        }
        for data in buffered_audio {
            state
                .audio_subscribers
                .retain(|sub| sub.send(data.clone()).is_ok());
        }
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MessageRouter")
            .field("audio_subscribers", &state.audio_subscribers.len())
            .field("event_subscribers", &state.event_subscribers.len())
            .field("malformed_frames", &self.malformed_frames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(value: serde_json::Value) -> InboundFrame {
        InboundFrame::Text(value.to_string())
    }

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn test_events_delivered_in_arrival_order() {
        let router = MessageRouter::new();
        let mut events = router.subscribe_events();

        for name in ["c", "a", "d", "b"] {
            router.route(text(json!({ "type": name })));
        }

        let received: Vec<String> = drain(&mut events)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(received, vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn test_interleaved_kinds_keep_own_order() {
        let router = MessageRouter::new();
        let mut audio = router.subscribe_audio();
        let mut events = router.subscribe_events();

        router.route(text(json!({"type": "first"})));
        router.route(InboundFrame::Binary(vec![1, 2, 3]));
        router.route(text(json!({"type": "second"})));
        router.route(text(json!({"type": "third"})));

        assert_eq!(drain(&mut audio), vec![vec![1, 2, 3]]);
        let names: Vec<String> = drain(&mut events)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_malformed_frame_dropped() {
        let router = MessageRouter::new();
        let mut events = router.subscribe_events();

        router.route(InboundFrame::Text("{not json".to_string()));
        router.route(text(json!({"no_type": true})));
        router.route(text(json!({"type": "ok"})));

        let received = drain(&mut events);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_type, "ok");
        assert_eq!(router.malformed_frames(), 2);
    }

    #[test]
    fn test_every_subscriber_gets_a_copy() {
        let router = MessageRouter::new();
        let mut first = router.subscribe_audio();
        let mut second = router.subscribe_audio();
        let dropped = router.subscribe_audio();
        drop(dropped);

        router.route(InboundFrame::Binary(vec![9]));

        assert_eq!(drain(&mut first), vec![vec![9]]);
        assert_eq!(drain(&mut second), vec![vec![9]]);
        assert_eq!(router.state.lock().audio_subscribers.len(), 2);
    }

    #[tokio::test]
    async fn test_handshake_buffers_until_session_started() {
        let router = MessageRouter::new();
        let mut events = router.subscribe_events();
        let mut audio = router.subscribe_audio();
        let handshake = router.begin_handshake();

        router.route(text(json!({"type": "greeting"})));
        router.route(InboundFrame::Binary(vec![4, 2]));
        assert!(drain(&mut events).is_empty());
        assert!(drain(&mut audio).is_empty());

        router.route(text(json!({"type": "session_started", "session_id": "abc-123"})));
        router.route(text(json!({"type": "after"})));

        assert_eq!(handshake.await.unwrap(), Ok("abc-123".to_string()));
        let names: Vec<String> = drain(&mut events)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(names, vec!["greeting", "after"]);
        assert_eq!(drain(&mut audio), vec![vec![4, 2]]);
    }

    #[tokio::test]
    async fn test_session_started_handed_over_once() {
        let router = MessageRouter::new();
        let mut events = router.subscribe_events();
        let handshake = router.begin_handshake();

        router.route(text(json!({"type": "session_started", "session_id": "one"})));
        router.route(text(json!({"type": "session_started", "session_id": "two"})));

        assert_eq!(handshake.await.unwrap(), Ok("one".to_string()));
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_session_started_without_id_fails_handshake() {
        let router = MessageRouter::new();
        let handshake = router.begin_handshake();

        router.route(text(json!({"type": "session_started"})));

        assert!(handshake.await.unwrap().is_err());
        assert_eq!(router.malformed_frames(), 1);
    }

    #[tokio::test]
    async fn test_abort_discards_buffered_frames() {
        let router = MessageRouter::new();
        let mut events = router.subscribe_events();
        let handshake = router.begin_handshake();

        router.route(text(json!({"type": "early"})));
        router.abort_handshake("closed");

        assert_eq!(handshake.await.unwrap(), Err("closed".to_string()));
        // Nach dem Abbruch direkt ausliefern
        router.route(text(json!({"type": "late"})));
        let names: Vec<String> = drain(&mut events)
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(names, vec!["late"]);
    }

    #[test]
    fn test_encode_outbound_frames() {
        let audio = MessageRouter::encode(OutboundFrame::Audio(vec![1, 2])).unwrap();
        assert_eq!(audio, Message::Binary(vec![1, 2]));

        let event = MessageRouter::encode(OutboundFrame::Event(json!({"type": "mute"}))).unwrap();
        assert_eq!(event, Message::Text(r#"{"type":"mute"}"#.to_string()));
    }
}
