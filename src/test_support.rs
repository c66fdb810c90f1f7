//! Test-Hilfen: lokaler WebSocket-Server, der einen Tutoring-Server spielt

use crate::transport::SessionConfig;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn math_config() -> SessionConfig {
    SessionConfig {
        subject: "math".to_string(),
        skill: "counting".to_string(),
        subskill: "numbers 1-10".to_string(),
        student_id: 123,
        competency_score: 7.0,
    }
}

enum ServerCommand {
    Send(Message),
    /// TCP-Verbindung ohne Close-Handshake abbrechen
    Abort,
}

/// Akzeptiert Verbindungen und protokolliert alle Client-Frames
///
/// Befehle gehen an alle offenen Verbindungen.
pub(crate) struct MockTutorServer {
    pub url: String,
    received: mpsc::UnboundedReceiver<Message>,
    connections: Arc<Mutex<Vec<mpsc::UnboundedSender<ServerCommand>>>>,
}

impl MockTutorServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let connections = Arc::new(Mutex::new(Vec::new()));

        let accepted = Arc::clone(&connections);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (commands, command_rx) = mpsc::unbounded_channel();
                accepted.lock().push(commands);
                tokio::spawn(serve_connection(stream, received_tx.clone(), command_rx));
            }
        });

        Self {
            url: format!("ws://{}/ws", addr),
            received,
            connections,
        }
    }

    fn broadcast(&self, command: impl Fn() -> ServerCommand) {
        self.connections
            .lock()
            .retain(|connection| connection.send(command()).is_ok());
    }

    pub fn send_json(&self, value: serde_json::Value) {
        let text = value.to_string();
        self.broadcast(|| ServerCommand::Send(Message::Text(text.clone())));
    }

    pub fn send_binary(&self, data: Vec<u8>) {
        self.broadcast(|| ServerCommand::Send(Message::Binary(data.clone())));
    }

    /// Sauberes Schließen mit Close-Frame
    pub fn close(&self) {
        self.broadcast(|| ServerCommand::Send(Message::Close(None)));
    }

    /// Abbruch ohne Close-Frame
    pub fn abort(&self) {
        self.broadcast(|| ServerCommand::Abort);
    }

    pub async fn next_message(&mut self) -> Option<Message> {
        tokio::time::timeout(RECV_TIMEOUT, self.received.recv())
            .await
            .ok()
            .flatten()
    }

    /// Nächstes JSON-Text-Frame (andere Frames werden übersprungen)
    pub async fn next_json(&mut self) -> serde_json::Value {
        loop {
            match self.next_message().await {
                Some(Message::Text(text)) => return serde_json::from_str(&text).unwrap(),
                Some(_) => continue,
                None => panic!("no text frame received"),
            }
        }
    }

    pub async fn next_binary(&mut self) -> Vec<u8> {
        loop {
            match self.next_message().await {
                Some(Message::Binary(data)) => return data,
                Some(_) => continue,
                None => panic!("no binary frame received"),
            }
        }
    }

    /// Liest bis zum Close-Frame; `false`, falls vorher Audio ankam
    pub async fn no_binary_until_closed(&mut self) -> bool {
        loop {
            match self.next_message().await {
                Some(Message::Binary(_)) => return false,
                Some(Message::Close(_)) | None => return true,
                Some(_) => continue,
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    received_tx: mpsc::UnboundedSender<Message>,
    mut command_rx: mpsc::UnboundedReceiver<ServerCommand>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(msg)) => {
                    let _ = received_tx.send(msg);
                }
                _ => break,
            },
            cmd = command_rx.recv() => match cmd {
                Some(ServerCommand::Send(msg)) => {
                    // Schreibfehler ignorieren, der Client darf schon weg sein
                    let _ = write.send(msg).await;
                }
                Some(ServerCommand::Abort) | None => break,
            },
        }
    }
}
