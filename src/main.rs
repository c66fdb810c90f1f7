//! Kommandozeilen-Client: verbindet, streamt das Mikrofon und loggt Antworten
//!
//! Aufruf: `tutor-session [subject] [skill] [subskill] [student_id] [competency_score]`

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tutor_session::capture::{default_input_device_name, CpalCaptureDevice};
use tutor_session::{
    CaptureConfig, ConnectionStatus, SessionConfig, SessionEvent, TransportConfig, TutorSession,
};

fn session_config_from_args() -> Result<SessionConfig> {
    let mut args = std::env::args().skip(1);
    let mut next = |default: &str| args.next().unwrap_or_else(|| default.to_string());

    let subject = next("math");
    let skill = next("counting");
    let subskill = next("numbers 1-10");
    let student_id: i64 = next("1")
        .parse()
        .context("student_id must be an integer")?;
    let competency_score: f64 = next("5.0")
        .parse()
        .context("competency_score must be a number")?;

    Ok(SessionConfig {
        subject,
        skill,
        subskill,
        student_id,
        competency_score,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tutor_session::init_logging();

    let transport = TransportConfig::from_env()?;
    let capture = CaptureConfig::from_env()?;
    let session_config = session_config_from_args()?;

    tracing::info!(
        "Input device: {}",
        default_input_device_name().unwrap_or_else(|| "<none>".to_string())
    );

    let session = TutorSession::new(transport, Arc::new(CpalCaptureDevice::new(capture)));

    let mut messages = session.subscribe_messages();
    let mut audio = session.subscribe_audio();

    let session_id = session
        .connect(session_config)
        .await
        .context("failed to start tutoring session")?;
    tracing::info!("Session started: {}", session_id);
    let mut events = session.subscribe();

    session
        .start_listening()
        .await
        .context("failed to start microphone")?;

    let mut received_bytes = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, closing session");
                break;
            }
            Some(message) = messages.recv() => {
                tracing::info!("Server event '{}': {:?}", message.event_type, message.fields);
            }
            Some(chunk) = audio.recv() => {
                received_bytes += chunk.len();
                tracing::debug!("Received {} audio bytes ({} total)", chunk.len(), received_bytes);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StatusChanged(status)) if status != ConnectionStatus::Connected => {
                    tracing::warn!("Connection ended: {:?}", status);
                    break;
                }
                Ok(SessionEvent::Error(err)) => tracing::error!("Session error: {}", err),
                Ok(event) => tracing::debug!("Session event: {:?}", event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} session events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    session.disconnect().await;
    tracing::info!(
        "Session closed, {} audio bytes received, {} microphone chunks dropped",
        received_bytes,
        session.dropped_audio_chunks()
    );
    Ok(())
}
