//! Capture Module - Mikrofon und Aufnahme-Koordination
//!
//! Dieses Modul verwaltet:
//! - Belegung und Freigabe des Mikrofons (`CaptureDevice`)
//! - Zerlegung des Sample-Stroms in feste Chunks
//! - Den Capture-Status und die Kopplung an den Transport

mod chunker;
mod coordinator;
#[cfg(feature = "microphone")]
mod cpal_device;
mod device;
mod mock;

pub use chunker::ChunkAssembler;
pub use coordinator::{AudioOutlet, CaptureCoordinator, CaptureState};
#[cfg(feature = "microphone")]
pub use cpal_device::{default_input_device_name, list_input_devices, CpalCaptureDevice};
pub use device::{AudioError, AudioSink, CaptureDevice, CaptureHandle, SinkSlot};
pub use mock::MockCaptureDevice;
