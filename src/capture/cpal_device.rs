//! Mikrofon-Capture über cpal
//!
//! Verwendet cpal für Cross-Platform Audio Input. Die Rohdaten werden im
//! Audio-Callback auf Mono, Ziel-Rate und 16-bit PCM gebracht und in
//! gleich lange Chunks zerlegt.

use super::chunker::ChunkAssembler;
use super::device::{AudioError, AudioSink, CaptureDevice, CaptureHandle, SinkSlot};
use crate::config::CaptureConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, SupportedStreamConfig, SupportedStreamConfigRange};

// ============================================================================
// SEND WRAPPER
// ============================================================================

/// cpal::Stream ist auf manchen Plattformen nicht Send. Der Stream wird nur
/// gehalten und beim Freigeben gedroppt, nie von mehreren Threads benutzt.
struct SendStream(#[allow(dead_code)] Stream);

unsafe impl Send for SendStream {}

// ============================================================================
// CPAL CAPTURE DEVICE
// ============================================================================

/// Standard-Mikrofon (oder ein benanntes Eingabegerät) des Systems
#[derive(Debug, Clone)]
pub struct CpalCaptureDevice {
    config: CaptureConfig,
    device_name: Option<String>,
}

impl CpalCaptureDevice {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            device_name: None,
        }
    }

    /// Verwendet das Eingabegerät mit dem gegebenen Namen statt des Defaults
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    fn input_device(&self) -> Result<Device, AudioError> {
        let host = cpal::default_host();

        match &self.device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| classify_backend_error(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or(AudioError::NoInputDevice),
            None => host.default_input_device().ok_or(AudioError::NoInputDevice),
        }
    }

    /// Findet die beste Input-Konfiguration
    fn find_best_input_config(&self, device: &Device) -> Result<SupportedStreamConfig, AudioError> {
        let configs = device
            .supported_input_configs()
            .map_err(|e| classify_backend_error(e.to_string()))?;

        select_best_config(configs.collect(), cpal::SampleRate(self.config.sample_rate))
    }
}

impl CaptureDevice for CpalCaptureDevice {
    fn acquire(&self, sink: AudioSink) -> Result<CaptureHandle, AudioError> {
        let device = self.input_device()?;
        let supported = self.find_best_input_config(&device)?;
        let stream_config = supported.config();

        tracing::info!(
            "Starting audio capture on '{}': {} Hz, {} channel(s), {:?}",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            stream_config.sample_rate.0,
            stream_config.channels,
            supported.sample_format()
        );

        let slot = SinkSlot::new(sink);
        let mut assembler = ChunkAssembler::new(
            stream_config.sample_rate.0,
            stream_config.channels,
            self.config.sample_rate,
            self.config.chunk_samples(),
        );

        let callback_slot = slot.clone();
        let err_fn = |err: cpal::StreamError| {
            tracing::error!("Audio capture error: {}", err);
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, |chunk| {
                        callback_slot.deliver(chunk);
                    });
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> =
                        data.iter().map(|s| *s as f32 / i16::MAX as f32).collect();
                    assembler.push(&samples, |chunk| {
                        callback_slot.deliver(chunk);
                    });
                },
                err_fn,
                None,
            ),
            other => {
                return Err(AudioError::UnsupportedConfig(format!(
                    "sample format {:?}",
                    other
                )))
            }
        }
        .map_err(map_build_error)?;

        stream.play().map_err(map_play_error)?;

        let stream = SendStream(stream);
        Ok(CaptureHandle::new(slot, move || {
            // Stream droppen beendet die Aufnahme und die Mikrofon-Anzeige
            drop(stream);
            tracing::info!("Audio capture stopped");
        }))
    }
}

// ============================================================================
// DEVICE LISTING
// ============================================================================

/// Namen aller Eingabegeräte
pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| classify_backend_error(e.to_string()))?;

    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Name des Standard-Eingabegeräts, falls vorhanden
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| d.name().ok())
}

// ============================================================================
// HELPERS
// ============================================================================

/// Wählt die beste Konfiguration aus einer Liste
///
/// Priorität: Ziel-Rate vor anderen Raten, F32 vor I16.
fn select_best_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: cpal::SampleRate,
) -> Result<SupportedStreamConfig, AudioError> {
    let supports_target = |config: &SupportedStreamConfigRange| {
        config.min_sample_rate() <= target_rate && config.max_sample_rate() >= target_rate
    };

    for format in [SampleFormat::F32, SampleFormat::I16] {
        if let Some(config) = configs
            .iter()
            .find(|c| c.sample_format() == format && supports_target(c))
        {
            return Ok(config.clone().with_sample_rate(target_rate));
        }
    }

    // Fallback: höchste verfügbare Rate, wird im Callback resampled
    for format in [SampleFormat::F32, SampleFormat::I16] {
        if let Some(config) = configs.iter().find(|c| c.sample_format() == format) {
            return Ok(config.clone().with_max_sample_rate());
        }
    }

    Err(AudioError::UnsupportedConfig(
        "No suitable audio configuration found".to_string(),
    ))
}

fn map_build_error(err: cpal::BuildStreamError) -> AudioError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => AudioError::NoInputDevice,
        cpal::BuildStreamError::BackendSpecific { err } => classify_backend_error(err.description),
        other => AudioError::StreamBuildError(other.to_string()),
    }
}

fn map_play_error(err: cpal::PlayStreamError) -> AudioError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => AudioError::NoInputDevice,
        cpal::PlayStreamError::BackendSpecific { err } => {
            match classify_backend_error(err.description) {
                AudioError::StreamBuildError(msg) => AudioError::StreamPlayError(msg),
                other => other,
            }
        }
        #[allow(unreachable_patterns)]
        other => AudioError::StreamPlayError(other.to_string()),
    }
}

/// Backends melden verweigerte Berechtigungen nur als Text
fn classify_backend_error(description: String) -> AudioError {
    let lower = description.to_lowercase();
    if lower.contains("permission")
        || lower.contains("denied")
        || lower.contains("not authorized")
        || lower.contains("not permitted")
    {
        AudioError::PermissionDenied(description)
    } else {
        AudioError::StreamBuildError(description)
    }
}
