//! Zerlegt den kontinuierlichen Sample-Strom in gleich lange Chunks
//!
//! Eingang: interleaved f32 Samples mit beliebiger Kanalzahl und Rate.
//! Ausgang: Mono, Ziel-Rate, 16-bit PCM little-endian, exakt
//! `chunk_samples` Samples pro Chunk.

use ringbuf::{traits::*, HeapRb};

pub struct ChunkAssembler {
    buffer: HeapRb<i16>,
    chunk_samples: usize,
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    scratch: Vec<i16>,
}

impl ChunkAssembler {
    pub fn new(source_rate: u32, channels: u16, target_rate: u32, chunk_samples: usize) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            buffer: HeapRb::new(chunk_samples * 4),
            chunk_samples,
            source_rate: source_rate.max(1),
            target_rate: target_rate.max(1),
            channels: channels.max(1) as usize,
            scratch: vec![0; chunk_samples],
        }
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Samples, die noch auf einen vollen Chunk warten
    pub fn pending(&self) -> usize {
        self.buffer.occupied_len()
    }

    /// Nimmt einen Block Samples auf und ruft `emit` für jeden fertigen Chunk
    pub fn push(&mut self, data: &[f32], mut emit: impl FnMut(Vec<u8>)) {
        let mono = downmix(data, self.channels);
        let resampled = resample_linear(&mono, self.source_rate, self.target_rate);
        let samples: Vec<i16> = resampled.iter().map(|s| to_i16(*s)).collect();

        let mut rest = samples.as_slice();
        while !rest.is_empty() {
            let written = self.buffer.push_slice(rest);
            rest = &rest[written..];
            self.drain(&mut emit);
        }
    }

    fn drain(&mut self, emit: &mut impl FnMut(Vec<u8>)) {
        while self.buffer.occupied_len() >= self.chunk_samples {
            let read = self.buffer.pop_slice(&mut self.scratch);
            let mut bytes = Vec::with_capacity(read * 2);
            for sample in &self.scratch[..read] {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
            emit(bytes);
        }
    }
}

// ============================================================================
// SAMPLE HELPERS
// ============================================================================

fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Einfaches Linear-Resampling
fn resample_linear(data: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate || data.is_empty() {
        return data.to_vec();
    }

    let ratio = target_rate as f32 / source_rate as f32;
    let new_len = (data.len() as f32 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f32 / ratio;
            let idx = src_idx as usize;
            let frac = src_idx - idx as f32;
            let s1 = data.get(idx).copied().unwrap_or(0.0);
            let s2 = data.get(idx + 1).copied().unwrap_or(s1);
            s1 + (s2 - s1) * frac
        })
        .collect()
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
