//! WAV capture of the mixed output stream
//!
//! Gated behind the `export-wav` feature. Useful for regression-checking
//! register dumps offline: render frames, append them to a writer, finalize.

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;

use crate::{AudioError, Result};

/// Write a complete interleaved stereo buffer to a WAV file in one call
pub fn write_wav<P: AsRef<Path>>(path: P, samples: &[i16], sample_rate: u32) -> Result<()> {
    let mut exporter = WavExporter::create(path, sample_rate)?;
    exporter.write_samples(samples)?;
    exporter.finalize()
}

/// Streaming 16-bit stereo WAV writer
pub struct WavExporter {
    writer: WavWriter<std::io::BufWriter<std::fs::File>>,
    frames: usize,
    sample_rate: u32,
}

impl WavExporter {
    /// Create a stereo 16-bit WAV file at `path`
    pub fn create<P: AsRef<Path>>(path: P, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .map_err(|e| AudioError::Export(e.to_string()))?;
        Ok(Self {
            writer,
            frames: 0,
            sample_rate,
        })
    }

    /// Append interleaved stereo samples; the slice length must be even
    pub fn write_samples(&mut self, samples: &[i16]) -> Result<()> {
        if samples.len() % 2 != 0 {
            return Err(AudioError::Export(
                "interleaved stereo export needs an even sample count".into(),
            ));
        }
        for &sample in samples {
            self.writer
                .write_sample(sample)
                .map_err(|e| AudioError::Export(e.to_string()))?;
        }
        self.frames += samples.len() / 2;
        Ok(())
    }

    /// Frames written so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Flush headers and close the file
    pub fn finalize(self) -> Result<()> {
        let seconds = self.frames as f64 / self.sample_rate as f64;
        self.writer
            .finalize()
            .map_err(|e| AudioError::Export(e.to_string()))?;
        info!("wrote {} frames ({seconds:.2}s) of audio", self.frames);
        Ok(())
    }
}
