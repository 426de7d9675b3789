//! Mega Drive sound subsystem emulation
//!
//! Sample-accurate emulation of the Mega Drive / Genesis audio path: the
//! YM2612 six-channel FM synthesizer, the SN76489 four-channel PSG, and the
//! real-time mixer that blends both chips into a stereo stream suitable for
//! an audio callback.
//!
//! # Components
//! - [`fm::Ym2612`]: 4-operator FM synthesis, 8 algorithms, LFO, timers
//! - [`psg::Sn76489`]: 3 square-wave tones plus LFSR noise
//! - [`mixer::AudioMixer`]: per-source volume, clamped 16-bit stereo mix
//! - [`ring_buffer::AudioRingBuffer`]: lock-light SPSC sample transport
//! - [`timer::Timer`]: prescaled periodic/one-shot timers with callbacks
//! - [`system::AudioSystem`]: wires everything together per frame
//!
//! # Quick start
//! ```no_run
//! use megadrive_audio::system::{AudioConfig, AudioSystem};
//!
//! let mut system = AudioSystem::new(AudioConfig::default()).unwrap();
//! system.fm_write(0, 0x28, 0xF0); // key on channel 0, all operators
//! system.psg_write(0x8A);         // latch tone 0 frequency
//! system.run_frame();
//! let mut out = vec![0i16; 2048 * 2];
//! system.read_samples(&mut out).unwrap();
//! ```
//!
//! # Crate feature flags
//! - `export-wav` (opt-in): WAV capture of the mixed stream (enables `hound`)

#![warn(missing_docs)]

pub mod fm;
pub mod mixer;
pub mod psg;
pub mod ring_buffer;
pub mod system;
pub mod tables;
pub mod timer;

#[cfg(feature = "export-wav")]
pub mod export;

use thiserror::Error;

/// Errors produced by the sound subsystem
#[derive(Error, Debug)]
pub enum AudioError {
    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Ring buffer sizing or transport failure
    #[error("buffer error: {0}")]
    Buffer(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WAV export failure
    #[cfg(feature = "export-wav")]
    #[error("export error: {0}")]
    Export(String),
}

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AudioError>;

pub use fm::Ym2612;
pub use mixer::AudioMixer;
pub use psg::Sn76489;
pub use ring_buffer::AudioRingBuffer;
pub use system::{AudioConfig, AudioSystem};
pub use timer::{Timer, TimerMode};
