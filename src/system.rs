//! Top-level audio system: both chips, the mixer and the sample transport
//!
//! `AudioSystem` owns a frame-sized scratch pipeline: each `run_frame` call
//! renders one buffer of FM and PSG audio, mixes them, and publishes the
//! result through the shared ring buffer for the audio callback to drain.

use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::fm::Ym2612;
use crate::mixer::{AudioMixer, MixStrategy};
use crate::psg::Sn76489;
use crate::ring_buffer::{AudioRingBuffer, RingBufferStats};
use crate::{AudioError, Result};

/// NTSC Mega Drive master clock in Hz
pub const NTSC_MASTER_CLOCK: u32 = 53_693_175;
/// PAL Mega Drive master clock in Hz
pub const PAL_MASTER_CLOCK: u32 = 53_203_424;

/// Master clock divider feeding the YM2612
const FM_CLOCK_DIVIDER: u32 = 7;
/// Master clock divider feeding the SN76489
const PSG_CLOCK_DIVIDER: u32 = 15;

/// Audio subsystem configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Console master clock in Hz; chip clocks derive from it
    pub master_clock: u32,
    /// Host output sample rate in Hz
    pub sample_rate: u32,
    /// Frames rendered per `run_frame` call
    pub buffer_frames: usize,
    /// FM source volume, 0.0..=1.0
    pub fm_volume: f32,
    /// PSG source volume, 0.0..=1.0
    pub psg_volume: f32,
    /// Master volume, 0.0..=1.0
    pub master_volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            master_clock: NTSC_MASTER_CLOCK,
            sample_rate: 44_100,
            buffer_frames: 2048,
            fm_volume: 1.0,
            psg_volume: 1.0,
            master_volume: 1.0,
        }
    }
}

impl AudioConfig {
    /// YM2612 input clock derived from the master clock
    pub fn fm_clock(&self) -> u32 {
        self.master_clock / FM_CLOCK_DIVIDER
    }

    /// SN76489 input clock derived from the master clock
    pub fn psg_clock(&self) -> u32 {
        self.master_clock / PSG_CLOCK_DIVIDER
    }

    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AudioError::Config("sample rate must be non-zero".into()));
        }
        if self.buffer_frames == 0 {
            return Err(AudioError::Config("buffer size must be non-zero".into()));
        }
        if self.master_clock < FM_CLOCK_DIVIDER.max(PSG_CLOCK_DIVIDER) {
            return Err(AudioError::Config(format!(
                "master clock {} Hz too low to derive chip clocks",
                self.master_clock
            )));
        }
        Ok(())
    }
}

/// The complete Mega Drive sound subsystem
pub struct AudioSystem {
    fm: Ym2612,
    psg: Sn76489,
    mixer: AudioMixer,
    ring_buffer: Arc<AudioRingBuffer>,
    fm_scratch: Vec<i16>,
    psg_scratch: Vec<i16>,
    mix_scratch: Vec<i16>,
    tick_remainder: u32,
    config: AudioConfig,
}

impl AudioSystem {
    /// Build a system from the configuration, validating it first.
    ///
    /// The ring buffer holds four render buffers' worth of frames so the
    /// producer can stay ahead of the audio callback.
    pub fn new(config: AudioConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "audio system: master {} Hz, FM {} Hz, PSG {} Hz, output {} Hz, {} frame buffers",
            config.master_clock,
            config.fm_clock(),
            config.psg_clock(),
            config.sample_rate,
            config.buffer_frames
        );

        let mut mixer = AudioMixer::with_strategy(MixStrategy::detect());
        mixer.set_fm_volume(config.fm_volume);
        mixer.set_psg_volume(config.psg_volume);
        mixer.set_master_volume(config.master_volume);

        let samples = config.buffer_frames * 2;
        Ok(Self {
            fm: Ym2612::new(config.fm_clock(), config.sample_rate),
            psg: Sn76489::new(config.psg_clock(), config.sample_rate),
            mixer,
            ring_buffer: Arc::new(AudioRingBuffer::new(config.buffer_frames * 4)?),
            fm_scratch: vec![0; samples],
            psg_scratch: vec![0; samples],
            mix_scratch: vec![0; samples],
            tick_remainder: 0,
            config,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Write a YM2612 register through the given bank (0 or 1)
    pub fn fm_write(&mut self, bank: u8, reg: u8, value: u8) {
        self.fm.write_register(bank, reg, value);
    }

    /// YM2612 status byte (timer overflow flags)
    pub fn fm_status(&self) -> u8 {
        self.fm.status()
    }

    /// Write one SN76489 command byte
    pub fn psg_write(&mut self, byte: u8) {
        self.psg.write(byte);
    }

    /// Write the SN76489 stereo enable byte
    pub fn psg_write_stereo(&mut self, mask: u8) {
        self.psg.write_stereo(mask);
    }

    /// Direct access to the FM chip
    pub fn fm(&mut self) -> &mut Ym2612 {
        &mut self.fm
    }

    /// Direct access to the PSG
    pub fn psg(&mut self) -> &mut Sn76489 {
        &mut self.psg
    }

    /// Set the FM source volume
    pub fn set_fm_volume(&mut self, volume: f32) {
        self.mixer.set_fm_volume(volume);
    }

    /// Set the PSG source volume
    pub fn set_psg_volume(&mut self, volume: f32) {
        self.mixer.set_psg_volume(volume);
    }

    /// Set the master volume
    pub fn set_master_volume(&mut self, volume: f32) {
        self.mixer.set_master_volume(volume);
    }

    /// Render one buffer of audio and publish it to the ring buffer.
    ///
    /// Returns the number of frames the transport had to drop to make room.
    pub fn run_frame(&mut self) -> Result<usize> {
        self.fm.generate_samples(&mut self.fm_scratch);
        self.psg.generate_samples(&mut self.psg_scratch);
        self.mixer
            .mix(&self.fm_scratch, &self.psg_scratch, &mut self.mix_scratch)?;
        let dropped = self.ring_buffer.write(&self.mix_scratch)?;
        if dropped > 0 {
            debug!("run_frame dropped {dropped} stale frames");
        }
        Ok(dropped)
    }

    /// Drain mixed samples into `out`, zero-filling on underrun.
    ///
    /// This is the consumer side; it never blocks and is safe to call from
    /// an audio callback through [`AudioSystem::transport`].
    pub fn read_samples(&self, out: &mut [i16]) -> Result<usize> {
        self.ring_buffer.read(out)
    }

    /// Shared handle to the sample transport for the audio callback thread
    pub fn transport(&self) -> Arc<AudioRingBuffer> {
        Arc::clone(&self.ring_buffer)
    }

    /// Advance the FM timers by emulated master-clock cycles without
    /// rendering audio.
    ///
    /// The FM chip sees master / 7; cycles that do not divide evenly carry
    /// over to the next call, so fine-grained stepping does not drift.
    pub fn tick(&mut self, master_cycles: u32) {
        let total = self.tick_remainder + master_cycles;
        self.tick_remainder = total % FM_CLOCK_DIVIDER;
        self.fm.tick(total / FM_CLOCK_DIVIDER);
    }

    /// Frames currently waiting in the transport
    pub fn available_samples(&self) -> usize {
        self.ring_buffer.available()
    }

    /// Whether the transport has no room left
    pub fn buffer_full(&self) -> bool {
        self.ring_buffer.is_full()
    }

    /// Transport counters
    pub fn stats(&self) -> RingBufferStats {
        self.ring_buffer.stats()
    }

    /// Reset both chips and discard buffered audio
    pub fn reset(&mut self) {
        self.fm.reset();
        self.psg.reset();
        self.ring_buffer.clear();
        self.tick_remainder = 0;
        debug!("audio system reset");
    }
}

impl std::fmt::Debug for AudioSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSystem")
            .field("config", &self.config)
            .field("fm", &self.fm)
            .field("psg", &self.psg)
            .field("stats", &self.stats())
            .finish()
    }
}
