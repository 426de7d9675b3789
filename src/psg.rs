//! SN76489 programmable sound generator
//!
//! Three square-wave tone channels plus one LFSR noise channel, programmed
//! through a single-byte command port. A latch byte (bit 7 set) selects a
//! register and writes its low nibble; a following data byte (bit 7 clear)
//! completes the 10-bit tone period with its high six bits.
//!
//! The chip runs at `clock / 16` internally; output is resampled to the host
//! rate through the same fixed-point accumulator the FM side uses.

use log::debug;

use crate::tables::PSG_VOLUME_TABLE;

/// Attenuation value that mutes a channel
const ATTENUATION_OFF: u8 = 0x0F;

/// Noise shift register seed, also used to recover from an all-zero state
const LFSR_SEED: u16 = 0x8000;

/// Input clock cycles per internal PSG cycle
const CLOCK_DIVIDER: u32 = 16;

/// SN76489 PSG
pub struct Sn76489 {
    tone_period: [u16; 3],
    attenuation: [u8; 4],
    noise_control: u8,

    latched_register: u8,

    tone_counter: [u16; 3],
    tone_output: [bool; 3],
    noise_counter: u16,
    lfsr: u16,

    /// per-channel stereo enables: bits 0-3 left, bits 4-7 right
    stereo_mask: u8,

    /// internal cycles per host sample, 12 fractional bits
    cycles_per_sample_fp: u64,
    cycle_frac: u64,
}

impl Sn76489 {
    /// Create a chip driven by `clock` Hz, producing `sample_rate` Hz output
    pub fn new(clock: u32, sample_rate: u32) -> Self {
        let internal = clock / CLOCK_DIVIDER;
        Self {
            tone_period: [0; 3],
            attenuation: [ATTENUATION_OFF; 4],
            noise_control: 0,
            latched_register: 0,
            tone_counter: [0; 3],
            tone_output: [false; 3],
            noise_counter: 0,
            lfsr: LFSR_SEED,
            stereo_mask: 0xFF,
            cycles_per_sample_fp: ((internal as u64) << 12) / sample_rate as u64,
            cycle_frac: 0,
        }
    }

    /// Write one command byte
    pub fn write(&mut self, byte: u8) {
        if byte & 0x80 != 0 {
            self.write_latch(byte);
        } else {
            self.write_data(byte);
        }
    }

    fn write_latch(&mut self, byte: u8) {
        let register = (byte >> 4) & 0x07;
        let data = byte & 0x0F;
        self.latched_register = register;
        let channel = (register >> 1) as usize;

        if register & 1 != 0 {
            self.attenuation[channel] = data;
        } else if register == 6 {
            self.noise_control = data & 0x07;
            self.lfsr = LFSR_SEED;
        } else {
            self.tone_period[channel] = (self.tone_period[channel] & 0x3F0) | data as u16;
        }
    }

    /// A data byte completes the latched tone period with its high six bits.
    /// Data bytes aimed at volume or noise registers re-deliver the low
    /// nibble they already set, so they are dropped here.
    fn write_data(&mut self, byte: u8) {
        let register = self.latched_register;
        if register & 1 != 0 || register == 6 {
            debug!("SN76489 data byte for non-tone register {register} dropped");
            return;
        }
        let channel = (register >> 1) as usize;
        self.tone_period[channel] =
            (self.tone_period[channel] & 0x00F) | (((byte & 0x3F) as u16) << 4);
    }

    /// Game Gear style stereo enable byte: bits 0-3 gate tone 0-2 and noise
    /// on the left, bits 4-7 on the right. Power-on default enables all.
    pub fn write_stereo(&mut self, mask: u8) {
        self.stereo_mask = mask;
    }

    /// Noise reload value: fixed 0x10/0x20/0x40, or tone 2's period
    fn noise_period(&self) -> u16 {
        match self.noise_control & 0x03 {
            0 => 0x10,
            1 => 0x20,
            2 => 0x40,
            _ => self.effective_tone_period(2),
        }
    }

    /// Tone periods below 2 would toggle above the audible band and alias;
    /// the stored register keeps its value, only the reload is clamped.
    fn effective_tone_period(&self, channel: usize) -> u16 {
        self.tone_period[channel].max(2)
    }

    fn shift_lfsr(&mut self) {
        let white = self.noise_control & 0x04 != 0;
        let feedback = if white {
            self.lfsr & 1
        } else {
            (self.lfsr & 1) ^ ((self.lfsr >> 3) & 1)
        };
        self.lfsr = (self.lfsr >> 1) | (feedback << 15);
        if self.lfsr == 0 {
            self.lfsr = LFSR_SEED;
        }
    }

    /// Advance all channels by one internal cycle
    fn step(&mut self) {
        for ch in 0..3 {
            if self.tone_counter[ch] <= 1 {
                self.tone_counter[ch] = self.effective_tone_period(ch);
                self.tone_output[ch] = !self.tone_output[ch];
            } else {
                self.tone_counter[ch] -= 1;
            }
        }
        if self.noise_counter <= 1 {
            self.noise_counter = self.noise_period();
            self.shift_lfsr();
        } else {
            self.noise_counter -= 1;
        }
    }

    fn channel_level(&self, channel: usize) -> i32 {
        let volume = PSG_VOLUME_TABLE[self.attenuation[channel] as usize] as i32;
        let high = if channel < 3 {
            self.tone_output[channel]
        } else {
            self.lfsr & 1 != 0
        };
        if high {
            volume
        } else {
            -volume
        }
    }

    /// Generate one stereo sample
    #[inline]
    pub fn generate(&mut self) -> (i16, i16) {
        self.cycle_frac += self.cycles_per_sample_fp;
        let mut ticks = self.cycle_frac >> 12;
        self.cycle_frac &= 0xFFF;
        while ticks > 0 {
            self.step();
            ticks -= 1;
        }

        let mut left = 0i32;
        let mut right = 0i32;
        for ch in 0..4 {
            let level = self.channel_level(ch);
            if self.stereo_mask & (1 << ch) != 0 {
                left += level;
            }
            if self.stereo_mask & (1 << (ch + 4)) != 0 {
                right += level;
            }
        }
        (
            left.clamp(-32768, 32767) as i16,
            right.clamp(-32768, 32767) as i16,
        )
    }

    /// Fill an interleaved stereo buffer
    pub fn generate_samples(&mut self, buffer: &mut [i16]) {
        for frame in buffer.chunks_exact_mut(2) {
            let (l, r) = self.generate();
            frame[0] = l;
            frame[1] = r;
        }
    }

    /// Return to the power-on state: all channels muted, noise reseeded
    pub fn reset(&mut self) {
        self.tone_period = [0; 3];
        self.attenuation = [ATTENUATION_OFF; 4];
        self.noise_control = 0;
        self.latched_register = 0;
        self.tone_counter = [0; 3];
        self.tone_output = [false; 3];
        self.noise_counter = 0;
        self.lfsr = LFSR_SEED;
        self.stereo_mask = 0xFF;
        self.cycle_frac = 0;
    }

    /// Current tone period register for a channel (tests and debugging)
    pub fn tone_period(&self, channel: usize) -> u16 {
        self.tone_period[channel]
    }

    /// Current attenuation register for a channel
    pub fn attenuation(&self, channel: usize) -> u8 {
        self.attenuation[channel]
    }
}

impl std::fmt::Debug for Sn76489 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sn76489")
            .field("tone_period", &self.tone_period)
            .field("attenuation", &self.attenuation)
            .field("noise_control", &self.noise_control)
            .field("stereo_mask", &self.stereo_mask)
            .finish()
    }
}
