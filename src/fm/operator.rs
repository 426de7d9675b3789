//! Single FM operator: phase generator plus ADSR envelope
//!
//! An operator produces one sine partial whose phase can be pushed around by
//! a modulation input and whose amplitude follows a four-segment envelope.
//! Attenuation is 10-bit throughout: 0 is loudest, 0x3FF is silence.

use crate::tables::{
    attack_step_table, decay_step_table, exp_att_table, sine_table, DETUNE_TABLE, MAX_ATTENUATION,
};

/// Envelope segment the operator is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvelopeState {
    /// Attenuation falling toward 0 after key-on
    Attack,
    /// Attenuation rising toward the sustain level
    Decay,
    /// Attenuation rising at the sustain rate while the key is held
    #[default]
    Sustain,
    /// Attenuation rising toward silence after key-off
    Release,
}

/// One of the four operators of an FM channel
#[derive(Debug, Clone)]
pub struct Operator {
    // register fields
    detune: u8,
    multiple: u8,
    total_level: u8,
    rate_scaling: u8,
    attack_rate: u8,
    decay_rate: u8,
    sustain_rate: u8,
    sustain_level: u8,
    release_rate: u8,
    am_enable: bool,

    // phase generator, 20-bit accumulator
    phase: u32,
    phase_increment: u32,

    // envelope generator
    state: EnvelopeState,
    level: u16,
    level_frac: u32,
    key_on: bool,
    key_code: u8,

    // previous outputs kept for feedback
    last_output: i32,
    prev_output: i32,
}

impl Default for Operator {
    fn default() -> Self {
        Self {
            detune: 0,
            multiple: 0,
            total_level: 0x7F,
            rate_scaling: 0,
            attack_rate: 0,
            decay_rate: 0,
            sustain_rate: 0,
            sustain_level: 0,
            release_rate: 0,
            am_enable: false,
            phase: 0,
            phase_increment: 0,
            state: EnvelopeState::Release,
            level: MAX_ATTENUATION,
            level_frac: 0,
            key_on: false,
            key_code: 0,
            last_output: 0,
            prev_output: 0,
        }
    }
}

impl Operator {
    /// Register 0x30 group: detune (bits 4-6) and multiple (bits 0-3)
    pub fn set_detune_multiple(&mut self, value: u8) {
        self.detune = (value >> 4) & 0x07;
        self.multiple = value & 0x0F;
    }

    /// Register 0x40 group: total level, 7 bits
    pub fn set_total_level(&mut self, value: u8) {
        self.total_level = value & 0x7F;
    }

    /// Register 0x50 group: rate scaling (bits 6-7) and attack rate (bits 0-4)
    pub fn set_rate_scaling_attack(&mut self, value: u8) {
        self.rate_scaling = (value >> 6) & 0x03;
        self.attack_rate = value & 0x1F;
    }

    /// Register 0x60 group: AM enable (bit 7) and decay rate (bits 0-4)
    pub fn set_am_decay(&mut self, value: u8) {
        self.am_enable = value & 0x80 != 0;
        self.decay_rate = value & 0x1F;
    }

    /// Register 0x70 group: sustain rate, 5 bits
    pub fn set_sustain_rate(&mut self, value: u8) {
        self.sustain_rate = value & 0x1F;
    }

    /// Register 0x80 group: sustain level (bits 4-7) and release rate (bits 0-3)
    pub fn set_sustain_release(&mut self, value: u8) {
        self.sustain_level = (value >> 4) & 0x0F;
        self.release_rate = value & 0x0F;
    }

    /// Whether this operator responds to the channel LFO amplitude modulation
    pub fn am_enabled(&self) -> bool {
        self.am_enable
    }

    /// Current 10-bit envelope attenuation
    pub fn envelope_level(&self) -> u16 {
        self.level
    }

    /// Current envelope segment
    pub fn envelope_state(&self) -> EnvelopeState {
        self.state
    }

    /// Rising edge starts the attack from silence at phase zero; a repeated
    /// key-on while already keyed is ignored.
    pub fn key_on(&mut self) {
        if self.key_on {
            return;
        }
        self.key_on = true;
        self.phase = 0;
        self.level = MAX_ATTENUATION;
        self.level_frac = 0;
        self.state = EnvelopeState::Attack;
    }

    /// Enter the release segment; repeated key-off is ignored
    pub fn key_off(&mut self) {
        if !self.key_on {
            return;
        }
        self.key_on = false;
        self.state = EnvelopeState::Release;
    }

    /// Recompute the phase increment from the channel frequency settings.
    ///
    /// `ratio_fp` converts chip-native phase units to output-sample units,
    /// fixed point with 12 fractional bits.
    pub fn update_frequency(&mut self, fnum: u16, block: u8, key_code: u8, ratio_fp: u32) {
        self.key_code = key_code & 0x1F;
        let base = ((fnum as i32) << block) >> 1;

        let magnitude = (self.detune & 0x03) as usize;
        let delta = DETUNE_TABLE[self.key_code as usize][magnitude] as i32;
        let detuned = if self.detune & 0x04 != 0 {
            (base - delta).max(0)
        } else {
            base + delta
        };

        let multiplied = if self.multiple == 0 {
            detuned / 2
        } else {
            detuned * self.multiple as i32
        };

        self.phase_increment = ((multiplied as u64 * ratio_fp as u64) >> 12) as u32;
    }

    /// Current phase increment per output sample
    pub fn phase_step(&self) -> u32 {
        self.phase_increment
    }

    /// Effective rate 0-63: twice the register rate plus the key-scaled pitch
    fn effective_rate(&self, rate: u8) -> usize {
        if rate == 0 {
            return 0;
        }
        let scaled = (self.key_code >> (3 - self.rate_scaling)) as u32;
        ((rate as u32 * 2) + scaled).min(63) as usize
    }

    /// Sustain level as 10-bit attenuation; 15 means full silence
    fn sustain_attenuation(&self) -> u16 {
        if self.sustain_level == 0x0F {
            MAX_ATTENUATION
        } else {
            (self.sustain_level as u16) << 5
        }
    }

    /// Advance the envelope by one sample
    fn step_envelope(&mut self) {
        let (rate, step_table): (u8, &[u32; 64]) = match self.state {
            EnvelopeState::Attack => (self.attack_rate, attack_step_table()),
            EnvelopeState::Decay => (self.decay_rate, decay_step_table()),
            EnvelopeState::Sustain => (self.sustain_rate, decay_step_table()),
            EnvelopeState::Release => ((self.release_rate << 1) | 1, decay_step_table()),
        };
        let step = step_table[self.effective_rate(rate)];
        if step == 0 {
            return;
        }

        self.level_frac += step;
        let delta = (self.level_frac >> 6) as u16;
        self.level_frac &= 0x3F;
        if delta == 0 {
            return;
        }

        match self.state {
            EnvelopeState::Attack => {
                self.level = self.level.saturating_sub(delta);
                if self.level == 0 {
                    self.state = EnvelopeState::Decay;
                    self.level_frac = 0;
                }
            }
            EnvelopeState::Decay => {
                let target = self.sustain_attenuation();
                self.level = (self.level + delta).min(MAX_ATTENUATION);
                if self.level >= target {
                    self.level = target;
                    self.state = EnvelopeState::Sustain;
                    self.level_frac = 0;
                }
            }
            EnvelopeState::Sustain | EnvelopeState::Release => {
                self.level = (self.level + delta).min(MAX_ATTENUATION);
            }
        }
    }

    /// Produce one 14-bit sample.
    ///
    /// `modulation` is the summed 14-bit output of this operator's modulators
    /// (or the channel feedback term); `am_attenuation` is the LFO tremolo
    /// contribution already scaled to 10-bit attenuation units.
    #[inline]
    pub fn tick(&mut self, modulation: i32, am_attenuation: u16) -> i32 {
        self.step_envelope();

        let index = ((self.phase >> 10) as i32 + (modulation >> 3)) as usize & 0x3FF;
        self.phase = (self.phase + self.phase_increment) & 0xFFFFF;

        let mut attenuation = self.level as u32 + ((self.total_level as u32) << 3);
        if self.am_enable {
            attenuation += am_attenuation as u32;
        }
        let attenuation = attenuation.min(MAX_ATTENUATION as u32) as usize;

        let sample = sine_table()[index] as i32;
        let output = (sample * exp_att_table()[attenuation] as i32) >> 15;

        self.prev_output = self.last_output;
        self.last_output = output;
        output
    }

    /// Mean of the two most recent outputs, used for channel feedback
    #[inline]
    pub fn feedback_sum(&self) -> i32 {
        self.last_output + self.prev_output
    }

    /// Return to the power-on state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
