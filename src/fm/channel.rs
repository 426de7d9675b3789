//! FM channel: four operators wired by one of eight algorithms
//!
//! The algorithm selects which operators modulate which, and which feed the
//! channel output. Operator 0 can additionally modulate itself through the
//! feedback path.

use super::operator::Operator;

/// Operator wiring for one algorithm.
///
/// `mod_sources[i]` is a bitmask of lower-numbered operators whose outputs
/// sum into operator `i`'s modulation input; `carriers` is a bitmask of
/// operators that sum into the channel output. Operators are evaluated in
/// index order, so every source precedes its sink.
struct Algorithm {
    mod_sources: [u8; 4],
    carriers: u8,
}

/// The eight OPN operator topologies. Algorithm 0 is the full serial chain
/// 0->1->2->3; algorithm 7 runs all four operators in parallel.
const ALGORITHMS: [Algorithm; 8] = [
    Algorithm { mod_sources: [0, 0b0001, 0b0010, 0b0100], carriers: 0b1000 },
    Algorithm { mod_sources: [0, 0, 0b0011, 0b0100], carriers: 0b1000 },
    Algorithm { mod_sources: [0, 0, 0b0010, 0b0101], carriers: 0b1000 },
    Algorithm { mod_sources: [0, 0b0001, 0, 0b0110], carriers: 0b1000 },
    Algorithm { mod_sources: [0, 0b0001, 0, 0b0100], carriers: 0b1010 },
    Algorithm { mod_sources: [0, 0b0001, 0b0001, 0b0001], carriers: 0b1110 },
    Algorithm { mod_sources: [0, 0b0001, 0, 0], carriers: 0b1110 },
    Algorithm { mod_sources: [0, 0, 0, 0], carriers: 0b1111 },
];

/// Frequency-number scaling shift per LFO frequency sensitivity (1-7);
/// larger sensitivity means a smaller shift and a deeper vibrato.
const FMS_SHIFT: [u32; 8] = [0, 15, 14, 13, 12, 11, 10, 9];

/// One of the six FM channels
#[derive(Debug, Clone)]
pub struct Channel {
    /// The channel's four operators in slot order
    pub operators: [Operator; 4],
    fnum: u16,
    block: u8,
    fnum_latch: u8,
    algorithm: u8,
    feedback: u8,
    pan_left: bool,
    pan_right: bool,
    am_sensitivity: u8,
    fm_sensitivity: u8,
    ratio_fp: u32,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            operators: Default::default(),
            fnum: 0,
            block: 0,
            fnum_latch: 0,
            algorithm: 0,
            feedback: 0,
            pan_left: true,
            pan_right: true,
            am_sensitivity: 0,
            fm_sensitivity: 0,
            ratio_fp: 0,
        }
    }
}

impl Channel {
    /// 5-bit key code derived from block and the top frequency bits,
    /// used for envelope rate scaling and detune.
    fn key_code(&self) -> u8 {
        let f11 = (self.fnum >> 10) & 1;
        let f10 = (self.fnum >> 9) & 1;
        let f9 = (self.fnum >> 8) & 1;
        let f8 = (self.fnum >> 7) & 1;
        let n4 = f11;
        let n3 = (f11 & (f10 | f9 | f8)) | ((f11 ^ 1) & f10 & f9 & f8);
        ((self.block << 2) | ((n4 as u8) << 1) | n3 as u8) & 0x1F
    }

    fn refresh_frequency(&mut self, fnum: u16) {
        let key_code = self.key_code();
        for op in &mut self.operators {
            op.update_frequency(fnum, self.block, key_code, self.ratio_fp);
        }
    }

    /// Register 0xA0 group: frequency number low byte. Combines with the
    /// latched high byte and takes effect immediately.
    pub fn write_fnum_low(&mut self, value: u8, ratio_fp: u32) {
        self.fnum = (((self.fnum_latch as u16) & 0x07) << 8) | value as u16;
        self.block = (self.fnum_latch >> 3) & 0x07;
        self.ratio_fp = ratio_fp;
        self.refresh_frequency(self.fnum);
    }

    /// Register 0xA4 group: block and frequency high bits, latched until the
    /// matching low byte arrives.
    pub fn write_fnum_high(&mut self, value: u8) {
        self.fnum_latch = value & 0x3F;
    }

    /// Register 0xB0 group: feedback (bits 3-5) and algorithm (bits 0-2)
    pub fn write_feedback_algorithm(&mut self, value: u8) {
        self.feedback = (value >> 3) & 0x07;
        self.algorithm = value & 0x07;
    }

    /// Register 0xB4 group: stereo enables (left bit 7, right bit 6), LFO
    /// amplitude sensitivity (bits 4-5) and frequency sensitivity (bits 0-2)
    pub fn write_pan(&mut self, value: u8) {
        self.pan_left = value & 0x80 != 0;
        self.pan_right = value & 0x40 != 0;
        self.am_sensitivity = (value >> 4) & 0x03;
        self.fm_sensitivity = value & 0x07;
    }

    /// Key individual operators on or off from the 4-bit slot mask
    pub fn write_key(&mut self, slots: u8) {
        for (i, op) in self.operators.iter_mut().enumerate() {
            if slots & (1 << i) != 0 {
                op.key_on();
            } else {
                op.key_off();
            }
        }
    }

    /// Selected algorithm, 0-7
    pub fn algorithm(&self) -> u8 {
        self.algorithm
    }

    /// Produce one stereo sample pair for this channel.
    ///
    /// `lfo_am` is the chip-wide LFO tremolo level; the channel scales it by
    /// its own amplitude sensitivity, and operators apply it only when their
    /// AM enable bit is set. `lfo_pm` is the signed chip-wide vibrato step;
    /// with a non-zero frequency sensitivity it bends the frequency number
    /// before the operators advance, and the increments snap back once the
    /// step returns to zero.
    #[inline]
    pub fn tick(&mut self, lfo_am: u16, lfo_pm: i32) -> (i32, i32) {
        let am_attenuation = match self.am_sensitivity {
            0 => 0,
            1 => lfo_am >> 3,
            2 => lfo_am >> 1,
            _ => lfo_am,
        };
        if self.fm_sensitivity != 0 {
            let delta = (self.fnum as i32 * lfo_pm) >> FMS_SHIFT[self.fm_sensitivity as usize];
            let bent = (self.fnum as i32 + delta).clamp(0, 0x7FF) as u16;
            self.refresh_frequency(bent);
        }
        let algo = &ALGORITHMS[self.algorithm as usize];
        let mut outputs = [0i32; 4];
        let mut sum = 0i32;

        for i in 0..4 {
            let modulation = if i == 0 {
                if self.feedback == 0 {
                    0
                } else {
                    self.operators[0].feedback_sum() >> (10 - self.feedback)
                }
            } else {
                let mut m = 0i32;
                for (j, out) in outputs.iter().enumerate().take(i) {
                    if algo.mod_sources[i] & (1 << j) != 0 {
                        m += out;
                    }
                }
                m
            };

            outputs[i] = self.operators[i].tick(modulation, am_attenuation);
            if algo.carriers & (1 << i) != 0 {
                sum += outputs[i];
            }
        }

        let sum = sum.clamp(-32768, 32767);
        (
            if self.pan_left { sum } else { 0 },
            if self.pan_right { sum } else { 0 },
        )
    }

    /// Return to the power-on state
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
