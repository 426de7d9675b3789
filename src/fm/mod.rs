//! YM2612 six-channel FM synthesizer
//!
//! The chip exposes two register banks of 0x100 addresses each: bank 0
//! carries the global registers (LFO, timers, key on/off) plus channels 0-2,
//! bank 1 carries channels 3-5. Output is generated directly at the host
//! sample rate; phase increments are pre-scaled by the chip-to-host rate
//! ratio so no resampling pass is needed.

mod channel;
mod operator;

pub use channel::Channel;
pub use operator::{EnvelopeState, Operator};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::tables::LFO_DIVIDER;
use crate::timer::{Timer, TimerMode};

/// Status bit: timer A overflowed
pub const STATUS_TIMER_A: u8 = 0x01;
/// Status bit: timer B overflowed
pub const STATUS_TIMER_B: u8 = 0x02;

/// Internal clock divider: one FM sample per 144 master clock cycles
const CLOCK_DIVIDER: u32 = 144;

/// YM2612 FM synthesizer
pub struct Ym2612 {
    channels: [Channel; 6],
    registers: [[u8; 256]; 2],

    clock: u32,
    sample_rate: u32,
    /// chip-to-host phase scale, 12 fractional bits
    ratio_fp: u32,
    /// master clock cycles per host sample, 12 fractional bits
    cycles_per_sample_fp: u64,
    cycle_frac: u64,

    lfo_enabled: bool,
    lfo_frequency: u8,
    lfo_divider: u16,
    lfo_step: u8,

    timer_a: Timer,
    timer_b: Timer,
    status: Arc<AtomicU8>,
}

impl Ym2612 {
    /// Create a chip driven by `clock` Hz, producing `sample_rate` Hz output
    pub fn new(clock: u32, sample_rate: u32) -> Self {
        let chip_rate = clock / CLOCK_DIVIDER;
        let ratio_fp = (((chip_rate as u64) << 12) / sample_rate as u64) as u32;
        let status = Arc::new(AtomicU8::new(0));

        let mut timer_a = Timer::new();
        timer_a.set_prescaler(CLOCK_DIVIDER);
        let flag = Arc::clone(&status);
        timer_a.set_callback(Box::new(move || {
            flag.fetch_or(STATUS_TIMER_A, Ordering::Relaxed);
        }));

        let mut timer_b = Timer::new();
        timer_b.set_prescaler(CLOCK_DIVIDER);
        let flag = Arc::clone(&status);
        timer_b.set_callback(Box::new(move || {
            flag.fetch_or(STATUS_TIMER_B, Ordering::Relaxed);
        }));

        Self {
            channels: Default::default(),
            registers: [[0; 256]; 2],
            clock,
            sample_rate,
            ratio_fp,
            cycles_per_sample_fp: ((clock as u64) << 12) / sample_rate as u64,
            cycle_frac: 0,
            lfo_enabled: false,
            lfo_frequency: 0,
            lfo_divider: 0,
            lfo_step: 0,
            timer_a,
            timer_b,
            status,
        }
    }

    /// Write a register in the given bank (0 or 1)
    pub fn write_register(&mut self, bank: u8, reg: u8, value: u8) {
        let bank = (bank & 1) as usize;
        self.registers[bank][reg as usize] = value;

        match reg {
            0x22..=0x2F if bank == 0 => self.write_global(reg, value),
            0x22..=0x2F => warn!("YM2612 global register {reg:#04x} written through bank 1"),
            0x30..=0x9F => {
                let Some(channel) = self.channel_index(bank, reg) else {
                    return;
                };
                let op = ((reg >> 2) & 0x03) as usize;
                let target = &mut self.channels[channel].operators[op];
                match reg & 0xF0 {
                    0x30 => target.set_detune_multiple(value),
                    0x40 => target.set_total_level(value),
                    0x50 => target.set_rate_scaling_attack(value),
                    0x60 => target.set_am_decay(value),
                    0x70 => target.set_sustain_rate(value),
                    0x80 => target.set_sustain_release(value),
                    _ => warn!("YM2612 SSG-EG register {reg:#04x} ignored"),
                }
            }
            0xA0..=0xA2 | 0xA4..=0xA6 | 0xB0..=0xB2 | 0xB4..=0xB6 => {
                let Some(channel) = self.channel_index(bank, reg) else {
                    return;
                };
                let ratio = self.ratio_fp;
                let target = &mut self.channels[channel];
                match reg & 0xFC {
                    0xA0 => target.write_fnum_low(value, ratio),
                    0xA4 => target.write_fnum_high(value),
                    0xB0 => target.write_feedback_algorithm(value),
                    0xB4 => target.write_pan(value),
                    _ => unreachable!(),
                }
            }
            _ => debug!("YM2612 unhandled register {reg:#04x} <- {value:#04x}"),
        }
    }

    /// Channel addressed by the low register bits and the bank; the fourth
    /// slot of each bank is unmapped.
    fn channel_index(&self, bank: usize, reg: u8) -> Option<usize> {
        let low = (reg & 0x03) as usize;
        if low == 3 {
            warn!("YM2612 write to unmapped channel slot, register {reg:#04x}");
            return None;
        }
        Some(low + bank * 3)
    }

    fn write_global(&mut self, reg: u8, value: u8) {
        match reg {
            0x22 => {
                self.lfo_enabled = value & 0x08 != 0;
                self.lfo_frequency = value & 0x07;
                if !self.lfo_enabled {
                    self.lfo_step = 0;
                    self.lfo_divider = 0;
                }
            }
            0x24 | 0x25 => {
                let msb = self.registers[0][0x24] as u32;
                let lsb = (self.registers[0][0x25] & 0x03) as u32;
                self.timer_a
                    .configure(1024 - ((msb << 2) | lsb), TimerMode::Periodic);
            }
            0x26 => {
                self.timer_b
                    .configure((256 - value as u32) * 16, TimerMode::Periodic);
            }
            0x27 => {
                if value & 0x01 != 0 {
                    if !self.timer_a.is_running() {
                        self.timer_a.start();
                    }
                } else {
                    self.timer_a.stop();
                }
                if value & 0x02 != 0 {
                    if !self.timer_b.is_running() {
                        self.timer_b.start();
                    }
                } else {
                    self.timer_b.stop();
                }
                if value & 0x10 != 0 {
                    self.status.fetch_and(!STATUS_TIMER_A, Ordering::Relaxed);
                    self.timer_a.clear_expired();
                }
                if value & 0x20 != 0 {
                    self.status.fetch_and(!STATUS_TIMER_B, Ordering::Relaxed);
                    self.timer_b.clear_expired();
                }
            }
            0x28 => {
                let slots = value >> 4;
                match value & 0x07 {
                    c @ 0..=2 => self.channels[c as usize].write_key(slots),
                    c @ 4..=6 => self.channels[c as usize - 1].write_key(slots),
                    c => warn!("YM2612 key-on for invalid channel code {c}"),
                }
            }
            0x2A | 0x2B => debug!("YM2612 DAC register {reg:#04x} ignored"),
            _ => debug!("YM2612 unhandled global register {reg:#04x}"),
        }
    }

    /// Raw readback of the last byte written to a register
    pub fn read_register(&self, bank: u8, reg: u8) -> u8 {
        self.registers[(bank & 1) as usize][reg as usize]
    }

    /// Status byte: timer A overflow in bit 0, timer B overflow in bit 1
    pub fn status(&self) -> u8 {
        self.status.load(Ordering::Relaxed)
    }

    /// Advance both interval timers by `cycles` master-clock cycles without
    /// rendering audio. `generate` accounts for time on its own; use this
    /// when the host steps the chip while audio output is suspended.
    pub fn tick(&mut self, cycles: u32) {
        self.timer_a.tick(cycles);
        self.timer_b.tick(cycles);
    }

    /// Status flags of timer A (slot 0) or timer B (slot 1)
    pub fn timer_state(&self, slot: usize) -> crate::timer::TimerFlags {
        match slot {
            0 => self.timer_a.state(),
            _ => self.timer_b.state(),
        }
    }

    /// Current LFO tremolo level as 10-bit attenuation, triangle shaped
    fn lfo_am_level(&self) -> u16 {
        if !self.lfo_enabled {
            return 0;
        }
        let step = self.lfo_step as u16;
        if step < 64 {
            (63 - step) * 2
        } else {
            (step - 64) * 2
        }
    }

    /// Current LFO vibrato step, a signed triangle over the 128-step cycle
    fn lfo_pm_level(&self) -> i32 {
        if !self.lfo_enabled {
            return 0;
        }
        let step = self.lfo_step as i32;
        if step < 32 {
            step
        } else if step < 96 {
            64 - step
        } else {
            step - 128
        }
    }

    fn advance_lfo(&mut self) {
        if !self.lfo_enabled {
            return;
        }
        self.lfo_divider += 1;
        if self.lfo_divider >= LFO_DIVIDER[self.lfo_frequency as usize] {
            self.lfo_divider = 0;
            self.lfo_step = (self.lfo_step + 1) & 0x7F;
        }
    }

    /// Generate one mixed stereo sample from all six channels.
    ///
    /// Also advances the interval timers by the master-clock cycles this
    /// sample spans.
    #[inline]
    pub fn generate(&mut self) -> (i16, i16) {
        self.cycle_frac += self.cycles_per_sample_fp;
        let elapsed = (self.cycle_frac >> 12) as u32;
        self.cycle_frac &= 0xFFF;
        self.timer_a.tick(elapsed);
        self.timer_b.tick(elapsed);

        self.advance_lfo();
        let am = self.lfo_am_level();
        let pm = self.lfo_pm_level();

        let mut left = 0i32;
        let mut right = 0i32;
        for ch in &mut self.channels {
            let (l, r) = ch.tick(am, pm);
            left += l;
            right += r;
        }

        // six channels summed, scaled back into 16-bit range
        (
            (left / 2).clamp(-32768, 32767) as i16,
            (right / 2).clamp(-32768, 32767) as i16,
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

    /// Return every channel, register and timer to the power-on state
    pub fn reset(&mut self) {
        for ch in &mut self.channels {
            ch.reset();
        }
        self.registers = [[0; 256]; 2];
        self.lfo_enabled = false;
        self.lfo_frequency = 0;
        self.lfo_divider = 0;
        self.lfo_step = 0;
        self.cycle_frac = 0;
        self.timer_a.stop();
        self.timer_a.clear_expired();
        self.timer_b.stop();
        self.timer_b.clear_expired();
        self.status.store(0, Ordering::Relaxed);
    }

    /// Direct access to a channel, used by tests and debugging tools
    pub fn channel(&self, index: usize) -> &Channel {
        &self.channels[index]
    }
}

impl std::fmt::Debug for Ym2612 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ym2612")
            .field("clock", &self.clock)
            .field("sample_rate", &self.sample_rate)
            .field("lfo_enabled", &self.lfo_enabled)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NTSC_FM_CLOCK: u32 = 7_670_454;
    const SAMPLE_RATE: u32 = 44_100;

    fn chip() -> Ym2612 {
        Ym2612::new(NTSC_FM_CLOCK, SAMPLE_RATE)
    }

    /// Program channel 0 as a single parallel-carrier voice
    fn program_voice(fm: &mut Ym2612) {
        for op in 0..4 {
            let base = (op as u8) << 2;
            fm.write_register(0, 0x30 + base, 0x01); // mul 1
            fm.write_register(0, 0x40 + base, 0x00); // full volume
            fm.write_register(0, 0x50 + base, 0x1F); // fastest attack
            fm.write_register(0, 0x60 + base, 0x00);
            fm.write_register(0, 0x70 + base, 0x00);
            fm.write_register(0, 0x80 + base, 0x00);
        }
        fm.write_register(0, 0xB0, 0x07); // algorithm 7
        fm.write_register(0, 0xB4, 0xC0); // both sides
        fm.write_register(0, 0xA4, 0x22);
        fm.write_register(0, 0xA0, 0x69);
    }

    #[test]
    fn keyed_channel_is_audible() {
        let mut fm = chip();
        program_voice(&mut fm);
        fm.write_register(0, 0x28, 0xF0);
        let mut peak = 0u16;
        let mut buf = [0i16; 4096];
        fm.generate_samples(&mut buf);
        for &s in &buf {
            peak = peak.max(s.unsigned_abs());
        }
        assert!(peak > 500, "peak {peak}");
    }

    #[test]
    fn register_readback_is_raw() {
        let mut fm = chip();
        fm.write_register(0, 0x42, 0x55);
        fm.write_register(1, 0x42, 0xAA);
        assert_eq!(fm.read_register(0, 0x42), 0x55);
        assert_eq!(fm.read_register(1, 0x42), 0xAA);
    }

    #[test]
    fn bank_one_addresses_upper_channels() {
        let mut fm = chip();
        fm.write_register(1, 0xB0, 0x05);
        assert_eq!(fm.channel(3).algorithm(), 5);
        assert_eq!(fm.channel(0).algorithm(), 0);
    }

    #[test]
    fn unmapped_channel_slot_is_ignored() {
        let mut fm = chip();
        fm.write_register(0, 0xB3, 0x07);
        for c in 0..6 {
            assert_eq!(fm.channel(c).algorithm(), 0);
        }
    }

    #[test]
    fn key_code_four_to_six_map_to_upper_channels() {
        let mut fm = chip();
        program_voice(&mut fm);
        fm.write_register(1, 0xB0, 0x07);
        fm.write_register(1, 0xB4, 0xC0);
        // key on channel code 4 = channel 3
        fm.write_register(0, 0x28, 0xF4);
        // channel 3 has no frequency programmed, so stays silent, but the key
        // state must land there and not on channel 0
        fm.write_register(0, 0x28, 0x04);
        let mut buf = [0i16; 512];
        fm.generate_samples(&mut buf);
        assert!(buf.iter().all(|&s| s == 0));
    }

    #[test]
    fn timer_a_overflows_and_clears() {
        let mut fm = chip();
        // shortest period
        fm.write_register(0, 0x24, 0xFF);
        fm.write_register(0, 0x25, 0x03);
        fm.write_register(0, 0x27, 0x01); // load A
        let mut buf = [0i16; 64];
        fm.generate_samples(&mut buf);
        assert!(fm.status() & STATUS_TIMER_A != 0);
        assert_eq!(fm.status() & STATUS_TIMER_B, 0);
        // reset flag without stopping the timer
        fm.write_register(0, 0x27, 0x11);
        assert_eq!(fm.status() & STATUS_TIMER_A, 0);
    }

    #[test]
    fn timer_b_sixteen_times_slower() {
        let mut fm = chip();
        fm.write_register(0, 0x26, 0xFF); // period 16 chip samples
        fm.write_register(0, 0x27, 0x02);
        let mut buf = [0i16; 8];
        fm.generate_samples(&mut buf);
        // 4 host samples ~= 4.8 chip samples: not yet
        assert_eq!(fm.status() & STATUS_TIMER_B, 0);
        let mut buf = [0i16; 64];
        fm.generate_samples(&mut buf);
        assert!(fm.status() & STATUS_TIMER_B != 0);
    }

    #[test]
    fn reset_silences_and_clears_state() {
        let mut fm = chip();
        program_voice(&mut fm);
        fm.write_register(0, 0x28, 0xF0);
        let mut buf = [0i16; 1024];
        fm.generate_samples(&mut buf);
        fm.reset();
        assert_eq!(fm.read_register(0, 0xB0), 0);
        assert_eq!(fm.status(), 0);
        let mut buf = [0i16; 1024];
        fm.generate_samples(&mut buf);
        assert!(buf.iter().all(|&s| s == 0));
    }

    #[test]
    fn lfo_vibrato_modulates_pitch() {
        // pure carrier, AM disabled everywhere: any difference comes from
        // the pitch path alone
        let render = |pan_byte: u8, lfo: u8| -> Vec<i16> {
            let mut fm = chip();
            program_voice(&mut fm);
            fm.write_register(0, 0x22, lfo);
            fm.write_register(0, 0xB4, pan_byte);
            fm.write_register(0, 0x28, 0xF0);
            let mut buf = vec![0i16; 4096];
            fm.generate_samples(&mut buf);
            buf
        };
        // max frequency sensitivity, fastest LFO
        assert_ne!(render(0xC7, 0x0F), render(0xC7, 0x00));
        // zero sensitivity keeps the LFO inaudible on the pitch path
        assert_eq!(render(0xC0, 0x0F), render(0xC0, 0x00));
    }

    #[test]
    fn lfo_tremolo_modulates_amplitude() {
        let render = |lfo: u8| -> Vec<i16> {
            let mut fm = chip();
            program_voice(&mut fm);
            if lfo != 0 {
                fm.write_register(0, 0x22, 0x0F); // LFO on, fastest
                fm.write_register(0, 0xB4, 0xF0); // max AM sensitivity
                for op in 0..4u8 {
                    fm.write_register(0, 0x60 + (op << 2), 0x80); // AM enable
                }
            }
            fm.write_register(0, 0x28, 0xF0);
            let mut buf = vec![0i16; 8192];
            fm.generate_samples(&mut buf);
            buf
        };
        assert_ne!(render(0), render(1));
    }
}
