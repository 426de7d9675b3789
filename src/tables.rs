//! Shared lookup tables for FM synthesis, PSG output and mixing
//!
//! Every table is immutable and built at most once through `OnceLock`, so a
//! single process can host several chip instances without synchronization.
//! The FM tables are monotonic reference curves parameterized by the same
//! register fields as the real silicon, not silicon-exact reproductions.

use std::sync::OnceLock;

/// Sine table length (power of two, phase wraps modulo this)
pub const SINE_LEN: usize = 1024;

/// Maximum envelope attenuation (10-bit, silence)
pub const MAX_ATTENUATION: u16 = 0x3FF;

/// Envelope steps are expressed in 1/64 attenuation units
pub const ENV_STEP_FRAC_BITS: u32 = 6;

static SINE_TABLE: OnceLock<[i16; SINE_LEN]> = OnceLock::new();
static EXP_ATT_TABLE: OnceLock<[u16; 1024]> = OnceLock::new();
static ATTACK_STEP: OnceLock<[u32; 64]> = OnceLock::new();
static DECAY_STEP: OnceLock<[u32; 64]> = OnceLock::new();
static MIX_VOLUME_TABLE: OnceLock<[i16; 256]> = OnceLock::new();

/// One full sine period, 14-bit amplitude (-8191..=8191)
pub fn sine_table() -> &'static [i16; SINE_LEN] {
    SINE_TABLE.get_or_init(|| {
        std::array::from_fn(|i| {
            let phase = (i as f64) * 2.0 * std::f64::consts::PI / SINE_LEN as f64;
            (phase.sin() * 8191.0).round() as i16
        })
    })
}

/// Exponential attenuation to linear gain: `gain = 2^(-att/64) * 32767`
///
/// Entry 0 is full scale. Truncation, not rounding, so the deep end of the
/// curve reaches exactly zero and a fully attenuated operator is silent.
pub fn exp_att_table() -> &'static [u16; 1024] {
    EXP_ATT_TABLE.get_or_init(|| {
        std::array::from_fn(|i| {
            let gain = 2f64.powf(-(i as f64) / 64.0) * 32767.0;
            gain as u16
        })
    })
}

/// Envelope step for one effective rate, in 1/64 attenuation units.
///
/// Rates below 4 never move the envelope, matching the hardware's "infinite"
/// low rates. Above that the step doubles every 4 rate values, which spans
/// from multi-second sweeps down to instantaneous jumps at rate 63.
fn env_step(effective_rate: u32) -> u32 {
    if effective_rate < 4 {
        0
    } else {
        1u32 << (effective_rate / 4).min(15)
    }
}

fn rate_table(scale_shift: u32) -> [u32; 64] {
    std::array::from_fn(|rate| env_step(rate as u32) >> scale_shift)
}

/// Attack steps indexed by effective rate (key scaling already folded in)
pub fn attack_step_table() -> &'static [u32; 64] {
    ATTACK_STEP.get_or_init(|| rate_table(0))
}

/// Decay/sustain/release steps, one quarter of the attack speed
pub fn decay_step_table() -> &'static [u32; 64] {
    DECAY_STEP.get_or_init(|| rate_table(2))
}

/// Detune phase deltas indexed by [key code][detune magnitude 0-3]
///
/// Detune register bit 2 selects the sign; magnitudes come from the
/// documented OPN detune characteristics.
pub const DETUNE_TABLE: [[u8; 4]; 32] = [
    [0, 0, 1, 2],
    [0, 0, 1, 2],
    [0, 0, 1, 2],
    [0, 0, 1, 2],
    [0, 1, 2, 2],
    [0, 1, 2, 3],
    [0, 1, 2, 3],
    [0, 1, 2, 3],
    [0, 1, 2, 4],
    [0, 1, 3, 4],
    [0, 1, 3, 4],
    [0, 1, 3, 5],
    [0, 2, 4, 5],
    [0, 2, 4, 6],
    [0, 2, 4, 6],
    [0, 2, 5, 7],
    [0, 2, 5, 8],
    [0, 3, 6, 8],
    [0, 3, 6, 9],
    [0, 3, 7, 10],
    [0, 4, 8, 11],
    [0, 4, 8, 12],
    [0, 4, 9, 13],
    [0, 5, 10, 14],
    [0, 5, 11, 16],
    [0, 6, 12, 17],
    [0, 6, 13, 19],
    [0, 7, 14, 20],
    [0, 8, 16, 22],
    [0, 8, 16, 22],
    [0, 8, 16, 22],
    [0, 8, 16, 22],
];

/// Samples per LFO counter increment, indexed by the 3-bit LFO frequency
pub const LFO_DIVIDER: [u16; 8] = [108, 77, 71, 67, 62, 44, 8, 5];

/// SN76489 attenuation curve, ~2 dB per step, entry 15 fully silent
pub const PSG_VOLUME_TABLE: [i16; 16] = [
    32767, 26028, 20675, 16422, 13045, 10362, 8231, 6568, 5193, 4125, 3277, 2603, 2067, 1642,
    1304, 0,
];

/// Linear volume scale for the integer mix path (index = volume * 255)
pub fn mix_volume_table() -> &'static [i16; 256] {
    MIX_VOLUME_TABLE.get_or_init(|| {
        std::array::from_fn(|i| ((i as f32 / 255.0) * 32767.0) as i16)
    })
}
