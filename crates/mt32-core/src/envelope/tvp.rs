//! Time variant pitch
//!
//! Unlike TVA and TVF, pitch is not driven by an LA32 ramp. The firmware
//! recomputes it from a software timer, interpolating linearly between
//! envelope levels and ping-ponging an LFO once the envelope settles.

use super::{EnvelopeContext, NoteInfo};
use crate::params::{PartialParam, PatchParam, PitchEnvParam, PitchLfoParam};
use crate::rom::{PcmWaveEntry, RomFeatures};

/// Semitone steps for keys 0-68 away from middle C
const KEY_TO_PITCH_TABLE: [u16; 69] = {
    let mut table = [0u16; 69];
    let mut i = 0;
    while i < table.len() {
        // i * 4096 / 12 rounded to nearest; the remainder is never exactly half
        table[i] = ((i as u32 * 4096 + 6) / 12) as u16;
        i += 1;
    }
    table
};

const PITCH_KEYFOLLOW_MULT: [i32; 17] = [
    -8192, -4096, -2048, 0, 1024, 2048, 3072, 4096, 5120, 6144, 7168, 8192, 10240, 12288, 16384,
    8198, 8226,
];

const LOWER_DURATION_TO_DIVISOR: [u16; 8] = [34078, 37162, 40526, 44194, 48194, 52556, 57312, 62499];

/// Highest pitch the LA32 accepts
const MAX_PITCH: i32 = 59392;

/// Base pitch of a square wave; puts middle C at about 261.6 Hz
const SQUARE_BASE_PITCH: i32 = 37133;

/// Sawtooth output has double the square frequency, so start an octave lower
const SAWTOOTH_BASE_PITCH: i32 = 33037;

/// Samples between software timer runs
///
/// Fixed stand-in for the firmware timer, which fires about every
/// SAMPLE_RATE / 4000 = 8 samples with some jitter.
const PROCESS_PERIOD_SAMPLES: u32 = 4;

/// MCU timer ticks per process period, times 16 (500 kHz timer at 32 kHz output)
const TIMER_TICKS_PER_PROCESS_X16: u32 = 1000;

fn key_to_pitch(key: u32) -> i32 {
    let distance = (key as i32 - 60).unsigned_abs() as usize;
    let pitch = KEY_TO_PITCH_TABLE[distance.min(KEY_TO_PITCH_TABLE.len() - 1)] as i32;
    if key < 60 {
        -pitch
    } else {
        pitch
    }
}

fn coarse_to_pitch(coarse: i32) -> i32 {
    (coarse - 36) * 4096 / 12
}

fn fine_to_pitch(fine: u8) -> i32 {
    (fine as i32 - 50) * 4096 / 1200
}

/// Pitch of a note before envelope, bend and tuning
pub fn calc_base_pitch(
    param: &PartialParam,
    patch: &PatchParam,
    key: u32,
    pcm: Option<&PcmWaveEntry>,
    features: RomFeatures,
) -> u32 {
    let mut base_pitch = key_to_pitch(key);
    base_pitch = (base_pitch * PITCH_KEYFOLLOW_MULT[(param.wg.pitch_keyfollow as usize).min(16)]) >> 13;
    base_pitch += coarse_to_pitch(param.wg.pitch_coarse as i32);
    base_pitch += fine_to_pitch(param.wg.pitch_fine);
    if features.contains(RomFeatures::KEY_SHIFT) {
        // The key itself was left unshifted
        base_pitch += coarse_to_pitch(patch.key_shift as i32 + 12);
    }
    base_pitch += fine_to_pitch(patch.fine_tune);

    base_pitch += match pcm {
        Some(wave) => wave.pitch as i32,
        None if param.wg.waveform & 1 == 0 => SQUARE_BASE_PITCH,
        None => SAWTOOTH_BASE_PITCH,
    };

    if features.contains(RomFeatures::BASE_PITCH_OVERFLOW) {
        (base_pitch & 0xFFFF) as u32
    } else {
        base_pitch.clamp(0, MAX_PITCH) as u32
    }
}

fn velo_mult(velo_sensitivity: u8, velocity: u32) -> i32 {
    if velo_sensitivity == 0 {
        // About 64 semitones
        return 21845;
    }
    let reversed_velocity = 127u32.saturating_sub(velocity);
    let scaled = if velo_sensitivity > 3 {
        (reversed_velocity << 8) >> ((3i32 - velo_sensitivity as i32) & 0x1F)
    } else {
        reversed_velocity << (5 + velo_sensitivity as u32)
    };
    ((21845 * (32768i64 - scaled as i64)) >> 15) as i32
}

fn target_pitch_offset(env: &PitchEnvParam, level_index: usize, velocity: u32) -> i32 {
    let mult = velo_mult(env.velo_sensitivity, velocity);
    let offset = env.level[level_index] as i32 - 50;
    (offset * mult) >> (16 - env.depth as i32).clamp(0, 31)
}

/// Shift left until bit 31 is set, returning the shift count
fn normalise(value: &mut u32) -> u32 {
    let mut shifts = 0;
    while shifts < 31 {
        if *value & 0x8000_0000 != 0 {
            break;
        }
        *value <<= 1;
        shifts += 1;
    }
    shifts
}

/// Pitch envelope and LFO state of one partial
#[derive(Clone, Debug, Default)]
pub struct Tvp {
    env: PitchEnvParam,
    lfo: PitchLfoParam,
    bender_enabled: bool,
    apply_master_tune: bool,
    velocity: u32,
    pitch_envelope_overflow: bool,

    base_pitch: u32,
    pitch: u16,
    phase: u8,
    current_pitch_offset: i32,
    target_pitch_offset_without_lfo: i32,
    lfo_pitch_offset: i32,
    time_keyfollow_subtraction: i32,
    pitch_offset_change_per_big_tick: i16,
    target_pitch_offset_reached_big_tick: u16,
    shifts: u32,

    time_elapsed: u32,
    timer_x16: u32,
    counter: u32,
    pitch_updated: bool,
}

impl Tvp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the pitch envelope for a new note
    pub fn reset(
        &mut self,
        param: &PartialParam,
        note: NoteInfo,
        patch: &PatchParam,
        pcm: Option<&PcmWaveEntry>,
        features: RomFeatures,
    ) {
        self.env = param.pitch_env;
        self.lfo = param.pitch_lfo;
        self.bender_enabled = param.wg.pitch_bender_enabled & 1 != 0;
        self.apply_master_tune = pcm.map_or(true, |wave| !wave.unaffected_by_master_tune);
        self.velocity = note.velocity;
        self.pitch_envelope_overflow = features.contains(RomFeatures::PITCH_ENVELOPE_OVERFLOW);

        self.time_elapsed = 0;
        self.timer_x16 = 0;
        self.counter = 0;

        self.base_pitch = calc_base_pitch(param, patch, note.key, pcm, features);
        self.current_pitch_offset = target_pitch_offset(&self.env, 0, note.velocity);
        self.target_pitch_offset_without_lfo = self.current_pitch_offset;
        self.phase = 0;

        self.time_keyfollow_subtraction = if self.env.time_keyfollow != 0 {
            (note.key as i32 - 60) >> (5 - self.env.time_keyfollow as i32).clamp(0, 31)
        } else {
            0
        };
        self.lfo_pitch_offset = 0;
        self.pitch = self.base_pitch as u16;

        self.pitch_offset_change_per_big_tick = 0;
        self.target_pitch_offset_reached_big_tick = 0;
        self.shifts = 0;
        self.pitch_updated = false;
    }

    pub fn base_pitch(&self) -> u32 {
        self.base_pitch
    }

    /// Advance one sample
    ///
    /// Returns the pitch and whether it was recomputed this sample, which
    /// is when a sustaining TVA refreshes its target.
    pub fn next_pitch(&mut self, ctx: &EnvelopeContext) -> (u16, bool) {
        self.pitch_updated = false;
        if self.counter == 0 {
            self.timer_x16 += TIMER_TICKS_PER_PROCESS_X16;
            self.time_elapsed = (self.time_elapsed + (self.timer_x16 >> 4)) & 0x00FF_FFFF;
            self.timer_x16 &= 15;
            self.counter = PROCESS_PERIOD_SAMPLES;
            self.process(ctx);
        }
        self.counter -= 1;
        (self.pitch, self.pitch_updated)
    }

    /// Enter the release segment of the envelope
    pub fn start_decay(&mut self) {
        self.phase = 5;
        self.lfo_pitch_offset = 0;
        self.target_pitch_offset_reached_big_tick = (self.time_elapsed >> 8) as u16;
    }

    fn update_pitch(&mut self, ctx: &EnvelopeContext) {
        let mut new_pitch = self.base_pitch as i32 + self.current_pitch_offset;
        if self.apply_master_tune {
            new_pitch += ctx.master_tune_pitch_delta;
        }
        if self.bender_enabled {
            new_pitch += ctx.pitch_bend;
        }

        if self.pitch_envelope_overflow {
            new_pitch &= 0xFFFF;
        } else {
            new_pitch = new_pitch.clamp(0, MAX_PITCH);
        }
        self.pitch = new_pitch as u16;
        self.pitch_updated = true;
    }

    fn target_pitch_offset_reached(&mut self, ctx: &EnvelopeContext) {
        self.current_pitch_offset = self.target_pitch_offset_without_lfo + self.lfo_pitch_offset;

        match self.phase {
            3 | 4 => {
                let mut new_lfo_pitch_offset =
                    (ctx.modulation as i32 * self.lfo.mod_sensitivity as i32) >> 7;
                new_lfo_pitch_offset = (new_lfo_pitch_offset + self.lfo.depth as i32) << 1;
                if self.pitch_offset_change_per_big_tick > 0 {
                    // Swing back the other way
                    new_lfo_pitch_offset = -new_lfo_pitch_offset;
                }
                self.lfo_pitch_offset = new_lfo_pitch_offset;
                let target = self.target_pitch_offset_without_lfo + self.lfo_pitch_offset;
                self.setup_pitch_change(target, 101u8.saturating_sub(self.lfo.rate));
                self.update_pitch(ctx);
            }
            6 => self.update_pitch(ctx),
            _ => self.next_phase(ctx),
        }
    }

    fn next_phase(&mut self, ctx: &EnvelopeContext) {
        self.phase += 1;
        let env_index = if self.phase == 6 { 4 } else { self.phase as usize };

        self.target_pitch_offset_without_lfo = target_pitch_offset(&self.env, env_index, self.velocity);

        let change_duration =
            self.env.time[env_index - 1] as i32 - self.time_keyfollow_subtraction;
        if change_duration > 0 {
            self.setup_pitch_change(self.target_pitch_offset_without_lfo, change_duration.min(255) as u8);
            self.update_pitch(ctx);
        } else {
            self.target_pitch_offset_reached(ctx);
        }
    }

    fn setup_pitch_change(&mut self, target_pitch_offset: i32, change_duration: u8) {
        let negative_delta = target_pitch_offset < self.current_pitch_offset;
        let mut pitch_offset_delta = target_pitch_offset - self.current_pitch_offset;
        if !(-32768..=32767).contains(&pitch_offset_delta) {
            pitch_offset_delta = 32767;
        }
        if negative_delta {
            pitch_offset_delta = -pitch_offset_delta;
        }

        // Keep as many significant bits as possible for the per-tick change
        let mut abs_pitch_offset_delta = (pitch_offset_delta as u32) << 16;
        let normalisation_shifts = normalise(&mut abs_pitch_offset_delta);
        abs_pitch_offset_delta >>= 1;

        let change_duration = change_duration.saturating_sub(1) as u32;
        let upper_duration = change_duration >> 3;
        self.shifts = normalisation_shifts + upper_duration + 2;
        let divisor = LOWER_DURATION_TO_DIVISOR[(change_duration & 7) as usize] as u32;
        let mut change_per_big_tick = (((abs_pitch_offset_delta & 0xFFFF_0000) / divisor) >> 1) as i16;
        if negative_delta {
            change_per_big_tick = -change_per_big_tick;
        }
        self.pitch_offset_change_per_big_tick = change_per_big_tick;

        let current_big_tick = (self.time_elapsed >> 8) as u16;
        let duration_in_big_ticks = (divisor >> (12u32.saturating_sub(upper_duration))).min(32767);
        self.target_pitch_offset_reached_big_tick =
            current_big_tick.wrapping_add(duration_in_big_ticks as u16);
    }

    fn process(&mut self, ctx: &EnvelopeContext) {
        if self.phase == 0 {
            self.target_pitch_offset_reached(ctx);
            return;
        }
        if self.phase == 5 {
            self.next_phase(ctx);
            return;
        }
        if self.phase > 7 {
            self.update_pitch(ctx);
            return;
        }

        let mut negative_big_ticks_remaining = ((self.time_elapsed >> 8) as u16)
            .wrapping_sub(self.target_pitch_offset_reached_big_tick)
            as i16 as i32;
        if negative_big_ticks_remaining >= 0 {
            self.target_pitch_offset_reached(ctx);
            return;
        }

        // Shift amounts use only the low 5 bits, as on the MCU
        let mut right_shifts = self.shifts;
        if right_shifts > 13 {
            right_shifts -= 13;
            negative_big_ticks_remaining >>= right_shifts & 0x1F;
            right_shifts = 13;
        }
        let mut new_result = (negative_big_ticks_remaining
            * self.pitch_offset_change_per_big_tick as i32)
            >> (right_shifts & 0x1F);
        new_result += self.target_pitch_offset_without_lfo + self.lfo_pitch_offset;
        self.current_pitch_offset = new_result;
        self.update_pitch(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_partial() -> PartialParam {
        let mut param = PartialParam::default();
        param.wg.pitch_coarse = 36;
        param.wg.pitch_fine = 50;
        param.wg.pitch_keyfollow = 11;
        param.pitch_env.level = [50; 5];
        param
    }

    fn neutral_patch() -> PatchParam {
        PatchParam {
            key_shift: 24,
            fine_tune: 50,
            bender_range: 12,
            ..Default::default()
        }
    }

    fn note(key: u32) -> NoteInfo {
        NoteInfo {
            key,
            velocity: 100,
            can_sustain: true,
        }
    }

    #[test]
    fn test_key_to_pitch_table() {
        assert_eq!(key_to_pitch(60), 0);
        assert_eq!(key_to_pitch(61), 341);
        assert_eq!(key_to_pitch(72), 4096);
        assert_eq!(key_to_pitch(48), -4096);
        assert_eq!(KEY_TO_PITCH_TABLE[68], 23211);
    }

    #[test]
    fn test_middle_c_square_base_pitch() {
        let pitch = calc_base_pitch(
            &square_partial(),
            &neutral_patch(),
            60,
            None,
            RomFeatures::empty(),
        );
        assert_eq!(pitch, 37133);
    }

    #[test]
    fn test_sawtooth_is_an_octave_lower() {
        let mut param = square_partial();
        param.wg.waveform = 1;
        let pitch = calc_base_pitch(&param, &neutral_patch(), 60, None, RomFeatures::empty());
        assert_eq!(pitch, 37133 - 4096);
    }

    #[test]
    fn test_base_pitch_clamps_or_wraps() {
        let mut param = square_partial();
        param.wg.pitch_coarse = 96;
        let clamped = calc_base_pitch(&param, &neutral_patch(), 108, None, RomFeatures::empty());
        assert_eq!(clamped, MAX_PITCH as u32);
        let wrapped = calc_base_pitch(
            &param,
            &neutral_patch(),
            108,
            None,
            RomFeatures::BASE_PITCH_OVERFLOW,
        );
        assert!(wrapped < 0x10000);
        assert_ne!(wrapped, MAX_PITCH as u32);
    }

    #[test]
    fn test_flat_envelope_holds_base_pitch() {
        let mut tvp = Tvp::new();
        tvp.reset(&square_partial(), note(60), &neutral_patch(), None, RomFeatures::empty());
        let ctx = EnvelopeContext::default();
        for _ in 0..10_000 {
            let (pitch, _) = tvp.next_pitch(&ctx);
            assert_eq!(pitch, 37133);
        }
    }

    #[test]
    fn test_bend_applies_only_when_enabled() {
        let ctx = EnvelopeContext {
            pitch_bend: 4096,
            ..Default::default()
        };
        let mut param = square_partial();
        let mut tvp = Tvp::new();
        tvp.reset(&param, note(60), &neutral_patch(), None, RomFeatures::empty());
        let mut pitch = 0;
        for _ in 0..100 {
            pitch = tvp.next_pitch(&ctx).0;
        }
        assert_eq!(pitch, 37133);

        param.wg.pitch_bender_enabled = 1;
        tvp.reset(&param, note(60), &neutral_patch(), None, RomFeatures::empty());
        for _ in 0..100 {
            pitch = tvp.next_pitch(&ctx).0;
        }
        assert_eq!(pitch, 37133 + 4096);
    }

    #[test]
    fn test_envelope_moves_towards_level() {
        let mut param = square_partial();
        param.pitch_env.depth = 10;
        param.pitch_env.level = [50, 100, 100, 100, 50];
        param.pitch_env.time = [30, 30, 30, 30];
        let mut tvp = Tvp::new();
        tvp.reset(&param, note(60), &neutral_patch(), None, RomFeatures::empty());
        let ctx = EnvelopeContext::default();
        let mut highest = 0;
        for _ in 0..200_000 {
            highest = highest.max(tvp.next_pitch(&ctx).0);
        }
        assert!(highest > 37133 + 2048, "pitch peaked at {highest}");
    }

    #[test]
    fn test_velocity_multiplier() {
        assert_eq!(velo_mult(0, 1), 21845);
        assert_eq!(velo_mult(1, 127), 21845);
        assert!(velo_mult(3, 0) < velo_mult(1, 0));
    }
}
