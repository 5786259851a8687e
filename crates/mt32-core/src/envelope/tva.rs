//! Time variant amplifier
//!
//! Drives the amplitude ramp of a partial. Targets combine the TVA level,
//! velocity, key bias and the part and system volumes; the envelope times
//! are converted to ramp increments through the logarithmic time table.

use super::{key_time_subtraction, EnvelopeContext, NoteInfo};
use crate::la32::Ramp;
use crate::params::{PartialParam, TvaParam};
use crate::tables::Tables;

const BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF: [u8; 13] =
    [255, 187, 137, 100, 74, 54, 40, 29, 21, 15, 10, 5, 0];

/// Ramp value that maps to the quietest amp
const AMP_CEILING: u32 = 67_117_056;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TvaPhase {
    /// Ramping to the level set by volumes alone
    #[default]
    Basic,
    Attack,
    Phase2,
    Phase3,
    Phase4,
    Sustain,
    Release,
    Dead,
}

impl TvaPhase {
    fn index(self) -> usize {
        self as usize
    }

    fn next(self) -> Self {
        match self {
            TvaPhase::Basic => TvaPhase::Attack,
            TvaPhase::Attack => TvaPhase::Phase2,
            TvaPhase::Phase2 => TvaPhase::Phase3,
            TvaPhase::Phase3 => TvaPhase::Phase4,
            TvaPhase::Phase4 => TvaPhase::Sustain,
            TvaPhase::Sustain => TvaPhase::Release,
            TvaPhase::Release | TvaPhase::Dead => TvaPhase::Dead,
        }
    }
}

fn bias_amp_subtraction(bias_point: u8, bias_level: u8, key: u32) -> i32 {
    let coeff = BIAS_LEVEL_TO_AMP_SUBTRACTION_COEFF[(bias_level as usize).min(12)] as i32;
    let key = key as i32;
    if bias_point & 0x40 == 0 {
        let bias = bias_point as i32 + 33 - key;
        if bias > 0 {
            return (bias * coeff) >> 5;
        }
    } else {
        let bias = bias_point as i32 - 31 - key;
        if bias < 0 {
            return (-bias * coeff) >> 5;
        }
    }
    0
}

fn bias_amp_subtractions(param: &TvaParam, key: u32) -> i32 {
    let first = bias_amp_subtraction(param.bias_point_1, param.bias_level_1, key);
    if first > 255 {
        return 255;
    }
    let second = bias_amp_subtraction(param.bias_point_2, param.bias_level_2, key);
    (first + second).min(255)
}

fn velo_amp_subtraction(velo_sensitivity: u8, velocity: u32) -> i32 {
    let velocity_mult = velo_sensitivity as i32 - 50;
    let abs_velocity_mult = velocity_mult.abs();
    let scaled = ((velocity_mult * (velocity as i32 - 64)) as u32) << 2;
    abs_velocity_mult - ((scaled as i32) >> 8)
}

/// Amplitude envelope state of one partial
#[derive(Clone, Debug, Default)]
pub struct Tva {
    ramp: Ramp,
    param: TvaParam,
    resonance: u8,
    note: NoteInfo,
    ignore_volumes: bool,

    playing: bool,
    phase: TvaPhase,
    target: i32,
    key_time_subtraction: i32,
    bias_amp_subtraction: i32,
    velo_amp_subtraction: i32,
}

impl Tva {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the envelope for a new note
    ///
    /// `ignore_volumes` skips master, part, expression and rhythm volume, as
    /// older ROMs do for ring modulated partials without mix.
    pub fn reset(
        &mut self,
        param: &PartialParam,
        note: NoteInfo,
        ignore_volumes: bool,
        ctx: &EnvelopeContext,
    ) {
        self.param = param.tva;
        self.resonance = param.tvf.resonance;
        self.note = note;
        self.ignore_volumes = ignore_volumes;
        self.playing = true;

        self.key_time_subtraction = key_time_subtraction(self.param.env_time_keyfollow, note.key);
        self.bias_amp_subtraction = bias_amp_subtractions(&self.param, note.key);
        self.velo_amp_subtraction = velo_amp_subtraction(self.param.velo_sensitivity, note.velocity);

        let mut new_target = self.basic_amp(ctx);
        let new_phase = if self.param.env_time[0] == 0 {
            // Jump straight to the attack level; velocity never affects time here
            new_target += self.param.env_level[0] as i32;
            TvaPhase::Attack
        } else {
            TvaPhase::Basic
        };

        self.ramp.reset();
        // The ramp sits at zero, so a fast descent jumps to the target and interrupts
        self.start_ramp(new_target, 0x80 | 127, new_phase);
    }

    /// Advance one sample and return the attenuation for the wave generator
    pub fn next_amp(&mut self, ctx: &EnvelopeContext) -> u32 {
        let value = AMP_CEILING - self.ramp.next_value();
        if self.ramp.check_interrupt() {
            self.next_phase(ctx);
        }
        value
    }

    /// Quickly fade out to free the partial for another note
    pub fn start_abort(&mut self) {
        self.start_ramp(64, 0x80 | 127, TvaPhase::Release);
    }

    /// Enter release
    pub fn start_decay(&mut self) {
        if self.phase >= TvaPhase::Release {
            return;
        }
        let increment = match self.param.env_time[4] {
            // Zero would freeze the ramp and the release would never finish
            0 => 1,
            time => time.wrapping_neg(),
        };
        self.start_ramp(0, increment, TvaPhase::Release);
    }

    /// Re-target a sustaining note after volume or expression changes
    pub fn recalc_sustain(&mut self, ctx: &EnvelopeContext) {
        if self.phase != TvaPhase::Sustain || self.param.env_level[3] == 0 {
            return;
        }
        let tables = Tables::get();
        let new_target = self.basic_amp(ctx) + self.param.env_level[3] as i32;

        let target_delta = new_target - self.target;
        let descending = target_delta < 0;
        let log_time = tables.env_logarithmic_time[(target_delta.unsigned_abs() as usize).min(255)];
        let mut increment = log_time.wrapping_sub(2);
        if descending {
            increment |= 0x80;
        }
        if ctx.nice_amp_ramp && descending != self.ramp.is_below_current(new_target.clamp(0, 255) as u8) {
            // The previous ramp may still be moving; avoid a jump in the wrong direction
            increment ^= 0x80;
        }
        // Once this ramp completes the next phase is sustain again
        self.start_ramp(new_target, increment, TvaPhase::Phase4);
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn phase(&self) -> TvaPhase {
        self.phase
    }

    fn start_ramp(&mut self, new_target: i32, increment: u8, phase: TvaPhase) {
        self.target = new_target;
        self.phase = phase;
        self.ramp.start_ramp(new_target.clamp(0, 255) as u8, increment);
    }

    fn end(&mut self, phase: TvaPhase) {
        self.phase = phase;
        self.playing = false;
    }

    fn basic_amp(&self, ctx: &EnvelopeContext) -> i32 {
        let tables = Tables::get();
        let level = |value: u8| tables.level_to_amp_subtraction[(value as usize).min(100)] as i32;

        let mut amp = 155i32;
        if !self.ignore_volumes {
            amp -= tables.master_vol_to_amp_subtraction[(ctx.master_volume as usize).min(100)] as i32;
            if amp < 0 {
                return 0;
            }
            amp -= level(ctx.part_volume);
            if amp < 0 {
                return 0;
            }
            amp -= level(ctx.expression);
            if amp < 0 {
                return 0;
            }
            if let Some(output_level) = ctx.rhythm_output_level {
                amp -= level(output_level);
                if amp < 0 {
                    return 0;
                }
            }
        }

        amp -= self.bias_amp_subtraction;
        if amp < 0 {
            return 0;
        }
        amp -= level(self.param.level);
        if amp < 0 {
            return 0;
        }
        amp -= self.velo_amp_subtraction;
        if amp < 0 {
            return 0;
        }
        amp = amp.min(155);
        amp -= (self.resonance >> 1) as i32;
        amp.max(0)
    }

    fn all_levels_zero_from(&self, phase: TvaPhase) -> bool {
        let levels = &self.param.env_level;
        if levels[3] != 0 {
            return false;
        }
        if phase == TvaPhase::Phase4 {
            return true;
        }
        if levels[2] != 0 {
            return false;
        }
        if phase == TvaPhase::Phase3 {
            return true;
        }
        if levels[1] != 0 {
            return false;
        }
        if phase == TvaPhase::Phase2 {
            return true;
        }
        levels[0] == 0 && phase == TvaPhase::Attack
    }

    fn next_phase(&mut self, ctx: &EnvelopeContext) {
        if self.phase >= TvaPhase::Dead || !self.playing {
            log::warn!("TVA interrupt in phase {:?} while not playing", self.phase);
            return;
        }
        let tables = Tables::get();
        let mut new_phase = self.phase.next();
        if new_phase == TvaPhase::Dead {
            self.end(new_phase);
            return;
        }

        let all_levels_zero = self.all_levels_zero_from(new_phase);
        let env_point_index = self.phase.index();
        let mut new_target;
        let mut new_increment: i32 = 0;

        if !all_levels_zero {
            new_target = self.basic_amp(ctx);
            if new_phase == TvaPhase::Sustain || new_phase == TvaPhase::Release {
                if self.param.env_level[3] == 0 {
                    self.end(new_phase);
                    return;
                }
                if !self.note.can_sustain {
                    new_phase = TvaPhase::Release;
                    new_target = 0;
                    new_increment = -(self.param.env_time[4] as i32);
                    if new_increment == 0 {
                        // Rise immediately so the release interrupt still fires
                        new_increment = 1;
                    }
                } else {
                    new_target += self.param.env_level[3] as i32;
                }
            } else {
                new_target += self.param.env_level[env_point_index.min(3)] as i32;
            }
        } else {
            new_target = 0;
        }

        if (new_phase != TvaPhase::Sustain && new_phase != TvaPhase::Release) || all_levels_zero {
            let mut env_time_setting = self.param.env_time[env_point_index.min(4)] as i32;
            if new_phase == TvaPhase::Attack {
                let shift = (6 - self.param.env_time_velo_sensitivity as i32).clamp(0, 31);
                env_time_setting -= (self.note.velocity as i32 - 64) >> shift;
                if env_time_setting <= 0 && self.param.env_time[env_point_index] != 0 {
                    env_time_setting = 1;
                }
            } else {
                env_time_setting -= self.key_time_subtraction;
            }

            if env_time_setting > 0 {
                let mut target_delta = new_target - self.target;
                if target_delta <= 0 {
                    if target_delta == 0 {
                        // Fake a small descent so the ramp still completes
                        target_delta = -1;
                        new_target -= 1;
                        if new_target < 0 {
                            target_delta = 1;
                            new_target = -new_target;
                        }
                    }
                    target_delta = -target_delta;
                    new_increment = tables.env_logarithmic_time[(target_delta as usize).min(255)]
                        as i32
                        - env_time_setting;
                    if new_increment <= 0 {
                        new_increment = 1;
                    }
                    new_increment |= 0x80;
                } else {
                    new_increment = tables.env_logarithmic_time[(target_delta as usize).min(255)]
                        as i32
                        - env_time_setting;
                    if new_increment <= 0 {
                        new_increment = 1;
                    }
                }
            } else {
                new_increment = if new_target >= self.target {
                    0x80 | 127
                } else {
                    127
                };
            }

            if new_increment == 0 {
                new_increment = 1;
            }
        }

        self.start_ramp(new_target, new_increment as u8, new_phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(levels: [u8; 4], times: [u8; 5]) -> PartialParam {
        let mut param = PartialParam::default();
        param.tva.level = 100;
        param.tva.velo_sensitivity = 50;
        param.tva.bias_level_1 = 12;
        param.tva.bias_level_2 = 12;
        param.tva.env_level = levels;
        param.tva.env_time = times;
        param
    }

    fn note(can_sustain: bool) -> NoteInfo {
        NoteInfo {
            key: 60,
            velocity: 100,
            can_sustain,
        }
    }

    /// Runs until the envelope stops, returning the sample count
    fn run_until_dead(tva: &mut Tva, ctx: &EnvelopeContext, limit: usize) -> Option<usize> {
        for n in 0..limit {
            tva.next_amp(ctx);
            if !tva.is_playing() {
                return Some(n);
            }
        }
        None
    }

    #[test]
    fn test_velocity_subtraction() {
        assert_eq!(velo_amp_subtraction(50, 127), 0);
        assert_eq!(velo_amp_subtraction(100, 127), 50 - ((50 * 63 * 4) >> 8));
        assert!(velo_amp_subtraction(100, 1) > velo_amp_subtraction(100, 127));
    }

    #[test]
    fn test_bias_below_point() {
        // Bias point 0x40 + 40: keys above 73 are attenuated
        assert_eq!(bias_amp_subtraction(0x40 | 40, 12, 100), 0);
        assert!(bias_amp_subtraction(0x40 | 40, 0, 100) > 0);
        assert_eq!(bias_amp_subtraction(0x40 | 40, 0, 5), 0);
    }

    #[test]
    fn test_all_zero_levels_die() {
        let mut tva = Tva::new();
        let ctx = EnvelopeContext::default();
        tva.reset(&partial([0; 4], [10; 5]), note(true), false, &ctx);
        assert!(run_until_dead(&mut tva, &ctx, 1_000_000).is_some());
    }

    #[test]
    fn test_sustains_until_decay() {
        let mut tva = Tva::new();
        let ctx = EnvelopeContext::default();
        tva.reset(&partial([100, 100, 100, 100], [0, 0, 0, 0, 0]), note(true), false, &ctx);
        for _ in 0..100_000 {
            tva.next_amp(&ctx);
        }
        assert_eq!(tva.phase(), TvaPhase::Sustain);
        assert!(tva.is_playing());

        tva.start_decay();
        assert_eq!(tva.phase(), TvaPhase::Release);
        // Zero release time still terminates
        assert!(run_until_dead(&mut tva, &ctx, 1_000_000).is_some());
    }

    #[test]
    fn test_non_sustaining_note_releases_itself() {
        let mut tva = Tva::new();
        let ctx = EnvelopeContext::default();
        tva.reset(&partial([100, 100, 100, 100], [0, 0, 0, 0, 20]), note(false), false, &ctx);
        assert!(run_until_dead(&mut tva, &ctx, 10_000_000).is_some());
    }

    #[test]
    fn test_louder_parts_have_lower_attenuation() {
        let param = partial([100, 100, 100, 100], [0; 5]);
        let amp_at = |volume: u8| {
            let ctx = EnvelopeContext {
                part_volume: volume,
                ..Default::default()
            };
            let mut tva = Tva::new();
            tva.reset(&param, note(true), false, &ctx);
            let mut amp = 0;
            for _ in 0..10_000 {
                amp = tva.next_amp(&ctx);
            }
            amp
        };
        assert!(amp_at(100) < amp_at(40));
    }
}
