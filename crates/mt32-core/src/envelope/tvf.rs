//! Time variant filter
//!
//! The base cutoff is fixed when the note starts; the envelope then drives
//! a ramp whose value is added on top of it.

use super::{key_time_subtraction, NoteInfo};
use crate::la32::Ramp;
use crate::params::{PartialParam, TvfParam};
use crate::tables::Tables;

const BIAS_LEVEL_TO_BIAS_MULT: [i8; 15] = [85, 42, 21, 16, 10, 5, 2, 0, -2, -5, -10, -16, -21, -74, -85];

/// Keyfollow settings scaled by 21: -1, -1/2, -1/4, 0, 1/8, 1/4, 3/8, 1/2, 5/8, 3/4, 7/8, 1, 5/4, 3/2, 2, s1, s2
const KEYFOLLOW_MULT_21: [i8; 17] = [-21, -10, -5, 0, 2, 5, 8, 10, 13, 16, 18, 21, 26, 32, 42, 21, 21];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TvfPhase {
    #[default]
    Attack,
    Phase2,
    Phase3,
    Phase4,
    Sustain,
    Release,
    Done,
}

impl TvfPhase {
    fn next(self) -> Self {
        match self {
            TvfPhase::Attack => TvfPhase::Phase2,
            TvfPhase::Phase2 => TvfPhase::Phase3,
            TvfPhase::Phase3 => TvfPhase::Phase4,
            TvfPhase::Phase4 => TvfPhase::Sustain,
            TvfPhase::Sustain => TvfPhase::Release,
            TvfPhase::Release | TvfPhase::Done => TvfPhase::Done,
        }
    }

    /// Envelope point used when leaving this phase
    fn env_point_index(self) -> usize {
        match self {
            TvfPhase::Attack => 1,
            TvfPhase::Phase2 => 2,
            _ => 3,
        }
    }
}

/// Cutoff of a note before the envelope, 0-255
pub fn calc_base_cutoff(param: &PartialParam, base_pitch: u32, key: u32, cutoff_limit_quirk: bool) -> u8 {
    let tvf = &param.tvf;
    let key = key as i32;
    let keyfollow = |index: u8| KEYFOLLOW_MULT_21[(index as usize).min(16)] as i32;
    let bias_mult = BIAS_LEVEL_TO_BIAS_MULT[(tvf.bias_level as usize).min(14)] as i32;

    let mut base_cutoff = keyfollow(tvf.keyfollow) - keyfollow(param.wg.pitch_keyfollow);
    base_cutoff *= key - 60;

    let bias_point = tvf.bias_point as i32;
    if bias_point & 0x40 == 0 {
        let bias = bias_point + 33 - key;
        if bias > 0 {
            base_cutoff += -bias * bias_mult;
        }
    } else {
        let bias = bias_point - 31 - key;
        if bias < 0 {
            base_cutoff += bias * bias_mult;
        }
    }

    base_cutoff += ((tvf.cutoff as i32) << 4) - 800;
    if base_cutoff >= 0 {
        let pitch_delta = (base_pitch >> 4) as i32 + base_cutoff - 3584;
        if pitch_delta > 0 {
            base_cutoff -= pitch_delta;
        }
    } else if cutoff_limit_quirk {
        if base_cutoff <= -0x400 {
            base_cutoff = -400;
        }
    } else if base_cutoff < -2048 {
        base_cutoff = -2048;
    }
    base_cutoff += 2056;
    base_cutoff >>= 4;
    base_cutoff.clamp(0, 255) as u8
}

/// Filter envelope state of one partial
#[derive(Clone, Debug, Default)]
pub struct Tvf {
    ramp: Ramp,
    param: TvfParam,
    note: NoteInfo,
    base_cutoff: u8,
    level_mult: i32,
    key_time_subtraction: i32,
    target: i32,
    phase: TvfPhase,
}

impl Tvf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, param: &PartialParam, note: NoteInfo, base_pitch: u32, cutoff_limit_quirk: bool) {
        let tables = Tables::get();
        self.param = param.tvf;
        self.note = note;
        self.base_cutoff = calc_base_cutoff(param, base_pitch, note.key, cutoff_limit_quirk);

        let sensitivity = self.param.env_velo_sensitivity as i32;
        let mut level_mult = (note.velocity as i32 * sensitivity) >> 6;
        level_mult += 109 - sensitivity;
        level_mult += (note.key as i32 - 60) >> (4 - self.param.env_depth_keyfollow as i32).clamp(0, 31);
        level_mult = level_mult.max(0);
        level_mult *= self.param.env_depth as i32;
        level_mult >>= 6;
        self.level_mult = level_mult.min(255);

        self.key_time_subtraction = key_time_subtraction(self.param.env_time_keyfollow, note.key);

        let new_target = (self.param.env_level[0] as i32 * self.level_mult) >> 8;
        let env_time_setting = self.param.env_time[0] as i32 - self.key_time_subtraction;
        let increment = if env_time_setting <= 0 {
            0x80 | 127
        } else {
            let increment = tables.env_logarithmic_time[new_target as usize] as i32 - env_time_setting;
            increment.max(1)
        };
        self.ramp.reset();
        self.start_ramp(new_target, increment as u8, TvfPhase::Attack);
    }

    /// Advance one sample and return the cutoff scaled by 2^18
    pub fn next_cutoff(&mut self) -> u32 {
        let value = self.ramp.next_value();
        if self.ramp.check_interrupt() {
            self.next_phase();
        }
        ((self.base_cutoff as u32) << 18) + value
    }

    pub fn start_decay(&mut self) {
        if self.phase >= TvfPhase::Release {
            return;
        }
        let increment = match self.param.env_time[4] {
            0 => 1,
            time => time.wrapping_neg(),
        };
        self.start_ramp(0, increment, TvfPhase::Release);
    }

    pub fn base_cutoff(&self) -> u8 {
        self.base_cutoff
    }

    pub fn phase(&self) -> TvfPhase {
        self.phase
    }

    fn start_ramp(&mut self, new_target: i32, increment: u8, phase: TvfPhase) {
        self.target = new_target;
        self.phase = phase;
        self.ramp.start_ramp(new_target.clamp(0, 255) as u8, increment);
    }

    fn next_phase(&mut self) {
        let tables = Tables::get();
        let new_phase = self.phase.next();

        match new_phase {
            TvfPhase::Done => {
                self.start_ramp(0, 0, new_phase);
                return;
            }
            TvfPhase::Sustain | TvfPhase::Release => {
                if !self.note.can_sustain {
                    self.phase = new_phase;
                    self.start_decay();
                    return;
                }
                let level = (self.param.env_level[3] as i32 * self.level_mult) >> 8;
                self.start_ramp(level, 0, new_phase);
                return;
            }
            _ => {}
        }

        let env_point_index = self.phase.env_point_index();
        let env_time_setting = self.param.env_time[env_point_index] as i32 - self.key_time_subtraction;
        let mut new_target = (self.param.env_level[env_point_index] as i32 * self.level_mult) >> 8;

        let increment = if env_time_setting > 0 {
            let mut target_delta = new_target - self.target;
            if target_delta == 0 {
                if new_target == 0 {
                    target_delta = 1;
                    new_target = 1;
                } else {
                    target_delta = -1;
                    new_target -= 1;
                }
            }
            let mut increment = tables.env_logarithmic_time[(target_delta.unsigned_abs() as usize).min(255)]
                as i32
                - env_time_setting;
            if increment <= 0 {
                increment = 1;
            }
            if target_delta < 0 {
                increment |= 0x80;
            }
            increment
        } else if new_target >= self.target {
            0x80 | 127
        } else {
            127
        };
        self.start_ramp(new_target, increment as u8, new_phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param() -> PartialParam {
        let mut param = PartialParam::default();
        param.wg.pitch_keyfollow = 11;
        param.tvf.cutoff = 100;
        param.tvf.keyfollow = 11;
        param.tvf.bias_point = 64;
        param.tvf.bias_level = 7;
        param
    }

    fn note(can_sustain: bool) -> NoteInfo {
        NoteInfo {
            key: 60,
            velocity: 100,
            can_sustain,
        }
    }

    #[test]
    fn test_base_cutoff_for_open_filter() {
        assert_eq!(calc_base_cutoff(&param(), 37133, 60, false), 178);
    }

    #[test]
    fn test_low_cutoff_is_floored() {
        let mut p = param();
        p.tvf.cutoff = 0;
        p.tvf.bias_level = 0;
        p.tvf.bias_point = 0;
        // Well below the bias point: -800 - 21 * 85 is floored to -2048, or to -400 with the quirk
        assert_eq!(calc_base_cutoff(&p, 37133, 12, false), 0);
        assert_eq!(calc_base_cutoff(&p, 37133, 12, true), 103);
    }

    #[test]
    fn test_zero_depth_keeps_base_cutoff() {
        let mut tvf = Tvf::new();
        tvf.reset(&param(), note(true), 37133, false);
        for _ in 0..10_000 {
            assert_eq!(tvf.next_cutoff(), 178 << 18);
        }
    }

    #[test]
    fn test_envelope_reaches_sustain() {
        let mut p = param();
        p.tvf.env_depth = 100;
        p.tvf.env_level = [100, 50, 80, 60];
        p.tvf.env_time = [10, 10, 10, 10, 10];
        let mut tvf = Tvf::new();
        tvf.reset(&p, note(true), 37133, false);
        for _ in 0..2_000_000 {
            tvf.next_cutoff();
        }
        assert_eq!(tvf.phase(), TvfPhase::Sustain);

        tvf.start_decay();
        for _ in 0..2_000_000 {
            tvf.next_cutoff();
        }
        assert_eq!(tvf.phase(), TvfPhase::Done);
        assert_eq!(tvf.next_cutoff(), 178 << 18);
    }
}
