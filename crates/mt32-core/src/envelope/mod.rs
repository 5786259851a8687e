//! Envelope controllers
//!
//! The TVA (amplitude), TVP (pitch) and TVF (filter) controllers model the
//! firmware side of a partial. TVA and TVF program a [`Ramp`](crate::la32::Ramp)
//! and advance a phase each time its deferred interrupt fires; TVP runs off
//! a software timer and computes pitch directly.

pub mod tva;
pub mod tvf;
pub mod tvp;

pub use tva::{Tva, TvaPhase};
pub use tvf::{Tvf, TvfPhase};
pub use tvp::Tvp;

use crate::rom::RomFeatures;

/// Note attributes fixed for the lifetime of a partial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NoteInfo {
    /// Internal key after key shift folding (60 is middle C)
    pub key: u32,
    pub velocity: u32,
    /// Whether the timbre sustains; non-sustaining notes decay from phase 4
    pub can_sustain: bool,
}

/// Part and system state an envelope may read while running
///
/// Rebuilt by the synth before each rendered run, so controller changes
/// reach sounding notes at the next phase change or sustain refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeContext {
    /// System master volume, 0-100
    pub master_volume: u8,
    /// Part output level, 0-100
    pub part_volume: u8,
    /// Part expression, 0-100
    pub expression: u8,
    /// Output level of the rhythm key, for rhythm partials
    pub rhythm_output_level: Option<u8>,
    /// Modulation wheel, 0-127
    pub modulation: u8,
    /// Current pitch bend in 1/4096 octave units
    pub pitch_bend: i32,
    /// Master tune offset in 1/4096 octave units
    pub master_tune_pitch_delta: i32,
    pub features: RomFeatures,
    /// Correct the ramp direction when sustain levels move across the current value
    pub nice_amp_ramp: bool,
}

impl Default for EnvelopeContext {
    fn default() -> Self {
        Self {
            master_volume: 100,
            part_volume: 100,
            expression: 100,
            rhythm_output_level: None,
            modulation: 0,
            pitch_bend: 0,
            master_tune_pitch_delta: 0,
            features: RomFeatures::empty(),
            nice_amp_ramp: true,
        }
    }
}

/// Envelope time reduction for higher keys
pub(crate) fn key_time_subtraction(time_keyfollow: u8, key: u32) -> i32 {
    if time_keyfollow == 0 {
        return 0;
    }
    (key as i32 - 60) >> (5 - time_keyfollow as i32).clamp(0, 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_time_subtraction() {
        assert_eq!(key_time_subtraction(0, 100), 0);
        assert_eq!(key_time_subtraction(4, 70), 5);
        assert_eq!(key_time_subtraction(1, 28), -2);
    }
}
