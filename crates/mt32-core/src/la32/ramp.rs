//! LA32 ramp generator
//!
//! Every envelope in a partial is driven by one of these. The ramp moves a
//! fixed-point value towards an 8-bit target at an exponentially decoded
//! speed and, once the target is reached, raises an "interrupt" that the
//! controlling envelope uses to advance to its next phase.

use crate::tables::Tables;

/// Fixed-point scale of a target unit
pub const TARGET_SHIFTS: u32 = 18;

/// Largest value the ramp can hold
pub const MAX_CURRENT: u32 = 0xFF << TARGET_SHIFTS;

/// Samples between reaching the target and raising the interrupt
///
/// The completion interrupt is handled asynchronously by the MCU on real
/// hardware; captures show the phase change landing about 7 samples late.
pub const INTERRUPT_TIME: u32 = 7;

/// Hardware ramp with deferred target-reached interrupt
#[derive(Clone, Debug, Default)]
pub struct Ramp {
    current: u32,
    large_target: u32,
    large_increment: u32,
    descending: bool,
    interrupt_countdown: u32,
    interrupt_raised: bool,
}

impl Ramp {
    /// Create a ramp resting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Start moving towards `target`
    ///
    /// `increment` packs a 7-bit speed code with the direction in bit 7. The
    /// speed is exponential in the code; code 0 freezes the ramp.
    pub fn start_ramp(&mut self, target: u8, increment: u8) {
        if increment == 0 {
            self.large_increment = 0;
        } else {
            // Three fractional bits in the exponent; no interpolation needed
            let exp_arg = (increment & 0x7F) as u32;
            let tables = Tables::get();
            let mut large = 8191 - tables.exp9[(!(exp_arg << 6) & 511) as usize] as u32;
            large <<= exp_arg >> 3;
            large += 64;
            large >>= 9;
            self.large_increment = large;
        }
        self.descending = (increment & 0x80) != 0;
        if self.descending {
            // Descending ramps measure slightly faster on hardware
            self.large_increment += 1;
        }

        self.large_target = (target as u32) << TARGET_SHIFTS;
        self.interrupt_countdown = 0;
        self.interrupt_raised = false;
    }

    /// Advance one sample and return the current value
    pub fn next_value(&mut self) -> u32 {
        if self.interrupt_countdown > 0 {
            self.interrupt_countdown -= 1;
            if self.interrupt_countdown == 0 {
                self.interrupt_raised = true;
            }
        } else if self.large_increment != 0 {
            if self.descending {
                if self.large_increment > self.current {
                    self.reach_target();
                } else {
                    self.current -= self.large_increment;
                    if self.current <= self.large_target {
                        self.reach_target();
                    }
                }
            } else if MAX_CURRENT - self.current < self.large_increment {
                self.reach_target();
            } else {
                self.current += self.large_increment;
                if self.current >= self.large_target {
                    self.reach_target();
                }
            }
        }
        self.current
    }

    #[inline]
    fn reach_target(&mut self) {
        self.current = self.large_target;
        self.interrupt_countdown = INTERRUPT_TIME;
    }

    /// Return and clear the deferred interrupt flag
    pub fn check_interrupt(&mut self) -> bool {
        std::mem::take(&mut self.interrupt_raised)
    }

    /// Whether `target` lies below the current value
    pub fn is_below_current(&self, target: u8) -> bool {
        ((target as u32) << TARGET_SHIFTS) < self.current
    }

    /// Current value without advancing
    #[inline]
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Reset to zero with no ramp in progress
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs until the interrupt fires, returning (samples until target, samples until interrupt)
    fn run_to_interrupt(ramp: &mut Ramp, target: u8, limit: usize) -> (usize, usize) {
        let goal = (target as u32) << TARGET_SHIFTS;
        let mut reached_at = None;
        for n in 1..=limit {
            let value = ramp.next_value();
            if value == goal && reached_at.is_none() {
                reached_at = Some(n);
            }
            if ramp.check_interrupt() {
                return (reached_at.expect("interrupt before target"), n);
            }
        }
        panic!("no interrupt within {limit} samples");
    }

    #[test]
    fn test_ramp_reaches_target_with_deferred_interrupt() {
        for &(target, code) in &[(200u8, 0x40u8), (255, 0x7F), (1, 0x10), (128, 0x01)] {
            let mut ramp = Ramp::new();
            ramp.start_ramp(target, code);
            let (reached, fired) = run_to_interrupt(&mut ramp, target, 10_000_000);
            assert_eq!(fired - reached, INTERRUPT_TIME as usize);
            assert_eq!(ramp.current(), (target as u32) << TARGET_SHIFTS);
        }
    }

    #[test]
    fn test_descending_ramp() {
        let mut ramp = Ramp::new();
        ramp.start_ramp(255, 0x7F);
        run_to_interrupt(&mut ramp, 255, 1000);
        ramp.start_ramp(10, 0x80 | 0x50);
        let (reached, fired) = run_to_interrupt(&mut ramp, 10, 10_000_000);
        assert_eq!(fired - reached, INTERRUPT_TIME as usize);
        assert!(!ramp.is_below_current(10));
        assert!(ramp.is_below_current(9));
    }

    #[test]
    fn test_interrupt_fires_only_once() {
        let mut ramp = Ramp::new();
        ramp.start_ramp(50, 0x7F);
        run_to_interrupt(&mut ramp, 50, 1000);
        for _ in 0..1000 {
            ramp.next_value();
            assert!(!ramp.check_interrupt());
        }
    }

    #[test]
    fn test_zero_increment_freezes() {
        let mut ramp = Ramp::new();
        ramp.start_ramp(100, 0x7F);
        run_to_interrupt(&mut ramp, 100, 1000);
        ramp.start_ramp(200, 0);
        for _ in 0..10_000 {
            assert_eq!(ramp.next_value(), 100 << TARGET_SHIFTS);
            assert!(!ramp.check_interrupt());
        }
    }

    #[test]
    fn test_larger_codes_are_geometrically_faster() {
        let duration = |code: u8| {
            let mut ramp = Ramp::new();
            ramp.start_ramp(255, code);
            run_to_interrupt(&mut ramp, 255, 100_000_000).0
        };
        let slow = duration(0x30);
        let fast = duration(0x38);
        // 8 codes are one octave of speed
        assert!(slow > fast * 3 / 2 && slow < fast * 5 / 2, "{slow} vs {fast}");
    }

    #[test]
    fn test_descending_step_is_larger() {
        let mut up = Ramp::new();
        up.start_ramp(255, 0x20);
        let rise = up.next_value();

        let mut down = Ramp::new();
        down.start_ramp(255, 0x7F);
        run_to_interrupt(&mut down, 255, 1000);
        down.start_ramp(0, 0x80 | 0x20);
        let fall = MAX_CURRENT - down.next_value();
        assert_eq!(fall, rise + 1);
    }
}
