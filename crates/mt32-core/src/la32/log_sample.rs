//! Log-domain sample arithmetic
//!
//! The LA32 never multiplies linear samples while synthesising a partial.
//! Amplitudes are carried as attenuations in a base-2 logarithmic domain
//! (4096 steps per octave) with a separate sign, so scaling becomes
//! addition. Only the final stage converts back to linear.

use crate::tables::Tables;

/// Sign of a log-domain sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSign {
    /// Non-negative linear value
    Positive,
    /// Negative linear value
    Negative,
}

/// A sample in the chip's log domain
///
/// `log_value` is an attenuation: 0 is full scale (about 8189 linear), each
/// 4096 halves the amplitude and 65535 is silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogSample {
    /// Attenuation, 4096 units per octave
    pub log_value: u16,
    /// Sign of the linear value
    pub sign: LogSign,
}

impl LogSample {
    /// Silence
    pub const SILENCE: LogSample = LogSample {
        log_value: 65535,
        sign: LogSign::Positive,
    };

    /// Builds a sample from an unclamped attenuation
    #[inline]
    pub fn saturated(log_value: u32, sign: LogSign) -> Self {
        Self {
            log_value: log_value.min(65535) as u16,
            sign,
        }
    }

    /// Adds another sample in the log domain (multiplication in linear space)
    #[inline]
    pub fn add(&mut self, other: LogSample) {
        let sum = self.log_value as u32 + other.log_value as u32;
        self.log_value = sum.min(65535) as u16;
        self.sign = if self.sign == other.sign {
            LogSign::Positive
        } else {
            LogSign::Negative
        };
    }

    /// Converts to a linear sample
    #[inline]
    pub fn unlog(self) -> i16 {
        unlog(self)
    }

    /// Finds the log sample whose [`unlog`] is closest to `sample`
    ///
    /// The magnitude range is limited to what [`unlog`] can produce
    /// (about ±8189); larger inputs saturate.
    pub fn relog(sample: i16) -> Self {
        let sign = if sample < 0 {
            LogSign::Negative
        } else {
            LogSign::Positive
        };
        let magnitude = (sample as i32).unsigned_abs() as i32;
        let unlog_magnitude = |log_value: u32| -> i32 {
            unlog(LogSample {
                log_value: log_value as u16,
                sign: LogSign::Positive,
            }) as i32
        };

        // unlog is non-increasing in log_value: find the first value at or below the magnitude
        let (mut low, mut high) = (0u32, 65535u32);
        while low < high {
            let mid = (low + high) / 2;
            if unlog_magnitude(mid) <= magnitude {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        let mut best = low;
        if low > 0 {
            let above = unlog_magnitude(low - 1);
            let below = unlog_magnitude(low);
            if (above - magnitude).abs() < (magnitude - below).abs() {
                best = low - 1;
            }
        }
        Self {
            log_value: best as u16,
            sign,
        }
    }
}

impl Default for LogSample {
    fn default() -> Self {
        LogSample::SILENCE
    }
}

/// Exponent with 3-bit interpolation between neighbouring table rows
///
/// Computes approximately `2^(13 - fract / 4096)` for a 12-bit `fract`.
#[inline]
pub fn interpolate_exp(fract: u16) -> u16 {
    let tables = Tables::get();
    let index = (fract >> 3) as usize;
    let extra_bits = (!fract & 7) as u32;
    let entry2 = (8191 - tables.exp9[index]) as u32;
    let entry1 = if index == 0 {
        8191
    } else {
        (8191 - tables.exp9[index - 1]) as u32
    };
    (entry2 + (((entry1 - entry2) * extra_bits) >> 3)) as u16
}

/// Converts a log-domain sample to linear
#[inline]
pub fn unlog(sample: LogSample) -> i16 {
    let int_log_value = (sample.log_value >> 12) as u32;
    let frac_log_value = sample.log_value & 4095;
    let linear = (interpolate_exp(frac_log_value) >> int_log_value) as i16;
    match sample.sign {
        LogSign::Positive => linear,
        LogSign::Negative => -linear,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_exp_bounds() {
        assert_eq!(interpolate_exp(0), 8189);
        let half = interpolate_exp(4095);
        assert!((4094..=4098).contains(&half), "got {half}");
    }

    #[test]
    fn test_unlog_octaves_halve() {
        let full = unlog(LogSample {
            log_value: 0,
            sign: LogSign::Positive,
        });
        let octave_down = unlog(LogSample {
            log_value: 4096,
            sign: LogSign::Positive,
        });
        assert_eq!(octave_down, full >> 1);
        assert_eq!(unlog(LogSample::SILENCE), 0);
    }

    #[test]
    fn test_unlog_sign() {
        let negative = LogSample {
            log_value: 1000,
            sign: LogSign::Negative,
        };
        let positive = LogSample {
            sign: LogSign::Positive,
            ..negative
        };
        assert_eq!(unlog(negative), -unlog(positive));
    }

    #[test]
    fn test_add_multiplies_signs_and_saturates() {
        let mut a = LogSample {
            log_value: 40000,
            sign: LogSign::Negative,
        };
        a.add(LogSample {
            log_value: 40000,
            sign: LogSign::Negative,
        });
        assert_eq!(a.log_value, 65535);
        assert_eq!(a.sign, LogSign::Positive);
    }

    #[test]
    fn test_relog_round_trip() {
        for sample in (-8189i16..=8189).step_by(7) {
            let back = LogSample::relog(sample).unlog();
            let tolerance = 2 + (sample as i32).abs() / 1024;
            assert!(
                (back as i32 - sample as i32).abs() <= tolerance,
                "sample {sample} came back as {back}"
            );
        }
    }
}
