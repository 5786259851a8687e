//! LA32 lookup tables
//!
//! Tables shared by the wave generators, ramps and envelope controllers. The
//! chip itself holds the exponent and log-sine tables in silicon; the
//! remaining tables mirror values found in the control ROM. Everything is
//! computed once and handed out through [`Tables::get`].

use std::sync::OnceLock;

/// Decay speed of the resonance sine, indexed by `resonance >> 2`
const RES_AMP_DECAY_FACTOR: [u8; 8] = [31, 16, 12, 8, 5, 3, 2, 1];

/// Computed lookup tables used throughout the synthesis path
#[derive(Debug)]
pub struct Tables {
    /// 12-bit exponent table, 9-bit address (fractional part of the argument)
    pub exp9: [u16; 512],
    /// 13-bit log-sine table covering a quarter period
    pub logsin9: [u16; 512],
    /// Ramp increment magnitude needed to cover a level delta in "no time"
    pub env_logarithmic_time: [u8; 256],
    /// Amp subtraction for master volume 0-100
    pub master_vol_to_amp_subtraction: [u8; 101],
    /// Amp subtraction for levels 0-100 (part volume, expression, TVA level)
    pub level_to_amp_subtraction: [u8; 101],
    /// Pulse width parameter 0-100 mapped onto the 8-bit register range
    pub pulse_width_100_to_255: [u8; 101],
    /// Resonance decay factors
    pub res_amp_decay_factor: [u8; 8],
}

impl Tables {
    /// Shared table instance
    pub fn get() -> &'static Tables {
        static TABLES: OnceLock<Tables> = OnceLock::new();
        TABLES.get_or_init(Tables::compute)
    }

    fn compute() -> Self {
        let mut exp9 = [0u16; 512];
        for (i, slot) in exp9.iter_mut().enumerate() {
            // The 9 upper fraction bits address the table; the chip interpolates the rest.
            let arg = 13.0f32 + (-(i as f32) - 1.0) / 512.0;
            *slot = (8191.5f32 - arg.exp2()) as u16;
        }

        let mut logsin9 = [0u16; 512];
        for (i, slot) in logsin9.iter_mut().enumerate() {
            let angle = (i as f32 + 0.5) / 1024.0 * std::f32::consts::PI;
            *slot = (0.5f32 - angle.sin().log2() * 1024.0) as u16;
        }
        // Clamped to the largest 13-bit value
        logsin9[0] = 8191;

        let mut env_logarithmic_time = [0u8; 256];
        // Index 0 would be log2(0); the chip uses 64
        env_logarithmic_time[0] = 64;
        for (i, slot) in env_logarithmic_time.iter_mut().enumerate().skip(1) {
            *slot = (64.0f32 + (i as f32).log2() * 8.0).ceil() as u8;
        }

        let mut master_vol_to_amp_subtraction = [0u8; 101];
        master_vol_to_amp_subtraction[0] = 255;
        for (vol, slot) in master_vol_to_amp_subtraction.iter_mut().enumerate().skip(1) {
            *slot = (106.31f64 - 16.0 * (vol as f64).log2()) as u8;
        }

        let mut level_to_amp_subtraction = [0u8; 101];
        for (level, slot) in level_to_amp_subtraction.iter_mut().enumerate() {
            let value = ((2.0f32 - (level as f32 + 1.0).log10()) * 128.0 + 1.0) as i32;
            *slot = value.min(255) as u8;
        }

        let mut pulse_width_100_to_255 = [0u8; 101];
        for (pw, slot) in pulse_width_100_to_255.iter_mut().enumerate() {
            *slot = (pw as f32 * 255.0 / 100.0 + 0.5) as u8;
        }

        Self {
            exp9,
            logsin9,
            env_logarithmic_time,
            master_vol_to_amp_subtraction,
            level_to_amp_subtraction,
            pulse_width_100_to_255,
            res_amp_decay_factor: RES_AMP_DECAY_FACTOR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exp9_is_monotonic() {
        let tables = Tables::get();
        for i in 1..512 {
            assert!(tables.exp9[i] >= tables.exp9[i - 1]);
        }
        assert!(tables.exp9[511] < 4096);
    }

    #[test]
    fn test_logsin9_edges() {
        let tables = Tables::get();
        assert_eq!(tables.logsin9[0], 8191);
        // sin approaches 1 at the end of the quarter period
        assert_eq!(tables.logsin9[511], 0);
    }

    #[test]
    fn test_env_logarithmic_time_range() {
        let tables = Tables::get();
        assert_eq!(tables.env_logarithmic_time[0], 64);
        assert_eq!(tables.env_logarithmic_time[1], 64);
        assert_eq!(tables.env_logarithmic_time[2], 72);
        assert_eq!(tables.env_logarithmic_time[255], 128);
    }

    #[test]
    fn test_volume_subtractions_at_full_scale() {
        let tables = Tables::get();
        assert_eq!(tables.master_vol_to_amp_subtraction[100], 0);
        assert_eq!(tables.master_vol_to_amp_subtraction[0], 255);
        assert_eq!(tables.level_to_amp_subtraction[100], 0);
        assert_eq!(tables.level_to_amp_subtraction[0], 255);
    }

    #[test]
    fn test_pulse_width_mapping() {
        let tables = Tables::get();
        assert_eq!(tables.pulse_width_100_to_255[0], 0);
        assert_eq!(tables.pulse_width_100_to_255[50], 128);
        assert_eq!(tables.pulse_width_100_to_255[100], 255);
    }
}
