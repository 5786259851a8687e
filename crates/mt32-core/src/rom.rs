//! Control and PCM ROM contents
//!
//! Image parsing and checksum identification happen outside this crate;
//! callers hand over the decoded contents, which are validated once here so
//! the synthesis path can index them without further checks.

use std::sync::Arc;

use bitflags::bitflags;

use crate::error::{Mt32Error, Result};
use crate::params::{RhythmTemp, TimbreParam, PARTIAL_STRUCT};

/// Number of ROM timbres in banks A and B
pub const MELODIC_TIMBRE_COUNT: usize = 128;
/// Maximum number of rhythm timbres
pub const MAX_RHYTHM_TIMBRE_COUNT: usize = 64;
/// Number of rhythm keys (MIDI keys 24-108)
pub const RHYTHM_KEY_COUNT: usize = 85;
/// Maximum number of PCM waves (two banks)
pub const MAX_PCM_WAVE_COUNT: usize = 256;

bitflags! {
    /// Behaviour differences between control ROM generations
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RomFeatures: u32 {
        /// Key shift is applied to pitch rather than to the key
        const KEY_SHIFT = 1 << 0;
        /// Base pitch wraps at 16 bits instead of clamping
        const BASE_PITCH_OVERFLOW = 1 << 1;
        /// Pitch envelope output wraps at 16 bits instead of clamping
        const PITCH_ENVELOPE_OVERFLOW = 1 << 2;
        /// Ring modulated structures without mix ignore master, part and expression volume
        const RING_MODULATION_NO_MIX = 1 << 3;
        /// Negative TVF base cutoffs snap to a fixed value
        const TVF_BASE_CUTOFF_LIMIT = 1 << 4;
        /// MIDI pan is divided by 9 instead of 8.5
        const PAN_MULT = 1 << 5;
    }
}

impl RomFeatures {
    /// Quirks of the first generation MT-32
    pub fn mt32_gen0() -> Self {
        RomFeatures::KEY_SHIFT
            | RomFeatures::BASE_PITCH_OVERFLOW
            | RomFeatures::PITCH_ENVELOPE_OVERFLOW
            | RomFeatures::RING_MODULATION_NO_MIX
            | RomFeatures::TVF_BASE_CUTOFF_LIMIT
            | RomFeatures::PAN_MULT
    }

    /// Later MT-32 revisions
    pub fn mt32_gen1() -> Self {
        RomFeatures::RING_MODULATION_NO_MIX | RomFeatures::PAN_MULT
    }

    /// CM-32L and LAPC-I
    pub fn cm32l() -> Self {
        RomFeatures::empty()
    }
}

/// Location and tuning of one PCM wave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmWaveEntry {
    /// First sample in the PCM ROM
    pub start: usize,
    /// Number of samples
    pub length: u32,
    pub looped: bool,
    /// Pitch offset added to the base pitch
    pub pitch: u16,
    /// Master tune does not apply to this wave
    pub unaffected_by_master_tune: bool,
}

/// Validated ROM contents
#[derive(Debug, Clone)]
pub struct ControlRom {
    features: RomFeatures,
    melodic_timbres: Vec<TimbreParam>,
    rhythm_timbres: Vec<TimbreParam>,
    pcm_waves: Vec<PcmWaveEntry>,
    pcm_samples: Arc<[i16]>,
    rhythm_defaults: Vec<RhythmTemp>,
}

impl ControlRom {
    /// Validate and wrap decoded ROM contents
    ///
    /// `timbres` holds the 128 bank A/B timbres followed by the rhythm
    /// timbres.
    pub fn new(
        features: RomFeatures,
        timbres: Vec<TimbreParam>,
        pcm_waves: Vec<PcmWaveEntry>,
        pcm_samples: Vec<i16>,
        rhythm_defaults: Vec<RhythmTemp>,
    ) -> Result<Self> {
        if timbres.len() <= MELODIC_TIMBRE_COUNT
            || timbres.len() > MELODIC_TIMBRE_COUNT + MAX_RHYTHM_TIMBRE_COUNT
        {
            return Err(Mt32Error::InvalidRom(format!(
                "expected 129-192 timbres, got {}",
                timbres.len()
            )));
        }
        if pcm_waves.is_empty() || pcm_waves.len() > MAX_PCM_WAVE_COUNT {
            return Err(Mt32Error::InvalidRom(format!(
                "expected 1-{MAX_PCM_WAVE_COUNT} PCM waves, got {}",
                pcm_waves.len()
            )));
        }
        for (i, wave) in pcm_waves.iter().enumerate() {
            if wave.length == 0 {
                return Err(Mt32Error::InvalidRom(format!("PCM wave {i} is empty")));
            }
            if wave.start + wave.length as usize > pcm_samples.len() {
                return Err(Mt32Error::InvalidRom(format!(
                    "PCM wave {i} ends past the sample data ({} > {})",
                    wave.start + wave.length as usize,
                    pcm_samples.len()
                )));
            }
        }
        for (i, timbre) in timbres.iter().enumerate() {
            let common = &timbre.common;
            if common.partial_structure_12 as usize >= PARTIAL_STRUCT.len()
                || common.partial_structure_34 as usize >= PARTIAL_STRUCT.len()
            {
                return Err(Mt32Error::InvalidRom(format!(
                    "timbre {i} has an invalid partial structure"
                )));
            }
        }
        if rhythm_defaults.len() != RHYTHM_KEY_COUNT {
            return Err(Mt32Error::InvalidRom(format!(
                "expected {RHYTHM_KEY_COUNT} rhythm key settings, got {}",
                rhythm_defaults.len()
            )));
        }

        let mut melodic_timbres = timbres;
        let rhythm_timbres = melodic_timbres.split_off(MELODIC_TIMBRE_COUNT);
        log::debug!(
            "control ROM: {} rhythm timbres, {} PCM waves, {} samples",
            rhythm_timbres.len(),
            pcm_waves.len(),
            pcm_samples.len()
        );
        Ok(Self {
            features,
            melodic_timbres,
            rhythm_timbres,
            pcm_waves,
            pcm_samples: pcm_samples.into(),
            rhythm_defaults,
        })
    }

    pub fn features(&self) -> RomFeatures {
        self.features
    }

    /// Timbres of banks A and B
    pub fn melodic_timbres(&self) -> &[TimbreParam] {
        &self.melodic_timbres
    }

    pub fn rhythm_timbres(&self) -> &[TimbreParam] {
        &self.rhythm_timbres
    }

    pub fn pcm_waves(&self) -> &[PcmWaveEntry] {
        &self.pcm_waves
    }

    pub fn pcm_wave(&self, index: usize) -> Option<&PcmWaveEntry> {
        self.pcm_waves.get(index)
    }

    pub fn pcm_samples(&self) -> &Arc<[i16]> {
        &self.pcm_samples
    }

    pub fn rhythm_defaults(&self) -> &[RhythmTemp] {
        &self.rhythm_defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timbres(count: usize) -> Vec<TimbreParam> {
        vec![TimbreParam::default(); count]
    }

    fn wave(start: usize, length: u32) -> PcmWaveEntry {
        PcmWaveEntry {
            start,
            length,
            looped: false,
            pitch: 0,
            unaffected_by_master_tune: false,
        }
    }

    fn rhythm() -> Vec<RhythmTemp> {
        vec![RhythmTemp::default(); RHYTHM_KEY_COUNT]
    }

    #[test]
    fn test_valid_rom_splits_timbres() {
        let rom = ControlRom::new(
            RomFeatures::cm32l(),
            timbres(158),
            vec![wave(0, 100)],
            vec![0; 100],
            rhythm(),
        )
        .unwrap();
        assert_eq!(rom.melodic_timbres().len(), 128);
        assert_eq!(rom.rhythm_timbres().len(), 30);
    }

    #[test]
    fn test_pcm_wave_past_end_is_rejected() {
        let result = ControlRom::new(
            RomFeatures::cm32l(),
            timbres(192),
            vec![wave(50, 100)],
            vec![0; 100],
            rhythm(),
        );
        assert!(matches!(result, Err(Mt32Error::InvalidRom(_))));
    }

    #[test]
    fn test_bad_structure_is_rejected() {
        let mut list = timbres(192);
        list[5].common.partial_structure_34 = 13;
        let result = ControlRom::new(
            RomFeatures::cm32l(),
            list,
            vec![wave(0, 10)],
            vec![0; 10],
            rhythm(),
        );
        assert!(matches!(result, Err(Mt32Error::InvalidRom(_))));
    }

    #[test]
    fn test_missing_rhythm_timbres_is_rejected() {
        let result = ControlRom::new(
            RomFeatures::cm32l(),
            timbres(128),
            vec![wave(0, 10)],
            vec![0; 10],
            rhythm(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_feature_sets() {
        assert!(RomFeatures::mt32_gen0().contains(RomFeatures::KEY_SHIFT));
        assert!(!RomFeatures::mt32_gen1().contains(RomFeatures::BASE_PITCH_OVERFLOW));
        assert!(RomFeatures::cm32l().is_empty());
    }
}
