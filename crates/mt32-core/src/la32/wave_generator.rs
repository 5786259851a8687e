//! LA32 wave generator
//!
//! One oscillator of a partial pair. In synth mode it builds a band-limited
//! square wave out of sine segments and linear segments, plus a decaying
//! resonance sine. In PCM mode it walks a sample table. All output stays in
//! the log domain; the partial pair converts it to linear.

use std::sync::Arc;

use super::log_sample::{interpolate_exp, LogSample, LogSign};
use crate::tables::Tables;

/// Length of one sine segment in wave position units
const SINE_SEGMENT_RELATIVE_LENGTH: u32 = 1 << 18;

/// Cutoff where the square wave stops being attenuated
const MIDDLE_CUTOFF_VALUE: u32 = 128 << 18;

/// Below this cutoff the resonance is faded out sinusoidally
const RESONANCE_DECAY_THRESHOLD_CUTOFF_VALUE: u32 = 144 << 18;

/// Highest effective cutoff, measured from captures
const MAX_CUTOFF_VALUE: u32 = 240 << 18;

/// Segment of the square wave currently being generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
enum SquarePhase {
    #[default]
    PositiveRisingSine,
    PositiveLinear,
    PositiveFallingSine,
    NegativeFallingSine,
    NegativeLinear,
    NegativeRisingSine,
}

/// Quarter of the resonance sine currently being generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
enum ResonancePhase {
    #[default]
    PositiveRisingSine,
    PositiveFallingSine,
    NegativeFallingSine,
    NegativeRisingSine,
}

impl ResonancePhase {
    fn from_index(index: u32) -> Self {
        match index & 3 {
            0 => ResonancePhase::PositiveRisingSine,
            1 => ResonancePhase::PositiveFallingSine,
            2 => ResonancePhase::NegativeFallingSine,
            _ => ResonancePhase::NegativeRisingSine,
        }
    }
}

/// Sample table played back in PCM mode
///
/// Samples are stored in the ROM's log format: bit 15 is the sign and the
/// low 15 bits a magnitude where larger is louder.
#[derive(Clone, Debug)]
pub struct PcmSource {
    /// Whole PCM ROM
    pub data: Arc<[i16]>,
    /// First sample of the wave
    pub start: usize,
    /// Number of samples in the wave
    pub length: u32,
    /// Whether playback wraps at the end
    pub looped: bool,
}

impl PcmSource {
    #[inline]
    fn sample(&self, index: u32) -> i16 {
        self.data[self.start + index as usize]
    }
}

/// One LA32 oscillator
#[derive(Clone, Debug, Default)]
pub struct WaveGenerator {
    active: bool,

    // Synth mode parameters
    sawtooth_waveform: bool,
    pulse_width: u8,
    resonance: u8,

    // Inputs of the current sample
    amp: u32,
    pitch: u16,
    cutoff_val: u32,

    // Square wave state
    wave_position: u32,
    square_wave_position: u32,
    phase: SquarePhase,
    resonance_sine_position: u32,
    resonance_phase: ResonancePhase,
    resonance_amp_subtraction: u32,
    res_amp_decay_factor: u32,
    square_log_sample: LogSample,
    resonance_log_sample: LogSample,

    // PCM state
    pcm: Option<PcmSource>,
    pcm_interpolated: bool,
    pcm_interpolation_factor: u32,
    first_pcm_log_sample: LogSample,
    second_pcm_log_sample: LogSample,
}

impl WaveGenerator {
    /// Create an inactive generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare synth mode
    ///
    /// `resonance` is the TVF resonance parameter plus one (1-31).
    pub fn init_synth(&mut self, sawtooth_waveform: bool, pulse_width: u8, resonance: u8) {
        let tables = Tables::get();
        self.sawtooth_waveform = sawtooth_waveform;
        self.pulse_width = pulse_width;
        self.resonance = resonance;

        self.wave_position = 0;
        self.square_wave_position = 0;
        self.phase = SquarePhase::PositiveRisingSine;
        self.resonance_sine_position = 0;
        self.resonance_phase = ResonancePhase::PositiveRisingSine;
        self.resonance_amp_subtraction = (32u32.saturating_sub(resonance as u32)) << 10;
        self.res_amp_decay_factor =
            (tables.res_amp_decay_factor[(resonance >> 2) as usize & 7] as u32) << 2;
        self.square_log_sample = LogSample::SILENCE;
        self.resonance_log_sample = LogSample::SILENCE;

        self.pcm = None;
        self.active = true;
    }

    /// Prepare PCM mode
    pub fn init_pcm(&mut self, source: PcmSource, interpolated: bool) {
        self.pcm = Some(source);
        self.pcm_interpolated = interpolated;
        self.pcm_interpolation_factor = 0;
        self.first_pcm_log_sample = LogSample::SILENCE;
        self.second_pcm_log_sample = LogSample::SILENCE;
        self.wave_position = 0;
        self.active = true;
    }

    /// Advance one sample
    ///
    /// `amp` is the attenuation from the TVA ramp, `pitch` is in 1/4096
    /// octave units and `cutoff` the TVF value scaled by 2^18.
    pub fn generate_next_sample(&mut self, amp: u32, pitch: u16, cutoff: u32) {
        if !self.active {
            return;
        }
        self.amp = amp;
        self.pitch = pitch;

        if self.pcm.is_some() {
            self.generate_next_pcm_log_samples();
            return;
        }

        self.cutoff_val = cutoff.min(MAX_CUTOFF_VALUE);
        self.generate_next_square_wave_log_sample();
        self.generate_next_resonance_wave_log_sample();
        if self.sawtooth_waveform {
            let cosine = self.sawtooth_cosine_log_sample();
            self.square_log_sample.add(cosine);
            self.resonance_log_sample.add(cosine);
        }
        self.advance_position();
    }

    /// First (square or current PCM) or second (resonance or next PCM) output
    pub fn output_log_sample(&self, first: bool) -> LogSample {
        if !self.active {
            return LogSample::SILENCE;
        }
        match (self.pcm.is_some(), first) {
            (true, true) => self.first_pcm_log_sample,
            (true, false) => self.second_pcm_log_sample,
            (false, true) => self.square_log_sample,
            (false, false) => self.resonance_log_sample,
        }
    }

    /// Stop producing output
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Whether the generator is producing output
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the generator is in PCM mode
    pub fn is_pcm_wave(&self) -> bool {
        self.pcm.is_some()
    }

    /// Weight of the second PCM sample, 0-127
    pub fn pcm_interpolation_factor(&self) -> u32 {
        self.pcm_interpolation_factor
    }

    fn sample_step(&self) -> u32 {
        // 2^(pitch / 4096 + 4) with 8 fractional bits
        let mut step = interpolate_exp(!self.pitch & 4095) as u32;
        step <<= self.pitch >> 12;
        step >>= 8;
        step & !1
    }

    fn resonance_wave_length_factor(effective_cutoff: u32) -> u32 {
        // 2^(12 + effective_cutoff / 4096)
        let factor = interpolate_exp((!effective_cutoff & 4095) as u16) as u32;
        factor << (effective_cutoff >> 12)
    }

    fn high_linear_length(&self, effective_cutoff: u32) -> u32 {
        let effective_pulse_width = if self.pulse_width > 128 {
            ((self.pulse_width - 128) as u32) << 6
        } else {
            0
        };

        if effective_pulse_width < effective_cutoff {
            let exp_arg = effective_cutoff - effective_pulse_width;
            let length = (interpolate_exp((!exp_arg & 4095) as u16) as u32) << (7 + (exp_arg >> 12));
            length.wrapping_sub(2 * SINE_SEGMENT_RELATIVE_LENGTH)
        } else {
            0
        }
    }

    fn compute_positions(&mut self, high_linear_length: u32, low_linear_length: u32, factor: u32) {
        // 12-bit multiplier on the chip
        let mut position = (self.wave_position >> 8).wrapping_mul(factor >> 4);
        self.resonance_sine_position = position;
        self.square_wave_position = position;

        if position < SINE_SEGMENT_RELATIVE_LENGTH {
            self.phase = SquarePhase::PositiveRisingSine;
            return;
        }
        position -= SINE_SEGMENT_RELATIVE_LENGTH;
        self.square_wave_position = position;
        if position < high_linear_length {
            self.phase = SquarePhase::PositiveLinear;
            return;
        }
        position -= high_linear_length;
        self.square_wave_position = position;
        if position < SINE_SEGMENT_RELATIVE_LENGTH {
            self.phase = SquarePhase::PositiveFallingSine;
            return;
        }
        position -= SINE_SEGMENT_RELATIVE_LENGTH;
        self.square_wave_position = position;
        self.resonance_sine_position = position;
        if position < SINE_SEGMENT_RELATIVE_LENGTH {
            self.phase = SquarePhase::NegativeFallingSine;
            return;
        }
        position -= SINE_SEGMENT_RELATIVE_LENGTH;
        self.square_wave_position = position;
        if position < low_linear_length {
            self.phase = SquarePhase::NegativeLinear;
            return;
        }
        position -= low_linear_length;
        self.square_wave_position = position;
        self.phase = SquarePhase::NegativeRisingSine;
    }

    fn advance_position(&mut self) {
        self.wave_position = self.wave_position.wrapping_add(self.sample_step());
        self.wave_position %= 4 * SINE_SEGMENT_RELATIVE_LENGTH;

        let effective_cutoff = if self.cutoff_val > MIDDLE_CUTOFF_VALUE {
            (self.cutoff_val - MIDDLE_CUTOFF_VALUE) >> 10
        } else {
            0
        };
        let factor = Self::resonance_wave_length_factor(effective_cutoff);
        let high_linear_length = self.high_linear_length(effective_cutoff);
        let low_linear_length = (factor << 8)
            .wrapping_sub(4 * SINE_SEGMENT_RELATIVE_LENGTH)
            .wrapping_sub(high_linear_length);
        self.compute_positions(high_linear_length, low_linear_length, factor);

        let negative_half = if self.phase > SquarePhase::PositiveFallingSine {
            2
        } else {
            0
        };
        self.resonance_phase =
            ResonancePhase::from_index((self.resonance_sine_position >> 18) + negative_half);
    }

    fn generate_next_square_wave_log_sample(&mut self) {
        let tables = Tables::get();
        let index = (self.square_wave_position >> 9) as usize;
        let mut log_value = match self.phase {
            SquarePhase::PositiveRisingSine | SquarePhase::NegativeFallingSine => {
                tables.logsin9[index & 511] as u32
            }
            SquarePhase::PositiveFallingSine | SquarePhase::NegativeRisingSine => {
                tables.logsin9[!index & 511] as u32
            }
            SquarePhase::PositiveLinear | SquarePhase::NegativeLinear => 0,
        };
        log_value <<= 2;
        log_value += self.amp >> 10;
        if self.cutoff_val < MIDDLE_CUTOFF_VALUE {
            log_value += (MIDDLE_CUTOFF_VALUE - self.cutoff_val) >> 9;
        }

        let sign = if self.phase < SquarePhase::NegativeFallingSine {
            LogSign::Positive
        } else {
            LogSign::Negative
        };
        self.square_log_sample = LogSample::saturated(log_value, sign);
    }

    fn generate_next_resonance_wave_log_sample(&mut self) {
        let tables = Tables::get();
        let resonance_index = (self.resonance_sine_position >> 9) as usize;
        let mut log_value = match self.resonance_phase {
            ResonancePhase::PositiveFallingSine | ResonancePhase::NegativeRisingSine => {
                tables.logsin9[!resonance_index & 511] as u32
            }
            _ => tables.logsin9[resonance_index & 511] as u32,
        };
        log_value <<= 2;
        log_value += self.amp >> 10;

        // The positive and negative halves decay at slightly different speeds
        let decay_factor = if self.phase < SquarePhase::NegativeFallingSine {
            self.res_amp_decay_factor
        } else {
            self.res_amp_decay_factor + 1
        };
        log_value += self.resonance_amp_subtraction
            + (((self.resonance_sine_position >> 4) * decay_factor) >> 8);

        // Window the resonance so the output has no discontinuities
        let square_index = (self.square_wave_position >> 9) as usize;
        match self.phase {
            SquarePhase::PositiveRisingSine | SquarePhase::NegativeFallingSine => {
                log_value += (tables.logsin9[square_index & 511] as u32) << 2;
            }
            SquarePhase::PositiveFallingSine | SquarePhase::NegativeRisingSine => {
                log_value += (tables.logsin9[!square_index & 511] as u32) << 3;
            }
            _ => {}
        }

        if self.cutoff_val < MIDDLE_CUTOFF_VALUE {
            // Exponential fade below the middle cutoff
            log_value += 31743 + ((MIDDLE_CUTOFF_VALUE - self.cutoff_val) >> 9);
        } else if self.cutoff_val < RESONANCE_DECAY_THRESHOLD_CUTOFF_VALUE {
            // Sinusoidal fade up to the threshold
            let sine_index = ((self.cutoff_val - MIDDLE_CUTOFF_VALUE) >> 13) as usize;
            log_value += (tables.logsin9[sine_index] as u32) << 2;
        }

        // Calibrated against captures
        log_value -= 1 << 12;

        let sign = if self.resonance_phase < ResonancePhase::NegativeFallingSine {
            LogSign::Positive
        } else {
            LogSign::Negative
        };
        self.resonance_log_sample = LogSample::saturated(log_value, sign);
    }

    fn sawtooth_cosine_log_sample(&self) -> LogSample {
        let tables = Tables::get();
        let position = self.wave_position + (1 << 18);
        let index = (position >> 9) as usize;
        let log_value = if (position & (1 << 18)) != 0 {
            tables.logsin9[!index & 511]
        } else {
            tables.logsin9[index & 511]
        };
        LogSample {
            log_value: log_value << 2,
            sign: if (position & (1 << 19)) == 0 {
                LogSign::Positive
            } else {
                LogSign::Negative
            },
        }
    }

    fn pcm_to_log_sample(&self, pcm_sample: i16) -> LogSample {
        let mut log_value = (32787 - (pcm_sample as u32 & 32767)) << 1;
        log_value += self.amp >> 10;
        let sign = if pcm_sample < 0 {
            LogSign::Negative
        } else {
            LogSign::Positive
        };
        LogSample::saturated(log_value, sign)
    }

    fn generate_next_pcm_log_samples(&mut self) {
        let Some(source) = self.pcm.as_ref() else {
            return;
        };

        self.pcm_interpolation_factor = (self.wave_position & 255) >> 1;
        let mut index = self.wave_position >> 8;
        let first = self.pcm_to_log_sample(source.sample(index));
        let second = if self.pcm_interpolated {
            index += 1;
            if index < source.length {
                self.pcm_to_log_sample(source.sample(index))
            } else if source.looped {
                self.pcm_to_log_sample(source.sample(index - source.length))
            } else {
                LogSample::SILENCE
            }
        } else {
            LogSample::SILENCE
        };

        // 2^(pitch / 4096 + 3) with 8 fractional bits
        let mut step = interpolate_exp(!self.pitch & 4095) as u32;
        step <<= self.pitch >> 12;
        step >>= 9;

        let length = source.length;
        let looped = source.looped;
        self.first_pcm_log_sample = first;
        self.second_pcm_log_sample = second;
        self.wave_position += step;
        if self.wave_position >= length << 8 {
            if looped {
                self.wave_position -= length << 8;
                // Very high pitches may step over a whole short loop
                self.wave_position %= length << 8;
            } else {
                self.deactivate();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_source(samples: Vec<i16>, looped: bool) -> PcmSource {
        let length = samples.len() as u32;
        PcmSource {
            data: samples.into(),
            start: 0,
            length,
            looped,
        }
    }

    #[test]
    fn test_inactive_generator_is_silent() {
        let wg = WaveGenerator::new();
        assert_eq!(wg.output_log_sample(true), LogSample::SILENCE);
        assert_eq!(wg.output_log_sample(false), LogSample::SILENCE);
    }

    #[test]
    fn test_square_wave_alternates_sign() {
        let mut wg = WaveGenerator::new();
        wg.init_synth(false, 128, 1);
        let mut positives = 0;
        let mut negatives = 0;
        for _ in 0..2000 {
            wg.generate_next_sample(0, 37133, 178 << 18);
            let sample = wg.output_log_sample(true).unlog();
            if sample > 0 {
                positives += 1;
            } else if sample < 0 {
                negatives += 1;
            }
        }
        assert!(positives > 500 && negatives > 500);
    }

    #[test]
    fn test_one_shot_pcm_deactivates_at_end() {
        let mut wg = WaveGenerator::new();
        wg.init_pcm(pcm_source(vec![0x7000; 64], false), true);
        let mut samples = 0;
        while wg.is_active() {
            // Pitch 8 octaves up the table: one sample per output sample
            wg.generate_next_sample(0, 5 * 4096, 0);
            samples += 1;
            assert!(samples < 1000, "one-shot wave never finished");
        }
        assert!(samples >= 60 && samples <= 66, "took {samples} samples");
    }

    #[test]
    fn test_looped_pcm_keeps_playing() {
        let mut wg = WaveGenerator::new();
        wg.init_pcm(pcm_source(vec![0x7000; 16], true), true);
        for _ in 0..1000 {
            wg.generate_next_sample(0, 5 * 4096, 0);
        }
        assert!(wg.is_active());
        assert!(wg.output_log_sample(true).unlog() > 0);
    }

    #[test]
    fn test_uninterpolated_pcm_has_silent_second_sample() {
        let mut wg = WaveGenerator::new();
        wg.init_pcm(pcm_source(vec![0x7000; 16], true), false);
        wg.generate_next_sample(0, 5 * 4096, 0);
        assert_eq!(wg.output_log_sample(false), LogSample::SILENCE);
    }
}
