//! Synthetic control ROM and demo sequence
//!
//! Real ROM images are copyrighted, so tests and the render tool use a
//! small generated ROM instead. Its timbres cover the four partial kinds
//! the engine distinguishes: plain synth, mixed pairs, ring modulation and
//! PCM.

use crate::error::Result;
use crate::params::{PartialParam, RhythmTemp, TimbreParam};
use crate::rom::{ControlRom, PcmWaveEntry, RomFeatures, MELODIC_TIMBRE_COUNT, RHYTHM_KEY_COUNT};
use crate::synth::Event;

/// Number of rhythm timbres in the synthetic ROM
pub const DEMO_RHYTHM_TIMBRE_COUNT: usize = 30;

/// PCM wave 0: one looped sine cycle
pub const PCM_SINE: u8 = 0;
/// PCM wave 1: decaying noise burst
pub const PCM_NOISE: u8 = 1;

const SINE_LENGTH: u32 = 256;
const NOISE_LENGTH: u32 = 4096;

/// Pitch that plays the 256-sample sine cycle at 261.6 Hz for middle C
const SINE_PITCH: u16 = 24845;
/// Pitch that plays one PCM sample per output sample for middle C
const UNITY_PITCH: u16 = 5 * 4096;

/// Encode a linear sample in -1.0..=1.0 as a sign-magnitude log sample
pub fn encode_pcm_sample(value: f32) -> i16 {
    let magnitude = value.abs().min(1.0);
    if magnitude <= f32::EPSILON {
        return 0;
    }
    // 4096 units per octave, two per stored step
    let attenuation = (-magnitude.log2() * 2048.0) as i32;
    let stored = (32767 - attenuation).clamp(0, 32767) as u16;
    if value < 0.0 {
        (stored | 0x8000) as i16
    } else {
        stored as i16
    }
}

fn pcm_data() -> (Vec<PcmWaveEntry>, Vec<i16>) {
    let mut samples = Vec::with_capacity((SINE_LENGTH + NOISE_LENGTH) as usize);
    for i in 0..SINE_LENGTH {
        let phase = i as f32 / SINE_LENGTH as f32 * std::f32::consts::TAU;
        samples.push(encode_pcm_sample(phase.sin()));
    }

    let mut seed: u32 = 0x1234_5678;
    for i in 0..NOISE_LENGTH {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let white = (seed >> 16) as f32 / 32768.0 - 1.0;
        let decay = 1.0 - i as f32 / NOISE_LENGTH as f32;
        samples.push(encode_pcm_sample(white * decay * decay));
    }

    let waves = vec![
        PcmWaveEntry {
            start: 0,
            length: SINE_LENGTH,
            looped: true,
            pitch: SINE_PITCH,
            unaffected_by_master_tune: false,
        },
        PcmWaveEntry {
            start: SINE_LENGTH as usize,
            length: NOISE_LENGTH,
            looped: false,
            pitch: UNITY_PITCH,
            unaffected_by_master_tune: true,
        },
    ];
    (waves, samples)
}

/// A neutral partial: unity keyfollow, open filter, full level
pub fn basic_partial() -> PartialParam {
    let mut param = PartialParam::default();
    param.wg.pitch_coarse = 36;
    param.wg.pitch_fine = 50;
    param.wg.pitch_keyfollow = 11;
    param.wg.pitch_bender_enabled = 1;
    param.wg.pulse_width = 0;
    param.wg.pulse_width_velo_sensitivity = 7;
    param.pitch_env.level = [50; 5];
    param.tvf.cutoff = 100;
    param.tvf.keyfollow = 11;
    param.tvf.bias_level = 7;
    param.tva.level = 100;
    param.tva.velo_sensitivity = 50;
    param.tva.bias_level_1 = 12;
    param.tva.bias_level_2 = 12;
    param.tva.env_time = [0, 20, 20, 20, 30];
    param.tva.env_level = [100, 100, 100, 100];
    param
}

fn named(name: &str) -> [u8; 10] {
    let mut bytes = [b' '; 10];
    for (dst, src) in bytes.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    bytes
}

fn timbre(name: &str, structure_12: u8, mute: u8, partials: [PartialParam; 4]) -> TimbreParam {
    let mut timbre = TimbreParam {
        partials,
        ..TimbreParam::default()
    };
    timbre.common.name = named(name);
    timbre.common.partial_structure_12 = structure_12;
    timbre.common.partial_mute = mute;
    timbre
}

fn melodic_timbre(program: usize) -> TimbreParam {
    let mut first = basic_partial();
    let mut second = basic_partial();
    let unused = PartialParam::default();
    match program % 4 {
        0 => timbre(&format!("Square {program:03}"), 0, 0b0001, [first, unused, unused, unused]),
        1 => {
            // Two slightly detuned saws
            first.wg.waveform = 1;
            second.wg.waveform = 1;
            first.wg.pitch_fine = 47;
            second.wg.pitch_fine = 53;
            first.tva.level = 90;
            second.tva.level = 90;
            timbre(&format!("SawPad {program:03}"), 0, 0b0011, [first, second, unused, unused])
        }
        2 => {
            first.wg.pcm_wave = PCM_SINE;
            timbre(&format!("Sine {program:03}"), 2, 0b0001, [first, unused, unused, unused])
        }
        _ => {
            // Ring modulated bell
            second.wg.pitch_coarse = 55;
            first.tva.env_time = [0, 40, 60, 80, 40];
            first.tva.env_level = [100, 70, 40, 0];
            second.tva.env_time = first.tva.env_time;
            second.tva.env_level = first.tva.env_level;
            timbre(&format!("Bell {program:03}"), 1, 0b0011, [first, second, unused, unused])
        }
    }
}

fn rhythm_timbre(index: usize) -> TimbreParam {
    let mut partial = basic_partial();
    partial.tva.env_time = [0, 10, 20, 30, 10];
    partial.tva.env_level = [100, 60, 20, 0];
    let unused = PartialParam::default();
    let mut timbre = if index % 2 == 0 {
        partial.wg.pcm_wave = PCM_NOISE;
        partial.wg.pitch_keyfollow = 0;
        partial.wg.pitch_coarse = 36 + (index / 2) as u8;
        timbre(&format!("Noise {index:02}"), 2, 0b0001, [partial, unused, unused, unused])
    } else {
        partial.wg.pitch_coarse = 12 + index as u8;
        partial.pitch_env.depth = 8;
        partial.pitch_env.level = [70, 50, 50, 50, 50];
        partial.pitch_env.time = [30, 30, 30, 30];
        timbre(&format!("Tom {index:02}"), 0, 0b0001, [partial, unused, unused, unused])
    };
    timbre.common.no_sustain = 1;
    timbre
}

/// Rhythm key settings: keys 35-81 play the rhythm timbres in turn
fn rhythm_defaults() -> Vec<RhythmTemp> {
    (0..RHYTHM_KEY_COUNT)
        .map(|index| {
            let key = index + 24;
            let timbre = if (35..=81).contains(&key) {
                64 + ((key - 35) % DEMO_RHYTHM_TIMBRE_COUNT) as u8
            } else {
                127
            };
            RhythmTemp {
                timbre,
                output_level: 100,
                panpot: (key % 15) as u8,
                reverb_switch: 1,
            }
        })
        .collect()
}

/// Build the synthetic ROM with CM-32L behaviour
pub fn synthetic_rom() -> Result<ControlRom> {
    synthetic_rom_with_features(RomFeatures::cm32l())
}

/// Build the synthetic ROM with the given quirks
pub fn synthetic_rom_with_features(features: RomFeatures) -> Result<ControlRom> {
    let mut timbres: Vec<TimbreParam> = (0..MELODIC_TIMBRE_COUNT).map(melodic_timbre).collect();
    timbres.extend((0..DEMO_RHYTHM_TIMBRE_COUNT).map(rhythm_timbre));
    let (waves, samples) = pcm_data();
    ControlRom::new(features, timbres, waves, samples, rhythm_defaults())
}

/// A few bars of chords, bass and drums, as (sample time, event) pairs
pub fn demo_sequence(sample_rate: u32) -> Vec<(u64, Event)> {
    let beat = u64::from(sample_rate) / 2;
    let mut events = vec![
        (0, Event::ProgramChange { channel: 1, program: 1 }),
        (0, Event::ProgramChange { channel: 2, program: 0 }),
        (0, Event::ProgramChange { channel: 3, program: 3 }),
    ];

    let chords: [[u8; 3]; 4] = [[60, 64, 67], [57, 60, 64], [53, 57, 60], [55, 59, 62]];
    for (bar, chord) in chords.iter().enumerate() {
        let start = bar as u64 * 4 * beat;
        for &key in chord {
            events.push((start, Event::NoteOn { channel: 1, key, velocity: 90 }));
            events.push((start + 4 * beat - beat / 4, Event::NoteOff { channel: 1, key }));
        }
        let bass = chord[0] - 24;
        for step in 0..4 {
            let time = start + step * beat;
            events.push((time, Event::NoteOn { channel: 2, key: bass, velocity: 100 }));
            events.push((time + beat / 2, Event::NoteOff { channel: 2, key: bass }));
            let drum = if step % 2 == 0 { 36 } else { 38 };
            events.push((time, Event::NoteOn { channel: 9, key: drum, velocity: 110 }));
            events.push((time + beat / 4, Event::NoteOff { channel: 9, key: drum }));
        }
        events.push((start + 2 * beat, Event::NoteOn { channel: 3, key: chord[2] + 12, velocity: 80 }));
        events.push((start + 3 * beat, Event::NoteOff { channel: 3, key: chord[2] + 12 }));
    }
    events.sort_by_key(|(time, _)| *time);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::la32::LogSample;

    #[test]
    fn test_synthetic_rom_is_valid() {
        let rom = synthetic_rom().unwrap();
        assert_eq!(rom.melodic_timbres().len(), MELODIC_TIMBRE_COUNT);
        assert_eq!(rom.rhythm_timbres().len(), DEMO_RHYTHM_TIMBRE_COUNT);
        assert_eq!(rom.pcm_waves().len(), 2);
        assert_eq!(rom.rhythm_defaults()[0].timbre, 127);
        // Key 36 is the second mapped key
        assert_eq!(rom.rhythm_defaults()[12].timbre, 65);
    }

    #[test]
    fn test_pcm_encoding_is_sign_magnitude() {
        assert_eq!(encode_pcm_sample(0.0), 0);
        assert_eq!(encode_pcm_sample(1.0), 32767);
        let negative = encode_pcm_sample(-1.0) as u16;
        assert_eq!(negative, 0xFFFF);
        // Half amplitude is one octave (4096 log units) quieter
        assert_eq!(encode_pcm_sample(0.5), 32767 - 2048);
    }

    #[test]
    fn test_full_scale_pcm_is_loud() {
        // Stored value 32767 decodes to a log value near zero
        let log = LogSample {
            log_value: ((32787 - 32767) << 1) as u16,
            sign: crate::la32::LogSign::Positive,
        };
        assert!(log.unlog() > 8000);
    }

    #[test]
    fn test_demo_sequence_is_sorted() {
        let events = demo_sequence(32000);
        assert!(events.windows(2).all(|pair| pair[0].0 <= pair[1].0));
        assert!(events.iter().any(|(_, event)| matches!(event, Event::NoteOn { channel: 9, .. })));
    }
}
