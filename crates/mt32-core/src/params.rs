//! Timbre, patch and system parameter blocks
//!
//! All blocks mirror the byte layout used by the parameter memory and by
//! sysex transfers. Decoding is lenient: a short slice reads as zeros past
//! its end, so every block can be decoded from whatever the memory holds.

/// Size of the common block at the start of a timbre
pub const TIMBRE_COMMON_SIZE: usize = 14;
/// Size of one partial block within a timbre
pub const PARTIAL_PARAM_SIZE: usize = 58;
/// Size of a timbre (common block plus four partials)
pub const TIMBRE_PARAM_SIZE: usize = TIMBRE_COMMON_SIZE + 4 * PARTIAL_PARAM_SIZE;
/// Size of a patch
pub const PATCH_PARAM_SIZE: usize = 8;
/// Size of a patch temp entry (patch plus part settings)
pub const PATCH_TEMP_SIZE: usize = 16;
/// Size of a rhythm key setting
pub const RHYTHM_TEMP_SIZE: usize = 4;
/// Size of the system area
pub const SYSTEM_PARAM_SIZE: usize = 23;

/// Partial structure code to PCM usage (bit 1: first partial is PCM, bit 0: second is PCM)
pub const PARTIAL_STRUCT: [u8; 13] = [0, 0, 2, 2, 1, 3, 3, 0, 3, 0, 2, 1, 3];

/// Partial structure code to mix type
///
/// 0 mixes both partials, 1 ring modulates and adds the master, 2 ring
/// modulates only, 3 mixes with the partials panned apart.
pub const PARTIAL_MIX_STRUCT: [u8; 13] = [0, 1, 0, 1, 1, 0, 1, 3, 3, 2, 2, 2, 2];

const TIMBRE_COMMON_MAX: [u8; TIMBRE_COMMON_SIZE] =
    [127, 127, 127, 127, 127, 127, 127, 127, 127, 127, 12, 12, 15, 1];

const PARTIAL_PARAM_MAX: [u8; PARTIAL_PARAM_SIZE] = [
    // WG
    96, 100, 16, 1, 3, 127, 100, 14,
    // Pitch envelope
    10, 3, 4, 100, 100, 100, 100, 100, 100, 100, 100, 100,
    // Pitch LFO
    100, 100, 100,
    // TVF
    100, 30, 16, 127, 14, 100, 100, 4, 4, 100, 100, 100, 100, 100, 100, 100, 100, 100,
    // TVA
    100, 100, 127, 12, 127, 12, 4, 4, 100, 100, 100, 100, 100, 100, 100, 100, 100,
];

const PATCH_PARAM_MAX: [u8; PATCH_PARAM_SIZE] = [3, 63, 48, 100, 24, 3, 1, 0];

const PATCH_TEMP_MAX: [u8; PATCH_TEMP_SIZE] = [3, 63, 48, 100, 24, 3, 1, 0, 100, 14, 0, 0, 0, 0, 0, 0];

const RHYTHM_TEMP_MAX: [u8; RHYTHM_TEMP_SIZE] = [127, 100, 14, 1];

const SYSTEM_PARAM_MAX: [u8; SYSTEM_PARAM_SIZE] = [
    127, 3, 7, 7, 32, 32, 32, 32, 32, 32, 32, 32, 32, 16, 16, 16, 16, 16, 16, 16, 16, 16, 100,
];

/// Largest value allowed at `offset` within a timbre
pub fn timbre_param_max(offset: usize) -> u8 {
    if offset < TIMBRE_COMMON_SIZE {
        TIMBRE_COMMON_MAX[offset]
    } else if offset < TIMBRE_PARAM_SIZE {
        PARTIAL_PARAM_MAX[(offset - TIMBRE_COMMON_SIZE) % PARTIAL_PARAM_SIZE]
    } else {
        0
    }
}

/// Largest value allowed at `offset` within a patch
pub fn patch_param_max(offset: usize) -> u8 {
    PATCH_PARAM_MAX.get(offset).copied().unwrap_or(0)
}

/// Largest value allowed at `offset` within a patch temp entry
pub fn patch_temp_max(offset: usize) -> u8 {
    PATCH_TEMP_MAX.get(offset).copied().unwrap_or(0)
}

/// Largest value allowed at `offset` within a rhythm key setting
pub fn rhythm_temp_max(offset: usize) -> u8 {
    RHYTHM_TEMP_MAX.get(offset).copied().unwrap_or(0)
}

/// Largest value allowed at `offset` within the system area
pub fn system_param_max(offset: usize) -> u8 {
    SYSTEM_PARAM_MAX.get(offset).copied().unwrap_or(0)
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> u8 {
        let value = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        value
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        for slot in out.iter_mut() {
            *slot = self.byte();
        }
        out
    }

    fn sub(&mut self, len: usize) -> &'a [u8] {
        let start = self.pos.min(self.data.len());
        let end = (self.pos + len).min(self.data.len());
        self.pos += len;
        &self.data[start..end]
    }
}

/// Wave generator settings of a partial
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WgParam {
    pub pitch_coarse: u8,
    pub pitch_fine: u8,
    pub pitch_keyfollow: u8,
    pub pitch_bender_enabled: u8,
    /// Bit 0 selects sawtooth for synth partials; values above 1 select PCM bank 2
    pub waveform: u8,
    pub pcm_wave: u8,
    pub pulse_width: u8,
    pub pulse_width_velo_sensitivity: u8,
}

/// Pitch envelope settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PitchEnvParam {
    pub depth: u8,
    pub velo_sensitivity: u8,
    pub time_keyfollow: u8,
    pub time: [u8; 4],
    pub level: [u8; 5],
}

/// Pitch LFO settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PitchLfoParam {
    pub rate: u8,
    pub depth: u8,
    pub mod_sensitivity: u8,
}

/// Filter settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TvfParam {
    pub cutoff: u8,
    pub resonance: u8,
    pub keyfollow: u8,
    pub bias_point: u8,
    pub bias_level: u8,
    pub env_depth: u8,
    pub env_velo_sensitivity: u8,
    pub env_depth_keyfollow: u8,
    pub env_time_keyfollow: u8,
    pub env_time: [u8; 5],
    pub env_level: [u8; 4],
}

/// Amplifier settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TvaParam {
    pub level: u8,
    pub velo_sensitivity: u8,
    pub bias_point_1: u8,
    pub bias_level_1: u8,
    pub bias_point_2: u8,
    pub bias_level_2: u8,
    pub env_time_keyfollow: u8,
    pub env_time_velo_sensitivity: u8,
    pub env_time: [u8; 5],
    pub env_level: [u8; 4],
}

/// One partial of a timbre
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialParam {
    pub wg: WgParam,
    pub pitch_env: PitchEnvParam,
    pub pitch_lfo: PitchLfoParam,
    pub tvf: TvfParam,
    pub tva: TvaParam,
}

impl PartialParam {
    /// Decode a 58-byte partial block
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut r = ByteReader::new(data);
        let wg = WgParam {
            pitch_coarse: r.byte(),
            pitch_fine: r.byte(),
            pitch_keyfollow: r.byte(),
            pitch_bender_enabled: r.byte(),
            waveform: r.byte(),
            pcm_wave: r.byte(),
            pulse_width: r.byte(),
            pulse_width_velo_sensitivity: r.byte(),
        };
        let pitch_env = PitchEnvParam {
            depth: r.byte(),
            velo_sensitivity: r.byte(),
            time_keyfollow: r.byte(),
            time: r.array(),
            level: r.array(),
        };
        let pitch_lfo = PitchLfoParam {
            rate: r.byte(),
            depth: r.byte(),
            mod_sensitivity: r.byte(),
        };
        let tvf = TvfParam {
            cutoff: r.byte(),
            resonance: r.byte(),
            keyfollow: r.byte(),
            bias_point: r.byte(),
            bias_level: r.byte(),
            env_depth: r.byte(),
            env_velo_sensitivity: r.byte(),
            env_depth_keyfollow: r.byte(),
            env_time_keyfollow: r.byte(),
            env_time: r.array(),
            env_level: r.array(),
        };
        let tva = TvaParam {
            level: r.byte(),
            velo_sensitivity: r.byte(),
            bias_point_1: r.byte(),
            bias_level_1: r.byte(),
            bias_point_2: r.byte(),
            bias_level_2: r.byte(),
            env_time_keyfollow: r.byte(),
            env_time_velo_sensitivity: r.byte(),
            env_time: r.array(),
            env_level: r.array(),
        };
        Self {
            wg,
            pitch_env,
            pitch_lfo,
            tvf,
            tva,
        }
    }

    /// Encode into the 58-byte layout
    pub fn to_bytes(&self) -> [u8; PARTIAL_PARAM_SIZE] {
        let mut out = Vec::with_capacity(PARTIAL_PARAM_SIZE);
        let wg = &self.wg;
        out.extend_from_slice(&[
            wg.pitch_coarse,
            wg.pitch_fine,
            wg.pitch_keyfollow,
            wg.pitch_bender_enabled,
            wg.waveform,
            wg.pcm_wave,
            wg.pulse_width,
            wg.pulse_width_velo_sensitivity,
        ]);
        let env = &self.pitch_env;
        out.extend_from_slice(&[env.depth, env.velo_sensitivity, env.time_keyfollow]);
        out.extend_from_slice(&env.time);
        out.extend_from_slice(&env.level);
        let lfo = &self.pitch_lfo;
        out.extend_from_slice(&[lfo.rate, lfo.depth, lfo.mod_sensitivity]);
        let tvf = &self.tvf;
        out.extend_from_slice(&[
            tvf.cutoff,
            tvf.resonance,
            tvf.keyfollow,
            tvf.bias_point,
            tvf.bias_level,
            tvf.env_depth,
            tvf.env_velo_sensitivity,
            tvf.env_depth_keyfollow,
            tvf.env_time_keyfollow,
        ]);
        out.extend_from_slice(&tvf.env_time);
        out.extend_from_slice(&tvf.env_level);
        let tva = &self.tva;
        out.extend_from_slice(&[
            tva.level,
            tva.velo_sensitivity,
            tva.bias_point_1,
            tva.bias_level_1,
            tva.bias_point_2,
            tva.bias_level_2,
            tva.env_time_keyfollow,
            tva.env_time_velo_sensitivity,
        ]);
        out.extend_from_slice(&tva.env_time);
        out.extend_from_slice(&tva.env_level);

        let mut bytes = [0u8; PARTIAL_PARAM_SIZE];
        bytes.copy_from_slice(&out);
        bytes
    }
}

/// Common block of a timbre
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimbreCommon {
    pub name: [u8; 10],
    pub partial_structure_12: u8,
    pub partial_structure_34: u8,
    /// Bit n set means partial n plays
    pub partial_mute: u8,
    pub no_sustain: u8,
}

/// A complete timbre
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimbreParam {
    pub common: TimbreCommon,
    pub partials: [PartialParam; 4],
}

impl TimbreParam {
    /// Decode a 246-byte timbre
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut r = ByteReader::new(data);
        let common = TimbreCommon {
            name: r.array(),
            partial_structure_12: r.byte(),
            partial_structure_34: r.byte(),
            partial_mute: r.byte(),
            no_sustain: r.byte(),
        };
        let mut partials = [PartialParam::default(); 4];
        for partial in partials.iter_mut() {
            *partial = PartialParam::from_bytes(r.sub(PARTIAL_PARAM_SIZE));
        }
        Self { common, partials }
    }

    /// Encode into the 246-byte layout
    pub fn to_bytes(&self) -> [u8; TIMBRE_PARAM_SIZE] {
        let mut bytes = [0u8; TIMBRE_PARAM_SIZE];
        bytes[..10].copy_from_slice(&self.common.name);
        bytes[10] = self.common.partial_structure_12;
        bytes[11] = self.common.partial_structure_34;
        bytes[12] = self.common.partial_mute;
        bytes[13] = self.common.no_sustain;
        for (i, partial) in self.partials.iter().enumerate() {
            let start = TIMBRE_COMMON_SIZE + i * PARTIAL_PARAM_SIZE;
            bytes[start..start + PARTIAL_PARAM_SIZE].copy_from_slice(&partial.to_bytes());
        }
        bytes
    }

    /// Timbre name with trailing padding removed
    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.common.name)
            .trim_end_matches(['\0', ' '])
            .to_string()
    }
}

/// A patch: timbre selection and per-part playing settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchParam {
    /// 0 and 1 select ROM banks A and B, 2 memory, 3 rhythm
    pub timbre_group: u8,
    pub timbre_num: u8,
    /// 24 is no shift
    pub key_shift: u8,
    /// 50 is no detune
    pub fine_tune: u8,
    pub bender_range: u8,
    /// Bit 0: priority to earlier notes; bit 1: multi assign
    pub assign_mode: u8,
    pub reverb_switch: u8,
}

impl PatchParam {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut r = ByteReader::new(data);
        Self {
            timbre_group: r.byte(),
            timbre_num: r.byte(),
            key_shift: r.byte(),
            fine_tune: r.byte(),
            bender_range: r.byte(),
            assign_mode: r.byte(),
            reverb_switch: r.byte(),
        }
    }

    pub fn to_bytes(&self) -> [u8; PATCH_PARAM_SIZE] {
        [
            self.timbre_group,
            self.timbre_num,
            self.key_shift,
            self.fine_tune,
            self.bender_range,
            self.assign_mode,
            self.reverb_switch,
            0,
        ]
    }

    /// Index into the 256-entry timbre memory
    pub fn absolute_timbre_num(&self) -> usize {
        (self.timbre_group as usize & 3) * 64 + (self.timbre_num as usize & 63)
    }
}

/// Current settings of one part
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchTemp {
    pub patch: PatchParam,
    pub output_level: u8,
    /// 0-14, 7 is centre
    pub panpot: u8,
}

impl PatchTemp {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            patch: PatchParam::from_bytes(data),
            output_level: data.get(8).copied().unwrap_or(0),
            panpot: data.get(9).copied().unwrap_or(0),
        }
    }

    pub fn to_bytes(&self) -> [u8; PATCH_TEMP_SIZE] {
        let mut bytes = [0u8; PATCH_TEMP_SIZE];
        bytes[..PATCH_PARAM_SIZE].copy_from_slice(&self.patch.to_bytes());
        bytes[8] = self.output_level;
        bytes[9] = self.panpot;
        bytes
    }
}

/// Settings of one rhythm key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RhythmTemp {
    /// Rhythm timbre number; 127 disables the key
    pub timbre: u8,
    pub output_level: u8,
    pub panpot: u8,
    pub reverb_switch: u8,
}

impl RhythmTemp {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut r = ByteReader::new(data);
        Self {
            timbre: r.byte(),
            output_level: r.byte(),
            panpot: r.byte(),
            reverb_switch: r.byte(),
        }
    }

    pub fn to_bytes(&self) -> [u8; RHYTHM_TEMP_SIZE] {
        [self.timbre, self.output_level, self.panpot, self.reverb_switch]
    }
}

/// System area
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemParams {
    /// 64 is 440 Hz
    pub master_tune: u8,
    pub reverb_mode: u8,
    pub reverb_time: u8,
    pub reverb_level: u8,
    /// Partials reserved for parts 1-8 and rhythm
    pub reserve_settings: [u8; 9],
    /// MIDI channel of parts 1-8 and rhythm; 16 is off
    pub chan_assign: [u8; 9],
    pub master_vol: u8,
}

impl SystemParams {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut r = ByteReader::new(data);
        Self {
            master_tune: r.byte(),
            reverb_mode: r.byte(),
            reverb_time: r.byte(),
            reverb_level: r.byte(),
            reserve_settings: r.array(),
            chan_assign: r.array(),
            master_vol: r.byte(),
        }
    }

    pub fn to_bytes(&self) -> [u8; SYSTEM_PARAM_SIZE] {
        let mut bytes = [0u8; SYSTEM_PARAM_SIZE];
        bytes[0] = self.master_tune;
        bytes[1] = self.reverb_mode;
        bytes[2] = self.reverb_time;
        bytes[3] = self.reverb_level;
        bytes[4..13].copy_from_slice(&self.reserve_settings);
        bytes[13..22].copy_from_slice(&self.chan_assign);
        bytes[22] = self.master_vol;
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_partial() -> PartialParam {
        let mut partial = PartialParam::default();
        partial.wg.pitch_coarse = 36;
        partial.wg.pitch_fine = 50;
        partial.wg.pcm_wave = 77;
        partial.pitch_env.level = [50, 51, 52, 53, 54];
        partial.tvf.cutoff = 100;
        partial.tvf.env_time = [1, 2, 3, 4, 5];
        partial.tva.level = 100;
        partial.tva.env_level = [100, 90, 80, 70];
        partial
    }

    #[test]
    fn test_partial_layout_offsets() {
        let bytes = sample_partial().to_bytes();
        assert_eq!(bytes[0], 36);
        assert_eq!(bytes[5], 77);
        assert_eq!(&bytes[15..20], &[50, 51, 52, 53, 54]);
        assert_eq!(bytes[23], 100);
        assert_eq!(&bytes[32..37], &[1, 2, 3, 4, 5]);
        assert_eq!(bytes[41], 100);
        assert_eq!(&bytes[54..58], &[100, 90, 80, 70]);
        assert_eq!(PartialParam::from_bytes(&bytes), sample_partial());
    }

    #[test]
    fn test_timbre_decode_places_partials() {
        let mut timbre = TimbreParam::default();
        timbre.common.name = *b"Square    ";
        timbre.common.partial_mute = 0b0001;
        timbre.partials[2] = sample_partial();
        let bytes = timbre.to_bytes();
        assert_eq!(bytes[TIMBRE_COMMON_SIZE + 2 * PARTIAL_PARAM_SIZE], 36);

        let decoded = TimbreParam::from_bytes(&bytes);
        assert_eq!(decoded, timbre);
        assert_eq!(decoded.name(), "Square");
    }

    #[test]
    fn test_short_slice_reads_zeros() {
        let patch = PatchParam::from_bytes(&[1, 2]);
        assert_eq!(patch.timbre_group, 1);
        assert_eq!(patch.timbre_num, 2);
        assert_eq!(patch.key_shift, 0);
    }

    #[test]
    fn test_max_tables() {
        assert_eq!(timbre_param_max(10), 12);
        // TVF resonance of the third partial
        assert_eq!(timbre_param_max(TIMBRE_COMMON_SIZE + 2 * PARTIAL_PARAM_SIZE + 24), 30);
        assert_eq!(timbre_param_max(TIMBRE_PARAM_SIZE), 0);
        assert_eq!(patch_temp_max(9), 14);
        assert_eq!(system_param_max(22), 100);
        assert_eq!(rhythm_temp_max(0), 127);
    }

    #[test]
    fn test_absolute_timbre_num() {
        let patch = PatchParam {
            timbre_group: 2,
            timbre_num: 5,
            ..Default::default()
        };
        assert_eq!(patch.absolute_timbre_num(), 133);
    }

    #[test]
    fn test_system_layout() {
        let system = SystemParams {
            master_tune: 64,
            reserve_settings: [3, 10, 6, 4, 3, 0, 0, 0, 6],
            chan_assign: [1, 2, 3, 4, 5, 6, 7, 8, 9],
            master_vol: 100,
            ..Default::default()
        };
        let bytes = system.to_bytes();
        assert_eq!(bytes[4], 3);
        assert_eq!(bytes[13], 1);
        assert_eq!(SystemParams::from_bytes(&bytes), system);
    }
}
