//! Partial: one physical synthesis unit
//!
//! A partial combines a wave generator slot with its TVA, TVP and TVF.
//! Partials are paired according to the timbre structure; a ring modulated
//! slave has no output of its own and is rendered by its master.

use crate::envelope::{EnvelopeContext, NoteInfo, Tva, TvaPhase, Tvf, Tvp};
use crate::la32::{PairSlot, PartialPair, PcmSource};
use crate::params::PatchParam;
use crate::patch_cache::PatchCache;
use crate::rom::{ControlRom, PcmWaveEntry, RomFeatures};
use crate::tables::Tables;

/// Pan factors for the 15 pan positions; 8192 is unity
const PAN_FACTORS: [i32; 15] = {
    let mut factors = [0i32; 15];
    let mut i = 0;
    while i < factors.len() {
        factors[i] = ((i as i32 * 8192) + 7) / 14;
        i += 1;
    }
    factors
};

/// Pan of the first partial when a structure splits its pair across the stereo field
const PAN_NUMERATOR_MASTER: [u8; 15] = [0, 0, 0, 0, 0, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7];
/// Pan of the second partial when a structure splits its pair across the stereo field
const PAN_NUMERATOR_SLAVE: [u8; 15] = [0, 1, 2, 3, 4, 5, 6, 7, 7, 7, 7, 7, 7, 7, 7];

/// Externally visible state of a partial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialState {
    Inactive,
    Attack,
    Sustain,
    Release,
}

/// Outcome of rendering a partial
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStatus {
    /// The partial finished and must be deactivated
    pub master_done: bool,
    /// The ring modulated slave finished and must be deactivated
    pub slave_done: bool,
}

/// Everything a partial needs to start sounding
#[derive(Debug, Clone, Copy)]
pub struct PartialSetup<'a> {
    pub poly: usize,
    pub note: NoteInfo,
    pub cache: &'a PatchCache,
    /// Partial index of the other half of the pair, if it plays
    pub pair: Option<usize>,
    /// Rhythm key index when started by the rhythm part
    pub rhythm_key: Option<usize>,
    /// Pan position, 0-14
    pub panpot: u8,
    pub patch: &'a PatchParam,
    pub rom: &'a ControlRom,
    pub ctx: &'a EnvelopeContext,
    pub reversed_stereo: bool,
}

#[derive(Clone, Debug)]
pub struct Partial {
    owner_part: Option<usize>,
    poly: Option<usize>,
    pair: Option<usize>,
    rhythm_key: Option<usize>,

    mix_type: u8,
    structure_position: u8,
    pcm_wave: Option<PcmWaveEntry>,
    left_pan: i32,
    right_pan: i32,

    la32_pair: PartialPair,
    tva: Tva,
    tvp: Tvp,
    tvf: Tvf,
}

impl Default for Partial {
    fn default() -> Self {
        Self::new()
    }
}

impl Partial {
    pub fn new() -> Self {
        Self {
            owner_part: None,
            poly: None,
            pair: None,
            rhythm_key: None,
            mix_type: 0,
            structure_position: 0,
            pcm_wave: None,
            left_pan: PAN_FACTORS[7],
            right_pan: PAN_FACTORS[7],
            la32_pair: PartialPair::new(),
            tva: Tva::new(),
            tvp: Tvp::new(),
            tvf: Tvf::new(),
        }
    }

    /// Reserve the partial for a part
    pub fn activate(&mut self, part: usize) {
        self.owner_part = Some(part);
    }

    /// Attach to the poly that will own the note
    pub fn bind_poly(&mut self, poly: usize) {
        self.poly = Some(poly);
    }

    pub fn is_active(&self) -> bool {
        self.owner_part.is_some()
    }

    pub fn owner_part(&self) -> Option<usize> {
        self.owner_part
    }

    pub fn poly(&self) -> Option<usize> {
        self.poly
    }

    pub fn pair(&self) -> Option<usize> {
        self.pair
    }

    pub fn rhythm_key(&self) -> Option<usize> {
        self.rhythm_key
    }

    pub fn is_pcm(&self) -> bool {
        self.pcm_wave.is_some()
    }

    /// Forget the pair partner after it was deactivated
    pub fn clear_pair(&mut self) {
        self.pair = None;
    }

    pub fn has_ring_modulating_slave(&self) -> bool {
        self.pair.is_some() && self.structure_position == 0 && (self.mix_type == 1 || self.mix_type == 2)
    }

    pub fn is_ring_modulating_slave(&self) -> bool {
        self.pair.is_some() && self.structure_position == 1 && (self.mix_type == 1 || self.mix_type == 2)
    }

    pub fn is_ring_modulating_no_mix(&self) -> bool {
        self.pair.is_some()
            && ((self.structure_position == 1 && self.mix_type == 1) || self.mix_type == 2)
    }

    /// Start the note
    ///
    /// A ring modulated slave initialises its generator in the master's
    /// pair, which the caller passes as `master_pair`.
    pub fn start_partial(&mut self, setup: PartialSetup<'_>, master_pair: Option<&mut PartialPair>) {
        let cache = setup.cache;
        let features = setup.rom.features();
        self.poly = Some(setup.poly);
        self.rhythm_key = setup.rhythm_key;
        self.mix_type = cache.structure_mix;
        self.structure_position = cache.structure_position;
        self.pair = setup.pair;

        let mut panpot = setup.panpot.min(14);
        if self.mix_type == 3 {
            // Split the pair across the stereo field and mix independently
            panpot = if self.structure_position == 0 {
                PAN_NUMERATOR_MASTER[panpot as usize] << 1
            } else {
                PAN_NUMERATOR_SLAVE[panpot as usize] << 1
            };
            self.mix_type = 0;
            self.pair = None;
        }
        let left = if setup.reversed_stereo { 14 - panpot } else { panpot };
        self.left_pan = PAN_FACTORS[left as usize];
        self.right_pan = PAN_FACTORS[14 - left as usize];

        self.pcm_wave = if cache.pcm_partial {
            let mut pcm_num = cache.pcm as usize;
            if setup.rom.pcm_waves().len() > 128 && cache.waveform > 1 {
                // Second PCM bank
                pcm_num += 128;
            }
            let wave = setup.rom.pcm_wave(pcm_num).copied();
            if wave.is_none() {
                log::warn!("PCM wave {pcm_num} missing from ROM, playing a synth wave instead");
            }
            wave
        } else {
            None
        };

        let velocity = setup.note.velocity as i32;
        let param = &cache.partial_param;
        let pulse_width = (velocity - 64) * (param.wg.pulse_width_velo_sensitivity as i32 - 7)
            + Tables::get().pulse_width_100_to_255[(param.wg.pulse_width as usize).min(100)] as i32;
        let pulse_width = pulse_width.clamp(0, 255) as u8;

        let ignore_volumes =
            features.contains(RomFeatures::RING_MODULATION_NO_MIX) && self.is_ring_modulating_no_mix();
        self.tva.reset(param, setup.note, ignore_volumes, setup.ctx);
        self.tvp.reset(param, setup.note, setup.patch, self.pcm_wave.as_ref(), features);
        self.tvf.reset(
            param,
            setup.note,
            self.tvp.base_pitch(),
            features.contains(RomFeatures::TVF_BASE_CUTOFF_LIMIT),
        );

        let (slot, target_pair) = match master_pair {
            Some(master_pair) if self.is_ring_modulating_slave() => (PairSlot::Slave, master_pair),
            _ => {
                let ring = self.has_ring_modulating_slave();
                self.la32_pair.init(ring, self.mix_type == 1);
                (PairSlot::Master, &mut self.la32_pair)
            }
        };
        match &self.pcm_wave {
            Some(wave) => {
                let source = PcmSource {
                    data: setup.rom.pcm_samples().clone(),
                    start: wave.start,
                    length: wave.length,
                    looped: wave.looped,
                };
                target_pair.init_pcm(slot, source, true);
            }
            None => {
                target_pair.init_synth(
                    slot,
                    cache.waveform & 1 != 0,
                    pulse_width,
                    param.tvf.resonance + 1,
                );
            }
        }
        if !self.has_ring_modulating_slave() {
            self.la32_pair.deactivate(PairSlot::Slave);
        }
    }

    /// Render into the accumulation buffers
    ///
    /// `slave` is the ring modulated slave when this partial has one.
    /// Ring modulated slaves render nothing themselves.
    pub fn produce_output(
        &mut self,
        mut slave: Option<&mut Partial>,
        ctx: &EnvelopeContext,
        left: &mut [i32],
        right: &mut [i32],
    ) -> OutputStatus {
        let mut status = OutputStatus::default();
        if !self.is_active() || self.poly.is_none() || self.is_ring_modulating_slave() {
            return status;
        }
        if !self.has_ring_modulating_slave() {
            slave = None;
        }

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            if !self.tva.is_playing() || !self.la32_pair.is_active(PairSlot::Master) {
                status.master_done = true;
                break;
            }
            let (amp, pitch, cutoff) = self.next_envelope_values(ctx);
            self.la32_pair.generate_next_sample(PairSlot::Master, amp, pitch, cutoff);

            if let Some(partner) = slave.as_deref_mut() {
                let (amp, pitch, cutoff) = partner.next_envelope_values(ctx);
                self.la32_pair.generate_next_sample(PairSlot::Slave, amp, pitch, cutoff);
                if !partner.tva.is_playing() || !self.la32_pair.is_active(PairSlot::Slave) {
                    status.slave_done = true;
                    slave = None;
                    if self.mix_type == 2 {
                        status.master_done = true;
                        break;
                    }
                }
            }

            let sample = self.la32_pair.next_out_sample() as i32;
            *l += (sample * self.left_pan) >> 13;
            *r += (sample * self.right_pan) >> 13;
        }
        status
    }

    fn next_envelope_values(&mut self, ctx: &EnvelopeContext) -> (u32, u16, u32) {
        let amp = self.tva.next_amp(ctx);
        let (pitch, pitch_updated) = self.tvp.next_pitch(ctx);
        if pitch_updated {
            self.tva.recalc_sustain(ctx);
        }
        let cutoff = if self.is_pcm() { 0 } else { self.tvf.next_cutoff() };
        (amp, pitch, cutoff)
    }

    /// Release the note
    pub fn start_decay_all(&mut self) {
        self.tva.start_decay();
        self.tvp.start_decay();
        self.tvf.start_decay();
    }

    /// Fade out quickly so the partial can be reused
    pub fn start_abort(&mut self) {
        self.tva.start_abort();
    }

    /// Silence and release ownership; returns the former poly
    ///
    /// Pair and poly bookkeeping is left to the caller.
    pub fn deactivate(&mut self) -> Option<usize> {
        if !self.is_active() {
            return None;
        }
        self.owner_part = None;
        self.la32_pair.deactivate(PairSlot::Master);
        self.la32_pair.deactivate(PairSlot::Slave);
        self.rhythm_key = None;
        self.poly.take()
    }

    /// Silence the slave generator of this partial's pair
    pub fn deactivate_slave_generator(&mut self) {
        self.la32_pair.deactivate(PairSlot::Slave);
    }

    pub fn la32_pair_mut(&mut self) -> &mut PartialPair {
        &mut self.la32_pair
    }

    pub fn state(&self) -> PartialState {
        if !self.is_active() {
            return PartialState::Inactive;
        }
        match self.tva.phase() {
            TvaPhase::Sustain => PartialState::Sustain,
            TvaPhase::Release | TvaPhase::Dead => PartialState::Release,
            _ => PartialState::Attack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pan_factors() {
        assert_eq!(PAN_FACTORS[0], 0);
        assert_eq!(PAN_FACTORS[7], 4096);
        assert_eq!(PAN_FACTORS[14], 8192);
        assert_eq!(PAN_FACTORS[1], 585);
    }

    #[test]
    fn test_split_pan_numerators_stay_in_range() {
        for pan in 0..15 {
            assert!((PAN_NUMERATOR_MASTER[pan] << 1) <= 14);
            assert!((PAN_NUMERATOR_SLAVE[pan] << 1) <= 14);
        }
    }

    #[test]
    fn test_new_partial_is_inactive() {
        let mut partial = Partial::new();
        assert_eq!(partial.state(), PartialState::Inactive);
        assert!(!partial.has_ring_modulating_slave());
        assert_eq!(partial.deactivate(), None);

        partial.activate(3);
        assert!(partial.is_active());
        assert_eq!(partial.owner_part(), Some(3));
    }

    #[test]
    fn test_unstarted_partial_produces_nothing() {
        let mut partial = Partial::new();
        partial.activate(0);
        let mut left = [0i32; 16];
        let mut right = [0i32; 16];
        let status = partial.produce_output(None, &EnvelopeContext::default(), &mut left, &mut right);
        assert_eq!(status, OutputStatus::default());
        assert!(left.iter().all(|&s| s == 0));
    }
}
