//! Per-part cache of decoded timbre settings
//!
//! Notes are started from a cached breakdown of the timbre rather than the
//! raw parameter bytes. The cache is rebuilt lazily on the first note after
//! the timbre or patch changes. Each started partial copies its slot, so
//! rebuilding never affects sounding notes.

use crate::params::{PartialParam, TimbreParam, PARTIAL_MIX_STRUCT, PARTIAL_STRUCT};

/// Cached settings for one partial slot of a timbre
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchCache {
    /// Slot is unmuted
    pub play_partial: bool,
    /// Slot plays a PCM wave rather than a synth wave
    pub pcm_partial: bool,
    pub pcm: u8,
    pub waveform: u8,
    /// Mix type of the slot's pair (see [`PARTIAL_MIX_STRUCT`])
    pub structure_mix: u8,
    /// 0 for the first partial of a pair, 1 for the second
    pub structure_position: u8,
    /// Slot index of the other partial of the pair
    pub structure_pair: usize,
    /// Number of unmuted slots in the timbre
    pub partial_count: usize,
    pub sustain: bool,
    pub reverb: bool,
    pub partial_param: PartialParam,
}

/// The four slots of a cached timbre
#[derive(Debug, Clone, Default)]
pub struct TimbreCache {
    slots: [PatchCache; 4],
    dirty: bool,
}

impl TimbreCache {
    /// An empty cache that rebuilds on first use
    pub fn new() -> Self {
        Self {
            slots: [PatchCache::default(); 4],
            dirty: true,
        }
    }

    /// Rebuild from a timbre
    pub fn rebuild(&mut self, timbre: &TimbreParam, reverb: bool) {
        let common = &timbre.common;
        let structure_12 = (common.partial_structure_12 as usize).min(PARTIAL_STRUCT.len() - 1);
        let structure_34 = (common.partial_structure_34 as usize).min(PARTIAL_STRUCT.len() - 1);

        let mut partial_count = 0;
        for (t, slot) in self.slots.iter_mut().enumerate() {
            *slot = PatchCache::default();
            if (common.partial_mute >> t) & 1 == 0 {
                continue;
            }
            partial_count += 1;

            let structure = if t < 2 { structure_12 } else { structure_34 };
            let position = (t & 1) as u8;
            // First partial of a pair uses bit 1, second uses bit 0
            let pcm_bit = if position == 0 { 0x2 } else { 0x1 };

            let param = timbre.partials[t];
            slot.play_partial = true;
            slot.pcm_partial = PARTIAL_STRUCT[structure] & pcm_bit != 0;
            slot.pcm = param.wg.pcm_wave;
            slot.waveform = param.wg.waveform;
            slot.structure_mix = PARTIAL_MIX_STRUCT[structure];
            slot.structure_position = position;
            slot.structure_pair = t ^ 1;
            slot.partial_param = param;
        }

        for slot in self.slots.iter_mut() {
            slot.partial_count = partial_count;
            slot.sustain = common.no_sustain == 0;
            slot.reverb = reverb;
        }
        self.dirty = false;
    }

    /// Force a rebuild before the next note
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn slots(&self) -> &[PatchCache; 4] {
        &self.slots
    }

    /// Number of partials a note of this timbre needs
    pub fn partial_count(&self) -> usize {
        self.slots[0].partial_count
    }

    /// Whether notes of this timbre hold until note off
    pub fn sustain(&self) -> bool {
        self.slots[0].sustain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timbre(structure_12: u8, structure_34: u8, mute: u8) -> TimbreParam {
        let mut timbre = TimbreParam::default();
        timbre.common.partial_structure_12 = structure_12;
        timbre.common.partial_structure_34 = structure_34;
        timbre.common.partial_mute = mute;
        for (i, partial) in timbre.partials.iter_mut().enumerate() {
            partial.wg.pcm_wave = i as u8 * 10;
        }
        timbre
    }

    #[test]
    fn test_new_cache_is_dirty() {
        let cache = TimbreCache::new();
        assert!(cache.is_dirty());
        assert_eq!(cache.partial_count(), 0);
    }

    #[test]
    fn test_structure_breakdown() {
        let mut cache = TimbreCache::new();
        // Structure 2 (PCM + synth), structure 9 (synth ring synth, no mix)
        cache.rebuild(&timbre(2, 9, 0b1111), true);
        assert!(!cache.is_dirty());
        assert_eq!(cache.partial_count(), 4);

        let slots = cache.slots();
        assert!(slots[0].pcm_partial);
        assert!(!slots[1].pcm_partial);
        assert_eq!(slots[0].structure_mix, 0);
        assert_eq!(slots[2].structure_mix, 2);
        assert_eq!(slots[3].structure_position, 1);
        assert_eq!(slots[3].structure_pair, 2);
        assert_eq!(slots[1].structure_pair, 0);
        assert_eq!(slots[2].pcm, 20);
        assert!(slots.iter().all(|slot| slot.reverb));
    }

    #[test]
    fn test_muted_slots_do_not_play() {
        let mut cache = TimbreCache::new();
        cache.rebuild(&timbre(0, 0, 0b0101), false);
        let slots = cache.slots();
        assert_eq!(cache.partial_count(), 2);
        assert!(slots[0].play_partial);
        assert!(!slots[1].play_partial);
        assert!(slots[2].play_partial);
    }

    #[test]
    fn test_no_sustain_flag() {
        let mut t = timbre(0, 0, 1);
        t.common.no_sustain = 1;
        let mut cache = TimbreCache::new();
        cache.rebuild(&t, false);
        assert!(!cache.sustain());
        cache.mark_dirty();
        assert!(cache.is_dirty());
    }
}
