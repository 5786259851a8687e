//! Pair of LA32 wave generators
//!
//! Two partials share one pair. The master is always present; the slave may
//! be mixed in linearly or ring modulated with the master.

use super::log_sample::unlog;
use super::wave_generator::{PcmSource, WaveGenerator};

/// Which generator of the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairSlot {
    Master,
    Slave,
}

/// Master and slave generators plus their combination mode
#[derive(Clone, Debug, Default)]
pub struct PartialPair {
    master: WaveGenerator,
    slave: WaveGenerator,
    ring_modulated: bool,
    mixed: bool,
}

/// Keeps the low 14 bits, sign extended from bit 13, like the chip's multiplier input
#[inline]
fn distorted(sample: i16) -> i32 {
    if sample & 0x2000 == 0 {
        (sample & 0x1FFF) as i32
    } else {
        (sample | !0x1FFF) as i32
    }
}

impl PartialPair {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the combination mode for the next note
    pub fn init(&mut self, ring_modulated: bool, mixed: bool) {
        self.ring_modulated = ring_modulated;
        self.mixed = mixed;
    }

    pub fn init_synth(&mut self, slot: PairSlot, sawtooth: bool, pulse_width: u8, resonance: u8) {
        self.generator_mut(slot)
            .init_synth(sawtooth, pulse_width, resonance);
    }

    /// Start PCM playback; ring modulated slaves skip interpolation
    pub fn init_pcm(&mut self, slot: PairSlot, source: PcmSource, interpolated: bool) {
        let interpolated = match slot {
            PairSlot::Master => interpolated,
            PairSlot::Slave => interpolated && !self.ring_modulated,
        };
        self.generator_mut(slot).init_pcm(source, interpolated);
    }

    pub fn generate_next_sample(&mut self, slot: PairSlot, amp: u32, pitch: u16, cutoff: u32) {
        self.generator_mut(slot)
            .generate_next_sample(amp, pitch, cutoff);
    }

    pub fn deactivate(&mut self, slot: PairSlot) {
        self.generator_mut(slot).deactivate();
    }

    pub fn is_active(&self, slot: PairSlot) -> bool {
        self.generator(slot).is_active()
    }

    /// Combine both generators into one linear sample
    pub fn next_out_sample(&self) -> i16 {
        if !self.ring_modulated {
            return unlog_and_mix(&self.master).wrapping_add(unlog_and_mix(&self.slave));
        }

        let master_sample = unlog_and_mix(&self.master);
        let slave_sample = if self.slave.is_pcm_wave() {
            unlog(self.slave.output_log_sample(true))
        } else {
            unlog_and_mix(&self.slave)
        };
        let ring = ((distorted(master_sample) * distorted(slave_sample)) >> 13) as i16;
        if self.mixed {
            master_sample.wrapping_add(ring)
        } else {
            ring
        }
    }

    fn generator(&self, slot: PairSlot) -> &WaveGenerator {
        match slot {
            PairSlot::Master => &self.master,
            PairSlot::Slave => &self.slave,
        }
    }

    fn generator_mut(&mut self, slot: PairSlot) -> &mut WaveGenerator {
        match slot {
            PairSlot::Master => &mut self.master,
            PairSlot::Slave => &mut self.slave,
        }
    }
}

fn unlog_and_mix(generator: &WaveGenerator) -> i16 {
    if !generator.is_active() {
        return 0;
    }
    let first = unlog(generator.output_log_sample(true));
    let second = unlog(generator.output_log_sample(false));
    if generator.is_pcm_wave() {
        let delta = second as i32 - first as i32;
        (first as i32 + ((delta * generator.pcm_interpolation_factor() as i32) >> 7)) as i16
    } else {
        first.wrapping_add(second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn constant_pcm(value: i16) -> PcmSource {
        PcmSource {
            data: Arc::from(vec![value; 32]),
            start: 0,
            length: 32,
            looped: true,
        }
    }

    #[test]
    fn test_distortion_keeps_14_bits() {
        assert_eq!(distorted(0x1FFF), 0x1FFF);
        assert_eq!(distorted(0x2000), -0x2000);
        assert_eq!(distorted(-1), -1);
        assert_eq!(distorted(0x4001), 1);
    }

    #[test]
    fn test_idle_pair_is_silent() {
        let pair = PartialPair::new();
        assert_eq!(pair.next_out_sample(), 0);
    }

    #[test]
    fn test_ring_modulation_with_inactive_slave_is_silent() {
        let mut pair = PartialPair::new();
        pair.init(true, false);
        pair.init_pcm(PairSlot::Master, constant_pcm(0x7000), true);
        pair.generate_next_sample(PairSlot::Master, 0, 5 * 4096, 0);
        assert_ne!(unlog_and_mix(&pair.master), 0);
        assert_eq!(pair.next_out_sample(), 0);
    }

    #[test]
    fn test_ring_mix_adds_master() {
        let mut pair = PartialPair::new();
        pair.init(true, true);
        pair.init_pcm(PairSlot::Master, constant_pcm(0x7000), true);
        pair.generate_next_sample(PairSlot::Master, 0, 5 * 4096, 0);
        assert_eq!(pair.next_out_sample(), unlog_and_mix(&pair.master));
    }

    #[test]
    fn test_mixed_pair_sums_generators() {
        let mut pair = PartialPair::new();
        pair.init(false, false);
        pair.init_pcm(PairSlot::Master, constant_pcm(0x6000), true);
        // Sign bit set, same magnitude
        pair.init_pcm(PairSlot::Slave, constant_pcm((0x6000u16 | 0x8000) as i16), true);
        pair.generate_next_sample(PairSlot::Master, 0, 5 * 4096, 0);
        pair.generate_next_sample(PairSlot::Slave, 0, 5 * 4096, 0);
        assert_eq!(pair.next_out_sample(), 0);
    }
}
