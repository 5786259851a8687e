//! Poly: one sounding note
//!
//! Polys refer to their partials by index into the synth's partial table
//! and are recycled through the partial manager once every partial is gone.

use crate::partial::Partial;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyState {
    Playing,
    /// Note off arrived while the hold pedal was down
    Held,
    Releasing,
    Inactive,
}

#[derive(Debug, Clone)]
pub struct Poly {
    part: Option<usize>,
    key: u32,
    velocity: u32,
    sustain: bool,
    state: PolyState,
    partials: [Option<usize>; 4],
    active_partial_count: usize,
}

impl Default for Poly {
    fn default() -> Self {
        Self::new()
    }
}

impl Poly {
    pub fn new() -> Self {
        Self {
            part: None,
            key: 255,
            velocity: 255,
            sustain: false,
            state: PolyState::Inactive,
            partials: [None; 4],
            active_partial_count: 0,
        }
    }

    pub fn set_part(&mut self, part: Option<usize>) {
        self.part = part;
    }

    pub fn part(&self) -> Option<usize> {
        self.part
    }

    /// Start a new note on the given partials
    pub fn reset(&mut self, key: u32, velocity: u32, sustain: bool, partials: [Option<usize>; 4]) {
        debug_assert!(!self.is_active(), "poly for key {} reset while still active", self.key);
        self.key = key;
        self.velocity = velocity;
        self.sustain = sustain;
        self.partials = partials;
        self.active_partial_count = partials.iter().flatten().count();
        self.state = if self.active_partial_count > 0 {
            PolyState::Playing
        } else {
            PolyState::Inactive
        };
    }

    /// Handle note off; returns whether the note reacted
    pub fn note_off(&mut self, pedal_held: bool, partials: &mut [Partial]) -> bool {
        if matches!(self.state, PolyState::Inactive | PolyState::Releasing) {
            return false;
        }
        if pedal_held {
            if self.state == PolyState::Held {
                return false;
            }
            self.state = PolyState::Held;
        } else {
            self.start_decay(partials);
        }
        true
    }

    /// Release a note that was held by the pedal
    pub fn stop_pedal_hold(&mut self, partials: &mut [Partial]) -> bool {
        if self.state != PolyState::Held {
            return false;
        }
        self.start_decay(partials)
    }

    pub fn start_decay(&mut self, partials: &mut [Partial]) -> bool {
        if matches!(self.state, PolyState::Inactive | PolyState::Releasing) {
            return false;
        }
        self.state = PolyState::Releasing;
        for &index in self.partials.iter().flatten() {
            if let Some(partial) = partials.get_mut(index) {
                partial.start_decay_all();
            }
        }
        true
    }

    /// Fade the note out as fast as possible
    ///
    /// Only one poly may be aborting at a time; `aborting_poly` records it
    /// until the last partial is gone.
    pub fn start_abort(
        &mut self,
        index: usize,
        partials: &mut [Partial],
        aborting_poly: &mut Option<usize>,
    ) -> bool {
        if self.state == PolyState::Inactive || aborting_poly.is_some() {
            return false;
        }
        for &partial in self.partials.iter().flatten() {
            if let Some(partial) = partials.get_mut(partial) {
                partial.start_abort();
            }
        }
        *aborting_poly = Some(index);
        true
    }

    /// Drop a finished partial; returns true when the poly became inactive
    pub fn partial_deactivated(&mut self, partial: usize) -> bool {
        for slot in self.partials.iter_mut() {
            if *slot == Some(partial) {
                *slot = None;
                self.active_partial_count -= 1;
            }
        }
        if self.active_partial_count == 0 && self.state != PolyState::Inactive {
            self.state = PolyState::Inactive;
            return true;
        }
        false
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    pub fn velocity(&self) -> u32 {
        self.velocity
    }

    pub fn can_sustain(&self) -> bool {
        self.sustain
    }

    pub fn state(&self) -> PolyState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != PolyState::Inactive
    }

    pub fn active_partial_count(&self) -> usize {
        self.active_partial_count
    }

    pub fn partials(&self) -> impl Iterator<Item = usize> + '_ {
        self.partials.iter().flatten().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing_poly() -> (Poly, Vec<Partial>) {
        let mut partials = vec![Partial::new(), Partial::new(), Partial::new()];
        for partial in partials.iter_mut() {
            partial.activate(0);
        }
        let mut poly = Poly::new();
        poly.reset(60, 100, true, [Some(0), None, Some(2), None]);
        (poly, partials)
    }

    #[test]
    fn test_reset_counts_partials() {
        let (poly, _) = playing_poly();
        assert_eq!(poly.state(), PolyState::Playing);
        assert_eq!(poly.active_partial_count(), 2);
        assert_eq!(poly.partials().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn test_pedal_holds_note_off() {
        let (mut poly, mut partials) = playing_poly();
        assert!(poly.note_off(true, &mut partials));
        assert_eq!(poly.state(), PolyState::Held);
        assert!(!poly.note_off(true, &mut partials));
        assert!(poly.stop_pedal_hold(&mut partials));
        assert_eq!(poly.state(), PolyState::Releasing);
        assert!(!poly.note_off(false, &mut partials));
    }

    #[test]
    fn test_only_one_abort_at_a_time() {
        let (mut first, mut partials) = playing_poly();
        let (mut second, _) = playing_poly();
        let mut aborting = None;
        assert!(first.start_abort(4, &mut partials, &mut aborting));
        assert_eq!(aborting, Some(4));
        assert!(!second.start_abort(5, &mut partials, &mut aborting));
    }

    #[test]
    fn test_last_partial_deactivates_poly() {
        let (mut poly, _) = playing_poly();
        assert!(!poly.partial_deactivated(0));
        assert!(poly.is_active());
        assert!(poly.partial_deactivated(2));
        assert_eq!(poly.state(), PolyState::Inactive);
        // Unknown partials are ignored
        assert!(!poly.partial_deactivated(7));
    }

    #[test]
    fn test_reset_after_last_partial_reuses_poly() {
        let (mut poly, _) = playing_poly();
        poly.partial_deactivated(0);
        poly.partial_deactivated(2);
        poly.reset(64, 90, false, [None, Some(1), None, None]);
        assert_eq!(poly.key(), 64);
        assert_eq!(poly.state(), PolyState::Playing);
        assert_eq!(poly.partials().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "reset while still active")]
    fn test_reset_of_sounding_poly_is_rejected() {
        let (mut poly, _) = playing_poly();
        poly.reset(64, 90, true, [Some(1), None, None, None]);
    }
}
