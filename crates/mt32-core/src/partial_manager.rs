//! Partial and poly allocation
//!
//! The manager owns every partial and poly and the per-part lists of
//! sounding polys. When a note needs more partials than are free it aborts
//! polys, lowest priority part first: parts 8 down to 1, then rhythm.
//! Only one poly is ever aborting; the note that caused the abort is
//! retried by the synth once it has finished.

use std::collections::VecDeque;

use crate::envelope::EnvelopeContext;
use crate::memory::{PART_COUNT, RHYTHM_PART};
use crate::partial::{Partial, PartialSetup, PartialState};
use crate::poly::{Poly, PolyState};

/// Order in which parts give up polys
const ABORT_ORDER: [usize; PART_COUNT] = [7, 6, 5, 4, 3, 2, 1, 0, RHYTHM_PART];

/// Mutable access to two distinct partials
fn pair_mut(partials: &mut [Partial], a: usize, b: usize) -> (&mut Partial, &mut Partial) {
    debug_assert_ne!(a, b);
    if a < b {
        let (low, high) = partials.split_at_mut(b);
        (&mut low[a], &mut high[0])
    } else {
        let (low, high) = partials.split_at_mut(a);
        (&mut high[0], &mut low[b])
    }
}

#[derive(Debug, Clone)]
pub struct PartialManager {
    partials: Vec<Partial>,
    polys: Vec<Poly>,
    /// Stack of unused polys
    free_polys: Vec<usize>,
    /// Sounding polys of each part, in priority order
    part_polys: [VecDeque<usize>; PART_COUNT],
    reserve: [usize; PART_COUNT],
    aborting_poly: Option<usize>,
}

impl PartialManager {
    pub fn new(partial_count: usize) -> Self {
        Self {
            partials: (0..partial_count).map(|_| Partial::new()).collect(),
            polys: (0..partial_count).map(|_| Poly::new()).collect(),
            free_polys: (0..partial_count).rev().collect(),
            part_polys: Default::default(),
            reserve: [0; PART_COUNT],
            aborting_poly: None,
        }
    }

    pub fn partial_count(&self) -> usize {
        self.partials.len()
    }

    /// Set how many partials each part may keep when others need them
    pub fn set_reserve(&mut self, settings: &[u8; PART_COUNT]) {
        for (reserve, &setting) in self.reserve.iter_mut().zip(settings) {
            *reserve = setting as usize;
        }
        let total: usize = self.reserve.iter().sum();
        if total > self.partials.len() {
            log::debug!(
                "partial reserve of {total} exceeds the {} available partials",
                self.partials.len()
            );
        }
    }

    pub fn reserve(&self) -> [usize; PART_COUNT] {
        self.reserve
    }

    pub fn free_partial_count(&self) -> usize {
        self.partials.iter().filter(|partial| !partial.is_active()).count()
    }

    /// Partials owned by a part
    pub fn active_partial_count(&self, part: usize) -> usize {
        self.part_polys[part]
            .iter()
            .map(|&poly| self.polys[poly].active_partial_count())
            .sum()
    }

    /// Partials owned by a part that have not been released
    pub fn active_non_releasing_partial_count(&self, part: usize) -> usize {
        self.part_polys[part]
            .iter()
            .map(|&poly| &self.polys[poly])
            .filter(|poly| poly.state() != PolyState::Releasing)
            .map(|poly| poly.active_partial_count())
            .sum()
    }

    pub fn is_aborting_poly(&self) -> bool {
        self.aborting_poly.is_some()
    }

    pub fn aborting_poly(&self) -> Option<usize> {
        self.aborting_poly
    }

    pub fn partial(&self, index: usize) -> Option<&Partial> {
        self.partials.get(index)
    }

    pub fn partials(&self) -> &[Partial] {
        &self.partials
    }

    pub fn poly(&self, index: usize) -> Option<&Poly> {
        self.polys.get(index)
    }

    /// Sounding polys of a part
    pub fn part_polys(&self, part: usize) -> impl Iterator<Item = &Poly> + '_ {
        self.part_polys[part].iter().map(|&poly| &self.polys[poly])
    }

    pub fn partial_states(&self) -> Vec<PartialState> {
        self.partials.iter().map(Partial::state).collect()
    }

    pub fn has_active_partials(&self) -> bool {
        self.partials.iter().any(Partial::is_active)
    }

    /// Make room for `needed` partials for `part`
    ///
    /// Returns true when enough partials are free or an abort is under
    /// way. `priority_to_first` is the part's assign mode bit 0: such a
    /// part never aborts its own or others' notes beyond its reserve.
    pub fn free_partials(&mut self, needed: usize, part: usize, priority_to_first: bool) -> bool {
        if needed == 0 || self.free_partial_count() >= needed {
            return true;
        }

        // Releasing polys of parts over their reserve go first
        while self.abort_first_releasing_poly_where_reserve_exceeded() {
            if self.is_aborting_poly() || self.free_partial_count() >= needed {
                return true;
            }
        }

        if self.active_non_releasing_partial_count(part) + needed > self.reserve[part] {
            // The new note would take the part over its reserve
            if priority_to_first {
                return false;
            }
            while self.abort_first_poly_prefer_held_where_reserve_exceeded(Some(part)) {
                if self.is_aborting_poly() || self.free_partial_count() >= needed {
                    return true;
                }
            }
            if needed > self.reserve[part] {
                return false;
            }
        } else {
            while self.abort_first_poly_prefer_held_where_reserve_exceeded(None) {
                if self.is_aborting_poly() || self.free_partial_count() >= needed {
                    return true;
                }
            }
        }

        while self.abort_first_poly_prefer_held(part) {
            if self.is_aborting_poly() || self.free_partial_count() >= needed {
                return true;
            }
        }
        false
    }

    fn abort_first_releasing_poly_where_reserve_exceeded(&mut self) -> bool {
        for part in ABORT_ORDER {
            if self.active_partial_count(part) > self.reserve[part]
                && self.abort_first_poly_in_state(part, PolyState::Releasing)
            {
                return true;
            }
        }
        false
    }

    /// Abort in parts over their reserve, stopping at `min_part`
    ///
    /// Parts are tried from lowest priority upwards; a melodic `min_part`
    /// excludes rhythm and higher priority parts.
    fn abort_first_poly_prefer_held_where_reserve_exceeded(&mut self, min_part: Option<usize>) -> bool {
        let min_part = min_part.filter(|&part| part != RHYTHM_PART);
        for part in ABORT_ORDER {
            if let Some(min_part) = min_part {
                if part == RHYTHM_PART || part < min_part {
                    break;
                }
            }
            if self.active_partial_count(part) > self.reserve[part] && self.abort_first_poly_prefer_held(part) {
                return true;
            }
        }
        false
    }

    fn start_poly_abort(&mut self, poly: usize) -> bool {
        self.polys[poly].start_abort(poly, &mut self.partials, &mut self.aborting_poly)
    }

    fn first_poly_where(&self, part: usize, predicate: impl Fn(&Poly) -> bool) -> Option<usize> {
        self.part_polys[part]
            .iter()
            .copied()
            .find(|&poly| predicate(&self.polys[poly]))
    }

    pub fn abort_first_poly_in_state(&mut self, part: usize, state: PolyState) -> bool {
        match self.first_poly_where(part, |poly| poly.state() == state) {
            Some(poly) => self.start_poly_abort(poly),
            None => false,
        }
    }

    /// Abort the oldest poly playing `key`
    pub fn abort_first_poly_with_key(&mut self, part: usize, key: u32) -> bool {
        match self.first_poly_where(part, |poly| poly.key() == key) {
            Some(poly) => self.start_poly_abort(poly),
            None => false,
        }
    }

    pub fn abort_first_poly(&mut self, part: usize) -> bool {
        match self.part_polys[part].front().copied() {
            Some(poly) => self.start_poly_abort(poly),
            None => false,
        }
    }

    pub fn abort_first_poly_prefer_held(&mut self, part: usize) -> bool {
        self.abort_first_poly_in_state(part, PolyState::Held) || self.abort_first_poly(part)
    }

    /// Take a free poly for `part`
    pub fn assign_poly_to_part(&mut self, part: usize, prepend: bool) -> Option<usize> {
        let poly = self.free_polys.pop()?;
        self.polys[poly].set_part(Some(part));
        if prepend {
            self.part_polys[part].push_front(poly);
        } else {
            self.part_polys[part].push_back(poly);
        }
        Some(poly)
    }

    fn poly_freed(&mut self, poly: usize) {
        self.polys[poly].set_part(None);
        self.free_polys.push(poly);
    }

    /// Take the first free partial for `part`
    pub fn alloc_partial(&mut self, part: usize) -> Option<usize> {
        let index = self.partials.iter().position(|partial| !partial.is_active())?;
        self.partials[index].activate(part);
        Some(index)
    }

    /// Start a poly's notes on its partials
    pub fn start_poly(
        &mut self,
        poly: usize,
        key: u32,
        velocity: u32,
        sustain: bool,
        partials: [Option<usize>; 4],
    ) {
        for &index in partials.iter().flatten() {
            self.partials[index].bind_poly(poly);
        }
        self.polys[poly].reset(key, velocity, sustain, partials);
    }

    /// Start one partial; a ring modulated slave reaches into its master's pair
    pub fn start_partial(&mut self, index: usize, setup: PartialSetup<'_>) {
        match setup.pair {
            Some(pair) if pair != index && setup.cache.structure_position == 1 => {
                let (partial, master) = pair_mut(&mut self.partials, index, pair);
                partial.start_partial(setup, Some(master.la32_pair_mut()));
            }
            _ => self.partials[index].start_partial(setup, None),
        }
    }

    /// Render one partial into the buffers and retire it when it ends
    pub fn produce_output(&mut self, index: usize, ctx: &EnvelopeContext, left: &mut [i32], right: &mut [i32]) {
        let Some(partial) = self.partials.get(index) else {
            return;
        };
        if !partial.is_active() || partial.is_ring_modulating_slave() {
            return;
        }
        let slave = partial.pair().filter(|_| partial.has_ring_modulating_slave());
        let status = match slave {
            Some(slave) => {
                let (master, slave) = pair_mut(&mut self.partials, index, slave);
                master.produce_output(Some(slave), ctx, left, right)
            }
            None => self.partials[index].produce_output(None, ctx, left, right),
        };
        if status.slave_done {
            if let Some(slave) = slave {
                self.deactivate_partial(slave);
            }
        }
        if status.master_done {
            self.deactivate_partial(index);
        }
    }

    /// Stop a partial now and update its pair, poly and part
    pub fn deactivate_partial(&mut self, index: usize) {
        let Some(partial) = self.partials.get_mut(index) else {
            return;
        };
        if !partial.is_active() {
            return;
        }
        let pair = partial.pair();
        let ring_slave = partial.is_ring_modulating_slave();
        let ring_master = partial.has_ring_modulating_slave();
        let owner = partial.owner_part();
        let poly = partial.deactivate();
        partial.clear_pair();

        if let Some(poly) = poly {
            self.partial_left_poly(poly, index, owner);
        }
        if let Some(pair) = pair {
            if ring_slave {
                self.partials[pair].deactivate_slave_generator();
            } else if ring_master {
                self.deactivate_partial(pair);
            }
            self.partials[pair].clear_pair();
        }
    }

    fn partial_left_poly(&mut self, poly: usize, partial: usize, owner: Option<usize>) {
        if !self.polys[poly].partial_deactivated(partial) {
            return;
        }
        if self.aborting_poly == Some(poly) {
            self.aborting_poly = None;
        }
        let part = owner.or(self.polys[poly].part());
        if let Some(part) = part {
            self.part_polys[part].retain(|&p| p != poly);
        }
        self.poly_freed(poly);
    }

    /// Release the first sounding poly of `key` that reacts to note off
    pub fn stop_note(&mut self, part: usize, key: u32, hold_pedal: bool) {
        for i in 0..self.part_polys[part].len() {
            let poly = self.part_polys[part][i];
            let p = &mut self.polys[poly];
            // Key 0 is used by the rhythm part to cut notes short
            if p.key() == key && (p.can_sustain() || key == 0) && p.note_off(hold_pedal && key != 0, &mut self.partials) {
                break;
            }
        }
    }

    pub fn all_notes_off(&mut self, part: usize, hold_pedal: bool) {
        for &poly in self.part_polys[part].iter() {
            let p = &mut self.polys[poly];
            if p.can_sustain() {
                p.note_off(hold_pedal, &mut self.partials);
            }
        }
    }

    pub fn all_sound_off(&mut self, part: usize) {
        for &poly in self.part_polys[part].iter() {
            self.polys[poly].start_decay(&mut self.partials);
        }
    }

    pub fn stop_pedal_hold(&mut self, part: usize) {
        for &poly in self.part_polys[part].iter() {
            self.polys[poly].stop_pedal_hold(&mut self.partials);
        }
    }

    /// Silence everything immediately
    pub fn deactivate_all(&mut self) {
        for index in 0..self.partials.len() {
            self.deactivate_partial(index);
        }
        self.aborting_poly = None;
    }
}
