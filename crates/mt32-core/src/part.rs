//! Parts: the eight melodic parts and the rhythm part
//!
//! A part turns channel messages into polys. Melodic parts play the timbre
//! in their timbre temp area with the patch temp settings; the rhythm part
//! maps each key to its own rhythm temp entry and timbre.

use crate::envelope::{EnvelopeContext, NoteInfo};
use crate::memory::{ParameterMemory, RHYTHM_PART};
use crate::params::{PatchTemp, RhythmTemp, TimbreParam};
use crate::partial::PartialSetup;
use crate::partial_manager::PartialManager;
use crate::patch_cache::TimbreCache;
use crate::rom::{ControlRom, RomFeatures, MELODIC_TIMBRE_COUNT, RHYTHM_KEY_COUNT};

/// Lowest key the rhythm part plays
pub const RHYTHM_FIRST_KEY: u8 = 24;
/// Highest key the rhythm part plays
pub const RHYTHM_LAST_KEY: u8 = 108;

/// Drum timbre that releases key 0 and plays as key 1
const DRUM_TIMBRE_OPEN_KEY_1: u8 = 64 + 6;
/// Drum timbre that releases key 0 and plays as key 0
const DRUM_TIMBRE_OPEN_KEY_0: u8 = 64 + 7;
/// Drum timbre that disables a key
const DRUM_TIMBRE_OFF: u8 = 127;

/// Bender range scale: 683 pitch units per semitone over the 14-bit bend range
const BENDER_RANGE_MULT: i32 = 683;

const RPN_NONE: u16 = 0x3FFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    Melodic,
    Rhythm,
}

/// Shared state a part reaches while starting or stopping notes
pub struct PlayContext<'a> {
    pub memory: &'a mut ParameterMemory,
    pub rom: &'a ControlRom,
    pub manager: &'a mut PartialManager,
    /// System level envelope state; part fields are filled in per note
    pub system: &'a EnvelopeContext,
    pub reversed_stereo: bool,
}

#[derive(Debug, Clone)]
pub struct Part {
    number: usize,
    kind: PartKind,
    /// One cache for a melodic part, one per key for rhythm
    caches: Vec<TimbreCache>,
    hold_pedal: bool,
    expression: u8,
    modulation: u8,
    pitch_bend: i32,
    pitch_bender_range: i32,
    rpn: u16,
    current_timbre: String,
}

impl Part {
    pub fn new(number: usize) -> Self {
        let kind = if number == RHYTHM_PART {
            PartKind::Rhythm
        } else {
            PartKind::Melodic
        };
        let cache_count = match kind {
            PartKind::Melodic => 1,
            PartKind::Rhythm => RHYTHM_KEY_COUNT,
        };
        Self {
            number,
            kind,
            caches: vec![TimbreCache::new(); cache_count],
            hold_pedal: false,
            expression: 100,
            modulation: 0,
            pitch_bend: 0,
            pitch_bender_range: 0,
            rpn: RPN_NONE,
            current_timbre: String::new(),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    pub fn kind(&self) -> PartKind {
        self.kind
    }

    pub fn expression(&self) -> u8 {
        self.expression
    }

    pub fn modulation(&self) -> u8 {
        self.modulation
    }

    pub fn pitch_bend(&self) -> i32 {
        self.pitch_bend
    }

    pub fn hold_pedal(&self) -> bool {
        self.hold_pedal
    }

    /// Name of the timbre that played last
    pub fn current_timbre(&self) -> &str {
        &self.current_timbre
    }

    /// Envelope state for this part's notes
    pub fn envelope_context(&self, memory: &ParameterMemory, system: &EnvelopeContext) -> EnvelopeContext {
        EnvelopeContext {
            part_volume: memory.patch_temp(self.number).output_level,
            expression: self.expression,
            modulation: self.modulation,
            pitch_bend: self.pitch_bend,
            rhythm_output_level: None,
            ..*system
        }
    }

    /// Map a MIDI key to the internal key, applying the patch key shift
    fn midi_key_to_key(midi_key: u8, patch_temp: &PatchTemp, features: RomFeatures) -> u32 {
        if features.contains(RomFeatures::KEY_SHIFT) {
            // Pitch picks up the shift instead
            return midi_key as u32;
        }
        let mut key = midi_key as i32 + patch_temp.patch.key_shift as i32;
        while key < 36 {
            key += 12;
        }
        while key > 132 {
            key -= 12;
        }
        (key - 24) as u32
    }

    pub fn note_on(&mut self, midi_key: u8, velocity: u8, play: &mut PlayContext<'_>) {
        match self.kind {
            PartKind::Melodic => {
                let patch_temp = play.memory.patch_temp(self.number);
                let key = Self::midi_key_to_key(midi_key, &patch_temp, play.rom.features());
                if self.caches[0].is_dirty() {
                    let timbre = play.memory.timbre_temp(self.number);
                    self.rebuild_cache(0, &timbre, patch_temp.patch.reverb_switch > 0);
                }
                self.play_poly(0, None, key, velocity, &patch_temp, play);
            }
            PartKind::Rhythm => self.rhythm_note_on(midi_key, velocity, play),
        }
    }

    fn rhythm_note_on(&mut self, midi_key: u8, velocity: u8, play: &mut PlayContext<'_>) {
        if !(RHYTHM_FIRST_KEY..=RHYTHM_LAST_KEY).contains(&midi_key) {
            log::debug!("rhythm key {midi_key} out of range");
            return;
        }
        let drum = (midi_key - RHYTHM_FIRST_KEY) as usize;
        let rhythm_temp = play.memory.rhythm_temp(drum);
        let drum_timbre = rhythm_temp.timbre;
        let drum_timbre_count = 64 + play.rom.rhythm_timbres().len();
        if drum_timbre == DRUM_TIMBRE_OFF || drum_timbre as usize >= drum_timbre_count {
            log::debug!("rhythm key {midi_key} has no timbre ({drum_timbre})");
            return;
        }

        let mut key = midi_key as u32;
        if drum_timbre == DRUM_TIMBRE_OPEN_KEY_1 {
            self.note_off(0, play);
            key = 1;
        } else if drum_timbre == DRUM_TIMBRE_OPEN_KEY_0 {
            self.note_off(0, play);
            key = 0;
        }

        if self.caches[drum].is_dirty() {
            let timbre = play.memory.timbre(drum_timbre as usize + MELODIC_TIMBRE_COUNT);
            self.rebuild_cache(drum, &timbre, rhythm_temp.reverb_switch > 0);
        }
        let patch_temp = play.memory.patch_temp(self.number);
        self.play_poly(drum, Some(rhythm_temp), key, velocity, &patch_temp, play);
    }

    fn rebuild_cache(&mut self, index: usize, timbre: &TimbreParam, reverb: bool) {
        self.caches[index].rebuild(timbre, reverb);
        self.current_timbre = timbre.name();
    }

    fn play_poly(
        &mut self,
        cache_index: usize,
        rhythm: Option<RhythmTemp>,
        key: u32,
        velocity: u8,
        patch_temp: &PatchTemp,
        play: &mut PlayContext<'_>,
    ) {
        let cache = &self.caches[cache_index];
        let needed = cache.partial_count();
        if needed == 0 {
            log::debug!("part {}: timbre has every partial muted", self.number + 1);
            return;
        }

        let assign_mode = patch_temp.patch.assign_mode;
        let priority_to_first = assign_mode & 1 != 0;
        if assign_mode & 2 == 0 {
            // Single assign: the key may only sound once
            play.manager.abort_first_poly_with_key(self.number, key);
            if play.manager.is_aborting_poly() {
                return;
            }
        }

        if needed > play.manager.free_partial_count() {
            play.manager.free_partials(needed, self.number, priority_to_first);
            if play.manager.is_aborting_poly() {
                return;
            }
            if needed > play.manager.free_partial_count() {
                log::debug!(
                    "part {}: no free partials for key {key} ({needed} needed)",
                    self.number + 1
                );
                return;
            }
        }

        let Some(poly) = play.manager.assign_poly_to_part(self.number, priority_to_first) else {
            log::debug!("part {}: no free poly for key {key}", self.number + 1);
            return;
        };

        let mut partials = [None; 4];
        for (slot, partial) in cache.slots().iter().zip(partials.iter_mut()) {
            if slot.play_partial {
                *partial = play.manager.alloc_partial(self.number);
            }
        }
        play.manager.start_poly(poly, key, velocity as u32, cache.sustain(), partials);

        let mut ctx = self.envelope_context(play.memory, play.system);
        ctx.rhythm_output_level = rhythm.map(|rhythm| rhythm.output_level);
        let panpot = rhythm.map_or(patch_temp.panpot, |rhythm| rhythm.panpot);
        let note = NoteInfo {
            key,
            velocity: velocity as u32,
            can_sustain: cache.sustain(),
        };
        let rhythm_key = rhythm.map(|_| cache_index);

        for (t, partial) in partials.iter().enumerate() {
            let Some(index) = *partial else {
                continue;
            };
            let slot = &cache.slots()[t];
            let setup = PartialSetup {
                poly,
                note,
                cache: slot,
                pair: partials[slot.structure_pair],
                rhythm_key,
                panpot,
                patch: &patch_temp.patch,
                rom: play.rom,
                ctx: &ctx,
                reversed_stereo: play.reversed_stereo,
            };
            play.manager.start_partial(index, setup);
        }
    }

    pub fn note_off(&mut self, midi_key: u8, play: &mut PlayContext<'_>) {
        let key = match self.kind {
            PartKind::Melodic => {
                let patch_temp = play.memory.patch_temp(self.number);
                Self::midi_key_to_key(midi_key, &patch_temp, play.rom.features())
            }
            PartKind::Rhythm => midi_key as u32,
        };
        play.manager.stop_note(self.number, key, self.hold_pedal);
    }

    /// Select a patch from patch memory
    ///
    /// The rhythm part has no patch and ignores this.
    pub fn set_program(&mut self, program: u8, play: &mut PlayContext<'_>) {
        if self.kind == PartKind::Rhythm {
            log::debug!("program change {program} on the rhythm part ignored");
            return;
        }
        let mut patch_temp = play.memory.patch_temp(self.number);
        patch_temp.patch = play.memory.patch(program as usize & 0x7F);
        play.memory.set_patch_temp(self.number, &patch_temp);

        self.hold_pedal = false;
        self.all_sound_off(play);
        let timbre = play.memory.timbre(patch_temp.patch.absolute_timbre_num());
        play.memory.set_timbre_temp(self.number, &timbre);
        self.refresh(play.memory);
    }

    /// React to changed patch or timbre settings
    pub fn refresh(&mut self, memory: &ParameterMemory) {
        self.pitch_bender_range = memory.patch_temp(self.number).patch.bender_range as i32 * BENDER_RANGE_MULT;
        for cache in self.caches.iter_mut() {
            cache.mark_dirty();
        }
    }

    /// Invalidate caches built from the timbre at `absolute_timbre`
    pub fn refresh_timbre(&mut self, absolute_timbre: usize, memory: &ParameterMemory) {
        match self.kind {
            PartKind::Melodic => {
                if memory.patch_temp(self.number).patch.absolute_timbre_num() == absolute_timbre {
                    self.caches[0].mark_dirty();
                }
            }
            PartKind::Rhythm => {
                for (drum, cache) in self.caches.iter_mut().enumerate() {
                    if memory.rhythm_temp(drum).timbre as usize + MELODIC_TIMBRE_COUNT == absolute_timbre {
                        cache.mark_dirty();
                    }
                }
            }
        }
    }

    /// Invalidate one rhythm key's cache
    pub fn refresh_drum(&mut self, drum: usize) {
        if self.kind == PartKind::Rhythm {
            if let Some(cache) = self.caches.get_mut(drum) {
                cache.mark_dirty();
            }
        }
    }

    /// MIDI volume, 0-127
    pub fn set_volume(&mut self, volume: u8, memory: &mut ParameterMemory) {
        let mut patch_temp = memory.patch_temp(self.number);
        patch_temp.output_level = (volume.min(127) as u32 * 100 / 127) as u8;
        memory.set_patch_temp(self.number, &patch_temp);
    }

    /// MIDI expression, 0-127
    pub fn set_expression(&mut self, expression: u8) {
        self.expression = (expression.min(127) as u32 * 100 / 127) as u8;
    }

    /// MIDI pan, 0-127
    ///
    /// Rhythm notes pan per key, so this only changes the stored setting
    /// there.
    pub fn set_pan(&mut self, pan: u8, memory: &mut ParameterMemory, features: RomFeatures) {
        let pan = pan.min(127) as u32;
        let panpot = if features.contains(RomFeatures::PAN_MULT) {
            pan / 9
        } else {
            (pan << 3) / 68
        };
        let mut patch_temp = memory.patch_temp(self.number);
        patch_temp.panpot = panpot.min(14) as u8;
        memory.set_patch_temp(self.number, &patch_temp);
    }

    pub fn set_modulation(&mut self, modulation: u8) {
        self.modulation = modulation.min(127);
    }

    /// 14-bit pitch bend, 8192 is centre
    pub fn set_pitch_bend(&mut self, bend: u16) {
        let bend = bend.min(0x3FFF) as i32 - 8192;
        self.pitch_bend = (bend * self.pitch_bender_range) >> 14;
    }

    pub fn set_hold_pedal(&mut self, pressed: bool, manager: &mut PartialManager) {
        if self.hold_pedal && !pressed {
            self.hold_pedal = false;
            manager.stop_pedal_hold(self.number);
        } else {
            self.hold_pedal = pressed;
        }
    }

    /// Bender range in semitones, 0-24
    pub fn set_bender_range(&mut self, semitones: u8, memory: &mut ParameterMemory) {
        let mut patch_temp = memory.patch_temp(self.number);
        patch_temp.patch.bender_range = semitones.min(24);
        memory.set_patch_temp(self.number, &patch_temp);
        self.pitch_bender_range = patch_temp.patch.bender_range as i32 * BENDER_RANGE_MULT;
    }

    /// Handle a control change message
    pub fn control_change(&mut self, controller: u8, value: u8, play: &mut PlayContext<'_>) {
        match controller {
            0x01 => self.set_modulation(value),
            0x06 => {
                if self.rpn == 0 {
                    self.set_bender_range(value, play.memory);
                }
            }
            0x07 => self.set_volume(value, play.memory),
            0x0A => self.set_pan(value, play.memory, play.rom.features()),
            0x0B => self.set_expression(value),
            0x40 => self.set_hold_pedal(value >= 64, play.manager),
            0x64 => self.rpn = (self.rpn & 0x3F80) | (value as u16 & 0x7F),
            0x65 => self.rpn = (self.rpn & 0x007F) | ((value as u16 & 0x7F) << 7),
            0x78 => self.all_sound_off(play),
            0x79 => self.reset_all_controllers(play.manager),
            0x7B..=0x7F => self.all_notes_off(play),
            _ => log::debug!("part {}: unhandled controller {controller:#04x}", self.number + 1),
        }
    }

    /// Release sustaining notes, respecting the hold pedal
    pub fn all_notes_off(&mut self, play: &mut PlayContext<'_>) {
        play.manager.all_notes_off(self.number, self.hold_pedal);
    }

    /// Release every note regardless of the pedal
    pub fn all_sound_off(&mut self, play: &mut PlayContext<'_>) {
        play.manager.all_sound_off(self.number);
    }

    pub fn reset_all_controllers(&mut self, manager: &mut PartialManager) {
        self.modulation = 0;
        self.expression = 100;
        self.pitch_bend = 0;
        self.set_hold_pedal(false, manager);
    }

    /// Power-on state
    pub fn reset(&mut self, memory: &ParameterMemory, manager: &mut PartialManager) {
        self.reset_all_controllers(manager);
        self.rpn = RPN_NONE;
        self.current_timbre.clear();
        self.refresh(memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::synthetic_rom;

    struct Fixture {
        rom: ControlRom,
        memory: ParameterMemory,
        manager: PartialManager,
        system: EnvelopeContext,
    }

    impl Fixture {
        fn new() -> Self {
            let rom = synthetic_rom().unwrap();
            let memory = ParameterMemory::new(&rom);
            Self {
                rom,
                memory,
                manager: PartialManager::new(32),
                system: EnvelopeContext::default(),
            }
        }

        fn play(&mut self) -> PlayContext<'_> {
            PlayContext {
                memory: &mut self.memory,
                rom: &self.rom,
                manager: &mut self.manager,
                system: &self.system,
                reversed_stereo: false,
            }
        }
    }

    #[test]
    fn test_key_shift_folding() {
        let mut patch_temp = PatchTemp::default();
        patch_temp.patch.key_shift = 24;
        assert_eq!(Part::midi_key_to_key(60, &patch_temp, RomFeatures::empty()), 60);
        // Folded up into the playable range
        assert_eq!(Part::midi_key_to_key(0, &patch_temp, RomFeatures::empty()), 12);
        assert_eq!(Part::midi_key_to_key(127, &patch_temp, RomFeatures::empty()), 103);
        patch_temp.patch.key_shift = 36;
        assert_eq!(Part::midi_key_to_key(60, &patch_temp, RomFeatures::empty()), 72);
        assert_eq!(Part::midi_key_to_key(60, &patch_temp, RomFeatures::KEY_SHIFT), 60);
    }

    #[test]
    fn test_note_on_allocates_partials() {
        let mut fixture = Fixture::new();
        let mut part = Part::new(0);
        part.refresh(&fixture.memory);
        let mut play = fixture.play();
        part.note_on(60, 100, &mut play);
        // Program 0 is a single square partial
        assert_eq!(play.manager.active_partial_count(0), 1);
        assert_eq!(part.current_timbre(), "Square 000");
    }

    #[test]
    fn test_single_assign_aborts_same_key() {
        let mut fixture = Fixture::new();
        let mut part = Part::new(0);
        let mut play = fixture.play();
        part.note_on(60, 100, &mut play);
        part.note_on(60, 100, &mut play);
        assert!(play.manager.is_aborting_poly());
        assert_eq!(play.manager.part_polys(0).count(), 1);
    }

    #[test]
    fn test_hold_pedal_defers_release() {
        let mut fixture = Fixture::new();
        let mut part = Part::new(0);
        let mut play = fixture.play();
        part.note_on(60, 100, &mut play);
        part.set_hold_pedal(true, play.manager);
        part.note_off(60, &mut play);
        assert_eq!(
            play.manager.part_polys(0).next().map(|poly| poly.state()),
            Some(crate::poly::PolyState::Held)
        );
        part.set_hold_pedal(false, play.manager);
        assert_eq!(
            play.manager.part_polys(0).next().map(|poly| poly.state()),
            Some(crate::poly::PolyState::Releasing)
        );
    }

    #[test]
    fn test_controllers() {
        let mut fixture = Fixture::new();
        let mut part = Part::new(2);
        let mut play = fixture.play();
        part.control_change(0x07, 127, &mut play);
        part.control_change(0x0B, 64, &mut play);
        part.control_change(0x0A, 127, &mut play);
        assert_eq!(play.memory.patch_temp(2).output_level, 100);
        assert_eq!(part.expression(), 50);
        assert_eq!(play.memory.patch_temp(2).panpot, 14);

        // RPN 0 data entry sets the bender range
        part.control_change(0x65, 0, &mut play);
        part.control_change(0x64, 0, &mut play);
        part.control_change(0x06, 2, &mut play);
        part.set_pitch_bend(0x3FFF);
        assert_eq!(part.pitch_bend(), (8191 * 2 * 683) >> 14);

        part.control_change(0x79, 0, &mut play);
        assert_eq!(part.pitch_bend(), 0);
        assert_eq!(part.expression(), 100);
    }

    #[test]
    fn test_rhythm_key_range_and_unmapped_keys() {
        let mut fixture = Fixture::new();
        let mut part = Part::new(RHYTHM_PART);
        let mut play = fixture.play();
        part.note_on(20, 100, &mut play);
        part.note_on(30, 100, &mut play);
        assert!(!play.manager.has_active_partials());
        part.note_on(36, 100, &mut play);
        assert_eq!(play.manager.active_partial_count(RHYTHM_PART), 1);
    }

    #[test]
    fn test_program_change_copies_timbre() {
        let mut fixture = Fixture::new();
        let mut part = Part::new(1);
        let mut play = fixture.play();
        part.set_program(5, &mut play);
        assert_eq!(play.memory.patch_temp(1).patch.timbre_num, 5);
        assert_eq!(play.memory.timbre_temp(1).name(), "SawPad 005");

        let mut rhythm = Part::new(RHYTHM_PART);
        rhythm.set_program(5, &mut play);
        assert_eq!(play.memory.patch_temp(RHYTHM_PART).patch.timbre_num, RHYTHM_PART as u8);
    }
}
