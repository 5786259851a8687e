//! Synth front end
//!
//! Owns the ROM, parameter memory, parts and partial pool, applies
//! timestamped events and renders 32 kHz stereo output.
//!
//! # Example
//!
//! ```
//! use mt32::{demo, Event, Synth, SynthConfig};
//!
//! let rom = demo::synthetic_rom().unwrap();
//! let mut synth = Synth::open(rom, SynthConfig::default()).unwrap();
//! synth.queue_event(0, Event::NoteOn { channel: 1, key: 60, velocity: 100 });
//!
//! let mut buffer = vec![0i16; 2 * 1024];
//! synth.render(&mut buffer);
//! assert!(synth.has_active_partials());
//! ```

use std::collections::VecDeque;

use crate::config::SynthConfig;
use crate::envelope::EnvelopeContext;
use crate::error::Result;
use crate::memory::{pack_address, MemoryRegion, MemoryWrite, ParameterMemory, PART_COUNT, RHYTHM_PART};
use crate::part::{Part, PlayContext};
use crate::partial::PartialState;
use crate::partial_manager::PartialManager;
use crate::rom::ControlRom;

/// Longest stretch rendered without looking at the event queue
pub const MAX_RUN_SAMPLES: usize = 256;

/// Channel assignment value that disconnects a part
const CHANNEL_OFF: u8 = 16;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;
const ROLAND_ID: u8 = 0x41;
const MT32_MODEL_ID: u8 = 0x16;
const DATA_SET_1: u8 = 0x12;

/// A channel message or parameter write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    ProgramChange { channel: u8, program: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// 14-bit bend, 8192 is centre
    PitchBend { channel: u8, value: u16 },
    /// Parameter write at a packed 21-bit address
    Sysex { address: u32, data: Vec<u8> },
}

impl Event {
    /// Parse a raw MIDI message
    ///
    /// System exclusive messages must be Roland DT1 messages addressed to
    /// the MT-32 model with a valid checksum.
    pub fn from_midi(bytes: &[u8]) -> Option<Event> {
        let (&status, rest) = bytes.split_first()?;
        if status == SYSEX_START {
            return Self::parse_sysex(rest);
        }
        let channel = status & 0x0F;
        let data = |i: usize| rest.get(i).map(|&b| b & 0x7F);
        match status & 0xF0 {
            0x80 => Some(Event::NoteOff { channel, key: data(0)? }),
            0x90 => Some(Event::NoteOn {
                channel,
                key: data(0)?,
                velocity: data(1)?,
            }),
            0xB0 => Some(Event::ControlChange {
                channel,
                controller: data(0)?,
                value: data(1)?,
            }),
            0xC0 => Some(Event::ProgramChange { channel, program: data(0)? }),
            0xE0 => Some(Event::PitchBend {
                channel,
                value: (data(1)? as u16) << 7 | data(0)? as u16,
            }),
            _ => {
                log::debug!("unhandled MIDI status {status:#04x}");
                None
            }
        }
    }

    fn parse_sysex(body: &[u8]) -> Option<Event> {
        let body = body.strip_suffix(&[SYSEX_END]).unwrap_or(body);
        // Manufacturer, device, model, command, 3 address bytes, checksum
        if body.len() < 8 {
            log::debug!("sysex of {} bytes too short", body.len());
            return None;
        }
        if body[0] != ROLAND_ID || body[2] != MT32_MODEL_ID || body[3] != DATA_SET_1 {
            log::debug!("sysex header {:02X?} not for this device", &body[..4]);
            return None;
        }
        let (payload, checksum) = body[4..].split_at(body.len() - 5);
        let sum = payload.iter().chain(checksum).fold(0u32, |sum, &b| sum + b as u32);
        if sum & 0x7F != 0 {
            log::debug!("sysex checksum mismatch");
            return None;
        }
        let address = pack_address([payload[0], payload[1], payload[2]]);
        Some(Event::Sysex {
            address,
            data: payload[3..].to_vec(),
        })
    }

    /// Build a DT1 sysex message writing `data` at a packed address
    pub fn to_sysex_bytes(address: u32, data: &[u8]) -> Vec<u8> {
        let address = crate::memory::unpack_address(address);
        let mut bytes = vec![SYSEX_START, ROLAND_ID, 0x10, MT32_MODEL_ID, DATA_SET_1];
        bytes.extend_from_slice(&address);
        bytes.extend_from_slice(data);
        let sum: u32 = address.iter().chain(data).map(|&b| b as u32).sum();
        bytes.push(((128 - (sum & 0x7F)) & 0x7F) as u8);
        bytes.push(SYSEX_END);
        bytes
    }

    /// MIDI channel of a channel message
    pub fn channel(&self) -> Option<u8> {
        match *self {
            Event::NoteOn { channel, .. }
            | Event::NoteOff { channel, .. }
            | Event::ProgramChange { channel, .. }
            | Event::ControlChange { channel, .. }
            | Event::PitchBend { channel, .. } => Some(channel),
            Event::Sysex { .. } => None,
        }
    }
}

/// Master tune in pitch units: 0-127 covers about a semitone each way
fn master_tune_pitch_delta(master_tune: u8) -> i32 {
    ((master_tune as i32 - 64) * 171) >> 6
}

/// Double and clip to the 16-bit output range
#[inline]
fn dac_output(sample: i32) -> i16 {
    (sample << 1).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// An event waiting for its sample time
#[derive(Debug, Clone)]
struct QueuedEvent {
    time: u64,
    event: Event,
    /// First part still to receive the event; parts before it already have
    first_part: usize,
}

pub struct Synth {
    rom: ControlRom,
    config: SynthConfig,
    memory: ParameterMemory,
    parts: Vec<Part>,
    manager: PartialManager,
    system: EnvelopeContext,
    chan_assign: [u8; PART_COUNT],
    queue: VecDeque<QueuedEvent>,
    /// Samples rendered since open
    clock: u64,
    mix_left: Vec<i32>,
    mix_right: Vec<i32>,
}

impl Synth {
    /// Open a synth on validated ROM contents
    pub fn open(rom: ControlRom, config: SynthConfig) -> Result<Self> {
        config.validate()?;
        let memory = ParameterMemory::new(&rom);
        let system = EnvelopeContext {
            features: rom.features(),
            nice_amp_ramp: config.nice_amp_ramp,
            ..EnvelopeContext::default()
        };
        let mut synth = Self {
            manager: PartialManager::new(config.partial_count),
            parts: (0..PART_COUNT).map(Part::new).collect(),
            memory,
            rom,
            config,
            system,
            chan_assign: [CHANNEL_OFF; PART_COUNT],
            queue: VecDeque::new(),
            clock: 0,
            mix_left: vec![0; MAX_RUN_SAMPLES],
            mix_right: vec![0; MAX_RUN_SAMPLES],
        };
        synth.power_on();
        log::info!(
            "synth open: {} partials, ROM features {:?}",
            synth.config.partial_count,
            synth.rom.features()
        );
        Ok(synth)
    }

    /// Return to the power-on state, dropping pending events
    pub fn reset(&mut self) {
        self.manager.deactivate_all();
        self.queue.clear();
        self.memory = ParameterMemory::new(&self.rom);
        self.power_on();
    }

    fn power_on(&mut self) {
        let mut system = self.memory.system();
        if let Some(volume) = self.config.master_volume {
            system.master_vol = volume;
        }
        if let Some(tune) = self.config.master_tune {
            system.master_tune = tune;
        }
        if let Some(reserve) = self.config.reserve {
            system.reserve_settings = reserve;
        }
        self.memory.set_system(&system);
        self.apply_system();
        for part in self.parts.iter_mut() {
            part.reset(&self.memory, &mut self.manager);
        }
    }

    fn apply_system(&mut self) {
        let system = self.memory.system();
        self.system.master_volume = system.master_vol;
        self.system.master_tune_pitch_delta = master_tune_pitch_delta(system.master_tune);
        self.manager.set_reserve(&system.reserve_settings);
        self.chan_assign = system.chan_assign;
    }

    pub fn config(&self) -> &SynthConfig {
        &self.config
    }

    pub fn rom(&self) -> &ControlRom {
        &self.rom
    }

    pub fn memory(&self) -> &ParameterMemory {
        &self.memory
    }

    pub fn part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    pub fn partial_manager(&self) -> &PartialManager {
        &self.manager
    }

    /// Samples rendered so far
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    /// Parts listening on a MIDI channel
    pub fn parts_for_channel(&self, channel: u8) -> impl Iterator<Item = usize> + '_ {
        self.chan_assign
            .iter()
            .enumerate()
            .filter(move |(_, &assigned)| assigned == channel)
            .map(|(part, _)| part)
    }

    pub fn has_active_partials(&self) -> bool {
        self.manager.has_active_partials()
    }

    pub fn partial_states(&self) -> Vec<PartialState> {
        self.manager.partial_states()
    }

    /// Queue an event for the given sample time
    ///
    /// Events at or before the current clock play at the start of the next
    /// render call. Events with equal times keep their queue order.
    pub fn queue_event(&mut self, timestamp: u64, event: Event) {
        let position = self.queue.partition_point(|queued| queued.time <= timestamp);
        self.queue.insert(
            position,
            QueuedEvent {
                time: timestamp,
                event,
                first_part: 0,
            },
        );
    }

    /// Apply an event immediately
    ///
    /// When a part has to wait for an aborting poly, the parts from it
    /// onwards get the event at the front of the queue instead.
    pub fn play_event_now(&mut self, event: &Event) {
        if let Some(first_part) = self.deliver(event, 0) {
            self.queue.push_front(QueuedEvent {
                time: self.clock,
                event: event.clone(),
                first_part,
            });
        }
    }

    /// Hand an event to the parts on its channel, starting at `first_part`
    ///
    /// Returns the part that did not take the event because a poly abort
    /// is in progress.
    fn deliver(&mut self, event: &Event, first_part: usize) -> Option<usize> {
        let channel = match event {
            Event::Sysex { address, data } => {
                self.write_memory(*address, data);
                return None;
            }
            other => other.channel().unwrap_or(CHANNEL_OFF),
        };
        for part in first_part..PART_COUNT {
            if self.chan_assign[part] != channel {
                continue;
            }
            if self.manager.is_aborting_poly() {
                return Some(part);
            }
            self.play_on_part(part, event);
            // A part that starts an abort returns before playing the note
            if self.manager.is_aborting_poly() {
                return Some(part);
            }
        }
        None
    }

    fn play_on_part(&mut self, index: usize, event: &Event) {
        let mut play = PlayContext {
            memory: &mut self.memory,
            rom: &self.rom,
            manager: &mut self.manager,
            system: &self.system,
            reversed_stereo: self.config.reversed_stereo,
        };
        let part = &mut self.parts[index];
        match *event {
            Event::NoteOn { key, velocity: 0, .. } | Event::NoteOff { key, .. } => part.note_off(key, &mut play),
            Event::NoteOn { key, velocity, .. } => part.note_on(key, velocity, &mut play),
            Event::ProgramChange { program, .. } => part.set_program(program, &mut play),
            Event::ControlChange { controller, value, .. } => part.control_change(controller, value, &mut play),
            Event::PitchBend { value, .. } => part.set_pitch_bend(value),
            Event::Sysex { .. } => {}
        }
    }

    /// Write parameter memory and bring the affected state up to date
    pub fn write_memory(&mut self, address: u32, data: &[u8]) {
        for write in self.memory.write(address, data) {
            self.apply_memory_write(write);
        }
    }

    pub fn read_memory(&self, address: u32, len: usize) -> Result<Vec<u8>> {
        self.memory.read(address, len)
    }

    fn apply_memory_write(&mut self, write: MemoryWrite) {
        match write.region {
            MemoryRegion::PatchTemp => {
                for part in write.entries() {
                    // Only writes reaching the timbre selection reload the timbre
                    let selects_timbre = part != write.first_entry || write.first_offset <= 2;
                    if part != RHYTHM_PART && selects_timbre {
                        let patch = self.memory.patch_temp(part).patch;
                        let timbre = self.memory.timbre(patch.absolute_timbre_num());
                        self.memory.set_timbre_temp(part, &timbre);
                    }
                    self.parts[part].refresh(&self.memory);
                }
            }
            MemoryRegion::RhythmTemp => {
                for drum in write.entries() {
                    self.parts[RHYTHM_PART].refresh_drum(drum);
                }
            }
            MemoryRegion::TimbreTemp => {
                for part in write.entries() {
                    self.parts[part].refresh(&self.memory);
                }
            }
            MemoryRegion::Patches => {
                log::trace!("patches {:?} written", write.entries());
            }
            MemoryRegion::Timbres => {
                for timbre in write.entries() {
                    for part in self.parts.iter_mut() {
                        part.refresh_timbre(timbre, &self.memory);
                    }
                }
            }
            MemoryRegion::System => self.apply_system(),
        }
    }

    /// Master volume, 0-100
    pub fn set_master_volume(&mut self, volume: u8) {
        let mut system = self.memory.system();
        system.master_vol = volume.min(100);
        self.memory.set_system(&system);
        self.apply_system();
    }

    /// Master tune, 0-127 with 64 at 440 Hz
    pub fn set_master_tune(&mut self, tune: u8) {
        let mut system = self.memory.system();
        system.master_tune = tune.min(127);
        self.memory.set_system(&system);
        self.apply_system();
    }

    /// Render interleaved stereo frames
    pub fn render(&mut self, out: &mut [i16]) {
        let mut left = [0i16; MAX_RUN_SAMPLES];
        let mut right = [0i16; MAX_RUN_SAMPLES];
        for chunk in out.chunks_mut(MAX_RUN_SAMPLES * 2) {
            let frames = chunk.len() / 2;
            self.render_planar(&mut left[..frames], &mut right[..frames]);
            for (frame, (&l, &r)) in chunk.chunks_exact_mut(2).zip(left.iter().zip(right.iter())) {
                frame[0] = l;
                frame[1] = r;
            }
        }
    }

    /// Render into separate channel buffers
    pub fn render_planar(&mut self, left: &mut [i16], right: &mut [i16]) {
        let frames = left.len().min(right.len());
        let mut done = 0;
        while done < frames {
            self.play_due_events();
            let mut run = (frames - done).min(MAX_RUN_SAMPLES);
            if self.manager.is_aborting_poly() {
                // The event waiting on the abort plays as soon as it finishes
                run = 1;
            } else if let Some(time) = self.queue.front().map(|queued| queued.time) {
                if time > self.clock {
                    run = run.min((time - self.clock) as usize);
                }
            }
            self.render_run(&mut left[done..done + run], &mut right[done..done + run]);
            done += run;
            self.clock += run as u64;
        }
    }

    fn play_due_events(&mut self) {
        while !self.manager.is_aborting_poly() {
            let due = self.queue.front().is_some_and(|queued| queued.time <= self.clock);
            if !due {
                break;
            }
            let Some(queued) = self.queue.pop_front() else {
                break;
            };
            if let Some(first_part) = self.deliver(&queued.event, queued.first_part) {
                // Resume at that part once the aborting poly has gone
                self.queue.push_front(QueuedEvent { first_part, ..queued });
                break;
            }
        }
    }

    fn render_run(&mut self, left: &mut [i16], right: &mut [i16]) {
        let len = left.len();
        let mix_left = &mut self.mix_left[..len];
        let mix_right = &mut self.mix_right[..len];
        mix_left.fill(0);
        mix_right.fill(0);

        let contexts: [EnvelopeContext; PART_COUNT] =
            std::array::from_fn(|part| self.parts[part].envelope_context(&self.memory, &self.system));

        for index in 0..self.manager.partial_count() {
            let Some(partial) = self.manager.partial(index) else {
                continue;
            };
            let Some(part) = partial.owner_part() else {
                continue;
            };
            let mut ctx = contexts[part];
            if let Some(drum) = partial.rhythm_key() {
                ctx.rhythm_output_level = Some(self.memory.rhythm_temp(drum).output_level);
            }
            self.manager.produce_output(index, &ctx, mix_left, mix_right);
        }

        for (out, &sample) in left.iter_mut().zip(mix_left.iter()) {
            *out = dac_output(sample);
        }
        for (out, &sample) in right.iter_mut().zip(mix_right.iter()) {
            *out = dac_output(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::synthetic_rom;
    use crate::memory::unpack_address;

    fn synth() -> Synth {
        Synth::open(synthetic_rom().unwrap(), SynthConfig::default()).unwrap()
    }

    #[test]
    fn test_parse_short_messages() {
        assert_eq!(
            Event::from_midi(&[0x91, 60, 100]),
            Some(Event::NoteOn { channel: 1, key: 60, velocity: 100 })
        );
        assert_eq!(
            Event::from_midi(&[0xE0, 0x00, 0x40]),
            Some(Event::PitchBend { channel: 0, value: 8192 })
        );
        assert_eq!(Event::from_midi(&[0x90, 60]), None);
        assert_eq!(Event::from_midi(&[]), None);
    }

    #[test]
    fn test_sysex_round_trip() {
        let address = pack_address([0x10, 0x00, 0x16]);
        let bytes = Event::to_sysex_bytes(address, &[80]);
        assert_eq!(
            Event::from_midi(&bytes),
            Some(Event::Sysex {
                address,
                data: vec![80]
            })
        );
        let mut corrupted = bytes.clone();
        corrupted[8] ^= 1;
        assert_eq!(Event::from_midi(&corrupted), None);
    }

    #[test]
    fn test_master_tune_delta() {
        assert_eq!(master_tune_pitch_delta(64), 0);
        assert_eq!(master_tune_pitch_delta(127), (63 * 171) >> 6);
        assert!(master_tune_pitch_delta(0) < 0);
    }

    #[test]
    fn test_dac_saturates() {
        assert_eq!(dac_output(1000), 2000);
        assert_eq!(dac_output(20000), i16::MAX);
        assert_eq!(dac_output(-20000), i16::MIN);
    }

    #[test]
    fn test_default_channel_assignment() {
        let synth = synth();
        assert_eq!(synth.parts_for_channel(1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(synth.parts_for_channel(9).collect::<Vec<_>>(), vec![RHYTHM_PART]);
        assert_eq!(synth.parts_for_channel(0).count(), 0);
    }

    #[test]
    fn test_silence_without_notes() {
        let mut synth = synth();
        let mut buffer = vec![1i16; 1000];
        synth.render(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0));
        assert_eq!(synth.clock(), 500);
    }

    #[test]
    fn test_queued_note_sounds() {
        let mut synth = synth();
        synth.queue_event(100, Event::NoteOn { channel: 1, key: 60, velocity: 100 });
        let mut buffer = vec![0i16; 200];
        synth.render(&mut buffer);
        assert!(buffer.iter().all(|&s| s == 0));
        assert_eq!(synth.pending_events(), 1);

        let mut buffer = vec![0i16; 4000];
        synth.render(&mut buffer);
        assert_eq!(synth.pending_events(), 0);
        assert!(buffer.iter().any(|&s| s != 0));
    }

    #[test]
    fn test_system_write_updates_volume_and_reserve() {
        let mut synth = synth();
        let address = MemoryRegion::System.start_address();
        // Master tune, reverb mode/time/level, then the nine reserve settings
        synth.write_memory(address, &[64, 0, 5, 3, 4, 4, 4, 4, 4, 4, 4, 4, 0]);
        assert_eq!(synth.partial_manager().reserve(), [4, 4, 4, 4, 4, 4, 4, 4, 0]);
        synth.set_master_volume(120);
        assert_eq!(synth.memory().system().master_vol, 100);
        assert_eq!(unpack_address(address), [0x10, 0, 0]);
    }

    #[test]
    fn test_channel_reassignment() {
        let mut synth = synth();
        // Part 1 listens on channel 5
        let address = MemoryRegion::System.start_address() + 13;
        synth.play_event_now(&Event::Sysex {
            address,
            data: vec![5],
        });
        assert_eq!(synth.parts_for_channel(5).collect::<Vec<_>>(), vec![0, 4]);
    }

    /// Part 1 joins part 5 on channel 5 in multi assign; part 5 stays single assign
    fn shared_channel_synth() -> Synth {
        let mut synth = synth();
        synth.write_memory(MemoryRegion::System.start_address() + 13, &[5]);
        // Assign mode sits at offset 5 of the patch
        synth.write_memory(MemoryRegion::PatchTemp.start_address() + 5, &[2]);
        synth
    }

    fn active_polys(synth: &Synth, part: usize) -> usize {
        synth.partial_manager().part_polys(part).filter(|poly| poly.is_active()).count()
    }

    #[test]
    fn test_abort_on_shared_channel_resumes_at_waiting_part() {
        let mut synth = shared_channel_synth();
        synth.queue_event(0, Event::NoteOn { channel: 5, key: 60, velocity: 100 });
        synth.queue_event(10, Event::NoteOn { channel: 5, key: 60, velocity: 100 });

        let mut buffer = vec![0i16; 2 * 4096];
        synth.render(&mut buffer);
        assert_eq!(synth.pending_events(), 0);
        assert_eq!(active_polys(&synth, 0), 2);
        assert_eq!(active_polys(&synth, 4), 1);
    }

    #[test]
    fn test_immediate_event_defers_only_waiting_parts() {
        let mut synth = shared_channel_synth();
        let note = Event::NoteOn { channel: 5, key: 60, velocity: 100 };
        synth.play_event_now(&note);
        synth.play_event_now(&note);
        assert!(synth.partial_manager().is_aborting_poly());
        assert_eq!(synth.pending_events(), 1);
        assert_eq!(active_polys(&synth, 0), 2);

        let mut buffer = vec![0i16; 2 * 4096];
        synth.render(&mut buffer);
        assert_eq!(synth.pending_events(), 0);
        assert_eq!(active_polys(&synth, 0), 2);
        assert_eq!(active_polys(&synth, 4), 1);
    }

    #[test]
    fn test_reset_silences() {
        let mut synth = synth();
        synth.play_event_now(&Event::NoteOn { channel: 1, key: 60, velocity: 100 });
        assert!(synth.has_active_partials());
        synth.queue_event(10, Event::NoteOn { channel: 1, key: 64, velocity: 100 });
        synth.reset();
        assert!(!synth.has_active_partials());
        assert_eq!(synth.pending_events(), 0);
    }
}
