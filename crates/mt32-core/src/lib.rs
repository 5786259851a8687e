//! Roland MT-32 / CM-32L sound generator emulation
//!
//! A sample-accurate model of the LA32 synthesis chip and the firmware
//! logic driving it: partials, their envelopes, polys, parts and partial
//! allocation. Output is 16-bit stereo at 32 kHz.
//!
//! # Features
//! - Log-domain LA32 wave generation (square, sawtooth, resonance, PCM)
//! - Ring modulation and mixing of partial pairs
//! - TVA, TVF and TVP envelopes with firmware timing
//! - Reserve-based partial allocation across eight melodic parts and rhythm
//! - Sysex addressable parameter memory
//! - Generation specific ROM quirks as feature flags
//!
//! # Quick start
//! ```no_run
//! use mt32::{demo, Event, Synth, SynthConfig};
//!
//! let rom = demo::synthetic_rom().unwrap();
//! let mut synth = Synth::open(rom, SynthConfig::default()).unwrap();
//! synth.play_event_now(&Event::ProgramChange { channel: 1, program: 2 });
//! synth.play_event_now(&Event::NoteOn { channel: 1, key: 60, velocity: 100 });
//!
//! let mut buffer = vec![0i16; 2 * 32000];
//! synth.render(&mut buffer);
//! ```
//!
//! Real ROM images are decoded by the caller and handed over as
//! [`ControlRom`]; [`demo`] builds a small synthetic one.

pub mod config;
pub mod demo;
pub mod envelope; // TVA / TVF / TVP
pub mod error;
pub mod la32; // Wave generation in the log domain
pub mod memory;
pub mod params;
pub mod part;
pub mod partial;
pub mod partial_manager;
pub mod patch_cache;
pub mod poly;
pub mod rom;
pub mod synth;
mod tables;

pub use config::{SynthConfig, DEFAULT_PARTIAL_COUNT, SAMPLE_RATE};
pub use error::{Mt32Error, Result};
pub use memory::{pack_address, unpack_address, MemoryRegion, ParameterMemory, PART_COUNT, RHYTHM_PART};
pub use params::{PartialParam, PatchParam, PatchTemp, RhythmTemp, SystemParams, TimbreParam};
pub use partial::PartialState;
pub use rom::{ControlRom, PcmWaveEntry, RomFeatures};
pub use synth::{Event, Synth, MAX_RUN_SAMPLES};
