//! LA32 sound generator building blocks
//!
//! The pieces that model the chip itself: ramps, log-domain samples, wave
//! generators and the generator pairs that combine them.

pub mod log_sample;
pub mod partial_pair;
pub mod ramp;
pub mod wave_generator;

pub use log_sample::{interpolate_exp, unlog, LogSample, LogSign};
pub use partial_pair::{PairSlot, PartialPair};
pub use ramp::Ramp;
pub use wave_generator::{PcmSource, WaveGenerator};
