//! MT-32 offline renderer
//!
//! Plays the demo sequence through the emulator and writes a 16-bit
//! stereo WAV file at the LA32 output rate.

mod args;

use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{info, warn, LevelFilter};
use mt32::{demo, Event, Synth, SynthConfig, SAMPLE_RATE};
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

use args::CliArgs;

/// Frames rendered per call
const CHUNK_FRAMES: usize = 4096;

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

fn main() -> Result<()> {
    let args = CliArgs::parse();
    if args.show_help {
        CliArgs::print_help();
        return Ok(());
    }

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        ConfigBuilder::default()
            .set_time_level(LevelFilter::Trace)
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let config = match &args.config_path {
        Some(path) => SynthConfig::load(path).with_context(|| format!("loading config {path}"))?,
        None => SynthConfig::default(),
    };
    let rom = demo::synthetic_rom().context("building synthetic ROM")?;
    let mut synth = Synth::open(rom, config)?;

    for path in &args.sysex_paths {
        apply_sysex_file(&mut synth, path)?;
    }

    let events = demo::demo_sequence(SAMPLE_RATE);
    let last_event = events.last().map_or(0, |(time, _)| *time);
    for (time, event) in events {
        synth.queue_event(time, event);
    }

    let tail = (args.tail_seconds * SAMPLE_RATE as f32) as u64;
    let total_frames = last_event + tail;
    let Some(output_path) = args.output_path.as_deref() else {
        bail!("no output file given");
    };
    render_to_wav(&mut synth, total_frames, Path::new(output_path))?;
    Ok(())
}

/// Apply every sysex message found in a file
fn apply_sysex_file(synth: &mut Synth, path: &str) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {path}"))?;
    let mut applied = 0;
    let mut skipped = 0;
    for message in split_sysex(&bytes) {
        match Event::from_midi(message) {
            Some(event @ Event::Sysex { .. }) => {
                synth.play_event_now(&event);
                applied += 1;
            }
            _ => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!("{path}: skipped {skipped} message(s) not addressed to the MT-32");
    }
    info!("{path}: applied {applied} sysex message(s)");
    Ok(())
}

/// Split a byte stream into F0 .. F7 messages
fn split_sysex(bytes: &[u8]) -> impl Iterator<Item = &[u8]> {
    bytes
        .split_inclusive(|&b| b == SYSEX_END)
        .filter_map(|chunk| {
            let start = chunk.iter().position(|&b| b == SYSEX_START)?;
            let message = &chunk[start..];
            (message.last() == Some(&SYSEX_END)).then_some(message)
        })
}

fn render_to_wav(synth: &mut Synth, total_frames: u64, path: &Path) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer =
        hound::WavWriter::create(path, spec).with_context(|| format!("creating {}", path.display()))?;

    info!(
        "Rendering {} frames ({:.1}s)...",
        total_frames,
        total_frames as f32 / SAMPLE_RATE as f32
    );
    let mut buffer = vec![0i16; CHUNK_FRAMES * 2];
    let mut remaining = total_frames;
    let mut peak = 0u16;
    while remaining > 0 {
        let frames = remaining.min(CHUNK_FRAMES as u64) as usize;
        let chunk = &mut buffer[..frames * 2];
        synth.render(chunk);
        for &sample in chunk.iter() {
            peak = peak.max(sample.unsigned_abs());
            writer.write_sample(sample)?;
        }
        remaining -= frames as u64;
    }
    writer.finalize()?;

    if synth.has_active_partials() {
        warn!("partials still sounding at the end of the render");
    }
    info!("Wrote {} (peak {peak})", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mt32::pack_address;

    #[test]
    fn test_split_sysex_ignores_noise() {
        let first = Event::to_sysex_bytes(pack_address([0x10, 0x00, 0x00]), &[64]);
        let second = Event::to_sysex_bytes(pack_address([0x10, 0x00, 0x16]), &[80]);
        let mut stream = vec![0x00, 0x12];
        stream.extend_from_slice(&first);
        stream.extend_from_slice(&second);
        stream.extend_from_slice(&[SYSEX_START, 0x41]);

        let messages: Vec<&[u8]> = split_sysex(&stream).collect();
        assert_eq!(messages, vec![first.as_slice(), second.as_slice()]);
    }

    #[test]
    fn test_split_messages_parse() {
        let address = pack_address([0x10, 0x00, 0x16]);
        let message = Event::to_sysex_bytes(address, &[80]);
        let events: Vec<Event> = split_sysex(&message).filter_map(Event::from_midi).collect();
        assert_eq!(
            events,
            vec![Event::Sysex {
                address,
                data: vec![80]
            }]
        );
    }
}
