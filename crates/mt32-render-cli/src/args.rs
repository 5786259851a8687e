//! Command-line argument parsing for the offline renderer.

use std::env;

/// Silence rendered after the last event so releases can finish
pub const DEFAULT_TAIL_SECONDS: f32 = 2.0;

/// Parsed command-line arguments.
#[derive(Debug, PartialEq)]
pub struct CliArgs {
    /// WAV file to write
    pub output_path: Option<String>,
    /// JSON synth configuration
    pub config_path: Option<String>,
    /// Files of raw sysex messages applied before the sequence starts
    pub sysex_paths: Vec<String>,
    /// Seconds rendered after the last event
    pub tail_seconds: f32,
    /// Log at debug level
    pub verbose: bool,
    /// Whether help was requested
    pub show_help: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            output_path: None,
            config_path: None,
            sysex_paths: Vec::new(),
            tail_seconds: DEFAULT_TAIL_SECONDS,
            verbose: false,
            show_help: false,
        }
    }
}

impl CliArgs {
    /// Parse arguments from command line.
    pub fn parse() -> Self {
        Self::parse_from(env::args().skip(1))
    }

    pub fn parse_from<I: IntoIterator<Item = String>>(arguments: I) -> Self {
        let mut args = Self::default();
        let mut iter = arguments.into_iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    args.show_help = true;
                }
                "--verbose" | "-v" => {
                    args.verbose = true;
                }
                "--config" => match iter.next() {
                    Some(value) => args.config_path = Some(value),
                    None => {
                        eprintln!("--config requires a file argument");
                        args.show_help = true;
                    }
                },
                "--sysex" => match iter.next() {
                    Some(value) => args.sysex_paths.push(value),
                    None => {
                        eprintln!("--sysex requires a file argument");
                        args.show_help = true;
                    }
                },
                "--tail" => match iter.next().as_deref().map(parse_seconds) {
                    Some(Some(seconds)) => args.tail_seconds = seconds,
                    _ => {
                        eprintln!("--tail requires a non-negative number of seconds");
                        args.show_help = true;
                    }
                },
                _ if arg.starts_with("--tail=") => match parse_seconds(&arg[7..]) {
                    Some(seconds) => args.tail_seconds = seconds,
                    None => {
                        eprintln!("Invalid tail length: {}", &arg[7..]);
                        args.show_help = true;
                    }
                },
                _ if arg.starts_with('-') => {
                    eprintln!("Unknown flag: {}", arg);
                    args.show_help = true;
                }
                _ => {
                    args.output_path = Some(arg);
                }
            }
        }

        if args.output_path.is_none() {
            args.show_help = true;
        }
        args
    }

    /// Print help text to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage:\n  mt32-render [--config <file.json>] [--sysex <file.syx>]... [--tail <seconds>] <output.wav>\n\n\
             Renders the built-in demo sequence on the synthetic CM-32L ROM.\n\n\
             Flags:\n\
             \x20 --config <file>      Synth configuration (JSON)\n\
             \x20 --sysex <file>       Apply Roland DT1 messages before playback (repeatable)\n\
             \x20 --tail <seconds>     Render this long after the last event (default {DEFAULT_TAIL_SECONDS})\n\
             \x20 -v, --verbose        Debug logging\n\
             \x20 -h, --help           Show this help\n\n\
             Examples:\n\
             \x20 mt32-render demo.wav\n\
             \x20 mt32-render --config synth.json --sysex reverb.syx demo.wav\n"
        );
    }
}

fn parse_seconds(value: &str) -> Option<f32> {
    value
        .parse::<f32>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
}
