//! Piano tuner command line.
//!
//! Usage:
//!   tuner note 261.63           - Nearest key of a frequency
//!   tuner key C#3               - Target frequency of a key
//!   tuner analyze take.wav      - Run a recording through the tuner
//!   tuner listen                - Live microphone readout (feature `capture`)
//!   tuner config --write t.json - Print or save the effective config

#[cfg(feature = "capture")]
mod listen;
mod readout;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tuner_core::tuning::{self, PIANO_KEY_COUNT};
use tuner_core::{AnalysisResult, Session, SignalSource, TunerConfig, frequency_to_note};

#[derive(Parser)]
#[command(name = "tuner", version, about = "Piano tuner")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Reference frequency of A4 in Hz, overrides the config file
    #[arg(long, global = true)]
    a4: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map a frequency to its nearest piano key
    Note {
        /// Frequency in Hz
        frequency: f64,
    },
    /// Show key number and target frequency of a note name
    Key {
        /// Note name such as A4, C#3 or Bb2
        name: String,
    },
    /// Analyse a WAV file frame by frame
    Analyze {
        /// WAV file, integer or float PCM
        wav: PathBuf,
        /// Release frames at the speed of the recording
        #[arg(long)]
        realtime: bool,
        /// Print every result as a JSON record
        #[arg(long)]
        json: bool,
    },
    /// Live readout from the default microphone
    #[cfg(feature = "capture")]
    Listen {
        /// Print every result as a JSON record
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config {
        /// Write it to this file instead
        #[arg(long)]
        write: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.a4)?;

    match cli.command {
        Commands::Note { frequency } => print_note(frequency, &config),
        Commands::Key { name } => print_key(&name, &config),
        Commands::Analyze { wav, realtime, json } => analyze(&wav, realtime, json, &config),
        #[cfg(feature = "capture")]
        Commands::Listen { json } => listen::run(json, &config),
        Commands::Config { write } => write_config(write.as_deref(), &config),
    }
}

fn load_config(path: Option<&Path>, a4: Option<f64>) -> Result<TunerConfig> {
    let mut config = match path {
        Some(path) => TunerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TunerConfig::default(),
    };
    if let Some(a4) = a4 {
        config.reference_frequency = a4;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_note(frequency: f64, config: &TunerConfig) -> Result<()> {
    let Some(note) = frequency_to_note(frequency, config.reference_frequency) else {
        bail!(
            "{} Hz is outside the piano range at A4 = {} Hz",
            frequency,
            config.reference_frequency
        );
    };
    println!("{}", readout::format_note(&note, None));
    println!("key {} of {}", note.key, PIANO_KEY_COUNT);
    Ok(())
}

fn print_key(name: &str, config: &TunerConfig) -> Result<()> {
    let key = tuning::key_from_name(name).with_context(|| format!("'{name}' is not a piano key"))?;
    let label = tuning::key_name(key).unwrap_or_else(|| name.to_string());
    println!(
        "{}  key {}  {:.2} Hz (A4 = {} Hz)",
        label,
        key,
        tuning::key_frequency(key, config.reference_frequency),
        config.reference_frequency
    );
    Ok(())
}

fn analyze(wav: &Path, realtime: bool, json: bool, config: &TunerConfig) -> Result<()> {
    let source = SignalSource::from_wav(wav)
        .with_context(|| format!("Failed to read {}", wav.display()))?
        .paced(realtime);
    let session = Session::start(source, config, config.reference()?).context("Failed to start session")?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut pitched = 0_u64;
    for result in session.results().iter() {
        if result.is_pitched() {
            pitched += 1;
        }
        emit(&mut out, &result, json)?;
    }

    let stats = session.stop().context("Session did not shut down cleanly")?;
    log::info!(
        "{} of {} frames pitched, {} results dropped",
        pitched,
        stats.frames_analyzed,
        stats.results_dropped
    );
    Ok(())
}

pub(crate) fn emit(out: &mut impl Write, result: &AnalysisResult, json: bool) -> Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string(result)?)?;
    } else if let Some(line) = readout::format_result(result) {
        writeln!(out, "{:>6}  {}", result.frame_index, line)?;
    }
    Ok(())
}

fn write_config(path: Option<&Path>, config: &TunerConfig) -> Result<()> {
    match path {
        Some(path) => {
            config
                .save(path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(config)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_overrides() {
        let cli = Cli::try_parse_from(["tuner", "note", "440", "--a4", "442"]).unwrap();
        assert_eq!(cli.a4, Some(442.0));
        assert!(matches!(cli.command, Commands::Note { frequency } if frequency == 440.0));
    }

    #[test]
    fn a4_override_is_validated() {
        assert_eq!(load_config(None, Some(432.0)).unwrap().reference_frequency, 432.0);
        assert!(load_config(None, Some(-1.0)).is_err());
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuner.json");
        std::fs::write(&path, r#"{ "reference_frequency": 415.0 }"#).unwrap();
        assert_eq!(load_config(Some(&path), None).unwrap().reference_frequency, 415.0);
        assert!(load_config(Some(&dir.path().join("missing.json")), None).is_err());
    }
}
