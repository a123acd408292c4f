//! # Musical Tuning Module
//!
//! This module maps measured frequencies onto the 88 keys of a piano in
//! equal temperament and reports how far the measurement is from the key.
//!
//! ## Features
//! - 88-key piano note mapping (A0 to C8) against any reference A4
//! - Cent deviation calculations for tuning accuracy
//! - Note name to key index conversions
//!
//! Keys are numbered 1 to 88 with A0 = 1 and A4 = 49.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Concert pitch used when nothing else is configured.
pub const DEFAULT_A4_FREQUENCY: f64 = 440.0;
/// Number of keys on a standard piano.
pub const PIANO_KEY_COUNT: u8 = 88;
/// Key number of A4.
pub const A4_KEY: u8 = 49;

/// Deviations below this many cents read as in tune.
pub const IN_TUNE_CENTS: f64 = 2.0;
/// Deviations below this many cents read as close.
pub const CLOSE_CENTS: f64 = 10.0;

/// The twelve pitch classes, starting at C.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PitchClass {
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Pitch class at `index` semitones above C (wraps every octave).
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % 12]
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }

    /// Parses a sharp or flat spelling ("F#", "Gb").
    ///
    /// Spellings that cross an octave boundary (Cb, B#) or land on a
    /// natural (E#, Fb) are rejected.
    pub fn parse(name: &str) -> Option<Self> {
        let class = match name {
            "C" => PitchClass::C,
            "C#" | "Db" => PitchClass::CSharp,
            "D" => PitchClass::D,
            "D#" | "Eb" => PitchClass::DSharp,
            "E" => PitchClass::E,
            "F" => PitchClass::F,
            "F#" | "Gb" => PitchClass::FSharp,
            "G" => PitchClass::G,
            "G#" | "Ab" => PitchClass::GSharp,
            "A" => PitchClass::A,
            "A#" | "Bb" => PitchClass::ASharp,
            "B" => PitchClass::B,
            _ => return None,
        };
        Some(class)
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How close a reading is to its target, as shown on the gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningStatus {
    InTune,
    Close,
    Off,
}

impl TuningStatus {
    pub fn from_cents(cents: f64) -> Self {
        let deviation = cents.abs();
        if deviation < IN_TUNE_CENTS {
            TuningStatus::InTune
        } else if deviation < CLOSE_CENTS {
            TuningStatus::Close
        } else {
            TuningStatus::Off
        }
    }
}

/// The piano key nearest to a measured frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteResult {
    /// Piano key number (1 = A0, 49 = A4, 88 = C8)
    pub key: u8,
    /// Pitch class of the key
    pub name: PitchClass,
    /// Scientific octave number (C4 is middle C)
    pub octave: i32,
    /// The measured frequency in Hz
    pub frequency: f64,
    /// The equal-tempered frequency of the key in Hz
    pub target_frequency: f64,
    /// Deviation from the target (positive = sharp, negative = flat)
    pub cents: f64,
}

impl NoteResult {
    /// Name with octave, e.g. "C#3".
    pub fn label(&self) -> String {
        format!("{}{}", self.name, self.octave)
    }

    pub fn status(&self) -> TuningStatus {
        TuningStatus::from_cents(self.cents)
    }
}

/// Finds the piano key nearest (in log frequency) to `frequency`.
///
/// # Arguments
/// * `frequency` - Measured frequency in Hz
/// * `a4` - Reference frequency of A4 in Hz
///
/// # Returns
/// * `Some(note)` - Nearest key with its target frequency and cent deviation
/// * `None` - Non-positive input or a pitch outside A0..C8
pub fn frequency_to_note(frequency: f64, a4: f64) -> Option<NoteResult> {
    if !is_positive_frequency(frequency) || !is_positive_frequency(a4) {
        return None;
    }

    let key_number = 12.0 * (frequency / a4).log2() + A4_KEY as f64;
    let key = key_number.round();
    if !(1.0..=PIANO_KEY_COUNT as f64).contains(&key) {
        return None;
    }
    let key = key as u8;

    let target_frequency = key_frequency(key, a4);
    let (name, octave) = key_to_pitch(key);

    Some(NoteResult {
        key,
        name,
        octave,
        frequency,
        target_frequency,
        cents: cents_deviation(frequency, target_frequency),
    })
}

/// Equal-tempered frequency of a key: `a4 * 2^((key - 49) / 12)`.
pub fn key_frequency(key: u8, a4: f64) -> f64 {
    a4 * 2.0_f64.powf((key as f64 - A4_KEY as f64) / 12.0)
}

/// Calculates the deviation from a target frequency in cents.
///
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
pub fn cents_deviation(freq: f64, target_freq: f64) -> f64 {
    1200.0 * (freq / target_freq).log2()
}

/// Gets the key number from a note name such as "A4", "C#3" or "Bb2".
pub fn key_from_name(name: &str) -> Option<u8> {
    let split = name.find(|c: char| c.is_ascii_digit() || c == '-')?;
    let (class, octave) = name.split_at(split);
    let class = PitchClass::parse(class)?;
    let octave: i32 = octave.parse().ok()?;
    // A0 to C8; anything else is off the keyboard whatever the class.
    if !(0..=8).contains(&octave) {
        return None;
    }

    let key = octave * 12 + class.index() as i32 - 8;
    if (1..=PIANO_KEY_COUNT as i32).contains(&key) {
        Some(key as u8)
    } else {
        None
    }
}

/// Name with octave of a key number, e.g. `key_name(40) == Some("C4")`.
pub fn key_name(key: u8) -> Option<String> {
    if !(1..=PIANO_KEY_COUNT).contains(&key) {
        return None;
    }
    let (name, octave) = key_to_pitch(key);
    Some(format!("{name}{octave}"))
}

// Octaves turn over at C, nine keys above A0.
fn key_to_pitch(key: u8) -> (PitchClass, i32) {
    let shifted = key as usize + 8;
    (PitchClass::from_index(shifted), (shifted / 12) as i32)
}

fn is_positive_frequency(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
