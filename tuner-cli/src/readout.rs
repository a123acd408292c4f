//! Text rendering of analysis results for the terminal.

use tuner_core::{AnalysisResult, NoteResult, TuningStatus};

/// The gauge spans -50 to +50 cents.
const GAUGE_RANGE: f64 = 50.0;
/// Cells on each side of the centre mark.
const GAUGE_HALF_WIDTH: usize = 10;

/// One line per pitched result, `None` for frames without a note.
pub fn format_result(result: &AnalysisResult) -> Option<String> {
    let note = result.note.as_ref()?;
    Some(format_note(note, result.estimate.map(|e| e.clarity)))
}

/// Readout of a note; the clarity is left out when nothing was estimated.
pub fn format_note(note: &NoteResult, clarity: Option<f64>) -> String {
    let clarity = clarity.map(|c| format!("  (clarity {c:.2})")).unwrap_or_default();
    format!(
        "{:<3}{:>+6.1} cents  {:.2} Hz -> {:.2} Hz{}  {} {}",
        note.label(),
        note.cents,
        note.frequency,
        note.target_frequency,
        clarity,
        gauge(note.cents),
        status_label(note.status())
    )
}

/// A needle on a `[----------|----------]` scale, pinned at the ends
/// when the deviation is beyond ±50 cents.
pub fn gauge(cents: f64) -> String {
    let width = GAUGE_HALF_WIDTH * 2 + 1;
    let clamped = if cents.is_finite() { cents.clamp(-GAUGE_RANGE, GAUGE_RANGE) } else { 0.0 };
    let position = ((clamped + GAUGE_RANGE) / (2.0 * GAUGE_RANGE) * (width - 1) as f64).round() as usize;

    let mut cells = String::with_capacity(width + 2);
    cells.push('[');
    for i in 0..width {
        cells.push(if i == position {
            '#'
        } else if i == GAUGE_HALF_WIDTH {
            '|'
        } else {
            '-'
        });
    }
    cells.push(']');
    cells
}

fn status_label(status: TuningStatus) -> &'static str {
    match status {
        TuningStatus::InTune => "in tune",
        TuningStatus::Close => "close",
        TuningStatus::Off => "off",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuner_core::{PitchEstimate, frequency_to_note};

    #[test]
    fn gauge_centre_and_ends() {
        assert_eq!(gauge(0.0), "[----------#----------]");
        assert_eq!(gauge(-50.0), "[#---------|----------]");
        assert_eq!(gauge(80.0), "[----------|---------#]");
        assert_eq!(gauge(25.0), "[----------|----#-----]");
        assert_eq!(gauge(f64::NAN), "[----------#----------]");
    }

    #[test]
    fn readout_line() {
        let note = frequency_to_note(440.81, 440.0).unwrap();
        let line = format_note(&note, Some(0.98));
        assert!(line.starts_with("A4   +3.2 cents  440.81 Hz -> 440.00 Hz  (clarity 0.98)  ["), "{line}");
        assert!(line.ends_with("close"));

        let bare = format_note(&note, None);
        assert!(bare.starts_with("A4   +3.2 cents  440.81 Hz -> 440.00 Hz  ["), "{bare}");
        assert!(!bare.contains("clarity"));
    }

    #[test]
    fn unpitched_results_print_nothing() {
        let result = AnalysisResult {
            frame_index: 3,
            estimate: Some(PitchEstimate { frequency: 440.0, clarity: 0.5 }),
            note: None,
        };
        assert!(format_result(&result).is_none());
    }
}
