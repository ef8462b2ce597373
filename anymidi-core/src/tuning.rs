//! # Note Frequency Module
//!
//! Equal-tempered note frequencies and the lookups that map an arbitrary
//! frequency onto the nearest note.
//!
//! Note indices follow the MIDI numbering: index 69 is A4, index 60 is C4.
//! The table runs a little past the MIDI range (140 entries) so that the
//! upper harmonics of high notes still land on a slot of their own instead
//! of piling up on the last entry.

use once_cell::sync::Lazy;

/// Reference pitch of A4 in Hz.
pub const DEFAULT_TUNING_HZ: f64 = 440.0;

/// Number of notes in the lookup table.
pub const NOTE_COUNT: usize = 140;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Table tuned to A4 = 440 Hz, computed once on first use.
static DEFAULT_TABLE: Lazy<NoteFrequencyTable> =
    Lazy::new(|| NoteFrequencyTable::new(DEFAULT_TUNING_HZ));

/// Ascending, immutable table of note frequencies.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteFrequencyTable {
    frequencies: Vec<f64>,
}

impl NoteFrequencyTable {
    /// Builds the table for the given A4 reference.
    ///
    /// `freq(i) = (tuning / 32) * 2^((i - 9) / 12)`, i.e. index 9 is A at
    /// five octaves below the reference and index 69 is the reference itself.
    pub fn new(tuning_hz: f64) -> Self {
        let frequencies = (0..NOTE_COUNT)
            .map(|i| (tuning_hz / 32.0) * 2.0_f64.powf((i as f64 - 9.0) / 12.0))
            .collect();
        Self { frequencies }
    }

    /// Shared table for A4 = 440 Hz.
    pub fn standard() -> &'static NoteFrequencyTable {
        &DEFAULT_TABLE
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }

    /// Frequency of a note index. Out-of-range indices clamp to the ends.
    pub fn frequency(&self, note: usize) -> f64 {
        self.frequencies[note.min(self.frequencies.len() - 1)]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.frequencies
    }

    /// Index of the note closest to `target` Hz.
    pub fn nearest_note(&self, target: f64) -> usize {
        find_nearest_note(target, &self.frequencies)
    }
}

/// Finds the index of the frequency in `table` closest to `target`.
///
/// `table` must be sorted ascending and non-empty. Targets at or beyond
/// either end clamp to that end. When the target sits exactly halfway
/// between two neighbours the upper one is returned.
pub fn find_nearest_note(target: f64, table: &[f64]) -> usize {
    let mut begin = 0;
    let mut end = table.len();

    if target <= table[begin] {
        return begin;
    }
    if target >= table[end - 1] {
        return end - 1;
    }

    // Narrow down to the pair of neighbours bracketing the target.
    while end - begin > 1 {
        let mid = begin + (end - begin) / 2;
        if target == table[mid] {
            return mid;
        }
        if target < table[mid] {
            end = mid;
        } else {
            begin = mid;
        }
    }

    if (target - table[begin]).abs() < (table[end] - target).abs() {
        begin
    } else {
        end
    }
}

/// Human-readable name for a note index, e.g. `69` → `"A4"`.
pub fn note_name(note: usize) -> String {
    let octave = (note / 12) as i32 - 1;
    format!("{}{}", NOTE_NAMES[note % 12], octave)
}
