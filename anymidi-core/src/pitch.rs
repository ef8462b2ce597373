//! # Pitch Estimation Module
//!
//! Reduces a set of partials to a single note.
//!
//! Partials arrive sorted by note, and the estimator reads the i-th partial
//! as harmonic number `i + 1`. Each partial votes for the note closest to
//! its implied fundamental (`frequency / (i + 1)`), with a vote weight of
//! `log2(fundamental)`. The log weight leans on the upper partials, which
//! the linear FFT bin spacing resolves more finely than the low ones.
//!
//! The harmonic-number assumption does not always hold (missing or spurious
//! partials shift the ranks), so this is a heuristic rather than an exact
//! pitch detector.

use tracing::trace;

use crate::harmonics::HarmonicSet;
use crate::tuning::{NoteFrequencyTable, note_name};

/// One frame's best guess.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEstimate {
    /// Note index into the frequency table (MIDI numbering).
    pub note: usize,
    /// Summed partial amplitude, clamped to `[0, 1]`.
    pub amplitude: f64,
}

impl NoteEstimate {
    pub const SILENT: NoteEstimate = NoteEstimate {
        note: 0,
        amplitude: 0.0,
    };
}

/// Harmonic-weighted note scorer with reusable score storage.
#[derive(Debug)]
pub struct PitchEstimator {
    scores: Vec<Option<f64>>,
}

impl Default for PitchEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl PitchEstimator {
    pub fn new() -> Self {
        Self {
            scores: vec![None; crate::tuning::NOTE_COUNT],
        }
    }

    /// Scores every partial and returns the winning note with the total
    /// amplitude of the set.
    ///
    /// The winner is the highest score; on a tie the lowest note wins. An
    /// empty set yields [`NoteEstimate::SILENT`].
    pub fn analyze_harmonics(
        &mut self,
        harmonics: &HarmonicSet,
        table: &NoteFrequencyTable,
    ) -> NoteEstimate {
        if harmonics.is_empty() {
            return NoteEstimate::SILENT;
        }

        self.scores.clear();
        self.scores.resize(table.len(), None);
        let mut total_amplitude = 0.0;

        for (rank, partial) in harmonics.iter().enumerate() {
            let fundamental = table.frequency(partial.note) / (rank + 1) as f64;
            let note = table.nearest_note(fundamental);

            let score = self.scores[note].get_or_insert(0.0);
            *score += fundamental.log2();

            if partial.amplitude.is_finite() && partial.amplitude > 0.0 {
                total_amplitude += partial.amplitude;
            }
        }

        let note = best_note(&self.scores).unwrap_or(0);
        let estimate = NoteEstimate {
            note,
            amplitude: total_amplitude.clamp(0.0, 1.0),
        };
        trace!(
            "Estimated {} ({}) at amplitude {:.4} from {} partials",
            note_name(note),
            note,
            estimate.amplitude,
            harmonics.len()
        );
        estimate
    }
}

/// Index of the highest score. Scanning upwards with a strict comparison
/// leaves the lowest note in place on a tie.
fn best_note(scores: &[Option<f64>]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (note, score) in scores.iter().enumerate() {
        if let Some(score) = *score {
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((note, score));
            }
        }
    }
    best.map(|(note, _)| note)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harmonics::Partial;

    fn set(partials: &[(usize, f64)]) -> HarmonicSet {
        HarmonicSet::from_partials(
            partials
                .iter()
                .map(|&(note, amplitude)| Partial { note, amplitude })
                .collect(),
        )
    }

    fn estimate(partials: &[(usize, f64)]) -> NoteEstimate {
        PitchEstimator::new().analyze_harmonics(&set(partials), NoteFrequencyTable::standard())
    }

    #[test]
    fn empty_set_is_silent() {
        assert_eq!(estimate(&[]), NoteEstimate { note: 0, amplitude: 0.0 });
    }

    #[test]
    fn single_partial_is_its_own_fundamental() {
        let result = estimate(&[(69, 0.4)]);
        assert_eq!(result.note, 69);
        assert!((result.amplitude - 0.4).abs() < 1e-12);
    }

    #[test]
    fn harmonic_series_resolves_to_fundamental() {
        // A2 and its harmonics 2..6 on the nearest notes
        let result = estimate(&[
            (45, 0.10),
            (57, 0.20),
            (64, 0.15),
            (69, 0.10),
            (73, 0.05),
            (76, 0.05),
        ]);
        assert_eq!(result.note, 45);
        assert!((result.amplitude - 0.65).abs() < 1e-9);
    }

    #[test]
    fn agreeing_partials_outvote_a_stray_one() {
        // A3 and A4/2 both imply A3; A5/3 lands on D4 on its own.
        let result = estimate(&[(57, 0.2), (69, 0.2), (81, 0.1)]);
        assert_eq!(result.note, 57);
    }

    #[test]
    fn tied_scores_go_to_the_lower_note() {
        assert_eq!(best_note(&[None, Some(2.0), Some(3.0), Some(3.0)]), Some(2));
        assert_eq!(best_note(&[Some(5.0), None, Some(5.0)]), Some(0));
        assert_eq!(best_note(&[None, Some(1.0), Some(4.0), Some(2.0)]), Some(2));
        assert_eq!(best_note(&[None, None]), None);
    }

    #[test]
    fn repeated_estimates_are_identical() {
        let mut estimator = PitchEstimator::new();
        let table = NoteFrequencyTable::standard();
        let partials = set(&[(50, 0.3), (62, 0.1), (70, 0.2)]);
        let first = estimator.analyze_harmonics(&partials, table);
        let again = estimator.analyze_harmonics(&partials, table);
        assert_eq!(first, again);
    }

    #[test]
    fn amplitude_is_clamped() {
        assert_eq!(estimate(&[(60, 0.8), (72, 0.9)]).amplitude, 1.0);
        assert_eq!(estimate(&[(60, -0.5)]).amplitude, 0.0);
    }
}
