//! Top-K partial selection.
//!
//! The loudest notes of a frame are picked with a bounded min-heap and then
//! handed on sorted by note index, so that a partial's position in the set
//! can be read as its harmonic number.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// One extracted partial: a note index and the amplitude mapped onto it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partial {
    pub note: usize,
    pub amplitude: f64,
}

/// Up to K partials, ascending by note index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarmonicSet {
    partials: Vec<Partial>,
}

impl HarmonicSet {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            partials: Vec::with_capacity(capacity),
        }
    }

    /// Builds a set from arbitrary partials, sorting them by note.
    pub fn from_partials(mut partials: Vec<Partial>) -> Self {
        partials.sort_unstable_by_key(|p| p.note);
        Self { partials }
    }

    pub fn as_slice(&self) -> &[Partial] {
        &self.partials
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Partial> {
        self.partials.iter()
    }

    pub fn len(&self) -> usize {
        self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    pub fn clear(&mut self) {
        self.partials.clear();
    }

    /// Drops every partial quieter than `fraction` of the loudest one.
    ///
    /// Window sidelobes and onset transients land a few percent below the
    /// fundamental; left in, they shift the harmonic ranks the estimator
    /// reads. A fraction of zero keeps everything.
    pub fn drop_below_fraction_of_loudest(&mut self, fraction: f64) {
        if fraction <= 0.0 {
            return;
        }
        let loudest = self.partials.iter().map(|p| p.amplitude).fold(0.0, f64::max);
        let floor = loudest * fraction;
        self.partials.retain(|p| p.amplitude >= floor);
    }
}

/// Heap entry. Orders by amplitude, and for equal amplitudes the higher
/// note counts as smaller so that it is evicted first.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    amplitude: f64,
    note: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.amplitude
            .total_cmp(&other.amplitude)
            .then_with(|| other.note.cmp(&self.note))
    }
}

/// Reusable bounded min-heap. Storage is reserved up front so selection on
/// the audio thread does not allocate as long as `k` stays within capacity.
#[derive(Debug)]
pub struct HarmonicSelector {
    heap: BinaryHeap<Reverse<Candidate>>,
}

impl HarmonicSelector {
    pub fn with_capacity(max_k: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(max_k + 1),
        }
    }

    /// Writes the `k` loudest non-zero entries of `amplitude_by_note` into
    /// `out`, each amplitude multiplied by `scale`.
    ///
    /// Notes are visited in ascending order and a newcomer only displaces
    /// the current minimum when strictly louder, so among equal amplitudes
    /// the lower note is kept.
    pub fn select(&mut self, k: usize, amplitude_by_note: &[f64], scale: f64, out: &mut HarmonicSet) {
        self.heap.clear();
        out.clear();
        if k == 0 {
            return;
        }

        for (note, &amplitude) in amplitude_by_note.iter().enumerate() {
            if amplitude <= 0.0 || amplitude.is_nan() {
                continue;
            }
            let candidate = Candidate { amplitude, note };
            if self.heap.len() < k {
                self.heap.push(Reverse(candidate));
            } else if let Some(&Reverse(min)) = self.heap.peek() {
                if min.amplitude < amplitude {
                    self.heap.pop();
                    self.heap.push(Reverse(candidate));
                }
            }
        }

        out.partials.extend(self.heap.drain().map(|Reverse(c)| Partial {
            note: c.note,
            amplitude: c.amplitude * scale,
        }));
        out.partials.sort_unstable_by_key(|p| p.note);
    }
}

/// Picks the `k` loudest notes of `amplitude_by_note`, sorted by note index.
///
/// Returns fewer than `k` partials when fewer notes carry any energy.
pub fn determine_harmonics(k: usize, amplitude_by_note: &[f64]) -> HarmonicSet {
    let mut selector = HarmonicSelector::with_capacity(k);
    let mut out = HarmonicSet::with_capacity(k);
    selector.select(k, amplitude_by_note, 1.0, &mut out);
    out
}
