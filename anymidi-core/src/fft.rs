//! # Spectral Analyzer Module
//!
//! Turns a continuous stream of samples into one magnitude spectrum per
//! frame and extracts the loudest partials from it.
//!
//! ## Features
//! - Sample FIFO with a single "spectrum pending" slot; frames arriving while
//!   a spectrum is still pending are skipped, never queued
//! - Selectable window with per-window amplitude compensation
//! - Forward FFT via RustFFT over a zero-padded frame (twice the frame size)
//! - Noise gate and lobe merging before bins are mapped onto notes
//! - No allocation after construction

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use tracing::{debug, trace};

use crate::config::{AnalyzerSettings, MAX_PARTIALS};
use crate::error::Result;
use crate::harmonics::{HarmonicSelector, HarmonicSet};
use crate::tuning::{NoteFrequencyTable, NOTE_COUNT};
use crate::window::WindowingMethod;

/// Bins below this magnitude (raw transform units) are treated as noise.
pub const NOISE_FLOOR: f32 = 1.0;

/// Windowed FFT analyzer fed one sample at a time.
pub struct SpectralAnalyzer {
    settings: AnalyzerSettings,
    fft: Arc<dyn Fft<f32>>,

    /// Samples of the frame being filled
    fifo: Vec<f32>,
    fifo_index: usize,

    method: WindowingMethod,
    /// `frame_size + 1` points; only the first `frame_size` are applied
    window: Vec<f32>,
    compensation: f32,

    /// `2 * frame_size` complex points, frame in the first half
    fft_buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,

    /// Magnitudes of the pending spectrum, `2 * frame_size` long
    magnitudes: Vec<f32>,
    ready: bool,

    /// Working copies for harmonic extraction
    cleaned: Vec<f32>,
    note_amplitudes: Vec<f64>,
    selector: HarmonicSelector,

    frames_analyzed: u64,
    frames_dropped: u64,
}

impl SpectralAnalyzer {
    pub fn new(settings: AnalyzerSettings, method: WindowingMethod) -> Result<Self> {
        settings.validate()?;
        let frame_size = settings.frame_size;
        let transform_size = frame_size * 2;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(transform_size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let mut window = vec![0.0; frame_size + 1];
        method.fill_table(&mut window);

        debug!(
            "SpectralAnalyzer created: sample_rate={}, frame_size={}, window={}",
            settings.sample_rate, frame_size, method
        );

        Ok(Self {
            settings,
            fft,
            fifo: vec![0.0; frame_size],
            fifo_index: 0,
            method,
            window,
            compensation: method.amplitude_compensation() as f32,
            fft_buffer: vec![Complex::new(0.0, 0.0); transform_size],
            scratch,
            magnitudes: vec![0.0; transform_size],
            ready: false,
            cleaned: vec![0.0; frame_size + 1],
            note_amplitudes: vec![0.0; NOTE_COUNT],
            selector: HarmonicSelector::with_capacity(MAX_PARTIALS),
            frames_analyzed: 0,
            frames_dropped: 0,
        })
    }

    pub fn settings(&self) -> AnalyzerSettings {
        self.settings
    }

    pub fn frame_size(&self) -> usize {
        self.settings.frame_size
    }

    pub fn windowing_method(&self) -> WindowingMethod {
        self.method
    }

    /// Switches the window. Takes effect from the next completed frame.
    pub fn set_windowing_method(&mut self, method: WindowingMethod) {
        if method == self.method {
            return;
        }
        method.fill_table(&mut self.window);
        self.compensation = method.amplitude_compensation() as f32;
        self.method = method;
        debug!("Windowing method set to {}", method);
    }

    /// Appends one sample. When the frame fills up and no spectrum is
    /// pending, the frame is windowed and transformed and the spectrum
    /// becomes ready. The cursor wraps either way.
    pub fn push_sample(&mut self, sample: f32) {
        self.fifo[self.fifo_index] = sample;
        self.fifo_index += 1;

        if self.fifo_index == self.settings.frame_size {
            if self.ready {
                self.frames_dropped += 1;
                trace!("Frame dropped, previous spectrum not consumed yet");
            } else {
                self.transform();
                self.ready = true;
                self.frames_analyzed += 1;
            }
            self.fifo_index = 0;
        }
    }

    fn transform(&mut self) {
        let frame_size = self.settings.frame_size;

        let (frame, padding) = self.fft_buffer.split_at_mut(frame_size);
        for ((slot, &sample), &w) in frame.iter_mut().zip(&self.fifo).zip(&self.window) {
            *slot = Complex::new(sample * w, 0.0);
        }
        padding.fill(Complex::new(0.0, 0.0));

        self.fft.process_with_scratch(&mut self.fft_buffer, &mut self.scratch);

        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.fft_buffer) {
            *magnitude = bin.norm() * self.compensation;
        }
    }

    /// Whether a spectrum is waiting to be analysed.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Releases the pending spectrum so the next full frame is transformed.
    pub fn consume(&mut self) {
        self.ready = false;
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Analysed half of the most recent spectrum, bins `0..=frame_size`.
    pub fn spectrum(&self) -> &[f32] {
        &self.magnitudes[..=self.settings.frame_size]
    }

    /// Centre frequency of a bin in Hz.
    pub fn bin_frequency(&self, bin: usize) -> f64 {
        bin as f64 * self.settings.sample_rate / (2 * self.settings.frame_size) as f64
    }

    /// Factor that maps raw transform magnitudes onto signal amplitude.
    fn amplitude_scale(&self) -> f64 {
        1.0 / (2 * self.settings.frame_size) as f64
    }

    /// Loudest bin of the current spectrum as `(frequency Hz, amplitude)`.
    pub fn peak_frequency(&self) -> (f64, f64) {
        let spectrum = self.spectrum();
        let mut target_bin = 0;
        let mut max = 0.0f32;
        for (bin, &magnitude) in spectrum.iter().enumerate() {
            if magnitude > max {
                max = magnitude;
                target_bin = bin;
            }
        }
        (
            self.bin_frequency(target_bin),
            max as f64 * self.amplitude_scale(),
        )
    }

    /// Gates bins under [`NOISE_FLOOR`] and collapses every run of
    /// consecutive non-zero bins into its loudest bin.
    ///
    /// A plucked note smears over a few neighbouring bins; without merging,
    /// that energy would be spread across adjacent notes later on.
    pub fn clean_up_bins(spectrum: &mut [f32]) {
        let len = spectrum.len();
        let mut lobe_start: Option<usize> = None;
        let mut peak_bin = 0;

        for bin in 0..=len {
            let active = bin < len && spectrum[bin] >= NOISE_FLOOR;
            if bin < len && !active {
                spectrum[bin] = 0.0;
            }

            match (active, lobe_start) {
                (true, None) => {
                    lobe_start = Some(bin);
                    peak_bin = bin;
                }
                (true, Some(_)) => {
                    if spectrum[bin] > spectrum[peak_bin] {
                        peak_bin = bin;
                    }
                }
                (false, Some(start)) => {
                    let mut total = 0.0;
                    for value in &mut spectrum[start..bin] {
                        total += *value;
                        *value = 0.0;
                    }
                    spectrum[peak_bin] = total;
                    lobe_start = None;
                }
                (false, None) => {}
            }
        }
    }

    /// Accumulates each bin's magnitude onto its nearest note.
    ///
    /// Bin 0 is skipped. `amplitude_by_note` is cleared first and must be
    /// as long as the table.
    pub fn map_bins_to_notes(
        &self,
        table: &NoteFrequencyTable,
        spectrum: &[f32],
        amplitude_by_note: &mut [f64],
    ) {
        Self::accumulate_notes(self.settings, table, spectrum, amplitude_by_note);
    }

    fn accumulate_notes(
        settings: AnalyzerSettings,
        table: &NoteFrequencyTable,
        spectrum: &[f32],
        amplitude_by_note: &mut [f64],
    ) {
        amplitude_by_note.fill(0.0);
        let bin_width = settings.sample_rate / (2 * settings.frame_size) as f64;
        let last_bin = spectrum.len().min(settings.frame_size);
        for (bin, &magnitude) in spectrum.iter().enumerate().take(last_bin).skip(1) {
            if magnitude == 0.0 {
                continue;
            }
            let note = table.nearest_note(bin as f64 * bin_width);
            amplitude_by_note[note] += magnitude as f64;
        }
    }

    /// Cleans a copy of the pending spectrum, maps it onto notes and writes
    /// the `k` loudest into `out`, ascending by note. Amplitudes are scaled
    /// so that a full-scale sinusoid reads close to 1.0.
    pub fn extract_harmonics(&mut self, k: usize, table: &NoteFrequencyTable, out: &mut HarmonicSet) {
        // Every table spans NOTE_COUNT notes, so the buffer never resizes.
        debug_assert_eq!(table.len(), self.note_amplitudes.len());

        let frame_size = self.settings.frame_size;
        self.cleaned.copy_from_slice(&self.magnitudes[..=frame_size]);
        Self::clean_up_bins(&mut self.cleaned);
        Self::accumulate_notes(self.settings, table, &self.cleaned, &mut self.note_amplitudes);

        let scale = self.amplitude_scale();
        self.selector
            .select(k.min(MAX_PARTIALS), &self.note_amplitudes, scale, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn analyzer(method: WindowingMethod) -> SpectralAnalyzer {
        SpectralAnalyzer::new(AnalyzerSettings::default(), method).unwrap()
    }

    fn push_sine(analyzer: &mut SpectralAnalyzer, freq: f64, amplitude: f64, count: usize) {
        let sr = analyzer.settings().sample_rate;
        for i in 0..count {
            let x = amplitude * (2.0 * PI * freq * i as f64 / sr).sin();
            analyzer.push_sample(x as f32);
        }
    }

    #[test]
    fn spectrum_ready_after_exactly_one_frame() {
        let mut fft = analyzer(WindowingMethod::Hann);
        push_sine(&mut fft, 440.0, 0.5, 1023);
        assert!(!fft.is_ready());
        fft.push_sample(0.0);
        assert!(fft.is_ready());
        assert_eq!(fft.frames_analyzed(), 1);
    }

    #[test]
    fn overrun_skips_frame_but_keeps_cursor_moving() {
        let mut fft = analyzer(WindowingMethod::Hann);
        push_sine(&mut fft, 440.0, 0.5, 1024);
        let before = fft.spectrum().to_vec();

        // Second frame of silence while the first is still pending
        for _ in 0..1024 {
            fft.push_sample(0.0);
        }
        assert_eq!(fft.frames_dropped(), 1);
        assert_eq!(fft.spectrum(), &before[..]);

        // Once consumed, the next full frame is transformed again
        fft.consume();
        for _ in 0..1024 {
            fft.push_sample(0.0);
        }
        assert!(fft.is_ready());
        assert_eq!(fft.frames_analyzed(), 2);
        assert!(fft.spectrum().iter().all(|&m| m == 0.0));
    }

    #[test]
    fn peak_lands_on_the_sine_frequency() {
        let mut fft = analyzer(WindowingMethod::Hann);
        push_sine(&mut fft, 1500.0, 0.5, 1024);
        let (freq, amplitude) = fft.peak_frequency();
        let bin_width = fft.bin_frequency(1);
        assert!((freq - 1500.0).abs() <= bin_width, "peak at {} Hz", freq);
        assert!(amplitude > 0.1 && amplitude < 0.6, "amplitude {}", amplitude);
    }

    #[test]
    fn clean_up_gates_and_merges_lobes() {
        let mut bins = vec![0.5, 2.0, 6.0, 3.0, 0.2, 0.0, 1.5, 4.0, 0.9, 5.0, 5.0];
        SpectralAnalyzer::clean_up_bins(&mut bins);
        assert_eq!(bins, vec![0.0, 0.0, 11.0, 0.0, 0.0, 0.0, 0.0, 5.5, 0.0, 10.0, 0.0]);
    }

    #[test]
    fn clean_up_leaves_isolated_bins_alone() {
        let mut bins = vec![0.0, 3.0, 0.0, 0.0, 7.0];
        SpectralAnalyzer::clean_up_bins(&mut bins);
        assert_eq!(bins, vec![0.0, 3.0, 0.0, 0.0, 7.0]);
    }

    #[test]
    fn mapping_skips_dc_and_accumulates() {
        let fft = analyzer(WindowingMethod::Hann);
        let table = NoteFrequencyTable::standard();
        let mut spectrum = vec![0.0f32; 1025];
        spectrum[0] = 100.0;
        // 440 Hz sits between bins 18 (421.9 Hz) and 19 (445.3 Hz)
        spectrum[19] = 4.0;
        let mut amps = vec![0.0; table.len()];
        fft.map_bins_to_notes(table, &spectrum, &mut amps);
        assert_eq!(amps[69], 4.0);
        assert_eq!(amps.iter().sum::<f64>(), 4.0);
    }

    #[test]
    fn sinusoid_concentrates_on_its_note() {
        let table = NoteFrequencyTable::standard();
        for method in [WindowingMethod::Hann, WindowingMethod::Blackman, WindowingMethod::Kaiser] {
            for note in [69usize, 76, 81] {
                let mut fft = analyzer(method);
                push_sine(&mut fft, table.frequency(note), 0.5, 1024);

                let mut spectrum = fft.spectrum().to_vec();
                SpectralAnalyzer::clean_up_bins(&mut spectrum);
                let mut amps = vec![0.0; table.len()];
                fft.map_bins_to_notes(table, &spectrum, &mut amps);

                let total: f64 = amps.iter().sum();
                let near: f64 = amps[note - 1..=note + 1].iter().sum();
                assert!(total > 0.0);
                assert!(
                    near / total >= 0.9,
                    "{} note {}: {:.3} of energy near the note",
                    method,
                    note,
                    near / total
                );
            }
        }
    }

    #[test]
    fn extracted_amplitude_tracks_input_level() {
        let table = NoteFrequencyTable::standard();
        let mut fft = analyzer(WindowingMethod::Hann);
        push_sine(&mut fft, 440.0, 0.5, 1024);
        let mut set = HarmonicSet::with_capacity(6);
        fft.extract_harmonics(6, table, &mut set);

        assert!(!set.is_empty());
        let loudest = set
            .iter()
            .max_by(|a, b| a.amplitude.total_cmp(&b.amplitude))
            .unwrap();
        assert_eq!(loudest.note, 69);
        assert!(
            (loudest.amplitude - 0.5).abs() < 0.1,
            "amplitude {}",
            loudest.amplitude
        );
    }

    #[test]
    fn extraction_reuses_its_note_buffer() {
        let detuned = NoteFrequencyTable::new(432.0);
        let mut fft = analyzer(WindowingMethod::Hann);
        let buffer = fft.note_amplitudes.as_ptr();
        let mut set = HarmonicSet::with_capacity(6);

        for table in [NoteFrequencyTable::standard(), &detuned] {
            push_sine(&mut fft, 440.0, 0.5, 1024);
            fft.extract_harmonics(6, table, &mut set);
            fft.consume();
            assert!(!set.is_empty());
            assert_eq!(fft.note_amplitudes.len(), NOTE_COUNT);
            assert_eq!(fft.note_amplitudes.as_ptr(), buffer);
        }
    }

    #[test]
    fn window_change_swaps_compensation() {
        let mut fft = analyzer(WindowingMethod::Hamming);
        fft.set_windowing_method(WindowingMethod::Rectangular);
        assert_eq!(fft.windowing_method(), WindowingMethod::Rectangular);
        push_sine(&mut fft, 750.0, 0.5, 1024);
        // 750 Hz is exactly bin 32 with zero padding; rectangular gives N/2 * A
        let peak = fft.spectrum()[32];
        assert!((peak - 256.0).abs() < 1.0, "peak {}", peak);
    }
}
