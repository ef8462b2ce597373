//! Per-callback orchestration: filter, analyse, decide, schedule, flush.

use tracing::{debug, trace, warn};

use crate::config::{AnalysisConfig, AnalyzerSettings};
use crate::error::Result;
use crate::fft::SpectralAnalyzer;
use crate::filter::InputFilter;
use crate::harmonics::HarmonicSet;
use crate::midi::{Clock, MessageScheduler, MidiSink};
use crate::note_state::{NoteEventStateMachine, NoteState, NoteTransition, velocity_from_amplitude};
use crate::pitch::{NoteEstimate, PitchEstimator};
use crate::tuning::{NoteFrequencyTable, note_name};

/// Owns the whole audio-to-MIDI pipeline for one input stream.
///
/// Everything the per-sample path touches is allocated in [`AudioProcessor::new`];
/// `process_block` is safe to call from a real-time thread.
pub struct AudioProcessor {
    settings: AnalyzerSettings,
    config: AnalysisConfig,
    table: &'static NoteFrequencyTable,
    filter: InputFilter,
    analyzer: SpectralAnalyzer,
    estimator: PitchEstimator,
    notes: NoteEventStateMachine,
    scheduler: MessageScheduler,
    harmonics: HarmonicSet,
    last_estimate: NoteEstimate,
}

impl AudioProcessor {
    pub fn new(settings: AnalyzerSettings, config: AnalysisConfig, clock: Box<dyn Clock>) -> Result<Self> {
        settings.validate()?;
        config.validate()?;

        let filter = InputFilter::new(settings.sample_rate, config.low_cut_hz, config.high_cut_hz);
        let analyzer = SpectralAnalyzer::new(settings, config.window)?;
        let notes = NoteEventStateMachine::new(config.attack_threshold, config.release_threshold);
        let mut scheduler = MessageScheduler::new(settings.sample_rate, clock);
        scheduler.configure(config.midi_channel, config.note_offset, config.output_range.clone());

        debug!(
            "Audio processor ready: {} Hz, {} sample frames, {} window, {} partials",
            settings.sample_rate, settings.frame_size, config.window, config.partial_count
        );

        Ok(Self {
            settings,
            table: NoteFrequencyTable::standard(),
            filter,
            analyzer,
            estimator: PitchEstimator::new(),
            notes,
            scheduler,
            harmonics: HarmonicSet::with_capacity(crate::config::MAX_PARTIALS),
            last_estimate: NoteEstimate::SILENT,
            config,
        })
    }

    pub fn settings(&self) -> AnalyzerSettings {
        self.settings
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn note_state(&self) -> NoteState {
        self.notes.state()
    }

    /// Estimate from the most recently analysed frame.
    pub fn last_estimate(&self) -> NoteEstimate {
        self.last_estimate
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    /// Replaces the configuration snapshot. An invalid snapshot is rejected
    /// and the current one stays in effect.
    ///
    /// When the channel, offset or output range changes while a note is
    /// sounding, that note's NoteOff is queued under the old routing and the
    /// state machine starts over, so the note sounds again under the new
    /// routing on the next loud frame. The NoteOff goes out with the next
    /// flush.
    pub fn apply_config(&mut self, config: AnalysisConfig) -> Result<()> {
        if let Err(e) = config.validate() {
            warn!("Rejected configuration: {}", e);
            return Err(e);
        }

        let rerouted = config.midi_channel != self.config.midi_channel
            || config.note_offset != self.config.note_offset
            || config.output_range != self.config.output_range;
        if rerouted {
            if let NoteState::Sounding { note, .. } = self.notes.state() {
                debug!("Output routing changed, releasing {}", note_name(note));
                self.scheduler.create_event(note, 0, false);
                self.notes.reset();
            }
        }

        self.filter.set_cutoffs(config.low_cut_hz, config.high_cut_hz);
        self.analyzer.set_windowing_method(config.window);
        self.notes
            .set_thresholds(config.attack_threshold, config.release_threshold);
        self.scheduler
            .configure(config.midi_channel, config.note_offset, config.output_range.clone());

        debug!("Configuration applied: {:?}", config);
        self.config = config;
        Ok(())
    }

    /// Runs one audio callback's worth of samples through the pipeline and
    /// flushes any resulting events to `sink`. Returns the number of events
    /// handed to the sink.
    ///
    /// At most one frame is analysed per call; a block longer than the
    /// frame size drops the frames in between.
    pub fn process_block(&mut self, samples: &[f32], sink: &mut dyn MidiSink) -> usize {
        for &sample in samples {
            let filtered = self.filter.process(sample);
            self.analyzer.push_sample(filtered);
        }

        if self.analyzer.is_ready() {
            self.analyze_frame();
            self.analyzer.consume();
        }

        match self.scheduler.flush(sink) {
            Ok(count) => count,
            Err(e) => {
                warn!("MIDI output failed, dropping events: {}", e);
                0
            }
        }
    }

    fn analyze_frame(&mut self) {
        self.analyzer
            .extract_harmonics(self.config.partial_count, self.table, &mut self.harmonics);
        self.harmonics
            .drop_below_fraction_of_loudest(self.config.partial_floor);
        let mut estimate = self.estimator.analyze_harmonics(&self.harmonics, self.table);

        // An empty frame estimates note 0, which would never match the held note.
        if self.harmonics.is_empty() && self.config.release_on_silence {
            if let NoteState::Sounding { note, .. } = self.notes.state() {
                estimate = NoteEstimate { note, amplitude: 0.0 };
            }
        }

        if tracing::enabled!(tracing::Level::TRACE) {
            let (peak_hz, peak_amplitude) = self.analyzer.peak_frequency();
            trace!(
                "Frame {}: peak {:.1} Hz ({:.4}), estimate {} at {:.4}",
                self.analyzer.frames_analyzed(),
                peak_hz,
                peak_amplitude,
                note_name(estimate.note),
                estimate.amplitude
            );
        }
        self.last_estimate = estimate;

        let velocity = velocity_from_amplitude(estimate.amplitude);
        for transition in self.notes.decide(estimate.note, estimate.amplitude).iter() {
            match transition {
                NoteTransition::On(note) => self.scheduler.create_event(note, velocity, true),
                NoteTransition::Off(note) => self.scheduler.create_event(note, 0, false),
            };
        }
    }

    /// Silences the output and forgets the sounding note.
    pub fn all_notes_off(&mut self, sink: &mut dyn MidiSink) -> Result<()> {
        self.notes.reset();
        self.scheduler.all_notes_off(sink)
    }

    /// Clears filter memory and note state, e.g. after a stream restart.
    pub fn reset(&mut self) {
        self.filter.reset();
        self.notes.reset();
        self.last_estimate = NoteEstimate::SILENT;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::midi::{ManualClock, MidiMessage, ScheduledEvent};
    use crate::window::WindowingMethod;
    use std::f64::consts::PI;

    #[derive(Default)]
    struct RecordingSink {
        messages: Vec<MidiMessage>,
    }

    impl MidiSink for RecordingSink {
        fn send_block(&mut self, events: &[ScheduledEvent]) -> Result<()> {
            self.messages.extend(events.iter().map(|e| e.message));
            Ok(())
        }

        fn send_now(&mut self, message: MidiMessage) -> Result<()> {
            self.messages.push(message);
            Ok(())
        }
    }

    struct BrokenSink;

    impl MidiSink for BrokenSink {
        fn send_block(&mut self, _events: &[ScheduledEvent]) -> Result<()> {
            Err(CoreError::Sink("unplugged".to_string()))
        }

        fn send_now(&mut self, _message: MidiMessage) -> Result<()> {
            Err(CoreError::Sink("unplugged".to_string()))
        }
    }

    fn hann_config() -> AnalysisConfig {
        AnalysisConfig {
            window: WindowingMethod::Hann,
            ..Default::default()
        }
    }

    fn processor(config: AnalysisConfig) -> AudioProcessor {
        AudioProcessor::new(AnalyzerSettings::default(), config, Box::new(ManualClock::new())).unwrap()
    }

    /// Feeds `frames` frames of a sine (or silence if `amplitude` is 0) in
    /// blocks of 512 samples, continuing from sample `offset`.
    fn feed(p: &mut AudioProcessor, sink: &mut dyn MidiSink, amplitude: f64, frames: usize, offset: usize) {
        let sr = p.settings().sample_rate;
        let total = frames * p.settings().frame_size;
        let mut block = vec![0.0f32; 512];
        for start in (0..total).step_by(512) {
            for (i, slot) in block.iter_mut().enumerate() {
                let n = (offset + start + i) as f64;
                *slot = (amplitude * (2.0 * PI * 440.0 * n / sr).sin()) as f32;
            }
            p.process_block(&block, sink);
        }
    }

    #[test]
    fn invalid_config_is_rejected_and_old_one_kept() {
        let mut p = processor(hann_config());
        let bad = AnalysisConfig {
            release_threshold: 0.5,
            ..hann_config()
        };
        assert!(p.apply_config(bad).is_err());
        assert_eq!(p.config(), &hann_config());
    }

    #[test]
    fn config_changes_reach_the_analyzer() {
        let mut p = processor(hann_config());
        let next = AnalysisConfig {
            window: WindowingMethod::Blackman,
            partial_count: 4,
            ..hann_config()
        };
        p.apply_config(next.clone()).unwrap();
        assert_eq!(p.analyzer().windowing_method(), WindowingMethod::Blackman);
        assert_eq!(p.config(), &next);
    }

    #[test]
    fn silence_produces_nothing() {
        let mut p = processor(hann_config());
        let mut sink = RecordingSink::default();
        feed(&mut p, &mut sink, 0.0, 4, 0);
        assert!(sink.messages.is_empty());
        assert_eq!(p.note_state(), NoteState::Idle);
        assert_eq!(p.analyzer().frames_analyzed(), 4);
    }

    #[test]
    fn sine_sounds_a4_and_silence_releases_it() {
        let mut p = processor(hann_config());
        let mut sink = RecordingSink::default();
        feed(&mut p, &mut sink, 0.5, 6, 0);

        assert!(matches!(p.note_state(), NoteState::Sounding { note: 69, .. }));
        let on = sink.messages.iter().find_map(|m| match *m {
            MidiMessage::NoteOn { note: 69, velocity, channel } => Some((velocity, channel)),
            _ => None,
        });
        let (velocity, channel) = on.expect("no NoteOn for A4");
        assert_eq!(channel, 9);
        assert!((60..=70).contains(&velocity), "velocity {}", velocity);

        feed(&mut p, &mut sink, 0.0, 4, 6 * 1024);
        assert_eq!(p.note_state(), NoteState::Idle);
        assert_eq!(
            sink.messages.last(),
            Some(&MidiMessage::NoteOff { channel: 9, note: 69 })
        );
    }

    #[test]
    fn default_config_holds_one_note_for_a_steady_tone() {
        let mut p = processor(AnalysisConfig::default());
        let mut sink = RecordingSink::default();
        feed(&mut p, &mut sink, 0.5, 8, 0);

        assert_eq!(sink.messages.len(), 1, "{:?}", sink.messages);
        let MidiMessage::NoteOn { channel: 9, note: 69, velocity } = sink.messages[0] else {
            panic!("expected A4 on channel 10, got {:?}", sink.messages[0]);
        };
        assert!((52..=66).contains(&velocity), "velocity {}", velocity);

        feed(&mut p, &mut sink, 0.0, 4, 8 * 1024);
        assert_eq!(
            sink.messages[1..],
            [MidiMessage::NoteOff { channel: 9, note: 69 }]
        );
    }

    #[test]
    fn rerouting_releases_the_held_note_where_it_started() {
        let mut p = processor(AnalysisConfig::default());
        let mut sink = RecordingSink::default();
        feed(&mut p, &mut sink, 0.5, 6, 0);

        p.apply_config(AnalysisConfig {
            midi_channel: 1,
            note_offset: 12,
            ..AnalysisConfig::default()
        })
        .unwrap();
        assert_eq!(p.note_state(), NoteState::Idle);

        feed(&mut p, &mut sink, 0.5, 2, 6 * 1024);
        feed(&mut p, &mut sink, 0.0, 4, 8 * 1024);

        let routed: Vec<(bool, u8, u8)> = sink
            .messages
            .iter()
            .map(|m| match *m {
                MidiMessage::NoteOn { channel, note, .. } => (true, channel, note),
                MidiMessage::NoteOff { channel, note } => (false, channel, note),
                MidiMessage::AllNotesOff { channel } => panic!("unexpected panic on {}", channel),
            })
            .collect();
        assert_eq!(
            routed,
            vec![(true, 9, 69), (false, 9, 69), (true, 0, 81), (false, 0, 81)]
        );
    }

    #[test]
    fn rerouting_while_idle_sends_nothing() {
        let mut p = processor(AnalysisConfig::default());
        let mut sink = RecordingSink::default();
        p.apply_config(AnalysisConfig {
            midi_channel: 2,
            ..AnalysisConfig::default()
        })
        .unwrap();
        feed(&mut p, &mut sink, 0.0, 2, 0);
        assert!(sink.messages.is_empty());
    }

    #[test]
    fn threshold_changes_keep_the_note_sounding() {
        let mut p = processor(AnalysisConfig::default());
        let mut sink = RecordingSink::default();
        feed(&mut p, &mut sink, 0.5, 6, 0);
        p.apply_config(AnalysisConfig {
            attack_threshold: 0.2,
            ..AnalysisConfig::default()
        })
        .unwrap();
        feed(&mut p, &mut sink, 0.5, 2, 6 * 1024);

        assert!(matches!(p.note_state(), NoteState::Sounding { note: 69, .. }));
        assert_eq!(sink.messages.len(), 1, "{:?}", sink.messages);
    }

    #[test]
    fn without_silence_release_the_note_hangs() {
        let config = AnalysisConfig {
            release_on_silence: false,
            ..hann_config()
        };
        let mut p = processor(config);
        let mut sink = RecordingSink::default();
        feed(&mut p, &mut sink, 0.5, 6, 0);
        feed(&mut p, &mut sink, 0.0, 4, 6 * 1024);
        assert!(matches!(p.note_state(), NoteState::Sounding { note: 69, .. }));
        assert!(!sink.messages.contains(&MidiMessage::NoteOff { channel: 9, note: 69 }));
    }

    #[test]
    fn broken_sink_does_not_stop_processing() {
        let mut p = processor(hann_config());
        feed(&mut p, &mut BrokenSink, 0.5, 6, 0);
        assert!(matches!(p.note_state(), NoteState::Sounding { note: 69, .. }));
    }

    #[test]
    fn all_notes_off_resets_state() {
        let mut p = processor(hann_config());
        let mut sink = RecordingSink::default();
        feed(&mut p, &mut sink, 0.5, 6, 0);
        p.all_notes_off(&mut sink).unwrap();
        assert_eq!(p.note_state(), NoteState::Idle);
        assert_eq!(
            sink.messages.last(),
            Some(&MidiMessage::AllNotesOff { channel: 9 })
        );
    }
}
