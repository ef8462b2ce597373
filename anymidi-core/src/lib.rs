// anymidi-core/src/lib.rs

//! The core logic for turning a monophonic instrument signal into MIDI.
//! This crate filters the input, finds the strongest partials of each
//! frame, estimates the played note from them and decides when notes start
//! and stop. It is completely headless: audio arrives through
//! [`AudioProcessor::process_block`] and MIDI leaves through a [`MidiSink`].

pub mod config;
pub mod error;
pub mod fft;
pub mod filter;
pub mod harmonics;
pub mod midi;
pub mod note_state;
pub mod pitch;
pub mod processor;
pub mod tuning;
pub mod window;

pub use config::{AnalysisConfig, AnalyzerSettings};
pub use error::{CoreError, Result};
pub use midi::{Clock, ManualClock, MidiMessage, MidiSink, MonotonicClock, ScheduledEvent};
pub use note_state::NoteState;
pub use processor::AudioProcessor;
pub use window::WindowingMethod;
