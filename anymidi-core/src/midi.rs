//! MIDI events, output sink interface and the per-callback scheduler.
//!
//! Transitions from the state machine become timestamped events here. The
//! scheduler buffers them and hands the whole batch to a [`MidiSink`] once
//! per audio callback; the sink owns the actual transport.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, trace};

use crate::error::Result;

/// Channel-mode controller number for "all notes off".
const ALL_NOTES_OFF_CC: u8 = 123;

/// Wire-level MIDI messages this crate produces. Channels are 0-based here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    AllNotesOff { channel: u8 },
}

impl MidiMessage {
    /// Convert to raw MIDI bytes
    pub fn to_bytes(&self) -> [u8; 3] {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => [0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F],
            MidiMessage::NoteOff { channel, note } => [0x80 | (channel & 0x0F), note & 0x7F, 0],
            MidiMessage::AllNotesOff { channel } => [0xB0 | (channel & 0x0F), ALL_NOTES_OFF_CC, 0],
        }
    }
}

/// A note event waiting in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    /// 0-based channel the scheduler was set to when the event was created.
    pub channel: u8,
    /// Outgoing MIDI note number (offset already applied).
    pub note: u8,
    pub velocity: u8,
    pub is_on: bool,
    /// Seconds since the scheduler was created.
    pub timestamp: f64,
}

/// An event as handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledEvent {
    pub message: MidiMessage,
    pub timestamp: f64,
    /// `timestamp` expressed in samples at the stream's rate.
    pub sample_position: u64,
}

/// Destination for outgoing MIDI. Implementations do the actual I/O.
pub trait MidiSink {
    /// Delivers one callback's worth of events, in order.
    fn send_block(&mut self, events: &[ScheduledEvent]) -> Result<()>;

    /// Sends a single message immediately, bypassing the buffer.
    fn send_now(&mut self, message: MidiMessage) -> Result<()>;
}

/// Source of wall-clock time in seconds.
pub trait Clock: Send {
    fn now_seconds(&self) -> f64;
}

/// Production clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_seconds(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests and offline rendering. Clones share time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.nanos
            .store((seconds.max(0.0) * 1e9).round() as u64, Ordering::Relaxed);
    }

    pub fn advance(&self, seconds: f64) {
        let delta = (seconds.max(0.0) * 1e9).round() as u64;
        self.nanos.fetch_add(delta, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> f64 {
        self.nanos.load(Ordering::Relaxed) as f64 / 1e9
    }
}

/// Buffers note events between flushes.
pub struct MessageScheduler {
    sample_rate: f64,
    /// 1-based, as shown to users
    channel: u8,
    note_offset: i32,
    output_range: Range<i32>,
    clock: Box<dyn Clock>,
    start_time: f64,
    pending: Vec<MidiEvent>,
    staged: Vec<ScheduledEvent>,
}

impl MessageScheduler {
    pub fn new(sample_rate: f64, clock: Box<dyn Clock>) -> Self {
        let start_time = clock.now_seconds();
        Self {
            sample_rate,
            channel: 10,
            note_offset: 0,
            output_range: 40..90,
            clock,
            start_time,
            pending: Vec::with_capacity(32),
            staged: Vec::with_capacity(32),
        }
    }

    /// Sets the channel (1-based), note offset and accepted output range.
    pub fn configure(&mut self, channel: u8, note_offset: i32, output_range: Range<i32>) {
        self.channel = channel.clamp(1, 16);
        self.note_offset = note_offset;
        self.output_range = output_range;
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Events buffered since the last flush.
    pub fn pending(&self) -> &[MidiEvent] {
        &self.pending
    }

    /// Seconds since the scheduler started.
    pub fn elapsed(&self) -> f64 {
        self.clock.now_seconds() - self.start_time
    }

    /// Buffers a note event for `note` plus the offset. Returns `false` when
    /// the shifted note falls outside the output range and was dropped.
    pub fn create_event(&mut self, note: usize, velocity: u8, is_on: bool) -> bool {
        let shifted = note as i64 + self.note_offset as i64;
        let in_range = shifted >= self.output_range.start as i64
            && shifted < self.output_range.end as i64
            && (0..128).contains(&shifted);
        if !in_range {
            trace!("Dropping note {} (shifted {}) outside output range", note, shifted);
            return false;
        }

        let event = MidiEvent {
            channel: self.channel - 1,
            note: shifted as u8,
            velocity: velocity.min(127),
            is_on,
            timestamp: self.elapsed(),
        };
        trace!("Scheduled {:?}", event);
        self.pending.push(event);
        true
    }

    /// Hands all buffered events to `sink` in submission order and clears
    /// the buffer, whether or not the sink succeeded. Returns the number of
    /// events handed over.
    pub fn flush(&mut self, sink: &mut dyn MidiSink) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        self.staged.clear();
        for event in &self.pending {
            let message = if event.is_on {
                MidiMessage::NoteOn {
                    channel: event.channel,
                    note: event.note,
                    velocity: event.velocity,
                }
            } else {
                MidiMessage::NoteOff {
                    channel: event.channel,
                    note: event.note,
                }
            };
            self.staged.push(ScheduledEvent {
                message,
                timestamp: event.timestamp,
                sample_position: (event.timestamp.max(0.0) * self.sample_rate).round() as u64,
            });
        }
        self.pending.clear();

        let count = self.staged.len();
        let result = sink.send_block(&self.staged);
        self.staged.clear();
        result.map(|_| count)
    }

    /// Drops anything buffered and sends "all notes off" on the channel.
    pub fn all_notes_off(&mut self, sink: &mut dyn MidiSink) -> Result<()> {
        self.pending.clear();
        debug!("All notes off on channel {}", self.channel);
        sink.send_now(MidiMessage::AllNotesOff {
            channel: self.channel - 1,
        })
    }
}
