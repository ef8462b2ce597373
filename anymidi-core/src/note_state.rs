//! Monophonic note on/off decisions.
//!
//! A plucked string never really stops: its level decays smoothly, and the
//! per-frame estimates jitter on the way down. A plain threshold would either
//! chatter or never release, so the state machine uses separate attack and
//! release levels and only re-triggers a held note when it jumps to more
//! than three times its last level.

use tracing::trace;

/// MIDI notes are 0..128; estimates outside are ignored.
const VALID_NOTES: std::ops::Range<usize> = 0..128;

/// Ratio over the last level that counts as a fresh pluck of the same note.
const RETRIGGER_RATIO: f64 = 3.0;

/// What the single voice is doing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum NoteState {
    #[default]
    Idle,
    Sounding { note: usize, amplitude: f64 },
}

/// One on/off transition produced by a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteTransition {
    On(usize),
    Off(usize),
}

/// The transitions of a single decision, in emission order (at most an
/// off followed by an on).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transitions {
    items: [Option<NoteTransition>; 2],
}

impl Transitions {
    fn one(t: NoteTransition) -> Self {
        Self {
            items: [Some(t), None],
        }
    }

    fn two(first: NoteTransition, second: NoteTransition) -> Self {
        Self {
            items: [Some(first), Some(second)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items[0].is_none()
    }

    pub fn len(&self) -> usize {
        self.items.iter().flatten().count()
    }

    pub fn iter(&self) -> impl Iterator<Item = NoteTransition> + '_ {
        self.items.iter().flatten().copied()
    }
}

/// Converts an amplitude to a MIDI velocity, rounding to nearest.
pub fn velocity_from_amplitude(amplitude: f64) -> u8 {
    (amplitude.clamp(0.0, 1.0) * 127.0).round() as u8
}

/// Attack/release state machine for one voice.
#[derive(Debug, Clone)]
pub struct NoteEventStateMachine {
    state: NoteState,
    attack_threshold: f64,
    release_threshold: f64,
}

impl NoteEventStateMachine {
    pub fn new(attack_threshold: f64, release_threshold: f64) -> Self {
        Self {
            state: NoteState::Idle,
            attack_threshold,
            release_threshold,
        }
    }

    pub fn state(&self) -> NoteState {
        self.state
    }

    pub fn attack_threshold(&self) -> f64 {
        self.attack_threshold
    }

    pub fn release_threshold(&self) -> f64 {
        self.release_threshold
    }

    pub fn set_thresholds(&mut self, attack: f64, release: f64) {
        self.attack_threshold = attack;
        self.release_threshold = release;
    }

    /// Forgets any sounding note without emitting anything.
    pub fn reset(&mut self) {
        self.state = NoteState::Idle;
    }

    /// Feeds one estimate and returns the transitions it causes.
    pub fn decide(&mut self, note: usize, amplitude: f64) -> Transitions {
        if !VALID_NOTES.contains(&note) {
            return Transitions::default();
        }
        let attack = self.attack_threshold;

        let (next, transitions) = match self.state {
            NoteState::Idle => {
                if amplitude > attack {
                    (
                        NoteState::Sounding { note, amplitude },
                        Transitions::one(NoteTransition::On(note)),
                    )
                } else {
                    (NoteState::Idle, Transitions::default())
                }
            }
            NoteState::Sounding {
                note: last,
                amplitude: last_amplitude,
            } if note != last => {
                if amplitude > attack {
                    (
                        NoteState::Sounding { note, amplitude },
                        Transitions::two(NoteTransition::Off(last), NoteTransition::On(note)),
                    )
                } else {
                    // Keep the old level as the baseline for re-triggering.
                    (
                        NoteState::Sounding {
                            note: last,
                            amplitude: last_amplitude,
                        },
                        Transitions::default(),
                    )
                }
            }
            NoteState::Sounding {
                note: last,
                amplitude: last_amplitude,
            } => {
                if amplitude > last_amplitude * RETRIGGER_RATIO && amplitude > attack {
                    (
                        NoteState::Sounding { note, amplitude },
                        Transitions::two(NoteTransition::Off(last), NoteTransition::On(last)),
                    )
                } else if amplitude < self.release_threshold {
                    (NoteState::Idle, Transitions::one(NoteTransition::Off(last)))
                } else {
                    (NoteState::Sounding { note, amplitude }, Transitions::default())
                }
            }
        };

        if !transitions.is_empty() {
            trace!("{:?} -> {:?}: {:?}", self.state, next, transitions);
        }
        self.state = next;
        transitions
    }
}
