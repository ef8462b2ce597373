//! # anymidi
//!
//! Listens to an audio input, follows the played note and sends it out as
//! MIDI.
//!
//! ## Architecture
//! - **Audio callback**: cpal accumulates samples into fixed blocks and
//!   forwards them over a bounded channel
//! - **Processing thread**: owns the [`AudioProcessor`] and the MIDI port and
//!   selects between audio blocks, configuration snapshots and shutdown
//! - **Main thread**: reads commands from stdin

mod audio;
mod control;
mod logging;
mod midi_out;

use std::io::BufRead;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, anyhow};
use anymidi_core::{AnalysisConfig, AnalyzerSettings, AudioProcessor, MonotonicClock, WindowingMethod};
use clap::Parser;
use cpal::traits::StreamTrait;
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use control::Command;
use midi_out::MidiPortSink;

/// Audio to MIDI converter for monophonic instruments
#[derive(Parser, Debug)]
#[command(name = "anymidi")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// List audio inputs and MIDI outputs, then exit
    #[arg(long)]
    list: bool,

    /// Audio input device (substring of its name)
    #[arg(short, long)]
    input: Option<String>,

    /// MIDI output port (index or substring of its name)
    #[arg(short, long)]
    port: Option<String>,

    /// Preferred sample rate in Hz
    #[arg(long, default_value_t = 48_000)]
    sample_rate: u32,

    /// Samples per analysis frame (power of two)
    #[arg(long, default_value_t = 1024)]
    frame_size: usize,

    /// Window applied to each frame
    #[arg(short, long, default_value = "hamming")]
    window: WindowingMethod,

    /// Amplitude a note must exceed to start
    #[arg(long, default_value_t = 0.1)]
    attack: f64,

    /// Amplitude below which a note stops
    #[arg(long, default_value_t = 0.001)]
    release: f64,

    /// Partials extracted per frame
    #[arg(long, default_value_t = 6)]
    partials: usize,

    /// Drop partials quieter than this fraction of the loudest one
    #[arg(long, default_value_t = 0.05)]
    partial_floor: f64,

    /// High-pass cutoff in Hz
    #[arg(long, default_value_t = 75.0)]
    low_cut: f64,

    /// Low-pass cutoff in Hz
    #[arg(long, default_value_t = 24_000.0)]
    high_cut: f64,

    /// MIDI channel (1-16)
    #[arg(short, long, default_value_t = 10)]
    channel: u8,

    /// Semitones added to every outgoing note
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    note_offset: i32,

    /// Keep a note sounding through frames without any partials
    #[arg(long)]
    hold_on_silence: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            attack_threshold: self.attack,
            release_threshold: self.release,
            partial_count: self.partials,
            partial_floor: self.partial_floor,
            low_cut_hz: self.low_cut,
            high_cut_hz: self.high_cut,
            window: self.window,
            midi_channel: self.channel,
            note_offset: self.note_offset,
            release_on_silence: !self.hold_on_silence,
            ..AnalysisConfig::default()
        }
    }
}

/// Handle on the processing thread.
struct Worker {
    config_tx: Sender<AnalysisConfig>,
    panic_tx: Sender<()>,
    shutdown_tx: Sender<()>,
    thread_handle: JoinHandle<Result<()>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level)?;

    if cli.list {
        println!("Audio inputs:");
        for name in audio::input_device_names()? {
            println!("  {}", name);
        }
        println!("MIDI outputs:");
        for (index, name) in midi_out::port_names()?.iter().enumerate() {
            println!("  {}: {}", index, name);
        }
        return Ok(());
    }

    let mut config = cli.analysis_config();
    config.validate().context("Invalid analysis settings")?;

    let sink = MidiPortSink::connect(cli.port.as_deref())?;
    let worker = start_worker(&cli, config.clone(), sink)?;

    println!("Running. {}", control::HELP);
    println!("Press Enter to stop.");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        match control::parse_command(&line, &config) {
            Ok(Command::Quit) => break,
            Ok(Command::Panic) => {
                let _ = worker.panic_tx.send(());
            }
            Ok(Command::Show) => println!("{:#?}", config),
            Ok(Command::Apply(next)) => {
                if worker.config_tx.send(next.clone()).is_err() {
                    break;
                }
                config = next;
            }
            Err(e) => println!("{:#}. {}", e, control::HELP),
        }
        if worker.thread_handle.is_finished() {
            break;
        }
    }

    info!("Shutting down");
    let _ = worker.shutdown_tx.send(());
    worker
        .thread_handle
        .join()
        .map_err(|_| anyhow!("Processing thread panicked"))?
}

/// Spawns the processing thread and waits until audio is flowing.
///
/// The cpal stream is created on the processing thread itself since streams
/// are not `Send` on every platform.
fn start_worker(cli: &Cli, config: AnalysisConfig, mut sink: MidiPortSink) -> Result<Worker> {
    let (config_tx, config_rx) = crossbeam_channel::bounded::<AnalysisConfig>(4);
    let (panic_tx, panic_rx) = crossbeam_channel::bounded::<()>(1);
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);

    let input = cli.input.clone();
    let target_rate = cli.sample_rate;
    let frame_size = cli.frame_size;

    let thread_handle = thread::spawn(move || -> Result<()> {
        let (raw_audio_tx, raw_audio_rx) = crossbeam_channel::bounded::<Vec<f32>>(64);

        let started = audio::start_audio_capture(raw_audio_tx, input.as_deref(), target_rate)
            .and_then(|(stream, rate)| {
                let settings = AnalyzerSettings::new(rate as f64, frame_size)?;
                let processor = AudioProcessor::new(settings, config, Box::new(MonotonicClock::default()))?;
                Ok((stream, processor))
            });
        let (stream, mut processor) = match started {
            Ok(pair) => {
                let _ = ready_tx.send(Ok(()));
                pair
            }
            Err(e) => {
                let _ = ready_tx.send(Err(format!("{:#}", e)));
                return Err(e);
            }
        };

        run_loop(&mut processor, &mut sink, &raw_audio_rx, &config_rx, &panic_rx, &shutdown_rx);

        if let Err(e) = processor.all_notes_off(&mut sink) {
            warn!("Failed to silence MIDI output: {}", e);
        }
        if let Err(e) = stream.pause() {
            warn!("Error pausing stream: {}", e);
        }
        drop(stream);
        debug!(
            "Processing thread finished after {} frames ({} dropped)",
            processor.analyzer().frames_analyzed(),
            processor.analyzer().frames_dropped()
        );
        Ok(())
    });

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(Worker {
            config_tx,
            panic_tx,
            shutdown_tx,
            thread_handle,
        }),
        Ok(Err(message)) => Err(anyhow!("Failed to start audio: {}", message)),
        Err(_) => Err(anyhow!("Processing thread exited during startup")),
    }
}

fn run_loop(
    processor: &mut AudioProcessor,
    sink: &mut MidiPortSink,
    audio_rx: &Receiver<Vec<f32>>,
    config_rx: &Receiver<AnalysisConfig>,
    panic_rx: &Receiver<()>,
    shutdown_rx: &Receiver<()>,
) {
    loop {
        crossbeam_channel::select! {
            recv(audio_rx) -> msg => match msg {
                Ok(block) => {
                    processor.process_block(&block, sink);
                }
                Err(_) => {
                    error!("Audio channel closed");
                    break;
                }
            },
            recv(config_rx) -> msg => match msg {
                Ok(config) => {
                    // Rejections are logged by the processor.
                    let _ = processor.apply_config(config);
                }
                Err(_) => break,
            },
            recv(panic_rx) -> msg => {
                if msg.is_err() {
                    break;
                }
                if let Err(e) = processor.all_notes_off(sink) {
                    warn!("Failed to send all notes off: {}", e);
                }
            },
            recv(shutdown_rx) -> _ => {
                debug!("Received shutdown signal");
                break;
            },
        }
    }
}
