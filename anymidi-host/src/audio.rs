//! # Audio Capture Module
//!
//! Opens an input stream with cpal and forwards mono blocks of
//! [`BLOCK_SIZE`] samples to the processing thread. Multi-channel devices
//! are downmixed by averaging.

use anyhow::{Context, Result, anyhow};
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use tracing::{info, trace, warn};

/// Samples per block handed to the processor. Half an analysis frame at
/// the default frame size, so every frame is analysed.
pub const BLOCK_SIZE: usize = 512;

/// Lists the names of all input devices of the default host.
pub fn input_device_names() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("Failed to enumerate input devices")?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Starts audio capture and streams blocks into `sender`.
///
/// `device_name` picks the first input device whose name contains it;
/// `None` uses the default input. Returns the running stream (which must be
/// kept alive) and the sample rate actually in use.
pub fn start_audio_capture(
    sender: Sender<Vec<f32>>,
    device_name: Option<&str>,
    target_rate: u32,
) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(wanted) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().map(|n| n.contains(wanted)).unwrap_or(false))
            .ok_or_else(|| anyhow!("No input device matching '{}'", wanted))?,
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?,
    };

    info!("Using audio input device: {}", device.name()?);

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported_config = find_supported_config(configs, target_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = target_rate.clamp(
        supported_config.min_sample_rate().0,
        supported_config.max_sample_rate().0,
    );
    let config = supported_config.with_sample_rate(cpal::SampleRate(rate));
    let channels = config.channels() as usize;
    let config: cpal::StreamConfig = config.into();

    info!("Selected sample rate: {} Hz, {} channel(s)", rate, channels);

    let err_fn = |err| warn!("An error occurred on the audio stream: {}", err);

    // Accumulates downmixed samples from the callback.
    let mut audio_buffer: Vec<f32> = Vec::with_capacity(BLOCK_SIZE * 4);

    let stream = device.build_input_stream(
        &config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if channels == 1 {
                audio_buffer.extend_from_slice(data);
            } else {
                audio_buffer.extend(
                    data.chunks_exact(channels)
                        .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                );
            }

            while audio_buffer.len() >= BLOCK_SIZE {
                let block = audio_buffer[..BLOCK_SIZE].to_vec();
                // A full channel means the processor fell behind; drop the block.
                if sender.try_send(block).is_err() {
                    trace!("Audio block dropped");
                }
                audio_buffer.drain(..BLOCK_SIZE);
            }
        },
        err_fn,
        None,
    )?;

    stream.play()?;

    Ok((stream, rate))
}

/// Picks the f32 configuration that can run closest to `target_rate`,
/// preferring fewer channels when two are equally close.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if target_rate < min {
                min - target_rate
            } else {
                target_rate.saturating_sub(max)
            };
            (distance, c.channels())
        })
}
