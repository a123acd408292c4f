//! # Microphone Capture
//!
//! Live input through CPAL. The stream callback cuts incoming blocks into
//! frames and offers them to the session without ever blocking; when the
//! analysis thread is behind, frames are dropped and counted.
//!
//! ## Device selection
//! - Default input device of the default host
//! - Config range closest to 44.1 kHz, any channel count
//! - `f32` samples preferred, `i16` and `u16` accepted

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, FromSample, SampleFormat, SizedSample, SupportedStreamConfigRange};

use crate::config::CaptureSettings;
use crate::error::{Result, TunerError};
use crate::source::{FrameSender, FrameSource, Framer, SourceHandle};

/// Sample rate we ask the device for.
pub const PREFERRED_SAMPLE_RATE: u32 = 44100;

/// The default input device of the system.
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrophoneSource;

impl MicrophoneSource {
    pub fn new() -> Self {
        Self
    }
}

impl FrameSource for MicrophoneSource {
    type Handle = MicrophoneHandle;

    fn open(self, frames: FrameSender, capture: &CaptureSettings) -> Result<(MicrophoneHandle, u32)> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(TunerError::NoInputDevice)?;
        let name = device.name().unwrap_or_else(|_| "unknown device".to_string());

        let ranges = device
            .supported_input_configs()
            .map_err(|e| TunerError::Capture(e.to_string()))?
            .collect::<Vec<_>>();
        let range = find_supported_config(ranges, PREFERRED_SAMPLE_RATE).ok_or_else(|| {
            TunerError::UnsupportedFormat(format!("{name} offers no f32, i16 or u16 input"))
        })?;

        let rate = PREFERRED_SAMPLE_RATE.clamp(range.min_sample_rate().0, range.max_sample_rate().0);
        let supported = range.with_sample_rate(cpal::SampleRate(rate));
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        let framer = Framer::from_settings(capture, config.channels as usize);

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, framer, frames),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, framer, frames),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, framer, frames),
            other => Err(TunerError::UnsupportedFormat(format!("{other:?}"))),
        }?;
        stream.play().map_err(|e| TunerError::Capture(e.to_string()))?;

        log::info!(
            "capturing from {}: {} Hz, {} channel(s), {:?}",
            name,
            rate,
            config.channels,
            sample_format
        );
        Ok((MicrophoneHandle { stream: Some(stream) }, rate))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut framer: Framer,
    frames: FrameSender,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut converted: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                converted.clear();
                converted.extend(data.iter().map(|&s| f32::from_sample(s)));
                framer.push(&converted, |frame| {
                    frames.offer(frame);
                });
            },
            |err| log::error!("input stream error: {}", err),
            None,
        )
        .map_err(stream_error)
}

fn stream_error(err: BuildStreamError) -> TunerError {
    match err {
        BuildStreamError::DeviceNotAvailable => TunerError::NoInputDevice,
        BuildStreamError::StreamConfigNotSupported => {
            TunerError::UnsupportedFormat("stream config rejected by the device".to_string())
        }
        BuildStreamError::BackendSpecific { err } => {
            let message = err.to_string();
            let lower = message.to_lowercase();
            if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
                TunerError::PermissionDenied(message)
            } else {
                TunerError::Capture(message)
            }
        }
        other => TunerError::Capture(other.to_string()),
    }
}

/// Picks the config range closest to `target_rate`, f32 before integer
/// formats when two ranges are equally close.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter_map(|c| format_rank(c.sample_format()).map(|rank| (c, rank)))
        .min_by_key(|(c, rank)| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if target_rate < min {
                min - target_rate
            } else {
                target_rate.saturating_sub(max)
            };
            (distance, *rank)
        })
        .map(|(c, _)| c)
}

fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::F32 => Some(0),
        SampleFormat::I16 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

/// Keeps the input stream alive; stopping releases the device.
pub struct MicrophoneHandle {
    stream: Option<cpal::Stream>,
}

impl SourceHandle for MicrophoneHandle {
    fn stop(&mut self) -> Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let paused = stream.pause().map_err(|e| TunerError::Capture(e.to_string()));
        drop(stream);
        log::debug!("input stream closed");
        paused
    }
}

impl Drop for MicrophoneHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
