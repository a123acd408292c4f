//! # Frame Sources
//!
//! Everything that feeds sample frames into an analysis session: the
//! framing of raw sample blocks, the bounded hand-off to the analysis
//! thread, and a source that plays back an in-memory signal or WAV file.
//! Live microphone input lives in the `audio` module.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, never, select, tick};

use crate::config::CaptureSettings;
use crate::error::{Result, TunerError};

/// A fixed-length block of mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Position of the frame in its stream, starting at 0
    pub index: u64,
    pub samples: Vec<f32>,
}

/// Cuts a stream of interleaved sample blocks into mono frames.
///
/// Frames are `frame_size` long and start every `hop_size` samples; a hop
/// equal to the frame size gives back-to-back frames.
#[derive(Debug)]
pub struct Framer {
    frame_size: usize,
    hop_size: usize,
    channels: usize,
    pending: Vec<f32>,
    next_index: u64,
}

impl Framer {
    pub fn new(frame_size: usize, hop_size: usize, channels: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            hop_size: hop_size.clamp(1, frame_size),
            channels: channels.max(1),
            pending: Vec::with_capacity(frame_size * 2),
            next_index: 0,
        }
    }

    pub fn from_settings(capture: &CaptureSettings, channels: usize) -> Self {
        Self::new(capture.frame_size, capture.hop_size, channels)
    }

    /// Appends interleaved samples and hands every completed frame to `emit`.
    pub fn push(&mut self, interleaved: &[f32], mut emit: impl FnMut(Frame)) {
        if self.channels == 1 {
            self.pending.extend_from_slice(interleaved);
        } else {
            self.pending
                .extend(interleaved.chunks_exact(self.channels).map(mix_to_mono));
        }

        while self.pending.len() >= self.frame_size {
            emit(Frame {
                index: self.next_index,
                samples: self.pending[..self.frame_size].to_vec(),
            });
            self.next_index += 1;
            self.pending.drain(..self.hop_size);
        }
    }
}

fn mix_to_mono(channels: &[f32]) -> f32 {
    channels.iter().sum::<f32>() / channels.len() as f32
}

/// Producer side of the frame queue.
///
/// Real-time sources use [`FrameSender::offer`], which never blocks and
/// drops the frame when the analysis thread is behind. Playback sources
/// use [`FrameSender::send`], which waits for room.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    pub fn new(tx: Sender<Frame>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Hands a frame over without blocking; `false` if it was not queued.
    pub fn offer(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("frame queue full, dropped frame {} ({} total)", frame.index, total);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Waits until the frame is queued or `cancel` fires.
    ///
    /// Returns `false` when the frame was not delivered: the analysis side
    /// went away or the source was cancelled.
    pub fn send(&self, frame: Frame, cancel: &Receiver<()>) -> bool {
        select! {
            send(self.tx, frame) -> res => res.is_ok(),
            recv(cancel) -> _ => false,
        }
    }

    /// Frames lost to a full queue so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

/// Something that can deliver frames into a session.
///
/// `open` runs on the analysis thread, so the returned handle does not
/// need to be `Send` (audio streams often are not).
pub trait FrameSource: Send + 'static {
    type Handle: SourceHandle;

    /// Live sources cannot wait: when the consumer lags, their results are
    /// dropped. Results of non-live sources wait for the consumer instead.
    const REALTIME: bool = true;

    /// Starts delivering frames; returns the handle and the sample rate.
    ///
    /// Dropping every clone of `frames` tells the session the source has
    /// run dry.
    fn open(self, frames: FrameSender, capture: &CaptureSettings) -> Result<(Self::Handle, u32)>;
}

/// A running source.
pub trait SourceHandle {
    /// Stops delivery and releases whatever device the source holds.
    /// After this returns no further frames are produced.
    fn stop(&mut self) -> Result<()>;
}

/// Plays back an in-memory mono signal as frames.
///
/// When paced, one frame is released per hop duration, driven by a
/// `crossbeam_channel::tick`; otherwise frames go out as fast as the
/// analysis thread accepts them.
#[derive(Debug, Clone)]
pub struct SignalSource {
    samples: Vec<f32>,
    sample_rate: u32,
    paced: bool,
}

impl SignalSource {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            paced: false,
        }
    }

    /// Loads a WAV file (integer or float PCM), downmixed to mono.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let full_scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / full_scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        let samples = match spec.channels as usize {
            0 | 1 => interleaved,
            channels => interleaved.chunks_exact(channels).map(mix_to_mono).collect(),
        };

        log::info!(
            "loaded {} ({} samples at {} Hz, {} channel(s))",
            path.as_ref().display(),
            samples.len(),
            spec.sample_rate,
            spec.channels
        );
        Ok(Self::new(samples, spec.sample_rate))
    }

    /// Release frames in real time instead of as fast as possible.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// All complete frames of the signal, for offline processing.
    pub fn frames(&self, capture: &CaptureSettings) -> Vec<Frame> {
        let mut frames = Vec::new();
        Framer::from_settings(capture, 1).push(&self.samples, |frame| frames.push(frame));
        frames
    }
}

impl FrameSource for SignalSource {
    type Handle = PlaybackHandle;

    const REALTIME: bool = false;

    fn open(self, frames: FrameSender, capture: &CaptureSettings) -> Result<(PlaybackHandle, u32)> {
        if self.sample_rate == 0 {
            return Err(TunerError::InvalidConfig("signal has a zero sample rate".to_string()));
        }

        let sample_rate = self.sample_rate;
        let queue = self.frames(capture);
        let hop = Duration::from_secs_f64(capture.hop_size as f64 / sample_rate as f64);
        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(0);
        let paced = self.paced;

        let thread = thread::Builder::new()
            .name("tuner-playback".to_string())
            .spawn(move || {
                let ticker = if paced { tick(hop) } else { never() };
                for frame in queue {
                    if paced {
                        select! {
                            recv(ticker) -> _ => {},
                            recv(cancel_rx) -> _ => return,
                        }
                    }
                    if !frames.send(frame, &cancel_rx) {
                        return;
                    }
                }
                log::debug!("playback finished");
            })?;

        Ok((
            PlaybackHandle {
                cancel: Some(cancel_tx),
                thread: Some(thread),
            },
            sample_rate,
        ))
    }
}

/// Handle of a running [`SignalSource`].
#[derive(Debug)]
pub struct PlaybackHandle {
    cancel: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SourceHandle for PlaybackHandle {
    fn stop(&mut self) -> Result<()> {
        // Disconnecting the cancel channel wakes the feeder wherever it waits.
        drop(self.cancel.take());
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| TunerError::Capture("playback thread panicked".to_string()))?;
        }
        Ok(())
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use std::time::Instant;

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| i as f32).collect()
    }

    #[test]
    fn back_to_back_frames() {
        let mut framer = Framer::new(4, 4, 1);
        let mut frames = Vec::new();
        framer.push(&ramp(6), |f| frames.push(f));
        assert_eq!(frames.len(), 1);
        framer.push(&[6.0, 7.0, 8.0], |f| frames.push(f));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(frames[1].samples, vec![4.0, 5.0, 6.0, 7.0]);
        assert_eq!(frames[1].index, 1);
    }

    #[test]
    fn overlapping_frames() {
        let mut framer = Framer::new(4, 2, 1);
        let mut frames = Vec::new();
        framer.push(&ramp(8), |f| frames.push(f));

        let starts: Vec<f32> = frames.iter().map(|f| f.samples[0]).collect();
        assert_eq!(starts, vec![0.0, 2.0, 4.0]);
        let indices: Vec<u64> = frames.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn stereo_is_averaged() {
        let mut framer = Framer::new(2, 2, 2);
        let mut frames = Vec::new();
        framer.push(&[1.0, 0.0, -0.5, 0.5, 0.25, 0.25], |f| frames.push(f));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples, vec![0.5, 0.0]);
    }

    #[test]
    fn offer_drops_when_full() {
        let (tx, rx) = bounded(1);
        let sender = FrameSender::new(tx);
        let frame = |index| Frame { index, samples: vec![0.0] };

        assert!(sender.offer(frame(0)));
        assert!(!sender.offer(frame(1)));
        assert_eq!(sender.dropped(), 1);
        assert_eq!(rx.recv().unwrap().index, 0);

        drop(rx);
        assert!(!sender.offer(frame(2)));
        assert_eq!(sender.dropped(), 1);
    }

    #[test]
    fn unpaced_playback_delivers_every_frame_in_order() {
        let capture = CaptureSettings { frame_size: 8, hop_size: 4, ..Default::default() };
        let source = SignalSource::new(ramp(40), 8000);
        let expected = source.frames(&capture);
        assert_eq!(expected.len(), 9);

        let (tx, rx) = bounded(1);
        let (mut handle, sample_rate) = source.open(FrameSender::new(tx), &capture).unwrap();
        assert_eq!(sample_rate, 8000);

        let received: Vec<Frame> = rx.iter().collect();
        assert_eq!(received, expected);
        handle.stop().unwrap();
    }

    #[test]
    fn stop_interrupts_paced_playback() {
        let capture = CaptureSettings { frame_size: 100, hop_size: 100, ..Default::default() };
        // One frame per second.
        let source = SignalSource::new(vec![0.1; 1000], 100).paced(true);
        let (tx, rx) = bounded(4);
        let (mut handle, _) = source.open(FrameSender::new(tx), &capture).unwrap();

        let started = Instant::now();
        handle.stop().unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(rx.try_iter().count() <= 1);
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let (tx, _rx) = bounded(1);
        let result = SignalSource::new(vec![0.0; 16], 0).open(FrameSender::new(tx), &CaptureSettings::default());
        assert!(matches!(result, Err(TunerError::InvalidConfig(_))));
    }

    #[test]
    fn wav_files_are_read_as_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(16384_i16).unwrap();
            writer.write_sample(0_i16).unwrap();
        }
        writer.finalize().unwrap();

        let source = SignalSource::from_wav(&path).unwrap();
        assert_eq!(source.sample_rate(), 22050);
        assert_eq!(source.samples().len(), 100);
        assert!(source.samples().iter().all(|&s| (s - 0.25).abs() < 1e-6));

        assert!(matches!(SignalSource::from_wav(dir.path().join("nope.wav")), Err(TunerError::Wav(_))));
    }
}
