//! # Listening Session
//!
//! A session owns one analysis thread. The thread opens the frame source,
//! analyses frames strictly in the order they arrive, and pushes one
//! [`AnalysisResult`] per frame into a bounded result queue.
//!
//! ## Lifecycle
//! - `start` returns only once the source is open (or failed to open)
//! - `stop` (or dropping the session) stops the source first, so the
//!   device is released before the session reports it is no longer
//!   listening
//! - once stopping has begun no further frame is analysed
//!
//! ## Back-pressure
//! Results of a live source are dropped (and counted) when the consumer
//! falls behind. Playback sources wait for room, so offline analysis
//! sees every frame.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select};

use crate::AnalysisResult;
use crate::analysis::Analyzer;
use crate::config::{CaptureSettings, ReferencePitch, TunerConfig};
use crate::error::{Result, TunerError};
use crate::source::{Frame, FrameSender, FrameSource, SourceHandle};

/// Counters of a session, readable at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frames that went through the analyzer
    pub frames_analyzed: u64,
    /// Frames the source dropped because the analysis thread was behind
    pub frames_dropped: u64,
    /// Results dropped because the consumer was behind
    pub results_dropped: u64,
}

#[derive(Debug, Default)]
struct Shared {
    stopping: AtomicBool,
    listening: AtomicBool,
    frames_analyzed: AtomicU64,
    results_dropped: AtomicU64,
    frames_dropped: Arc<AtomicU64>,
}

impl Shared {
    fn stats(&self) -> SessionStats {
        SessionStats {
            frames_analyzed: self.frames_analyzed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            results_dropped: self.results_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A running analysis session.
#[derive(Debug)]
pub struct Session {
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<Result<()>>>,
    results: Receiver<AnalysisResult>,
    shared: Arc<Shared>,
    sample_rate: u32,
    reference: ReferencePitch,
}

impl Session {
    /// Starts analysing frames from `source`.
    ///
    /// # Returns
    /// * `Ok(session)` - The source is open and frames are being analysed
    /// * `Err(e)` - Invalid config, or the source failed to open (for a
    ///   microphone: no device, permission denied, unsupported format)
    pub fn start<S: FrameSource>(source: S, config: &TunerConfig, reference: ReferencePitch) -> Result<Session> {
        config.validate()?;

        let capture = config.capture;
        let (frame_tx, frame_rx) = bounded::<Frame>(capture.frame_queue);
        let (result_tx, result_rx) = bounded(capture.result_queue);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let (ready_tx, ready_rx) = bounded::<Result<u32>>(1);

        let frames = FrameSender::new(frame_tx);
        let shared = Arc::new(Shared {
            frames_dropped: frames.dropped_counter(),
            ..Default::default()
        });

        let worker = Worker {
            analyzer: Analyzer::new(config, reference.clone()),
            capture,
            lossless: !S::REALTIME,
            results: result_tx,
            shared: Arc::clone(&shared),
        };
        let inbox = Inbox {
            frames: frame_rx,
            shutdown: shutdown_rx,
        };
        let handle = thread::Builder::new()
            .name("tuner-analysis".to_string())
            .spawn(move || worker.run(source, frames, inbox, ready_tx))?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                log::info!(
                    "session started: {} Hz, {}-sample frames, A4 = {} Hz",
                    sample_rate,
                    capture.frame_size,
                    reference.get()
                );
                Ok(Session {
                    shutdown_tx: Some(shutdown_tx),
                    worker: Some(handle),
                    results: result_rx,
                    shared,
                    sample_rate,
                    reference,
                })
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                log::error!("session failed to start: {}", e);
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(TunerError::WorkerPanicked)
            }
        }
    }

    /// Results in frame order. The channel disconnects once the worker
    /// has exited, either after `stop` or because the source ran dry.
    pub fn results(&self) -> &Receiver<AnalysisResult> {
        &self.results
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The reference pitch this session reads from.
    pub fn reference(&self) -> &ReferencePitch {
        &self.reference
    }

    /// True while the source is open and frames may still arrive.
    pub fn is_listening(&self) -> bool {
        self.shared.listening.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// Stops the source, waits for the analysis thread and returns the
    /// final counters.
    pub fn stop(mut self) -> Result<SessionStats> {
        self.teardown()?;
        Ok(self.shared.stats())
    }

    fn teardown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        self.shared.stopping.store(true, Ordering::Release);
        // Disconnecting the shutdown channel wakes the worker's select.
        drop(self.shutdown_tx.take());

        let outcome = worker.join().map_err(|_| TunerError::WorkerPanicked)?;
        let stats = self.shared.stats();
        log::info!(
            "session stopped: {} frames analysed, {} frames dropped, {} results dropped",
            stats.frames_analyzed,
            stats.frames_dropped,
            stats.results_dropped
        );
        outcome
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log::warn!("session teardown failed: {}", e);
        }
    }
}

/// State moved onto the analysis thread.
struct Worker {
    analyzer: Analyzer,
    capture: CaptureSettings,
    lossless: bool,
    results: Sender<AnalysisResult>,
    shared: Arc<Shared>,
}

/// What the analysis thread waits on.
struct Inbox {
    frames: Receiver<Frame>,
    shutdown: Receiver<()>,
}

impl Worker {
    fn run<S: FrameSource>(
        mut self,
        source: S,
        frames: FrameSender,
        inbox: Inbox,
        ready: Sender<Result<u32>>,
    ) -> Result<()> {
        let (mut handle, sample_rate) = match source.open(frames, &self.capture) {
            Ok(opened) => opened,
            Err(e) => {
                let _ = ready.send(Err(e));
                return Ok(());
            }
        };
        self.shared.listening.store(true, Ordering::Release);
        let _ = ready.send(Ok(sample_rate));

        loop {
            select! {
                recv(inbox.frames) -> msg => match msg {
                    Ok(frame) => {
                        if self.shared.stopping.load(Ordering::Acquire) {
                            break;
                        }
                        if !self.process(&frame, sample_rate, &inbox.shutdown) {
                            break;
                        }
                    }
                    Err(_) => {
                        log::info!("frame source finished");
                        break;
                    }
                },
                recv(inbox.shutdown) -> _ => {
                    log::debug!("received shutdown signal");
                    break;
                }
            }
        }

        // Release the device before announcing that we stopped listening.
        let stopped = handle.stop();
        drop(handle);
        self.shared.listening.store(false, Ordering::Release);
        if let Err(e) = &stopped {
            log::warn!("error stopping frame source: {}", e);
        }
        stopped
    }

    /// Analyses one frame and queues the result; `false` once nobody is
    /// listening for results any more or shutdown was requested while
    /// waiting for room.
    fn process(&mut self, frame: &Frame, sample_rate: u32, shutdown: &Receiver<()>) -> bool {
        let analyzer = &mut self.analyzer;
        let result = match panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(frame, sample_rate))) {
            Ok(result) => result,
            Err(_) => {
                log::error!("analysis of frame {} panicked, reporting no pitch", frame.index);
                AnalysisResult {
                    frame_index: frame.index,
                    estimate: None,
                    note: None,
                }
            }
        };
        self.shared.frames_analyzed.fetch_add(1, Ordering::Relaxed);

        if self.lossless {
            return select! {
                send(self.results, result) -> res => {
                    if res.is_err() {
                        log::debug!("result receiver gone");
                    }
                    res.is_ok()
                },
                recv(shutdown) -> _ => false,
            };
        }

        match self.results.try_send(result) {
            Ok(()) => true,
            Err(TrySendError::Full(result)) => {
                let dropped = self.shared.results_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 {
                    log::warn!("result queue full, consumer is falling behind");
                }
                log::debug!("dropped result for frame {}", result.frame_index);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!("result receiver gone");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SignalSource;
    use std::time::Duration;

    #[test]
    fn silent_signal_runs_to_completion() {
        let config = TunerConfig::default();
        let source = SignalSource::new(vec![0.0; 2048 * 3], 44100);
        let session = Session::start(source, &config, ReferencePitch::default()).unwrap();
        assert_eq!(session.sample_rate(), 44100);

        let results: Vec<AnalysisResult> = session.results().iter().collect();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.note.is_none()));

        let stats = session.stop().unwrap();
        assert_eq!(stats.frames_analyzed, 3);
    }

    #[test]
    fn playback_waits_for_a_slow_consumer() {
        let config = TunerConfig {
            capture: CaptureSettings { result_queue: 2, ..Default::default() },
            ..Default::default()
        };
        let source = SignalSource::new(vec![0.0; 2048 * 12], 44100);
        let session = Session::start(source, &config, ReferencePitch::default()).unwrap();

        let mut indices = Vec::new();
        for result in session.results().iter() {
            thread::sleep(Duration::from_millis(10));
            indices.push(result.frame_index);
        }
        let stats = session.stop().unwrap();

        assert_eq!(indices, (0..12).collect::<Vec<u64>>());
        assert_eq!(stats.results_dropped, 0);
    }

    #[test]
    fn stop_is_prompt_while_waiting_for_the_consumer() {
        let config = TunerConfig {
            capture: CaptureSettings { result_queue: 1, ..Default::default() },
            ..Default::default()
        };
        let source = SignalSource::new(vec![0.0; 2048 * 50], 44100);
        let session = Session::start(source, &config, ReferencePitch::default()).unwrap();
        // Nothing is consumed, so the worker blocks on the full result queue.
        thread::sleep(Duration::from_millis(50));

        let stats = session.stop().unwrap();
        assert!(stats.frames_analyzed < 50);
        assert_eq!(stats.results_dropped, 0);
    }

    #[test]
    fn invalid_config_never_spawns() {
        let config = TunerConfig {
            clarity_threshold: -1.0,
            ..Default::default()
        };
        let source = SignalSource::new(vec![0.0; 4096], 44100);
        let result = Session::start(source, &config, ReferencePitch::default());
        assert!(matches!(result, Err(TunerError::InvalidConfig(_))));
    }

    #[test]
    fn stop_is_prompt_for_paced_sources() {
        let config = TunerConfig::default();
        let source = SignalSource::new(vec![0.2; 44100 * 60], 44100).paced(true);
        let session = Session::start(source, &config, ReferencePitch::default()).unwrap();
        assert!(session.is_listening());

        let _ = session.results().recv_timeout(Duration::from_millis(200));
        let stats = session.stop().unwrap();
        assert!(stats.frames_analyzed < 100);
    }
}
