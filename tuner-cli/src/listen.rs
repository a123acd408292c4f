//! Live microphone readout.

use std::io::{self, BufRead};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, select};
use tuner_core::audio::MicrophoneSource;
use tuner_core::{Session, TunerConfig};

/// Prints results until an empty line or end of input on stdin.
///
/// `+` and `-` lines move A4 by 1 Hz while the session keeps running.
pub fn run(json: bool, config: &TunerConfig) -> Result<()> {
    let reference = config.reference()?;
    let session = Session::start(MicrophoneSource::new(), config, reference.clone())
        .context("Failed to open the microphone")?;
    let commands = spawn_stdin_reader();
    eprintln!(
        "Listening at {} Hz, A4 = {} Hz. Enter '+' or '-' to move A4 by 1 Hz, an empty line to stop.",
        session.sample_rate(),
        reference.get()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    loop {
        select! {
            recv(session.results()) -> msg => match msg {
                Ok(result) => crate::emit(&mut out, &result, json)?,
                Err(_) => break,
            },
            recv(commands) -> line => {
                let step = match line.as_deref().map(str::trim) {
                    Ok("+") => 1.0,
                    Ok("-") => -1.0,
                    _ => break,
                };
                match reference.nudge(step) {
                    Ok(a4) => eprintln!("A4 = {a4} Hz"),
                    Err(e) => eprintln!("{e}"),
                }
            },
        }
    }

    let stats = session.stop().context("Failed to release the microphone")?;
    eprintln!(
        "Stopped after {} frames ({} frames and {} results dropped).",
        stats.frames_analyzed, stats.frames_dropped, stats.results_dropped
    );
    Ok(())
}

/// Lines typed on stdin; the channel disconnects at end of input.
fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let spawned = thread::Builder::new().name("tuner-stdin".to_string()).spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    if let Err(e) = spawned {
        log::warn!("cannot read commands from stdin: {}", e);
    }
    rx
}
