use std::{
    io,
    sync::Arc,
    thread::JoinHandle,
    time::{Duration, Instant},
};

use thread_priority::{ThreadBuilder, ThreadPriority};
use tokio::sync::watch;

use crate::error::FillyError;
use crate::host::PlaybackClock;
use crate::{log_error, log_info};

use super::{Engine, EngineStatus};

/// Below this, the frame loop spins instead of sleeping.
pub const ACTIVE_WAITING_SWITCH: Duration = Duration::from_micros(300);
/// How often the MIDI pump samples the playback position.
pub const MIDI_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Drives [`Engine::update`] at the configured frame rate on its own thread.
pub struct FrameLoop {
    handle: JoinHandle<()>,
    status: watch::Receiver<EngineStatus>,
}

impl FrameLoop {
    /// Starts the loop. It runs until the engine terminates, or until every
    /// task is done when `exit_when_complete` is set.
    pub fn spawn(engine: Arc<Engine>, exit_when_complete: bool) -> io::Result<FrameLoop> {
        let (tx, rx) = watch::channel(engine.status());
        let handle = ThreadBuilder::default()
            .name("filly-frame-loop")
            .priority(ThreadPriority::Max)
            .spawn(move |_| {
                let mut frame_loop = FrameRunner {
                    engine,
                    notifier: tx,
                    exit_when_complete,
                };
                frame_loop.live();
            })?;
        Ok(FrameLoop { handle, status: rx })
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> EngineStatus {
        let _ = self.handle.join();
        self.status.borrow().clone()
    }
}

struct FrameRunner {
    engine: Arc<Engine>,
    notifier: watch::Sender<EngineStatus>,
    exit_when_complete: bool,
}

impl FrameRunner {
    fn live(&mut self) {
        let interval = self.engine.config().frame_interval();
        let logger = self.engine.logger().clone();
        log_info!(logger, "[+] Starting frame loop, one tick every {:?}", interval);
        let mut next_frame = Instant::now() + interval;
        loop {
            match self.engine.update() {
                Ok(()) => (),
                Err(FillyError::Terminated(reason)) => {
                    log_info!(logger, "[-] Frame loop stopping: {}", reason);
                    break;
                }
                Err(e) => {
                    log_error!(logger, "[!] Frame loop error: {}", e);
                    break;
                }
            }
            self.engine.cleanup_sequences();
            let status = self.engine.status();
            let complete = status.complete;
            let _ = self.notifier.send(status);
            if self.exit_when_complete && complete {
                log_info!(logger, "[-] All sequences complete");
                break;
            }
            wait_until(next_frame);
            next_frame += interval;
            // Fell behind: do not try to catch up with a burst of ticks.
            let now = Instant::now();
            if next_frame < now {
                next_frame = now + interval;
            }
        }
        let _ = self.notifier.send(self.engine.status());
        log_info!(logger, "[-] Exiting frame loop...");
    }
}

fn wait_until(target: Instant) {
    let now = Instant::now();
    if target <= now {
        return;
    }
    let remaining = target - now;
    if remaining > ACTIVE_WAITING_SWITCH {
        std::thread::sleep(remaining - ACTIVE_WAITING_SWITCH);
    }
    while Instant::now() < target {
        std::hint::spin_loop();
    }
}

/// Feeds MIDI ticks into the engine from an audio playback position.
pub struct MidiPump {
    handle: JoinHandle<()>,
}

impl MidiPump {
    /// Polls `clock` until playback finishes or the engine terminates. The
    /// engine must already follow a tick generator (see [`Engine::start_midi`]).
    pub fn spawn<C: PlaybackClock + 'static>(engine: Arc<Engine>, clock: C) -> io::Result<MidiPump> {
        let handle = ThreadBuilder::default()
            .name("filly-midi-pump")
            .spawn(move |_| pump(engine, clock))?;
        Ok(MidiPump { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) {
        let _ = self.handle.join();
    }
}

fn pump<C: PlaybackClock>(engine: Arc<Engine>, clock: C) {
    let logger = engine.logger().clone();
    log_info!(logger, "[+] Starting MIDI pump");
    loop {
        if let Some(elapsed) = clock.elapsed() {
            if let Err(e) = engine.poll_midi_clock(elapsed) {
                log_info!(logger, "[-] MIDI pump stopping: {}", e);
                return;
            }
        }
        if clock.is_finished() {
            let spawned = engine.finish_midi();
            log_info!(logger, "[-] MIDI playback finished, {} MIDI_END handler(s)", spawned);
            return;
        }
        std::thread::sleep(MIDI_POLL_INTERVAL);
    }
}
