//! The engine owns the task registry and drives it with two clocks.
//!
//! The frame loop calls [`Engine::update`] once per frame; the audio side calls
//! [`Engine::update_midi_sequences`] (or [`Engine::poll_midi_clock`]) with the
//! number of MIDI ticks that elapsed. Both take the same state lock, so tasks are
//! interleaved, never run in parallel. Each tick gives every task of the matching
//! clock either one wait decrement or one VM step.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::clock::TickGenerator;
use crate::config::EngineConfig;
use crate::error::{FillyError, FillyResult, ScriptFault, TerminationReason};
use crate::host::{AssetLoader, AudioRequest, HostError, ImageDecoder, Renderer};
use crate::logger::Logger;
use crate::stage::StageSnapshot;
use crate::vm::{
    evaluation_context::EvaluationContext,
    machine::VirtualMachine,
    opcode::{OpCode, Program, UserFunction},
    sequencer::{Sequencer, SequencerState, TimingMode},
    variable::VariableValue,
};
use crate::{log_error, log_info, log_warn};

use self::cancellation::CancellationToken;
use self::handler::EventType;
use self::state::EngineState;

pub mod cancellation;
pub mod driver;
pub mod handler;
pub mod state;

pub use crate::vm::sequencer::{GroupId, SequencerId};

/// Published after every tick for drivers and hosts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub frame_tick: u64,
    pub midi_tick: u64,
    pub sequencers: usize,
    pub complete: bool,
    pub terminated: Option<TerminationReason>,
}

pub struct Engine {
    state: Mutex<EngineState>,
    vm: VirtualMachine,
    config: EngineConfig,
    cancel: CancellationToken,
    logger: Logger,
    midi_clock: Mutex<Option<TickGenerator>>,
    render_state: RwLock<StageSnapshot>,
    published_revision: Mutex<Option<u64>>,
    timeout: Mutex<Option<Duration>>,
    start_time: Mutex<Option<Instant>>,
}

fn relock<T>(result: Result<T, PoisonError<T>>) -> T {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl Engine {
    pub fn new(config: EngineConfig, logger: Logger) -> Self {
        Engine {
            state: Mutex::new(EngineState::new(&config)),
            vm: VirtualMachine::new(&config),
            timeout: Mutex::new(config.timeout()),
            config,
            cancel: CancellationToken::new(),
            logger,
            midi_clock: Mutex::new(None),
            render_state: RwLock::new(StageSnapshot::default()),
            published_revision: Mutex::new(None),
            start_time: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn vm(&self) -> &VirtualMachine {
        &self.vm
    }

    /// Shared stop flag. Cancelling it terminates the engine.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        relock(self.state.lock())
    }

    /// Runs `f` with the state locked, for hosts that need more than the query API.
    pub fn with_state<R, F: FnOnce(&mut EngineState) -> R>(&self, f: F) -> R {
        f(&mut self.lock_state())
    }

    // Registration

    /// Registers the program's functions and spawns `main` as a TIME task in group 0.
    pub fn load_program(&self, program: Program) -> SequencerId {
        let mut state = self.lock_state();
        for function in program.functions {
            state.register_function(function);
        }
        let id = state.spawn(program.main.into(), TimingMode::Time, 0);
        log_info!(self.logger, "[+] Loaded program as sequencer {}", id);
        id
    }

    pub fn register_sequence(&self, commands: Vec<OpCode>, mode: TimingMode, group: GroupId) -> SequencerId {
        self.lock_state().spawn(commands.into(), mode, group)
    }

    /// `mes(event) { body }`. The handler belongs to a fresh group whose parent is
    /// the group of `parent`, if given. TIME and MIDI_TIME handlers start right away.
    pub fn register_mes_block(
        &self,
        event_type: EventType,
        body: Vec<OpCode>,
        parent: Option<SequencerId>,
        user_id: Option<i64>,
    ) -> (GroupId, Option<SequencerId>) {
        let mut state = self.lock_state();
        let parent_group = parent
            .and_then(|id| state.get(id))
            .map(|seq| seq.group)
            .unwrap_or(0);
        state.register_handler(event_type, body.into(), parent_group, user_id)
    }

    pub fn register_function(&self, function: UserFunction) {
        self.lock_state().register_function(function);
    }

    pub fn set_asset_loader(&self, assets: Arc<dyn AssetLoader>) {
        self.lock_state().assets = Some(assets);
    }

    pub fn set_image_decoder(&self, decoder: Arc<dyn ImageDecoder>) {
        self.lock_state().decoder = Some(decoder);
    }

    // Events

    /// Fans a user message out to every matching `USER` handler. Returns how many tasks were spawned.
    pub fn post_mes<P: Into<VariableValue>>(&self, user_id: i64, params: [P; 4]) -> usize {
        self.lock_state().post_mes(user_id, params.map(Into::into))
    }

    /// Delivers a host event (`KEY`, `CLICK`, ...). Returns how many tasks were spawned.
    pub fn post_event<P: Into<VariableValue>>(&self, event_type: EventType, params: [P; 4]) -> usize {
        self.lock_state().dispatch(event_type, None, params.map(Into::into))
    }

    // Clocks

    /// One frame tick for every TIME task.
    pub fn update(&self) -> FillyResult<()> {
        self.check_termination()?;
        let mut state = self.lock_state();
        state.frame_tick += 1;
        let result = self.run_tick(&mut state, TimingMode::Time);
        self.publish(&state);
        result
    }

    /// `ticks` MIDI ticks for every MIDI_TIME task.
    pub fn update_midi_sequences(&self, ticks: u64) -> FillyResult<()> {
        self.check_termination()?;
        let mut state = self.lock_state();
        let mut result = Ok(());
        for _ in 0..ticks {
            state.midi_tick += 1;
            result = self.run_tick(&mut state, TimingMode::MidiTime);
            if result.is_err() {
                break;
            }
        }
        self.publish(&state);
        result
    }

    /// Starts following a MIDI playback. The MIDI tick counter restarts at zero.
    pub fn start_midi(&self, generator: TickGenerator) {
        self.lock_state().midi_tick = 0;
        *relock(self.midi_clock.lock()) = Some(generator);
    }

    /// Converts the playback position into FILLY ticks and runs the new ones.
    /// Returns the number of ticks delivered.
    pub fn poll_midi_clock(&self, elapsed: Duration) -> FillyResult<u64> {
        let delta = match relock(self.midi_clock.lock()).as_mut() {
            Some(generator) => generator.poll(elapsed),
            None => return Ok(0),
        };
        if delta > 0 {
            self.update_midi_sequences(delta)?;
        }
        Ok(delta)
    }

    /// Playback ended: stops following the clock and fires `MIDI_END` handlers.
    pub fn finish_midi(&self) -> usize {
        relock(self.midi_clock.lock()).take();
        self.lock_state()
            .dispatch(EventType::MidiEnd, None, Default::default())
    }

    /// One tick of `mode`. Only tasks present at the start of the tick are visited.
    fn run_tick(&self, state: &mut EngineState, mode: TimingMode) -> FillyResult<()> {
        let count = state.len();
        for index in 0..count {
            let Some(slot) = state.sequencer_at(index) else {
                break;
            };
            if !slot.active || slot.mode != mode {
                continue;
            }
            if slot.is_waiting() {
                slot.wait_count -= 1;
                continue;
            }
            if slot.is_complete() {
                slot.deactivate();
                continue;
            }

            let mut seq = std::mem::take(slot);
            let pc = if seq.has_suspended() {
                seq.pc.saturating_sub(1)
            } else {
                seq.pc
            };
            let result = {
                let mut call_stack = Vec::new();
                let mut ctx =
                    EvaluationContext::new(&mut seq, state, &self.cancel, &self.logger, &mut call_stack);
                self.vm.step(&mut ctx)
            };
            if let Err(error) = result {
                if let FillyError::Terminated(reason) = &error {
                    if reason.is_global() {
                        if !self.cancel.is_cancelled() {
                            log_error!(
                                self.logger,
                                "[!] Sequencer {} at pc {} stopped the engine: {}",
                                seq.id,
                                pc,
                                reason
                            );
                        }
                        self.cancel.cancel(*reason);
                        self.restore(state, index, seq);
                        return Err(error);
                    }
                }
                log_error!(
                    self.logger,
                    "[!] Runtime error in sequencer {} at pc {}: {}",
                    seq.id,
                    pc,
                    error
                );
                seq.suspended.clear();
                seq.wait_count = 0;
                if error.is_terminated() {
                    seq.deactivate();
                }
                state.faults.throw(ScriptFault {
                    sequencer: seq.id,
                    pc,
                    error,
                });
            }
            self.restore(state, index, seq);
        }
        Ok(())
    }

    fn restore(&self, state: &mut EngineState, index: usize, seq: Sequencer) {
        if let Some(slot) = state.sequencer_at(index) {
            *slot = seq;
        }
    }

    // Termination

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *relock(self.timeout.lock()) = timeout;
        if let Some(start) = *relock(self.start_time.lock()) {
            self.cancel.set_deadline(timeout.map(|t| start + t));
        }
    }

    /// Records the start time and arms the timeout, if any.
    pub fn start(&self) {
        let now = Instant::now();
        *relock(self.start_time.lock()) = Some(now);
        let timeout = *relock(self.timeout.lock());
        self.cancel.set_deadline(timeout.map(|t| now + t));
        match timeout {
            Some(t) => log_info!(self.logger, "[+] Engine started, timeout {:?}", t),
            None => log_info!(self.logger, "[+] Engine started"),
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        relock(self.start_time.lock()).map(|start| start.elapsed())
    }

    pub fn terminate(&self) {
        if !self.cancel.is_cancelled() {
            log_info!(self.logger, "[-] Engine stopped");
        }
        self.cancel.cancel(TerminationReason::Stopped);
    }

    pub fn is_terminated(&self) -> bool {
        self.cancel.check().is_err()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.cancel.reason()
    }

    fn check_termination(&self) -> FillyResult<()> {
        let already = self.cancel.is_cancelled();
        let result = self.cancel.check();
        if let Err(FillyError::Terminated(reason)) = &result {
            if !already {
                log_warn!(self.logger, "[-] Engine terminated ({})", reason);
            }
        }
        result
    }

    /// Drops deactivated tasks. Returns how many were removed.
    pub fn cleanup_sequences(&self) -> usize {
        self.lock_state().cleanup()
    }

    /// True when no task is left to run. Independent of the timeout.
    pub fn all_sequences_complete(&self) -> bool {
        self.lock_state().all_complete()
    }

    // Queries

    pub fn frame_tick(&self) -> u64 {
        self.lock_state().frame_tick
    }

    pub fn midi_tick(&self) -> u64 {
        self.lock_state().midi_tick
    }

    pub fn sequencer_count(&self) -> usize {
        self.lock_state().len()
    }

    pub fn sequencer_state(&self, id: SequencerId) -> Option<SequencerState> {
        self.lock_state().get(id).map(|seq| seq.state())
    }

    pub fn sequencer_variable(&self, id: SequencerId, name: &str) -> Option<VariableValue> {
        self.lock_state()
            .get(id)
            .and_then(|seq| seq.vars.get(name).cloned())
    }

    pub fn drain_faults(&self) -> Vec<ScriptFault> {
        self.lock_state().faults.drain()
    }

    pub fn drain_audio_requests(&self) -> Vec<AudioRequest> {
        self.lock_state().drain_audio_requests()
    }

    pub fn status(&self) -> EngineStatus {
        let state = self.lock_state();
        EngineStatus {
            frame_tick: state.frame_tick,
            midi_tick: state.midi_tick,
            sequencers: state.len(),
            complete: state.all_complete(),
            terminated: self.cancel.reason(),
        }
    }

    // Rendering

    /// Last published stage state.
    pub fn snapshot(&self) -> StageSnapshot {
        relock(self.render_state.read()).clone()
    }

    /// Hands the last published stage to `renderer`, then forgets the draw
    /// operations it was given.
    pub fn render<R: Renderer>(&self, renderer: &mut R, target: &mut R::Target) -> Result<(), HostError> {
        let snapshot = self.snapshot();
        renderer.render_frame(target, &snapshot)?;
        let mut state = self.lock_state();
        state.stage.clear_draw_ops(snapshot.draw_ops.len());
        self.publish(&state);
        Ok(())
    }

    /// Drops pending draw operations without rendering them, for hosts with no
    /// renderer. Returns how many were dropped.
    pub fn discard_draw_ops(&self) -> usize {
        let mut state = self.lock_state();
        let count = state.stage.draw_ops().len();
        state.stage.clear_draw_ops(count);
        self.publish(&state);
        count
    }

    // Lock order is always state, then published_revision, then render_state.
    fn publish(&self, state: &EngineState) {
        let revision = state.stage.revision();
        let mut published = relock(self.published_revision.lock());
        if *published == Some(revision) {
            return;
        }
        *relock(self.render_state.write()) = state.stage.snapshot();
        *published = Some(revision);
    }
}

#[cfg(test)]
mod tests;
