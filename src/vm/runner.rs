//! Headless runner for executing FILLY programs without a window or audio device.
//!
//! The runner builds a fresh [`Engine`], loads a [`Program`] and ticks the frame
//! clock as fast as possible, optionally deriving MIDI ticks from a tempo map as
//! if a MIDI file were playing in sync with the frames. Use it for tests, batch
//! checks of scripts, and the `--headless` mode of the binary.
//!
//! # Examples
//!
//! ```ignore
//! use filly_core::vm::runner::{Runner, RunOutcome};
//!
//! let result = Runner::new().max_frames(600).run(program);
//! assert_eq!(result.outcome, RunOutcome::Completed);
//! ```

use std::time::Duration;

use crate::clock::TickGenerator;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::error::{FillyError, ScriptFault, TerminationReason};
use crate::logger::Logger;
use crate::stage::StageSnapshot;
use crate::vm::opcode::Program;

/// Ten minutes of frames at 60 Hz.
pub const DEFAULT_MAX_FRAMES: u64 = 36_000;

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task finished on its own.
    Completed,
    /// `max_frames` ticks went by with tasks still alive.
    FrameLimit,
    /// The engine was terminated (timeout or stop).
    Terminated(TerminationReason),
}

/// Result of executing a program.
#[derive(Debug)]
pub struct ExecutionResult {
    pub outcome: RunOutcome,
    /// Frame ticks executed.
    pub frame_ticks: u64,
    /// FILLY MIDI ticks delivered.
    pub midi_ticks: u64,
    /// Statement errors raised along the way.
    pub faults: Vec<ScriptFault>,
    /// Drawing operations requested. Nothing renders them in a headless run,
    /// so they are counted and dropped after every frame.
    pub draw_ops: usize,
    /// Stage state after the last tick.
    pub stage: StageSnapshot,
}

/// Configurable runner. See the [module documentation](self).
pub struct Runner {
    pub config: EngineConfig,
    pub logger: Logger,
    pub max_frames: u64,
    /// Tempo map of the simulated MIDI playback, if any.
    pub midi: Option<TickGenerator>,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            logger: Logger::new_silent(),
            max_frames: DEFAULT_MAX_FRAMES,
            midi: None,
        }
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn midi(mut self, generator: TickGenerator) -> Self {
        self.midi = Some(generator);
        self
    }

    /// Runs `program` on a fresh engine.
    pub fn run(self, program: Program) -> ExecutionResult {
        let engine = Engine::new(self.config.clone(), self.logger.clone());
        engine.load_program(program);
        self.drive(&engine)
    }

    /// Runs an engine the caller has already populated.
    pub fn drive(self, engine: &Engine) -> ExecutionResult {
        let frame_rate = engine.config().frame_rate.max(1) as u64;
        if let Some(generator) = self.midi {
            engine.start_midi(generator);
        }
        engine.start();

        let mut faults = Vec::new();
        let mut draw_ops = 0;
        let mut outcome = RunOutcome::FrameLimit;
        let mut frames = 0;
        while frames < self.max_frames {
            if engine.all_sequences_complete() {
                outcome = RunOutcome::Completed;
                break;
            }
            let result = engine.update().and_then(|()| {
                let elapsed = Duration::from_micros((frames + 1) * 1_000_000 / frame_rate);
                engine.poll_midi_clock(elapsed).map(|_| ())
            });
            if let Err(FillyError::Terminated(reason)) = result {
                outcome = RunOutcome::Terminated(reason);
                break;
            }
            frames += 1;
            draw_ops += engine.discard_draw_ops();
            engine.cleanup_sequences();
            faults.extend(engine.drain_faults());
        }
        if outcome == RunOutcome::FrameLimit && engine.all_sequences_complete() {
            outcome = RunOutcome::Completed;
        }
        faults.extend(engine.drain_faults());

        ExecutionResult {
            outcome,
            frame_ticks: engine.frame_tick(),
            midi_ticks: engine.midi_tick(),
            faults,
            draw_ops,
            stage: engine.snapshot(),
        }
    }
}

/// Runs `program` with the default configuration and frame limit.
pub fn execute_program(program: Program) -> ExecutionResult {
    Runner::new().run(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::opcode::{Cmd, OpCode, Value};

    fn counting_loop(limit: i64) -> Program {
        Program::new(vec![
            OpCode::assign("i", 0),
            OpCode::while_loop(
                OpCode::binary(Cmd::Lt, Value::var("i"), limit),
                vec![
                    OpCode::assign("i", OpCode::binary(Cmd::Add, Value::var("i"), 1)),
                    OpCode::wait(1),
                ],
            ),
        ])
    }

    #[test]
    fn finite_program_completes() {
        let result = execute_program(counting_loop(3));
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert!(result.faults.is_empty());
        // Assign, then three loop steps each followed by three waiting ticks, then the exit step.
        assert_eq!(result.frame_ticks, 1 + 3 * 4 + 1);
    }

    #[test]
    fn endless_program_hits_frame_limit() {
        let program = Program::new(vec![OpCode::while_loop(1, vec![OpCode::wait(1)])]);
        let result = Runner::new().max_frames(50).run(program);
        assert_eq!(result.outcome, RunOutcome::FrameLimit);
        assert_eq!(result.frame_ticks, 50);
    }

    #[test]
    fn timeout_ends_the_run() {
        let config = EngineConfig {
            timeout_ms: Some(0),
            ..Default::default()
        };
        let program = Program::new(vec![OpCode::while_loop(1, vec![OpCode::wait(1)])]);
        let result = Runner::new().config(config).run(program);
        assert_eq!(result.outcome, RunOutcome::Terminated(TerminationReason::Timeout));
        assert_eq!(result.frame_ticks, 0);
    }

    #[test]
    fn simulated_midi_follows_frames() {
        let program = Program::new(vec![OpCode::while_loop(1, vec![OpCode::wait(1)])]);
        let result = Runner::new()
            .max_frames(60)
            .midi(TickGenerator::constant(480, 500_000).unwrap())
            .run(program);
        // One second at 120 BPM: two beats of eight FILLY ticks.
        assert_eq!(result.midi_ticks, 16);
    }

    #[test]
    fn faults_are_collected() {
        let program = Program::new(vec![OpCode::assign("x", OpCode::binary(Cmd::Mod, 1, 0))]);
        let result = execute_program(program);
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert_eq!(result.faults.len(), 1);
    }

    fn drawing_loop() -> Program {
        let zeros = || (0..8i64).map(Value::from).collect::<Vec<Value>>();
        Program::new(vec![OpCode::while_loop(
            1,
            vec![
                OpCode::call("MovePic", zeros()),
                OpCode::call("TextWrite", vec!["x".into(), 0.into(), 0.into(), 0.into()]),
                OpCode::wait(1),
            ],
        )])
    }

    #[test]
    fn headless_draw_ops_do_not_pile_up() {
        let result = Runner::new().max_frames(3_000).run(drawing_loop());
        assert_eq!(result.outcome, RunOutcome::FrameLimit);
        // One pass every four frames, two operations per pass.
        assert_eq!(result.draw_ops, 1_500);
        assert!(result.stage.draw_ops.is_empty());
        assert_eq!(result.stage.texts.len(), 1);
    }
}
