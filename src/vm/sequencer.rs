use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::opcode::{OpCode, UserFunction};
use super::variable::{RETURN_SLOT, VariableStore, VariableValue};

pub type SequencerId = u64;
pub type GroupId = u32;

/// Which clock advances a sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimingMode {
    /// Frame clock, 60 Hz.
    #[default]
    Time,
    /// Playback clock, 32nd-note resolution.
    MidiTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SequencerState {
    Running,
    Waiting,
    Complete,
    Inactive,
}

/// What a suspended frame goes back to once its inner frames are done.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    /// Continue the block at `Frame::next`.
    Block,
    /// Re-enter the `While` at `Frame::next` in `Frame::block`.
    While,
    /// Run the post statement of the `For` at `Frame::next`, then keep looping.
    For,
}

/// Continuation of a block that was interrupted by a `Wait`.
///
/// Frames are stacked innermost first, so the top of the stack is always the
/// outermost interrupted block. `nested` is set when the statement that
/// interrupted this block left frames of its own underneath.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub block: Arc<[OpCode]>,
    pub next: usize,
    pub nested: bool,
    pub kind: FrameKind,
}

/// One cooperative task.
#[derive(Debug, Clone)]
pub struct Sequencer {
    pub id: SequencerId,
    pub group: GroupId,
    pub commands: Arc<[OpCode]>,
    pub pc: usize,
    pub vars: VariableStore,
    pub wait_count: u64,
    pub ticks_per_step: u64,
    pub mode: TimingMode,
    pub active: bool,
    pub suspended: Vec<Frame>,
}

impl Default for Sequencer {
    fn default() -> Self {
        Sequencer {
            id: 0,
            group: 0,
            commands: Arc::from(Vec::new()),
            pc: 0,
            vars: VariableStore::new(),
            wait_count: 0,
            ticks_per_step: 1,
            mode: TimingMode::Time,
            active: false,
            suspended: Vec::new(),
        }
    }
}

impl Sequencer {
    pub fn new(
        id: SequencerId,
        group: GroupId,
        commands: Arc<[OpCode]>,
        mode: TimingMode,
        ticks_per_step: u64,
    ) -> Self {
        Sequencer {
            id,
            group,
            commands,
            mode,
            ticks_per_step,
            active: true,
            ..Default::default()
        }
    }

    /// Builds the task that runs `function` on behalf of `self`.
    ///
    /// The callee shares the caller's id, group and timing. Missing arguments bind to 0.
    pub fn call_frame(&self, function: &UserFunction, args: Vec<VariableValue>) -> Sequencer {
        let mut callee = Sequencer::new(
            self.id,
            self.group,
            function.body.clone(),
            self.mode,
            self.ticks_per_step,
        );
        let mut args = args.into_iter();
        for param in function.params.iter() {
            callee.vars.insert(param, args.next().unwrap_or_default());
        }
        callee.vars.insert(RETURN_SLOT, VariableValue::default());
        callee
    }

    pub fn is_waiting(&self) -> bool {
        self.wait_count > 0
    }

    pub fn is_complete(&self) -> bool {
        self.pc >= self.commands.len() && self.wait_count == 0 && self.suspended.is_empty()
    }

    pub fn state(&self) -> SequencerState {
        if !self.active {
            SequencerState::Inactive
        } else if self.is_waiting() {
            SequencerState::Waiting
        } else if self.is_complete() {
            SequencerState::Complete
        } else {
            SequencerState::Running
        }
    }

    /// Ends the task at the end of the current step.
    pub fn finish(&mut self) {
        self.pc = self.commands.len();
        self.wait_count = 0;
        self.suspended.clear();
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.wait_count = 0;
        self.suspended.clear();
    }

    pub fn suspend(&mut self, frame: Frame) {
        self.suspended.push(frame);
    }

    pub fn has_suspended(&self) -> bool {
        !self.suspended.is_empty()
    }

    /// Reads the return slot and resets it to 0.
    pub fn take_return(&mut self) -> VariableValue {
        self.vars
            .insert(RETURN_SLOT, VariableValue::default())
            .unwrap_or_default()
    }

    pub fn set_return(&mut self, value: VariableValue) {
        self.vars.insert(RETURN_SLOT, value);
    }

    pub fn return_value(&self) -> VariableValue {
        self.vars.get(RETURN_SLOT).cloned().unwrap_or_default()
    }
}
