use std::collections::VecDeque;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::SequencerId;

/// Why the engine, or a runaway piece of script, was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The configured timeout elapsed.
    Timeout,
    /// `Engine::terminate` was called.
    Stopped,
    /// A loop ran past the iteration ceiling without yielding.
    IterationLimit,
    /// User function calls nested past the configured depth.
    CallDepth,
}

impl TerminationReason {
    /// Engine-wide reasons halt every sequencer. `CallDepth` only aborts the
    /// sequencer that tripped it.
    pub fn is_global(&self) -> bool {
        !matches!(self, TerminationReason::CallDepth)
    }
}

impl Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::Timeout => write!(f, "timeout"),
            TerminationReason::Stopped => write!(f, "stopped"),
            TerminationReason::IterationLimit => write!(f, "loop iteration limit"),
            TerminationReason::CallDepth => write!(f, "call depth limit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FillyError {
    #[error("{name}: expected {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("malformed program: {0}")]
    MalformedProgram(String),
    #[error("terminated ({0})")]
    Terminated(TerminationReason),
}

impl FillyError {
    pub fn arity<N: ToString, E: ToString>(name: N, expected: E, got: usize) -> Self {
        FillyError::Arity {
            name: name.to_string(),
            expected: expected.to_string(),
            got,
        }
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, FillyError::Terminated(_))
    }

    /// True for termination that must halt global scheduling.
    pub fn is_global_termination(&self) -> bool {
        matches!(self, FillyError::Terminated(reason) if reason.is_global())
    }
}

pub type FillyResult<T> = Result<T, FillyError>;

/// A statement-level error, kept with enough context to find it in the script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFault {
    pub sequencer: SequencerId,
    pub pc: usize,
    pub error: FillyError,
}

impl Display for ScriptFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sequencer {} at pc {}: {}", self.sequencer, self.pc, self.error)
    }
}

/// Bounded queue of faults waiting to be drained by the host.
#[derive(Debug)]
pub struct ErrorQueue {
    buffer: VecDeque<ScriptFault>,
    capacity: usize,
}

impl Default for ErrorQueue {
    fn default() -> Self {
        ErrorQueue::with_capacity(256)
    }
}

impl ErrorQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        ErrorQueue {
            buffer: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Oldest faults are dropped once the queue is full.
    pub fn throw(&mut self, fault: ScriptFault) {
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(fault);
    }

    pub fn poll(&mut self) -> Option<ScriptFault> {
        self.buffer.pop_front()
    }

    pub fn drain(&mut self) -> Vec<ScriptFault> {
        self.buffer.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
