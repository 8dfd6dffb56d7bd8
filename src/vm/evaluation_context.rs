use crate::engine::{cancellation::CancellationToken, state::EngineState};
use crate::logger::Logger;

use super::sequencer::Sequencer;
use super::variable::{Variable, VariableValue};

/// One active user function call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallFrame {
    pub function: String,
    pub caller_pc: usize,
}

/// Everything a single VM step can touch.
pub struct EvaluationContext<'a> {
    pub sequencer: &'a mut Sequencer,
    pub state: &'a mut EngineState,
    pub cancel: &'a CancellationToken,
    pub logger: &'a Logger,
    pub call_stack: &'a mut Vec<CallFrame>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        sequencer: &'a mut Sequencer,
        state: &'a mut EngineState,
        cancel: &'a CancellationToken,
        logger: &'a Logger,
        call_stack: &'a mut Vec<CallFrame>,
    ) -> Self {
        EvaluationContext {
            sequencer,
            state,
            cancel,
            logger,
            call_stack,
        }
    }

    pub fn set_var<T: Into<VariableValue>>(&mut self, var: &Variable, value: T) {
        self.sequencer.vars.set(var, value.into());
    }

    pub fn evaluate(&self, var: &Variable) -> VariableValue {
        self.sequencer.vars.value(var)
    }

    /// Same context, running `sequencer` instead. Used for user function calls.
    pub fn with_sequencer<'b>(&'b mut self, sequencer: &'b mut Sequencer) -> EvaluationContext<'b> {
        EvaluationContext {
            sequencer,
            state: &mut *self.state,
            cancel: self.cancel,
            logger: self.logger,
            call_stack: &mut *self.call_stack,
        }
    }
}
