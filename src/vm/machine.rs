use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::handler::EventType;
use crate::error::{FillyError, FillyResult, TerminationReason};
use crate::log_warn;

use super::builtins::BuiltinTable;
use super::evaluation_context::{CallFrame, EvaluationContext};
use super::opcode::{Cmd, OpCode, UserFunction, Value};
use super::sequencer::{Frame, FrameKind, TimingMode};
use super::variable::{Variable, VariableValue};

/// Control-flow outcome of executing a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Keep going with the next statement.
    Continue,
    /// The task is waiting; enclosing blocks have saved their continuation.
    Yield,
    /// Leave the innermost loop.
    EndStep,
    /// Leave the current function, or end the task at top level.
    Return,
    /// The task deleted itself.
    Exit,
}

/// Stateless instruction dispatcher. All mutable state lives in the [`EvaluationContext`].
#[derive(Debug, Clone)]
pub struct VirtualMachine {
    builtins: BuiltinTable,
    loop_check_interval: u32,
    max_loop_iterations: u32,
    max_call_depth: usize,
    time_ticks_per_step: u64,
    midi_ticks_per_step: u64,
}

impl Default for VirtualMachine {
    fn default() -> Self {
        VirtualMachine::new(&EngineConfig::default())
    }
}

impl VirtualMachine {
    pub fn new(config: &EngineConfig) -> Self {
        VirtualMachine {
            builtins: BuiltinTable::standard(),
            loop_check_interval: config.loop_check_interval.max(1),
            max_loop_iterations: config.max_loop_iterations,
            max_call_depth: config.max_call_depth,
            time_ticks_per_step: config.time_ticks_per_step as u64,
            midi_ticks_per_step: config.midi_ticks_per_step as u64,
        }
    }

    pub fn builtins(&self) -> &BuiltinTable {
        &self.builtins
    }

    pub fn builtins_mut(&mut self) -> &mut BuiltinTable {
        &mut self.builtins
    }

    /// Runs one scheduler step of `ctx.sequencer`: resumes a suspended block if
    /// there is one, otherwise executes the instruction at the program counter.
    pub fn step(&self, ctx: &mut EvaluationContext) -> FillyResult<Signal> {
        let signal = if ctx.sequencer.has_suspended() {
            self.resume(ctx)?
        } else {
            let pc = ctx.sequencer.pc;
            if pc >= ctx.sequencer.commands.len() {
                return Ok(Signal::Continue);
            }
            ctx.sequencer.pc += 1;
            let commands = ctx.sequencer.commands.clone();
            self.execute_at(ctx, &commands, pc)?
        };
        match signal {
            Signal::Return => ctx.sequencer.finish(),
            Signal::Exit => ctx.sequencer.deactivate(),
            _ => (),
        }
        Ok(signal)
    }

    /// Executes a single instruction outside of any block.
    pub fn execute_op(&self, ctx: &mut EvaluationContext, op: &OpCode) -> FillyResult<Signal> {
        match op.cmd {
            Cmd::For | Cmd::While => {
                let block: Arc<[OpCode]> = Arc::from(vec![op.clone()]);
                self.execute_at(ctx, &block, 0)
            }
            _ => {
                let signal = self.execute_simple(ctx, op)?;
                Ok(settle(ctx, signal))
            }
        }
    }

    /// Executes `block[index]`. Loops need to know where they live so that a
    /// `Wait` in their body can be resumed.
    pub fn execute_at(
        &self,
        ctx: &mut EvaluationContext,
        block: &Arc<[OpCode]>,
        index: usize,
    ) -> FillyResult<Signal> {
        let Some(op) = block.get(index) else {
            return Ok(Signal::Continue);
        };
        let signal = match op.cmd {
            Cmd::While => self.run_while(ctx, block, index)?,
            Cmd::For => self.run_for(ctx, block, index, false)?,
            _ => self.execute_simple(ctx, op)?,
        };
        Ok(settle(ctx, signal))
    }

    /// Runs `block` from `start`, saving a continuation frame if it yields.
    pub fn execute_block(
        &self,
        ctx: &mut EvaluationContext,
        block: &Arc<[OpCode]>,
        start: usize,
    ) -> FillyResult<Signal> {
        for index in start..block.len() {
            let depth = ctx.sequencer.suspended.len();
            match self.execute_at(ctx, block, index)? {
                Signal::Continue => (),
                Signal::Yield => {
                    let nested = ctx.sequencer.suspended.len() > depth;
                    ctx.sequencer.suspend(Frame {
                        block: block.clone(),
                        next: index + 1,
                        nested,
                        kind: FrameKind::Block,
                    });
                    return Ok(Signal::Yield);
                }
                other => return Ok(other),
            }
        }
        Ok(Signal::Continue)
    }

    /// Picks up the outermost suspended frame of the task.
    pub fn resume(&self, ctx: &mut EvaluationContext) -> FillyResult<Signal> {
        match ctx.sequencer.suspended.pop() {
            Some(frame) => self.resume_frame(ctx, frame),
            None => Ok(Signal::Continue),
        }
    }

    fn resume_frame(&self, ctx: &mut EvaluationContext, frame: Frame) -> FillyResult<Signal> {
        if frame.nested {
            match self.resume(ctx)? {
                Signal::Continue => (),
                Signal::EndStep if frame.kind != FrameKind::Block => return Ok(Signal::Continue),
                Signal::Yield => {
                    ctx.sequencer.suspend(frame);
                    return Ok(Signal::Yield);
                }
                other => return Ok(other),
            }
        }
        let signal = match frame.kind {
            FrameKind::Block => self.execute_block(ctx, &frame.block, frame.next)?,
            FrameKind::While => self.run_while(ctx, &frame.block, frame.next)?,
            FrameKind::For => self.run_for(ctx, &frame.block, frame.next, true)?,
        };
        Ok(settle(ctx, signal))
    }

    fn execute_simple(&self, ctx: &mut EvaluationContext, op: &OpCode) -> FillyResult<Signal> {
        match op.cmd {
            Cmd::Nop => Ok(Signal::Continue),
            Cmd::Assign => {
                expect_args("Assign", op, 2)?;
                let var = variable_arg("Assign", &op.args[0])?;
                let value = self.evaluate(ctx, &op.args[1])?;
                ctx.set_var(var, value);
                Ok(Signal::Continue)
            }
            Cmd::AssignIndex => {
                expect_args("AssignIndex", op, 3)?;
                let var = variable_arg("AssignIndex", &op.args[0])?;
                let index = self.evaluate(ctx, &op.args[1])?.as_integer();
                let value = self.evaluate(ctx, &op.args[2])?;
                let mut target = ctx.evaluate(var);
                target.set_index(index, value)?;
                ctx.set_var(var, target);
                Ok(Signal::Continue)
            }
            Cmd::Call => self.call(ctx, &op.args),
            Cmd::If => {
                if op.args.len() < 2 || op.args.len() > 3 {
                    return Err(FillyError::arity("If", "2 or 3", op.args.len()));
                }
                let cond = self.evaluate(ctx, &op.args[0])?.is_truthy();
                let branch = if cond { op.args.get(1) } else { op.args.get(2) };
                match branch {
                    Some(value) => {
                        let body = block_arg("If", value)?;
                        self.execute_block(ctx, body, 0)
                    }
                    None => Ok(Signal::Continue),
                }
            }
            Cmd::Wait => {
                expect_args("Wait", op, 1)?;
                let steps = self.evaluate(ctx, &op.args[0])?.as_integer().max(0) as u64;
                ctx.sequencer.wait_count = steps.saturating_mul(ctx.sequencer.ticks_per_step);
                Ok(Signal::Yield)
            }
            Cmd::SetStep => {
                expect_args("SetStep", op, 1)?;
                let count = self.evaluate(ctx, &op.args[0])?.as_integer().max(0) as u64;
                let unit = match ctx.sequencer.mode {
                    TimingMode::Time => self.time_ticks_per_step,
                    TimingMode::MidiTime => self.midi_ticks_per_step,
                };
                ctx.sequencer.ticks_per_step = count.saturating_mul(unit);
                Ok(Signal::Continue)
            }
            Cmd::RegisterEventHandler => {
                if op.args.len() < 2 || op.args.len() > 3 {
                    return Err(FillyError::arity("RegisterEventHandler", "2 or 3", op.args.len()));
                }
                let event_type: EventType = name_arg("RegisterEventHandler", &op.args[0])?.parse()?;
                let body = block_arg("RegisterEventHandler", &op.args[1])?.clone();
                let user_filter = match op.args.get(2) {
                    Some(value) => Some(self.evaluate(ctx, value)?.as_integer()),
                    None => None,
                };
                let parent_group = ctx.sequencer.group;
                ctx.state
                    .register_handler(event_type, body, parent_group, user_filter);
                Ok(Signal::Continue)
            }
            Cmd::Return => {
                if op.args.len() > 1 {
                    return Err(FillyError::arity("Return", "0 or 1", op.args.len()));
                }
                let value = match op.args.first() {
                    Some(value) => self.evaluate(ctx, value)?,
                    None => VariableValue::default(),
                };
                ctx.sequencer.set_return(value);
                Ok(Signal::Return)
            }
            Cmd::EndStep => Ok(Signal::EndStep),
            Cmd::For | Cmd::While => self.execute_op(ctx, op),
            cmd => Err(FillyError::MalformedProgram(format!(
                "operator {:?} used as a statement",
                cmd
            ))),
        }
    }

    /// Counts one loop iteration. Polls cancellation every `loop_check_interval`
    /// iterations and stops at `max_loop_iterations`.
    fn count_iteration(&self, ctx: &EvaluationContext, iterations: &mut u64) -> FillyResult<()> {
        *iterations += 1;
        if *iterations % u64::from(self.loop_check_interval) == 0 {
            ctx.cancel.check()?;
        }
        if *iterations > u64::from(self.max_loop_iterations) {
            return Err(FillyError::Terminated(TerminationReason::IterationLimit));
        }
        Ok(())
    }

    fn run_while(
        &self,
        ctx: &mut EvaluationContext,
        block: &Arc<[OpCode]>,
        index: usize,
    ) -> FillyResult<Signal> {
        let op = &block[index];
        expect_args("While", op, 2)?;
        let body = block_arg("While", &op.args[1])?;
        let mut iterations = 0;
        while self.evaluate(ctx, &op.args[0])?.is_truthy() {
            self.count_iteration(ctx, &mut iterations)?;
            match self.execute_block(ctx, body, 0)? {
                Signal::Continue => (),
                Signal::EndStep => break,
                Signal::Yield => {
                    ctx.sequencer.suspend(Frame {
                        block: block.clone(),
                        next: index,
                        nested: true,
                        kind: FrameKind::While,
                    });
                    return Ok(Signal::Yield);
                }
                other => return Ok(other),
            }
        }
        Ok(Signal::Continue)
    }

    /// `For [init, cond, post, body]`. A resumed loop skips `init` and runs
    /// `post` for the iteration that was interrupted.
    fn run_for(
        &self,
        ctx: &mut EvaluationContext,
        block: &Arc<[OpCode]>,
        index: usize,
        resumed: bool,
    ) -> FillyResult<Signal> {
        let op = &block[index];
        expect_args("For", op, 4)?;
        let body = block_arg("For", &op.args[3])?;
        if resumed {
            self.run_statement(ctx, &op.args[2])?;
        } else {
            self.run_statement(ctx, &op.args[0])?;
        }
        let mut iterations = 0;
        while self.evaluate(ctx, &op.args[1])?.is_truthy() {
            self.count_iteration(ctx, &mut iterations)?;
            match self.execute_block(ctx, body, 0)? {
                Signal::Continue => (),
                Signal::EndStep => break,
                Signal::Yield => {
                    ctx.sequencer.suspend(Frame {
                        block: block.clone(),
                        next: index,
                        nested: true,
                        kind: FrameKind::For,
                    });
                    return Ok(Signal::Yield);
                }
                other => return Ok(other),
            }
            self.run_statement(ctx, &op.args[2])?;
        }
        Ok(Signal::Continue)
    }

    /// Init and post statements of a `For`. They cannot wait.
    fn run_statement(&self, ctx: &mut EvaluationContext, value: &Value) -> FillyResult<()> {
        match value {
            Value::Nested(op) => {
                self.execute_op(ctx, op)?;
            }
            Value::Block(ops) => {
                for op in ops.iter() {
                    self.execute_op(ctx, op)?;
                }
            }
            _ => (),
        }
        ctx.sequencer.wait_count = 0;
        Ok(())
    }

    /// Evaluates an expression. Undefined variables read as 0.
    pub fn evaluate(&self, ctx: &mut EvaluationContext, value: &Value) -> FillyResult<VariableValue> {
        match value {
            Value::Int(i) => Ok(VariableValue::Integer(*i)),
            Value::Float(x) => Ok(VariableValue::Float(*x)),
            Value::Str(s) => Ok(VariableValue::Str(s.clone())),
            Value::Bool(b) => Ok(VariableValue::Bool(*b)),
            Value::Var(var) => Ok(ctx.evaluate(var)),
            Value::Nested(op) => self.evaluate_op(ctx, op),
            Value::Block(_) => Err(FillyError::Type("a block is not a value".to_string())),
        }
    }

    fn evaluate_op(&self, ctx: &mut EvaluationContext, op: &OpCode) -> FillyResult<VariableValue> {
        if op.cmd == Cmd::Call {
            self.call(ctx, &op.args)?;
            return Ok(ctx.sequencer.take_return());
        }
        let Some(arity) = op.cmd.operator_arity() else {
            return Err(FillyError::MalformedProgram(format!(
                "statement {:?} used as an expression",
                op.cmd
            )));
        };
        if op.args.len() != arity {
            return Err(FillyError::arity(format!("{:?}", op.cmd), arity, op.args.len()));
        }
        let x = self.evaluate(ctx, &op.args[0])?;
        if arity == 1 {
            return match op.cmd {
                Cmd::Neg => x.neg(),
                _ => Ok(x.not()),
            };
        }
        let y = self.evaluate(ctx, &op.args[1])?;
        match op.cmd {
            Cmd::Add => x.add(&y),
            Cmd::Sub => x.sub(&y),
            Cmd::Mul => x.mul(&y),
            Cmd::Div => x.div(&y),
            Cmd::Mod => x.rem(&y),
            Cmd::Eq => Ok(VariableValue::Bool(x.loose_eq(&y))),
            Cmd::Ne => Ok(VariableValue::Bool(!x.loose_eq(&y))),
            Cmd::Lt => Ok(VariableValue::Bool(x.compare(&y)?.is_lt())),
            Cmd::Le => Ok(VariableValue::Bool(x.compare(&y)?.is_le())),
            Cmd::Gt => Ok(VariableValue::Bool(x.compare(&y)?.is_gt())),
            Cmd::Ge => Ok(VariableValue::Bool(x.compare(&y)?.is_ge())),
            Cmd::And => Ok(x.and(&y)),
            Cmd::Or => Ok(x.or(&y)),
            Cmd::BitAnd => x.bit_and(&y),
            Cmd::BitOr => x.bit_or(&y),
            Cmd::BitXor => x.bit_xor(&y),
            _ => x.index(&y),
        }
    }

    /// `Call [name, args...]`. Resets the return slot, then dispatches to a user
    /// function or a built-in. Unknown names are logged and ignored.
    fn call(&self, ctx: &mut EvaluationContext, args: &[Value]) -> FillyResult<Signal> {
        let Some(name) = args.first() else {
            return Err(FillyError::arity("Call", "at least 1", 0));
        };
        let name = name_arg("Call", name)?;
        let mut values = Vec::with_capacity(args.len() - 1);
        for arg in &args[1..] {
            values.push(self.evaluate(ctx, arg)?);
        }
        ctx.sequencer.set_return(VariableValue::default());

        if let Some(function) = ctx.state.function(name) {
            return self.call_function(ctx, &function, values);
        }
        let Some(builtin) = self.builtins.get(name) else {
            log_warn!(ctx.logger, "[!] Unknown function '{}', call ignored", name);
            return Ok(Signal::Continue);
        };
        let values = builtin.normalize(values)?;
        if let Some(value) = (builtin.func)(ctx, &values)? {
            ctx.sequencer.set_return(value);
        }
        Ok(Signal::Continue)
    }

    /// Runs a user function to completion on a child task. Waits inside the
    /// function are dropped.
    fn call_function(
        &self,
        ctx: &mut EvaluationContext,
        function: &UserFunction,
        args: Vec<VariableValue>,
    ) -> FillyResult<Signal> {
        if ctx.call_stack.len() >= self.max_call_depth {
            return Err(FillyError::Terminated(TerminationReason::CallDepth));
        }
        let mut callee = ctx.sequencer.call_frame(function, args);
        ctx.call_stack.push(CallFrame {
            function: function.name.clone(),
            caller_pc: ctx.sequencer.pc,
        });
        let result = self.run_to_completion(&mut ctx.with_sequencer(&mut callee));
        ctx.call_stack.pop();
        result?;

        ctx.sequencer.set_return(callee.return_value());
        if !callee.active {
            ctx.sequencer.deactivate();
            return Ok(Signal::Exit);
        }
        Ok(Signal::Continue)
    }

    fn run_to_completion(&self, ctx: &mut EvaluationContext) -> FillyResult<()> {
        let mut steps = 0;
        while ctx.sequencer.active && !ctx.sequencer.is_complete() {
            self.count_iteration(ctx, &mut steps)?;
            self.step(ctx)?;
            ctx.sequencer.wait_count = 0;
        }
        Ok(())
    }
}

/// A deactivated task stops right after the statement that deactivated it.
fn settle(ctx: &EvaluationContext, signal: Signal) -> Signal {
    if ctx.sequencer.active {
        signal
    } else {
        Signal::Exit
    }
}

fn expect_args(name: &str, op: &OpCode, count: usize) -> FillyResult<()> {
    if op.args.len() != count {
        return Err(FillyError::arity(name, count, op.args.len()));
    }
    Ok(())
}

fn variable_arg<'v>(name: &str, value: &'v Value) -> FillyResult<&'v Variable> {
    match value {
        Value::Var(var) => Ok(var),
        other => Err(FillyError::Type(format!(
            "{}: expected a variable, got {:?}",
            name, other
        ))),
    }
}

fn block_arg<'v>(name: &str, value: &'v Value) -> FillyResult<&'v Arc<[OpCode]>> {
    value
        .as_block()
        .ok_or_else(|| FillyError::Type(format!("{}: expected a block", name)))
}

/// Function and event names may be given as strings or bare identifiers.
fn name_arg<'v>(name: &str, value: &'v Value) -> FillyResult<&'v str> {
    match value {
        Value::Str(s) => Ok(s),
        Value::Var(var) => Ok(var.name()),
        other => Err(FillyError::Type(format!(
            "{}: expected a name, got {:?}",
            name, other
        ))),
    }
}
