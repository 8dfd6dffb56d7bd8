//! The FILLY virtual machine: instructions, values, tasks and their execution.

/// Built-in functions callable from scripts.
pub mod builtins;
/// The context threaded through every VM call.
pub mod evaluation_context;
/// Step-block lowering.
pub mod lowering;
/// Instruction dispatch and expression evaluation.
pub mod machine;
/// Instructions, values and programs.
pub mod opcode;
pub mod runner;
/// Cooperative tasks.
pub mod sequencer;
/// Variables and the values they hold.
pub mod variable;

pub use evaluation_context::EvaluationContext;
pub use machine::{Signal, VirtualMachine};
pub use opcode::{Cmd, OpCode, Program, UserFunction, Value};
pub use sequencer::{Sequencer, SequencerState, TimingMode};
pub use variable::{Variable, VariableStore, VariableValue};
