use serde::{Deserialize, Serialize};

use super::opcode::{OpCode, Value};

/// One entry of a `step(n) { ... }` block: a statement, or `n` empty steps
/// (one per trailing comma in the script).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepItem {
    Stmt(OpCode),
    Pause(u32),
}

/// A step block as the front end hands it over. The VM has no opcode for it;
/// it is flattened into a `SetStep` plus an endless `While` whose body ends
/// with `EndStep`, so the body runs once and an early `end_step` still works.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepBlock {
    pub step: Option<Value>,
    pub items: Vec<StepItem>,
}

impl StepBlock {
    pub fn new(step: Option<Value>) -> Self {
        StepBlock {
            step,
            items: Vec::new(),
        }
    }

    pub fn stmt(mut self, op: OpCode) -> Self {
        self.items.push(StepItem::Stmt(op));
        self
    }

    pub fn pause(mut self, steps: u32) -> Self {
        self.items.push(StepItem::Pause(steps));
        self
    }

    pub fn as_asm(self) -> Vec<OpCode> {
        let mut body: Vec<OpCode> = self
            .items
            .into_iter()
            .filter_map(|item| match item {
                StepItem::Stmt(op) => Some(op),
                StepItem::Pause(0) => None,
                StepItem::Pause(n) => Some(OpCode::wait(n as i64)),
            })
            .collect();
        body.push(OpCode::end_step());

        let mut res = Vec::with_capacity(2);
        if let Some(step) = self.step {
            res.push(OpCode::set_step(step));
        }
        res.push(OpCode::while_loop(1, body));
        res
    }
}
