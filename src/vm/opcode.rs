use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::variable::Variable;

/// Instruction tags. Statements first, then expression-only operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cmd {
    Nop,
    Assign,
    AssignIndex,
    Call,
    If,
    For,
    While,
    Wait,
    SetStep,
    RegisterEventHandler,
    Return,
    EndStep,
    // Binary operators
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Index,
    // Unary operators
    Neg,
    Not,
}

impl Cmd {
    /// Number of operands for operators, `None` for statements.
    pub fn operator_arity(&self) -> Option<usize> {
        match self {
            Cmd::Add
            | Cmd::Sub
            | Cmd::Mul
            | Cmd::Div
            | Cmd::Mod
            | Cmd::Eq
            | Cmd::Ne
            | Cmd::Lt
            | Cmd::Le
            | Cmd::Gt
            | Cmd::Ge
            | Cmd::And
            | Cmd::Or
            | Cmd::BitAnd
            | Cmd::BitOr
            | Cmd::BitXor
            | Cmd::Index => Some(2),
            Cmd::Neg | Cmd::Not => Some(1),
            _ => None,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.operator_arity().is_some()
    }
}

/// Instruction argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Var(Variable),
    Nested(Box<OpCode>),
    Block(Arc<[OpCode]>),
}

impl Value {
    pub fn var<S: AsRef<str>>(name: S) -> Value {
        Value::Var(Variable::new(name))
    }

    pub fn block<I: IntoIterator<Item = OpCode>>(ops: I) -> Value {
        Value::Block(ops.into_iter().collect())
    }

    pub fn as_block(&self) -> Option<&Arc<[OpCode]>> {
        match self {
            Value::Block(block) => Some(block),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}
impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}
impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}
impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}
impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}
impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}
impl From<Variable> for Value {
    fn from(value: Variable) -> Self {
        Value::Var(value)
    }
}
impl From<OpCode> for Value {
    fn from(value: OpCode) -> Self {
        Value::Nested(Box::new(value))
    }
}
impl From<Vec<OpCode>> for Value {
    fn from(value: Vec<OpCode>) -> Self {
        Value::Block(value.into())
    }
}

/// One compiled instruction. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpCode {
    pub cmd: Cmd,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl OpCode {
    pub fn new(cmd: Cmd, args: Vec<Value>) -> Self {
        OpCode { cmd, args }
    }

    pub fn nop() -> Self {
        OpCode::new(Cmd::Nop, Vec::new())
    }

    pub fn assign<V: Into<Value>>(name: &str, value: V) -> Self {
        OpCode::new(Cmd::Assign, vec![Value::var(name), value.into()])
    }

    pub fn assign_index<I: Into<Value>, V: Into<Value>>(name: &str, index: I, value: V) -> Self {
        OpCode::new(
            Cmd::AssignIndex,
            vec![Value::var(name), index.into(), value.into()],
        )
    }

    pub fn call(name: &str, args: Vec<Value>) -> Self {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(Value::from(name));
        all.extend(args);
        OpCode::new(Cmd::Call, all)
    }

    pub fn if_else<C: Into<Value>>(cond: C, then: Vec<OpCode>, otherwise: Option<Vec<OpCode>>) -> Self {
        let mut args = vec![cond.into(), Value::from(then)];
        if let Some(otherwise) = otherwise {
            args.push(Value::from(otherwise));
        }
        OpCode::new(Cmd::If, args)
    }

    pub fn while_loop<C: Into<Value>>(cond: C, body: Vec<OpCode>) -> Self {
        OpCode::new(Cmd::While, vec![cond.into(), Value::from(body)])
    }

    pub fn for_loop<C: Into<Value>>(init: OpCode, cond: C, post: OpCode, body: Vec<OpCode>) -> Self {
        OpCode::new(
            Cmd::For,
            vec![init.into(), cond.into(), post.into(), Value::from(body)],
        )
    }

    pub fn wait<V: Into<Value>>(steps: V) -> Self {
        OpCode::new(Cmd::Wait, vec![steps.into()])
    }

    pub fn set_step<V: Into<Value>>(count: V) -> Self {
        OpCode::new(Cmd::SetStep, vec![count.into()])
    }

    pub fn register_handler(event: &str, body: Vec<OpCode>, user_id: Option<i64>) -> Self {
        let mut args = vec![Value::from(event), Value::from(body)];
        if let Some(id) = user_id {
            args.push(Value::Int(id));
        }
        OpCode::new(Cmd::RegisterEventHandler, args)
    }

    pub fn ret(value: Option<Value>) -> Self {
        OpCode::new(Cmd::Return, value.into_iter().collect())
    }

    pub fn end_step() -> Self {
        OpCode::new(Cmd::EndStep, Vec::new())
    }

    pub fn binary<L: Into<Value>, R: Into<Value>>(cmd: Cmd, lhs: L, rhs: R) -> Self {
        OpCode::new(cmd, vec![lhs.into(), rhs.into()])
    }

    pub fn unary<V: Into<Value>>(cmd: Cmd, operand: V) -> Self {
        OpCode::new(cmd, vec![operand.into()])
    }
}

/// A user-defined function. Parameters bind positionally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFunction {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    pub body: Arc<[OpCode]>,
}

impl UserFunction {
    pub fn new<S: Into<String>>(name: S, params: Vec<String>, body: Vec<OpCode>) -> Self {
        UserFunction {
            name: name.into(),
            params,
            body: body.into(),
        }
    }
}

/// A compiled script: the top-level task plus its function table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub main: Vec<OpCode>,
    #[serde(default)]
    pub functions: Vec<UserFunction>,
}

impl Program {
    pub fn new(main: Vec<OpCode>) -> Self {
        Program {
            main,
            functions: Vec::new(),
        }
    }

    pub fn with_function(mut self, function: UserFunction) -> Self {
        self.functions.push(function);
        self
    }
}
