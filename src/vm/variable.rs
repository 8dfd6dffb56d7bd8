use std::{cmp::Ordering, collections::HashMap, fmt::Display};

use serde::{Deserialize, Serialize};

use crate::error::{FillyError, FillyResult};

/// Reserved variable carrying the result of the last call.
pub const RETURN_SLOT: &str = "$return";

/// Largest array a script may build, through `ArrayNew` or by assigning past the end.
pub const MAX_ARRAY_SIZE: i64 = 1 << 24;

/// Names of the four message parameters bound into every spawned handler task.
pub const MESSAGE_PARAMS: [&str; 4] = ["mesp1", "mesp2", "mesp3", "mesp4"];

/// A reference to a script variable. Names are case-insensitive and stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Variable(String);

impl Variable {
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Variable(name.as_ref().to_lowercase())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<String> for Variable {
    fn from(value: String) -> Self {
        Variable::new(value)
    }
}

impl From<&str> for Variable {
    fn from(value: &str) -> Self {
        Variable::new(value)
    }
}

impl From<Variable> for String {
    fn from(value: Variable) -> Self {
        value.0
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runtime value of a script variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Array(Vec<VariableValue>),
}

impl Default for VariableValue {
    fn default() -> Self {
        Self::Integer(0)
    }
}

impl From<i64> for VariableValue {
    fn from(value: i64) -> Self {
        VariableValue::Integer(value)
    }
}
impl From<i32> for VariableValue {
    fn from(value: i32) -> Self {
        VariableValue::Integer(value as i64)
    }
}
impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        VariableValue::Float(value)
    }
}
impl From<bool> for VariableValue {
    fn from(value: bool) -> Self {
        VariableValue::Bool(value)
    }
}
impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        VariableValue::Str(value)
    }
}
impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        VariableValue::Str(value.to_owned())
    }
}
impl From<Vec<VariableValue>> for VariableValue {
    fn from(value: Vec<VariableValue>) -> Self {
        VariableValue::Array(value)
    }
}

impl Display for VariableValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VariableValue::Integer(i) => write!(f, "{}", i),
            VariableValue::Float(x) => write!(f, "{}", x),
            VariableValue::Bool(b) => write!(f, "{}", if *b { 1 } else { 0 }),
            VariableValue::Str(s) => write!(f, "{}", s),
            VariableValue::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Numeric view of a value once booleans are folded into integers.
enum Number {
    Int(i64),
    Float(f64),
}

impl VariableValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            VariableValue::Integer(_) => "integer",
            VariableValue::Float(_) => "float",
            VariableValue::Bool(_) => "bool",
            VariableValue::Str(_) => "string",
            VariableValue::Array(_) => "array",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            VariableValue::Integer(i) => *i != 0,
            VariableValue::Float(x) => *x != 0.0,
            VariableValue::Bool(b) => *b,
            VariableValue::Str(s) => !s.is_empty(),
            VariableValue::Array(items) => !items.is_empty(),
        }
    }

    /// Lenient integer conversion: floats truncate, unparsable strings and arrays give 0.
    pub fn as_integer(&self) -> i64 {
        match self {
            VariableValue::Integer(i) => *i,
            VariableValue::Float(x) => *x as i64,
            VariableValue::Bool(b) => *b as i64,
            VariableValue::Str(s) => s.trim().parse().unwrap_or(0),
            VariableValue::Array(_) => 0,
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            VariableValue::Float(x) => *x,
            VariableValue::Str(s) => s.trim().parse().unwrap_or(0.0),
            other => other.as_integer() as f64,
        }
    }

    fn as_number(&self, op: &str) -> FillyResult<Number> {
        match self {
            VariableValue::Integer(i) => Ok(Number::Int(*i)),
            VariableValue::Bool(b) => Ok(Number::Int(*b as i64)),
            VariableValue::Float(x) => Ok(Number::Float(*x)),
            other => Err(FillyError::Type(format!(
                "cannot apply '{}' to {}",
                op,
                other.type_name()
            ))),
        }
    }

    fn arithmetic(
        &self,
        other: &VariableValue,
        op: &str,
        int_op: fn(i64, i64) -> i64,
        float_op: fn(f64, f64) -> f64,
    ) -> FillyResult<VariableValue> {
        let res = match (self.as_number(op)?, other.as_number(op)?) {
            (Number::Int(x), Number::Int(y)) => VariableValue::Integer(int_op(x, y)),
            (Number::Int(x), Number::Float(y)) => VariableValue::Float(float_op(x as f64, y)),
            (Number::Float(x), Number::Int(y)) => VariableValue::Float(float_op(x, y as f64)),
            (Number::Float(x), Number::Float(y)) => VariableValue::Float(float_op(x, y)),
        };
        Ok(res)
    }

    /// Addition; a string on either side turns it into concatenation.
    pub fn add(&self, other: &VariableValue) -> FillyResult<VariableValue> {
        if matches!(self, VariableValue::Str(_)) || matches!(other, VariableValue::Str(_)) {
            return Ok(VariableValue::Str(format!("{}{}", self, other)));
        }
        self.arithmetic(other, "+", i64::wrapping_add, |x, y| x + y)
    }

    pub fn sub(&self, other: &VariableValue) -> FillyResult<VariableValue> {
        self.arithmetic(other, "-", i64::wrapping_sub, |x, y| x - y)
    }

    pub fn mul(&self, other: &VariableValue) -> FillyResult<VariableValue> {
        self.arithmetic(other, "*", i64::wrapping_mul, |x, y| x * y)
    }

    pub fn div(&self, other: &VariableValue) -> FillyResult<VariableValue> {
        if other.is_zero() {
            return Err(FillyError::DivisionByZero);
        }
        self.arithmetic(other, "/", i64::wrapping_div, |x, y| x / y)
    }

    pub fn rem(&self, other: &VariableValue) -> FillyResult<VariableValue> {
        if other.is_zero() {
            return Err(FillyError::DivisionByZero);
        }
        self.arithmetic(other, "%", i64::wrapping_rem, |x, y| x % y)
    }

    fn is_zero(&self) -> bool {
        match self {
            VariableValue::Integer(i) => *i == 0,
            VariableValue::Float(x) => *x == 0.0,
            VariableValue::Bool(b) => !*b,
            _ => false,
        }
    }

    fn bitwise(
        &self,
        other: &VariableValue,
        op: &str,
        f: fn(i64, i64) -> i64,
    ) -> FillyResult<VariableValue> {
        let x = self.as_number(op)?;
        let y = other.as_number(op)?;
        let to_int = |n: Number| match n {
            Number::Int(i) => i,
            Number::Float(x) => x as i64,
        };
        Ok(VariableValue::Integer(f(to_int(x), to_int(y))))
    }

    pub fn bit_and(&self, other: &VariableValue) -> FillyResult<VariableValue> {
        self.bitwise(other, "&", |x, y| x & y)
    }

    pub fn bit_or(&self, other: &VariableValue) -> FillyResult<VariableValue> {
        self.bitwise(other, "|", |x, y| x | y)
    }

    pub fn bit_xor(&self, other: &VariableValue) -> FillyResult<VariableValue> {
        self.bitwise(other, "^", |x, y| x ^ y)
    }

    pub fn and(&self, other: &VariableValue) -> VariableValue {
        VariableValue::Bool(self.is_truthy() && other.is_truthy())
    }

    pub fn or(&self, other: &VariableValue) -> VariableValue {
        VariableValue::Bool(self.is_truthy() || other.is_truthy())
    }

    pub fn neg(&self) -> FillyResult<VariableValue> {
        match self.as_number("unary -")? {
            Number::Int(i) => Ok(VariableValue::Integer(i.wrapping_neg())),
            Number::Float(x) => Ok(VariableValue::Float(-x)),
        }
    }

    pub fn not(&self) -> VariableValue {
        VariableValue::Bool(!self.is_truthy())
    }

    /// Equality across kinds: numbers compare by value, strings by content,
    /// arrays element-wise. Mismatched kinds are never equal.
    pub fn loose_eq(&self, other: &VariableValue) -> bool {
        match (self, other) {
            (VariableValue::Str(x), VariableValue::Str(y)) => x == y,
            (VariableValue::Array(x), VariableValue::Array(y)) => {
                x.len() == y.len() && x.iter().zip(y).all(|(a, b)| a.loose_eq(b))
            }
            (VariableValue::Str(_) | VariableValue::Array(_), _)
            | (_, VariableValue::Str(_) | VariableValue::Array(_)) => false,
            _ => matches!(self.compare(other), Ok(Ordering::Equal)),
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`. Strings order lexically, numbers numerically.
    pub fn compare(&self, other: &VariableValue) -> FillyResult<Ordering> {
        if let (VariableValue::Str(x), VariableValue::Str(y)) = (self, other) {
            return Ok(x.cmp(y));
        }
        let ordering = match (self.as_number("compare")?, other.as_number("compare")?) {
            (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
            (Number::Int(x), Number::Float(y)) => (x as f64).partial_cmp(&y),
            (Number::Float(x), Number::Int(y)) => x.partial_cmp(&(y as f64)),
            (Number::Float(x), Number::Float(y)) => x.partial_cmp(&y),
        };
        ordering.ok_or_else(|| FillyError::Type("comparison with NaN".to_string()))
    }

    /// `a[i]` on arrays and strings. Reading past the end gives 0, like an unset variable.
    pub fn index(&self, index: &VariableValue) -> FillyResult<VariableValue> {
        let i = index.as_integer();
        match self {
            VariableValue::Array(items) => Ok(usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or_default()),
            VariableValue::Str(s) => Ok(usize::try_from(i)
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| VariableValue::Str(c.to_string()))
                .unwrap_or_default()),
            other => Err(FillyError::Type(format!("cannot index into {}", other.type_name()))),
        }
    }

    /// Writes `value` at `index`, turning a scalar into an array and growing it with zeros.
    pub fn set_index(&mut self, index: i64, value: VariableValue) -> FillyResult<()> {
        if index >= MAX_ARRAY_SIZE {
            return Err(FillyError::Type(format!("array index {} out of range", index)));
        }
        let index = usize::try_from(index)
            .map_err(|_| FillyError::Type(format!("negative array index {}", index)))?;
        if !matches!(self, VariableValue::Array(_)) {
            *self = VariableValue::Array(Vec::new());
        }
        if let VariableValue::Array(items) = self {
            if items.len() <= index {
                items.resize(index + 1, VariableValue::default());
            }
            items[index] = value;
        }
        Ok(())
    }
}

/// Per-task variable map. Keys are lowercased on every access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableStore {
    content: HashMap<String, VariableValue>,
}

impl VariableStore {
    pub fn new() -> VariableStore {
        Default::default()
    }

    pub fn insert<K: AsRef<str>>(&mut self, key: K, value: VariableValue) -> Option<VariableValue> {
        self.content.insert(key.as_ref().to_lowercase(), value)
    }

    pub fn set(&mut self, var: &Variable, value: VariableValue) {
        self.content.insert(var.name().to_owned(), value);
    }

    pub fn get(&self, key: &str) -> Option<&VariableValue> {
        match self.content.get(key) {
            Some(value) => Some(value),
            None => self.content.get(&key.to_lowercase()),
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut VariableValue> {
        self.content.get_mut(&key.to_lowercase())
    }

    /// Reads a variable; undefined ones read as `Integer(0)`.
    pub fn value(&self, var: &Variable) -> VariableValue {
        self.content.get(var.name()).cloned().unwrap_or_default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<VariableValue> {
        self.content.remove(&key.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VariableValue)> {
        self.content.iter()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn clear(&mut self) {
        self.content.clear();
    }
}

impl From<HashMap<String, VariableValue>> for VariableStore {
    fn from(content: HashMap<String, VariableValue>) -> Self {
        content.into_iter().collect()
    }
}

impl FromIterator<(String, VariableValue)> for VariableStore {
    fn from_iter<T: IntoIterator<Item = (String, VariableValue)>>(iter: T) -> Self {
        VariableStore {
            content: iter
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }
}
