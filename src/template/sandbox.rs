//! Isolated evaluation of script code
//!
//! A [`Sandbox`] owns its binding map; code evaluated inside it can read and
//! assign those bindings and nothing else. Code is expected to be trusted:
//! the only isolation provided is the variable namespace and a step budget.

use serde_json::{Map, Value};

use crate::common::{Error, Result};

use super::expr::{self, BinaryOp, Expr, LogicalOp, Program, UnaryOp};
use super::stringify;

/// Default evaluation budget (expression nodes visited per run)
const DEFAULT_STEP_LIMIT: usize = 100_000;

/// Isolated evaluation context
#[derive(Debug, Clone)]
pub struct Sandbox {
    bindings: Map<String, Value>,
    step_limit: usize,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(Map::new())
    }
}

impl Sandbox {
    /// Create a sandbox whose only visible state is `bindings`
    pub fn new(bindings: Map<String, Value>) -> Self {
        Self {
            bindings,
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    /// Limit the number of expression nodes a single run may visit
    pub fn with_step_limit(mut self, limit: usize) -> Self {
        self.step_limit = limit;
        self
    }

    /// Add or replace a binding
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    /// Current bindings, including anything assigned by evaluated code
    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    /// Parse and evaluate `code`, returning the value of its last expression
    pub fn evaluate(&mut self, code: &str) -> Result<Value> {
        let program = expr::parse_program(code)?;
        self.run(&program)
    }

    /// Evaluate an already parsed program
    pub fn run(&mut self, program: &Program) -> Result<Value> {
        let mut interp = Interpreter {
            bindings: &mut self.bindings,
            budget: self.step_limit,
        };
        let mut last = Value::Null;
        for statement in &program.statements {
            last = interp.eval(statement)?;
        }
        Ok(last)
    }
}

struct Interpreter<'a> {
    bindings: &'a mut Map<String, Value>,
    budget: usize,
}

impl Interpreter<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value> {
        if self.budget == 0 {
            return Err(Error::Evaluation("step limit exceeded".to_string()));
        }
        self.budget -= 1;

        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Expr::Ident(name) => self
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Evaluation(format!("{} is not defined", name))),
            Expr::Member { object, property } => {
                let object = self.eval(object)?;
                Ok(member(&object, property))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object)?;
                let index = self.eval(index)?;
                Ok(match (&object, &index) {
                    (Value::Array(items), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| items.get(i as usize))
                        .cloned()
                        .unwrap_or(Value::Null),
                    (Value::String(s), Value::Number(n)) => n
                        .as_u64()
                        .and_then(|i| s.chars().nth(i as usize))
                        .map(|c| Value::String(c.to_string()))
                        .unwrap_or(Value::Null),
                    _ => member(&object, &stringify(&index)),
                })
            }
            Expr::Call { callee, args } => {
                let Expr::Ident(name) = callee.as_ref() else {
                    return Err(Error::Evaluation("callee is not a function".to_string()));
                };
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>>>()?;
                call_builtin(name, &args)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                    UnaryOp::Neg => Ok(expr::number_value(-to_number(&value, "-")?)),
                    UnaryOp::Plus => Ok(expr::number_value(to_number(&value, "+")?)),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left)?;
                match (op, truthy(&left)) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right),
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if truthy(&self.eval(test)?) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Assign { name, value } => {
                let value = self.eval(value)?;
                self.bindings.insert(name.clone(), value.clone());
                Ok(value)
            }
        }
    }
}

fn member(object: &Value, property: &str) -> Value {
    match (object, property) {
        (Value::Array(items), "length") => Value::from(items.len()),
        (Value::String(s), "length") => Value::from(s.chars().count()),
        (Value::Object(map), key) => map.get(key).cloned().unwrap_or(Value::Null),
        (Value::Array(items), key) => key
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

/// JavaScript-style truthiness
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value, op: &str) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::Evaluation(format!("number out of range for '{}'", op))),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::Evaluation(format!("'{}' is not a number", s))),
        other => Err(Error::Evaluation(format!(
            "cannot apply '{}' to {}",
            op,
            type_name(other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinaryOp::Add => {
            if left.is_string() || right.is_string() {
                return Ok(Value::String(stringify(left) + &stringify(right)));
            }
            arithmetic(op, left, right)
        }
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, left, right)
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let a = to_number(left, "compare")?;
                    let b = to_number(right, "compare")?;
                    a.partial_cmp(&b).ok_or_else(|| {
                        Error::Evaluation("cannot compare NaN".to_string())
                    })?
                }
            };
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        _ => "%",
    };
    let a = to_number(left, symbol)?;
    let b = to_number(right, symbol)?;
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => {
            return Err(Error::Evaluation("division by zero".to_string()));
        }
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    if !result.is_finite() {
        return Err(Error::Evaluation(format!("'{}' overflowed", symbol)));
    }
    Ok(expr::number_value(result))
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value> {
    let first = args.first().unwrap_or(&Value::Null);
    match name {
        "len" => match first {
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(Error::Evaluation(format!(
                "len() expects a string, array or object, got {}",
                type_name(other)
            ))),
        },
        "str" => Ok(Value::String(stringify(first))),
        "num" => to_number(first, "num").map(expr::number_value),
        "upper" => Ok(Value::String(stringify(first).to_uppercase())),
        "lower" => Ok(Value::String(stringify(first).to_lowercase())),
        "floor" => to_number(first, "floor").map(|f| expr::number_value(f.floor())),
        _ => Err(Error::Evaluation(format!("{} is not a function", name))),
    }
}
