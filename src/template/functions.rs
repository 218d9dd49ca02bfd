//! Function bindings callable from templates
//!
//! Names are stored without the `$` prefix used in templates, so
//! `{{ $randomNumber(1, 10) }}` looks up `randomNumber`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;

use crate::common::{Error, Result};

use super::expr;
use super::sandbox::Sandbox;

/// A host callable invoked with positional literal arguments
pub type FunctionFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

/// Named function bindings
#[derive(Clone, Default)]
pub struct Functions {
    inner: HashMap<String, Arc<FunctionFn>>,
}

impl fmt::Debug for Functions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.inner.keys().collect();
        names.sort();
        f.debug_set().entries(names).finish()
    }
}

fn normalize(name: &str) -> &str {
    name.strip_prefix('$').unwrap_or(name)
}

impl Functions {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `$randomNumber` and `$randomString`
    pub fn with_builtins() -> Self {
        let mut funcs = Self::new();
        funcs.register("randomNumber", random_number);
        funcs.register("randomString", random_string);
        funcs
    }

    /// Register (or replace) a function
    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.inner.insert(normalize(name).to_string(), Arc::new(f));
    }

    /// Register a function implemented as script code
    ///
    /// Each call runs `code` in a fresh clone of `sandbox` with the call
    /// arguments bound to `args`. Nothing assigned by one call is visible to
    /// the next. The code is parsed once, here.
    pub fn register_script(&mut self, name: &str, sandbox: Sandbox, code: &str) -> Result<()> {
        let program = expr::parse_program(code)?;
        let fn_name = normalize(name).to_string();
        let label = fn_name.clone();

        self.register(&fn_name, move |args: &[Value]| {
            let mut scope = sandbox.clone();
            scope.bind("args", Value::Array(args.to_vec()));
            scope
                .run(&program)
                .map_err(|e| Error::function(&label, e.to_string()))
        });
        Ok(())
    }

    /// Whether a function is bound under `name` (with or without `$`)
    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(normalize(name))
    }

    /// Invoke a bound function; `None` if the name is unbound
    pub fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value>> {
        self.inner.get(normalize(name)).map(|f| f(args))
    }

    /// Names of all bound functions, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.inner.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn integer_arg(args: &[Value], index: usize, default: i64, name: &str) -> Result<i64> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .ok_or_else(|| Error::function(name, "argument out of range")),
        Some(other) => Err(Error::function(
            name,
            format!("expected a number, got {}", other),
        )),
    }
}

/// `$randomNumber(min, max)`: integer in the inclusive range
fn random_number(args: &[Value]) -> Result<Value> {
    let min = integer_arg(args, 0, 0, "randomNumber")?;
    let max = integer_arg(args, 1, 10_000, "randomNumber")?;
    if min > max {
        return Err(Error::function(
            "randomNumber",
            format!("min {} is greater than max {}", min, max),
        ));
    }
    Ok(Value::from(rand::thread_rng().gen_range(min..=max)))
}

/// `$randomString(length)`: alphanumeric string, 10 characters by default
fn random_string(args: &[Value]) -> Result<Value> {
    let len = integer_arg(args, 0, 10, "randomString")?;
    let len = usize::try_from(len)
        .map_err(|_| Error::function("randomString", "length must not be negative"))?;
    let s: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    Ok(Value::String(s))
}
