// Module: Context
// Manages variable state, interpolation, and built-ins.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static INTERPOLATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_.:-]+)\}").expect("valid interpolation regex")
});

/// Per-VU built-in values, resolved fresh on every reference (`TIME` and
/// `UUID` change each time they're looked up; `VU` is fixed for the VU's
/// lifetime; `ITER` advances once per iteration; `COUNTER` is shared and
/// monotonic across the VU's whole run).
#[derive(Debug, Clone)]
pub struct BuiltinResolver {
    pub vu: u64,
    pub iter: u64,
    counter: Arc<AtomicU64>,
}

impl BuiltinResolver {
    pub fn new(vu: u64, counter: Arc<AtomicU64>) -> Self {
        Self {
            vu,
            iter: 1,
            counter,
        }
    }

    pub fn for_iteration(&self, iter: u64) -> Self {
        Self {
            vu: self.vu,
            iter,
            counter: self.counter.clone(),
        }
    }

    fn resolve(&self, name: &str) -> Option<String> {
        match name {
            "VU" => Some(self.vu.to_string()),
            "ITER" => Some(self.iter.to_string()),
            "TIME" => Some(chrono::Utc::now().to_rfc3339()),
            "UUID" => Some(uuid::Uuid::new_v4().to_string()),
            "COUNTER" => Some(self.counter.fetch_add(1, Ordering::SeqCst).to_string()),
            _ => None,
        }
    }
}

/// Holds the execution state for one iteration: user/extracted variables
/// plus an optional set of built-ins consulted first.
#[derive(Debug, Default, Clone)]
pub struct Context {
    pub variables: HashMap<String, Value>,
    pub builtins: Option<BuiltinResolver>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            variables: HashMap::new(),
            builtins: None,
        }
    }

    pub fn with_builtins(builtins: BuiltinResolver) -> Self {
        Self {
            variables: HashMap::new(),
            builtins: Some(builtins),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn extend(&mut self, entries: &HashMap<String, Value>) {
        for (k, v) in entries {
            self.variables.insert(k.clone(), v.clone());
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Interpolates `${name}` placeholders inside a string, leaving any
    /// unresolved reference untouched rather than erroring — a name the
    /// variable engine doesn't know yet (a forward extraction, typically)
    /// is expected and resolved on a later pass.
    pub fn interpolate_str(&self, input: &str) -> Result<String> {
        let mut result = String::new();
        let mut last_index = 0;

        for capture in INTERPOLATION_RE.captures_iter(input) {
            let matched = capture.get(0).unwrap();
            result.push_str(&input[last_index..matched.start()]);
            let token = capture.get(1).unwrap().as_str();
            match self.try_resolve_token(token) {
                Some(resolved) => result.push_str(&resolved),
                None => result.push_str(matched.as_str()),
            }
            last_index = matched.end();
        }

        result.push_str(&input[last_index..]);
        Ok(result)
    }

    pub fn interpolate_value(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => Ok(Value::String(self.interpolate_str(s)?)),
            Value::Array(items) => {
                let mut result = Vec::with_capacity(items.len());
                for item in items {
                    result.push(self.interpolate_value(item)?);
                }
                Ok(Value::Array(result))
            }
            Value::Object(map) => {
                let mut new_map = Map::with_capacity(map.len());
                for (k, v) in map {
                    new_map.insert(k.clone(), self.interpolate_value(v)?);
                }
                Ok(Value::Object(new_map))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Strict variant that errors on an unresolved reference — used where a
    /// value is required to be fully known (e.g. a retry-delay expression).
    pub fn resolve_token(&self, token: &str) -> Result<String> {
        self.try_resolve_token(token)
            .ok_or_else(|| anyhow!("Missing context variable '{}'.", token))
    }

    fn try_resolve_token(&self, token: &str) -> Option<String> {
        if let Some(builtins) = &self.builtins {
            if let Some(v) = builtins.resolve(token) {
                return Some(v);
            }
        }
        if let Some(rest) = token.strip_prefix("ENV_") {
            return std::env::var(rest).ok();
        }
        self.variables.get(token).map(|value| match value {
            Value::String(s) => s.clone(),
            primitive => primitive.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_known_variable() {
        let mut ctx = Context::new();
        ctx.set("name", Value::String("alice".into()));
        assert_eq!(ctx.interpolate_str("hi ${name}").unwrap(), "hi alice");
    }

    #[test]
    fn leaves_unknown_reference_untouched() {
        let ctx = Context::new();
        assert_eq!(ctx.interpolate_str("token=${token}").unwrap(), "token=${token}");
    }

    #[test]
    fn resolves_builtins_before_variables() {
        let counter = Arc::new(AtomicU64::new(0));
        let builtins = BuiltinResolver::new(3, counter);
        let ctx = Context::with_builtins(builtins);
        assert_eq!(ctx.interpolate_str("vu=${VU}").unwrap(), "vu=3");
        assert_eq!(ctx.interpolate_str("i=${ITER}").unwrap(), "i=1");
    }

    #[test]
    fn counter_is_monotonic_across_calls() {
        let counter = Arc::new(AtomicU64::new(0));
        let builtins = BuiltinResolver::new(1, counter);
        let ctx = Context::with_builtins(builtins);
        let a = ctx.interpolate_str("${COUNTER}").unwrap();
        let b = ctx.interpolate_str("${COUNTER}").unwrap();
        assert_ne!(a, b);
    }
}
