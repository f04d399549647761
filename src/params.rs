// Copyright (c) 2026 The Maison developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The typed-parameter pipeline.
//!
//! A handler declares its parameters as a list of [`ParamSpec`]s. Before the
//! handler body runs, the pipeline extracts each declared parameter from the
//! request, converts it through its [`HttpType`], checks the type's assertion,
//! then checks the parameter's own predicates. Any failure rejects the request
//! with `400 Bad Request` and the body never runs.
//!
//! Parameters are processed in ascending order of their type's `priority`
//! (declaration order breaks ties), so a high-priority type can refer to names
//! bound by lower-priority ones. That is the whole point of priorities: a
//! `game` type can look up the game belonging to the already-converted `user`
//! parameter.
//!
//! Converted values live in the [`serde_json::Value`] universe, which is what
//! lets user-defined types compose with the built-ins.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use serde_json::Value;

use crate::request::Request;

pub type ConvertFn = dyn Fn(&str, &Bindings) -> Result<Value, String>;
pub type AssertFn = dyn Fn(&Value) -> bool;
pub type PredicateFn = dyn Fn(&Bindings) -> bool;

/// A parameter type: an optional conversion from the raw string and an
/// optional assertion over the converted value.
///
/// ```
/// use maison::HttpType;
///
/// // a type accepting only non-empty strings
/// let ty = HttpType::new()
///     .assert(|v| v.as_str().map_or(false, |s| !s.is_empty()));
/// # let _ = ty;
/// ```
pub struct HttpType {
    priority: i32,
    convert: Option<Box<ConvertFn>>,
    assert: Option<Box<AssertFn>>,
}

impl HttpType {
    /// A type with priority 0, identity conversion and no assertion.
    pub fn new() -> HttpType {
        HttpType {
            priority: 0,
            convert: None,
            assert: None,
        }
    }

    /// Parameters of lower-numbered priority are bound first.
    pub fn priority(mut self, priority: i32) -> HttpType {
        self.priority = priority;
        self
    }

    /// The conversion from the raw, URL-decoded string. It also receives the
    /// names bound so far, so types can depend on lower-priority parameters.
    pub fn convert<F>(mut self, f: F) -> HttpType
    where
        F: Fn(&str, &Bindings) -> Result<Value, String> + 'static,
    {
        self.convert = Some(Box::new(f));
        self
    }

    /// The assertion over the converted value.
    pub fn assert<F>(mut self, f: F) -> HttpType
    where
        F: Fn(&Value) -> bool + 'static,
    {
        self.assert = Some(Box::new(f));
        self
    }
}

impl Default for HttpType {
    fn default() -> HttpType {
        HttpType::new()
    }
}

/// The registry of parameter types.
pub struct TypeTable {
    types: HashMap<String, HttpType>,
}

impl TypeTable {
    /// A table holding the built-in types: `string`, `integer`, `json`,
    /// `keyword`, `list-of-keyword` and `list-of-integer`, all at priority 0.
    pub fn with_builtins() -> TypeTable {
        let mut table = TypeTable {
            types: HashMap::new(),
        };

        table.define("string", HttpType::new());

        table.define(
            "integer",
            HttpType::new()
                .convert(|raw, _| {
                    parse_integer_prefix(raw)
                        .map(Value::from)
                        .ok_or_else(|| format!("not an integer: {:?}", raw))
                })
                .assert(Value::is_number),
        );

        table.define(
            "json",
            HttpType::new().convert(|raw, _| {
                serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {}", e))
            }),
        );

        table.define(
            "keyword",
            HttpType::new().convert(|raw, _| Ok(Value::String(raw.to_lowercase()))),
        );

        table.define(
            "list-of-keyword",
            HttpType::new().convert(|raw, _| {
                let list: Vec<Value> =
                    serde_json::from_str(raw).map_err(|e| format!("invalid JSON array: {}", e))?;
                list.into_iter()
                    .map(|v| match v {
                        Value::String(s) => Ok(Value::String(s.to_lowercase())),
                        other => Err(format!("not a keyword: {}", other)),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }),
        );

        table.define(
            "list-of-integer",
            HttpType::new()
                .convert(|raw, _| {
                    serde_json::from_str::<Vec<Value>>(raw)
                        .map(Value::Array)
                        .map_err(|e| format!("invalid JSON array: {}", e))
                })
                .assert(|v| {
                    v.as_array()
                        .map_or(false, |list| list.iter().all(Value::is_number))
                }),
        );

        table
    }

    /// Installs a type under a case-folded name, replacing any previous
    /// definition.
    pub fn define(&mut self, name: &str, ty: HttpType) {
        self.types.insert(name.to_ascii_lowercase(), ty);
    }

    fn get(&self, name: &str) -> Option<&HttpType> {
        self.types.get(name)
    }

    fn priority_of(&self, type_name: Option<&str>) -> i32 {
        type_name
            .and_then(|n| self.get(n))
            .map_or(0, |ty| ty.priority)
    }
}

/// One declared handler parameter.
pub struct ParamSpec {
    pub(crate) name: String,
    pub(crate) type_name: Option<String>,
    pub(crate) predicates: Vec<Box<PredicateFn>>,
}

impl ParamSpec {
    /// A bare, untyped parameter: the raw URL-decoded string, required.
    pub fn untyped(name: &str) -> ParamSpec {
        ParamSpec {
            name: name.to_lowercase(),
            type_name: None,
            predicates: Vec::new(),
        }
    }

    /// A typed parameter.
    pub fn typed(name: &str, type_name: &str) -> ParamSpec {
        ParamSpec {
            name: name.to_lowercase(),
            type_name: Some(type_name.to_ascii_lowercase()),
            predicates: Vec::new(),
        }
    }

    /// Adds a predicate. It runs with this parameter and everything bound
    /// before it; returning `false` rejects the request.
    pub fn check<F>(mut self, predicate: F) -> ParamSpec
    where
        F: Fn(&Bindings) -> bool + 'static,
    {
        self.predicates.push(Box::new(predicate));
        self
    }
}

/// The names bound so far, in binding order.
#[derive(Default)]
pub struct Bindings {
    bound: Vec<(String, Value)>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bound
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// The bound value as an integer, if it is one.
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    /// The bound value as a string, if it is one.
    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    fn bind(&mut self, name: String, value: Value) {
        self.bound.push((name, value));
    }
}

/// Why the pipeline rejected a request. Every variant maps to `400`.
#[derive(Debug)]
pub enum PipelineError {
    /// A declared parameter is absent from the request.
    Missing(String),

    /// A declared type was never defined.
    UnknownType { param: String, type_name: String },

    /// The type's conversion failed.
    Convert { param: String, message: String },

    /// The type's assertion rejected the converted value.
    Assert(String),

    /// One of the parameter's predicates rejected the value.
    Predicate(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineError::Missing(p) => write!(f, "missing parameter {}", p),
            PipelineError::UnknownType { param, type_name } => {
                write!(f, "parameter {} has unknown type {}", param, type_name)
            }
            PipelineError::Convert { param, message } => {
                write!(f, "cannot convert parameter {}: {}", param, message)
            }
            PipelineError::Assert(p) => write!(f, "type assertion failed for parameter {}", p),
            PipelineError::Predicate(p) => write!(f, "predicate failed for parameter {}", p),
        }
    }
}

impl Error for PipelineError {}

/// Runs the pipeline for one request: sort by priority, then for each
/// parameter look up, convert, assert, check predicates, bind.
pub fn run_pipeline(
    types: &TypeTable,
    specs: &[ParamSpec],
    request: &Request,
) -> Result<Bindings, PipelineError> {
    // Stable sort: equal priorities keep declaration order.
    let mut order: Vec<usize> = (0..specs.len()).collect();
    order.sort_by_key(|&i| types.priority_of(specs[i].type_name.as_deref()));

    let mut bindings = Bindings::default();
    for &i in &order {
        let spec = &specs[i];
        let raw = request
            .param(&spec.name)
            .ok_or_else(|| PipelineError::Missing(spec.name.clone()))?;

        let value = match &spec.type_name {
            None => Value::String(raw.to_owned()),
            Some(type_name) => {
                let ty = types.get(type_name).ok_or_else(|| PipelineError::UnknownType {
                    param: spec.name.clone(),
                    type_name: type_name.clone(),
                })?;
                let value = match &ty.convert {
                    Some(convert) => {
                        convert(raw, &bindings).map_err(|message| PipelineError::Convert {
                            param: spec.name.clone(),
                            message,
                        })?
                    }
                    None => Value::String(raw.to_owned()),
                };
                if let Some(assert) = &ty.assert {
                    if !assert(&value) {
                        return Err(PipelineError::Assert(spec.name.clone()));
                    }
                }
                value
            }
        };

        bindings.bind(spec.name.clone(), value);
        for predicate in &spec.predicates {
            if !predicate(&bindings) {
                return Err(PipelineError::Predicate(spec.name.clone()));
            }
        }
    }

    Ok(bindings)
}

/// Signed decimal prefix parse: stops at the first non-digit, fails only when
/// no digits were seen at all.
fn parse_integer_prefix(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    digits[..end]
        .parse::<i64>()
        .ok()
        .map(|n| if negative { -n } else { n })
}
