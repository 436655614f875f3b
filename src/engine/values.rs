//! Runtime value types for the reference engine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const TYPE_ERROR: &str = "TypeError";
pub const ERROR: &str = "Error";

/// Error value with code and message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Runtime value type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Obj(HashMap<String, Val>),
    /// Error value with code and message
    Error(ErrorInfo),
    /// Reference to a native function registered with the engine
    Func(usize),
    /// A thrown value, flagged as an exception
    Exception(Box<Val>),
}

impl Val {
    pub fn is_exception(&self) -> bool {
        matches!(self, Val::Exception(_))
    }

    /// Wrap a value as a thrown exception
    pub fn thrown(value: Val) -> Val {
        Val::Exception(Box::new(value))
    }

    pub fn error(code: &str, message: impl Into<String>) -> Val {
        Val::Error(ErrorInfo::new(code, message))
    }
}
