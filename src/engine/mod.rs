//! Scripting engine interface
//!
//! The bridge never inspects interpreter values itself. Everything it needs
//! from the engine goes through the `Engine` trait:
//! - unwrapping and releasing exception values
//! - opening and closing handle scopes around completion callbacks
//! - draining the deferred-callback (next tick) queue
//! - reporting fatal errors
//! - calling a function synchronously
//!
//! Pending and fatal exceptions are not engine state; they live on the
//! environment (see `crate::env::ExceptionSlot`).

pub mod basic;
pub mod values;

use std::fmt::Debug;

pub use basic::{BasicEngine, EngineStats, FatalError};
pub use values::{ErrorInfo, Val, ERROR, TYPE_ERROR};

/// Token for an open handle scope
///
/// Scopes nest; the engine expects them to be closed in reverse order of opening.
#[derive(Debug, PartialEq, Eq)]
pub struct HandleScope {
    depth: usize,
}

impl HandleScope {
    pub fn new(depth: usize) -> Self {
        Self { depth }
    }

    /// Nesting depth of this scope (1 for the outermost)
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// Narrow view of the single-threaded scripting engine
pub trait Engine {
    type Value: Clone + Debug;

    /// Extract the value carried by an exception wrapper.
    ///
    /// With `release` set the wrapper is released as part of the call; the
    /// completion dispatcher passes `false` and releases the wrapper itself.
    fn value_from_error(&mut self, exception: &Self::Value, release: bool) -> Self::Value;

    fn release_value(&mut self, value: Self::Value);

    fn open_handle_scope(&mut self) -> HandleScope;

    fn close_handle_scope(&mut self, scope: HandleScope);

    /// Resume the deferred-callback queue until it is empty
    fn run_next_tick(&mut self);

    /// Report an error that no caller frame can handle
    fn on_fatal_error(&mut self, error: Self::Value, location: Option<&str>);

    /// Call `func` with `recv` as the receiver.
    ///
    /// `Err` carries the thrown exception.
    fn call_function(
        &mut self,
        recv: &Self::Value,
        func: &Self::Value,
        args: &[Self::Value],
    ) -> std::result::Result<Self::Value, Self::Value>;
}
