//! Reference engine
//!
//! A small in-process engine over `Val`. Functions are native Rust closures,
//! the next-tick queue holds closures, and fatal errors are recorded instead of
//! aborting the process. It is enough to drive the bridge end to end and to
//! observe what the bridge asked the engine to do.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{error, trace, warn};

use super::values::{Val, TYPE_ERROR};
use super::{Engine, HandleScope};

/// Native function: `(engine, receiver, args) -> value | thrown value`
pub type NativeFn = Rc<dyn Fn(&mut BasicEngine, &Val, &[Val]) -> Result<Val, Val>>;

/// Deferred callback queued with `BasicEngine::next_tick`
pub type TickFn = Box<dyn FnOnce(&mut BasicEngine)>;

/// A fatal error reported through `Engine::on_fatal_error`
#[derive(Debug, Clone, PartialEq)]
pub struct FatalError {
    pub error: Val,
    pub location: Option<String>,
}

/// Counters describing what the bridge asked of the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of `run_next_tick` calls
    pub drains: usize,
    /// Number of values released
    pub released: usize,
    pub scopes_opened: usize,
    pub calls: usize,
}

#[derive(Default)]
pub struct BasicEngine {
    functions: Vec<NativeFn>,
    ticks: VecDeque<TickFn>,
    scope_depth: usize,
    fatal_errors: Vec<FatalError>,
    stats: EngineStats,
}

impl BasicEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a native function and return the value that refers to it
    pub fn register_function<F>(&mut self, f: F) -> Val
    where
        F: Fn(&mut BasicEngine, &Val, &[Val]) -> Result<Val, Val> + 'static,
    {
        self.functions.push(Rc::new(f));
        Val::Func(self.functions.len() - 1)
    }

    /// Queue a callback for the next drain of the deferred-callback queue
    pub fn next_tick<F>(&mut self, f: F)
    where
        F: FnOnce(&mut BasicEngine) + 'static,
    {
        self.ticks.push_back(Box::new(f));
    }

    pub fn pending_ticks(&self) -> usize {
        self.ticks.len()
    }

    pub fn scope_depth(&self) -> usize {
        self.scope_depth
    }

    pub fn fatal_errors(&self) -> &[FatalError] {
        &self.fatal_errors
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

impl Engine for BasicEngine {
    type Value = Val;

    fn value_from_error(&mut self, exception: &Val, release: bool) -> Val {
        let value = match exception {
            Val::Exception(inner) => (**inner).clone(),
            other => other.clone(),
        };
        if release {
            self.release_value(exception.clone());
        }
        value
    }

    fn release_value(&mut self, value: Val) {
        self.stats.released += 1;
        drop(value);
    }

    fn open_handle_scope(&mut self) -> HandleScope {
        self.scope_depth += 1;
        self.stats.scopes_opened += 1;
        HandleScope::new(self.scope_depth)
    }

    fn close_handle_scope(&mut self, scope: HandleScope) {
        if scope.depth() != self.scope_depth {
            warn!(
                expected = self.scope_depth,
                got = scope.depth(),
                "Handle scope closed out of order"
            );
        }
        self.scope_depth = scope.depth().saturating_sub(1);
    }

    fn run_next_tick(&mut self) {
        self.stats.drains += 1;
        // Ticks queued while draining run in the same drain
        while let Some(tick) = self.ticks.pop_front() {
            tick(self);
        }
    }

    fn on_fatal_error(&mut self, error: Val, location: Option<&str>) {
        error!(?error, location, "Fatal error in completion callback");
        self.fatal_errors.push(FatalError {
            error,
            location: location.map(str::to_string),
        });
    }

    fn call_function(&mut self, recv: &Val, func: &Val, args: &[Val]) -> Result<Val, Val> {
        self.stats.calls += 1;

        let native = match func {
            Val::Func(id) => self.functions.get(*id).cloned(),
            _ => None,
        };

        let Some(native) = native else {
            trace!(?func, "Call on non-function value");
            return Err(Val::thrown(Val::error(
                TYPE_ERROR,
                "value is not a function",
            )));
        };

        native(self, recv, args).map_err(|thrown| match thrown {
            Val::Exception(_) => thrown,
            other => Val::thrown(other),
        })
    }
}
