//! Async contexts and synchronous re-entry
//!
//! An `AsyncContext` correlates callback invocations with the logical
//! asynchronous operation that caused them. It owns no scheduling state and
//! never leaves the interpreter thread.
//!
//! `make_callback` calls into the interpreter immediately. Its outcome makes
//! the ownership of the context explicit: a normal return hands the context
//! back to the caller, a thrown exception consumes it.

use std::marker::PhantomData;

use tracing::trace;

use crate::engine::Engine;
use crate::env::Env;
use crate::status::{BridgeError, LastError, Status};

/// Correlation record created by `Env::async_init`
///
/// Move-only and `!Send`: it is destroyed at most once, on the thread that
/// created it.
#[derive(Debug)]
pub struct AsyncContext<V> {
    async_id: u64,
    trigger_async_id: u64,
    resource: Option<V>,
    resource_name: Option<V>,
    _not_send: PhantomData<*const ()>,
}

impl<V> AsyncContext<V> {
    pub fn async_id(&self) -> u64 {
        self.async_id
    }

    /// Async id that was executing when this context was created
    pub fn trigger_async_id(&self) -> u64 {
        self.trigger_async_id
    }

    pub fn resource(&self) -> Option<&V> {
        self.resource.as_ref()
    }

    pub fn resource_name(&self) -> Option<&V> {
        self.resource_name.as_ref()
    }
}

/// Result of `Env::make_callback`
#[derive(Debug)]
pub enum CallbackOutcome<V> {
    /// The function returned normally, the queue was drained, the caller
    /// still owns the context.
    Returned { value: V, context: AsyncContext<V> },
    /// The function threw. The context has been released and the exception
    /// is pending in the environment; the queue was not drained.
    Threw,
}

impl<V> CallbackOutcome<V> {
    pub fn status(&self) -> Status {
        match self {
            CallbackOutcome::Returned { .. } => Status::Ok,
            CallbackOutcome::Threw => Status::PendingException,
        }
    }
}

impl<E: Engine> Env<E> {
    /// Create a correlation record
    pub fn async_init(
        &mut self,
        resource: Option<E::Value>,
        resource_name: Option<E::Value>,
    ) -> AsyncContext<E::Value> {
        let async_id = self.async_ids.next();
        self.async_ids.live_contexts += 1;
        self.last_error = Default::default();

        trace!(async_id, trigger = self.async_ids.execution, "Async context created");

        AsyncContext {
            async_id,
            trigger_async_id: self.async_ids.execution,
            resource,
            resource_name,
            _not_send: PhantomData,
        }
    }

    /// Free a correlation record.
    ///
    /// Taking the context by value makes a second destroy, or a destroy after
    /// `make_callback` released it, a compile error.
    pub fn async_destroy(&mut self, context: AsyncContext<E::Value>) {
        self.last_error = Default::default();
        self.release_context(context);
    }

    fn release_context(&mut self, context: AsyncContext<E::Value>) {
        self.async_ids.live_contexts = self.async_ids.live_contexts.saturating_sub(1);
        trace!(async_id = context.async_id, "Async context released");
    }

    /// Async id of the context currently executing (0 at top level)
    pub fn execution_async_id(&self) -> u64 {
        self.async_ids.execution
    }

    /// Trigger id of the context currently executing
    pub fn trigger_async_id(&self) -> u64 {
        self.async_ids.trigger
    }

    /// Call `func` synchronously on behalf of `context`.
    ///
    /// On a normal return the deferred-callback queue is drained and the
    /// context comes back in the outcome. If an exception is pending after
    /// the call, the context is released here, because the caller's
    /// destroy path will not run, and the queue is left alone so the
    /// exception reaches the caller first.
    pub fn make_callback(
        &mut self,
        context: AsyncContext<E::Value>,
        recv: &E::Value,
        func: &E::Value,
        args: &[E::Value],
    ) -> CallbackOutcome<E::Value> {
        let previous = (self.async_ids.execution, self.async_ids.trigger);
        self.async_ids.execution = context.async_id;
        self.async_ids.trigger = context.trigger_async_id;

        let result = self.call_function(recv, func, args);

        (self.async_ids.execution, self.async_ids.trigger) = previous;

        match result {
            Ok(value) if !self.is_exception_pending() => {
                self.engine.run_next_tick();
                self.last_error = LastError::ok();
                CallbackOutcome::Returned { value, context }
            }
            _ => {
                trace!(async_id = context.async_id, "Callback threw, releasing context");
                self.release_context(context);
                self.last_error = LastError::from_error(&BridgeError::PendingException);
                CallbackOutcome::Threw
            }
        }
    }
}
