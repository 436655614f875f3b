//! Interpreter-side environment
//!
//! `Env` is the single owner of everything the interpreter thread touches:
//! the engine, the exception slot, the work item registry, the async id
//! bookkeeping and the receiving end of the worker pool's event channel.
//! Host operations take `&mut Env`, so there is never more than one writer.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::engine::Engine;
use crate::scheduler::{event_channel, LoopEvent, LoopReceiver, LoopSender, Scheduler, ThreadPool, WorkId};
use crate::status::{BridgeError, LastError, Result};
use crate::work::WorkItem;

/* ===================== Exception Slot ===================== */

/// Pending exceptions of one environment
///
/// A catchable exception is the normal channel; a fatal exception is a
/// separate, more severe tier that bypasses catch handlers.
#[derive(Debug)]
pub struct ExceptionSlot<V> {
    pending: Option<V>,
    fatal: Option<V>,
}

impl<V> ExceptionSlot<V> {
    pub fn new() -> Self {
        Self {
            pending: None,
            fatal: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some() || self.fatal.is_some()
    }

    pub fn set(&mut self, exception: V) {
        self.pending = Some(exception);
    }

    pub fn set_fatal(&mut self, exception: V) {
        self.fatal = Some(exception);
    }

    /// Get and clear the catchable exception
    pub fn take(&mut self) -> Option<V> {
        self.pending.take()
    }

    /// Get and clear the fatal exception
    pub fn take_fatal(&mut self) -> Option<V> {
        self.fatal.take()
    }
}

impl<V> Default for ExceptionSlot<V> {
    fn default() -> Self {
        Self::new()
    }
}

/* ===================== Async Ids ===================== */

/// Async id bookkeeping for context correlation
#[derive(Debug, Default)]
pub(crate) struct AsyncIds {
    last: u64,
    pub(crate) execution: u64,
    pub(crate) trigger: u64,
    pub(crate) live_contexts: usize,
}

impl AsyncIds {
    pub(crate) fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

/* ===================== Env ===================== */

pub struct Env<E: Engine> {
    pub(crate) engine: E,
    pub(crate) exceptions: ExceptionSlot<E::Value>,
    pub(crate) last_error: LastError,
    pub(crate) work: HashMap<WorkId, WorkItem<E>>,
    pub(crate) next_work_id: u64,
    pub(crate) async_ids: AsyncIds,
    pub(crate) scheduler: Box<dyn Scheduler>,
    events: LoopReceiver,
}

impl<E: Engine> Env<E> {
    /// Create an environment backed by a `ThreadPool`
    pub fn new(engine: E, pool: &PoolConfig) -> Result<Self> {
        let (sender, events) = event_channel();
        let pool = ThreadPool::new(pool, sender)
            .map_err(|err| BridgeError::GenericFailure(err.to_string()))?;
        Ok(Self::from_parts(engine, Box::new(pool), events))
    }

    /// Create an environment over any scheduler.
    ///
    /// The factory receives the sender the scheduler must post events to.
    pub fn with_scheduler<S, F>(engine: E, factory: F) -> Self
    where
        S: Scheduler + 'static,
        F: FnOnce(LoopSender) -> S,
    {
        let (sender, events) = event_channel();
        let scheduler = factory(sender);
        Self::from_parts(engine, Box::new(scheduler), events)
    }

    fn from_parts(engine: E, scheduler: Box<dyn Scheduler>, events: LoopReceiver) -> Self {
        Self {
            engine,
            exceptions: ExceptionSlot::new(),
            last_error: LastError::ok(),
            work: HashMap::new(),
            next_work_id: 0,
            async_ids: AsyncIds::default(),
            scheduler,
            events,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Outcome of the most recent host operation
    pub fn last_error_info(&self) -> &LastError {
        &self.last_error
    }

    pub(crate) fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        self.last_error = LastError::record(&result);
        result
    }

    /* ----- exceptions ----- */

    pub fn is_exception_pending(&self) -> bool {
        self.exceptions.is_pending()
    }

    /// Raise `exception` as the pending catchable exception
    pub fn throw(&mut self, exception: E::Value) -> Result<()> {
        let result = if self.exceptions.is_pending() {
            Err(BridgeError::PendingException)
        } else {
            self.exceptions.set(exception);
            Ok(())
        };
        self.record(result)
    }

    /// Get and clear the pending catchable exception
    pub fn take_exception(&mut self) -> Option<E::Value> {
        self.last_error = LastError::ok();
        self.exceptions.take()
    }

    /// Raise `exception` as a fatal exception
    pub fn trigger_fatal_exception(&mut self, exception: E::Value) -> Result<()> {
        self.exceptions.set_fatal(exception);
        self.record(Ok(()))
    }

    pub fn take_fatal_exception(&mut self) -> Option<E::Value> {
        self.exceptions.take_fatal()
    }

    /// Call `func` synchronously.
    ///
    /// A thrown value becomes the pending exception and the call reports
    /// `PendingException`.
    pub fn call_function(
        &mut self,
        recv: &E::Value,
        func: &E::Value,
        args: &[E::Value],
    ) -> Result<E::Value> {
        if self.exceptions.is_pending() {
            return self.record(Err(BridgeError::PendingException));
        }

        let result = match self.engine.call_function(recv, func, args) {
            Ok(value) => Ok(value),
            Err(thrown) => {
                trace!(?thrown, "Function call threw");
                self.exceptions.set(thrown);
                Err(BridgeError::PendingException)
            }
        };
        self.record(result)
    }

    /* ----- event loop ----- */

    /// Number of work items not yet freed by their close hook
    pub fn live_work_items(&self) -> usize {
        self.work.len()
    }

    /// Number of async contexts created and not yet destroyed or released
    pub fn live_async_contexts(&self) -> usize {
        self.async_ids.live_contexts
    }

    /// True while some work item is queued, running, dispatching or closing
    pub fn has_active_work(&self) -> bool {
        self.work.values().any(WorkItem::is_active)
    }

    /// Process loop events until no work item is active.
    ///
    /// Returns the number of events handled.
    pub fn run(&mut self) -> usize {
        let mut handled = 0;
        while self.has_active_work() {
            let Some(event) = self.events.recv_blocking() else {
                break;
            };
            self.dispatch(event);
            handled += 1;
        }
        debug!(handled, live = self.work.len(), "Event loop idle");
        handled
    }

    /// Process the events that are ready without blocking
    pub fn run_once(&mut self) -> usize {
        let mut handled = 0;
        while let Some(event) = self.events.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Complete { id, job } => self.on_work_complete(id, job),
            LoopEvent::Close { id } => self.on_work_close(id, None),
        }
    }
}
