//! Worker pool adapter
//!
//! The bridge talks to the worker pool through the `Scheduler` trait:
//! - `start` hands a request and its execute job to a worker thread
//! - `close` asks the pool to finish with a request as soon as possible
//!
//! Completion and close are delivered back to the interpreter thread as
//! `LoopEvent`s on the environment's event channel. The request's lifecycle
//! is a small atomic state machine shared between the interpreter thread and
//! the worker that picked the request up:
//!
//! ```text
//! Idle -> Queued -> Running -> Dispatching -> Idle
//!   \        \         \            \
//!    `--------`---------`------------`--> Closing
//! ```

pub mod pool;

use std::any::Any;
use std::ffi::CStr;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;

pub use pool::ThreadPool;

/// Error number reported by the worker pool
pub type Errno = i32;

/// Type-erased payload moved between the interpreter and a worker
pub type Payload = Box<dyn Any + Send>;

/// Identifier of a work item within one environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(pub(crate) u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work-{}", self.0)
    }
}

/// Platform description of an error number (`strerror`)
pub fn errno_message(errno: Errno) -> String {
    let mut buf = [0 as libc::c_char; 256];
    // SAFETY: buf is valid for writes of its full length and strerror_r
    // NUL-terminates the message when it returns 0.
    let rc = unsafe { libc::strerror_r(errno, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return format!("Unknown error {}", errno);
    }
    // SAFETY: see above, buf holds a NUL-terminated string.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/* ===================== Execute Job ===================== */

/// The part of a work item that travels to the worker thread
///
/// It owns the execute callback and the payload. Whatever happens on the
/// worker, the job comes back to the interpreter thread inside a `LoopEvent`.
pub struct ExecuteJob {
    execute: Box<dyn FnMut(&mut Payload) + Send>,
    payload: Payload,
}

impl ExecuteJob {
    pub fn new(execute: Box<dyn FnMut(&mut Payload) + Send>, payload: Payload) -> Self {
        Self { execute, payload }
    }

    /// Execute trampoline: run the execute callback on the payload
    pub fn run(&mut self) {
        (self.execute)(&mut self.payload);
    }

    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }
}

impl fmt::Debug for ExecuteJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteJob").finish_non_exhaustive()
    }
}

/* ===================== Loop Events ===================== */

/// Event posted from the worker pool to the interpreter thread
#[derive(Debug)]
pub enum LoopEvent {
    /// The execute phase returned; the completion trampoline should run
    Complete { id: WorkId, job: ExecuteJob },
    /// The request is closed and nothing else will report back for it; the
    /// close trampoline should free the item.
    Close { id: WorkId },
}

/// Sending half of the interpreter's event channel
#[derive(Debug, Clone)]
pub struct LoopSender {
    tx: mpsc::UnboundedSender<LoopEvent>,
}

impl LoopSender {
    pub fn send(&self, event: LoopEvent) {
        // The environment owns the receiver; once it is gone there is nobody
        // left to complete or free anything.
        if let Err(err) = self.tx.send(event) {
            trace!(event = ?err.0, "Event loop closed, dropping event");
        }
    }
}

/// Receiving half, owned by the environment
#[derive(Debug)]
pub struct LoopReceiver {
    rx: mpsc::UnboundedReceiver<LoopEvent>,
}

impl LoopReceiver {
    /// Block the interpreter thread until the next event arrives
    pub fn recv_blocking(&mut self) -> Option<LoopEvent> {
        self.rx.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<LoopEvent> {
        self.rx.try_recv().ok()
    }
}

pub fn event_channel() -> (LoopSender, LoopReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (LoopSender { tx }, LoopReceiver { rx })
}

/* ===================== Worker Request ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Idle = 0,
    Queued = 1,
    Running = 2,
    Dispatching = 3,
    Closing = 4,
}

impl RequestState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => RequestState::Idle,
            1 => RequestState::Queued,
            2 => RequestState::Running,
            3 => RequestState::Dispatching,
            _ => RequestState::Closing,
        }
    }
}

/// The pool's native handle for a work item
///
/// Cloning shares the same lifecycle state.
#[derive(Debug, Clone)]
pub struct WorkerRequest {
    id: WorkId,
    state: Arc<AtomicU8>,
}

impl WorkerRequest {
    pub fn new(id: WorkId) -> Self {
        Self {
            id,
            state: Arc::new(AtomicU8::new(RequestState::Idle as u8)),
        }
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// True while the pool or the event loop still has business with the request
    pub fn is_active(&self) -> bool {
        self.state() != RequestState::Idle
    }

    fn transition(&self, from: RequestState, to: RequestState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Idle -> Queued
    pub fn try_queue(&self) -> bool {
        self.transition(RequestState::Idle, RequestState::Queued)
    }

    /// Queued -> Running. Fails when the request was closed before a worker got to it.
    pub fn begin_execute(&self) -> bool {
        self.transition(RequestState::Queued, RequestState::Running)
    }

    /// Running -> Dispatching. Fails when the request was closed while executing.
    pub(crate) fn begin_dispatch(&self) -> bool {
        self.transition(RequestState::Running, RequestState::Dispatching)
    }

    /// Dispatching -> Idle. Fails when the completion closed its own request.
    pub(crate) fn finish_dispatch(&self) -> bool {
        self.transition(RequestState::Dispatching, RequestState::Idle)
    }

    /// Move to Closing and post whatever event the current state calls for.
    ///
    /// - Idle or Dispatching: nothing else will report back, post `Close` now
    /// - Queued: the worker that dequeues it skips execution and posts `Complete`
    /// - Running: the worker posts `Complete` once execution returns
    ///
    /// In the last two cases the completion trampoline sees the request
    /// closing and frees the item right after the completion callback.
    ///
    /// Closing twice fails with `EALREADY`.
    pub fn close(&self, events: &LoopSender) -> Result<(), Errno> {
        let previous = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                match RequestState::from_u8(raw) {
                    RequestState::Closing => None,
                    _ => Some(RequestState::Closing as u8),
                }
            })
            .map(RequestState::from_u8)
            .map_err(|_| libc::EALREADY)?;

        trace!(work_id = %self.id, ?previous, "Closing worker request");

        match previous {
            RequestState::Idle | RequestState::Dispatching => {
                events.send(LoopEvent::Close { id: self.id })
            }
            RequestState::Queued | RequestState::Running => {}
            RequestState::Closing => unreachable!("fetch_update rejects Closing"),
        }

        Ok(())
    }
}

/// Worker-side half of a request: execute unless closed, then report back.
///
/// A request closed before a worker got to it still posts `Complete`, so its
/// completion runs once before the item is freed.
pub fn run_request(request: &WorkerRequest, mut job: ExecuteJob, events: &LoopSender) {
    if request.begin_execute() {
        job.run();
    } else {
        trace!(work_id = %request.id(), "Request closed before execution, skipping execute");
    }

    events.send(LoopEvent::Complete {
        id: request.id(),
        job,
    });
}

/// Worker pool primitives consumed by the bridge
pub trait Scheduler {
    /// Queue `job` for execution on a worker thread.
    ///
    /// On rejection the job is handed back with the error number, so the
    /// caller keeps ownership of the work item.
    fn start(&self, request: &WorkerRequest, job: ExecuteJob) -> Result<(), (Errno, ExecuteJob)>;

    /// Close the request as soon as possible
    fn close(&self, request: &WorkerRequest) -> Result<(), Errno>;
}
