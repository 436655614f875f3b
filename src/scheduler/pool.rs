//! Blocking worker pool
//!
//! Execute callbacks are blocking by contract, so they run on tokio's
//! blocking thread pool. The pool owns its own runtime; the interpreter
//! thread never enters it.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tracing::{debug, trace};

use super::{run_request, Errno, ExecuteJob, LoopSender, Scheduler, WorkerRequest};
use crate::config::PoolConfig;

pub struct ThreadPool {
    runtime: Runtime,
    events: LoopSender,
    max_pending: usize,
    pending: Arc<AtomicUsize>,
    shutdown: AtomicBool,
}

impl ThreadPool {
    pub fn new(config: &PoolConfig, events: LoopSender) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(config.worker_threads)
            .thread_name(config.thread_name.clone())
            .build()?;

        debug!(
            worker_threads = config.worker_threads,
            max_pending = config.max_pending,
            "Worker pool started"
        );

        Ok(Self {
            runtime,
            events,
            max_pending: config.max_pending,
            pending: Arc::new(AtomicUsize::new(0)),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Requests accepted but not yet finished on a worker
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Stop accepting new requests. Requests already started still report back.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Scheduler for ThreadPool {
    fn start(&self, request: &WorkerRequest, job: ExecuteJob) -> Result<(), (Errno, ExecuteJob)> {
        if self.is_shutdown() {
            return Err((libc::ESHUTDOWN, job));
        }

        if self.pending.fetch_add(1, Ordering::AcqRel) >= self.max_pending {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err((libc::EAGAIN, job));
        }

        if !request.try_queue() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err((libc::EBUSY, job));
        }

        trace!(work_id = %request.id(), "Queueing request");

        let request = request.clone();
        let events = self.events.clone();
        let pending = Arc::clone(&self.pending);
        self.runtime.spawn_blocking(move || {
            run_request(&request, job, &events);
            pending.fetch_sub(1, Ordering::AcqRel);
        });

        Ok(())
    }

    fn close(&self, request: &WorkerRequest) -> Result<(), Errno> {
        request.close(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{event_channel, LoopEvent, RequestState, WorkId};
    use std::sync::mpsc;

    fn config(worker_threads: usize, max_pending: usize) -> PoolConfig {
        PoolConfig {
            worker_threads,
            max_pending,
            thread_name: "relay-test-worker".to_string(),
        }
    }

    fn noop_job() -> ExecuteJob {
        ExecuteJob::new(Box::new(|_| {}), Box::new(()))
    }

    #[test]
    fn test_job_runs_on_worker_thread() {
        let (events, mut rx) = event_channel();
        let pool = ThreadPool::new(&config(2, 8), events).unwrap();
        let request = WorkerRequest::new(WorkId(1));

        let job = ExecuteJob::new(
            Box::new(|payload| {
                if let Some(name) = payload.downcast_mut::<Option<String>>() {
                    *name = std::thread::current().name().map(str::to_string);
                }
            }),
            Box::new(None::<String>),
        );
        pool.start(&request, job).unwrap();

        let Some(LoopEvent::Complete { id, mut job }) = rx.recv_blocking() else {
            unreachable!("Expected completion event");
        };
        assert_eq!(id, WorkId(1));
        let name = job.payload_mut().downcast_mut::<Option<String>>().unwrap();
        assert_eq!(name.as_deref(), Some("relay-test-worker"));
        assert_eq!(request.state(), RequestState::Running);
    }

    #[test]
    fn test_rejects_when_exhausted() {
        let (events, _rx) = event_channel();
        let pool = ThreadPool::new(&config(1, 1), events).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let blocking = ExecuteJob::new(
            Box::new(move |_| {
                let _ = release_rx.recv();
            }),
            Box::new(()),
        );
        pool.start(&WorkerRequest::new(WorkId(1)), blocking).unwrap();

        let second = WorkerRequest::new(WorkId(2));
        let (errno, _job) = pool.start(&second, noop_job()).unwrap_err();
        assert_eq!(errno, libc::EAGAIN);
        // A rejected request is left untouched
        assert_eq!(second.state(), RequestState::Idle);

        release_tx.send(()).unwrap();
    }

    #[test]
    fn test_rejects_after_shutdown() {
        let (events, _rx) = event_channel();
        let pool = ThreadPool::new(&config(1, 4), events).unwrap();

        pool.shutdown();

        let (errno, _job) = pool
            .start(&WorkerRequest::new(WorkId(1)), noop_job())
            .unwrap_err();
        assert_eq!(errno, libc::ESHUTDOWN);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_rejects_request_already_queued() {
        let (events, _rx) = event_channel();
        let pool = ThreadPool::new(&config(1, 4), events).unwrap();
        let request = WorkerRequest::new(WorkId(1));
        assert!(request.try_queue());

        let (errno, _job) = pool.start(&request, noop_job()).unwrap_err();
        assert_eq!(errno, libc::EBUSY);
        assert_eq!(pool.pending(), 0);
    }
}
