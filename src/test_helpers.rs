//! Test helpers
//!
//! `ManualScheduler` is a worker pool double: requests are queued in memory
//! and run one at a time when the test asks, each on a fresh thread, so tests
//! control exactly where cancellation lands.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::thread;

use crate::config::PoolConfig;
use crate::engine::BasicEngine;
use crate::env::Env;
use crate::scheduler::{run_request, Errno, ExecuteJob, LoopSender, Scheduler, WorkerRequest};

#[derive(Default)]
struct ManualState {
    queue: RefCell<VecDeque<(WorkerRequest, ExecuteJob)>>,
    reject_with: Cell<Option<Errno>>,
    starts: Cell<usize>,
}

/// Handle shared between the test and the environment
#[derive(Clone)]
pub struct ManualScheduler {
    events: LoopSender,
    state: Rc<ManualState>,
}

impl ManualScheduler {
    pub fn new(events: LoopSender) -> Self {
        Self {
            events,
            state: Rc::new(ManualState::default()),
        }
    }

    /// Make every following `start` fail with `errno`
    pub fn reject_with(&self, errno: Errno) {
        self.state.reject_with.set(Some(errno));
    }

    /// Number of accepted starts
    pub fn starts(&self) -> usize {
        self.state.starts.get()
    }

    /// Run the oldest queued request on a separate thread and wait for it
    pub fn run_next(&self) -> bool {
        let Some((request, job)) = self.state.queue.borrow_mut().pop_front() else {
            return false;
        };
        let events = self.events.clone();
        thread::spawn(move || run_request(&request, job, &events))
            .join()
            .expect("worker thread panicked");
        true
    }

    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for ManualScheduler {
    fn start(&self, request: &WorkerRequest, job: ExecuteJob) -> Result<(), (Errno, ExecuteJob)> {
        if let Some(errno) = self.state.reject_with.get() {
            return Err((errno, job));
        }
        if !request.try_queue() {
            return Err((libc::EBUSY, job));
        }
        self.state.starts.set(self.state.starts.get() + 1);
        self.state
            .queue
            .borrow_mut()
            .push_back((request.clone(), job));
        Ok(())
    }

    fn close(&self, request: &WorkerRequest) -> Result<(), Errno> {
        request.close(&self.events)
    }
}

/// Environment over a `ManualScheduler`
pub fn manual_env() -> (Env<BasicEngine>, ManualScheduler) {
    let mut scheduler = None;
    let env = Env::with_scheduler(BasicEngine::new(), |events| {
        let manual = ManualScheduler::new(events);
        scheduler = Some(manual.clone());
        manual
    });
    (env, scheduler.expect("factory is called"))
}

/// Environment over a real `ThreadPool`
pub fn pool_env(worker_threads: usize) -> Env<BasicEngine> {
    let config = PoolConfig {
        worker_threads,
        max_pending: 64,
        thread_name: "relay-test-worker".to_string(),
    };
    Env::new(BasicEngine::new(), &config).expect("thread pool starts")
}
