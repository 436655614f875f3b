//! Work items: deferred execution on the worker pool
//!
//! A work item pairs an execute callback (runs on a worker thread, sees only
//! the payload) with a completion callback (runs on the interpreter thread,
//! sees the environment). Lifecycle:
//!
//! 1. `create_async_work` allocates the item in the environment's registry
//! 2. `queue_async_work` hands the execute phase to the pool
//! 3. the completion trampoline runs the completion callback
//! 4. `cancel_async_work` / `delete_async_work` close the item; the close
//!    trampoline is the only place it is freed
//!
//! An item whose completion ran and which was not closed is idle again and
//! can be queued once more.

mod dispatch;

use tracing::debug;

use crate::engine::Engine;
use crate::env::Env;
use crate::scheduler::{ExecuteJob, Payload, RequestState, WorkId, WorkerRequest};
use crate::status::{BridgeError, Result, Status};

/// Execute callback: runs on a worker thread with the payload only
pub type ExecuteCallback<D> = Box<dyn FnMut(&mut D) + Send>;

/// Completion callback: runs on the interpreter thread
pub type CompleteCallback<E, D> = Box<dyn FnMut(&mut Env<E>, Status, &mut D)>;

pub(crate) type ErasedComplete<E> = Box<dyn FnMut(&mut Env<E>, Status, &mut Payload)>;

/// Opaque, copyable handle to a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncWork {
    id: WorkId,
}

impl AsyncWork {
    pub fn id(&self) -> WorkId {
        self.id
    }
}

pub(crate) struct WorkItem<E: Engine> {
    pub(crate) resource: Option<E::Value>,
    pub(crate) resource_name: Option<E::Value>,
    pub(crate) request: WorkerRequest,
    /// Execute callback and payload; `None` while a worker or a pending event holds them
    pub(crate) job: Option<ExecuteJob>,
    /// `None` while the completion callback is running
    pub(crate) complete: Option<ErasedComplete<E>>,
}

impl<E: Engine> WorkItem<E> {
    pub(crate) fn is_active(&self) -> bool {
        self.request.is_active()
    }
}

impl<E: Engine> Env<E> {
    /// Allocate a work item.
    ///
    /// Both callbacks are required; a missing one fails with `InvalidArg`
    /// before anything is allocated.
    pub fn create_async_work<D>(
        &mut self,
        resource: Option<E::Value>,
        resource_name: Option<E::Value>,
        execute: Option<ExecuteCallback<D>>,
        complete: Option<CompleteCallback<E, D>>,
        data: D,
    ) -> Result<AsyncWork>
    where
        D: Send + 'static,
        E: 'static,
    {
        let result = match (execute, complete) {
            (None, _) => Err(BridgeError::InvalidArg("execute callback is required")),
            (_, None) => Err(BridgeError::InvalidArg("complete callback is required")),
            (Some(execute), Some(complete)) => Ok(self.insert_work(
                resource,
                resource_name,
                erase_execute(execute),
                erase_complete(complete),
                Box::new(data),
            )),
        };
        self.record(result)
    }

    fn insert_work(
        &mut self,
        resource: Option<E::Value>,
        resource_name: Option<E::Value>,
        execute: Box<dyn FnMut(&mut Payload) + Send>,
        complete: ErasedComplete<E>,
        payload: Payload,
    ) -> AsyncWork {
        self.next_work_id += 1;
        let id = WorkId(self.next_work_id);

        self.work.insert(
            id,
            WorkItem {
                resource,
                resource_name,
                request: WorkerRequest::new(id),
                job: Some(ExecuteJob::new(execute, payload)),
                complete: Some(complete),
            },
        );

        debug!(work_id = %id, "Work item created");
        AsyncWork { id }
    }

    /// Hand the work item to the worker pool.
    ///
    /// On failure the item is unchanged and still owned by the caller.
    pub fn queue_async_work(&mut self, work: AsyncWork) -> Result<()> {
        let result = self.start_work(work);
        self.record(result)
    }

    fn start_work(&mut self, work: AsyncWork) -> Result<()> {
        let item = self
            .work
            .get_mut(&work.id)
            .ok_or_else(|| BridgeError::from_errno(libc::EINVAL))?;

        let Some(job) = item.job.take() else {
            return Err(BridgeError::from_errno(libc::EBUSY));
        };

        match self.scheduler.start(&item.request, job) {
            Ok(()) => {
                debug!(work_id = %work.id, "Work item queued");
                Ok(())
            }
            Err((errno, job)) => {
                item.job = Some(job);
                debug!(work_id = %work.id, errno, "Worker pool rejected work item");
                Err(BridgeError::from_errno(errno))
            }
        }
    }

    /// Close the work item as soon as possible.
    ///
    /// Queued work that has not started never executes. Work already
    /// running is not interrupted. A scheduled item still gets its completion
    /// once, with `Status::Ok`; an item that is not scheduled goes straight
    /// to close. Either way the close trampoline eventually frees the item.
    pub fn cancel_async_work(&mut self, work: AsyncWork) -> Result<()> {
        let result = self.close_work(work);
        self.record(result)
    }

    /// Same as `cancel_async_work`: the pool must release the item first
    pub fn delete_async_work(&mut self, work: AsyncWork) -> Result<()> {
        self.cancel_async_work(work)
    }

    fn close_work(&mut self, work: AsyncWork) -> Result<()> {
        let item = self
            .work
            .get(&work.id)
            .ok_or_else(|| BridgeError::from_errno(libc::EINVAL))?;

        self.scheduler
            .close(&item.request)
            .map_err(BridgeError::from_errno)?;

        debug!(work_id = %work.id, "Work item closing");
        Ok(())
    }

    /// Lifecycle state of a live work item
    pub fn work_state(&self, work: AsyncWork) -> Option<RequestState> {
        self.work.get(&work.id).map(|item| item.request.state())
    }

    /// Resource identity values given at creation
    pub fn work_resource(&self, work: AsyncWork) -> Option<(Option<&E::Value>, Option<&E::Value>)> {
        self.work
            .get(&work.id)
            .map(|item| (item.resource.as_ref(), item.resource_name.as_ref()))
    }
}

fn erase_execute<D>(mut execute: ExecuteCallback<D>) -> Box<dyn FnMut(&mut Payload) + Send>
where
    D: Send + 'static,
{
    Box::new(move |payload: &mut Payload| {
        if let Some(data) = payload.downcast_mut::<D>() {
            execute(data);
        }
    })
}

fn erase_complete<E, D>(mut complete: CompleteCallback<E, D>) -> ErasedComplete<E>
where
    E: Engine + 'static,
    D: Send + 'static,
{
    Box::new(move |env: &mut Env<E>, status: Status, payload: &mut Payload| {
        if let Some(data) = payload.downcast_mut::<D>() {
            complete(env, status, data);
        }
    })
}
