//! Completion and close trampolines
//!
//! Both run on the interpreter thread, driven by `Env::run`.

use tracing::{debug, trace, warn};

use crate::engine::Engine;
use crate::env::Env;
use crate::scheduler::{ExecuteJob, WorkId};
use crate::status::Status;

impl<E: Engine> Env<E> {
    /// Completion trampoline
    ///
    /// Invokes the user completion inside a handle scope, routes any
    /// exception it left behind to the fatal-error handler, then drains the
    /// deferred-callback queue. Cancelled work goes through the same steps,
    /// with whatever the payload holds at that point, and is freed right
    /// after the drain.
    pub(crate) fn on_work_complete(&mut self, id: WorkId, mut job: ExecuteJob) {
        let Some(item) = self.work.get_mut(&id) else {
            warn!(work_id = %id, "Completion for unknown work item");
            return;
        };

        let closing = !item.request.begin_dispatch();

        let Some(mut complete) = item.complete.take() else {
            warn!(work_id = %id, "Completion already running, dropping event");
            return;
        };

        if closing {
            trace!(work_id = %id, "Completing cancelled work item");
        }

        let scope = self.engine.open_handle_scope();
        // May delete the very item being completed
        complete(self, Status::Ok, job.payload_mut());
        self.engine.close_handle_scope(scope);

        self.report_completion_exception();

        if closing {
            self.engine.run_next_tick();
            self.on_work_close(id, Some(job));
            return;
        }

        // Hand the callbacks back through a fresh lookup; a close hook
        // queued by the completion frees them together with the item.
        if let Some(item) = self.work.get_mut(&id) {
            item.complete = Some(complete);
            item.job = Some(job);
            if item.request.finish_dispatch() {
                debug!(work_id = %id, "Work item completed");
            }
        }

        self.engine.run_next_tick();
    }

    /// Exceptions left by a completion callback have no caller to propagate
    /// to: catchable first, fatal as fallback, both go to the fatal handler.
    fn report_completion_exception(&mut self) {
        if !self.exceptions.is_pending() {
            return;
        }

        let exception = match self.exceptions.take() {
            Some(exception) => Some(exception),
            None => self.exceptions.take_fatal(),
        };

        if let Some(exception) = exception {
            warn!(?exception, "Completion callback left an exception pending");
            let error = self.engine.value_from_error(&exception, false);
            self.engine.on_fatal_error(error, None);
            self.engine.release_value(exception);
        }
    }

    /// Close trampoline: the single point where a work item is freed
    pub(crate) fn on_work_close(&mut self, id: WorkId, job: Option<ExecuteJob>) {
        match self.work.remove(&id) {
            Some(item) => {
                drop(job);
                drop(item);
                debug!(work_id = %id, "Work item freed");
            }
            None => warn!(work_id = %id, "Close for unknown work item"),
        }
    }
}
