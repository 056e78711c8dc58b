//! Single-threaded work queue that owns the store.
//!
//! # Responsibility
//! - Run every job for one adapter, in submission order, on one thread.
//! - Hand results back through [`PendingOp`] handles.
//!
//! # Invariants
//! - At most one job touches the store at any time.
//! - A job whose handle was cancelled or dropped before it started is
//!   skipped; a running job is never interrupted.
//! - A panicking job does not stop the queue.

use super::Store;
use crate::error::{OrmError, OrmResult};
use log::{debug, error, warn};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// The store owned by the dispatcher thread; `None` while closed.
pub(crate) type StoreSlot = Option<Box<dyn Store>>;

type Job = Box<dyn FnOnce(&mut StoreSlot) + Send>;

pub(crate) struct Dispatcher {
    queue: mpsc::UnboundedSender<Job>,
}

impl Dispatcher {
    pub(crate) fn spawn(name: &str) -> OrmResult<Self> {
        let (queue, mut jobs) = mpsc::unbounded_channel::<Job>();
        let thread_name = name.to_string();
        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut slot: StoreSlot = None;
                while let Some(job) = jobs.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(|| job(&mut slot))).is_err() {
                        error!(
                            "event=dispatch module=db status=error thread={thread_name} error_code=job_panicked"
                        );
                    }
                }
                debug!("event=dispatch module=db status=ok thread={thread_name} stopped=true");
            })
            .map_err(|err| OrmError::Connection(format!("cannot start dispatcher: {err}")))?;
        Ok(Self { queue })
    }

    /// Queues `work` behind everything submitted before it.
    pub(crate) fn submit<T, F>(&self, work: F) -> PendingOp<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreSlot) -> OrmResult<T> + Send + 'static,
    {
        let (reply, receiver) = oneshot::channel();
        let job: Job = Box::new(move |slot| {
            if reply.is_closed() {
                debug!("event=dispatch module=db status=skipped reason=cancelled");
                return;
            }
            let _ = reply.send(work(slot));
        });
        if self.queue.send(job).is_err() {
            warn!("event=dispatch module=db status=error error_code=queue_closed");
        }
        PendingOp { receiver }
    }
}

/// Handle to queued work.
///
/// Await it from async code, or call [`PendingOp::wait`] from a plain
/// thread. Dropping the handle before the work starts cancels it.
#[must_use = "dropping a PendingOp cancels work that has not started yet"]
pub struct PendingOp<T> {
    receiver: oneshot::Receiver<OrmResult<T>>,
}

impl<T> PendingOp<T> {
    /// A handle that is already resolved, used for errors found before
    /// any work is queued.
    pub(crate) fn ready(result: OrmResult<T>) -> Self {
        let (reply, receiver) = oneshot::channel();
        let _ = reply.send(result);
        Self { receiver }
    }

    /// Blocks the calling thread until the work finishes.
    ///
    /// Must not be called from inside an async runtime worker; await the
    /// handle there instead.
    pub fn wait(self) -> OrmResult<T> {
        self.receiver
            .blocking_recv()
            .unwrap_or(Err(OrmError::Cancelled))
    }

    /// Cancels the work if it has not started yet.
    ///
    /// A result that was already produced stays retrievable.
    pub fn cancel(&mut self) {
        self.receiver.close();
    }

    /// Non-blocking check for a finished result.
    pub fn try_result(&mut self) -> Option<OrmResult<T>> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(OrmError::Cancelled)),
        }
    }
}

impl<T> Future for PendingOp<T> {
    type Output = OrmResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(OrmError::Cancelled)))
    }
}

#[cfg(test)]
mod tests {
    use super::{Dispatcher, PendingOp};
    use crate::error::OrmError;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn jobs_run_in_submission_order() {
        let dispatcher = Dispatcher::spawn("test-order").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<PendingOp<()>> = (0..20)
            .map(|n| {
                let seen = Arc::clone(&seen);
                dispatcher.submit(move |_| {
                    seen.lock().unwrap().push(n);
                    Ok(())
                })
            })
            .collect();
        for handle in handles {
            handle.wait().unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn cancelled_work_is_skipped() {
        let dispatcher = Dispatcher::spawn("test-cancel").unwrap();
        let (release, gate) = mpsc::channel::<()>();
        let blocker = dispatcher.submit(move |_| {
            gate.recv_timeout(Duration::from_secs(5)).ok();
            Ok(())
        });

        let ran = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran);
        let mut queued = dispatcher.submit(move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        });
        queued.cancel();
        release.send(()).unwrap();
        blocker.wait().unwrap();

        dispatcher.submit(|_| Ok(())).wait().unwrap();
        assert!(!*ran.lock().unwrap());
        assert_eq!(queued.wait(), Err(OrmError::Cancelled));
    }

    #[test]
    fn a_panicking_job_does_not_stop_the_queue() {
        let dispatcher = Dispatcher::spawn("test-panic").unwrap();
        let failed: PendingOp<()> = dispatcher.submit(|_| panic!("boom"));
        assert_eq!(failed.wait(), Err(OrmError::Cancelled));
        assert_eq!(dispatcher.submit(|_| Ok(7)).wait(), Ok(7));
    }
}
