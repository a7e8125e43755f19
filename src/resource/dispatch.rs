//! Serial execution of user callbacks.
//!
//! Every handler a resource invokes runs on one dedicated thread, in the
//! order the I/O side posted it. Handlers may therefore call back into the
//! resource (send, close) without deadlocking the I/O context, and never run
//! concurrently with each other.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::mpsc;
use tracing::{error, trace};

type Job = Box<dyn FnOnce() + Send>;

enum Task {
    Run(Job),
    Stop,
}

/// Cloneable handle for posting callbacks.
#[derive(Clone)]
pub(crate) struct DispatchQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl DispatchQueue {
    /// Queue `job`. Jobs posted after the dispatcher stopped are dropped.
    pub(crate) fn post(&self, job: impl FnOnce() + Send + 'static) {
        if self.tx.send(Task::Run(Box::new(job))).is_err() {
            trace!("dispatcher stopped, dropping callback");
        }
    }
}

/// Owner of the callback thread.
pub(crate) struct Dispatcher {
    queue: DispatchQueue,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl Dispatcher {
    /// Start the callback thread.
    ///
    /// # Errors
    ///
    /// Failure to spawn the thread.
    pub(crate) fn spawn(name: &str) -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Task>();
        let thread = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                while let Some(Task::Run(job)) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("resource callback panicked");
                    }
                }
            })?;
        Ok(Self {
            queue: DispatchQueue { tx },
            thread_id: thread.thread().id(),
            thread: Some(thread),
        })
    }

    pub(crate) fn queue(&self) -> DispatchQueue {
        self.queue.clone()
    }

    /// Run everything already posted, then stop. Called from inside a
    /// callback the thread cannot wait for itself, so it only stops after
    /// the current callback returns.
    pub(crate) fn shutdown(&mut self) {
        let _ = self.queue.tx.send(Task::Stop);
        if let Some(thread) = self.thread.take() {
            if thread::current().id() == self.thread_id {
                return;
            }
            if thread.join().is_err() {
                error!("dispatcher thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
