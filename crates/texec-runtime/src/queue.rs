use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send>;

/// Ordered task queue backing one logical stream. Tasks run FIFO on a
/// dedicated worker thread; synchronous callers block until the queue
/// drains. There is no cancellation: an enqueued task runs to completion
/// or the process dies with it.
pub struct TaskQueue {
    tx: Option<Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl TaskQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel::<Task>();
        let worker = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                while let Ok(task) = rx.recv() {
                    task();
                }
            })
            .expect("failed to spawn task queue worker");
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn enqueue(&self, task: impl FnOnce() + Send + 'static) {
        if let Some(tx) = &self.tx {
            // A send failure means the worker is gone, which only happens
            // during shutdown.
            let _ = tx.send(Box::new(task));
        }
    }

    /// Blocks the calling thread until every task enqueued so far has run.
    pub fn block_until_done(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        self.enqueue(move || {
            let _ = done_tx.send(());
        });
        let _ = done_rx.recv();
    }

    /// A handle other queues can use to wait for this queue to drain.
    pub fn drain_handle(&self) -> DrainHandle {
        DrainHandle {
            tx: self.tx.clone().expect("queue already shut down"),
        }
    }

    /// Establishes cross-queue ordering: tasks enqueued on `self` after
    /// this call run only once everything currently on `other` has
    /// finished.
    pub fn wait_for(&self, other: &TaskQueue) {
        let handle = other.drain_handle();
        self.enqueue(move || handle.wait());
    }
}

/// Cloneable drain barrier for one queue.
#[derive(Clone)]
pub struct DrainHandle {
    tx: Sender<Task>,
}

impl DrainHandle {
    pub fn wait(&self) {
        let (done_tx, done_rx) = mpsc::channel();
        let sent = self.tx.send(Box::new(move || {
            let _ = done_tx.send(());
        }));
        if sent.is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish its backlog and exit.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
