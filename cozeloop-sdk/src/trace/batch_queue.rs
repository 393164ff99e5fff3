//! # Batch Queue
//!
//! A buffer that groups items by count or by time before handing them to an
//! async callback.
//!
//! - [`BatchQueue::enqueue`] appends an item. The first item of a batch arms
//!   a timer of `schedule_delay`; reaching `batch_size` drains immediately,
//!   inside `enqueue`, and disarms the timer.
//! - When the timer fires it drains whatever accumulated, even one item.
//! - [`BatchQueue::flush`] drains now and returns the callback's result.
//! - [`BatchQueue::destroy`] disarms the timer and flushes. Calling it again
//!   flushes an empty buffer, which never invokes the callback.
//!
//! The callback is invoked synchronously with the drained batch; the future
//! it returns runs on a single worker task. Futures run one at a time in
//! drain order, so batches are never reordered. Failures of size or timer
//! drains are logged and do not affect later batches; failures of explicit
//! flushes are returned to the caller.
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use cozeloop::{loop_debug, loop_warn};
use futures_util::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::LoopSdkError;

/// The drain callback of a [`BatchQueue`].
pub type BatchCallback<T, E> =
    Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<(), E>> + Send + Sync>;

struct Job<E> {
    future: Option<BoxFuture<'static, Result<(), E>>>,
    reply: Option<oneshot::Sender<Result<(), E>>>,
}

struct State<T> {
    items: Vec<T>,
    timer: Option<(u64, JoinHandle<()>)>,
    next_timer_id: u64,
}

impl<T> State<T> {
    fn cancel_timer(&mut self) {
        if let Some((_, timer)) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner<T, E> {
    name: &'static str,
    state: Mutex<State<T>>,
    batch_size: usize,
    schedule_delay: Duration,
    callback: BatchCallback<T, E>,
    handle: Handle,
    jobs: mpsc::UnboundedSender<Job<E>>,
}

impl<T, E> Inner<T, E> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the callback on `batch` and queues its future behind earlier ones.
    fn dispatch(&self, batch: Vec<T>, reply: Option<oneshot::Sender<Result<(), E>>>) {
        let future = if batch.is_empty() {
            None
        } else {
            Some((self.callback)(batch))
        };
        if self.jobs.send(Job { future, reply }).is_err() {
            loop_debug!(name: "BatchQueue.WorkerStopped", queue = self.name);
        }
    }

    fn drain_on_timer(&self, timer_id: u64) {
        let batch = {
            let mut state = self.lock();
            match &state.timer {
                Some((id, _)) if *id == timer_id => {
                    state.timer = None;
                    std::mem::take(&mut state.items)
                }
                // disarmed by a size drain or a flush while we were waking up
                _ => return,
            }
        };
        if !batch.is_empty() {
            self.dispatch(batch, None);
        }
    }
}

impl<T, E> Drop for Inner<T, E> {
    fn drop(&mut self) {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel_timer();
    }
}

/// Groups items into batches by count or time.
///
/// Cloning a `BatchQueue` shares the buffer.
pub struct BatchQueue<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for BatchQueue<T, E> {
    fn clone(&self) -> Self {
        BatchQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> fmt::Debug for BatchQueue<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchQueue")
            .field("name", &self.inner.name)
            .field("batch_size", &self.inner.batch_size)
            .field("schedule_delay", &self.inner.schedule_delay)
            .finish()
    }
}

impl<T, E> BatchQueue<T, E>
where
    T: Send + 'static,
    E: Display + Send + 'static,
{
    /// Creates a queue draining into `callback`.
    ///
    /// Must be called from within a Tokio runtime; the worker task and the
    /// timers run on that runtime. A `batch_size` of zero is treated as one.
    pub fn new<F>(
        name: &'static str,
        batch_size: usize,
        schedule_delay: Duration,
        callback: F,
    ) -> Result<Self, LoopSdkError>
    where
        F: Fn(Vec<T>) -> BoxFuture<'static, Result<(), E>> + Send + Sync + 'static,
    {
        let handle = Handle::try_current()?;
        let (jobs, receiver) = mpsc::unbounded_channel();
        handle.spawn(run_worker(receiver, name));

        Ok(BatchQueue {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(State {
                    items: Vec::new(),
                    timer: None,
                    next_timer_id: 0,
                }),
                batch_size: batch_size.max(1),
                schedule_delay,
                callback: Arc::new(callback),
                handle,
                jobs,
            }),
        })
    }

    /// Appends `item`, draining immediately when the batch is full.
    pub fn enqueue(&self, item: T) {
        let mut state = self.inner.lock();
        state.items.push(item);

        if state.items.len() >= self.inner.batch_size {
            state.cancel_timer();
            let batch = std::mem::take(&mut state.items);
            drop(state);
            self.inner.dispatch(batch, None);
            return;
        }

        if state.timer.is_none() {
            let timer_id = state.next_timer_id;
            state.next_timer_id += 1;
            let timer = self.spawn_timer(timer_id);
            state.timer = Some((timer_id, timer));
        }
    }

    fn spawn_timer(&self, timer_id: u64) -> JoinHandle<()> {
        let weak: Weak<Inner<T, E>> = Arc::downgrade(&self.inner);
        let sleep = {
            let _guard = self.inner.handle.enter();
            tokio::time::sleep(self.inner.schedule_delay)
        };
        self.inner.handle.spawn(async move {
            sleep.await;
            if let Some(inner) = weak.upgrade() {
                inner.drain_on_timer(timer_id);
            }
        })
    }

    /// Number of buffered items.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains the buffer now and waits for the callback to finish.
    ///
    /// Also waits for batches drained earlier. An empty buffer does not
    /// invoke the callback.
    pub async fn flush(&self) -> Result<(), E> {
        let batch = {
            let mut state = self.inner.lock();
            state.cancel_timer();
            std::mem::take(&mut state.items)
        };

        let (reply, result) = oneshot::channel();
        self.inner.dispatch(batch, Some(reply));
        match result.await {
            Ok(result) => result,
            Err(_) => {
                loop_warn!(name: "BatchQueue.FlushAbandoned", queue = self.inner.name);
                Ok(())
            }
        }
    }

    /// Disarms the timer and flushes. Safe to call repeatedly.
    pub async fn destroy(&self) -> Result<(), E> {
        self.inner.lock().cancel_timer();
        self.flush().await
    }
}

async fn run_worker<E: Display>(mut jobs: mpsc::UnboundedReceiver<Job<E>>, name: &'static str) {
    while let Some(job) = jobs.recv().await {
        let result = match job.future {
            Some(future) => future.await,
            None => Ok(()),
        };
        match job.reply {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => {
                if let Err(err) = result {
                    loop_warn!(name: "BatchQueue.DrainFailed", queue = name, reason = format!("{err}"));
                }
            }
        }
    }
}
