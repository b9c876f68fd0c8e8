//! Bounded concurrent task runner.
//!
//! Machine operations are queued on a [`Runner`], which drains them
//! through a fixed number of workers. Each operation yields exactly one
//! [`TaskResult`], whether it succeeds, fails, or panics, so a batch of
//! K queued operations always produces K results.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

/// Boxed future returned by [`Task::run`].
pub type TaskFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send>>;

/// A unit of work the runner can schedule.
///
/// Implementations consume themselves when run so that each queued
/// operation executes at most once.
pub trait Task: Send + 'static {
    /// Value produced on success.
    type Output: Send + 'static;
    /// Error produced on failure.
    type Error: Send + 'static;

    /// Human-readable label used in results and log lines.
    fn label(&self) -> String;

    /// Execute the task.
    fn run(self) -> TaskFuture<Self::Output, Self::Error>;
}

/// Why a task did not produce its output.
#[derive(Debug)]
pub enum TaskFailure<E> {
    /// The task ran to completion and returned an error.
    Failed(E),
    /// The task aborted before completing, for example by panicking.
    Aborted {
        /// Description of the abort.
        message: String,
    },
}

/// Outcome of one queued task.
#[derive(Debug)]
pub struct TaskResult<T, E> {
    /// Label the task reported before it ran.
    pub label: String,
    /// Success value or failure cause.
    pub outcome: Result<T, TaskFailure<E>>,
}

/// Errors raised by the runner itself.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// [`Runner::drain`] was called again without [`Runner::reset`].
    #[error("runner already drained; call reset before queueing again")]
    AlreadyDrained,
}

/// Upper bound on automatically chosen worker width.
const MAX_AUTO_WIDTH: usize = 4;

/// Queues tasks and drains them with bounded concurrency.
///
/// The width defaults to `min(4, queued)` when not set explicitly.
pub struct Runner<T: Task> {
    queue: VecDeque<T>,
    width: Option<usize>,
    drained: bool,
}

impl<T: Task> Default for Runner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> Runner<T> {
    /// Create an empty runner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            width: None,
            drained: false,
        }
    }

    /// Add a task to the pending queue.
    pub fn queue_op(&mut self, task: T) {
        self.queue.push_back(task);
    }

    /// Number of tasks currently queued.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Pin the worker width instead of auto-sizing from the queue.
    ///
    /// A width of zero is treated as one.
    pub fn set_width(&mut self, width: usize) {
        self.width = Some(width.max(1));
    }

    /// Allow the runner to be drained again after a previous drain.
    pub const fn reset(&mut self) {
        self.drained = false;
    }

    /// Start the queued tasks and return a stream of their results.
    ///
    /// Results arrive in completion order, not queue order. The runner
    /// must be [`reset`](Self::reset) before it can be drained again.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::AlreadyDrained`] when called twice
    /// without an intervening reset.
    pub fn drain(&mut self) -> Result<ResultStream<T::Output, T::Error>, RunnerError> {
        if self.drained {
            return Err(RunnerError::AlreadyDrained);
        }
        self.drained = true;

        let count = self.queue.len();
        let width = self.width.unwrap_or_else(|| count.min(MAX_AUTO_WIDTH)).max(1);
        let shared: Arc<Mutex<VecDeque<T>>> =
            Arc::new(Mutex::new(std::mem::take(&mut self.queue)));
        let (tx, rx) = mpsc::channel(count.max(1));

        for _ in 0..width {
            let worker_queue = Arc::clone(&shared);
            let worker_tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut queue =
                            worker_queue.lock().unwrap_or_else(PoisonError::into_inner);
                        queue.pop_front()
                    };
                    let Some(task) = next else {
                        break;
                    };
                    let label = task.label();
                    // Run inside its own spawn so a panic surfaces as a
                    // JoinError instead of killing the worker.
                    let outcome = match tokio::spawn(task.run()).await {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(err)) => Err(TaskFailure::Failed(err)),
                        Err(join_err) => Err(TaskFailure::Aborted {
                            message: join_err.to_string(),
                        }),
                    };
                    if worker_tx.send(TaskResult { label, outcome }).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        Ok(ResultStream { expected: count, rx })
    }
}

/// Stream of [`TaskResult`]s from a drained runner.
pub struct ResultStream<T, E> {
    expected: usize,
    rx: mpsc::Receiver<TaskResult<T, E>>,
}

impl<T, E> ResultStream<T, E> {
    /// Number of results this stream will yield in total.
    #[must_use]
    pub const fn expected(&self) -> usize {
        self.expected
    }

    /// Wait for the next result, or `None` once all tasks reported.
    pub async fn next(&mut self) -> Option<TaskResult<T, E>> {
        self.rx.recv().await
    }

    /// Collect every remaining result.
    pub async fn collect(mut self) -> Vec<TaskResult<T, E>> {
        let mut results = Vec::with_capacity(self.expected);
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    struct StubTask {
        name: String,
        behaviour: Behaviour,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    enum Behaviour {
        Succeed(u32),
        Fail(String),
        Panic,
    }

    impl StubTask {
        fn new(name: &str, behaviour: Behaviour) -> Self {
            Self {
                name: name.to_owned(),
                behaviour,
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn tracked(name: &str, running: &Arc<AtomicUsize>, peak: &Arc<AtomicUsize>) -> Self {
            Self {
                name: name.to_owned(),
                behaviour: Behaviour::Succeed(0),
                running: Arc::clone(running),
                peak: Arc::clone(peak),
            }
        }
    }

    impl Task for StubTask {
        type Output = u32;
        type Error = String;

        fn label(&self) -> String {
            self.name.clone()
        }

        fn run(self) -> TaskFuture<Self::Output, Self::Error> {
            Box::pin(async move {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                match self.behaviour {
                    Behaviour::Succeed(value) => Ok(value),
                    Behaviour::Fail(message) => Err(message),
                    Behaviour::Panic => panic!("task exploded"),
                }
            })
        }
    }

    #[tokio::test]
    async fn yields_one_result_per_task() {
        let mut runner = Runner::new();
        runner.queue_op(StubTask::new("a", Behaviour::Succeed(1)));
        runner.queue_op(StubTask::new("b", Behaviour::Fail("boom".into())));
        runner.queue_op(StubTask::new("c", Behaviour::Succeed(3)));

        let stream = runner
            .drain()
            .unwrap_or_else(|err| panic!("drain failed: {err}"));
        assert_eq!(stream.expected(), 3);
        let results = stream.collect().await;
        assert_eq!(results.len(), 3);

        let failed = results
            .iter()
            .filter(|result| result.outcome.is_err())
            .count();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn panic_is_isolated_to_its_task() {
        let mut runner = Runner::new();
        runner.queue_op(StubTask::new("ok", Behaviour::Succeed(7)));
        runner.queue_op(StubTask::new("bad", Behaviour::Panic));

        let results = runner
            .drain()
            .unwrap_or_else(|err| panic!("drain failed: {err}"))
            .collect()
            .await;
        assert_eq!(results.len(), 2);

        let aborted = results
            .iter()
            .find(|result| result.label == "bad")
            .unwrap_or_else(|| panic!("missing result for bad"));
        assert!(matches!(
            aborted.outcome,
            Err(TaskFailure::Aborted { .. })
        ));
        let survived = results
            .iter()
            .find(|result| result.label == "ok")
            .unwrap_or_else(|| panic!("missing result for ok"));
        assert!(matches!(survived.outcome, Ok(7)));
    }

    #[tokio::test]
    async fn width_bounds_concurrency() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut runner = Runner::new();
        for index in 0..6 {
            runner.queue_op(StubTask::tracked(
                &format!("t{index}"),
                &running,
                &peak,
            ));
        }
        runner.set_width(2);

        let results = runner
            .drain()
            .unwrap_or_else(|err| panic!("drain failed: {err}"))
            .collect()
            .await;
        assert_eq!(results.len(), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn drain_twice_requires_reset() {
        let mut runner = Runner::new();
        runner.queue_op(StubTask::new("only", Behaviour::Succeed(1)));
        let results = runner
            .drain()
            .unwrap_or_else(|err| panic!("drain failed: {err}"))
            .collect()
            .await;
        assert_eq!(results.len(), 1);

        assert!(matches!(runner.drain(), Err(RunnerError::AlreadyDrained)));

        runner.reset();
        runner.queue_op(StubTask::new("again", Behaviour::Succeed(2)));
        let second = runner
            .drain()
            .unwrap_or_else(|err| panic!("second drain failed: {err}"))
            .collect()
            .await;
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn empty_runner_drains_immediately() {
        let mut runner: Runner<StubTask> = Runner::new();
        let results = runner
            .drain()
            .unwrap_or_else(|err| panic!("drain failed: {err}"))
            .collect()
            .await;
        assert!(results.is_empty());
    }
}
