//! Sequential future-chaining combinators
//!
//! Every multi-step operation in the engine (block fetches, dirty flushes)
//! goes through these helpers instead of ad-hoc `await` chains, so ordering
//! between dependent steps is explicit.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A single sequenced step: receives the previous step's resolved value
/// (`None` for the first step) and produces the next one.
pub type Step<T, E> = Box<dyn FnOnce(Option<T>) -> BoxFuture<'static, std::result::Result<T, E>> + Send>;

/// Convenience constructor for a [`Step`] from an async closure.
pub fn step<T, E, F, Fut>(f: F) -> Step<T, E>
where
    F: FnOnce(Option<T>) -> Fut + Send + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
{
    Box::new(move |prev| Box::pin(f(prev)))
}

/// Runs steps strictly one after another, threading each step's resolved
/// value into the next. Stops and rejects on the first failure; resolves
/// with all step values.
pub async fn sequence<T, E>(steps: Vec<Step<T, E>>) -> std::result::Result<Vec<T>, E>
where
    T: Clone + Send,
    E: Send,
{
    let mut values = Vec::with_capacity(steps.len());
    let mut prev: Option<T> = None;
    for step in steps {
        let value = step(prev.take()).await?;
        prev = Some(value.clone());
        values.push(value);
    }
    Ok(values)
}

/// Same as [`sequence`], but resolves with only the final step's value.
/// Intermediate results are scaffolding, not the answer.
pub async fn sequence_last<T, E>(steps: Vec<Step<T, E>>) -> std::result::Result<Option<T>, E>
where
    T: Clone + Send,
    E: Send,
{
    Ok(sequence(steps).await?.pop())
}

/// Runs independent groups concurrently (each group is itself serial) and
/// resolves once all have settled. Individual group failures are logged and
/// swallowed; a failed group yields `None`.
pub async fn sequence_ignoring_errors<T, E>(
    groups: Vec<Vec<Step<T, E>>>,
) -> Vec<Option<Vec<T>>>
where
    T: Clone + Send,
    E: std::fmt::Display + Send,
{
    let runs = groups.into_iter().map(|group| async move {
        match sequence(group).await {
            Ok(values) => Some(values),
            Err(e) => {
                tracing::warn!("sequence group failed: {}", e);
                None
            }
        }
    });
    futures::future::join_all(runs).await
}

/// A serial work queue for fire-and-forget tasks.
///
/// Tasks run one at a time in submission order on a spawned worker. A task's
/// failure is logged and absorbed so the queue never stalls. Must be created
/// inside a tokio runtime.
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<BoxFuture<'static, anyhow::Result<()>>>,
    outstanding: Arc<AtomicUsize>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, anyhow::Result<()>>>();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let remaining = outstanding.clone();

        tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                if let Err(e) = task.await {
                    tracing::warn!("queued task failed: {:#}", e);
                }
                remaining.fetch_sub(1, Ordering::SeqCst);
            }
        });

        Self { tx, outstanding }
    }

    /// Enqueue a task. Returns immediately; the task runs after every
    /// previously enqueued task has settled.
    pub fn push<F>(&self, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Box::pin(task)).is_err() {
            // Worker is gone; the task will never run.
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Number of tasks accepted but not yet settled.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Waits until every previously enqueued task has settled.
    pub async fn drain(&self) {
        while self.outstanding() > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkQueue")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
