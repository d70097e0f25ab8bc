//! # Request Queue
//!
//! Ordered, single-flight queue in front of a [`FetchSource`].
//!
//! Jobs are handed to one worker task over a channel and answered over a
//! oneshot, so at most one operation is ever in flight and jobs complete in
//! submission order. A throttled job stays at the head: the worker waits one
//! tick on the injected [`Clock`] and retries it. The worker idles (no ticks)
//! while the queue is empty.
//!
//! Each attempt runs on its own task; a source that panics fails that job
//! with [`FetchError::Other`] and the worker moves on to the next one.

use crate::config::QueueConfig;
use crate::source::{FetchError, FetchSource, Operation};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// Time source for the retry tick.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock ticks via `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Callback receiving the queue depth whenever it changes.
pub type DepthObserver = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct DepthGauge {
    depth: AtomicUsize,
    observer: Mutex<Option<DepthObserver>>,
}

impl DepthGauge {
    fn increment(&self) {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        self.notify(depth);
    }

    fn decrement(&self) {
        let depth = self.depth.fetch_sub(1, Ordering::AcqRel) - 1;
        self.notify(depth);
    }

    fn notify(&self, depth: usize) {
        if let Some(observer) = self.observer.lock().as_ref() {
            observer(depth);
        }
    }
}

/// A job waiting for the worker.
struct QueueJob {
    opcode: String,
    args: Value,
    respond_to: oneshot::Sender<Result<Value, FetchError>>,
    submitted_at: Instant,
}

/// Handle to the queue. Cheap to clone; all clones feed the same worker.
#[derive(Clone)]
pub struct RequestQueue {
    sender: mpsc::UnboundedSender<QueueJob>,
    gauge: Arc<DepthGauge>,
}

impl RequestQueue {
    /// Start a queue over `source`. Must be called inside a Tokio runtime; the
    /// worker stops once every handle is dropped.
    pub fn new(source: Arc<dyn FetchSource>, clock: Arc<dyn Clock>, config: QueueConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let gauge = Arc::new(DepthGauge::default());
        tokio::spawn(run_worker(receiver, source, clock, config, Arc::clone(&gauge)));
        Self { sender, gauge }
    }

    /// Enqueue `opcode(args)` and wait for its outcome.
    pub async fn submit(&self, opcode: impl Into<String>, args: Value) -> Result<Value, FetchError> {
        let (respond_to, response) = oneshot::channel();
        let job = QueueJob {
            opcode: opcode.into(),
            args,
            respond_to,
            submitted_at: Instant::now(),
        };
        self.gauge.increment();
        if self.sender.send(job).is_err() {
            self.gauge.decrement();
            return Err(FetchError::Closed);
        }
        response.await.unwrap_or(Err(FetchError::Closed))
    }

    pub async fn run(&self, operation: Operation) -> Result<Value, FetchError> {
        self.submit(operation.opcode(), operation.args()).await
    }

    /// Jobs submitted and not yet answered, including the one in flight.
    pub fn depth(&self) -> usize {
        self.gauge.depth.load(Ordering::Acquire)
    }

    /// Report queue depth to `observer` on every change.
    pub fn set_depth_observer(&self, observer: impl Fn(usize) + Send + Sync + 'static) {
        *self.gauge.observer.lock() = Some(Box::new(observer));
    }
}

async fn run_worker(
    mut receiver: mpsc::UnboundedReceiver<QueueJob>,
    source: Arc<dyn FetchSource>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    gauge: Arc<DepthGauge>,
) {
    while let Some(job) = receiver.recv().await {
        let result = execute_job(&source, clock.as_ref(), &config, &job).await;
        debug!(
            opcode = %job.opcode,
            ok = result.is_ok(),
            elapsed_ms = job.submitted_at.elapsed().as_millis() as u64,
            "operation finished"
        );
        gauge.decrement();
        // The caller may have stopped waiting.
        let _ = job.respond_to.send(result);
    }
    debug!("request queue worker stopped");
}

async fn execute_job(
    source: &Arc<dyn FetchSource>,
    clock: &dyn Clock,
    config: &QueueConfig,
    job: &QueueJob,
) -> Result<Value, FetchError> {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        debug!(opcode = %job.opcode, attempts, "executing operation");
        // Sources may mutate their arguments; every attempt gets a fresh copy.
        match attempt(source, &job.opcode, job.args.clone()).await {
            Err(FetchError::RateLimited) => {
                if config
                    .max_throttle_retries
                    .is_some_and(|max_retries| attempts > max_retries)
                {
                    warn!(opcode = %job.opcode, attempts, "giving up on throttled operation");
                    return Err(FetchError::RetriesExhausted { attempts });
                }
                debug!(opcode = %job.opcode, attempts, "rate limited, retrying on next tick");
                clock.sleep(config.tick_interval()).await;
            }
            Err(error) => {
                warn!(opcode = %job.opcode, %error, "operation failed");
                return Err(error);
            }
            Ok(value) => return Ok(value),
        }
    }
}

/// Run one call to the source on its own task so a panic stays contained.
async fn attempt(source: &Arc<dyn FetchSource>, opcode: &str, args: Value) -> Result<Value, FetchError> {
    let source = Arc::clone(source);
    let task_opcode = opcode.to_string();
    let handle = tokio::spawn(async move { source.execute(&task_opcode, args).await });
    match handle.await {
        Ok(result) => result,
        Err(join_error) => {
            warn!(opcode, error = %join_error, "operation panicked");
            Err(FetchError::other(json!({
                "message": "operation panicked",
                "detail": join_error.to_string(),
            })))
        }
    }
}
