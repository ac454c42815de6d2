/*!
 * Execution Contexts
 * Serial job queues: the pumped main context and private worker queues
 */

use super::errors::ExecutorError;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Unit of work submitted to a serial context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Asynchronous submission onto the main execution context
///
/// Implementations must run jobs one at a time, in submission order, on the
/// thread that the paired [`MainThreadProbe`](super::MainThreadProbe)
/// recognises as main.
pub trait MainExecutor: Send + Sync {
    fn exec_async(&self, job: Job) -> Result<(), ExecutorError>;
}

/// Shared main executor handle
pub type MainExecutorRef = Arc<dyn MainExecutor>;

/// Main-thread job queue pumped explicitly by its owning thread
///
/// Stands in for a platform run loop: any thread may submit, only the main
/// thread drains via [`run_pending`](Self::run_pending) or
/// [`run_until`](Self::run_until).
#[derive(Clone)]
pub struct MainQueue {
    tx: flume::Sender<Job>,
    rx: flume::Receiver<Job>,
}

impl MainQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Executor handle for injection into locks and update cycles
    pub fn handle(&self) -> MainExecutorRef {
        Arc::new(self.clone())
    }

    /// Jobs waiting to run
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Run every job queued at call time; returns how many ran
    ///
    /// Jobs submitted by those jobs wait for the next call.
    pub fn run_pending(&self) -> usize {
        let queued = self.rx.len();
        let mut ran = 0;
        for _ in 0..queued {
            match self.rx.try_recv() {
                Ok(job) => {
                    run_job("main", job);
                    ran += 1;
                }
                Err(_) => break,
            }
        }
        ran
    }

    /// Pump jobs until `done` returns true or `timeout` elapses
    ///
    /// Returns the final value of `done`.
    pub fn run_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let start = Instant::now();
        loop {
            if done() {
                return true;
            }
            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return done();
            }
            let slice = remaining.min(Duration::from_millis(5));
            if let Ok(job) = self.rx.recv_timeout(slice) {
                run_job("main", job);
            }
        }
    }
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainQueue")
            .field("pending", &self.rx.len())
            .finish()
    }
}

impl MainExecutor for MainQueue {
    fn exec_async(&self, job: Job) -> Result<(), ExecutorError> {
        self.tx.send(job).map_err(|_| ExecutorError::Closed)
    }
}

/// Private serial queue backed by one named worker thread
///
/// The worker exits once every clone of the queue has been dropped and the
/// backlog is drained.
#[derive(Clone)]
pub struct SerialQueue {
    name: Arc<str>,
    tx: flume::Sender<Job>,
}

impl SerialQueue {
    pub fn spawn(name: impl Into<String>) -> Result<Self, ExecutorError> {
        let name: String = name.into();
        let (tx, rx) = flume::unbounded::<Job>();
        let label: Arc<str> = Arc::from(name.as_str());
        let worker_label = label.clone();

        thread::Builder::new()
            .name(name)
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    run_job(&worker_label, job);
                }
                debug!(queue = %worker_label, "Serial queue drained and closed");
            })
            .map_err(|e| ExecutorError::Spawn(e.to_string()))?;

        debug!(queue = %label, "Serial queue started");
        Ok(Self { name: label, tx })
    }

    pub fn submit<F>(&self, job: F) -> Result<(), ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(job)).map_err(|_| ExecutorError::Closed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs waiting behind the one currently running
    pub fn backlog(&self) -> usize {
        self.tx.len()
    }
}

impl fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialQueue")
            .field("name", &self.name)
            .field("backlog", &self.tx.len())
            .finish()
    }
}

fn run_job(queue: &str, job: Job) {
    if catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!(queue = %queue, "Job panicked; queue continues with next job");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_main_queue_runs_in_order() {
        let queue = MainQueue::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..4 {
            let log = log.clone();
            queue
                .exec_async(Box::new(move || log.lock().push(i)))
                .unwrap();
        }

        assert_eq!(queue.pending(), 4);
        assert_eq!(queue.run_pending(), 4);
        assert_eq!(*log.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_run_pending_defers_nested_jobs() {
        let queue = MainQueue::new();
        let inner = queue.clone();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_inner = ran.clone();

        queue
            .exec_async(Box::new(move || {
                let ran = ran_inner.clone();
                inner
                    .exec_async(Box::new(move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                    }))
                    .unwrap();
            }))
            .unwrap();

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_serial_queue_survives_panicking_job() {
        let queue = SerialQueue::spawn("test-serial").unwrap();
        let (tx, rx) = flume::bounded(1);

        queue.submit(|| panic!("boom")).unwrap();
        queue
            .submit(move || {
                tx.send(thread::current().name().map(str::to_owned)).unwrap();
            })
            .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some("test-serial"));
    }

    #[test]
    fn test_run_until_times_out() {
        let queue = MainQueue::new();
        let start = Instant::now();
        assert!(!queue.run_until(Duration::from_millis(30), || false));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
