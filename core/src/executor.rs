//! Scan executor
//!
//! Runs scan tasks on a dedicated Rayon thread pool and streams their
//! batches back to the caller through bounded channels, either in task
//! order or as they become ready.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use arrow::record_batch::RecordBatch;
use tracing::{debug, trace};

use crate::error::{DatasetError, DatasetResult, FragmentError};
use crate::scan_task::{ScanTask, ScanTaskBatches};
use crate::scanner::ScanOrdering;

/// Batches buffered per running task before the worker blocks.
const TASK_QUEUE_DEPTH: usize = 4;

/// One item of scan output.
pub type ScanItem = Result<RecordBatch, FragmentError>;

/// ScanExecutor owns the worker threads of one scan.
///
/// Dropping the executor waits for every worker to exit, so all file
/// handles opened by its tasks are released when the drop returns.
pub struct ScanExecutor {
    pool: Option<rayon::ThreadPool>,
    num_threads: usize,
    exited: Arc<(Mutex<usize>, Condvar)>,
}

impl Debug for ScanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanExecutor")
            .field("num_threads", &self.num_threads)
            .finish()
    }
}

impl ScanExecutor {
    /// Create an executor with `num_threads` worker threads.
    pub fn new(num_threads: usize) -> DatasetResult<Self> {
        if num_threads == 0 {
            return Err(DatasetError::InvalidArgument(
                "executor needs at least one thread".to_string(),
            ));
        }
        let exited = Arc::new((Mutex::new(0usize), Condvar::new()));
        let on_exit = exited.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("strata-scan-{}", i))
            .exit_handler(move |_| {
                let (lock, cvar) = &*on_exit;
                *lock.lock().unwrap_or_else(PoisonError::into_inner) += 1;
                cvar.notify_all();
            })
            .build()
            .map_err(|e| DatasetError::Internal(format!("failed to build scan pool: {}", e)))?;
        Ok(Self {
            pool: Some(pool),
            num_threads,
            exited,
        })
    }

    /// Create an executor with one thread per CPU core.
    pub fn with_default_threads() -> DatasetResult<Self> {
        Self::new(num_cpus::get().max(1))
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Submit every task and return the stream of their batches.
    ///
    /// Tasks start in submission order. With [`ScanOrdering::Ordered`] the
    /// stream yields all batches of task `i` before any of task `i + 1`;
    /// otherwise batches are yielded as workers produce them.
    pub fn execute(self, tasks: Vec<ScanTask>, ordering: ScanOrdering) -> ScanResults {
        let cancelled = Arc::new(AtomicBool::new(false));
        debug!(
            tasks = tasks.len(),
            threads = self.num_threads,
            ?ordering,
            "executing scan"
        );
        let inner = match &self.pool {
            None => ResultsInner::Serial {
                pending: tasks.into(),
                current: None,
            },
            Some(pool) => match ordering {
                ScanOrdering::Ordered => {
                    let mut receivers = VecDeque::with_capacity(tasks.len());
                    for task in tasks {
                        let (sender, receiver) = sync_channel(TASK_QUEUE_DEPTH);
                        receivers.push_back(receiver);
                        let cancelled = cancelled.clone();
                        pool.spawn_fifo(move || run_task(task, sender, &cancelled));
                    }
                    ResultsInner::Ordered { receivers }
                }
                ScanOrdering::Unordered => {
                    let (sender, receiver) = sync_channel(self.num_threads * TASK_QUEUE_DEPTH);
                    for task in tasks {
                        let sender = sender.clone();
                        let cancelled = cancelled.clone();
                        pool.spawn_fifo(move || run_task(task, sender, &cancelled));
                    }
                    ResultsInner::Unordered { receiver }
                }
            },
        };
        ScanResults {
            inner,
            cancelled,
            _executor: Some(self),
        }
    }

    /// Stop accepting work and wait for the workers to exit.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for ScanExecutor {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        // A worker cannot wait for itself to exit.
        let on_worker = pool.current_thread_index().is_some();
        drop(pool);
        if on_worker {
            return;
        }
        let (lock, cvar) = &*self.exited;
        let mut exited = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while *exited < self.num_threads {
            exited = cvar.wait(exited).unwrap_or_else(PoisonError::into_inner);
        }
        trace!(threads = self.num_threads, "scan executor stopped");
    }
}

/// Body of one worker job: stream a task's batches into `sender` until the
/// task ends, the consumer goes away or the scan is cancelled.
fn run_task(task: ScanTask, sender: SyncSender<ScanItem>, cancelled: &AtomicBool) {
    if cancelled.load(Ordering::Acquire) {
        return;
    }
    let path = task.fragment().path().to_string();
    trace!(path = %path, "scan task started");
    for item in task.execute() {
        if cancelled.load(Ordering::Acquire) {
            break;
        }
        let item = item.map_err(|e| FragmentError::new(path.clone(), e));
        if sender.send(item).is_err() {
            break;
        }
    }
    trace!(path = %path, "scan task finished");
}

enum ResultsInner {
    Serial {
        pending: VecDeque<ScanTask>,
        current: Option<(String, ScanTaskBatches)>,
    },
    Ordered {
        receivers: VecDeque<Receiver<ScanItem>>,
    },
    Unordered {
        receiver: Receiver<ScanItem>,
    },
}

/// Stream of batches produced by a scan.
///
/// Errors are reported per fragment; a failing fragment ends only its own
/// batches. Dropping the stream cancels outstanding work and blocks until
/// workers have released their files.
pub struct ScanResults {
    // Declared before the executor so channels close before workers are joined.
    inner: ResultsInner,
    cancelled: Arc<AtomicBool>,
    _executor: Option<ScanExecutor>,
}

impl ScanResults {
    /// Run tasks one after another on the calling thread.
    pub fn serial(tasks: Vec<ScanTask>) -> Self {
        Self {
            inner: ResultsInner::Serial {
                pending: tasks.into(),
                current: None,
            },
            cancelled: Arc::new(AtomicBool::new(false)),
            _executor: None,
        }
    }

    /// Stop scheduling further work. Batches already produced may still be
    /// yielded.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Debug for ScanResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.inner {
            ResultsInner::Serial { .. } => "serial",
            ResultsInner::Ordered { .. } => "ordered",
            ResultsInner::Unordered { .. } => "unordered",
        };
        f.debug_struct("ScanResults")
            .field("mode", &mode)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl Iterator for ScanResults {
    type Item = ScanItem;

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_cancelled() {
            return None;
        }
        match &mut self.inner {
            ResultsInner::Serial { pending, current } => loop {
                if let Some((path, batches)) = current {
                    match batches.next() {
                        Some(item) => {
                            return Some(item.map_err(|e| FragmentError::new(path.clone(), e)));
                        }
                        None => *current = None,
                    }
                }
                let task = pending.pop_front()?;
                *current = Some((task.fragment().path().to_string(), task.execute()));
            },
            ResultsInner::Ordered { receivers } => loop {
                let receiver = receivers.front()?;
                match receiver.recv() {
                    Ok(item) => return Some(item),
                    Err(_) => {
                        receivers.pop_front();
                    }
                }
            },
            ResultsInner::Unordered { receiver } => receiver.recv().ok(),
        }
    }
}

impl Drop for ScanResults {
    fn drop(&mut self) {
        self.cancel();
    }
}
