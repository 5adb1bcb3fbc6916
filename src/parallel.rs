//! Fail-fast map over independent tasks on a bounded rayon pool.
//!
//! Every task owns its input. Results come back in input order. Each task
//! gets its own deadline, counted from the moment a worker picks it up. The
//! first task error or expired deadline aborts the whole batch; tasks that
//! have not started by then are skipped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{EdaError, Result};

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Run on worker threads instead of inline.
    pub parallel: bool,
    /// Number of workers; 0 means one per available core.
    pub workers: usize,
    /// Longest a single task may run once a worker has started it.
    pub task_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            workers: 0,
            task_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolOptions {
    pub fn sequential() -> Self {
        Self::default()
    }

    pub fn parallel() -> Self {
        Self {
            parallel: true,
            ..Self::default()
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    fn worker_count(&self, tasks: usize) -> usize {
        let wanted = if self.workers == 0 {
            rayon::current_num_threads()
        } else {
            self.workers
        };
        wanted.min(tasks).max(1)
    }
}

enum Event<R> {
    Started(usize),
    Finished(usize, Result<R>),
}

/// Apply `f` to every input, returning the outputs in input order.
pub fn parallel_map<T, R, F>(inputs: Vec<T>, f: F, options: &PoolOptions) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Result<R> + Send + Sync + 'static,
{
    let n = inputs.len();
    if !options.parallel || n <= 1 {
        return inputs
            .into_iter()
            .enumerate()
            .map(|(index, input)| {
                f(input).map_err(|e| EdaError::TaskFailed {
                    index,
                    message: e.to_string(),
                })
            })
            .collect();
    }

    let started = Instant::now();
    let workers = options.worker_count(n);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|w| format!("eda-worker-{w}"))
        .panic_handler(|_| warn!("parallel_map: a task panicked"))
        .build()
        .map_err(|e| EdaError::TaskFailed {
            index: 0,
            message: format!("could not start worker pool: {e}"),
        })?;

    debug!("parallel_map: {n} tasks, {workers} workers, {:?} per task", options.task_timeout);

    let abort = Arc::new(AtomicBool::new(false));
    let f = Arc::new(f);
    let (tx, rx) = mpsc::channel::<Event<R>>();
    for (index, input) in inputs.into_iter().enumerate() {
        let abort = Arc::clone(&abort);
        let f = Arc::clone(&f);
        let tx = tx.clone();
        pool.spawn(move || {
            if abort.load(Ordering::Relaxed) {
                return;
            }
            if tx.send(Event::Started(index)).is_err() {
                return;
            }
            // the receiver is gone once the batch has been abandoned
            let _ = tx.send(Event::Finished(index, f(input)));
        });
    }
    drop(tx);

    let mut results: Vec<Option<R>> = (0..n).map(|_| None).collect();
    let mut running: BTreeMap<usize, Instant> = BTreeMap::new();
    let mut done = 0;
    while done < n {
        // the oldest running task sets the next deadline
        let oldest = running.iter().min_by_key(|entry| *entry.1).map(|(&i, &t)| (i, t));
        let wait = match oldest {
            Some((_, since)) => (since + options.task_timeout).saturating_duration_since(Instant::now()),
            None => options.task_timeout,
        };
        match rx.recv_timeout(wait) {
            Ok(Event::Started(index)) => {
                running.insert(index, Instant::now());
            }
            Ok(Event::Finished(index, Ok(r))) => {
                running.remove(&index);
                results[index] = Some(r);
                done += 1;
            }
            Ok(Event::Finished(index, Err(e))) => {
                abort.store(true, Ordering::Relaxed);
                warn!("parallel_map: task {index} failed, aborting batch");
                return Err(EdaError::TaskFailed {
                    index,
                    message: e.to_string(),
                });
            }
            Err(RecvTimeoutError::Timeout) => {
                abort.store(true, Ordering::Relaxed);
                let index = match oldest {
                    Some((index, _)) => index,
                    None => results.iter().position(Option::is_none).unwrap_or(0),
                };
                warn!("parallel_map: task {index} timed out, aborting batch");
                return Err(EdaError::TaskTimedOut {
                    index,
                    timeout_secs: options.task_timeout.as_secs_f64(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                let index = results.iter().position(Option::is_none).unwrap_or(0);
                return Err(EdaError::TaskFailed {
                    index,
                    message: "worker exited without a result".to_string(),
                });
            }
        }
    }
    info!(
        "parallel_map: {n} tasks on {workers} workers in {:.3}s",
        started.elapsed().as_secs_f64()
    );
    Ok(results.into_iter().flatten().collect())
}
