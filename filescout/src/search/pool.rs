use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tracing::debug;

use super::matcher::Matcher;
use super::walker::Walker;
use crate::errors::{SearchError, SearchResult};
use crate::progress::ProgressTracker;
use crate::results::SearchEvent;

/// Tasks the walker may queue ahead of the workers
pub const TASK_QUEUE_DEPTH: usize = 1024;

/// A fixed-size set of worker threads owned by one session.
///
/// The threads are released when the pool is dropped.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: NonZeroUsize) -> SearchResult<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.get())
            .thread_name(|i| format!("filescout-worker-{}", i))
            .build()
            .map_err(|e| SearchError::session_failed(format!("cannot start worker pool: {}", e)))?;
        debug!("Started worker pool with {} threads", pool.current_num_threads());
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Examines every file the walker yields.
    ///
    /// The walker runs on its own thread and feeds a bounded queue; each
    /// task is taken by exactly one worker. Workers check `cancel` before
    /// every task and start nothing new once it is set, though a read that
    /// is already underway completes. Matches and due progress snapshots are
    /// sent on `events` as they happen.
    ///
    /// Returns the number of tasks the walker produced.
    pub fn run(
        &self,
        walker: &Walker,
        matcher: &Matcher,
        tracker: &ProgressTracker,
        cancel: &AtomicBool,
        events: &Sender<SearchEvent>,
    ) -> SearchResult<u64> {
        thread::scope(|scope| {
            let (task_tx, task_rx) = mpsc::sync_channel(TASK_QUEUE_DEPTH);

            let producer = thread::Builder::new()
                .name("filescout-walker".to_string())
                .spawn_scoped(scope, move || {
                    let mut produced = 0u64;
                    for task in walker.tasks() {
                        if task_tx.send(task).is_err() {
                            break;
                        }
                        produced += 1;
                    }
                    produced
                })
                .map_err(|e| {
                    SearchError::session_failed(format!("cannot start walker thread: {}", e))
                })?;

            let worker_events = events.clone();
            self.pool.install(move || {
                task_rx
                    .into_iter()
                    .par_bridge()
                    .for_each_with(worker_events, |events, task| {
                        if cancel.load(Ordering::Relaxed) {
                            return;
                        }
                        let record = matcher.matches(&task);
                        tracker.record_file(|snapshot| {
                            let _ = events.send(SearchEvent::Progress(snapshot));
                        });
                        if let Some(record) = record {
                            let _ = events.send(SearchEvent::Match(record));
                        }
                    });
            });

            let produced = producer
                .join()
                .map_err(|_| SearchError::session_failed("walker thread panicked"))?;
            debug!("Walker produced {} tasks", produced);
            Ok(produced)
        })
    }
}
