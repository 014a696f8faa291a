use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::matcher::Matcher;
use super::pool::WorkerPool;
use super::walker::Walker;
use crate::config::{SearchConfig, SearchRequest};
use crate::errors::{SearchError, SearchResult};
use crate::progress::ProgressTracker;
use crate::results::{SearchEvent, SessionSummary};

/// Lifecycle of one search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    Idle,
    Counting,
    Searching,
    /// Stop was requested; resolves to `Stopped` once the workers drain
    Stopping,
    Completed,
    Stopped,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Stopped | SessionState::Failed
        )
    }

    /// Whether a stop request still has an effect
    pub fn is_running(self) -> bool {
        matches!(self, SessionState::Counting | SessionState::Searching)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Counting => "counting",
            SessionState::Searching => "searching",
            SessionState::Stopping => "stopping",
            SessionState::Completed => "completed",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct SessionShared {
    state: Mutex<SessionState>,
    failure: Mutex<Option<String>>,
    cancel: Arc<AtomicBool>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            failure: Mutex::new(None),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Moves to a non-terminal state unless a stop request got there first.
    fn advance(&self, to: SessionState, events: &Sender<SearchEvent>) -> bool {
        let mut state = lock(&self.state);
        if *state == SessionState::Stopping || state.is_terminal() {
            return false;
        }
        debug!("Session {} -> {}", *state, to);
        *state = to;
        let _ = events.send(SearchEvent::StateChanged {
            state: to,
            detail: None,
        });
        true
    }

    /// Resolves the run into its single terminal state.
    fn finish(&self, outcome: SearchResult<()>, events: &Sender<SearchEvent>) -> SessionState {
        // Read the flag under the state lock so a racing stop() is either
        // fully before or fully after this point
        let mut state = lock(&self.state);
        let cancelled = self.cancel.load(Ordering::SeqCst);
        let (terminal, detail) = match outcome {
            Err(SearchError::Cancelled) => (SessionState::Stopped, None),
            Err(e) => (SessionState::Failed, Some(e.to_string())),
            Ok(()) if cancelled => (SessionState::Stopped, None),
            Ok(()) => (SessionState::Completed, None),
        };

        if let Some(message) = &detail {
            warn!("Search failed: {}", message);
            *lock(&self.failure) = Some(message.clone());
        }
        info!("Session {} -> {}", *state, terminal);
        *state = terminal;
        let _ = events.send(SearchEvent::StateChanged {
            state: terminal,
            detail,
        });
        terminal
    }
}

/// A cloneable handle that can observe and stop a session from any thread.
#[derive(Debug, Clone)]
pub struct SessionControl {
    shared: Arc<SessionShared>,
}

impl SessionControl {
    /// Requests cancellation.
    ///
    /// Returns `true` if this call stopped a running session, `false` if the
    /// session was already stopping or finished.
    pub fn stop(&self) -> bool {
        let mut state = lock(&self.shared.state);
        if !state.is_running() {
            return false;
        }
        self.shared.cancel.store(true, Ordering::SeqCst);
        info!("Stop requested while {}", *state);
        *state = SessionState::Stopping;
        true
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.shared.state)
    }

    /// Description of the failure once the session is `Failed`
    pub fn failure(&self) -> Option<String> {
        lock(&self.shared.failure).clone()
    }
}

/// The collaborator's view of a running search.
///
/// Events arrive in no particular order apart from the state changes, and
/// the channel closes right after the terminal `StateChanged`. Dropping the
/// handle stops the session and waits for its threads to exit.
pub struct SearchHandle {
    control: SessionControl,
    events: Receiver<SearchEvent>,
    thread: Option<JoinHandle<()>>,
}

impl SearchHandle {
    /// See [`SessionControl::stop`]
    pub fn stop(&self) -> bool {
        self.control.stop()
    }

    pub fn state(&self) -> SessionState {
        self.control.state()
    }

    pub fn failure(&self) -> Option<String> {
        self.control.failure()
    }

    /// A handle for stopping the session from another thread
    pub fn control(&self) -> SessionControl {
        self.control.clone()
    }

    /// Next queued event, without blocking
    pub fn try_next(&self) -> Option<SearchEvent> {
        self.events.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event.
    ///
    /// `RecvTimeoutError::Disconnected` means the session has ended and every
    /// event has been received.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<SearchEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Everything queued right now
    pub fn drain(&self) -> Vec<SearchEvent> {
        self.events.try_iter().collect()
    }

    /// Blocking iterator that ends after the terminal event
    pub fn events(&self) -> mpsc::Iter<'_, SearchEvent> {
        self.events.iter()
    }

    /// Consumes the remaining events and waits for the session to end.
    pub fn wait(mut self) -> SessionSummary {
        let mut summary = SessionSummary::new();
        for event in self.events.iter() {
            summary.record(event);
        }
        self.join();
        summary.state = self.control.state();
        summary.failure = self.control.failure();
        summary
    }

    fn join(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Search session thread panicked");
            }
        }
    }
}

impl Drop for SearchHandle {
    fn drop(&mut self) {
        self.control.stop();
        self.join();
    }
}

/// Starts a search in the background.
///
/// The request is validated before any work starts; an empty query or a
/// missing root fails with `SearchError::InvalidRequest`. On success the
/// session is already `Counting` when this returns.
pub fn start_search(config: &SearchConfig) -> SearchResult<SearchHandle> {
    let request = config.request()?;
    start_request(request, config.thread_count)
}

/// Starts a search for an already validated request
pub fn start_request(request: SearchRequest, threads: NonZeroUsize) -> SearchResult<SearchHandle> {
    let shared = Arc::new(SessionShared::new());
    let (tx, rx) = mpsc::channel();

    info!(
        "Starting search for {:?} under {} (contents: {}, case sensitive: {})",
        request.query,
        request.root_path.display(),
        request.search_contents,
        request.case_sensitive
    );
    shared.advance(SessionState::Counting, &tx);

    let thread = thread::Builder::new()
        .name("filescout-session".to_string())
        .spawn({
            let shared = Arc::clone(&shared);
            move || run_session(&shared, &request, threads, tx)
        })
        .map_err(|e| SearchError::session_failed(format!("cannot start search thread: {}", e)))?;

    Ok(SearchHandle {
        control: SessionControl { shared },
        events: rx,
        thread: Some(thread),
    })
}

fn run_session(
    shared: &SessionShared,
    request: &SearchRequest,
    threads: NonZeroUsize,
    events: Sender<SearchEvent>,
) {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        execute(shared, request, threads, &events)
    }))
    .unwrap_or_else(|payload| {
        Err(SearchError::session_failed(format!(
            "internal error: {}",
            panic_message(payload.as_ref())
        )))
    });
    shared.finish(outcome, &events);
}

fn execute(
    shared: &SessionShared,
    request: &SearchRequest,
    threads: NonZeroUsize,
    events: &Sender<SearchEvent>,
) -> SearchResult<()> {
    let walker = Walker::new(&request.root_path, Arc::clone(&shared.cancel));
    walker.ensure_readable()?;

    let total = walker.count(|files_found| {
        let _ = events.send(SearchEvent::Scanning { files_found });
    })?;
    info!("Found {} files to examine", total);

    let matcher = Matcher::new(request);
    let pool = WorkerPool::new(threads)?;
    let tracker = ProgressTracker::new(total);
    shared.advance(SessionState::Searching, events);

    let result = pool.run(&walker, &matcher, &tracker, &shared.cancel, events);
    tracker.publish_final(|snapshot| {
        let _ = events.send(SearchEvent::Progress(snapshot));
    });
    tracker.log_stats();
    result.map(|_| ())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn states(summary_events: &[SearchEvent]) -> Vec<SessionState> {
        summary_events
            .iter()
            .filter_map(|e| match e {
                SearchEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_lifecycle_to_completed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report.txt"), "").unwrap();

        let handle = start_search(&SearchConfig::new(dir.path(), "report")).unwrap();
        let events: Vec<SearchEvent> = handle.events().collect();
        assert_eq!(
            states(&events),
            vec![
                SessionState::Counting,
                SessionState::Searching,
                SessionState::Completed
            ]
        );
        assert!(events.last().unwrap().is_terminal());
        assert_eq!(handle.state(), SessionState::Completed);
        assert!(!handle.stop());
    }

    #[test]
    fn test_state_is_counting_on_return() {
        let dir = tempdir().unwrap();
        let handle = start_search(&SearchConfig::new(dir.path(), "x")).unwrap();
        assert_ne!(handle.state(), SessionState::Idle);
        handle.wait();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = tempdir().unwrap();
        for i in 0..200 {
            fs::write(dir.path().join(format!("f{}.txt", i)), "").unwrap();
        }

        let handle = start_search(&SearchConfig::new(dir.path(), "f")).unwrap();
        assert!(handle.stop());
        assert!(!handle.stop());
        assert_eq!(handle.state(), SessionState::Stopping);

        let control = handle.control();
        let summary = handle.wait();
        assert_eq!(summary.state, SessionState::Stopped);
        assert!(!control.stop());
    }

    #[test]
    fn test_invalid_request_is_synchronous() {
        let dir = tempdir().unwrap();
        let result = start_search(&SearchConfig::new(dir.path(), ""));
        assert!(matches!(result, Err(SearchError::InvalidRequest(_))));
    }

    #[test]
    fn test_unreadable_root_fails_session() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        fs::create_dir(&root).unwrap();
        let request = SearchConfig::new(&root, "x").request().unwrap();
        fs::remove_dir(&root).unwrap();

        let summary = start_request(request, NonZeroUsize::new(2).unwrap())
            .unwrap()
            .wait();
        assert_eq!(summary.state, SessionState::Failed);
        assert!(summary.failure.unwrap().contains("cannot enumerate"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
