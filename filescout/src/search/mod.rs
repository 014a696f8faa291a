//! The search pipeline.
//!
//! A session counts the files under the root, then streams them from a
//! [`Walker`] thread through a bounded queue into a [`WorkerPool`]. Each
//! worker applies the [`Matcher`] and reports matches and progress on the
//! session's event channel. Cancellation is a shared flag polled by the
//! walker and by every worker before each file.

pub mod matcher;
pub mod pool;
pub mod session;
pub mod walker;

pub use matcher::{Matcher, CONTENT_SIZE_LIMIT};
pub use pool::WorkerPool;
pub use session::{start_request, start_search, SearchHandle, SessionControl, SessionState};
pub use walker::{FileTask, Walker};
