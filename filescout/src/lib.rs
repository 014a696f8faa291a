pub mod config;
pub mod errors;
pub mod progress;
pub mod results;
pub mod search;

pub use config::{SearchConfig, SearchRequest};
pub use errors::{SearchError, SearchResult};
pub use progress::ProgressTracker;
pub use results::{format_size, MatchRecord, ProgressSnapshot, SearchEvent, SessionSummary};
pub use search::{start_search, SearchHandle, SessionControl, SessionState};
