use std::borrow::Cow;
use std::fs::{self, File, Metadata};
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::trace;

use super::walker::FileTask;
use crate::config::SearchRequest;
use crate::errors::{SearchError, SearchResult};
use crate::results::{type_label, MatchRecord};

/// Files at or above this size are never content-scanned
pub const CONTENT_SIZE_LIMIT: u64 = 1_000_000;

const SMALL_FILE_THRESHOLD: u64 = 32 * 1024; // 32KB
const BUFFER_CAPACITY: usize = 65536;

/// Decides whether a single file matches the query.
///
/// The query is normalized once at construction; the file name and content
/// are normalized per file. Holds no mutable state, so one matcher is shared
/// by every worker of a session.
#[derive(Debug, Clone)]
pub struct Matcher {
    query: String,
    search_contents: bool,
    case_sensitive: bool,
}

impl Matcher {
    pub fn new(request: &SearchRequest) -> Self {
        let query = if request.case_sensitive {
            request.query.clone()
        } else {
            request.query.to_lowercase()
        };
        Self {
            query,
            search_contents: request.search_contents,
            case_sensitive: request.case_sensitive,
        }
    }

    /// The query as compared against names and content
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Tests one file. Any I/O failure skips the file.
    pub fn matches(&self, task: &FileTask) -> Option<MatchRecord> {
        match self.try_match(task) {
            Ok(record) => record,
            Err(e) => {
                trace!("Skipping {}: {}", task.path().display(), e);
                None
            }
        }
    }

    fn try_match(&self, task: &FileTask) -> SearchResult<Option<MatchRecord>> {
        let path = task.path();
        let name = task.name();

        if self.contains(&name) {
            let metadata = fs::metadata(&path).map_err(|e| SearchError::from_io(e, &path))?;
            return Ok(Some(build_record(name.into_owned(), &path, &metadata)));
        }

        if !self.search_contents {
            return Ok(None);
        }

        let metadata = fs::metadata(&path).map_err(|e| SearchError::from_io(e, &path))?;
        if metadata.len() >= CONTENT_SIZE_LIMIT {
            trace!(
                "Not scanning {} ({} bytes is over the content limit)",
                path.display(),
                metadata.len()
            );
            return Ok(None);
        }

        let Some(bytes) = read_content(&path, metadata.len())? else {
            return Ok(None);
        };
        let text = decode_lossy(&bytes, &path);
        if self.contains(&text) {
            Ok(Some(build_record(name.into_owned(), &path, &metadata)))
        } else {
            Ok(None)
        }
    }

    /// Substring containment with the session's case rule
    pub fn contains(&self, haystack: &str) -> bool {
        if self.case_sensitive {
            haystack.contains(&self.query)
        } else {
            haystack.to_lowercase().contains(&self.query)
        }
    }
}

/// Reads at most [`CONTENT_SIZE_LIMIT`] bytes. Returns `None` when the file
/// turns out to reach the limit, whatever its reported size was.
fn read_content(path: &Path, size: u64) -> SearchResult<Option<Vec<u8>>> {
    let file = File::open(path).map_err(|e| SearchError::from_io(e, path))?;
    let mut limited = file.take(CONTENT_SIZE_LIMIT);
    let mut bytes = Vec::with_capacity(size.min(CONTENT_SIZE_LIMIT) as usize);

    let read = if size < SMALL_FILE_THRESHOLD {
        limited.read_to_end(&mut bytes)
    } else {
        BufReader::with_capacity(BUFFER_CAPACITY, limited).read_to_end(&mut bytes)
    };
    read.map_err(|e| SearchError::from_io(e, path))?;

    if bytes.len() as u64 >= CONTENT_SIZE_LIMIT {
        trace!("Not scanning {} (grew past the content limit)", path.display());
        return Ok(None);
    }
    Ok(Some(bytes))
}

/// Decodes bytes as UTF-8, replacing invalid sequences instead of failing
fn decode_lossy<'a>(bytes: &'a [u8], path: &Path) -> Cow<'a, str> {
    let text = String::from_utf8_lossy(bytes);
    if let Cow::Owned(_) = text {
        trace!("Invalid UTF-8 replaced in file: {}", path.display());
    }
    text
}

fn build_record(name: String, path: &Path, metadata: &Metadata) -> MatchRecord {
    MatchRecord {
        name,
        absolute_path: path.to_path_buf(),
        size_bytes: metadata.len(),
        modified: metadata.modified().ok(),
        type_label: type_label(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::{tempdir, TempDir};

    fn request(query: &str, search_contents: bool, case_sensitive: bool) -> SearchRequest {
        SearchRequest {
            root_path: PathBuf::from("."),
            query: query.to_string(),
            search_contents,
            case_sensitive,
        }
    }

    fn task_for(dir: &TempDir, name: &str, content: &[u8]) -> FileTask {
        fs::write(dir.path().join(name), content).unwrap();
        FileTask::new(dir.path().to_path_buf(), name.into())
    }

    #[test]
    fn test_name_match_respects_case() {
        let dir = tempdir().unwrap();
        let task = task_for(&dir, "abcfile.txt", b"");

        let sensitive = Matcher::new(&request("ABC", false, true));
        assert!(sensitive.matches(&task).is_none());

        let insensitive = Matcher::new(&request("ABC", false, false));
        let record = insensitive.matches(&task).unwrap();
        assert_eq!(record.name, "abcfile.txt");
        assert_eq!(record.type_label, "PLAIN");
        assert_eq!(record.absolute_path, dir.path().join("abcfile.txt"));
    }

    #[test]
    fn test_content_not_read_when_disabled() {
        let dir = tempdir().unwrap();
        let task = task_for(&dir, "notes.md", b"the needle is here");

        let matcher = Matcher::new(&request("needle", false, false));
        assert!(matcher.matches(&task).is_none());

        let matcher = Matcher::new(&request("needle", true, false));
        assert!(matcher.matches(&task).is_some());
    }

    #[test]
    fn test_content_size_boundary() {
        let dir = tempdir().unwrap();
        let mut under = vec![b'x'; (CONTENT_SIZE_LIMIT - 1) as usize];
        under[..6].copy_from_slice(b"needle");
        let mut at = vec![b'x'; CONTENT_SIZE_LIMIT as usize];
        at[..6].copy_from_slice(b"needle");

        let under = task_for(&dir, "under.bin", &under);
        let at = task_for(&dir, "at.bin", &at);

        let matcher = Matcher::new(&request("needle", true, true));
        assert!(matcher.matches(&under).is_some());
        assert!(matcher.matches(&at).is_none());
    }

    #[test]
    fn test_invalid_utf8_is_decoded_lossily() {
        let dir = tempdir().unwrap();
        let task = task_for(&dir, "mixed.dat", b"\xff\xfe garbage then Needle \xc3");

        let matcher = Matcher::new(&request("needle", true, false));
        assert!(matcher.matches(&task).is_some());
    }

    #[test]
    fn test_content_match_case_insensitive() {
        let dir = tempdir().unwrap();
        let task = task_for(&dir, "letter.txt", b"Dear Sir, see the INVOICE attached");

        assert!(Matcher::new(&request("invoice", true, false))
            .matches(&task)
            .is_some());
        assert!(Matcher::new(&request("invoice", true, true))
            .matches(&task)
            .is_none());
    }

    #[test]
    fn test_vanished_file_is_skipped() {
        let dir = tempdir().unwrap();
        let task = FileTask::new(dir.path().to_path_buf(), "gone-needle.txt".into());

        // Name matches but stat fails
        let matcher = Matcher::new(&request("needle", true, false));
        assert!(matcher.matches(&task).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_permission_denied_file_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let task = task_for(&dir, "locked.txt", b"needle");
        let path = task.path();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&path).is_ok() {
            // Running with privileges that bypass file modes
            return;
        }

        let matcher = Matcher::new(&request("needle", true, false));
        assert!(matches!(
            matcher.try_match(&task),
            Err(SearchError::PermissionDenied(_))
        ));
        assert!(matcher.matches(&task).is_none());
    }

    #[test]
    fn test_read_stops_at_content_limit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("grown.log");
        fs::write(&path, vec![b'x'; CONTENT_SIZE_LIMIT as usize + 10]).unwrap();

        // Stale small size as reported before the file grew
        assert!(read_content(&path, 10).unwrap().is_none());
        assert!(read_content(&path, 0).unwrap().is_none());

        fs::write(&path, b"short").unwrap();
        assert_eq!(read_content(&path, 0).unwrap().unwrap(), b"short");
    }

    #[test]
    fn test_query_normalized_once() {
        let matcher = Matcher::new(&request("MiXeD", false, false));
        assert_eq!(matcher.query(), "mixed");
        assert!(matcher.contains("a MIXED bag"));
    }
}
