//! Scan and merge engine.
//!
//! Combines the elements recovered from the previous output with a fresh
//! look at the input files and decides, per file, whether the previous
//! capture can be reused.
//!
//! ## Per-file decision
//!
//! 1. Look up the previous element by logical name.
//! 2. Open the file (with retry) and read its size and modification time.
//! 3. Same timestamp as before: reuse without reading. The size must match
//!    too, a mismatch is an internal consistency error.
//! 4. Otherwise read and encode the whole file (up to the size limit). If
//!    the encoded bytes equal the previous capture, reuse it and keep its
//!    old timestamp. If not, capture a new element.
//!
//! Each file gets an explicit [`FileOutcome`]. Previous elements that no
//! input claimed keep no outcome and are dropped by
//! [`MergeResult::prune_untagged`] unless the caller appends.

mod source;

use crate::element::{encode_bytes, Element, Timestamp};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, error, trace};

pub use source::{open_with_retry, RetryPolicy, SharedReadOpener, SourceOpener};

/// Largest input file accepted by default (32 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 32 * 1024 * 1024;

/// An input file and the logical name it is embedded under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// Path of the file on disk
    pub path: PathBuf,
    /// Logical name in the generated output
    pub name: String,
}

impl InputFile {
    /// Creates a new input file
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// Why a previous element was kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReuseKind {
    /// Modification time unchanged
    Timestamp,
    /// Modification time changed, content identical
    Content,
}

/// What happened to an element during this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Previous capture kept as-is
    Reused(ReuseKind),
    /// Previous capture replaced with fresh content
    Updated,
    /// New element
    Inserted,
}

/// Configuration for the merge engine
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Largest input accepted, in bytes
    pub max_file_size: u64,
    /// Retry policy for opening inputs
    pub retry: RetryPolicy,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            retry: RetryPolicy::default(),
        }
    }
}

impl MergeConfig {
    /// Creates a new merge config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest accepted input size
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Sets the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// An element of the merged collection with its outcome for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEntry {
    /// The element
    pub element: Element,
    /// Outcome, or `None` if no input claimed this element
    pub outcome: Option<FileOutcome>,
}

impl MergedEntry {
    /// Returns true if an input claimed this element in this run
    pub fn is_tagged(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Merged collection plus the "anything changed" flag
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    entries: Vec<MergedEntry>,
    changed: bool,
}

impl MergeResult {
    /// Entries in output order
    pub fn entries(&self) -> &[MergedEntry] {
        &self.entries
    }

    /// Returns true if the output needs to be rewritten
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Number of entries with the given outcome
    pub fn count(&self, outcome: FileOutcome) -> usize {
        self.entries
            .iter()
            .filter(|e| e.outcome == Some(outcome))
            .count()
    }

    /// Drops entries no input claimed, returning their names.
    ///
    /// Removing anything marks the result as changed.
    pub fn prune_untagged(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            if !entry.is_tagged() {
                removed.push(entry.element.name.clone());
            }
            entry.is_tagged()
        });
        if !removed.is_empty() {
            debug!("Removed {} existing entries", removed.len());
            self.changed = true;
        }
        removed
    }

    /// Consumes the result, returning the elements in output order
    pub fn into_elements(self) -> Vec<Element> {
        self.entries.into_iter().map(|e| e.element).collect()
    }
}

/// Per-file decision before it is applied to the collection
enum Decision {
    Reuse(ReuseKind),
    Capture(Element),
}

/// The scan and merge engine
pub struct Merger {
    config: MergeConfig,
    opener: Box<dyn SourceOpener>,
}

impl Default for Merger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Merger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Merger {
    /// Creates a new merger with default configuration
    pub fn new() -> Self {
        Self::with_config(MergeConfig::default())
    }

    /// Creates a new merger with custom configuration
    pub fn with_config(config: MergeConfig) -> Self {
        Self {
            config,
            opener: Box::new(SharedReadOpener),
        }
    }

    /// Replaces the file opener
    pub fn with_opener(mut self, opener: impl SourceOpener + 'static) -> Self {
        self.opener = Box::new(opener);
        self
    }

    /// Returns the configuration
    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Merges `inputs` into the previous elements.
    ///
    /// Previous elements keep their order, new names are appended. A later
    /// element with the same name replaces an earlier one in place. Any
    /// per-file error aborts the whole merge.
    pub fn merge(&self, inputs: &[InputFile], prior: Vec<Element>) -> Result<MergeResult> {
        let mut entries: Vec<MergedEntry> = Vec::with_capacity(prior.len() + inputs.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(entries.capacity());

        for element in prior {
            let entry = MergedEntry {
                element,
                outcome: None,
            };
            match index.get(&entry.element.name) {
                Some(&slot) => entries[slot] = entry,
                None => {
                    index.insert(entry.element.name.clone(), entries.len());
                    entries.push(entry);
                }
            }
        }

        debug!("Processing {} files", inputs.len());
        let mut changed = false;

        for input in inputs {
            let slot = index.get(&input.name).copied();
            let prior = slot.map(|i| &entries[i].element);

            let decision = self.process_file(input, prior).map_err(|e| {
                error!("error with reading file '{}': {}", input.path.display(), e);
                e
            })?;

            match (decision, slot) {
                (Decision::Reuse(kind), Some(slot)) => {
                    entries[slot].outcome = Some(FileOutcome::Reused(kind));
                }
                (Decision::Reuse(_), None) => {
                    return Err(Error::internal(format!(
                        "reused '{}' without a previous element",
                        input.name
                    )));
                }
                (Decision::Capture(element), Some(slot)) => {
                    trace!("{}: existing overridden", input.name);
                    entries[slot] = MergedEntry {
                        element,
                        outcome: Some(FileOutcome::Updated),
                    };
                    changed = true;
                }
                (Decision::Capture(element), None) => {
                    trace!("{}: inserted", input.name);
                    index.insert(element.name.clone(), entries.len());
                    entries.push(MergedEntry {
                        element,
                        outcome: Some(FileOutcome::Inserted),
                    });
                    changed = true;
                }
            }
        }

        Ok(MergeResult { entries, changed })
    }

    fn process_file(&self, input: &InputFile, prior: Option<&Element>) -> Result<Decision> {
        let path = &input.path;
        let mut file = open_with_retry(self.opener.as_ref(), path, &self.config.retry)?;
        let metadata = file.metadata().map_err(|e| Error::file_read(path, e))?;
        let modified = metadata
            .modified()
            .map(Timestamp::from_system_time)
            .map_err(|e| Error::file_read(path, e))?;
        let size = metadata.len();

        if let Some(prior) = prior.filter(|p| p.last_modify_time == modified) {
            if prior.size_in_bytes != size {
                return Err(Error::SizeMismatch {
                    name: input.name.clone(),
                    recorded: prior.size_in_bytes,
                    actual: size,
                });
            }
            trace!("{}: skipped (not modified since last time)", input.name);
            return Ok(Decision::Reuse(ReuseKind::Timestamp));
        }

        let max = self.config.max_file_size;
        if size > max {
            return Err(Error::FileTooLarge {
                path: path.clone(),
                size,
                max,
            });
        }

        let mut bytes = Vec::with_capacity(size as usize);
        // Read one byte past the limit to catch files that grew since stat
        (&mut file)
            .take(max.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|e| Error::file_read(path, e))?;
        let len = bytes.len() as u64;
        if len > max {
            return Err(Error::FileTooLarge {
                path: path.clone(),
                size: len,
                max,
            });
        }

        let data = encode_bytes(&bytes);

        if let Some(prior) = prior {
            if prior.name == input.name && prior.size_in_bytes == len && prior.data == data {
                // Keep the old timestamp so the stored output stays untouched
                trace!(
                    "{}: skipped (timestamps different, but data not modified since last time)",
                    input.name
                );
                return Ok(Decision::Reuse(ReuseKind::Content));
            }
        }

        debug!("{}: captured {} bytes from {}", input.name, len, path.display());
        Ok(Decision::Capture(Element::new(
            input.name.clone(),
            data,
            len,
            modified,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::source::tests::FlakyOpener;
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn quick() -> MergeConfig {
        MergeConfig::new().retry(RetryPolicy::new().delay(Duration::ZERO))
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> InputFile {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        InputFile::new(path, format!("embedded:\\{}", name))
    }

    fn mtime(path: &Path) -> Timestamp {
        Timestamp::from_system_time(fs::metadata(path).unwrap().modified().unwrap())
    }

    fn set_mtime(path: &Path, secs: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_inserts_new_files() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "foo.bin", &[1, 2, 3, 4]);

        let result = Merger::with_config(quick())
            .merge(std::slice::from_ref(&input), Vec::new())
            .unwrap();

        assert!(result.changed());
        assert_eq!(result.count(FileOutcome::Inserted), 1);
        let entry = &result.entries()[0];
        assert!(entry.is_tagged());
        assert_eq!(entry.element.data, "1,2,3,4,");
        assert_eq!(entry.element.last_modify_time, mtime(&input.path));
    }

    #[test]
    fn test_unchanged_timestamp_is_reused() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "foo.bin", &[1, 2, 3, 4]);
        let prior = Element::new(&input.name, "1,2,3,4,", 4, mtime(&input.path));

        let result = Merger::with_config(quick())
            .merge(&[input], vec![prior.clone()])
            .unwrap();

        assert!(!result.changed());
        assert_eq!(
            result.entries()[0].outcome,
            Some(FileOutcome::Reused(ReuseKind::Timestamp))
        );
        assert_eq!(result.into_elements(), vec![prior]);
    }

    #[test]
    fn test_fast_path_does_not_read_content() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "foo.bin", &[9, 9, 9, 9]);
        // Stale data with a matching timestamp and size is trusted
        let prior = Element::new(&input.name, "1,2,3,4,", 4, mtime(&input.path));

        let result = Merger::with_config(quick())
            .merge(&[input], vec![prior.clone()])
            .unwrap();
        assert_eq!(result.into_elements(), vec![prior]);
    }

    #[test]
    fn test_timestamp_match_size_mismatch_is_fatal() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "foo.bin", &[1, 2, 3, 4, 5]);
        let prior = Element::new(&input.name, "1,2,3,4,", 4, mtime(&input.path));

        let err = Merger::with_config(quick())
            .merge(&[input], vec![prior])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SizeMismatch {
                recorded: 4,
                actual: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_content_fallback_keeps_old_timestamp() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "foo.bin", &[1, 2, 3, 4]);
        set_mtime(&input.path, 1_700_000_000);
        let old_time = Timestamp::from_system_time(SystemTime::UNIX_EPOCH);
        let prior = Element::new(&input.name, "1,2,3,4,", 4, old_time);

        let result = Merger::with_config(quick())
            .merge(&[input], vec![prior.clone()])
            .unwrap();

        assert!(!result.changed());
        assert_eq!(
            result.entries()[0].outcome,
            Some(FileOutcome::Reused(ReuseKind::Content))
        );
        assert_eq!(result.into_elements()[0].last_modify_time, old_time);
    }

    #[test]
    fn test_changed_content_is_updated() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "foo.bin", &[1, 2, 3, 5]);
        set_mtime(&input.path, 1_700_000_000);
        let old_time = Timestamp::from_system_time(SystemTime::UNIX_EPOCH);
        let prior = Element::new(&input.name, "1,2,3,4,", 4, old_time);

        let result = Merger::with_config(quick())
            .merge(std::slice::from_ref(&input), vec![prior])
            .unwrap();

        assert!(result.changed());
        let entry = &result.entries()[0];
        assert_eq!(entry.outcome, Some(FileOutcome::Updated));
        assert!(entry.is_tagged());
        assert_eq!(
            entry.element,
            Element::new(&input.name, "1,2,3,5,", 4, mtime(&input.path))
        );
    }

    #[test]
    fn test_prune_untagged() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "kept.bin", &[1]);
        let kept = Element::new(&input.name, "1,", 1, mtime(&input.path));
        let gone = Element::new("embedded:\\gone.bin", "2,", 1, mtime(&input.path));

        let mut result = Merger::with_config(quick())
            .merge(&[input], vec![gone.clone(), kept.clone()])
            .unwrap();
        assert!(!result.changed());
        assert!(!result.entries()[0].is_tagged());

        let removed = result.prune_untagged();
        assert_eq!(removed, vec![gone.name]);
        assert!(result.changed());
        assert_eq!(result.into_elements(), vec![kept]);
    }

    #[test]
    fn test_order_and_duplicate_prior_names() {
        let dir = TempDir::new().unwrap();
        let ts = Timestamp::from_system_time(SystemTime::UNIX_EPOCH);
        let a1 = Element::new("a", "1,", 1, ts);
        let b = Element::new("b", "2,", 1, ts);
        let a2 = Element::new("a", "3,", 1, ts);
        let input = write(dir.path(), "c.bin", &[7]);

        let result = Merger::with_config(quick())
            .merge(std::slice::from_ref(&input), vec![a1, b.clone(), a2.clone()])
            .unwrap();
        let names: Vec<_> = result.entries().iter().map(|e| e.element.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", input.name.as_str()]);
        assert_eq!(result.entries()[0].element, a2);
    }

    #[test]
    fn test_oversized_file_rejected() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "big.bin", &[0; 17]);
        let config = quick().max_file_size(16);

        let err = Merger::with_config(config)
            .merge(&[input], Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::FileTooLarge { size: 17, max: 16, .. }));
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "exact.bin", &[0; 16]);
        let result = Merger::with_config(quick().max_file_size(16))
            .merge(&[input], Vec::new())
            .unwrap();
        assert_eq!(result.entries()[0].element.size_in_bytes, 16);
    }

    #[test]
    fn test_one_failing_file_aborts_merge() {
        let dir = TempDir::new().unwrap();
        let good = write(dir.path(), "good.bin", &[1]);
        let missing = InputFile::new(dir.path().join("missing.bin"), "embedded:\\missing.bin");
        let config = quick().retry(RetryPolicy::new().attempts(1).delay(Duration::ZERO));

        let err = Merger::with_config(config)
            .merge(&[good, missing], Vec::new())
            .unwrap_err();
        assert!(matches!(err, Error::FileOpen { .. }));
    }

    #[test]
    fn test_transient_open_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let input = write(dir.path(), "locked.bin", &[4, 2]);

        let result = Merger::with_config(quick())
            .with_opener(FlakyOpener::new(3))
            .merge(&[input], Vec::new())
            .unwrap();
        assert_eq!(result.entries()[0].element.data, "4,2,");
    }
}
