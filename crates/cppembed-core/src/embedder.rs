//! Run orchestration.
//!
//! [`Embedder::run`] ties the components together: load the previous output
//! (unless rebuilding clean), merge the inputs into it, prune entries that
//! are no longer discovered (unless appending), and rewrite the output only
//! when something changed.

use crate::element::SessionId;
use crate::error::{Error, Result};
use crate::format::{self, Emitter, ParsedOutput, TextEncoding};
use crate::merge::{FileOutcome, InputFile, MergeConfig, MergeResult, Merger, ReuseKind, SourceOpener};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How previously embedded entries that are not rediscovered are treated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergeMode {
    /// Drop entries whose input is gone
    #[default]
    Overwrite,
    /// Keep entries whose input is gone
    Append,
}

/// Configuration for a run
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Path of the generated output
    pub output: PathBuf,
    /// Treatment of entries that are no longer discovered
    pub mode: MergeMode,
    /// Ignore the previous output entirely
    pub clean: bool,
    /// Encoding used when writing
    pub encoding: TextEncoding,
    /// Decide what would change without writing
    pub dry_run: bool,
    /// Merge engine settings
    pub merge: MergeConfig,
}

impl EmbedderConfig {
    /// Creates a new config writing to `output`
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            mode: MergeMode::default(),
            clean: false,
            encoding: TextEncoding::default(),
            dry_run: false,
            merge: MergeConfig::default(),
        }
    }

    /// Sets the merge mode
    pub fn mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets whether to skip reading the previous output
    pub fn clean(mut self, clean: bool) -> Self {
        self.clean = clean;
        self
    }

    /// Sets the output encoding
    pub fn encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Sets dry-run mode
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the merge engine settings
    pub fn merge(mut self, merge: MergeConfig) -> Self {
        self.merge = merge;
        self
    }

    /// Checks the configuration before any file is touched
    pub fn validate(&self) -> Result<()> {
        if self.output.as_os_str().is_empty() {
            return Err(Error::invalid_config("output path is empty"));
        }
        if self.output.is_dir() {
            return Err(Error::invalid_config(format!(
                "output path '{}' is a directory",
                self.output.display()
            )));
        }
        if self.merge.max_file_size == 0 {
            return Err(Error::invalid_config("maximum file size must be positive"));
        }
        Ok(())
    }
}

/// Final state of the output after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Output rewritten with `count` elements
    Written {
        /// Number of elements in the output
        count: usize,
    },
    /// Nothing changed, output left untouched
    UpToDate,
    /// Dry run that would have rewritten the output
    WouldWrite {
        /// Number of elements the output would hold
        count: usize,
    },
}

/// Summary of a run
#[derive(Debug, Clone)]
pub struct EmbedReport {
    /// Output path
    pub output: PathBuf,
    /// Session token used for symbol names
    pub session: SessionId,
    /// What happened to the output
    pub status: RunStatus,
    /// Names of new elements
    pub inserted: Vec<String>,
    /// Names of recaptured elements
    pub updated: Vec<String>,
    /// Number of elements kept from the previous output
    pub reused: usize,
    /// Names of elements dropped because their input is gone
    pub removed: Vec<String>,
}

impl EmbedReport {
    /// Returns true if the output was, or would have been, rewritten
    pub fn changed(&self) -> bool {
        !matches!(self.status, RunStatus::UpToDate)
    }
}

/// Runs incremental embedding into one output file
#[derive(Debug)]
pub struct Embedder {
    config: EmbedderConfig,
    merger: Merger,
}

impl Embedder {
    /// Creates an embedder, validating the configuration
    pub fn new(config: EmbedderConfig) -> Result<Self> {
        config.validate()?;
        let merger = Merger::with_config(config.merge.clone());
        Ok(Self { config, merger })
    }

    /// Replaces the file opener used for inputs
    pub fn with_opener(mut self, opener: impl SourceOpener + 'static) -> Self {
        self.merger = self.merger.with_opener(opener);
        self
    }

    /// Returns the configuration
    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Embeds `inputs` into the output.
    ///
    /// Either the complete new output is written or the existing file is
    /// left exactly as it was.
    pub fn run(&self, inputs: &[InputFile]) -> Result<EmbedReport> {
        let output = &self.config.output;
        validate_inputs(inputs)?;

        let prior = if self.config.clean {
            debug!("Clean rebuild, ignoring {}", output.display());
            ParsedOutput::empty()
        } else {
            format::load_prior(output)
        };
        let session = prior.session.unwrap_or_else(SessionId::generate);

        let mut merged = self.merger.merge(inputs, prior.elements)?;
        let removed = match self.config.mode {
            MergeMode::Overwrite => merged.prune_untagged(),
            MergeMode::Append => Vec::new(),
        };

        let (inserted, updated, reused) = summarize(&merged);
        let status = if !merged.changed() {
            info!("No modifications detected, '{}' is up to date", output.display());
            RunStatus::UpToDate
        } else {
            let elements = merged.into_elements();
            let count = elements.len();
            if self.config.dry_run {
                RunStatus::WouldWrite { count }
            } else {
                Emitter::new(&elements, &session).write_file(output, self.config.encoding)?;
                info!("{} files embedded into '{}'", count, output.display());
                RunStatus::Written { count }
            }
        };

        Ok(EmbedReport {
            output: output.clone(),
            session,
            status,
            inserted,
            updated,
            reused,
            removed,
        })
    }
}

fn validate_inputs(inputs: &[InputFile]) -> Result<()> {
    for input in inputs {
        if input.name.is_empty() {
            return Err(Error::invalid_config(format!(
                "empty logical name for '{}'",
                input.path.display()
            )));
        }
        if input.path.as_os_str().is_empty() {
            return Err(Error::invalid_config(format!(
                "empty path for logical name '{}'",
                input.name
            )));
        }
    }
    Ok(())
}

fn summarize(merged: &MergeResult) -> (Vec<String>, Vec<String>, usize) {
    let names = |outcome: FileOutcome| -> Vec<String> {
        merged
            .entries()
            .iter()
            .filter(|e| e.outcome == Some(outcome))
            .map(|e| e.element.name.clone())
            .collect()
    };
    let reused = merged.count(FileOutcome::Reused(ReuseKind::Timestamp))
        + merged.count(FileOutcome::Reused(ReuseKind::Content));
    (
        names(FileOutcome::Inserted),
        names(FileOutcome::Updated),
        reused,
    )
}

/// Convenience wrapper: embeds `inputs` into `output` with default settings
pub fn embed(output: impl AsRef<Path>, inputs: &[InputFile]) -> Result<EmbedReport> {
    Embedder::new(EmbedderConfig::new(output.as_ref()))?.run(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Timestamp;
    use crate::format::read_output;
    use crate::merge::RetryPolicy;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        output: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let output = dir.path().join("embedded.inc");
            Self { dir, output }
        }

        fn input(&self, name: &str, bytes: &[u8]) -> InputFile {
            let path = self.dir.path().join(name);
            fs::write(&path, bytes).unwrap();
            InputFile::new(path, format!("embedded:\\{}", name))
        }

        fn config(&self) -> EmbedderConfig {
            EmbedderConfig::new(&self.output)
                .merge(MergeConfig::new().retry(RetryPolicy::new().delay(Duration::ZERO)))
        }

        fn run(&self, config: EmbedderConfig, inputs: &[InputFile]) -> Result<EmbedReport> {
            Embedder::new(config)?.run(inputs)
        }
    }

    fn set_mtime(path: &Path, secs: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
            .unwrap();
    }

    #[test]
    fn test_second_run_is_up_to_date() {
        let fx = Fixture::new();
        let inputs = vec![fx.input("foo.bin", &[1, 2, 3, 4]), fx.input("bar.bin", &[])];

        let first = fx.run(fx.config(), &inputs).unwrap();
        assert_eq!(first.status, RunStatus::Written { count: 2 });
        assert_eq!(first.inserted.len(), 2);
        let written = fs::read(&fx.output).unwrap();

        let second = fx.run(fx.config(), &inputs).unwrap();
        assert_eq!(second.status, RunStatus::UpToDate);
        assert_eq!(second.reused, 2);
        assert_eq!(second.session, first.session);
        assert_eq!(fs::read(&fx.output).unwrap(), written);
    }

    #[test]
    fn test_changed_file_is_regenerated() {
        let fx = Fixture::new();
        let input = fx.input("foo.bin", &[1, 2, 3, 4]);
        set_mtime(&input.path, 1_600_000_000);
        let first = fx.run(fx.config(), std::slice::from_ref(&input)).unwrap();

        fs::write(&input.path, [1, 2, 3, 5]).unwrap();
        set_mtime(&input.path, 1_700_000_000);
        let second = fx.run(fx.config(), std::slice::from_ref(&input)).unwrap();

        assert_eq!(second.status, RunStatus::Written { count: 1 });
        assert_eq!(second.updated, vec![input.name.clone()]);
        assert_eq!(second.session, first.session);

        let parsed = read_output(&fx.output).unwrap();
        let element = &parsed.elements[0];
        assert_eq!(element.data, "1,2,3,5,");
        assert_eq!(element.size_in_bytes, 4);
        assert_eq!(
            element.last_modify_time,
            Timestamp::from_system_time(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
        );
    }

    #[test]
    fn test_touched_but_identical_file_is_up_to_date() {
        let fx = Fixture::new();
        let input = fx.input("foo.bin", &[1, 2, 3, 4]);
        set_mtime(&input.path, 1_600_000_000);
        fx.run(fx.config(), std::slice::from_ref(&input)).unwrap();
        let written = fs::read(&fx.output).unwrap();

        set_mtime(&input.path, 1_700_000_000);
        let report = fx.run(fx.config(), std::slice::from_ref(&input)).unwrap();

        assert_eq!(report.status, RunStatus::UpToDate);
        assert_eq!(fs::read(&fx.output).unwrap(), written);
    }

    #[test]
    fn test_overwrite_prunes_and_append_retains() {
        let fx = Fixture::new();
        let foo = fx.input("foo.bin", &[1]);
        let bar = fx.input("bar.bin", &[2]);
        fx.run(fx.config(), &[foo.clone(), bar.clone()]).unwrap();

        let appended = fx
            .run(fx.config().mode(MergeMode::Append), std::slice::from_ref(&foo))
            .unwrap();
        assert_eq!(appended.status, RunStatus::UpToDate);
        assert!(appended.removed.is_empty());

        let pruned = fx.run(fx.config(), std::slice::from_ref(&foo)).unwrap();
        assert_eq!(pruned.status, RunStatus::Written { count: 1 });
        assert_eq!(pruned.removed, vec![bar.name.clone()]);
        let names: Vec<_> = read_output(&fx.output)
            .unwrap()
            .elements
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![foo.name]);
    }

    #[test]
    fn test_oversized_input_leaves_output_untouched() {
        let fx = Fixture::new();
        let small = fx.input("small.bin", &[1]);
        fx.run(fx.config(), std::slice::from_ref(&small)).unwrap();
        let written = fs::read(&fx.output).unwrap();

        let big = fx.input("big.bin", &[0; 64]);
        let config = fx
            .config()
            .merge(MergeConfig::new().max_file_size(32).retry(RetryPolicy::new().delay(Duration::ZERO)));
        let err = fx.run(config, &[small, big]).unwrap_err();

        assert!(matches!(err, Error::FileTooLarge { .. }));
        assert_eq!(fs::read(&fx.output).unwrap(), written);
    }

    #[test]
    fn test_clean_rebuild_recaptures_everything() {
        let fx = Fixture::new();
        let input = fx.input("foo.bin", &[1, 2]);
        let first = fx.run(fx.config(), std::slice::from_ref(&input)).unwrap();

        let report = fx
            .run(fx.config().clean(true), std::slice::from_ref(&input))
            .unwrap();
        assert_eq!(report.status, RunStatus::Written { count: 1 });
        assert_eq!(report.inserted, vec![input.name.clone()]);
        assert_ne!(report.session, first.session);
    }

    #[test]
    fn test_corrupt_output_is_rebuilt() {
        let fx = Fixture::new();
        let input = fx.input("foo.bin", &[1, 2]);
        fx.run(fx.config(), std::slice::from_ref(&input)).unwrap();
        let text: String = fs::read_to_string(&fx.output)
            .unwrap()
            .lines()
            .filter(|l| !l.ends_with("[] = {1,2,};"))
            .map(|l| format!("{}\n", l))
            .collect();
        fs::write(&fx.output, text).unwrap();

        let report = fx.run(fx.config(), std::slice::from_ref(&input)).unwrap();
        assert_eq!(report.status, RunStatus::Written { count: 1 });
        assert_eq!(read_output(&fx.output).unwrap().elements[0].data, "1,2,");
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let fx = Fixture::new();
        let input = fx.input("foo.bin", &[1]);
        let report = fx.run(fx.config().dry_run(true), &[input]).unwrap();
        assert_eq!(report.status, RunStatus::WouldWrite { count: 1 });
        assert!(report.changed());
        assert!(!fx.output.exists());
    }

    #[test]
    fn test_empty_input_set_without_output_is_up_to_date() {
        let fx = Fixture::new();
        let report = fx.run(fx.config(), &[]).unwrap();
        assert_eq!(report.status, RunStatus::UpToDate);
        assert!(!fx.output.exists());
    }

    #[test]
    fn test_invalid_configuration() {
        let fx = Fixture::new();
        assert!(matches!(
            Embedder::new(EmbedderConfig::new("")),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Embedder::new(EmbedderConfig::new(fx.dir.path())),
            Err(Error::InvalidConfig(_))
        ));

        let unnamed = InputFile::new(fx.dir.path().join("x.bin"), "");
        assert!(matches!(
            fx.run(fx.config(), &[unnamed]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_embed_convenience() {
        let fx = Fixture::new();
        let input = fx.input("foo.bin", &[3]);
        let report = embed(&fx.output, &[input]).unwrap();
        assert_eq!(report.status, RunStatus::Written { count: 1 });
    }
}
