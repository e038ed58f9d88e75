//! Input set resolution.
//!
//! Turns `--input` arguments into the `(path, logical name)` pairs the core
//! consumes. An argument is `[PREFIX=]PATH`; when the last component of PATH
//! contains a wildcard, the parent directory is searched for matching file
//! names, otherwise PATH names a single file.

use anyhow::{bail, Context, Result};
use cppembed_core::InputFile;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Prefix used when an input set does not name one
pub const DEFAULT_PREFIX: &str = "embedded:\\";

/// Separator between the prefix and the path of an input set
const PREFIX_SEPARATOR: char = '=';

/// Separator used inside logical names
const NAME_SEPARATOR: char = '\\';

/// One `--input` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSet {
    /// Prefix for logical names, `None` for the default
    pub prefix: Option<String>,
    /// Single file or directory search
    pub source: InputSource,
}

/// Where the files of an input set come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// One file, embedded under its file name
    File(PathBuf),
    /// Files in `directory` whose names match `pattern`
    Search {
        /// Root of the search
        directory: PathBuf,
        /// Wildcard pattern for file names
        pattern: String,
    },
}

impl FromStr for InputSet {
    type Err = String;

    /// Parses `[PREFIX=]PATH`.
    ///
    /// The first `=` separates the prefix unless the text before it contains
    /// a `/`, so `assets/a=b.bin` is a plain path. Other paths containing `=`
    /// need an explicit prefix, e.g. `embedded:\=a=b.bin`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (prefix, path) = match s.split_once(PREFIX_SEPARATOR) {
            Some((prefix, path)) if !prefix.contains('/') => (Some(prefix.to_string()), path),
            _ => (None, s),
        };
        let path = path.trim();
        if path.is_empty() {
            return Err(format!("input '{}' has no path", s));
        }

        let path = Path::new(path);
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("input '{}' does not end in a file name", s))?;
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());

        if parent.and_then(Path::to_str).is_some_and(is_wildcard) {
            return Err(format!(
                "input '{}': wildcards are only allowed in the file name",
                s
            ));
        }

        let source = if is_wildcard(file_name) {
            InputSource::Search {
                directory: parent.map_or_else(|| PathBuf::from("."), Path::to_path_buf),
                pattern: file_name.to_string(),
            }
        } else {
            InputSource::File(path.to_path_buf())
        };

        Ok(InputSet { prefix, source })
    }
}

fn is_wildcard(s: &str) -> bool {
    s.contains(['*', '?'])
}

/// Resolves all input sets, in argument order
pub fn resolve(sets: &[InputSet], default_prefix: &str, recursive: bool) -> Result<Vec<InputFile>> {
    let mut files = Vec::new();
    for set in sets {
        let prefix = set.prefix.as_deref().unwrap_or(default_prefix);
        let before = files.len();
        resolve_set(&set.source, prefix, recursive, &mut files)?;
        debug!("{:?}: found {} file(s)", set.source, files.len() - before);
    }
    Ok(files)
}

fn resolve_set(
    source: &InputSource,
    prefix: &str,
    recursive: bool,
    out: &mut Vec<InputFile>,
) -> Result<()> {
    match source {
        InputSource::File(path) => {
            if !path.is_file() {
                bail!("Unable to open file '{}'", path.display());
            }
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .with_context(|| format!("File name is not valid UTF-8: {}", path.display()))?;
            out.push(InputFile::new(path, format!("{}{}", prefix, file_name)));
        }
        InputSource::Search { directory, pattern } => {
            if !directory.is_dir() {
                bail!("Directory does not exist: {}", directory.display());
            }
            let max_depth = if recursive { usize::MAX } else { 1 };

            for entry in WalkDir::new(directory)
                .min_depth(1)
                .max_depth(max_depth)
                .follow_links(true)
                .sort_by_file_name()
            {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping unreadable entry: {}", e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Some(file_name) = entry.file_name().to_str() else {
                    warn!("Skipping non-UTF-8 file name: {}", entry.path().display());
                    continue;
                };
                if !glob_match::glob_match(pattern, file_name) {
                    continue;
                }

                let relative = entry
                    .path()
                    .strip_prefix(directory)
                    .with_context(|| format!("{} escapes search root", entry.path().display()))?;
                let name = logical_name(prefix, relative)?;
                out.push(InputFile::new(entry.path(), name));
            }
        }
    }
    Ok(())
}

/// Joins `prefix` and the components of `relative` with backslashes
fn logical_name(prefix: &str, relative: &Path) -> Result<String> {
    let mut name = String::from(prefix);
    for (i, component) in relative.components().enumerate() {
        let Component::Normal(part) = component else {
            bail!("Unexpected path component in {}", relative.display());
        };
        let part = part
            .to_str()
            .with_context(|| format!("Path is not valid UTF-8: {}", relative.display()))?;
        if i > 0 {
            name.push(NAME_SEPARATOR);
        }
        name.push_str(part);
    }
    Ok(name)
}
