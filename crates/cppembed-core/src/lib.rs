//! # cppembed-core
//!
//! A library for embedding binary files into a generated C++ source file and
//! regenerating that file incrementally.
//!
//! This crate provides the core functionality for:
//! - Reading a previously generated file back into its embedded elements
//! - Deciding per input file whether the previous capture is still valid
//! - Writing a deterministic replacement only when something changed
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`element`]: Embedded element model, timestamps and session tokens
//! - [`format`]: Output grammar, parser and emitter
//! - [`merge`]: Scan and merge engine
//! - [`embedder`]: Run orchestration
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use cppembed_core::{Embedder, EmbedderConfig, InputFile, MergeMode, RunStatus};
//!
//! let inputs = vec![InputFile::new("assets/logo.png", "embedded:\\logo.png")];
//! let config = EmbedderConfig::new("src/embedded.inc").mode(MergeMode::Overwrite);
//!
//! let report = Embedder::new(config)?.run(&inputs)?;
//! if report.status == RunStatus::UpToDate {
//!     println!("nothing to do");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! [`SourceOpener`] controls how input files are opened, for example to
//! share them differently with other processes.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod element;
pub mod embedder;
pub mod error;
pub mod format;
pub mod merge;

// Re-export primary types for convenience
pub use element::{Element, SessionId, Timestamp};
pub use embedder::{embed, EmbedReport, Embedder, EmbedderConfig, MergeMode, RunStatus};
pub use error::{Error, Result};
pub use format::{Emitter, ParsedOutput, TextEncoding};
pub use merge::{
    FileOutcome, InputFile, MergeConfig, MergeResult, Merger, RetryPolicy, ReuseKind,
    SharedReadOpener, SourceOpener,
};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
