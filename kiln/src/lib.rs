#![forbid(unsafe_code)]

//! Kiln: an incremental build cache engine.
//!
//! A build is a directed acyclic graph of named tasks. Each task declares its inputs (files,
//! directory trees, and scalar values such as tool versions), its output paths, and an action that
//! produces the outputs. Between invocations, a fingerprint ledger remembers what each task last
//! consumed; a build invocation fingerprints the declared inputs, computes the minimal dirty set,
//! and re-executes only that set, satisfying tasks from a content-addressed artifact cache where
//! possible. Everything else is skipped as up-to-date, with outputs left byte-for-byte untouched.
//!
//! The engine is sound and minimal with respect to declared inputs: a task re-executes if and only
//! if a declared input's fingerprint changed, an output went missing, or an upstream producer
//! re-executed. Fingerprints are pure functions of content; modification times only serve as a
//! pre-filter to skip re-hashing.

pub mod build;
pub mod cache;
pub mod error;
pub mod fingerprint;
mod fs;
pub mod graph;
pub mod invalidate;
pub mod ledger;
pub mod report;
pub mod task;
pub mod tracker;

pub use build::{BuildContext, BuildOptions};
pub use cache::ArtifactCache;
pub use error::{ActionError, BuildError, CacheError, FingerprintError, GraphError, OptionsError};
pub use fingerprint::{Fingerprint, Input};
pub use graph::{BuildGraph, FrozenGraph, TaskId};
pub use invalidate::DirtyReason;
pub use ledger::Ledger;
pub use report::BuildReport;
pub use task::{Action, ActionContext, TaskSpec, TaskStatus};
pub use tracker::Tracker;
