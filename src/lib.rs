//! Incremental change-detection poller for append-only message streams.
//!
//! The remote service only offers "most recent N items" per stream. The
//! poller keeps one checkpoint per stream, diffs each freshly fetched page
//! against it and reports only the items that are new since the last
//! observation.

pub mod checkpoint;
pub mod config;
pub mod detector;
pub mod model;
pub mod notifier;
pub mod scheduler;
pub mod source;
