//! Run lifecycle events.
//!
//! The runner reports every stage transition to an [`EventSink`]. Event
//! payloads are JSON objects carrying at least the `stage` (or `pipeline`)
//! name.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// A stage was scheduled and is about to run.
pub const STAGE_STARTED: &str = "stage.started";
/// A stage's transformer ran and produced outputs.
pub const STAGE_COMPLETED: &str = "stage.completed";
/// A stage's persisted output was reused instead of running it.
pub const STAGE_REUSED: &str = "stage.reused";
/// A stage failed; the run stops.
pub const STAGE_FAILED: &str = "stage.failed";
/// Every required stage finished.
pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
