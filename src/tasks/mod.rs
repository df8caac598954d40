pub mod tracker;

pub use tracker::{PendingTask, TaskError, TaskId, TaskTracker, TaskTrackerStats};
