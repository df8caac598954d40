pub mod identity;
pub mod registry;
pub mod timer;
pub mod traits;

pub use identity::WorkerIdentity;
pub use registry::{AcquirePolicy, WorkerRegistry};
pub use timer::{TimerError, TimerWorker};
pub use traits::Worker;
