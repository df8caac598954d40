//! Fan-out of every inbound event to passive observers.

pub mod dispatcher;
pub mod observers;
pub mod traits;

pub use dispatcher::{BROADCAST_LABEL, BroadcastDispatcher, ObserverToken};
pub use observers::{ChatLogObserver, FnObserver};
pub use traits::{Observer, Verdict};
