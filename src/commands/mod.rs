//! Commands: descriptors, argument contracts, unit loading and the
//! registry that routes events to handlers.

pub mod args;
pub mod builtin;
pub mod descriptor;
pub mod discovery;
pub mod loader;
pub mod native;
pub mod registry;

pub use descriptor::{
    AcceptedCounts, ArgContract, CommandContext, CommandDescriptor, CommandFlags, CommandHandler,
    SplitRule, handler_fn,
};
pub use discovery::LoadReport;
pub use loader::{DynamicUnitLoader, EntryFn, UnitHandle};
pub use native::NativeUnitLoader;
pub use registry::{CommandInfo, PluginRegistry};
