pub mod schema;

pub use schema::{AuthConfig, CommandsConfig, Config, RuntimeConfig, TimerConfig};
