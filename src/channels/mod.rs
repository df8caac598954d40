pub mod cli;
pub mod traits;

pub use cli::CliChannel;
pub use traits::ReplySink;
