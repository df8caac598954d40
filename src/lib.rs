#![warn(clippy::all, clippy::pedantic)]
#![deny(unsafe_code)]

//! Chat-bot host runtime: command units loaded from shared libraries at
//! runtime, a registry of long-lived background workers, and a broadcast
//! fan-out of inbound events, all executed on a shared task pool.

pub mod auth;
pub mod broadcast;
pub mod channels;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod runtime;
pub mod tasks;
pub mod util;
pub mod workers;

pub use config::Config;
pub use error::RuntimeError;
pub use event::{InboundEvent, Sender};
pub use runtime::BotRuntime;
