pub mod archive;
pub mod config;
pub mod error;
pub mod executor;
pub mod invocation;
pub mod local;
pub mod log_sanitize;
pub mod modules;
pub mod naming;
pub mod planner;
pub mod remote;
pub mod shell;

pub use error::{Error, Result};
pub use invocation::{BackupOptions, Invocation, Operation, Request};
