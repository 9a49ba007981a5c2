//! I/O adapters for the repair engine: filesystem, child processes and ports.

pub mod backend;
pub mod config;
pub mod file_guard;
pub mod init;
pub mod process;
pub mod prompt;
pub mod recorder;
pub mod test_runner;
