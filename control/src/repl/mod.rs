//! Repl lifecycle orchestration.

mod service;

pub use service::{ReplConfig, ReplError, ReplService};
