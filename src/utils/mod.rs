//! Utility modules for common functionality

pub mod lock;

pub use lock::{setup_signal_handlers, FileLock};

// vim: ts=4
