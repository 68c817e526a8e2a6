//! # drivesync — bidirectional filesystem synchronizer
//!
//! Reconciles a local filesystem tree against a remote hierarchical object
//! store (folders, files, export-only virtual documents), resolving
//! conflicts and clashes before applying the resulting plan.
//!
//! The concrete wire protocol, OAuth2 bootstrap, and CLI front end are
//! external collaborators; this crate depends only on the `remote::RemoteClient`
//! and `pager::PageFetcher` trait boundaries.

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod clash;
pub mod config;
pub mod conflict;
pub mod crypto;
pub mod diff;
pub mod engine;
pub mod error;
pub mod executors;
pub mod ignore;
pub mod index;
pub mod logging;
pub mod mkdir_cache;
pub mod pager;
pub mod path;
pub mod remote;
pub mod resolve;
pub mod schedule;
pub mod types;
pub mod utils;

pub use config::{Config, Validator};
pub use engine::{sync, EngineOutcome};
pub use error::SyncError;
pub use resolve::{Direction, ResolveOutcome};
pub use schedule::ScheduleOutcome;
pub use types::{Change, File, Operation};

// vim: ts=4
