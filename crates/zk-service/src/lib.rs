//! # zk-service
//!
//! The zettel service and the machinery behind it:
//! - [`config`]: layered settings (defaults, `zk.toml`, environment, flags)
//! - [`sync`]: file-first writes, staleness checks and index rebuilds
//! - [`service`]: note, link and graph operations over both stores

pub mod config;
pub mod service;
pub mod sync;

pub use config::{Config, Overrides};
pub use service::{NewNote, NoteUpdate, Status, ZettelService};
pub use sync::{Drift, RebuildIssue, RebuildReport, Synchronizer};
