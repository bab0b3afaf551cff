//! # shardlog core
//!
//! Sharded append-only log store.
//!
//! This crate provides:
//! - A consistent-hash ring that maps group names to logical nodes
//! - Per-node chains of size-capped segment files
//! - Scoped advisory locks that serialize access to each segment file
//! - Node insertion with migration of the groups that change owner
//! - Segment rewrite and chain merge to reclaim space
//!
//! Everything lives in one directory. Several processes may share it: all
//! coordination happens through file names and per-file locks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod config;
mod dir;
mod error;
mod lock;
mod migration;
mod ring;
mod store;
mod types;

pub use compaction::{MergeReport, RewriteStats};
pub use config::{
    parse_size, Config, DEFAULT_LOCK_POLL, DEFAULT_LOCK_WAIT, DEFAULT_MAX_SEGMENT_SIZE,
};
pub use dir::StoreDir;
pub use error::{CoreError, CoreResult};
pub use lock::{LockPolicy, SegmentLock};
pub use migration::MigrationReport;
pub use ring::{hash_group, HashRing, EMPTY_RING_POSITION};
pub use store::LogStore;
pub use types::{NodeId, SegmentId, REWRITE_SUFFIX, SEGMENT_EXTENSION, TEMP_SUFFIX};

pub use shardlog_storage::{Appender, Container, FileBackend, GroupArrays, StorageError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
