//! # shardlog storage
//!
//! Lowest layer of shardlog: raw byte backends and the container format that
//! every segment file uses.
//!
//! Backends are **opaque byte stores** (read, append, flush, truncate). The
//! [`Container`] interprets those bytes as a hierarchical array store:
//! named groups holding named, growable arrays of UTF-8 strings. Hot paths
//! use [`Appender`] and [`read_array`], which never replay the whole log.
//!
//! ## Available Backends
//!
//! - [`FileBackend`] - a segment file on disk, usually bound to a locked handle
//! - [`InMemoryBackend`] - a staging image, used for rewrites and tests
//!
//! ## Example
//!
//! ```rust
//! use shardlog_storage::{Container, InMemoryBackend};
//!
//! let mut container = Container::open(InMemoryBackend::new()).unwrap();
//! container.append("user_1", "scan", &["a".to_string(), "b".to_string()]).unwrap();
//! assert_eq!(container.get("user_1", "scan").unwrap(), ["a", "b"]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod container;
mod error;
mod file;
mod frame;
mod memory;

pub use backend::StorageBackend;
pub use container::{group_names, read_array, Appender, Container, GroupArrays};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use frame::{FRAME_HEADER_SIZE, FRAME_OVERHEAD, FRAME_TRAILER_SIZE, MAX_FRAME_BODY};
pub use memory::InMemoryBackend;
