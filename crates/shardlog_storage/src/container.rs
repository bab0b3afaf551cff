//! Group/array container stored inside one segment file.
//!
//! A container is a hierarchical array store: named groups, each holding
//! named growable arrays of UTF-8 strings. On disk it is an append-only log
//! of CBOR bodies wrapped in checksummed, length-trailed frames.
//!
//! A body is either an append to one array or the removal of a whole group.
//! Deleting a group only appends a frame, so the file never shrinks on its
//! own; the segment has to be rewritten to reclaim space.
//!
//! There are three ways in:
//!
//! - [`Container`] replays every frame into an in-memory index. Rewrites,
//!   merges and migrations use it.
//! - [`Appender`] checks only the last frame and appends after it.
//! - [`read_array`] and [`group_names`] stream the frames without keeping
//!   an index and never modify the store.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use crate::frame::{self, FrameReader, Step};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Arrays of a single group, keyed by array name.
pub type GroupArrays = BTreeMap<String, Vec<String>>;

#[derive(Serialize)]
enum EntryRef<'a> {
    Append {
        group: &'a str,
        key: &'a str,
        values: &'a [String],
    },
    DropGroup {
        group: &'a str,
    },
}

#[derive(Deserialize)]
enum Entry {
    Append {
        group: String,
        key: String,
        values: Vec<String>,
    },
    DropGroup {
        group: String,
    },
}

/// An [`Entry`] with the values skipped.
#[derive(Deserialize)]
enum EntryHead {
    Append {
        group: String,
        key: String,
        #[allow(dead_code)]
        values: IgnoredAny,
    },
    DropGroup {
        group: String,
    },
}

fn decode<T: DeserializeOwned>(offset: u64, body: &[u8]) -> StorageResult<T> {
    ciborium::from_reader(body).map_err(|e| StorageError::corrupted(offset, e.to_string()))
}

fn write_entry<B: StorageBackend>(backend: &mut B, entry: &EntryRef<'_>) -> StorageResult<()> {
    let mut body = Vec::new();
    ciborium::into_writer(entry, &mut body).map_err(|e| StorageError::Encode(e.to_string()))?;
    backend.append(&frame::encode(&body)?)?;
    Ok(())
}

/// Cuts a torn last frame so appends start on a frame boundary.
fn drop_torn_tail<B: StorageBackend>(backend: &mut B, offset: u64) -> StorageResult<()> {
    let size = backend.size()?;
    warn!(offset, size, "discarding partially written frame");
    backend.truncate(offset)
}

/// An open container over a [`StorageBackend`].
#[derive(Debug)]
pub struct Container<B: StorageBackend> {
    backend: B,
    groups: BTreeMap<String, GroupArrays>,
}

impl<B: StorageBackend> Container<B> {
    /// Opens a container, replaying all frames in `backend`.
    ///
    /// An empty backend is a valid, empty container. A last frame that was
    /// only partially written is cut off so later appends start on a frame
    /// boundary. Nothing else is ever removed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if a frame fails its checks or
    /// cannot be decoded, or an I/O error.
    pub fn open(mut backend: B) -> StorageResult<Self> {
        let mut groups: BTreeMap<String, GroupArrays> = BTreeMap::new();
        let mut reader = FrameReader::new(&backend)?;

        let torn_at = loop {
            match reader.next_step()? {
                Step::Frame { offset, body } => match decode(offset, &body)? {
                    Entry::Append { group, key, values } => {
                        groups
                            .entry(group)
                            .or_default()
                            .entry(key)
                            .or_default()
                            .extend(values);
                    }
                    Entry::DropGroup { group } => {
                        groups.remove(&group);
                    }
                },
                Step::End => break None,
                Step::Torn { offset } => break Some(offset),
            }
        };

        if let Some(offset) = torn_at {
            drop_torn_tail(&mut backend, offset)?;
        }

        Ok(Self { backend, groups })
    }

    /// Returns the names of all groups, in ascending order.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Returns the arrays of `group`, if present.
    #[must_use]
    pub fn group(&self, group: &str) -> Option<&GroupArrays> {
        self.groups.get(group)
    }

    /// Returns the array keys of `group`, in ascending order.
    pub fn keys<'a>(&'a self, group: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.groups
            .get(group)
            .into_iter()
            .flat_map(|arrays| arrays.keys().map(String::as_str))
    }

    /// Returns whether `group` exists.
    #[must_use]
    pub fn contains_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Returns the full content of one array.
    #[must_use]
    pub fn get(&self, group: &str, key: &str) -> Option<&[String]> {
        self.groups
            .get(group)
            .and_then(|arrays| arrays.get(key))
            .map(Vec::as_slice)
    }

    /// Number of live groups.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Returns true when the container has no live groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Appends `values` to the end of `group/key`, creating either on demand.
    ///
    /// The values are written as one frame, so they are never interleaved
    /// with another batch.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the append fails.
    pub fn append(&mut self, group: &str, key: &str, values: &[String]) -> StorageResult<()> {
        write_entry(&mut self.backend, &EntryRef::Append { group, key, values })?;
        self.groups
            .entry(group.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(values);
        Ok(())
    }

    /// Removes `group` and all its arrays.
    ///
    /// Returns false if the group did not exist; nothing is written then.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the append fails.
    pub fn delete_group(&mut self, group: &str) -> StorageResult<bool> {
        if !self.groups.contains_key(group) {
            return Ok(false);
        }
        write_entry(&mut self.backend, &EntryRef::DropGroup { group })?;
        self.groups.remove(group);
        Ok(true)
    }

    /// Copies every array of `group` from `source` into this container.
    ///
    /// Returns false if `source` has no such group.
    ///
    /// # Errors
    ///
    /// Returns an error if an append fails.
    pub fn copy_group_from<S: StorageBackend>(
        &mut self,
        source: &Container<S>,
        group: &str,
    ) -> StorageResult<bool> {
        let Some(arrays) = source.group(group) else {
            return Ok(false);
        };
        for (key, values) in arrays {
            self.append(group, key, values)?;
        }
        Ok(true)
    }

    /// Flushes pending writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.backend.flush()
    }

    /// Makes all writes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.backend.sync()
    }

    /// Current size of the underlying store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Consumes the container and returns its backend.
    pub fn into_backend(self) -> B {
        self.backend
    }
}

/// Append-only handle on a container.
///
/// Opening checks the last frame only, so the cost of an append does not
/// depend on how much the store already holds.
#[derive(Debug)]
pub struct Appender<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> Appender<B> {
    /// Opens `backend` for appending.
    ///
    /// If the store does not end on a complete frame, it is scanned once and
    /// a torn last frame is cut off.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Corrupted`] if the store does not end cleanly
    /// and the damage is more than a torn last frame.
    pub fn open(mut backend: B) -> StorageResult<Self> {
        if !frame::ends_cleanly(&backend)? {
            let end = frame::valid_end(&backend)?;
            if end < backend.size()? {
                drop_torn_tail(&mut backend, end)?;
            }
        }
        Ok(Self { backend })
    }

    /// Appends `values` to the end of `group/key` as one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the append fails.
    pub fn append(&mut self, group: &str, key: &str, values: &[String]) -> StorageResult<()> {
        write_entry(&mut self.backend, &EntryRef::Append { group, key, values })
    }

    /// Flushes pending writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> StorageResult<()> {
        self.backend.flush()
    }

    /// Current size of the underlying store in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> StorageResult<u64> {
        self.backend.size()
    }

    /// Consumes the appender and returns its backend.
    pub fn into_backend(self) -> B {
        self.backend
    }
}

/// Reads the full content of `group/key` by streaming the frames.
///
/// Only the values of the requested array are decoded. A torn last frame is
/// ignored and left in place.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] if a frame fails its checks.
pub fn read_array<B: StorageBackend>(
    backend: &B,
    group: &str,
    key: &str,
) -> StorageResult<Option<Vec<String>>> {
    let mut reader = FrameReader::new(backend)?;
    let mut found: Option<Vec<String>> = None;

    while let Step::Frame { offset, body } = reader.next_step()? {
        match decode(offset, &body)? {
            EntryHead::Append { group: g, key: k, .. } if g == group && k == key => {
                if let Entry::Append { values, .. } = decode(offset, &body)? {
                    found.get_or_insert_with(Vec::new).extend(values);
                }
            }
            EntryHead::DropGroup { group: g } if g == group => found = None,
            _ => {}
        }
    }
    Ok(found)
}

/// Names of the live groups, ascending, by streaming the frames.
///
/// # Errors
///
/// Returns [`StorageError::Corrupted`] if a frame fails its checks.
pub fn group_names<B: StorageBackend>(backend: &B) -> StorageResult<Vec<String>> {
    let mut reader = FrameReader::new(backend)?;
    let mut names = BTreeSet::new();

    while let Step::Frame { offset, body } = reader.next_step()? {
        match decode(offset, &body)? {
            EntryHead::Append { group, .. } => {
                names.insert(group);
            }
            EntryHead::DropGroup { group } => {
                names.remove(&group);
            }
        }
    }
    Ok(names.into_iter().collect())
}
