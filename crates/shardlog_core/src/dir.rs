//! Storage directory layout and segment naming.
//!
//! The store is a single flat directory:
//!
//! ```text
//! <store_path>/
//! ├─ 1234_1.seg        # node 1234, first segment
//! ├─ 1234_2.seg        # node 1234, current segment
//! ├─ 98765_1.seg       # node 98765
//! ├─ 98765_1.seg.new   # staging copy of a rewrite in progress
//! └─ 98765_2.seg.tmp   # segment being replayed by a merge
//! ```
//!
//! Nodes are never recorded anywhere else: the set of nodes is whatever
//! distinct node ids appear in segment file names.

use crate::error::{CoreError, CoreResult};
use crate::types::{NodeId, SegmentId};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Handle on the storage directory.
///
/// Holds no lock: many processes may work in the same directory, and
/// exclusion happens per segment file.
#[derive(Debug, Clone)]
pub struct StoreDir {
    path: PathBuf,
}

impl StoreDir {
    /// Opens (and optionally creates) the storage directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing and `create_if_missing`
    /// is false, if the path is not a directory, or on I/O failure.
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_directory(format!(
                    "storage directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_directory(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of a segment file.
    #[must_use]
    pub fn segment_path(&self, segment: SegmentId) -> PathBuf {
        self.path.join(segment.file_name())
    }

    /// Path a segment is renamed to while a merge replays it.
    #[must_use]
    pub fn temp_path(&self, segment: SegmentId) -> PathBuf {
        self.path.join(segment.temp_file_name())
    }

    /// Path a rewrite stages the new image at.
    #[must_use]
    pub fn rewrite_path(&self, segment: SegmentId) -> PathBuf {
        self.path.join(segment.rewrite_file_name())
    }

    /// Lists every well-formed segment in the directory, sorted.
    pub fn scan_segments(&self) -> CoreResult<Vec<SegmentId>> {
        let mut segments: Vec<SegmentId> = self
            .file_names()?
            .iter()
            .filter_map(|name| SegmentId::parse_file_name(name))
            .collect();
        segments.sort_unstable();
        Ok(segments)
    }

    /// Every distinct node that has at least one segment file, ascending.
    pub fn discover_nodes(&self) -> CoreResult<Vec<NodeId>> {
        let mut nodes: Vec<NodeId> = self.scan_segments()?.iter().map(|s| s.node).collect();
        nodes.dedup();
        Ok(nodes)
    }

    /// The segment chain of `node`, ascending by index.
    pub fn all_segments(&self, node: NodeId) -> CoreResult<Vec<SegmentId>> {
        Ok(self
            .scan_segments()?
            .into_iter()
            .filter(|s| s.node == node)
            .collect())
    }

    /// Returns `(next, current)` for `node`.
    ///
    /// `current` has the highest existing index (0 if the node has no
    /// segment yet) and `next` is the one after it. E.g. with `n_1`, `n_2`,
    /// `n_3` on disk this returns `(n_4, n_3)`.
    pub fn next_and_current(&self, node: NodeId) -> CoreResult<(SegmentId, SegmentId)> {
        let current = self
            .all_segments(node)?
            .last()
            .copied()
            .unwrap_or(SegmentId::new(node, 0));
        Ok((current.next(), current))
    }

    /// Creates an empty segment file.
    ///
    /// Returns false if the file already exists (another writer won the
    /// race to roll over), which callers treat as success.
    pub fn create_segment(&self, segment: SegmentId) -> CoreResult<bool> {
        let created = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.segment_path(segment))
        {
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => false,
            Err(e) => return Err(e.into()),
        };

        if created {
            self.sync_directory()?;
        }
        Ok(created)
    }

    /// On-disk size of a segment, or `None` if it does not exist.
    pub fn segment_size(&self, segment: SegmentId) -> CoreResult<Option<u64>> {
        match fs::metadata(self.segment_path(segment)) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Segments whose temporary merge file is still on disk, sorted.
    pub fn orphaned_temps(&self) -> CoreResult<Vec<SegmentId>> {
        let mut temps: Vec<SegmentId> = self
            .file_names()?
            .iter()
            .filter_map(|name| SegmentId::parse_temp_file_name(name))
            .collect();
        temps.sort_unstable();
        Ok(temps)
    }

    /// Segments with a rewrite staging file on disk, sorted.
    pub fn stale_rewrites(&self) -> CoreResult<Vec<SegmentId>> {
        let mut staged: Vec<SegmentId> = self
            .file_names()?
            .iter()
            .filter_map(|name| SegmentId::parse_rewrite_file_name(name))
            .collect();
        staged.sort_unstable();
        Ok(staged)
    }

    /// Removes a file and makes the removal durable.
    pub fn remove(&self, path: &Path) -> CoreResult<()> {
        fs::remove_file(path)?;
        self.sync_directory()
    }

    fn file_names(&self) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    /// Fsyncs the directory so creates, renames and removals survive a crash.
    #[cfg(unix)]
    pub(crate) fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub(crate) fn sync_directory(&self) -> CoreResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let store_path = temp.path().join("store");

        let dir = StoreDir::open(&store_path, true).unwrap();
        assert!(store_path.is_dir());
        assert_eq!(dir.path(), store_path);
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = StoreDir::open(&temp.path().join("missing"), false);
        assert!(matches!(result, Err(CoreError::InvalidDirectory { .. })));
    }

    #[test]
    fn open_rejects_plain_file() {
        let temp = tempdir().unwrap();
        touch(temp.path(), "not_a_dir");
        let result = StoreDir::open(&temp.path().join("not_a_dir"), true);
        assert!(matches!(result, Err(CoreError::InvalidDirectory { .. })));
    }

    #[test]
    fn discovers_nodes_from_file_names() {
        let temp = tempdir().unwrap();
        for name in [
            "200_1.seg",
            "100_2.seg",
            "100_1.seg",
            "300_1.seg.tmp",
            "400_1.seg.new",
            "notes.txt",
        ] {
            touch(temp.path(), name);
        }

        let dir = StoreDir::open(temp.path(), false).unwrap();
        assert_eq!(
            dir.discover_nodes().unwrap(),
            [NodeId::new(100), NodeId::new(200)]
        );
    }

    #[test]
    fn chain_is_sorted_numerically() {
        let temp = tempdir().unwrap();
        for name in ["7_10.seg", "7_2.seg", "7_1.seg", "70_3.seg"] {
            touch(temp.path(), name);
        }

        let dir = StoreDir::open(temp.path(), false).unwrap();
        let node = NodeId::new(7);
        let indexes: Vec<u64> = dir
            .all_segments(node)
            .unwrap()
            .iter()
            .map(|s| s.index)
            .collect();
        assert_eq!(indexes, [1, 2, 10]);

        let (next, current) = dir.next_and_current(node).unwrap();
        assert_eq!(current, SegmentId::new(node, 10));
        assert_eq!(next, SegmentId::new(node, 11));
    }

    #[test]
    fn next_and_current_for_unknown_node() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), false).unwrap();

        let node = NodeId::new(42);
        let (next, current) = dir.next_and_current(node).unwrap();
        assert_eq!(current.index, 0);
        assert_eq!(next, SegmentId::new(node, 1));
    }

    #[test]
    fn create_segment_is_idempotent() {
        let temp = tempdir().unwrap();
        let dir = StoreDir::open(temp.path(), false).unwrap();
        let segment = SegmentId::new(NodeId::new(9), 1);

        assert!(dir.create_segment(segment).unwrap());
        assert!(!dir.create_segment(segment).unwrap());
        assert_eq!(dir.segment_size(segment).unwrap(), Some(0));
        assert_eq!(dir.segment_size(segment.next()).unwrap(), None);
    }

    #[test]
    fn finds_orphaned_temps() {
        let temp = tempdir().unwrap();
        touch(temp.path(), "5_3.seg.tmp");
        touch(temp.path(), "5_1.seg");

        let dir = StoreDir::open(temp.path(), false).unwrap();
        assert_eq!(
            dir.orphaned_temps().unwrap(),
            [SegmentId::new(NodeId::new(5), 3)]
        );
    }

    #[test]
    fn finds_stale_rewrites() {
        let temp = tempdir().unwrap();
        touch(temp.path(), "5_1.seg");
        touch(temp.path(), "5_1.seg.new");
        touch(temp.path(), "5_2.seg.tmp");

        let dir = StoreDir::open(temp.path(), false).unwrap();
        let segment = SegmentId::new(NodeId::new(5), 1);
        assert_eq!(dir.stale_rewrites().unwrap(), [segment]);
        assert_eq!(dir.rewrite_path(segment), temp.path().join("5_1.seg.new"));
    }
}
