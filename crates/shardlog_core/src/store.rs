//! Record store: placement, rollover and locked access to segments.

use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::{CoreError, CoreResult};
use crate::lock::{LockPolicy, SegmentLock};
use crate::ring::HashRing;
use crate::types::{NodeId, SegmentId};
use parking_lot::RwLock;
use std::path::Path;
use tracing::{debug, info};

/// The main store handle.
///
/// `LogStore` routes every group to its owning node via the hash ring,
/// picks the node's current segment (rolling over to a fresh one when the
/// current one is full) and performs the access under the segment's
/// advisory lock.
///
/// The ring is loaded from the directory when the store is opened and is
/// refreshed explicitly after membership changes. Several `LogStore`s, in
/// one process or many, may share a directory.
///
/// # Example
///
/// ```rust,no_run
/// use shardlog_core::{Config, LogStore};
/// use std::path::Path;
///
/// let store = LogStore::open(Path::new("data"), Config::new().max_segment_size_str("36m"))?;
/// if store.nodes().is_empty() {
///     store.add_node()?;
/// }
/// store.write("user_100", "scan-1", &["first".to_string(), "123".to_string()])?;
/// let values = store.read(1, "user_100", "scan-1")?;
/// # Ok::<(), shardlog_core::CoreError>(())
/// ```
#[derive(Debug)]
pub struct LogStore {
    pub(crate) dir: StoreDir,
    pub(crate) config: Config,
    pub(crate) ring: RwLock<HashRing>,
}

impl LogStore {
    /// Opens the store in `path`.
    ///
    /// Scans the directory for segment files to build the ring, restores
    /// segments left behind by an interrupted merge and removes staging
    /// files of an interrupted rewrite.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened or scanned.
    pub fn open(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        let ring = HashRing::from_nodes(dir.discover_nodes()?);
        let store = Self {
            dir,
            config,
            ring: RwLock::new(ring),
        };

        let restored = store.recover_orphans()?;
        let cleaned = store.remove_stale_rewrites()?;
        info!(
            path = %path.display(),
            nodes = store.ring.read().len(),
            restored = restored.len(),
            cleaned,
            "store opened"
        );
        Ok(store)
    }

    /// Returns the store configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the storage directory.
    #[must_use]
    pub fn dir(&self) -> &StoreDir {
        &self.dir
    }

    /// Rebuilds the ring from the segment files currently on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned.
    pub fn refresh(&self) -> CoreResult<()> {
        let ring = HashRing::from_nodes(self.dir.discover_nodes()?);
        *self.ring.write() = ring;
        Ok(())
    }

    /// A snapshot of the ring.
    #[must_use]
    pub fn ring(&self) -> HashRing {
        self.ring.read().clone()
    }

    /// All nodes in ascending order.
    #[must_use]
    pub fn nodes(&self) -> Vec<NodeId> {
        self.ring.read().nodes().to_vec()
    }

    /// The node that owns `group`, or `None` if there are no nodes yet.
    #[must_use]
    pub fn belong_to(&self, group: &str) -> Option<NodeId> {
        self.ring.read().owner_of(group)
    }

    /// The segment chain of `node`, ascending.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be scanned.
    pub fn segments(&self, node: NodeId) -> CoreResult<Vec<SegmentId>> {
        self.dir.all_segments(node)
    }

    /// Creates the next segment of `node` and refreshes the ring.
    ///
    /// For a node without segments this creates segment 1, which also makes
    /// the node a member of the ring.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure.
    pub fn create_segment_for(&self, node: NodeId) -> CoreResult<SegmentId> {
        let (next, _) = self.dir.next_and_current(node)?;
        self.dir.create_segment(next)?;
        self.refresh()?;
        Ok(next)
    }

    /// Appends `values` to `group/key`.
    ///
    /// Returns `Ok(false)` if the target segment could not be locked within
    /// the configured wait; nothing is written then and the caller may retry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyRing`] if there are no nodes, or an error
    /// on I/O or container failure.
    pub fn write(&self, group: &str, key: &str, values: &[String]) -> CoreResult<bool> {
        self.write_group(group, [(key, values)])
    }

    /// Appends several arrays of one group under a single lock.
    ///
    /// Like [`LogStore::write`], the rollover check happens once, so all
    /// arrays land in the same segment. Migration and merge relocate whole
    /// groups through this path.
    ///
    /// # Errors
    ///
    /// Same as [`LogStore::write`].
    pub fn write_group<K, V>(
        &self,
        group: &str,
        arrays: impl IntoIterator<Item = (K, V)>,
    ) -> CoreResult<bool>
    where
        K: AsRef<str>,
        V: AsRef<[String]>,
    {
        let owner = self
            .belong_to(group)
            .ok_or_else(|| CoreError::empty_ring(group))?;
        let target = self.writable_segment(owner)?;

        let Some(lock) = SegmentLock::acquire(&self.dir.segment_path(target), self.lock_policy())?
        else {
            debug!(%target, group, "write abandoned: segment busy or gone");
            return Ok(false);
        };

        let mut appender = lock.open_appender()?;
        for (key, values) in arrays {
            appender.append(group, key.as_ref(), values.as_ref())?;
        }
        appender.flush()?;
        Ok(true)
    }

    /// Reads the full content of `group/key` from segment `segment_index` of
    /// the group's owner.
    ///
    /// Returns `Ok(None)` if the segment is missing, could not be locked in
    /// time, or does not hold the array.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or container corruption.
    pub fn read(
        &self,
        segment_index: u64,
        group: &str,
        key: &str,
    ) -> CoreResult<Option<Vec<String>>> {
        let Some(owner) = self.belong_to(group) else {
            return Ok(None);
        };
        let segment = SegmentId::new(owner, segment_index);

        let Some(lock) = SegmentLock::acquire(&self.dir.segment_path(segment), self.lock_policy())?
        else {
            return Ok(None);
        };
        lock.read_array(group, key)
    }

    /// Segments of the owner that currently hold `group`.
    ///
    /// Scans the owner's chain; segments that cannot be locked in time are
    /// left out.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or container corruption.
    pub fn locate(&self, group: &str) -> CoreResult<Vec<SegmentId>> {
        let Some(owner) = self.belong_to(group) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for segment in self.dir.all_segments(owner)? {
            let path = self.dir.segment_path(segment);
            if let Some(lock) = SegmentLock::acquire(&path, self.lock_policy())? {
                if lock.group_names()?.iter().any(|name| name == group) {
                    found.push(segment);
                }
            }
        }
        Ok(found)
    }

    /// Group names stored in one segment, or `None` if it is missing or busy.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or container corruption.
    pub fn segment_groups(&self, segment: SegmentId) -> CoreResult<Option<Vec<String>>> {
        let path = self.dir.segment_path(segment);
        let Some(lock) = SegmentLock::acquire(&path, self.lock_policy())? else {
            return Ok(None);
        };
        Ok(Some(lock.group_names()?))
    }

    pub(crate) fn lock_policy(&self) -> LockPolicy {
        LockPolicy::from(&self.config)
    }

    /// The segment a write to `node` should go to, rolling over if needed.
    fn writable_segment(&self, node: NodeId) -> CoreResult<SegmentId> {
        let (next, current) = self.dir.next_and_current(node)?;
        if current.index == 0 {
            self.dir.create_segment(next)?;
            return Ok(next);
        }

        let size = self.dir.segment_size(current)?.unwrap_or(0);
        if size < self.config.max_segment_size {
            return Ok(current);
        }

        if self.dir.create_segment(next)? {
            debug!(full = %current, size, next = %next, "segment rolled over");
        }
        Ok(next)
    }
}
