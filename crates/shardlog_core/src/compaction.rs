//! Segment compaction.
//!
//! Two operations keep a node's files small and few:
//!
//! - **rewrite** defragments one segment. Deleting a group only appends a
//!   drop frame, so after migrations a segment carries dead bytes until it
//!   is rewritten with just its live groups.
//! - **merge** repacks a node's chain. Everything after the first segment
//!   with spare capacity is replayed through the normal write path, which
//!   packs it into that segment and rolls over only as needed.
//!
//! ## Invariants
//!
//! - Neither operation changes the set of (group, key, values) a node holds
//! - A rewrite holds the segment lock for its whole duration. The new image
//!   is staged in `{segment}.new`, synced and renamed over the segment, so a
//!   crash leaves either the old or the new file, never a partial one
//! - A staging file left by a crash is removed when the store is next opened
//! - A merge never leaves a gap in the chain's indexes

use crate::error::CoreResult;
use crate::lock::SegmentLock;
use crate::store::LogStore;
use crate::types::{NodeId, SegmentId};
use shardlog_storage::{Container, FileBackend, InMemoryBackend};
use tracing::{debug, info, warn};

/// Outcome of a single-segment rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    /// Live groups carried over.
    pub groups: usize,
    /// File size before the rewrite.
    pub size_before: u64,
    /// File size after the rewrite.
    pub size_after: u64,
}

impl RewriteStats {
    /// Bytes reclaimed.
    #[must_use]
    pub fn bytes_saved(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }
}

/// Outcome of merging a node's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// The node whose chain was merged.
    pub node: NodeId,
    /// Segment files before the merge.
    pub segments_before: usize,
    /// Segment files after the merge.
    pub segments_after: usize,
    /// Groups replayed out of source segments.
    pub groups_replayed: usize,
    /// Source segments that could not be locked and were left in place.
    pub skipped: Vec<SegmentId>,
    /// Sources whose replay stalled; their remainder was put back under
    /// these segment ids.
    pub restored: Vec<SegmentId>,
}

impl LogStore {
    /// Replaces a locked segment with its live groups only.
    pub(crate) fn rewrite_locked(
        &self,
        segment: SegmentId,
        lock: &mut SegmentLock,
        container: Container<FileBackend>,
    ) -> CoreResult<RewriteStats> {
        let size_before = container.size()?;
        let groups: Vec<String> = container.groups().map(str::to_string).collect();

        let mut fresh = Container::open(InMemoryBackend::new())?;
        for group in &groups {
            fresh.copy_group_from(&container, group)?;
        }
        drop(container);
        let image = fresh.into_backend().into_bytes();

        lock.replace_with(&self.dir.rewrite_path(segment), &image)?;
        self.dir.sync_directory()?;

        Ok(RewriteStats {
            groups: groups.len(),
            size_before,
            size_after: image.len() as u64,
        })
    }
    /// Defragments one segment file.
    ///
    /// Returns `Ok(None)` if the segment is missing or could not be locked
    /// within the configured wait.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or container corruption.
    pub fn rewrite(&self, segment: SegmentId) -> CoreResult<Option<RewriteStats>> {
        let path = self.dir.segment_path(segment);
        let Some(mut lock) = SegmentLock::acquire(&path, self.lock_policy())? else {
            return Ok(None);
        };

        let container = lock.open_container()?;
        let stats = self.rewrite_locked(segment, &mut lock, container)?;
        debug!(%segment, saved = stats.bytes_saved(), "segment rewritten");
        Ok(Some(stats))
    }

    /// Repacks the segment chain of `node`.
    ///
    /// The first segment below the size cap, and every segment before it,
    /// stay untouched. Each later segment is locked, moved to its temporary
    /// name and replayed group by group through [`LogStore::write_group`],
    /// then removed. A chain of one segment is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or container corruption. A failed
    /// merge can be re-run: temporary files are restored when the store is
    /// next opened.
    pub fn merge(&self, node: NodeId) -> CoreResult<MergeReport> {
        let chain = self.dir.all_segments(node)?;
        let mut report = MergeReport {
            node,
            segments_before: chain.len(),
            segments_after: chain.len(),
            groups_replayed: 0,
            skipped: Vec::new(),
            restored: Vec::new(),
        };
        if chain.len() <= 1 {
            return Ok(report);
        }

        let mut sources = Vec::new();
        let mut has_room = false;
        for segment in chain {
            if has_room {
                sources.push(segment);
            } else if self.dir.segment_size(segment)?.unwrap_or(0) < self.config.max_segment_size {
                has_room = true;
            }
        }
        if sources.is_empty() {
            return Ok(report);
        }

        // Only a locked tail of the chain can move, or indexes would gap.
        let mut locked = Vec::with_capacity(sources.len());
        for segment in sources {
            match SegmentLock::acquire(&self.dir.segment_path(segment), self.lock_policy())? {
                Some(lock) => locked.push((segment, lock)),
                None => {
                    warn!(%segment, "merge source busy, keeping it and everything before it");
                    report.skipped.extend(locked.drain(..).map(|(s, _)| s));
                    report.skipped.push(segment);
                }
            }
        }

        let mut staged = Vec::with_capacity(locked.len());
        for (segment, mut lock) in locked {
            lock.rename_to(self.dir.temp_path(segment))?;
            staged.push((segment, lock));
        }
        self.dir.sync_directory()?;

        for (segment, mut lock) in staged {
            let mut container = lock.open_container()?;
            let groups: Vec<String> = container.groups().map(str::to_string).collect();

            let mut stalled = false;
            for group in &groups {
                let Some(arrays) = container.group(group) else {
                    continue;
                };
                if !self.write_group(group, arrays)? {
                    stalled = true;
                    break;
                }
                container.delete_group(group)?;
                report.groups_replayed += 1;
            }
            container.flush()?;
            drop(container);

            if stalled {
                let (next, _) = self.dir.next_and_current(node)?;
                lock.rename_to(self.dir.segment_path(next))?;
                self.dir.sync_directory()?;
                warn!(%segment, restored_as = %next, "merge replay stalled, remainder kept");
                report.restored.push(next);
            } else {
                self.dir.remove(lock.path())?;
            }
        }

        report.segments_after = self.dir.all_segments(node)?.len();
        info!(
            %node,
            before = report.segments_before,
            after = report.segments_after,
            groups = report.groups_replayed,
            "segment chain merged"
        );
        Ok(report)
    }

    /// Puts temporary merge files left by a crashed merge back into their
    /// node's chain, as the next segment index.
    ///
    /// Files still locked by a running merge are left alone.
    pub(crate) fn recover_orphans(&self) -> CoreResult<Vec<SegmentId>> {
        let mut restored = Vec::new();
        for temp in self.dir.orphaned_temps()? {
            let Some(mut lock) = SegmentLock::try_acquire(&self.dir.temp_path(temp))? else {
                continue;
            };
            let (next, _) = self.dir.next_and_current(temp.node)?;
            lock.rename_to(self.dir.segment_path(next))?;
            warn!(orphan = %temp, restored_as = %next, "restored interrupted merge source");
            restored.push(next);
        }

        if !restored.is_empty() {
            self.dir.sync_directory()?;
            self.refresh()?;
        }
        Ok(restored)
    }

    /// Removes staging files left by a rewrite that crashed before its
    /// rename. The segment itself still holds the old, complete image.
    ///
    /// Segments locked by a running rewrite are left alone.
    pub(crate) fn remove_stale_rewrites(&self) -> CoreResult<usize> {
        let mut removed = 0;
        for segment in self.dir.stale_rewrites()? {
            let path = self.dir.segment_path(segment);
            let lock = SegmentLock::try_acquire(&path)?;
            if lock.is_none() && self.dir.segment_size(segment)?.is_some() {
                continue;
            }
            let staging = self.dir.rewrite_path(segment);
            if staging.exists() {
                self.dir.remove(&staging)?;
                warn!(%segment, "removed staging file of an interrupted rewrite");
                removed += 1;
            }
        }
        Ok(removed)
    }
}
