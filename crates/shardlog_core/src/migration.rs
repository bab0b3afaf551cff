//! Node insertion and group migration.
//!
//! Adding a node carves the middle out of the widest arc on the ring. Only
//! groups in that carved range change owner, and all of them come from a
//! single source node: the first node clockwise of the new position. The
//! migration walks the source's segments one at a time, moving each affected
//! group whole, then compacts what is left behind.
//!
//! Writers that still route by an older ring keep writing to the source
//! node. Such groups are not lost; they stay readable there and are picked
//! up by the next [`LogStore::migrate_pending`] run.

use crate::compaction::MergeReport;
use crate::error::{CoreError, CoreResult};
use crate::lock::SegmentLock;
use crate::store::LogStore;
use crate::types::{NodeId, SegmentId};
use tracing::{debug, info, warn};

/// Outcome of adding a node or re-running its migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// The node groups were moved to.
    pub node: NodeId,
    /// The node groups were moved from; `None` when the ring was empty.
    pub source: Option<NodeId>,
    /// Groups copied to `node` and removed from the source.
    pub groups_moved: usize,
    /// Groups left on the source because `node` refused the write.
    pub groups_left: usize,
    /// Source segments that could not be locked in time.
    pub segments_skipped: Vec<SegmentId>,
    /// Compaction of the source chain, if the migration got that far.
    pub merge: Option<MergeReport>,
}

impl MigrationReport {
    fn new(node: NodeId, source: Option<NodeId>) -> Self {
        Self {
            node,
            source,
            groups_moved: 0,
            groups_left: 0,
            segments_skipped: Vec::new(),
            merge: None,
        }
    }

    /// Returns true if every affected group reached `node`.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.groups_left == 0 && self.segments_skipped.is_empty()
    }
}

impl LogStore {
    /// Adds a node at the midpoint of the widest ring gap and moves the
    /// groups it now owns.
    ///
    /// On an empty ring the node lands at `2^128 - 1` and nothing moves.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RingFull`] if no gap has room for another node,
    /// or an error on I/O or container failure.
    pub fn add_node(&self) -> CoreResult<MigrationReport> {
        self.refresh()?;
        let (node, source) = {
            let ring = self.ring.read();
            let node = ring.choose_insertion_point().ok_or(CoreError::RingFull)?;
            (node, ring.source_node_for(node.as_u128()))
        };

        self.dir.create_segment(SegmentId::new(node, 1))?;
        self.ring.write().insert(node);
        info!(%node, source = ?source, "node added");

        match source {
            Some(source) if source != node => self.migrate_from(source, node),
            _ => Ok(MigrationReport::new(node, None)),
        }
    }

    /// Moves any groups `node` owns that still sit on its clockwise
    /// neighbour, e.g. after segments were skipped or a stale writer kept
    /// writing there.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownNode`] if `node` is not on the ring, or
    /// an error on I/O or container failure.
    pub fn migrate_pending(&self, node: NodeId) -> CoreResult<MigrationReport> {
        self.refresh()?;
        let source = {
            let ring = self.ring.read();
            if !ring.contains(node) {
                return Err(CoreError::UnknownNode(node));
            }
            ring.source_node_for(node.as_u128())
        };

        match source {
            Some(source) if source != node => self.migrate_from(source, node),
            _ => Ok(MigrationReport::new(node, None)),
        }
    }

    fn migrate_from(&self, source: NodeId, node: NodeId) -> CoreResult<MigrationReport> {
        let mut report = MigrationReport::new(node, Some(source));

        for segment in self.dir.all_segments(source)? {
            let path = self.dir.segment_path(segment);
            let Some(mut lock) = SegmentLock::acquire(&path, self.lock_policy())? else {
                warn!(%segment, "migration source busy, skipping segment");
                report.segments_skipped.push(segment);
                continue;
            };

            let mut container = lock.open_container()?;
            let moving: Vec<String> = container
                .groups()
                .filter(|group| self.belong_to(group) == Some(node))
                .map(str::to_string)
                .collect();

            let mut moved_here = 0;
            for group in &moving {
                let Some(arrays) = container.group(group) else {
                    continue;
                };
                if !self.write_group(group, arrays)? {
                    debug!(%segment, group = group.as_str(), "target busy, group stays");
                    report.groups_left += 1;
                    continue;
                }
                container.delete_group(group)?;
                moved_here += 1;
            }
            container.flush()?;

            if moved_here > 0 {
                self.rewrite_locked(segment, &mut lock, container)?;
                report.groups_moved += moved_here;
            }
        }

        report.merge = Some(self.merge(source)?);
        info!(
            %node,
            %source,
            moved = report.groups_moved,
            left = report.groups_left,
            skipped = report.segments_skipped.len(),
            "migration finished"
        );
        Ok(report)
    }
}
