//! Compaction commands.

use shardlog_core::{LogStore, NodeId, SegmentId};

/// Rewrites one segment with its live groups only.
pub fn rewrite(store: &LogStore, node: NodeId, index: u64) -> Result<(), Box<dyn std::error::Error>> {
    let segment = SegmentId::new(node, index);
    let Some(stats) = store.rewrite(segment)? else {
        return Err(format!("Segment {segment} is missing or busy").into());
    };

    println!("Rewrite of {}:", segment.file_name());
    println!("  Live groups: {}", stats.groups);
    println!("  Size before: {} bytes", stats.size_before);
    println!("  Size after:  {} bytes", stats.size_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        stats.bytes_saved(),
        if stats.size_before > 0 {
            (stats.bytes_saved() as f64 / stats.size_before as f64) * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}

/// Repacks the segment chain of `node`.
pub fn merge(store: &LogStore, node: NodeId) -> Result<(), Box<dyn std::error::Error>> {
    let report = store.merge(node)?;

    println!("Merge of node {node}:");
    println!(
        "  Segments:        {} -> {}",
        report.segments_before, report.segments_after
    );
    println!("  Groups replayed: {}", report.groups_replayed);
    for segment in &report.skipped {
        println!("  Busy, kept:      {}", segment.file_name());
    }
    for segment in &report.restored {
        println!("  Restored as:     {}", segment.file_name());
    }
    Ok(())
}
