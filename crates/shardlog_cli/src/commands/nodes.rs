//! Ring membership commands.

use shardlog_core::{LogStore, MigrationReport, NodeId};

/// Prints the node owning `group`.
pub fn owner(store: &LogStore, group: &str) {
    match store.belong_to(group) {
        Some(node) => println!("{node}"),
        None => println!("No nodes yet"),
    }
}

/// Adds a node and prints the migration summary.
pub fn add_node(store: &LogStore) -> Result<(), Box<dyn std::error::Error>> {
    let report = store.add_node()?;
    println!("✓ Added node {}", report.node);
    print_report(&report);
    Ok(())
}

/// Re-runs the migration into `node`.
pub fn migrate_pending(store: &LogStore, node: NodeId) -> Result<(), Box<dyn std::error::Error>> {
    let report = store.migrate_pending(node)?;
    print_report(&report);
    Ok(())
}

/// Creates the next segment of `node`.
pub fn create_segment(store: &LogStore, node: NodeId) -> Result<(), Box<dyn std::error::Error>> {
    let segment = store.create_segment_for(node)?;
    println!("✓ Created {}", segment.file_name());
    Ok(())
}

fn print_report(report: &MigrationReport) {
    let Some(source) = report.source else {
        println!("  Nothing to migrate");
        return;
    };

    println!("Migration from {source}:");
    println!("  Groups moved:     {}", report.groups_moved);
    println!("  Groups left:      {}", report.groups_left);
    println!("  Segments skipped: {}", report.segments_skipped.len());
    if let Some(merge) = &report.merge {
        println!(
            "  Source segments:  {} -> {}",
            merge.segments_before, merge.segments_after
        );
    }
    if !report.is_complete() {
        println!();
        println!("Migration incomplete, re-run with: migrate-pending {}", report.node);
    }
}
