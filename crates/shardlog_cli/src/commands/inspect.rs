//! Inspect command implementation.

use serde::Serialize;
use shardlog_core::LogStore;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store path.
    pub path: String,
    /// Configured segment size cap in bytes.
    pub max_segment_size: u64,
    /// Total size of all segment files in bytes.
    pub total_size: u64,
    /// Per-node details, in ring order.
    pub nodes: Vec<NodeStats>,
    /// Temporary merge files still on disk.
    pub orphaned_temps: Vec<String>,
}

/// Statistics for one node.
#[derive(Debug, Serialize)]
pub struct NodeStats {
    /// Ring position, in decimal.
    pub node: String,
    /// The node's segment chain.
    pub segments: Vec<SegmentStats>,
}

/// Statistics for one segment file.
#[derive(Debug, Serialize)]
pub struct SegmentStats {
    /// Segment file name.
    pub file: String,
    /// Size in bytes.
    pub size: u64,
    /// Groups stored (if requested and the segment could be locked).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

/// Runs the inspect command.
pub fn run(
    store: &LogStore,
    show_groups: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut result = InspectResult {
        path: store.dir().path().display().to_string(),
        max_segment_size: store.config().max_segment_size,
        total_size: 0,
        nodes: Vec::new(),
        orphaned_temps: store
            .dir()
            .orphaned_temps()?
            .iter()
            .map(|s| s.temp_file_name())
            .collect(),
    };

    for node in store.nodes() {
        let mut segments = Vec::new();
        for segment in store.segments(node)? {
            let size = store.dir().segment_size(segment)?.unwrap_or(0);
            result.total_size += size;
            segments.push(SegmentStats {
                file: segment.file_name(),
                size,
                groups: if show_groups {
                    store.segment_groups(segment)?
                } else {
                    None
                },
            });
        }
        result.nodes.push(NodeStats {
            node: node.to_string(),
            segments,
        });
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!();
    println!("Size cap:    {} bytes", result.max_segment_size);
    println!("Total size:  {} bytes", result.total_size);
    println!("Nodes:       {}", result.nodes.len());

    for node in &result.nodes {
        println!();
        println!("Node {}:", node.node);
        for segment in &node.segments {
            println!("  {:<48} {:>12} bytes", segment.file, segment.size);
            if let Some(groups) = &segment.groups {
                for group in groups {
                    println!("    - {group}");
                }
            }
        }
    }

    if !result.orphaned_temps.is_empty() {
        println!();
        println!("Interrupted merge files:");
        for name in &result.orphaned_temps {
            println!("  {name}");
        }
    }
}
