//! shardlog CLI
//!
//! Command-line tools for shardlog stores.
//!
//! # Commands
//!
//! - `write` / `read` - Append to and read a group's array
//! - `owner` - Show which node owns a group
//! - `add-node` - Grow the ring and migrate the affected groups
//! - `create-segment` - Start a new segment for a node
//! - `rewrite` / `merge` - Reclaim space in a segment or a node's chain
//! - `inspect` - Display nodes, segments and sizes
//! - `populate` - Fill a store with random records

mod commands;

use clap::{Parser, Subcommand};
use shardlog_core::NodeId;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Sharded append-only log store tools.
#[derive(Parser)]
#[command(name = "shardlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Segment size cap, e.g. "36m" or "2g"
    #[arg(global = true, short, long)]
    max_size: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append values to a group's array
    Write {
        /// Group name
        group: String,

        /// Array key within the group
        key: String,

        /// Values to append, in order
        #[arg(required = true)]
        values: Vec<String>,
    },

    /// Read a group's array
    Read {
        /// Group name
        group: String,

        /// Array key within the group
        key: String,

        /// Segment index to read from (default: every segment holding the group)
        #[arg(short, long)]
        segment: Option<u64>,
    },

    /// Show the node that owns a group
    Owner {
        /// Group name
        group: String,
    },

    /// Add a node at the widest ring gap and migrate its groups
    AddNode,

    /// Create the next segment for a node
    CreateSegment {
        /// Node position on the ring
        node: NodeId,
    },

    /// Rewrite one segment with its live groups only
    Rewrite {
        /// Node position on the ring
        node: NodeId,

        /// Segment index
        index: u64,
    },

    /// Repack a node's segment chain
    Merge {
        /// Node position on the ring
        node: NodeId,
    },

    /// Move groups a node owns that still sit on its neighbour
    MigratePending {
        /// Node position on the ring
        node: NodeId,
    },

    /// Display nodes, segments and sizes
    Inspect {
        /// List the groups stored in each segment
        #[arg(short, long)]
        groups: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write random records
    Populate {
        /// Number of writes
        count: usize,

        /// Number of distinct groups
        #[arg(short, long, default_value = "100")]
        groups: usize,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("shardlog CLI v{}", env!("CARGO_PKG_VERSION"));
        println!("shardlog core v{}", shardlog_core::VERSION);
        return Ok(());
    }

    let path = cli.path.ok_or("Store path required (--path)")?;
    let store = commands::open_store(&path, cli.max_size.as_deref())?;

    match cli.command {
        Commands::Write { group, key, values } => {
            commands::records::write(&store, &group, &key, &values)?;
        }
        Commands::Read {
            group,
            key,
            segment,
        } => {
            commands::records::read(&store, &group, &key, segment)?;
        }
        Commands::Owner { group } => {
            commands::nodes::owner(&store, &group);
        }
        Commands::AddNode => {
            commands::nodes::add_node(&store)?;
        }
        Commands::CreateSegment { node } => {
            commands::nodes::create_segment(&store, node)?;
        }
        Commands::Rewrite { node, index } => {
            commands::compact::rewrite(&store, node, index)?;
        }
        Commands::Merge { node } => {
            commands::compact::merge(&store, node)?;
        }
        Commands::MigratePending { node } => {
            commands::nodes::migrate_pending(&store, node)?;
        }
        Commands::Inspect { groups, format } => {
            commands::inspect::run(&store, groups, &format)?;
        }
        Commands::Populate { count, groups } => {
            commands::records::populate(&store, count, groups)?;
        }
        Commands::Version => {}
    }

    Ok(())
}
