//! Core type definitions for shardlog.

use std::fmt;
use std::str::FromStr;

/// File extension of segment files.
pub const SEGMENT_EXTENSION: &str = "seg";

/// Suffix appended to a segment file name while a merge replays it.
pub const TEMP_SUFFIX: &str = "tmp";

/// Suffix of the staging file a rewrite builds before renaming it over the
/// segment.
pub const REWRITE_SUFFIX: &str = "new";

/// A node: a position on the 128-bit hash ring.
///
/// Nodes are logical shards. Each owns the groups whose digest falls in the
/// clockwise range ending at its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u128);

impl NodeId {
    /// Creates a node at `position`.
    #[must_use]
    pub const fn new(position: u128) -> Self {
        Self(position)
    }

    /// Returns the ring position.
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u128>().map(Self)
    }
}

/// One segment file of a node's chain.
///
/// Indexes start at 1 and are contiguous per node; the highest existing
/// index is the node's current segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SegmentId {
    /// Owning node.
    pub node: NodeId,
    /// Position in the node's chain.
    pub index: u64,
}

impl SegmentId {
    /// Creates a segment id.
    #[must_use]
    pub const fn new(node: NodeId, index: u64) -> Self {
        Self { node, index }
    }

    /// The segment that follows this one in the chain.
    #[must_use]
    pub const fn next(self) -> Self {
        Self {
            node: self.node,
            index: self.index + 1,
        }
    }

    /// File name of the segment, e.g. `1234_2.seg`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}_{}.{SEGMENT_EXTENSION}", self.node, self.index)
    }

    /// File name used while the segment is being replayed by a merge.
    #[must_use]
    pub fn temp_file_name(&self) -> String {
        format!("{}.{TEMP_SUFFIX}", self.file_name())
    }

    /// File name of the staging copy written by a rewrite.
    #[must_use]
    pub fn rewrite_file_name(&self) -> String {
        format!("{}.{REWRITE_SUFFIX}", self.file_name())
    }

    /// Parses a segment file name.
    ///
    /// Only `{node}_{index}.seg` with a decimal node and a positive index is
    /// accepted; temporary files and anything else yield `None`.
    #[must_use]
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(SEGMENT_EXTENSION)?.strip_suffix('.')?;
        Self::parse_stem(stem)
    }

    /// Parses a temporary merge file name (`{node}_{index}.seg.tmp`).
    #[must_use]
    pub fn parse_temp_file_name(name: &str) -> Option<Self> {
        let base = name.strip_suffix(TEMP_SUFFIX)?.strip_suffix('.')?;
        Self::parse_file_name(base)
    }

    /// Parses a rewrite staging file name (`{node}_{index}.seg.new`).
    #[must_use]
    pub fn parse_rewrite_file_name(name: &str) -> Option<Self> {
        let base = name.strip_suffix(REWRITE_SUFFIX)?.strip_suffix('.')?;
        Self::parse_file_name(base)
    }

    fn parse_stem(stem: &str) -> Option<Self> {
        let (node, index) = stem.split_once('_')?;
        if !is_decimal(node) || !is_decimal(index) {
            return None;
        }
        let node = node.parse::<NodeId>().ok()?;
        let index = index.parse::<u64>().ok()?;
        (index > 0).then_some(Self { node, index })
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.node, self.index)
    }
}

fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_format() {
        let seg = SegmentId::new(NodeId::new(340_282_366_920_938_463_463_374_607_431_768_211_455), 3);
        assert_eq!(
            seg.file_name(),
            "340282366920938463463374607431768211455_3.seg"
        );
        assert_eq!(
            seg.temp_file_name(),
            "340282366920938463463374607431768211455_3.seg.tmp"
        );
    }

    #[test]
    fn parse_round_trip() {
        let seg = SegmentId::new(NodeId::new(100), 12);
        assert_eq!(SegmentId::parse_file_name(&seg.file_name()), Some(seg));
        assert_eq!(SegmentId::parse_temp_file_name(&seg.temp_file_name()), Some(seg));
        assert_eq!(seg.rewrite_file_name(), "100_12.seg.new");
        assert_eq!(SegmentId::parse_rewrite_file_name(&seg.rewrite_file_name()), Some(seg));
        assert_eq!(SegmentId::parse_rewrite_file_name(&seg.temp_file_name()), None);
    }

    #[test]
    fn parse_rejects_foreign_names() {
        for name in [
            "100_1.seg.tmp",
            "100_1.seg.new",
            "100_0.seg",
            "100.seg",
            "100_1.dat",
            "abc_1.seg",
            "100_-1.seg",
            "+100_1.seg",
            "100_1_2.seg",
            "_1.seg",
            "LOCK",
        ] {
            assert_eq!(SegmentId::parse_file_name(name), None, "{name}");
        }
        // One past u128::MAX does not fit.
        assert_eq!(
            SegmentId::parse_file_name("340282366920938463463374607431768211456_1.seg"),
            None
        );
    }

    #[test]
    fn next_increments_index() {
        let seg = SegmentId::new(NodeId::new(5), 1);
        assert_eq!(seg.next(), SegmentId::new(NodeId::new(5), 2));
        assert_eq!(seg.to_string(), "5_1");
    }
}
