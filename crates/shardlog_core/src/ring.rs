//! Consistent-hash ring.
//!
//! Positions live on a circle of size 2^128. A group is owned by the first
//! node at or clockwise after the group's digest. The ring is a plain value:
//! it never touches the filesystem, and the store owns and mutates it.

use crate::types::NodeId;
use md5::{Digest, Md5};

/// Position returned for the first node of an empty ring (ring size - 1).
pub const EMPTY_RING_POSITION: u128 = u128::MAX;

/// Computes the 128-bit ring position of a group name.
///
/// The digest is the MD5 of the UTF-8 bytes of `name`, read as a
/// big-endian integer.
#[must_use]
pub fn hash_group(name: &str) -> u128 {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&Md5::digest(name.as_bytes()));
    u128::from_be_bytes(bytes)
}

/// The sorted set of nodes on the ring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRing {
    /// Strictly increasing.
    nodes: Vec<NodeId>,
}

impl HashRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ring from any collection of nodes; duplicates collapse.
    pub fn from_nodes(nodes: impl IntoIterator<Item = NodeId>) -> Self {
        let mut nodes: Vec<NodeId> = nodes.into_iter().collect();
        nodes.sort_unstable();
        nodes.dedup();
        Self { nodes }
    }

    /// The nodes in ascending order.
    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the ring has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `node` is on the ring.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.binary_search(&node).is_ok()
    }

    /// Adds a node, keeping the order. Returns false if it was present.
    pub fn insert(&mut self, node: NodeId) -> bool {
        match self.nodes.binary_search(&node) {
            Ok(_) => false,
            Err(at) => {
                self.nodes.insert(at, node);
                true
            }
        }
    }

    /// Node that owns `group`, or `None` on an empty ring.
    #[must_use]
    pub fn owner_of(&self, group: &str) -> Option<NodeId> {
        self.owner_of_position(hash_group(group))
    }

    /// Smallest node at or after `position`, wrapping to the smallest node.
    #[must_use]
    pub fn owner_of_position(&self, position: u128) -> Option<NodeId> {
        let at = self.nodes.partition_point(|n| n.0 < position);
        self.nodes.get(at).or(self.nodes.first()).copied()
    }

    /// Node whose range is split when a node is placed at `position`.
    ///
    /// That is the smallest node strictly after `position`, wrapping to the
    /// smallest node.
    #[must_use]
    pub fn source_node_for(&self, position: u128) -> Option<NodeId> {
        let at = self.nodes.partition_point(|n| n.0 <= position);
        self.nodes.get(at).or(self.nodes.first()).copied()
    }

    /// The node immediately counter-clockwise of `node`.
    #[must_use]
    pub fn predecessor(&self, node: NodeId) -> Option<NodeId> {
        let at = self.nodes.partition_point(|n| *n < node);
        match at {
            0 => self.nodes.last().copied(),
            _ => Some(self.nodes[at - 1]),
        }
    }

    /// Position for the next node: the midpoint of the widest gap.
    ///
    /// Gaps run between consecutive nodes plus the wrap gap from the last node
    /// back to the first. Ties go to the first gap in ascending order, so the
    /// wrap gap only wins when strictly wider. An empty ring yields
    /// [`EMPTY_RING_POSITION`]. Returns `None` if even the widest gap has no
    /// free position strictly inside it.
    #[must_use]
    pub fn choose_insertion_point(&self) -> Option<NodeId> {
        let (first, last) = match self.nodes.as_slice() {
            [] => return Some(NodeId::new(EMPTY_RING_POSITION)),
            [only] => return Some(NodeId::new(only.0.wrapping_add(1 << 127))),
            [first, .., last] => (first.0, last.0),
        };

        let mut widest: Option<(u128, u128)> = None;
        let gaps = self
            .nodes
            .windows(2)
            .map(|pair| (pair[0].0, pair[1].0 - pair[0].0))
            .chain(std::iter::once((last, first.wrapping_sub(last))));
        for (start, width) in gaps {
            if widest.map_or(true, |(_, best)| width > best) {
                widest = Some((start, width));
            }
        }

        let (start, width) = widest?;
        (width >= 2).then(|| NodeId::new(start.wrapping_add(width / 2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ring(positions: &[u128]) -> HashRing {
        HashRing::from_nodes(positions.iter().copied().map(NodeId::new))
    }

    /// Whether `h` lies in the clockwise arc `(from, to]`.
    fn in_arc(h: u128, from: u128, to: u128) -> bool {
        if from < to {
            from < h && h <= to
        } else {
            h > from || h <= to
        }
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash_group("user_100"), hash_group("user_100"));
        assert_ne!(hash_group("user_100"), hash_group("user_101"));
    }

    #[test]
    fn hash_is_md5_big_endian() {
        assert_eq!(hash_group(""), 0xd41d_8cd9_8f00_b204_e980_0998_ecf8_427e);
        assert_eq!(hash_group("abc"), 0x9001_5098_3cd2_4fb0_d696_3f7d_28e1_7f72);
    }

    #[test]
    fn empty_ring_has_no_owner() {
        let ring = HashRing::new();
        assert_eq!(ring.owner_of("anything"), None);
        assert_eq!(ring.owner_of(""), None);
        assert_eq!(ring.source_node_for(7), None);
        assert_eq!(
            ring.choose_insertion_point(),
            Some(NodeId::new(u128::MAX))
        );
    }

    #[test]
    fn from_nodes_sorts_and_dedups() {
        let ring = ring(&[300, 100, 200, 100]);
        assert_eq!(
            ring.nodes(),
            [NodeId::new(100), NodeId::new(200), NodeId::new(300)]
        );
    }

    #[test]
    fn owner_wraps_past_largest_node() {
        let ring = ring(&[100, 200]);
        assert_eq!(ring.owner_of_position(0), Some(NodeId::new(100)));
        assert_eq!(ring.owner_of_position(100), Some(NodeId::new(100)));
        assert_eq!(ring.owner_of_position(101), Some(NodeId::new(200)));
        assert_eq!(ring.owner_of_position(200), Some(NodeId::new(200)));
        assert_eq!(ring.owner_of_position(201), Some(NodeId::new(100)));
        assert_eq!(ring.owner_of_position(u128::MAX), Some(NodeId::new(100)));
    }

    #[test]
    fn source_node_is_strictly_after() {
        let ring = ring(&[100, 200]);
        assert_eq!(ring.source_node_for(100), Some(NodeId::new(200)));
        assert_eq!(ring.source_node_for(150), Some(NodeId::new(200)));
        assert_eq!(ring.source_node_for(200), Some(NodeId::new(100)));
        assert_eq!(ring.source_node_for(u128::MAX), Some(NodeId::new(100)));
    }

    #[test]
    fn insertion_point_uses_wrap_gap() {
        let ring = ring(&[100, 200]);
        let expected = (1u128 << 127) + 150;
        assert_eq!(ring.choose_insertion_point(), Some(NodeId::new(expected)));
        assert_eq!(ring.source_node_for(expected), Some(NodeId::new(100)));
    }

    #[test]
    fn insertion_point_uses_inner_gap() {
        let wide_inner = ring(&[0, u128::MAX - 10]);
        // The wrap gap is only 11 wide.
        assert_eq!(
            wide_inner.choose_insertion_point(),
            Some(NodeId::new((u128::MAX - 10) / 2))
        );

        let half = 1u128 << 127;
        let uneven = ring(&[0, half, half + 10, u128::MAX - 1]);
        assert_eq!(uneven.choose_insertion_point(), Some(NodeId::new(half / 2)));
    }

    #[test]
    fn insertion_tie_prefers_first_gap() {
        let half = 1u128 << 127;
        let quarter = half / 2;
        let even = ring(&[0, quarter, half, half + quarter]);
        assert_eq!(even.choose_insertion_point(), Some(NodeId::new(quarter / 2)));
    }

    #[test]
    fn single_node_splits_circle_in_half() {
        let single = ring(&[10]);
        assert_eq!(
            single.choose_insertion_point(),
            Some(NodeId::new(10 + (1 << 127)))
        );
    }

    #[test]
    fn adjacent_nodes_still_leave_room() {
        let tight = ring(&[0, 1, 2]);
        let point = tight.choose_insertion_point().unwrap();
        assert!(!tight.contains(point));
        assert_eq!(tight.source_node_for(point.0), Some(NodeId::new(0)));
    }

    #[test]
    fn insert_keeps_order() {
        let mut ring = ring(&[100, 300]);
        assert!(ring.insert(NodeId::new(200)));
        assert!(!ring.insert(NodeId::new(200)));
        assert_eq!(
            ring.nodes(),
            [NodeId::new(100), NodeId::new(200), NodeId::new(300)]
        );
        assert!(ring.contains(NodeId::new(300)));
        assert_eq!(ring.predecessor(NodeId::new(100)), Some(NodeId::new(300)));
        assert_eq!(ring.predecessor(NodeId::new(300)), Some(NodeId::new(200)));
    }

    fn arb_ring() -> impl Strategy<Value = HashRing> {
        prop::collection::vec(any::<u128>(), 1..12)
            .prop_map(|positions| HashRing::from_nodes(positions.into_iter().map(NodeId::new)))
    }

    proptest! {
        #[test]
        fn owner_is_member_and_deterministic(ring in arb_ring(), group in ".{0,24}") {
            let owner = ring.owner_of(&group).unwrap();
            prop_assert!(ring.contains(owner));
            prop_assert_eq!(ring.owner_of(&group), Some(owner));
        }

        #[test]
        fn digest_lies_in_owner_arc(ring in arb_ring(), group in ".{0,24}") {
            let owner = ring.owner_of(&group).unwrap();
            let pred = ring.predecessor(owner).unwrap();
            prop_assert!(in_arc(hash_group(&group), pred.0, owner.0));
        }

        #[test]
        fn insertion_point_is_strictly_inside_widest_gap(ring in arb_ring()) {
            let point = ring.choose_insertion_point().unwrap();
            prop_assert!(!ring.contains(point));

            let source = ring.source_node_for(point.0).unwrap();
            let pred = ring.predecessor(source).unwrap();
            prop_assert!(in_arc(point.0, pred.0, source.0));

            let width = source.0.wrapping_sub(pred.0);
            for &node in ring.nodes() {
                let before = ring.predecessor(node).unwrap();
                let other = node.0.wrapping_sub(before.0);
                // Zero means the single-node full circle.
                prop_assert!(width == 0 || (other != 0 && other <= width));
            }
        }

        #[test]
        fn insertion_moves_only_the_carved_range(
            ring in arb_ring(),
            groups in prop::collection::vec("[a-z0-9_]{1,16}", 1..64),
        ) {
            let new_node = ring.choose_insertion_point().unwrap();
            let source = ring.source_node_for(new_node.0).unwrap();
            let mut grown = ring.clone();
            grown.insert(new_node);

            for group in &groups {
                let before = ring.owner_of(group).unwrap();
                let after = grown.owner_of(group).unwrap();
                if before != after {
                    prop_assert_eq!(before, source);
                    prop_assert_eq!(after, new_node);
                }
            }
        }
    }
}
