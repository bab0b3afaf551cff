//! Integration tests for placement, rollover, migration and compaction.

use shardlog_core::{
    hash_group, Config, CoreError, LockPolicy, LogStore, NodeId, SegmentId, SegmentLock,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

type Content = BTreeMap<(String, String), Vec<String>>;

fn fast_config() -> Config {
    Config::new()
        .lock_wait(Duration::from_millis(200))
        .lock_poll(Duration::from_millis(10))
}

fn one(value: &str) -> Vec<String> {
    vec![value.to_string()]
}

/// Everything stored under `node`, across its whole chain.
fn node_content(store: &LogStore, node: NodeId) -> Content {
    let mut content = Content::new();
    for segment in store.segments(node).unwrap() {
        let lock = SegmentLock::acquire(&store.dir().segment_path(segment), LockPolicy::default())
            .unwrap()
            .unwrap();
        let container = lock.open_container().unwrap();
        for group in container.groups() {
            for key in container.keys(group) {
                content
                    .entry((group.to_string(), key.to_string()))
                    .or_default()
                    .extend_from_slice(container.get(group, key).unwrap());
            }
        }
    }
    content
}

fn store_content(store: &LogStore) -> Content {
    let mut all = Content::new();
    for node in store.nodes() {
        all.extend(node_content(store, node));
    }
    all
}

fn seed_nodes(dir: &Path, nodes: &[u128]) {
    for node in nodes {
        File::create(dir.join(SegmentId::new(NodeId::new(*node), 1).file_name())).unwrap();
    }
}

#[test]
fn rollover_at_one_kibibyte() {
    let temp = tempdir().unwrap();
    let store = LogStore::open(temp.path(), fast_config().max_segment_size_str("1k")).unwrap();
    let node = store.add_node().unwrap().node;
    let first = SegmentId::new(node, 1);
    let second = SegmentId::new(node, 2);

    let mut writes = 0;
    while store.dir().segment_size(first).unwrap().unwrap() < 1024 {
        assert!(store.write("userA", "k", &one("x")).unwrap());
        writes += 1;
    }
    assert_eq!(store.segments(node).unwrap(), [first]);

    let frozen = store.dir().segment_size(first).unwrap();
    assert!(store.write("userA", "k", &one("after")).unwrap());
    assert!(store.write("userA", "k", &one("again")).unwrap());

    assert_eq!(store.segments(node).unwrap(), [first, second]);
    assert_eq!(store.dir().segment_size(first).unwrap(), frozen);
    assert_eq!(store.read(1, "userA", "k").unwrap().unwrap().len(), writes);
    assert_eq!(
        store.read(2, "userA", "k").unwrap(),
        Some(vec!["after".to_string(), "again".to_string()])
    );
}

#[test]
fn adding_node_to_two_node_ring() {
    let temp = tempdir().unwrap();
    seed_nodes(temp.path(), &[100, 200]);
    let store = LogStore::open(temp.path(), fast_config()).unwrap();

    let groups: Vec<String> = (0..200).map(|i| format!("group_{i}")).collect();
    for group in &groups {
        assert!(store.write(group, "k", &one(group)).unwrap());
    }
    let before = store_content(&store);

    let report = store.add_node().unwrap();
    let new_node = NodeId::new((1u128 << 127) + 150);
    assert_eq!(report.node, new_node);
    // Digests past 200 wrap to node 100, so node 100 gives up the range.
    assert_eq!(report.source, Some(NodeId::new(100)));
    assert!(report.is_complete());

    let carved: Vec<&String> = groups
        .iter()
        .filter(|g| {
            let h = hash_group(g);
            h > 200 && h <= new_node.as_u128()
        })
        .collect();
    assert!(!carved.is_empty());
    assert_eq!(report.groups_moved, carved.len());

    let on_new = node_content(&store, new_node);
    let on_source = node_content(&store, NodeId::new(100));
    for group in &carved {
        assert_eq!(store.belong_to(group), Some(new_node));
        assert!(on_new.contains_key(&((*group).clone(), "k".to_string())));
        assert!(!on_source.keys().any(|(g, _)| g == *group));
    }
    assert_eq!(store_content(&store), before);
}

#[test]
fn empty_ring_has_no_owner() {
    let temp = tempdir().unwrap();
    let store = LogStore::open(temp.path(), fast_config()).unwrap();

    for group in ["", "user_1", "group with spaces"] {
        assert_eq!(store.belong_to(group), None);
    }
    assert!(matches!(
        store.write("user_1", "k", &one("v")),
        Err(CoreError::EmptyRing { .. })
    ));
}

#[test]
fn merge_preserves_content_and_never_adds_files() {
    let temp = tempdir().unwrap();
    let store = LogStore::open(temp.path(), fast_config().max_segment_size(512)).unwrap();
    let node = store.add_node().unwrap().node;

    for i in 0..60 {
        store
            .write(&format!("user_{}", i % 15), &format!("scan_{}", i % 4), &one(&i.to_string()))
            .unwrap();
        if i % 10 == 9 {
            store.create_segment_for(node).unwrap();
        }
    }
    let before = node_content(&store, node);
    let files_before = store.segments(node).unwrap().len();

    let report = store.merge(node).unwrap();
    assert_eq!(report.segments_before, files_before);
    assert!(report.segments_after <= files_before);
    assert!(report.restored.is_empty());

    // Groups move whole, so per-key order can change only across groups.
    let after = node_content(&store, node);
    assert_eq!(after.len(), before.len());
    for (entry, values) in &before {
        let mut expected = values.clone();
        let mut actual = after[entry].clone();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
    }
}

#[test]
fn rewrite_preserves_content_and_never_grows() {
    let temp = tempdir().unwrap();
    let store = LogStore::open(temp.path(), fast_config()).unwrap();
    let node = store.add_node().unwrap().node;
    for i in 0..30 {
        store.write(&format!("user_{}", i % 7), "k", &one(&i.to_string())).unwrap();
    }
    let before = node_content(&store, node);

    let stats = store.rewrite(SegmentId::new(node, 1)).unwrap().unwrap();
    assert!(stats.size_after <= stats.size_before);
    assert_eq!(stats.groups, 7);
    assert_eq!(node_content(&store, node), before);
}

#[test]
fn contended_segment_times_out() {
    let temp = tempdir().unwrap();
    let store = LogStore::open(temp.path(), fast_config()).unwrap();
    let node = store.add_node().unwrap().node;
    let path = store.dir().segment_path(SegmentId::new(node, 1));

    let held = SegmentLock::acquire(&path, LockPolicy::default()).unwrap().unwrap();
    assert!(!store.write("user_1", "k", &one("v")).unwrap());
    assert_eq!(store.read(1, "user_1", "k").unwrap(), None);
    assert_eq!(store.rewrite(SegmentId::new(node, 1)).unwrap(), None);
    drop(held);

    assert!(store.write("user_1", "k", &one("v")).unwrap());
}

#[test]
fn concurrent_writers_do_not_lose_values() {
    let temp = tempdir().unwrap();
    let config = Config::new()
        .lock_wait(Duration::from_secs(5))
        .lock_poll(Duration::from_millis(1));
    let store = Arc::new(LogStore::open(temp.path(), config).unwrap());
    store.add_node().unwrap();

    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..25 {
                    assert!(store.write("shared", "k", &one(&format!("{t}-{i}"))).unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let values = store.read(1, "shared", "k").unwrap().unwrap();
    assert_eq!(values.len(), 100);
    for t in 0..4 {
        let mine: Vec<&String> = values.iter().filter(|v| v.starts_with(&format!("{t}-"))).collect();
        let expected: Vec<String> = (0..25).map(|i| format!("{t}-{i}")).collect();
        assert_eq!(mine, expected.iter().collect::<Vec<_>>());
    }
}

#[test]
fn stale_writer_during_rebalance_loses_nothing() {
    let temp = tempdir().unwrap();
    let writer = LogStore::open(temp.path(), fast_config()).unwrap();
    writer.add_node().unwrap();
    let groups: Vec<String> = (0..30).map(|i| format!("user_{i}")).collect();
    for group in &groups {
        assert!(writer.write(group, "k", &one("before")).unwrap());
    }

    // A second handle grows the ring; the first keeps routing by the old one.
    let admin = LogStore::open(temp.path(), fast_config()).unwrap();
    let new_node = admin.add_node().unwrap().node;
    for group in &groups {
        assert!(writer.write(group, "k", &one("stale")).unwrap());
    }

    admin.migrate_pending(new_node).unwrap();
    writer.refresh().unwrap();
    let content = store_content(&writer);
    for group in &groups {
        let values = &content[&(group.clone(), "k".to_string())];
        assert!(values.contains(&"before".to_string()));
        assert!(values.contains(&"stale".to_string()));
        assert_eq!(writer.locate(group).unwrap().len(), 1);
    }
}
