//! Record commands: write, read and populate.

use rand::distributions::Alphanumeric;
use rand::Rng;
use shardlog_core::LogStore;
use std::time::Instant;

/// Appends `values` to `group/key`.
pub fn write(
    store: &LogStore,
    group: &str,
    key: &str,
    values: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    if !store.write(group, key, values)? {
        return Err(format!("Segment for group {group:?} is busy, nothing written").into());
    }
    println!("✓ Appended {} value(s) to {group}/{key}", values.len());
    Ok(())
}

/// Prints `group/key` from one segment, or from every segment holding the
/// group.
pub fn read(
    store: &LogStore,
    group: &str,
    key: &str,
    segment: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let indexes = match segment {
        Some(index) => vec![index],
        None => store.locate(group)?.iter().map(|s| s.index).collect(),
    };

    let mut found = false;
    for index in indexes {
        if let Some(values) = store.read(index, group, key)? {
            found = true;
            println!("segment {index}:");
            for value in values {
                println!("  {value}");
            }
        }
    }

    if !found {
        println!("No values for {group}/{key}");
    }
    Ok(())
}

/// Writes `count` random values spread over `groups` groups.
pub fn populate(
    store: &LogStore,
    count: usize,
    groups: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if store.nodes().is_empty() {
        let report = store.add_node()?;
        println!("Store was empty, added node {}", report.node);
    }

    let mut rng = rand::thread_rng();
    let groups = groups.max(1);
    let started = Instant::now();
    let mut busy = 0;

    for _ in 0..count {
        let group = format!("user_{}", rng.gen_range(0..groups));
        let key = format!("scan-{}", rng.gen_range(0..4));
        let value: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        if !store.write(&group, &key, &[value])? {
            busy += 1;
        }
    }

    let elapsed = started.elapsed();
    println!("Populate Summary:");
    println!("  Writes:    {}", count - busy);
    println!("  Busy:      {busy}");
    println!("  Duration:  {elapsed:?}");
    println!(
        "  Throughput: {:.2} writes/sec",
        if elapsed.as_secs_f64() > 0.0 {
            (count - busy) as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        }
    );
    Ok(())
}
