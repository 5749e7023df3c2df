use std::time::{SystemTime, UNIX_EPOCH};

use pacprism::dht::{Dht, DhtEntry, Shard};

fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn entry(node_id: &str, node_ip: &str, shards: &[&str], generation: i64, expiry: i64) -> DhtEntry {
    DhtEntry {
        node_id: node_id.to_string(),
        node_ip: node_ip.to_string(),
        node_shard: shards
            .iter()
            .map(|shard_id| Shard {
                shard_id: shard_id.to_string(),
                packages: Vec::new(),
            })
            .collect(),
        generation_timestamp: generation,
        expiry_timestamp: expiry,
        information: String::new(),
    }
}

#[test]
fn test_verify_nonexistent_entry() {
    let dht = Dht::new();
    assert!(!dht.verify_entry("nonexistent_node_id"));
    assert!(dht.is_empty());
}

#[test]
fn test_store_and_verify() {
    let mut dht = Dht::new();
    let now = now_seconds();
    dht.store_entry(entry("node1", "192.168.1.100", &["s1"], now, now + 86400));

    assert!(dht.verify_entry("node1"));
    assert_eq!(dht.len(), 1);
}

#[test]
fn test_query_by_shard() {
    let mut dht = Dht::new();
    let now = now_seconds();
    dht.store_entry(entry("node2", "10.0.0.2", &["s1", "s2"], now, now + 3600));
    dht.store_entry(entry("node1", "10.0.0.1", &["s1"], now, now + 3600));

    // Lexical order, snapshot.
    assert_eq!(
        dht.query_node_ids_by_shard_id("s1"),
        Some(vec!["node1".to_string(), "node2".to_string()])
    );
    assert_eq!(dht.query_node_ids_by_shard_id("s2"), Some(vec!["node2".to_string()]));
    assert_eq!(dht.query_node_ids_by_shard_id("unknown"), None);
}

#[test]
fn test_newer_generation_replaces() {
    let mut dht = Dht::new();
    let now = now_seconds();
    dht.store_entry(entry("node1", "10.0.0.1", &["s1"], 100, now + 3600));
    dht.store_entry(entry("node1", "10.0.0.9", &["s2"], 200, now + 3600));

    let rebuilt = dht.entry("node1").unwrap();
    assert_eq!(rebuilt.node_ip, "10.0.0.9");
    assert_eq!(rebuilt.generation_timestamp, 200);
    // Shard membership is replaced in full, not unioned.
    assert_eq!(dht.query_node_ids_by_shard_id("s1"), None);
    assert_eq!(dht.query_node_ids_by_shard_id("s2"), Some(vec!["node1".to_string()]));
}

#[test]
fn test_equal_generation_is_noop() {
    let mut dht = Dht::new();
    let now = now_seconds();
    dht.store_entry(entry("node1", "10.0.0.1", &["s1"], 100, now + 3600));
    dht.store_entry(entry("node1", "10.0.0.9", &["s2"], 100, now + 3600));

    let rebuilt = dht.entry("node1").unwrap();
    assert_eq!(rebuilt.node_ip, "10.0.0.1");
    assert!(dht.query_node_ids_by_shard_id("s1").is_some());
}

#[test]
fn test_older_generation_is_dropped() {
    let mut dht = Dht::new();
    let now = now_seconds();
    dht.store_entry(entry("node1", "10.0.0.1", &["s1"], 200, now + 3600));
    dht.store_entry(entry("node1", "10.0.0.9", &["s2"], 100, now + 3600));

    assert_eq!(dht.entry("node1").unwrap().node_ip, "10.0.0.1");
}

#[test]
fn test_clean_by_expiry_removes_only_expired() {
    let mut dht = Dht::new();
    let now = now_seconds();
    dht.store_entry(entry("stale1", "10.0.0.1", &["s1"], 100, now - 100));
    dht.store_entry(entry("stale2", "10.0.0.2", &["s1"], 100, now - 1));
    dht.store_entry(entry("fresh", "10.0.0.3", &["s1"], 100, now + 3600));

    let removed = dht.clean_by_expiry_time();
    assert_eq!(removed, 2);
    assert!(!dht.verify_entry("stale1"));
    assert!(!dht.verify_entry("stale2"));
    assert!(dht.verify_entry("fresh"));
    assert_eq!(dht.query_node_ids_by_shard_id("s1"), Some(vec!["fresh".to_string()]));
}

#[test]
fn test_clean_by_expiry_on_empty_dht() {
    let mut dht = Dht::new();
    assert_eq!(dht.clean_by_expiry_time(), 0);
}

#[test]
fn test_liveness_counters() {
    let mut dht = Dht::new();
    let now = now_seconds();
    dht.store_entry(entry("node1", "10.0.0.1", &["s1"], 100, now + 3600));

    assert_eq!(dht.record_probe_failure("node1"), Some(1));
    assert_eq!(dht.record_probe_failure("node1"), Some(2));
    dht.record_probe_success("node1");
    assert_eq!(dht.record_probe_failure("node1"), Some(1));
    assert_eq!(dht.record_probe_failure("unknown"), None);
}

#[test]
fn test_clean_by_liveness_threshold() {
    let mut dht = Dht::new();
    let now = now_seconds();
    dht.store_entry(entry("flaky", "10.0.0.1", &["s1"], 100, now + 3600));
    dht.store_entry(entry("healthy", "10.0.0.2", &["s1"], 100, now + 3600));

    for _ in 0..4 {
        dht.record_probe_failure("flaky");
    }
    dht.record_probe_failure("healthy");

    // Only counters strictly above the threshold are evicted.
    let removed = dht.clean_by_liveness(3);
    assert_eq!(removed, 1);
    assert!(!dht.verify_entry("flaky"));
    assert!(dht.verify_entry("healthy"));
}

#[test]
fn test_entry_rebuilds_from_indexes() {
    let mut dht = Dht::new();
    let now = now_seconds();
    let mut stored = entry("node1", "10.0.0.1", &["s1", "s2"], 123, now + 3600);
    stored.information = "zone=eu".to_string();
    dht.store_entry(stored);

    let rebuilt = dht.entry("node1").unwrap();
    assert_eq!(rebuilt.node_id, "node1");
    assert_eq!(rebuilt.node_ip, "10.0.0.1");
    assert_eq!(rebuilt.generation_timestamp, 123);
    assert_eq!(rebuilt.expiry_timestamp, now + 3600);
    assert_eq!(rebuilt.information, "zone=eu");
    let shard_ids: Vec<&str> = rebuilt.node_shard.iter().map(|s| s.shard_id.as_str()).collect();
    assert_eq!(shard_ids, vec!["s1", "s2"]);

    assert!(dht.entry("unknown").is_none());
}

#[test]
fn test_ip_reassignment_keeps_bijection() {
    let mut dht = Dht::new();
    let now = now_seconds();
    // node2 takes over node1's address with a separate identity.
    dht.store_entry(entry("node1", "10.0.0.1", &["s1"], 100, now - 1));
    dht.store_entry(entry("node2", "10.0.0.1", &["s1"], 100, now + 3600));

    // Expiring node1 must not disturb node2's ip mapping.
    dht.clean_by_expiry_time();
    assert!(!dht.verify_entry("node1"));
    assert_eq!(dht.entry("node2").unwrap().node_ip, "10.0.0.1");
}

#[test]
fn test_wire_entry_roundtrip() {
    let json = r#"{
        "node_id": "n1",
        "node_ip": "1.1.1.1",
        "node_shard": [{"shard_id": "s1", "packages": []}],
        "generation_timestamp": 100,
        "expiry_timestamp": 200,
        "information": ""
    }"#;
    let parsed: DhtEntry = serde_json::from_str(json).unwrap();
    assert_eq!(parsed.node_id, "n1");
    assert_eq!(parsed.node_shard.len(), 1);

    let reencoded = serde_json::to_string(&parsed).unwrap();
    let reparsed: DhtEntry = serde_json::from_str(&reencoded).unwrap();
    assert_eq!(parsed, reparsed);
}

#[test]
fn test_wire_entry_optional_fields_default() {
    let json = r#"{
        "node_id": "n1",
        "node_ip": "1.1.1.1",
        "generation_timestamp": 100,
        "expiry_timestamp": 200
    }"#;
    let parsed: DhtEntry = serde_json::from_str(json).unwrap();
    assert!(parsed.node_shard.is_empty());
    assert_eq!(parsed.information, "");
}
