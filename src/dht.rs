use std::collections::BTreeSet;
use std::time::SystemTime;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A named subset of repository packages a peer claims to serve.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Shard {
    pub shard_id: String,
    #[serde(default)]
    pub packages: Vec<String>,
}

/// Wire form of a peer record. `liveness` is tracked internally and never
/// travels with the entry.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct DhtEntry {
    pub node_id: String,
    pub node_ip: String,
    #[serde(default)]
    pub node_shard: Vec<Shard>,
    pub generation_timestamp: i64,
    pub expiry_timestamp: i64,
    #[serde(default)]
    pub information: String,
}

/// In-memory index of peer nodes. Nine coupled maps are kept pairwise
/// consistent: membership is canonical in the generation map, the ip
/// mapping is a bijection over live nodes, and the ordered expiry set
/// mirrors the per-node expiry map so sweeps stop at the first live entry.
#[derive(Debug, Default)]
pub struct Dht {
    node_ip_to_node_id: FxHashMap<String, String>,
    node_id_to_node_ip: FxHashMap<String, String>,
    node_id_to_generation: FxHashMap<String, i64>,
    expiry_to_node_id: BTreeSet<(i64, String)>,
    node_id_to_expiry: FxHashMap<String, i64>,
    shard_id_to_node_ids: FxHashMap<String, BTreeSet<String>>,
    node_id_to_shard_ids: FxHashMap<String, BTreeSet<String>>,
    node_id_to_information: FxHashMap<String, String>,
    node_id_to_liveness: FxHashMap<String, i32>,
}

impl Dht {
    pub fn new() -> Self {
        Dht::default()
    }

    /// Canonical membership test.
    pub fn verify_entry(&self, node_id: &str) -> bool {
        self.node_id_to_generation.contains_key(node_id)
    }

    pub fn len(&self) -> usize {
        self.node_id_to_generation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_id_to_generation.is_empty()
    }

    /// Insert a record, or replace an existing one when the incoming
    /// generation is strictly newer. Shard membership is replaced in full.
    pub fn store_entry(&mut self, entry: DhtEntry) {
        if self.verify_entry(&entry.node_id) {
            if self.node_id_to_generation[&entry.node_id] < entry.generation_timestamp {
                self.remove_entry(&entry.node_id);
            } else {
                return;
            }
        }

        self.node_ip_to_node_id
            .insert(entry.node_ip.clone(), entry.node_id.clone());
        self.node_id_to_node_ip
            .insert(entry.node_id.clone(), entry.node_ip);
        self.node_id_to_generation
            .insert(entry.node_id.clone(), entry.generation_timestamp);
        self.expiry_to_node_id
            .insert((entry.expiry_timestamp, entry.node_id.clone()));
        self.node_id_to_expiry
            .insert(entry.node_id.clone(), entry.expiry_timestamp);
        for shard in entry.node_shard {
            self.shard_id_to_node_ids
                .entry(shard.shard_id.clone())
                .or_default()
                .insert(entry.node_id.clone());
            self.node_id_to_shard_ids
                .entry(entry.node_id.clone())
                .or_default()
                .insert(shard.shard_id);
        }
        self.node_id_to_information
            .insert(entry.node_id.clone(), entry.information);
        self.node_id_to_liveness.insert(entry.node_id, 0);
    }

    /// Node ids registered for a shard, in lexical order. Returns a
    /// snapshot so callers never hold a borrow across a mutation.
    pub fn query_node_ids_by_shard_id(&self, shard_id: &str) -> Option<Vec<String>> {
        self.shard_id_to_node_ids
            .get(shard_id)
            .map(|ids| ids.iter().cloned().collect())
    }

    /// Rebuild the wire entry for a node from the indexes. Shard package
    /// lists are not retained by the index and come back empty.
    pub fn entry(&self, node_id: &str) -> Option<DhtEntry> {
        let generation_timestamp = *self.node_id_to_generation.get(node_id)?;
        Some(DhtEntry {
            node_id: node_id.to_string(),
            node_ip: self.node_id_to_node_ip.get(node_id).cloned().unwrap_or_default(),
            node_shard: self
                .node_id_to_shard_ids
                .get(node_id)
                .map(|ids| {
                    ids.iter()
                        .map(|shard_id| Shard {
                            shard_id: shard_id.clone(),
                            packages: Vec::new(),
                        })
                        .collect()
                })
                .unwrap_or_default(),
            generation_timestamp,
            expiry_timestamp: self.node_id_to_expiry.get(node_id).copied().unwrap_or(0),
            information: self
                .node_id_to_information
                .get(node_id)
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Remove every node whose expiry timestamp has passed. The ordered
    /// expiry index lets the scan stop at the first live entry.
    pub fn clean_by_expiry_time(&mut self) -> usize {
        let now = now_seconds();
        let expired: Vec<String> = self
            .expiry_to_node_id
            .iter()
            .take_while(|(expiry, _)| *expiry <= now)
            .map(|(_, node_id)| node_id.clone())
            .collect();

        for node_id in &expired {
            self.remove_entry(node_id);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "expiry sweep removed entries");
        }
        expired.len()
    }

    /// Remove every node whose failed-probe counter exceeds the threshold.
    pub fn clean_by_liveness(&mut self, threshold: i32) -> usize {
        let unhealthy: Vec<String> = self
            .node_id_to_liveness
            .iter()
            .filter(|(_, liveness)| **liveness > threshold)
            .map(|(node_id, _)| node_id.clone())
            .collect();

        for node_id in &unhealthy {
            self.remove_entry(node_id);
        }
        if !unhealthy.is_empty() {
            debug!(removed = unhealthy.len(), "liveness sweep removed entries");
        }
        unhealthy.len()
    }

    /// Count a failed probe against a node; returns the new counter.
    pub fn record_probe_failure(&mut self, node_id: &str) -> Option<i32> {
        let liveness = self.node_id_to_liveness.get_mut(node_id)?;
        *liveness += 1;
        Some(*liveness)
    }

    /// A successful probe resets the counter.
    pub fn record_probe_success(&mut self, node_id: &str) {
        if let Some(liveness) = self.node_id_to_liveness.get_mut(node_id) {
            *liveness = 0;
        }
    }

    // The single deletion site: every public mutation that removes a node
    // routes through here so all nine indexes stay consistent.
    fn remove_entry(&mut self, node_id: &str) {
        if !self.verify_entry(node_id) {
            return;
        }

        if let Some(node_ip) = self.node_id_to_node_ip.get(node_id) {
            if self.node_ip_to_node_id.get(node_ip).map(String::as_str) == Some(node_id) {
                let node_ip = node_ip.clone();
                self.node_ip_to_node_id.remove(&node_ip);
            }
        }
        self.node_id_to_node_ip.remove(node_id);
        self.node_id_to_generation.remove(node_id);
        if let Some(shard_ids) = self.node_id_to_shard_ids.remove(node_id) {
            for shard_id in shard_ids {
                if let Some(node_ids) = self.shard_id_to_node_ids.get_mut(&shard_id) {
                    node_ids.remove(node_id);
                    if node_ids.is_empty() {
                        self.shard_id_to_node_ids.remove(&shard_id);
                    }
                }
            }
        }
        if let Some(expiry) = self.node_id_to_expiry.remove(node_id) {
            self.expiry_to_node_id.remove(&(expiry, node_id.to_string()));
        }
        self.node_id_to_information.remove(node_id);
        self.node_id_to_liveness.remove(node_id);
    }
}

fn now_seconds() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
