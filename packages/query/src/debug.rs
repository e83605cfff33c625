//! Debug recorders: CRDT operation capture and search explanation.
//!
//! Both recorders are explicit instances injected at construction, never
//! global singletons. [`CrdtRecorder::from_env`] honors `CRDT_DEBUG=true`
//! and [`SearchRecorder::from_env`] honors `TOPGUN_DEBUG=true`, matching
//! the environment contract of the original wire protocol.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use synq_core::hlc::Timestamp;
use synq_core::value::Value;

/// Schema version of debug exports.
pub const EXPORT_VERSION: &str = "1.0";

/// CSV header of operation exports.
pub const CSV_HEADER: &str =
    "id,timestamp_millis,timestamp_counter,operation,map_id,key,node_id,merkle_root";

/// One captured CRDT mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdtOperation {
    /// Monotone capture id.
    pub id: u64,
    /// Causal timestamp of the mutation.
    pub timestamp: Timestamp,
    /// `"set"`, `"delete"`, or `"merge"`.
    pub operation: String,
    /// Map the mutation targeted.
    pub map_id: String,
    /// Key the mutation targeted.
    pub key: String,
    /// Writing node.
    pub node_id: String,
    /// Merkle root after the mutation.
    pub merkle_root: u32,
    /// New value, when the operation carries one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,
}

/// One captured merge conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdtConflict {
    /// Map where the conflict occurred.
    pub map_id: String,
    /// Contested key.
    pub key: String,
    /// Timestamp of the local record.
    pub local_timestamp: Timestamp,
    /// Timestamp of the incoming record.
    pub remote_timestamp: Timestamp,
    /// Node whose record survived.
    pub winner_node_id: String,
}

/// Filter over captured operations. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct OperationFilter {
    /// Restrict to one map.
    pub map_id: Option<String>,
    /// Restrict to one node.
    pub node_id: Option<String>,
    /// Restrict to one operation name.
    pub operation: Option<String>,
    /// Only operations with `timestamp.millis >= since`.
    pub since: Option<u64>,
    /// Only operations with `timestamp.millis <= until`.
    pub until: Option<u64>,
    /// Cap the result count.
    pub limit: Option<usize>,
}

/// Aggregate statistics of the captured window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStatistics {
    /// Captured operation count.
    pub total_operations: u64,
    /// Count per operation name.
    pub operations_by_type: BTreeMap<String, u64>,
    /// Captured conflict count.
    pub total_conflicts: u64,
    /// Maps seen in the window.
    pub maps: BTreeSet<String>,
    /// Nodes seen in the window.
    pub nodes: BTreeSet<String>,
}

/// Wire shape of a debug export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugExport {
    /// Always `"1.0"`.
    pub version: String,
    /// Export time, millis (caller-supplied for determinism).
    pub exported_at: u64,
    /// Aggregates of the window.
    pub statistics: RecorderStatistics,
    /// Captured operations, oldest first.
    pub operations: Vec<CrdtOperation>,
    /// Captured conflicts, oldest first.
    pub conflicts: Vec<CrdtConflict>,
}

/// Difference between two replayed states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateDiff {
    /// Keys present only at the later timestamp.
    pub added: Vec<String>,
    /// Keys present only at the earlier timestamp.
    pub removed: Vec<String>,
    /// Keys present at both with different values.
    pub changed: Vec<String>,
}

/// Capped recorder of CRDT mutations and conflicts.
pub struct CrdtRecorder {
    enabled: bool,
    capacity: usize,
    operations: VecDeque<CrdtOperation>,
    conflicts: VecDeque<CrdtConflict>,
    next_id: u64,
}

impl CrdtRecorder {
    /// Default capture window.
    pub const DEFAULT_CAPACITY: usize = 1_000;

    /// A recorder with the given enablement and capacity.
    #[must_use]
    pub fn new(enabled: bool, capacity: usize) -> Self {
        Self {
            enabled,
            capacity: capacity.max(1),
            operations: VecDeque::new(),
            conflicts: VecDeque::new(),
            next_id: 0,
        }
    }

    /// A recorder enabled iff `CRDT_DEBUG=true` in the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var("CRDT_DEBUG").is_ok_and(|v| v == "true");
        Self::new(enabled, Self::DEFAULT_CAPACITY)
    }

    /// Whether capture is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns capture on or off (captured data is retained).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Drops all captured data.
    pub fn clear(&mut self) {
        self.operations.clear();
        self.conflicts.clear();
    }

    /// Captures one mutation.
    pub fn record_operation(
        &mut self,
        operation: &str,
        map_id: &str,
        key: &str,
        timestamp: Timestamp,
        merkle_root: u32,
        value: Option<Value>,
    ) {
        if !self.enabled {
            return;
        }
        let op = CrdtOperation {
            id: self.next_id,
            node_id: timestamp.node_id.clone(),
            timestamp,
            operation: operation.to_string(),
            map_id: map_id.to_string(),
            key: key.to_string(),
            merkle_root,
            value,
        };
        self.next_id += 1;
        self.operations.push_back(op);
        while self.operations.len() > self.capacity {
            self.operations.pop_front();
        }
    }

    /// Captures one observed conflict.
    pub fn record_conflict(&mut self, conflict: CrdtConflict) {
        if !self.enabled {
            return;
        }
        self.conflicts.push_back(conflict);
        while self.conflicts.len() > self.capacity {
            self.conflicts.pop_front();
        }
    }

    /// Captured operations matching a filter, oldest first.
    #[must_use]
    pub fn filter(&self, filter: &OperationFilter) -> Vec<&CrdtOperation> {
        let mut matched: Vec<&CrdtOperation> = self
            .operations
            .iter()
            .filter(|op| {
                filter.map_id.as_ref().is_none_or(|m| &op.map_id == m)
                    && filter.node_id.as_ref().is_none_or(|n| &op.node_id == n)
                    && filter.operation.as_ref().is_none_or(|o| &op.operation == o)
                    && filter.since.is_none_or(|s| op.timestamp.millis >= s)
                    && filter.until.is_none_or(|u| op.timestamp.millis <= u)
            })
            .collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Aggregates of the captured window.
    #[must_use]
    pub fn statistics(&self) -> RecorderStatistics {
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut maps = BTreeSet::new();
        let mut nodes = BTreeSet::new();
        for op in &self.operations {
            *by_type.entry(op.operation.clone()).or_insert(0) += 1;
            maps.insert(op.map_id.clone());
            nodes.insert(op.node_id.clone());
        }
        RecorderStatistics {
            total_operations: self.operations.len() as u64,
            operations_by_type: by_type,
            total_conflicts: self.conflicts.len() as u64,
            maps,
            nodes,
        }
    }

    /// Operation counts per time bucket of `bucket_ms`.
    #[must_use]
    pub fn timeline(&self, bucket_ms: u64) -> BTreeMap<u64, u64> {
        let bucket_ms = bucket_ms.max(1);
        let mut buckets = BTreeMap::new();
        for op in &self.operations {
            let bucket = (op.timestamp.millis / bucket_ms) * bucket_ms;
            *buckets.entry(bucket).or_insert(0) += 1;
        }
        buckets
    }

    /// JSON export of the full window.
    #[must_use]
    pub fn export_json(&self, exported_at: u64) -> String {
        let export = DebugExport {
            version: EXPORT_VERSION.to_string(),
            exported_at,
            statistics: self.statistics(),
            operations: self.operations.iter().cloned().collect(),
            conflicts: self.conflicts.iter().cloned().collect(),
        };
        serde_json::to_string_pretty(&export).expect("export serializes")
    }

    /// NDJSON export: one operation per line.
    #[must_use]
    pub fn export_ndjson(&self) -> String {
        self.operations
            .iter()
            .map(|op| serde_json::to_string(op).expect("operation serializes"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// CSV export with the fixed header.
    #[must_use]
    pub fn export_csv(&self) -> String {
        let mut out = String::from(CSV_HEADER);
        for op in &self.operations {
            out.push('\n');
            out.push_str(&format!(
                "{},{},{},{},{},{},{},{}",
                op.id,
                op.timestamp.millis,
                op.timestamp.counter,
                op.operation,
                op.map_id,
                op.key,
                op.node_id,
                op.merkle_root
            ));
        }
        out
    }

    /// Imports a JSON export, replacing the captured window.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or an unsupported schema version.
    pub fn import_json(&mut self, json: &str) -> anyhow::Result<()> {
        let export: DebugExport = serde_json::from_str(json)?;
        if export.version != EXPORT_VERSION {
            anyhow::bail!("unsupported debug export version: {}", export.version);
        }
        self.operations = export.operations.into();
        self.conflicts = export.conflicts.into();
        self.next_id = self
            .operations
            .iter()
            .map(|op| op.id + 1)
            .max()
            .unwrap_or(0);
        Ok(())
    }

    /// Rebuilds the logical visible state per map at `at` by merging the
    /// captured operations in timestamp order.
    ///
    /// `set`/`merge` operations install their value; `delete` hides the
    /// key. Later timestamps win, like the live merge rule.
    #[must_use]
    pub fn replay_to(&self, at: &Timestamp) -> BTreeMap<String, BTreeMap<String, Value>> {
        let mut winning: BTreeMap<(String, String), &CrdtOperation> = BTreeMap::new();
        for op in &self.operations {
            if op.timestamp > *at {
                continue;
            }
            let slot = (op.map_id.clone(), op.key.clone());
            match winning.get(&slot) {
                Some(existing) if existing.timestamp >= op.timestamp => {}
                _ => {
                    winning.insert(slot, op);
                }
            }
        }
        let mut state: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
        for ((map_id, key), op) in winning {
            if op.operation == "delete" {
                continue;
            }
            if let Some(value) = &op.value {
                state.entry(map_id).or_default().insert(key, value.clone());
            }
        }
        state
    }

    /// Difference of the replayed states at two timestamps, per key
    /// (map-qualified as `map/key`).
    #[must_use]
    pub fn diff(&self, earlier: &Timestamp, later: &Timestamp) -> StateDiff {
        let flatten = |state: BTreeMap<String, BTreeMap<String, Value>>| {
            let mut flat = BTreeMap::new();
            for (map_id, entries) in state {
                for (key, value) in entries {
                    flat.insert(format!("{map_id}/{key}"), value);
                }
            }
            flat
        };
        let before = flatten(self.replay_to(earlier));
        let after = flatten(self.replay_to(later));

        let mut diff = StateDiff::default();
        for (key, value) in &after {
            match before.get(key) {
                None => diff.added.push(key.clone()),
                Some(old) if old != value => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        for key in before.keys() {
            if !after.contains_key(key) {
                diff.removed.push(key.clone());
            }
        }
        diff
    }
}

/// Per-result score breakdown of the last search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// Result key.
    pub key: String,
    /// Final score.
    pub score: f64,
    /// BM25 component.
    pub bm25: f64,
    /// Matched query terms.
    pub matched_terms: Vec<String>,
}

/// Capture of one search execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCapture {
    /// The query text.
    pub query: String,
    /// Wall time of the search, milliseconds.
    pub timing_ms: f64,
    /// Per-result breakdowns, ranked.
    pub results: Vec<ScoreBreakdown>,
    /// Corpus size at search time.
    pub total_docs: u64,
}

/// Recorder keeping the last search's score breakdown.
pub struct SearchRecorder {
    enabled: bool,
    last: Option<SearchCapture>,
}

impl SearchRecorder {
    /// A recorder with explicit enablement.
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        Self { enabled, last: None }
    }

    /// A recorder enabled iff `TOPGUN_DEBUG=true` in the environment.
    #[must_use]
    pub fn from_env() -> Self {
        let enabled = std::env::var("TOPGUN_DEBUG").is_ok_and(|v| v == "true");
        Self::new(enabled)
    }

    /// Whether capture is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns capture on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Captures a search execution.
    pub fn record_search(&mut self, capture: SearchCapture) {
        if self.enabled {
            self.last = Some(capture);
        }
    }

    /// The last capture, if any.
    #[must_use]
    pub fn last(&self) -> Option<&SearchCapture> {
        self.last.as_ref()
    }

    /// Drops the capture.
    pub fn clear(&mut self) {
        self.last = None;
    }

    /// Human-readable explanation of the last search.
    #[must_use]
    pub fn explain(&self) -> String {
        let Some(capture) = &self.last else {
            return "no search recorded".to_string();
        };
        let mut out = format!(
            "query: {:?}\ndocs: {}  took: {:.3}ms  results: {}\n",
            capture.query,
            capture.total_docs,
            capture.timing_ms,
            capture.results.len()
        );
        for (rank, result) in capture.results.iter().enumerate() {
            out.push_str(&format!(
                "{:>3}. {}  score={:.4}  bm25={:.4}  terms=[{}]\n",
                rank + 1,
                result.key,
                result.score,
                result.bm25,
                result.matched_terms.join(", ")
            ));
        }
        out
    }
}
