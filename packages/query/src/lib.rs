//! `synq` query layer -- typed attributes, the index family, a cost-based
//! planner, live queries, and BM25 full-text search over the CRDT maps of
//! `synq-core`.
//!
//! The entry point is [`IndexedMap`]: it owns an LWW map and wires every
//! subsystem to its mutations:
//!
//! - **Attributes** ([`attribute`]): pure projections `record -> scalar(s)`
//! - **Queries** ([`query`]): predicate trees with canonical identity
//! - **Indexes** ([`index`]): hash, navigable, quantized, inverted,
//!   compound, standing, and the lazy wrapper
//! - **Result sets** ([`resultset`]): lazy costed algebra
//!   (intersection / union / filter / sort / limit)
//! - **Planner** ([`planner`]): cost-based step selection
//! - **Live queries** ([`live`]): standing indexes with synchronous initial
//!   snapshots and per-mutation deltas
//! - **Full-text** ([`fts`]): BM25 scoring plus live Top-K maintenance
//! - **Adaptive indexing** ([`adaptive`]): pattern tracking, suggestions,
//!   auto-creation
//! - **Debug** ([`debug`]): CRDT operation recorder and search recorder
//!
//! # Example
//!
//! ```
//! use synq_core::hlc::{HLC, SystemClock};
//! use synq_core::value::{object, Value};
//! use synq_query::map::IndexedMap;
//! use synq_query::query::{and, eq, gte};
//!
//! let hlc = HLC::new("node-1".to_string(), Box::new(SystemClock));
//! let mut users = IndexedMap::new("users", hlc);
//! users.add_hash_index("status");
//! users.add_navigable_index("age");
//!
//! users.set(
//!     "alice",
//!     object([("status", Value::from("active")), ("age", Value::Int(34))]),
//!     None,
//! );
//!
//! let keys = users
//!     .query(&and([eq("status", "active"), gte("age", 30_i64)]))
//!     .unwrap();
//! assert_eq!(keys, ["alice"]);
//! ```

pub mod adaptive;
pub mod attribute;
pub mod debug;
pub mod fts;
pub mod index;
pub mod live;
pub mod map;
pub mod planner;
pub mod query;
pub mod resultset;
pub mod text;

// Attributes
pub use attribute::{schema_attributes, Attribute, AttributeResolver, FieldType, ScalarValue};

// Queries
pub use query::{InvalidQuery, QueryNode};

// Indexes
pub use index::{Index, IndexKind, IndexRegistry, IndexStats, QueryKind};

// Result sets
pub use resultset::ResultSet;

// Planner
pub use planner::{plan, PlanStep, QueryPlan};

// Live queries
pub use live::{ChangeEventType, LiveQueryEvent, LiveQueryManager, LiveSubscription};

// Full-text search
pub use fts::{Bm25Config, Bm25Index, SearchHit, SearchOptions};

// Adaptive indexing
pub use adaptive::{AdvisorConfig, AutoIndexConfig, IndexSuggestion, PatternTracker};

// Debug recorders
pub use debug::{CrdtRecorder, SearchRecorder};

// Façade
pub use map::{DefaultIndexing, IndexedMap, IndexedMapOptions, QueryOptions, SortDirection};

#[cfg(test)]
mod tests {
    use synq_core::hlc::{HLC, SystemClock};
    use synq_core::value::{object, Value};

    use super::map::IndexedMap;
    use super::query::{contains, eq};

    #[test]
    fn crate_level_smoke() {
        let hlc = HLC::new("smoke-node".to_string(), Box::new(SystemClock));
        let mut map = IndexedMap::new("smoke", hlc);
        map.add_hash_index("kind");
        map.add_inverted_index("text");

        map.set(
            "a",
            object([
                ("kind", Value::from("note")),
                ("text", Value::from("lazy result sets compose")),
            ]),
            None,
        );
        map.set(
            "b",
            object([
                ("kind", Value::from("note")),
                ("text", Value::from("cost based planning")),
            ]),
            None,
        );

        assert_eq!(map.count(&eq("kind", "note")).unwrap(), 2);
        assert_eq!(map.query(&contains("text", "lazy")).unwrap(), ["a"]);
    }
}
