//! `synq` core -- CRDT maps, Hybrid Logical Clock, Merkle summary tree,
//! conflict resolvers, and the event journal.
//!
//! This crate is the replication layer of the `synq` data library:
//!
//! - **HLC** ([`hlc`]): Hybrid Logical Clock for distributed causality
//! - **Hash** ([`hash`]): FNV-1a utilities for `MerkleTree` bucket routing
//! - **`MerkleTree`** ([`merkle`]): prefix trie for delta synchronization
//! - **Value** ([`value`]): dynamic record value type with dot-path access
//! - **Records** ([`records`]): `LWWRecord` / `ORMapRecord` wire shapes
//! - **`LWWMap`** ([`lww_map`]): last-write-wins map with tombstones and TTL
//! - **`ORMap`** ([`or_map`]): observed-remove multimap with add-wins merge
//! - **Resolvers** ([`resolver`]): pluggable merge policies with built-ins
//! - **Ring** ([`ring`]): fixed-capacity sequence-numbered log
//! - **Journal** ([`journal`]): append-only mutation log with replay
//!
//! The query layer (indexes, planner, live queries, full-text search) lives
//! in the sibling `synq-query` crate.

pub mod hash;
pub mod hlc;
pub mod journal;
pub mod lww_map;
pub mod merkle;
pub mod or_map;
pub mod records;
pub mod resolver;
pub mod ring;
pub mod value;

#[cfg(test)]
pub(crate) mod testutil;

// Hash
pub use hash::{combine_hashes, fnv1a_hash};

// HLC
pub use hlc::{ClockSource, HlcError, SystemClock, Timestamp, HLC};

// Records
pub use records::{LWWRecord, ORMapRecord};

// Value
pub use value::{canonical_json, object, Value};

// Merkle
pub use merkle::{MerkleNode, MerkleTree};

// Maps
pub use lww_map::{LWWMap, MapError, MergeOutcome};
pub use or_map::{MergeKeyResult, ORMap, ORMapSnapshot};

// Resolvers
pub use resolver::{
    builtins, InvalidResolverDef, MergeContext, MergeRejection, MergeVerdict, Principal,
    ResolverDef, ResolverError, ResolverRegistry,
};

// Ring buffer
pub use ring::{CapacityBelowOne, RingBuffer, RingCapacity};

// Journal
pub use journal::{
    EventJournal, JournalConfig, JournalError, JournalEvent, JournalEventDraft, JournalEventType,
};
