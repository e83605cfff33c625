//! Merkle summary tree for efficient delta synchronization.
//!
//! A prefix trie of fixed depth keyed by the lowercase hex digits of the
//! FNV-1a hash of the **entry key** (not the record), so a key always routes
//! to the same bucket regardless of its record's content. Leaves hold
//! `key -> u32` content hashes; every node's hash is the wrapping sum of its
//! children's (or entries') hashes, which keeps incremental updates O(depth).
//!
//! Replicas compare root hashes, descend into divergent buckets via
//! [`MerkleTree::get_buckets`], and finally request the concrete keys of a
//! divergent leaf via [`MerkleTree::get_keys_in_bucket`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hash::fnv1a_hash;

/// Default trie depth. Three hex digits give 4096 leaf buckets.
pub const DEFAULT_DEPTH: usize = 3;

/// A node in the summary tree.
///
/// Internal nodes carry `children`; leaves carry `entries`. The root of an
/// empty tree has neither. This shape is the wire representation exchanged
/// by anti-entropy protocols.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MerkleNode {
    /// Wrapping sum of child hashes (internal) or entry hashes (leaf).
    pub hash: u32,
    /// Child nodes keyed by one lowercase hex digit.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub children: Option<BTreeMap<char, MerkleNode>>,
    /// Leaf entries: key -> content hash.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entries: Option<BTreeMap<String, u32>>,
}

impl MerkleNode {
    fn child_hashes(&self) -> BTreeMap<char, u32> {
        self.children
            .as_ref()
            .map(|children| children.iter().map(|(c, n)| (*c, n.hash)).collect())
            .unwrap_or_default()
    }

    fn recompute_hash(&mut self) {
        let sum = if let Some(entries) = &self.entries {
            entries.values().fold(0_u32, |acc, h| acc.wrapping_add(*h))
        } else if let Some(children) = &self.children {
            children
                .values()
                .fold(0_u32, |acc, n| acc.wrapping_add(n.hash))
        } else {
            0
        };
        self.hash = sum;
    }
}

/// Incremental hash trie over `(key -> content hash)`.
///
/// The content hash of a record is conventionally
/// `fnv1a_hash("{key}:{timestamp}")`, computed by the owning map; the tree
/// itself never sees record values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleTree {
    depth: usize,
    root: MerkleNode,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new(DEFAULT_DEPTH)
    }
}

impl MerkleTree {
    /// Creates an empty tree with the given trie depth, clamped to
    /// `1..=8` (the routing hash has eight hex digits).
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.clamp(1, 8),
            root: MerkleNode::default(),
        }
    }

    /// Creates an empty tree with [`DEFAULT_DEPTH`].
    #[must_use]
    pub fn default_depth() -> Self {
        Self::default()
    }

    /// The configured trie depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Routing path for a key: the first `depth` lowercase hex digits of
    /// `fnv1a_hash(key)`.
    #[must_use]
    pub fn path_for_key(&self, key: &str) -> String {
        let hex = format!("{:08x}", fnv1a_hash(key));
        hex[..self.depth].to_string()
    }

    /// Inserts or replaces the content hash for a key and recomputes hashes
    /// along the routing path up to the root.
    pub fn update(&mut self, key: &str, content_hash: u32) {
        let path: Vec<char> = self.path_for_key(key).chars().collect();
        Self::update_node(&mut self.root, &path, key, content_hash);
    }

    fn update_node(node: &mut MerkleNode, path: &[char], key: &str, content_hash: u32) {
        if path.is_empty() {
            node.entries
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), content_hash);
        } else {
            let child = node
                .children
                .get_or_insert_with(BTreeMap::new)
                .entry(path[0])
                .or_default();
            Self::update_node(child, &path[1..], key, content_hash);
        }
        node.recompute_hash();
    }

    /// Removes a key's entry, if present, and recomputes hashes up to the
    /// root. Empty leaves are retained; per-key routing stays stable either
    /// way.
    pub fn remove(&mut self, key: &str) {
        let path: Vec<char> = self.path_for_key(key).chars().collect();
        Self::remove_node(&mut self.root, &path, key);
    }

    fn remove_node(node: &mut MerkleNode, path: &[char], key: &str) -> bool {
        let removed = if path.is_empty() {
            node.entries
                .as_mut()
                .is_some_and(|entries| entries.remove(key).is_some())
        } else {
            match node.children.as_mut().and_then(|c| c.get_mut(&path[0])) {
                Some(child) => Self::remove_node(child, &path[1..], key),
                None => false,
            }
        };
        if removed {
            node.recompute_hash();
        }
        removed
    }

    /// Root hash of the tree. 0 for an empty tree.
    #[must_use]
    pub fn get_root_hash(&self) -> u32 {
        self.root.hash
    }

    /// Child-bucket hashes of the node at `path` (`""` for the root).
    ///
    /// Returns `None` if no node exists at that path or the node is a leaf.
    /// Diff algorithms call this level by level to descend into divergent
    /// subtrees.
    #[must_use]
    pub fn get_buckets(&self, path: &str) -> Option<BTreeMap<char, u32>> {
        let node = self.node_at(path)?;
        node.children.as_ref()?;
        Some(node.child_hashes())
    }

    /// Keys stored in the leaf at `leaf_path` (a full-depth path).
    ///
    /// Returns an empty list for missing leaves so callers can treat
    /// "absent bucket" and "empty bucket" uniformly during anti-entropy.
    #[must_use]
    pub fn get_keys_in_bucket(&self, leaf_path: &str) -> Vec<String> {
        self.node_at(leaf_path)
            .and_then(|node| node.entries.as_ref())
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// The root node in wire shape, for snapshot exchange.
    #[must_use]
    pub fn root(&self) -> &MerkleNode {
        &self.root
    }

    /// Returns the full-depth paths of leaves whose hashes differ between
    /// the two trees, in lexicographic order. A leaf present on only one
    /// side counts as divergent.
    #[must_use]
    pub fn diff(&self, other: &MerkleTree) -> Vec<String> {
        let mut divergent = Vec::new();
        Self::diff_nodes(
            Some(&self.root),
            Some(&other.root),
            String::new(),
            self.depth.max(other.depth),
            &mut divergent,
        );
        divergent
    }

    fn diff_nodes(
        a: Option<&MerkleNode>,
        b: Option<&MerkleNode>,
        path: String,
        depth: usize,
        out: &mut Vec<String>,
    ) {
        let hash_a = a.map_or(0, |n| n.hash);
        let hash_b = b.map_or(0, |n| n.hash);
        if hash_a == hash_b {
            return;
        }
        if path.len() == depth {
            out.push(path);
            return;
        }
        let empty = BTreeMap::new();
        let children_a = a.and_then(|n| n.children.as_ref()).unwrap_or(&empty);
        let children_b = b.and_then(|n| n.children.as_ref()).unwrap_or(&empty);
        let mut digits: Vec<char> = children_a.keys().chain(children_b.keys()).copied().collect();
        digits.sort_unstable();
        digits.dedup();
        for digit in digits {
            let mut child_path = path.clone();
            child_path.push(digit);
            Self::diff_nodes(
                children_a.get(&digit),
                children_b.get(&digit),
                child_path,
                depth,
                out,
            );
        }
    }

    fn node_at(&self, path: &str) -> Option<&MerkleNode> {
        let mut node = &self.root;
        for digit in path.chars() {
            node = node.children.as_ref()?.get(&digit)?;
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content_hash(key: &str, stamp: &str) -> u32 {
        fnv1a_hash(&format!("{key}:{stamp}"))
    }

    // ---- Root hash behavior ----

    #[test]
    fn empty_tree_has_zero_root() {
        let tree = MerkleTree::default_depth();
        assert_eq!(tree.get_root_hash(), 0);
    }

    #[test]
    fn update_changes_root_hash() {
        let mut tree = MerkleTree::default_depth();
        tree.update("key1", content_hash("key1", "1:0:a"));
        assert_ne!(tree.get_root_hash(), 0);
    }

    #[test]
    fn replacing_entry_changes_root() {
        let mut tree = MerkleTree::default_depth();
        tree.update("key1", 111);
        let first = tree.get_root_hash();
        tree.update("key1", 222);
        assert_ne!(tree.get_root_hash(), first);
    }

    #[test]
    fn remove_restores_prior_root() {
        let mut tree = MerkleTree::default_depth();
        tree.update("a", 1);
        let with_a = tree.get_root_hash();
        tree.update("b", 2);
        tree.remove("b");
        assert_eq!(tree.get_root_hash(), with_a);
    }

    #[test]
    fn remove_unknown_key_is_noop() {
        let mut tree = MerkleTree::default_depth();
        tree.update("a", 1);
        let before = tree.get_root_hash();
        tree.remove("never-inserted");
        assert_eq!(tree.get_root_hash(), before);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut forward = MerkleTree::default_depth();
        let mut reverse = MerkleTree::default_depth();
        let entries = [("k1", 10_u32), ("k2", 20), ("k3", 30)];
        for (key, hash) in entries {
            forward.update(key, hash);
        }
        for (key, hash) in entries.iter().rev() {
            reverse.update(key, *hash);
        }
        assert_eq!(forward.get_root_hash(), reverse.get_root_hash());
    }

    // ---- Routing ----

    #[test]
    fn path_is_stable_and_depth_limited() {
        let tree = MerkleTree::new(3);
        let path = tree.path_for_key("user:1");
        assert_eq!(path.len(), 3);
        assert_eq!(path, tree.path_for_key("user:1"));
        assert!(path.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn depth_is_clamped_to_one() {
        let tree = MerkleTree::new(0);
        assert_eq!(tree.depth(), 1);
    }

    // ---- Buckets ----

    #[test]
    fn buckets_descend_to_divergent_leaf() {
        let mut tree = MerkleTree::new(2);
        tree.update("alpha", 7);
        let path = tree.path_for_key("alpha");

        let root_buckets = tree.get_buckets("").expect("root has children");
        let first: char = path.chars().next().unwrap();
        assert!(root_buckets.contains_key(&first));

        let level1 = tree
            .get_buckets(&first.to_string())
            .expect("internal node has children");
        let second: char = path.chars().nth(1).unwrap();
        assert_eq!(level1.get(&second), Some(&7));

        let keys = tree.get_keys_in_bucket(&path);
        assert_eq!(keys, vec!["alpha".to_string()]);
    }

    #[test]
    fn buckets_of_missing_path_is_none() {
        let tree = MerkleTree::new(2);
        assert_eq!(tree.get_buckets("f"), None);
    }

    #[test]
    fn keys_in_missing_bucket_is_empty() {
        let tree = MerkleTree::new(2);
        assert!(tree.get_keys_in_bucket("ff").is_empty());
    }

    #[test]
    fn empty_leaf_is_retained_after_remove() {
        let mut tree = MerkleTree::new(2);
        tree.update("alpha", 7);
        let path = tree.path_for_key("alpha");
        tree.remove("alpha");
        // Leaf still exists, just empty.
        assert!(tree.get_keys_in_bucket(&path).is_empty());
        assert_eq!(tree.get_root_hash(), 0);
    }

    // ---- Diff ----

    #[test]
    fn identical_trees_have_empty_diff() {
        let mut a = MerkleTree::default_depth();
        let mut b = MerkleTree::default_depth();
        a.update("k", 42);
        b.update("k", 42);
        assert!(a.diff(&b).is_empty());
    }

    #[test]
    fn diff_pinpoints_divergent_leaf() {
        let mut a = MerkleTree::default_depth();
        let mut b = MerkleTree::default_depth();
        a.update("shared", 1);
        b.update("shared", 1);
        a.update("only-in-a", 2);

        let divergent = a.diff(&b);
        assert_eq!(divergent, vec![a.path_for_key("only-in-a")]);
    }

    #[test]
    fn diff_is_symmetric() {
        let mut a = MerkleTree::default_depth();
        let mut b = MerkleTree::default_depth();
        a.update("x", 1);
        b.update("y", 2);
        assert_eq!(a.diff(&b), b.diff(&a));
    }

    // ---- Wire shape ----

    #[test]
    fn node_serializes_without_empty_fields() {
        let mut tree = MerkleTree::new(1);
        tree.update("k", 5);
        let json = serde_json::to_value(tree.root()).expect("serialize root");
        assert!(json.get("children").is_some());
        // The root is internal: no entries field serialized.
        assert!(json.get("entries").is_none());
    }

    #[test]
    fn node_roundtrips_through_json() {
        let mut tree = MerkleTree::new(2);
        tree.update("k1", 5);
        tree.update("k2", 9);
        let json = serde_json::to_string(tree.root()).expect("serialize");
        let decoded: MerkleNode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(&decoded, tree.root());
    }
}
