//! Lazy index wrapper: defers building until the first retrieval.
//!
//! Mutations buffer as pending `(key, record)` operations; the first
//! `retrieve` (or an explicit [`Index::materialize_now`]) replays the buffer
//! into the inner index in insertion order, reporting progress through an
//! optional callback every N records. Once built, everything delegates.

use std::cell::{Cell, RefCell};

use synq_core::value::Value;

use crate::attribute::ScalarValue;
use crate::query::QueryNode;
use crate::resultset::ResultSet;

use super::{Index, IndexKind, IndexStats, QueryKind};

/// Progress callback: `(records_replayed, total_records)`.
pub type ProgressCallback = Box<dyn Fn(usize, usize)>;

/// Default progress-report granularity.
pub const DEFAULT_PROGRESS_EVERY: usize = 100;

enum PendingOp {
    Add(String, Value),
    Remove(String, Value),
    Update(String, Value, Value),
}

/// Wraps any index with deferred materialization.
pub struct LazyIndex {
    inner: RefCell<Box<dyn Index>>,
    pending: RefCell<Vec<PendingOp>>,
    built: Cell<bool>,
    progress: Option<ProgressCallback>,
    progress_every: usize,
    // Copies of inner facts that must be readable without borrowing.
    name: String,
    kind: IndexKind,
    cost: u32,
    compound: Option<Vec<String>>,
}

impl LazyIndex {
    /// Wraps `inner`, buffering mutations until first retrieval.
    #[must_use]
    pub fn new(inner: Box<dyn Index>) -> Self {
        Self::with_progress(inner, None, DEFAULT_PROGRESS_EVERY)
    }

    /// Wraps `inner` with a progress callback fired every `every` records
    /// during materialization (and once at completion).
    #[must_use]
    pub fn with_progress(
        inner: Box<dyn Index>,
        progress: Option<ProgressCallback>,
        every: usize,
    ) -> Self {
        let name = inner.attribute().to_string();
        let kind = inner.kind();
        let cost = inner.retrieval_cost();
        let compound = inner.compound_attrs().map(<[String]>::to_vec);
        Self {
            inner: RefCell::new(inner),
            pending: RefCell::new(Vec::new()),
            built: Cell::new(false),
            progress,
            progress_every: every.max(1),
            name,
            kind,
            cost,
            compound,
        }
    }

    fn ensure_built(&self) {
        if self.built.get() {
            return;
        }
        self.built.set(true);
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let total = pending.len();
        let mut inner = self.inner.borrow_mut();
        for (processed, op) in pending.into_iter().enumerate() {
            match op {
                PendingOp::Add(key, record) => inner.add(&key, &record),
                PendingOp::Remove(key, record) => inner.remove(&key, &record),
                PendingOp::Update(key, old, new) => inner.update(&key, &old, &new),
            }
            if let Some(progress) = &self.progress {
                let done = processed + 1;
                if done % self.progress_every == 0 || done == total {
                    progress(done, total);
                }
            }
        }
    }
}

impl Index for LazyIndex {
    fn attribute(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IndexKind {
        self.kind
    }

    fn retrieval_cost(&self) -> u32 {
        self.cost
    }

    fn supports(&self, kind: QueryKind) -> bool {
        self.inner.borrow().supports(kind)
    }

    fn retrieve(&self, query: &QueryNode) -> Option<Box<dyn ResultSet>> {
        self.ensure_built();
        self.inner.borrow().retrieve(query)
    }

    fn add(&mut self, key: &str, record: &Value) {
        if self.built.get() {
            self.inner.get_mut().add(key, record);
        } else {
            self.pending
                .get_mut()
                .push(PendingOp::Add(key.to_string(), record.clone()));
        }
    }

    fn remove(&mut self, key: &str, record: &Value) {
        if self.built.get() {
            self.inner.get_mut().remove(key, record);
        } else {
            self.pending
                .get_mut()
                .push(PendingOp::Remove(key.to_string(), record.clone()));
        }
    }

    fn update(&mut self, key: &str, old: &Value, new: &Value) {
        if self.built.get() {
            self.inner.get_mut().update(key, old, new);
        } else {
            self.pending.get_mut().push(PendingOp::Update(
                key.to_string(),
                old.clone(),
                new.clone(),
            ));
        }
    }

    fn clear(&mut self) {
        self.pending.get_mut().clear();
        self.inner.get_mut().clear();
    }

    fn stats(&self) -> IndexStats {
        let mut stats = self.inner.borrow().stats();
        stats.pending = self.pending_count();
        stats
    }

    fn sorted_keys(&self, attr: &str, descending: bool) -> Option<Vec<String>> {
        self.ensure_built();
        self.inner.borrow().sorted_keys(attr, descending)
    }

    fn compound_attrs(&self) -> Option<&[String]> {
        self.compound.as_deref()
    }

    fn retrieve_compound(&self, values: &[ScalarValue]) -> Option<Box<dyn ResultSet>> {
        self.ensure_built();
        self.inner.borrow().retrieve_compound(values)
    }

    fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    fn is_lazy(&self) -> bool {
        true
    }

    fn is_built(&self) -> bool {
        self.built.get()
    }

    fn materialize_now(&mut self) {
        self.ensure_built();
    }
}
