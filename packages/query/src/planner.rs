//! Cost-based query planner.
//!
//! Compiles a [`QueryNode`] tree into a [`PlanStep`] tree against the
//! registered indexes. Planning is purely structural -- execution happens in
//! the indexed façade, which interprets the plan into a result-set tree.
//!
//! Selection rules, in order:
//!
//! 1. A standing query matching the whole tree wins outright (cost 10).
//! 2. A simple node takes the cheapest index on its attribute that supports
//!    its query kind, else a full scan with the node as predicate.
//! 3. An `and` prefers a compound index covering its leading `eq` prefix;
//!    otherwise all-indexed children intersect, and a partially indexed
//!    `and` leads with its cheapest indexed child and filters the rest.
//! 4. An `or` unions when every child is indexable, else full-scans.
//! 5. A `not` plans its child and subtracts (cost 100 + child).
//!
//! A full scan always carries a predicate; a query with no predicate is
//! rejected at validation, never routed to the fallback.

use crate::attribute::ScalarValue;
use crate::index::{IndexRegistry, QueryKind, COST_FALLBACK, COST_STANDING};
use crate::query::{InvalidQuery, QueryNode};

/// Cost surcharge of a `not` step over its child.
pub const COST_NOT: u64 = 100;

/// Answers whether a standing index exists for a canonical query hash.
pub trait StandingLookup {
    /// Whether a standing index is registered under `hash`.
    fn has_standing(&self, hash: u32) -> bool;
}

/// A no-standing-queries lookup.
pub struct NoStanding;

impl StandingLookup for NoStanding {
    fn has_standing(&self, _hash: u32) -> bool {
        false
    }
}

/// One node of an executable plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanStep {
    /// Read a standing query's materialized result set.
    StandingLookup {
        /// Canonical query hash identifying the standing index.
        hash: u32,
    },
    /// Retrieve a simple query through one index.
    IndexScan {
        /// Registry handle of the chosen index.
        index_id: u64,
        /// The simple node the index answers.
        query: QueryNode,
        /// The index's retrieval cost.
        cost: u32,
    },
    /// Equality lookup over a compound index prefix.
    CompoundLookup {
        /// Registry handle of the compound index.
        index_id: u64,
        /// Covered attribute names, in index order.
        attrs: Vec<String>,
        /// Equality values, aligned with `attrs`.
        values: Vec<ScalarValue>,
    },
    /// Intersect child results.
    Intersection {
        /// Child steps.
        children: Vec<PlanStep>,
    },
    /// Union child results.
    Union {
        /// Child steps.
        children: Vec<PlanStep>,
    },
    /// Filter a source by a residual predicate.
    Filter {
        /// The driving step.
        source: Box<PlanStep>,
        /// Predicate applied to each fetched record.
        predicate: QueryNode,
    },
    /// Evaluate a predicate against every record.
    FullScan {
        /// The predicate; never absent.
        predicate: QueryNode,
    },
    /// Subtract the child's keys from all keys.
    Not {
        /// The negated step.
        source: Box<PlanStep>,
    },
}

impl PlanStep {
    /// Estimated retrieval cost of this step.
    #[must_use]
    pub fn cost(&self) -> u64 {
        match self {
            PlanStep::StandingLookup { .. } => u64::from(COST_STANDING),
            PlanStep::IndexScan { cost, .. } => u64::from(*cost),
            PlanStep::CompoundLookup { .. } => u64::from(crate::index::COST_COMPOUND),
            PlanStep::Intersection { children } => {
                children.iter().map(PlanStep::cost).min().unwrap_or(0)
            }
            PlanStep::Union { children } => children
                .iter()
                .fold(0_u64, |acc, child| acc.saturating_add(child.cost())),
            PlanStep::Filter { source, .. } => source.cost().saturating_add(10),
            PlanStep::FullScan { .. } => u64::from(COST_FALLBACK),
            PlanStep::Not { source } => source.cost().saturating_add(COST_NOT),
        }
    }

    /// Whether this step (or any descendant) reads an index.
    #[must_use]
    pub fn uses_indexes(&self) -> bool {
        match self {
            PlanStep::StandingLookup { .. }
            | PlanStep::IndexScan { .. }
            | PlanStep::CompoundLookup { .. } => true,
            PlanStep::Intersection { children } | PlanStep::Union { children } => {
                children.iter().any(PlanStep::uses_indexes)
            }
            PlanStep::Filter { source, .. } | PlanStep::Not { source } => source.uses_indexes(),
            PlanStep::FullScan { .. } => false,
        }
    }

    fn is_full_scan(&self) -> bool {
        matches!(self, PlanStep::FullScan { .. })
    }
}

/// A compiled plan.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Root step.
    pub root: PlanStep,
    /// Whether any step reads an index.
    pub uses_indexes: bool,
    /// Estimated cost of the root.
    pub estimated_cost: u64,
}

/// Compiles `query` against `registry`, consulting `standing` for
/// whole-query standing matches.
///
/// # Errors
///
/// Propagates [`InvalidQuery`] from validation; no plan is produced for an
/// invalid tree.
pub fn plan(
    query: &QueryNode,
    registry: &IndexRegistry,
    standing: &dyn StandingLookup,
) -> Result<QueryPlan, InvalidQuery> {
    query.validate()?;
    let root = plan_node(query, registry, standing);
    Ok(QueryPlan {
        uses_indexes: root.uses_indexes(),
        estimated_cost: root.cost(),
        root,
    })
}

fn plan_node(
    query: &QueryNode,
    registry: &IndexRegistry,
    standing: &dyn StandingLookup,
) -> PlanStep {
    let hash = query.canonical_hash();
    if standing.has_standing(hash) {
        return PlanStep::StandingLookup { hash };
    }

    match query {
        QueryNode::And { children } => plan_and(children, registry, standing, query),
        QueryNode::Or { children } => plan_or(children, registry, standing, query),
        QueryNode::Not { child } => PlanStep::Not {
            source: Box::new(plan_node(child, registry, standing)),
        },
        simple => plan_simple(simple, registry),
    }
}

fn plan_simple(node: &QueryNode, registry: &IndexRegistry) -> PlanStep {
    let Some(kind) = QueryKind::of(node) else {
        // Logical nodes never reach here.
        return PlanStep::FullScan { predicate: node.clone() };
    };
    let attr = node.attribute().unwrap_or_default();
    match registry.candidates(attr, kind).first() {
        Some(entry) => PlanStep::IndexScan {
            index_id: entry.id,
            query: node.clone(),
            cost: entry.index.retrieval_cost(),
        },
        None => PlanStep::FullScan { predicate: node.clone() },
    }
}

/// The leading run of `eq` children, as `(attr, value)` pairs.
fn leading_eq_prefix(children: &[QueryNode]) -> Vec<(&str, &ScalarValue)> {
    let mut prefix = Vec::new();
    for child in children {
        match child {
            QueryNode::Eq { attr, value } => prefix.push((attr.as_str(), value)),
            _ => break,
        }
    }
    prefix
}

/// Looks for a compound index covering at least two of the leading `eq`
/// children; returns the lookup step plus how many children it consumed.
fn compound_candidate(
    children: &[QueryNode],
    registry: &IndexRegistry,
) -> Option<(PlanStep, usize)> {
    let prefix = leading_eq_prefix(children);
    if prefix.len() < 2 {
        return None;
    }
    let mut best: Option<(u64, usize, Vec<String>)> = None;
    for entry in registry.iter() {
        let Some(attrs) = entry.index.compound_attrs() else {
            continue;
        };
        let covered = prefix.len().min(attrs.len());
        if covered < 2 {
            continue;
        }
        let aligned = attrs
            .iter()
            .take(covered)
            .zip(prefix.iter())
            .all(|(index_attr, (query_attr, _))| index_attr == query_attr);
        if !aligned {
            continue;
        }
        // Prefer the widest coverage.
        if best.as_ref().is_none_or(|(_, width, _)| covered > *width) {
            best = Some((entry.id, covered, attrs[..covered].to_vec()));
        }
    }
    let (index_id, covered, attrs) = best?;
    let values: Vec<ScalarValue> = prefix[..covered]
        .iter()
        .map(|(_, value)| (*value).clone())
        .collect();
    Some((
        PlanStep::CompoundLookup {
            index_id,
            attrs,
            values,
        },
        covered,
    ))
}

fn plan_and(
    children: &[QueryNode],
    registry: &IndexRegistry,
    standing: &dyn StandingLookup,
    whole: &QueryNode,
) -> PlanStep {
    // Compound coverage of the leading eq prefix beats per-attribute scans.
    if let Some((compound_step, covered)) = compound_candidate(children, registry) {
        let remainder = &children[covered..];
        if remainder.is_empty() {
            return compound_step;
        }
        let residual = QueryNode::And { children: remainder.to_vec() };
        return PlanStep::Filter {
            source: Box::new(compound_step),
            predicate: residual,
        };
    }

    let plans: Vec<PlanStep> = children
        .iter()
        .map(|child| plan_node(child, registry, standing))
        .collect();

    if plans.iter().all(|p| !p.is_full_scan()) {
        return PlanStep::Intersection { children: plans };
    }

    // Partially indexed: cheapest indexed child leads, the rest filter.
    let lead = plans
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.is_full_scan())
        .min_by_key(|(_, p)| p.cost());
    match lead {
        Some((lead_idx, _)) => {
            let residual_children: Vec<QueryNode> = children
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != lead_idx)
                .map(|(_, child)| child.clone())
                .collect();
            let source = plans.into_iter().nth(lead_idx).expect("lead index in range");
            if residual_children.is_empty() {
                source
            } else {
                PlanStep::Filter {
                    source: Box::new(source),
                    predicate: QueryNode::And { children: residual_children },
                }
            }
        }
        // No child indexed at all: one scan over the whole conjunction.
        None => PlanStep::FullScan { predicate: whole.clone() },
    }
}

fn plan_or(
    children: &[QueryNode],
    registry: &IndexRegistry,
    standing: &dyn StandingLookup,
    whole: &QueryNode,
) -> PlanStep {
    let plans: Vec<PlanStep> = children
        .iter()
        .map(|child| plan_node(child, registry, standing))
        .collect();
    if plans.iter().all(|p| !p.is_full_scan()) {
        PlanStep::Union { children: plans }
    } else {
        // A single disjunct without an index already forces one pass over
        // everything; evaluate the whole disjunction there.
        PlanStep::FullScan { predicate: whole.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::Attribute;
    use crate::index::compound::CompoundIndex;
    use crate::index::hash::HashIndex;
    use crate::index::inverted::InvertedIndex;
    use crate::index::navigable::NavigableIndex;
    use crate::index::{COST_HASH, COST_NAVIGABLE};
    use crate::query::{and, between, contains, eq, gte, is_in, like, not, or};

    struct StandingSet(Vec<u32>);

    impl StandingLookup for StandingSet {
        fn has_standing(&self, hash: u32) -> bool {
            self.0.contains(&hash)
        }
    }

    fn registry() -> IndexRegistry {
        let mut registry = IndexRegistry::new();
        registry.add(Box::new(HashIndex::new(Attribute::field("status"))));
        registry.add(Box::new(NavigableIndex::new(Attribute::field("age"))));
        registry.add(Box::new(InvertedIndex::new(Attribute::field("bio"))));
        registry
    }

    #[test]
    fn standing_match_wins_over_everything() {
        let registry = registry();
        let query = eq("status", "active");
        let standing = StandingSet(vec![query.canonical_hash()]);
        let plan = plan(&query, &registry, &standing).unwrap();
        assert_eq!(
            plan.root,
            PlanStep::StandingLookup { hash: query.canonical_hash() }
        );
        assert_eq!(plan.estimated_cost, 10);
        assert!(plan.uses_indexes);
    }

    #[test]
    fn simple_node_picks_cheapest_supporting_index() {
        let mut registry = registry();
        // A second index on status that also answers eq but costs more.
        registry.add(Box::new(NavigableIndex::new(Attribute::field("status"))));

        let plan = plan(&eq("status", "active"), &registry, &NoStanding).unwrap();
        match plan.root {
            PlanStep::IndexScan { cost, .. } => assert_eq!(cost, COST_HASH),
            other => panic!("expected index scan, got {other:?}"),
        }
    }

    #[test]
    fn range_goes_to_navigable() {
        let registry = registry();
        let plan = plan(&between("age", 30_i64, 40_i64), &registry, &NoStanding).unwrap();
        match plan.root {
            PlanStep::IndexScan { cost, .. } => assert_eq!(cost, COST_NAVIGABLE),
            other => panic!("expected index scan, got {other:?}"),
        }
    }

    #[test]
    fn unindexed_attribute_full_scans_with_predicate() {
        let registry = registry();
        let query = like("name", "al%");
        let plan = plan(&query, &registry, &NoStanding).unwrap();
        assert_eq!(plan.root, PlanStep::FullScan { predicate: query });
        assert!(!plan.uses_indexes);
        assert_eq!(plan.estimated_cost, u64::from(COST_FALLBACK));
    }

    #[test]
    fn fully_indexed_and_intersects() {
        let registry = registry();
        let plan = plan(
            &and([eq("status", "active"), gte("age", 30_i64)]),
            &registry,
            &NoStanding,
        )
        .unwrap();
        match &plan.root {
            PlanStep::Intersection { children } => {
                assert_eq!(children.len(), 2);
                assert!(children.iter().all(PlanStep::uses_indexes));
            }
            other => panic!("expected intersection, got {other:?}"),
        }
        // Intersection cost is the cheapest child.
        assert_eq!(plan.estimated_cost, u64::from(COST_HASH));
    }

    #[test]
    fn partially_indexed_and_leads_with_cheapest_index() {
        let registry = registry();
        let plan = plan(
            &and([like("name", "a%"), eq("status", "active"), gte("age", 30_i64)]),
            &registry,
            &NoStanding,
        )
        .unwrap();
        match &plan.root {
            PlanStep::Filter { source, predicate } => {
                match source.as_ref() {
                    PlanStep::IndexScan { cost, .. } => assert_eq!(*cost, COST_HASH),
                    other => panic!("expected index lead, got {other:?}"),
                }
                match predicate {
                    QueryNode::And { children } => assert_eq!(children.len(), 2),
                    other => panic!("expected residual and, got {other:?}"),
                }
            }
            other => panic!("expected filter, got {other:?}"),
        }
        assert!(plan.uses_indexes);
    }

    #[test]
    fn fully_unindexed_and_is_one_full_scan() {
        let registry = IndexRegistry::new();
        let query = and([eq("status", "active"), gte("age", 30_i64)]);
        let plan = plan(&query, &registry, &NoStanding).unwrap();
        assert_eq!(plan.root, PlanStep::FullScan { predicate: query });
    }

    #[test]
    fn compound_index_covers_leading_eq_prefix() {
        let mut registry = registry();
        registry.add(Box::new(CompoundIndex::new(vec![
            Attribute::field("status"),
            Attribute::field("role"),
        ])));

        let plan = plan(
            &and([eq("status", "active"), eq("role", "admin"), gte("age", 30_i64)]),
            &registry,
            &NoStanding,
        )
        .unwrap();
        match &plan.root {
            PlanStep::Filter { source, predicate } => {
                match source.as_ref() {
                    PlanStep::CompoundLookup { attrs, values, .. } => {
                        assert_eq!(attrs, &["status", "role"]);
                        assert_eq!(values.len(), 2);
                    }
                    other => panic!("expected compound lookup, got {other:?}"),
                }
                match predicate {
                    QueryNode::And { children } => assert_eq!(children.len(), 1),
                    other => panic!("expected residual, got {other:?}"),
                }
            }
            other => panic!("expected filter over compound, got {other:?}"),
        }
    }

    #[test]
    fn compound_alone_when_it_covers_everything() {
        let mut registry = IndexRegistry::new();
        registry.add(Box::new(CompoundIndex::new(vec![
            Attribute::field("status"),
            Attribute::field("role"),
        ])));
        let plan = plan(
            &and([eq("status", "active"), eq("role", "admin")]),
            &registry,
            &NoStanding,
        )
        .unwrap();
        assert!(matches!(plan.root, PlanStep::CompoundLookup { .. }));
        assert_eq!(plan.estimated_cost, 20);
    }

    #[test]
    fn single_eq_does_not_use_compound() {
        let mut registry = IndexRegistry::new();
        registry.add(Box::new(CompoundIndex::new(vec![
            Attribute::field("status"),
            Attribute::field("role"),
        ])));
        let plan = plan(&and([eq("status", "active")]), &registry, &NoStanding).unwrap();
        // No compound preference below two eq children, no other index:
        // the conjunction full-scans.
        assert!(matches!(plan.root, PlanStep::FullScan { .. }));
    }

    #[test]
    fn indexable_or_unions() {
        let registry = registry();
        let plan = plan(
            &or([eq("status", "active"), contains("bio", "rust")]),
            &registry,
            &NoStanding,
        )
        .unwrap();
        match &plan.root {
            PlanStep::Union { children } => assert_eq!(children.len(), 2),
            other => panic!("expected union, got {other:?}"),
        }
    }

    #[test]
    fn partially_indexed_or_full_scans_whole_disjunction() {
        let registry = registry();
        let query = or([eq("status", "active"), like("name", "a%")]);
        let plan = plan(&query, &registry, &NoStanding).unwrap();
        assert_eq!(plan.root, PlanStep::FullScan { predicate: query });
    }

    #[test]
    fn not_wraps_child_with_surcharge() {
        let registry = registry();
        let plan = plan(&not(eq("status", "active")), &registry, &NoStanding).unwrap();
        match &plan.root {
            PlanStep::Not { source } => assert!(source.uses_indexes()),
            other => panic!("expected not, got {other:?}"),
        }
        assert_eq!(plan.estimated_cost, u64::from(COST_HASH) + COST_NOT);
    }

    #[test]
    fn invalid_queries_are_rejected_before_planning() {
        let registry = registry();
        assert!(plan(&and([]), &registry, &NoStanding).is_err());
        assert!(plan(&is_in("status", Vec::<&str>::new()), &registry, &NoStanding).is_err());
    }

    #[test]
    fn adding_an_index_never_raises_cost() {
        let queries = [
            eq("status", "active"),
            gte("age", 30_i64),
            and([eq("status", "active"), gte("age", 30_i64)]),
            or([eq("status", "active"), gte("age", 30_i64)]),
        ];
        let empty = IndexRegistry::new();
        let full = registry();
        for query in queries {
            let bare = plan(&query, &empty, &NoStanding).unwrap().estimated_cost;
            let indexed = plan(&query, &full, &NoStanding).unwrap().estimated_cost;
            assert!(
                indexed <= bare,
                "index raised cost for {query:?}: {indexed} > {bare}"
            );
        }
    }
}
