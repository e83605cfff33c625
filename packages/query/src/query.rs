//! Query tree: construction, validation, evaluation, canonical identity.
//!
//! A [`QueryNode`] is a recursive predicate over records. Simple nodes
//! (`eq`, `gt`, `contains`, ...) name an attribute; logical nodes (`and`,
//! `or`, `not`) combine children. The planner compiles query trees into
//! plan steps; [`QueryNode::matches`] is the reference interpretation every
//! plan must agree with.
//!
//! # Canonical identity
//!
//! Standing queries are deduplicated by [`QueryNode::canonical_hash`]:
//! `and`/`or` children are sorted by canonical encoding, literal lists are
//! sorted and deduplicated, and integral floats normalize to their integer
//! rendering, so two structurally equal queries hash identically no matter
//! how they were built.

use regex::Regex;
use serde::{Deserialize, Serialize};
use synq_core::fnv1a_hash;
use synq_core::value::Value;

use crate::attribute::{AttributeResolver, ScalarValue};
use crate::text::TokenPipeline;

/// Errors raised when a query tree fails validation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidQuery {
    /// A simple node has an empty attribute name.
    #[error("query attribute name must not be empty")]
    EmptyAttribute,
    /// An `and`/`or` node has no children.
    #[error("logical query node must have at least one child")]
    EmptyLogicalNode,
    /// A `between` node has inverted bounds.
    #[error("between bounds are inverted")]
    InvertedBounds,
    /// An `in`/`containsAll`/`containsAny` node has no values.
    #[error("membership query must list at least one value")]
    EmptyValueList,
    /// A `regex` node has an uncompilable pattern.
    #[error("invalid regex pattern: {0}")]
    BadRegex(String),
}

/// A node in a query tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum QueryNode {
    /// Attribute equals the value.
    Eq {
        /// Attribute name.
        attr: String,
        /// Literal to compare against.
        value: ScalarValue,
    },
    /// Attribute does not equal the value (missing attributes match).
    Neq {
        /// Attribute name.
        attr: String,
        /// Literal to compare against.
        value: ScalarValue,
    },
    /// Strictly greater (same-class comparison only).
    Gt {
        /// Attribute name.
        attr: String,
        /// Lower bound, exclusive.
        value: ScalarValue,
    },
    /// Greater or equal.
    Gte {
        /// Attribute name.
        attr: String,
        /// Lower bound, inclusive.
        value: ScalarValue,
    },
    /// Strictly less.
    Lt {
        /// Attribute name.
        attr: String,
        /// Upper bound, exclusive.
        value: ScalarValue,
    },
    /// Less or equal.
    Lte {
        /// Attribute name.
        attr: String,
        /// Upper bound, inclusive.
        value: ScalarValue,
    },
    /// Inclusive range.
    Between {
        /// Attribute name.
        attr: String,
        /// Lower bound, inclusive.
        low: ScalarValue,
        /// Upper bound, inclusive.
        high: ScalarValue,
    },
    /// Attribute value is one of the listed literals.
    In {
        /// Attribute name.
        attr: String,
        /// Accepted literals.
        values: Vec<ScalarValue>,
    },
    /// Attribute extracts at least one value.
    Has {
        /// Attribute name.
        attr: String,
    },
    /// SQL-style pattern with `%` (any run) and `_` (one char).
    Like {
        /// Attribute name.
        attr: String,
        /// LIKE pattern.
        pattern: String,
    },
    /// Regular-expression match over string values.
    Regex {
        /// Attribute name.
        attr: String,
        /// Regex pattern (unanchored).
        pattern: String,
    },
    /// Tokenized text containment: every query token appears in the
    /// attribute's tokenized text.
    Contains {
        /// Attribute name.
        attr: String,
        /// Free-text query.
        text: String,
    },
    /// All listed values appear among the attribute's tokens.
    ContainsAll {
        /// Attribute name.
        attr: String,
        /// Required values.
        values: Vec<String>,
    },
    /// Any listed value appears among the attribute's tokens.
    ContainsAny {
        /// Attribute name.
        attr: String,
        /// Alternative values.
        values: Vec<String>,
    },
    /// Conjunction.
    And {
        /// Child predicates, all of which must hold.
        children: Vec<QueryNode>,
    },
    /// Disjunction.
    Or {
        /// Child predicates, at least one of which must hold.
        children: Vec<QueryNode>,
    },
    /// Negation.
    Not {
        /// The negated predicate.
        child: Box<QueryNode>,
    },
}

// -- Builder helpers -------------------------------------------------------

/// `attr == value`
pub fn eq(attr: &str, value: impl Into<ScalarValue>) -> QueryNode {
    QueryNode::Eq { attr: attr.to_string(), value: value.into() }
}

/// `attr != value`
pub fn neq(attr: &str, value: impl Into<ScalarValue>) -> QueryNode {
    QueryNode::Neq { attr: attr.to_string(), value: value.into() }
}

/// `attr > value`
pub fn gt(attr: &str, value: impl Into<ScalarValue>) -> QueryNode {
    QueryNode::Gt { attr: attr.to_string(), value: value.into() }
}

/// `attr >= value`
pub fn gte(attr: &str, value: impl Into<ScalarValue>) -> QueryNode {
    QueryNode::Gte { attr: attr.to_string(), value: value.into() }
}

/// `attr < value`
pub fn lt(attr: &str, value: impl Into<ScalarValue>) -> QueryNode {
    QueryNode::Lt { attr: attr.to_string(), value: value.into() }
}

/// `attr <= value`
pub fn lte(attr: &str, value: impl Into<ScalarValue>) -> QueryNode {
    QueryNode::Lte { attr: attr.to_string(), value: value.into() }
}

/// `low <= attr <= high`
pub fn between(
    attr: &str,
    low: impl Into<ScalarValue>,
    high: impl Into<ScalarValue>,
) -> QueryNode {
    QueryNode::Between {
        attr: attr.to_string(),
        low: low.into(),
        high: high.into(),
    }
}

/// `attr IN values`
pub fn is_in(attr: &str, values: impl IntoIterator<Item = impl Into<ScalarValue>>) -> QueryNode {
    QueryNode::In {
        attr: attr.to_string(),
        values: values.into_iter().map(Into::into).collect(),
    }
}

/// Attribute is present.
pub fn has(attr: &str) -> QueryNode {
    QueryNode::Has { attr: attr.to_string() }
}

/// SQL LIKE.
pub fn like(attr: &str, pattern: &str) -> QueryNode {
    QueryNode::Like { attr: attr.to_string(), pattern: pattern.to_string() }
}

/// Regex match.
pub fn regex(attr: &str, pattern: &str) -> QueryNode {
    QueryNode::Regex { attr: attr.to_string(), pattern: pattern.to_string() }
}

/// Tokenized text containment.
pub fn contains(attr: &str, text: &str) -> QueryNode {
    QueryNode::Contains { attr: attr.to_string(), text: text.to_string() }
}

/// All values present.
pub fn contains_all(attr: &str, values: impl IntoIterator<Item = impl Into<String>>) -> QueryNode {
    QueryNode::ContainsAll {
        attr: attr.to_string(),
        values: values.into_iter().map(Into::into).collect(),
    }
}

/// Any value present.
pub fn contains_any(attr: &str, values: impl IntoIterator<Item = impl Into<String>>) -> QueryNode {
    QueryNode::ContainsAny {
        attr: attr.to_string(),
        values: values.into_iter().map(Into::into).collect(),
    }
}

/// Conjunction of children.
pub fn and(children: impl IntoIterator<Item = QueryNode>) -> QueryNode {
    QueryNode::And { children: children.into_iter().collect() }
}

/// Disjunction of children.
pub fn or(children: impl IntoIterator<Item = QueryNode>) -> QueryNode {
    QueryNode::Or { children: children.into_iter().collect() }
}

/// Negation.
pub fn not(child: QueryNode) -> QueryNode {
    QueryNode::Not { child: Box::new(child) }
}

impl QueryNode {
    /// The attribute a simple node addresses; `None` for logical nodes.
    #[must_use]
    pub fn attribute(&self) -> Option<&str> {
        match self {
            QueryNode::Eq { attr, .. }
            | QueryNode::Neq { attr, .. }
            | QueryNode::Gt { attr, .. }
            | QueryNode::Gte { attr, .. }
            | QueryNode::Lt { attr, .. }
            | QueryNode::Lte { attr, .. }
            | QueryNode::Between { attr, .. }
            | QueryNode::In { attr, .. }
            | QueryNode::Has { attr }
            | QueryNode::Like { attr, .. }
            | QueryNode::Regex { attr, .. }
            | QueryNode::Contains { attr, .. }
            | QueryNode::ContainsAll { attr, .. }
            | QueryNode::ContainsAny { attr, .. } => Some(attr),
            QueryNode::And { .. } | QueryNode::Or { .. } | QueryNode::Not { .. } => None,
        }
    }

    /// Whether this is a simple (non-logical) node.
    #[must_use]
    pub fn is_simple(&self) -> bool {
        self.attribute().is_some()
    }

    /// Validates the tree.
    ///
    /// # Errors
    ///
    /// Any [`InvalidQuery`] variant; validation errors leave no side effects.
    pub fn validate(&self) -> Result<(), InvalidQuery> {
        match self {
            QueryNode::And { children } | QueryNode::Or { children } => {
                if children.is_empty() {
                    return Err(InvalidQuery::EmptyLogicalNode);
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
            QueryNode::Not { child } => child.validate(),
            QueryNode::Between { attr, low, high } => {
                Self::check_attr(attr)?;
                if low > high {
                    return Err(InvalidQuery::InvertedBounds);
                }
                Ok(())
            }
            QueryNode::In { attr, values } => {
                Self::check_attr(attr)?;
                if values.is_empty() {
                    return Err(InvalidQuery::EmptyValueList);
                }
                Ok(())
            }
            QueryNode::ContainsAll { attr, values } | QueryNode::ContainsAny { attr, values } => {
                Self::check_attr(attr)?;
                if values.is_empty() {
                    return Err(InvalidQuery::EmptyValueList);
                }
                Ok(())
            }
            QueryNode::Regex { attr, pattern } => {
                Self::check_attr(attr)?;
                Regex::new(pattern).map_err(|e| InvalidQuery::BadRegex(e.to_string()))?;
                Ok(())
            }
            other => Self::check_attr(other.attribute().unwrap_or_default()),
        }
    }

    fn check_attr(attr: &str) -> Result<(), InvalidQuery> {
        if attr.is_empty() {
            Err(InvalidQuery::EmptyAttribute)
        } else {
            Ok(())
        }
    }

    /// Reference predicate evaluation against one record.
    ///
    /// Every plan the planner emits must agree with this interpretation.
    /// Comparisons between incompatible scalar classes fail the predicate
    /// without an error.
    #[must_use]
    pub fn matches(&self, record: &Value, resolver: &AttributeResolver) -> bool {
        match self {
            QueryNode::Eq { attr, value } => resolver.values_of(attr, record).contains(value),
            QueryNode::Neq { attr, value } => !resolver.values_of(attr, record).contains(value),
            QueryNode::Gt { attr, value } => Self::any_cmp(resolver, attr, record, |v| {
                v.same_class(value) && v > value
            }),
            QueryNode::Gte { attr, value } => Self::any_cmp(resolver, attr, record, |v| {
                v.same_class(value) && v >= value
            }),
            QueryNode::Lt { attr, value } => Self::any_cmp(resolver, attr, record, |v| {
                v.same_class(value) && v < value
            }),
            QueryNode::Lte { attr, value } => Self::any_cmp(resolver, attr, record, |v| {
                v.same_class(value) && v <= value
            }),
            QueryNode::Between { attr, low, high } => {
                Self::any_cmp(resolver, attr, record, |v| {
                    v.same_class(low) && v >= low && v <= high
                })
            }
            QueryNode::In { attr, values } => resolver
                .values_of(attr, record)
                .iter()
                .any(|v| values.contains(v)),
            QueryNode::Has { attr } => !resolver.values_of(attr, record).is_empty(),
            QueryNode::Like { attr, pattern } => {
                let regex = like_to_regex(pattern);
                Self::any_str(resolver, attr, record, |s| regex.is_match(s))
            }
            QueryNode::Regex { attr, pattern } => match Regex::new(pattern) {
                Ok(regex) => Self::any_str(resolver, attr, record, |s| regex.is_match(s)),
                Err(_) => false,
            },
            QueryNode::Contains { attr, text } => {
                let pipeline = TokenPipeline::unique();
                let query_tokens = pipeline.tokenize(text);
                if query_tokens.is_empty() {
                    return false;
                }
                let record_tokens = Self::record_tokens(resolver, attr, record, &pipeline);
                query_tokens.iter().all(|t| record_tokens.contains(t))
            }
            QueryNode::ContainsAll { attr, values } => {
                let pipeline = TokenPipeline::unique();
                let record_tokens = Self::record_tokens(resolver, attr, record, &pipeline);
                values.iter().all(|value| {
                    pipeline
                        .tokenize(value)
                        .iter()
                        .all(|t| record_tokens.contains(t))
                })
            }
            QueryNode::ContainsAny { attr, values } => {
                let pipeline = TokenPipeline::unique();
                let record_tokens = Self::record_tokens(resolver, attr, record, &pipeline);
                values.iter().any(|value| {
                    let tokens = pipeline.tokenize(value);
                    !tokens.is_empty() && tokens.iter().all(|t| record_tokens.contains(t))
                })
            }
            QueryNode::And { children } => {
                children.iter().all(|child| child.matches(record, resolver))
            }
            QueryNode::Or { children } => {
                children.iter().any(|child| child.matches(record, resolver))
            }
            QueryNode::Not { child } => !child.matches(record, resolver),
        }
    }

    fn any_cmp<F>(resolver: &AttributeResolver, attr: &str, record: &Value, predicate: F) -> bool
    where
        F: Fn(&ScalarValue) -> bool,
    {
        resolver.values_of(attr, record).iter().any(predicate)
    }

    fn any_str<F>(resolver: &AttributeResolver, attr: &str, record: &Value, predicate: F) -> bool
    where
        F: Fn(&str) -> bool,
    {
        resolver
            .values_of(attr, record)
            .iter()
            .filter_map(ScalarValue::as_str)
            .any(predicate)
    }

    fn record_tokens(
        resolver: &AttributeResolver,
        attr: &str,
        record: &Value,
        pipeline: &TokenPipeline,
    ) -> std::collections::HashSet<String> {
        resolver
            .values_of(attr, record)
            .iter()
            .filter_map(ScalarValue::as_str)
            .flat_map(|s| pipeline.tokenize(s))
            .collect()
    }

    /// Canonical textual encoding: stable under child order, literal-list
    /// order, duplicate literals, and integral-float spelling.
    #[must_use]
    pub fn canonical_encode(&self) -> String {
        match self {
            QueryNode::Eq { attr, value } => format!("(eq {attr} {})", enc(value)),
            QueryNode::Neq { attr, value } => format!("(neq {attr} {})", enc(value)),
            QueryNode::Gt { attr, value } => format!("(gt {attr} {})", enc(value)),
            QueryNode::Gte { attr, value } => format!("(gte {attr} {})", enc(value)),
            QueryNode::Lt { attr, value } => format!("(lt {attr} {})", enc(value)),
            QueryNode::Lte { attr, value } => format!("(lte {attr} {})", enc(value)),
            QueryNode::Between { attr, low, high } => {
                format!("(between {attr} {} {})", enc(low), enc(high))
            }
            QueryNode::In { attr, values } => {
                let mut parts: Vec<String> = values.iter().map(enc).collect();
                parts.sort();
                parts.dedup();
                format!("(in {attr} [{}])", parts.join(" "))
            }
            QueryNode::Has { attr } => format!("(has {attr})"),
            QueryNode::Like { attr, pattern } => format!("(like {attr} {pattern:?})"),
            QueryNode::Regex { attr, pattern } => format!("(regex {attr} {pattern:?})"),
            QueryNode::Contains { attr, text } => format!("(contains {attr} {text:?})"),
            QueryNode::ContainsAll { attr, values } => {
                let mut parts: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
                parts.sort();
                parts.dedup();
                format!("(contains-all {attr} [{}])", parts.join(" "))
            }
            QueryNode::ContainsAny { attr, values } => {
                let mut parts: Vec<String> = values.iter().map(|v| format!("{v:?}")).collect();
                parts.sort();
                parts.dedup();
                format!("(contains-any {attr} [{}])", parts.join(" "))
            }
            QueryNode::And { children } => {
                let mut parts: Vec<String> =
                    children.iter().map(QueryNode::canonical_encode).collect();
                parts.sort();
                format!("(and {})", parts.join(" "))
            }
            QueryNode::Or { children } => {
                let mut parts: Vec<String> =
                    children.iter().map(QueryNode::canonical_encode).collect();
                parts.sort();
                format!("(or {})", parts.join(" "))
            }
            QueryNode::Not { child } => format!("(not {})", child.canonical_encode()),
        }
    }

    /// Canonical hash of this query, the identity of its standing index.
    #[must_use]
    pub fn canonical_hash(&self) -> u32 {
        fnv1a_hash(&self.canonical_encode())
    }
}

fn enc(value: &ScalarValue) -> String {
    match value {
        ScalarValue::Str(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

/// Translates a LIKE pattern (`%`, `_`) into an anchored regex.
pub(crate) fn like_to_regex(pattern: &str) -> Regex {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => out.push_str(".*"),
            '_' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    // The pattern is fully escaped above, so compilation cannot fail.
    Regex::new(&out).expect("escaped LIKE pattern compiles")
}

#[cfg(test)]
mod tests {
    use super::*;
    use synq_core::value::object;

    fn resolver() -> AttributeResolver {
        AttributeResolver::new()
    }

    fn user(name: &str, age: i64, status: &str, tags: &[&str]) -> Value {
        object([
            ("name", Value::from(name)),
            ("age", Value::Int(age)),
            ("status", Value::from(status)),
            (
                "tags",
                Value::Array(tags.iter().map(|t| Value::from(*t)).collect()),
            ),
            ("bio", Value::from("Rust systems programmer in Oslo")),
        ])
    }

    // ---- Evaluation ----

    #[test]
    fn eq_and_neq() {
        let record = user("alice", 30, "active", &[]);
        let r = resolver();
        assert!(eq("status", "active").matches(&record, &r));
        assert!(!eq("status", "inactive").matches(&record, &r));
        assert!(neq("status", "inactive").matches(&record, &r));
        // Missing attributes match neq and fail eq.
        assert!(neq("missing", "x").matches(&record, &r));
        assert!(!eq("missing", "x").matches(&record, &r));
    }

    #[test]
    fn range_operators() {
        let record = user("alice", 30, "active", &[]);
        let r = resolver();
        assert!(gt("age", 29_i64).matches(&record, &r));
        assert!(!gt("age", 30_i64).matches(&record, &r));
        assert!(gte("age", 30_i64).matches(&record, &r));
        assert!(lt("age", 31_i64).matches(&record, &r));
        assert!(lte("age", 30_i64).matches(&record, &r));
        assert!(between("age", 30_i64, 40_i64).matches(&record, &r));
        assert!(between("age", 20_i64, 30_i64).matches(&record, &r));
        assert!(!between("age", 31_i64, 40_i64).matches(&record, &r));
    }

    #[test]
    fn cross_class_comparison_fails_quietly() {
        let record = user("alice", 30, "active", &[]);
        let r = resolver();
        assert!(!gt("name", 5_i64).matches(&record, &r));
        assert!(!lte("age", "thirty").matches(&record, &r));
    }

    #[test]
    fn in_and_has() {
        let record = user("alice", 30, "active", &["admin"]);
        let r = resolver();
        assert!(is_in("status", ["active", "pending"]).matches(&record, &r));
        assert!(!is_in("status", ["archived"]).matches(&record, &r));
        assert!(has("name").matches(&record, &r));
        assert!(!has("missing").matches(&record, &r));
    }

    #[test]
    fn like_translates_sql_wildcards() {
        let record = user("alice", 30, "active", &[]);
        let r = resolver();
        assert!(like("name", "al%").matches(&record, &r));
        assert!(like("name", "_lice").matches(&record, &r));
        assert!(!like("name", "al").matches(&record, &r));
    }

    #[test]
    fn regex_matches_unanchored() {
        let record = user("alice", 30, "active", &[]);
        let r = resolver();
        assert!(regex("name", "lic").matches(&record, &r));
        assert!(!regex("name", "^lic").matches(&record, &r));
        // A broken pattern fails the predicate, no panic.
        assert!(!regex("name", "(").matches(&record, &r));
    }

    #[test]
    fn contains_is_tokenized_all_terms() {
        let record = user("alice", 30, "active", &[]);
        let r = resolver();
        assert!(contains("bio", "rust oslo").matches(&record, &r));
        assert!(contains("bio", "RUST").matches(&record, &r));
        assert!(!contains("bio", "rust paris").matches(&record, &r));
        assert!(!contains("bio", "").matches(&record, &r));
    }

    #[test]
    fn contains_all_and_any_over_multi_values() {
        let record = user("alice", 30, "active", &["admin", "ops"]);
        let r = resolver();
        assert!(contains_all("tags", ["admin", "ops"]).matches(&record, &r));
        assert!(!contains_all("tags", ["admin", "dev"]).matches(&record, &r));
        assert!(contains_any("tags", ["dev", "ops"]).matches(&record, &r));
        assert!(!contains_any("tags", ["dev", "qa"]).matches(&record, &r));
    }

    #[test]
    fn logical_combinators() {
        let record = user("alice", 30, "active", &[]);
        let r = resolver();
        assert!(and([eq("status", "active"), gte("age", 30_i64)]).matches(&record, &r));
        assert!(!and([eq("status", "active"), gte("age", 31_i64)]).matches(&record, &r));
        assert!(or([eq("status", "archived"), gte("age", 30_i64)]).matches(&record, &r));
        assert!(not(eq("status", "archived")).matches(&record, &r));
    }

    // ---- Validation ----

    #[test]
    fn validation_catches_malformed_trees() {
        assert_eq!(
            and([]).validate(),
            Err(InvalidQuery::EmptyLogicalNode)
        );
        assert_eq!(
            eq("", "x").validate(),
            Err(InvalidQuery::EmptyAttribute)
        );
        assert_eq!(
            between("age", 40_i64, 30_i64).validate(),
            Err(InvalidQuery::InvertedBounds)
        );
        assert_eq!(
            is_in("status", Vec::<&str>::new()).validate(),
            Err(InvalidQuery::EmptyValueList)
        );
        assert!(matches!(
            regex("name", "(").validate(),
            Err(InvalidQuery::BadRegex(_))
        ));
        assert!(and([eq("a", 1_i64), not(has("b"))]).validate().is_ok());
    }

    // ---- Canonical identity ----

    #[test]
    fn canonical_hash_ignores_child_order() {
        let a = and([eq("status", "active"), gte("age", 30_i64)]);
        let b = and([gte("age", 30_i64), eq("status", "active")]);
        assert_eq!(a.canonical_hash(), b.canonical_hash());
    }

    #[test]
    fn canonical_hash_ignores_literal_list_order_and_duplicates() {
        let a = is_in("status", ["a", "b", "b"]);
        let b = is_in("status", ["b", "a"]);
        assert_eq!(a.canonical_hash(), b.canonical_hash());
    }

    #[test]
    fn canonical_hash_normalizes_integral_floats() {
        let a = eq("age", 30_i64);
        let b = eq("age", 30.0);
        assert_eq!(a.canonical_hash(), b.canonical_hash());
    }

    #[test]
    fn canonical_hash_distinguishes_different_queries() {
        assert_ne!(
            eq("age", 30_i64).canonical_hash(),
            eq("age", 31_i64).canonical_hash()
        );
        assert_ne!(
            eq("age", 30_i64).canonical_hash(),
            neq("age", 30_i64).canonical_hash()
        );
        assert_ne!(
            and([eq("a", 1_i64)]).canonical_hash(),
            or([eq("a", 1_i64)]).canonical_hash()
        );
    }

    #[test]
    fn serde_roundtrip() {
        let query = and([
            eq("status", "active"),
            or([gte("age", 30_i64), contains("bio", "rust")]),
            not(has("deleted")),
        ]);
        let json = serde_json::to_string(&query).unwrap();
        let decoded: QueryNode = serde_json::from_str(&json).unwrap();
        assert_eq!(query, decoded);
    }
}
