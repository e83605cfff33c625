//! Quantized navigable index: buckets nearby values before sorting.
//!
//! A [`Quantizer`] maps each numeric attribute value to a bucket
//! representative; the inner sorted map is keyed by bucket. Queries
//! quantize their bounds the same way, so results can include false
//! positives relative to the original values -- callers that need exactness
//! re-filter against the record.

use synq_core::value::Value;

use crate::attribute::{Attribute, ScalarValue};
use crate::query::QueryNode;
use crate::resultset::ResultSet;

use super::navigable::NavigableIndex;
use super::{Index, IndexKind, IndexStats, QueryKind, COST_NAVIGABLE};

/// Value-to-bucket mapping strategies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantizer {
    /// Rounds down to multiples of a step (`step > 0`).
    IntegerMultiples(f64),
    /// Rounds timestamps (millis) down to interval boundaries.
    TimestampInterval(u64),
    /// Rounds down to the nearest power of ten (1, 10, 100, ...).
    PowerOfTen,
    /// Rounds down in logarithmic buckets of the given base (`base > 1`).
    Logarithmic(f64),
}

impl Quantizer {
    /// Quantizes a scalar. Non-numeric scalars pass through unchanged.
    #[must_use]
    pub fn quantize(&self, value: &ScalarValue) -> ScalarValue {
        let Some(n) = value.as_f64() else {
            return value.clone();
        };
        let bucketed = match self {
            Quantizer::IntegerMultiples(step) if *step > 0.0 => (n / step).floor() * step,
            Quantizer::IntegerMultiples(_) => n,
            Quantizer::TimestampInterval(interval) if *interval > 0 => {
                let interval = *interval as f64;
                (n / interval).floor() * interval
            }
            Quantizer::TimestampInterval(_) => n,
            Quantizer::PowerOfTen => {
                if n == 0.0 {
                    0.0
                } else {
                    let magnitude = n.abs().log10().floor();
                    10_f64.powf(magnitude) * n.signum()
                }
            }
            Quantizer::Logarithmic(base) if *base > 1.0 => {
                if n <= 0.0 {
                    n
                } else {
                    base.powf(n.log(*base).floor())
                }
            }
            Quantizer::Logarithmic(_) => n,
        };
        ScalarValue::from(bucketed)
    }
}

/// Navigable index over quantized buckets.
///
/// Shares cost and supported query kinds with [`NavigableIndex`]. Every
/// result is correct after quantization; a post-filter by original value is
/// always a subset.
pub struct QuantizedIndex {
    inner: NavigableIndex,
    quantizer: Quantizer,
    name: String,
}

impl QuantizedIndex {
    /// Wraps `attribute` with `quantizer`.
    #[must_use]
    pub fn new(attribute: Attribute, quantizer: Quantizer) -> Self {
        let name = attribute.name().to_string();
        let quantizing = Attribute::multi(name.clone(), {
            let attribute = attribute.clone();
            move |record: &Value| {
                attribute
                    .values_of(record)
                    .iter()
                    .map(|v| quantizer.quantize(v))
                    .collect()
            }
        });
        Self {
            inner: NavigableIndex::new(quantizing),
            quantizer,
            name,
        }
    }

    fn quantize_query(&self, query: &QueryNode) -> QueryNode {
        let q = |v: &ScalarValue| self.quantizer.quantize(v);
        match query {
            QueryNode::Eq { attr, value } => QueryNode::Eq { attr: attr.clone(), value: q(value) },
            QueryNode::Gt { attr, value } => QueryNode::Gt { attr: attr.clone(), value: q(value) },
            QueryNode::Gte { attr, value } => {
                QueryNode::Gte { attr: attr.clone(), value: q(value) }
            }
            QueryNode::Lt { attr, value } => QueryNode::Lt { attr: attr.clone(), value: q(value) },
            QueryNode::Lte { attr, value } => {
                QueryNode::Lte { attr: attr.clone(), value: q(value) }
            }
            QueryNode::Between { attr, low, high } => QueryNode::Between {
                attr: attr.clone(),
                low: q(low),
                high: q(high),
            },
            QueryNode::In { attr, values } => QueryNode::In {
                attr: attr.clone(),
                values: values.iter().map(|v| q(v)).collect(),
            },
            other => other.clone(),
        }
    }
}

impl Index for QuantizedIndex {
    fn attribute(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> IndexKind {
        IndexKind::QuantizedNavigable
    }

    fn retrieval_cost(&self) -> u32 {
        COST_NAVIGABLE
    }

    fn supports(&self, kind: QueryKind) -> bool {
        self.inner.supports(kind)
    }

    fn retrieve(&self, query: &QueryNode) -> Option<Box<dyn ResultSet>> {
        self.inner.retrieve(&self.quantize_query(query))
    }

    fn add(&mut self, key: &str, record: &Value) {
        self.inner.add(key, record);
    }

    fn remove(&mut self, key: &str, record: &Value) {
        self.inner.remove(key, record);
    }

    fn update(&mut self, key: &str, old: &Value, new: &Value) {
        self.inner.update(key, old, new);
    }

    fn clear(&mut self) {
        self.inner.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            kind: IndexKind::QuantizedNavigable,
            ..self.inner.stats()
        }
    }
}

#[cfg(test)]
mod tests {
    use synq_core::value::object;

    use super::*;
    use crate::query::{between, eq, gte};

    fn priced(price: f64) -> Value {
        object([("price", Value::Float(price))])
    }

    #[test]
    fn integer_multiples_bucket_values() {
        let q = Quantizer::IntegerMultiples(10.0);
        assert_eq!(q.quantize(&ScalarValue::from(37.5)), ScalarValue::from(30.0));
        assert_eq!(q.quantize(&ScalarValue::from(30.0)), ScalarValue::from(30.0));
        assert_eq!(q.quantize(&ScalarValue::from("s")), ScalarValue::from("s"));
    }

    #[test]
    fn power_of_ten_buckets() {
        let q = Quantizer::PowerOfTen;
        assert_eq!(q.quantize(&ScalarValue::from(7.0)), ScalarValue::from(1.0));
        assert_eq!(q.quantize(&ScalarValue::from(42.0)), ScalarValue::from(10.0));
        assert_eq!(q.quantize(&ScalarValue::from(950.0)), ScalarValue::from(100.0));
        assert_eq!(q.quantize(&ScalarValue::from(0.0)), ScalarValue::from(0.0));
    }

    #[test]
    fn timestamp_interval_buckets() {
        let q = Quantizer::TimestampInterval(60_000);
        assert_eq!(
            q.quantize(&ScalarValue::from(1_000_123_456.0)),
            ScalarValue::from(1_000_080_000.0)
        );
    }

    #[test]
    fn logarithmic_buckets() {
        let q = Quantizer::Logarithmic(2.0);
        assert_eq!(q.quantize(&ScalarValue::from(5.0)), ScalarValue::from(4.0));
        assert_eq!(q.quantize(&ScalarValue::from(9.0)), ScalarValue::from(8.0));
    }

    #[test]
    fn eq_matches_whole_bucket() {
        let mut index = QuantizedIndex::new(
            Attribute::field("price"),
            Quantizer::IntegerMultiples(10.0),
        );
        index.add("cheap", &priced(12.0));
        index.add("similar", &priced(17.0));
        index.add("pricey", &priced(25.0));

        // 12 and 17 share the [10, 20) bucket: false positives by design.
        let rs = index.retrieve(&eq("price", 12.0)).unwrap();
        assert_eq!(rs.materialize(), ["cheap", "similar"]);
    }

    #[test]
    fn range_bounds_are_quantized() {
        let mut index = QuantizedIndex::new(
            Attribute::field("price"),
            Quantizer::IntegerMultiples(10.0),
        );
        index.add("a", &priced(5.0));
        index.add("b", &priced(15.0));
        index.add("c", &priced(25.0));

        // gte(12) quantizes to gte(10): includes the whole 10-bucket.
        let rs = index.retrieve(&gte("price", 12.0)).unwrap();
        assert_eq!(rs.materialize(), ["b", "c"]);

        let rs = index.retrieve(&between("price", 12.0, 27.0)).unwrap();
        assert_eq!(rs.materialize(), ["b", "c"]);
    }

    #[test]
    fn post_filter_is_subset() {
        let mut index = QuantizedIndex::new(
            Attribute::field("price"),
            Quantizer::IntegerMultiples(10.0),
        );
        let records = [("a", 5.0), ("b", 12.0), ("c", 17.0), ("d", 25.0)];
        for (key, price) in records {
            index.add(key, &priced(price));
        }

        let rs = index.retrieve(&gte("price", 12.0)).unwrap();
        let coarse: Vec<String> = rs.materialize().to_vec();
        let exact: Vec<&str> = records
            .iter()
            .filter(|(_, price)| *price >= 12.0)
            .map(|(key, _)| *key)
            .collect();
        for key in &exact {
            assert!(coarse.iter().any(|k| k == key), "exact result {key} missing");
        }
    }
}
