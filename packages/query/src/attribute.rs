//! Typed attribute projections over records.
//!
//! An [`Attribute`] is a named, pure projection from a record ([`Value`]) to
//! zero or more [`ScalarValue`]s. Indexes extract through attributes, the
//! planner matches query nodes to them by name, and predicates evaluate
//! against their output.
//!
//! Extraction MUST be pure: re-running an attribute on the same record
//! always yields the same values. Nothing enforces this at the type level;
//! the `Fn` bound plus the absence of interior mutability in practice is the
//! contract.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use synq_core::value::Value;

/// A totally ordered, hashable scalar used as index key and query literal.
///
/// All numbers collapse to `Num` so `Int(3)` and `Float(3.0)` land in the
/// same index bucket and compare numerically in range queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScalarValue {
    /// Explicit null (rarely indexed; extraction usually maps null to
    /// "undefined" instead).
    Null,
    /// Boolean.
    Bool(bool),
    /// Any number, in total order via [`OrderedFloat`].
    Num(OrderedFloat<f64>),
    /// UTF-8 string.
    Str(String),
}

impl ScalarValue {
    /// Converts a record value to a scalar, or `None` for non-scalar
    /// variants (`Null`, `Bytes`, `Array`, `Map`).
    ///
    /// `Null` maps to `None` deliberately: a null field is treated as
    /// undefined, so it is absent from indexes and from `has` sets.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<ScalarValue> {
        match value {
            Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            Value::Int(i) => Some(ScalarValue::Num(OrderedFloat(*i as f64))),
            Value::Float(f) => Some(ScalarValue::Num(OrderedFloat(*f))),
            Value::String(s) => Some(ScalarValue::Str(s.clone())),
            Value::Null | Value::Bytes(_) | Value::Array(_) | Value::Map(_) => None,
        }
    }

    /// Numeric view.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Num(n) => Some(n.0),
            _ => None,
        }
    }

    /// String view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Whether both scalars belong to the same comparable class.
    ///
    /// Range predicates only hold between same-class scalars; a `gt`
    /// between a string and a number fails the predicate without an error.
    #[must_use]
    pub fn same_class(&self, other: &ScalarValue) -> bool {
        matches!(
            (self, other),
            (ScalarValue::Null, ScalarValue::Null)
                | (ScalarValue::Bool(_), ScalarValue::Bool(_))
                | (ScalarValue::Num(_), ScalarValue::Num(_))
                | (ScalarValue::Str(_), ScalarValue::Str(_))
        )
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => write!(f, "null"),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::Num(n) => {
                // Integral floats render without the trailing ".0" so the
                // canonical encoding of Int(30) and Float(30.0) agrees.
                if n.0.fract() == 0.0 && n.0.abs() < 1e15 {
                    write!(f, "{}", n.0 as i64)
                } else {
                    write!(f, "{}", n.0)
                }
            }
            ScalarValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(i: i64) -> Self {
        ScalarValue::Num(OrderedFloat(i as f64))
    }
}

impl From<f64> for ScalarValue {
    fn from(f: f64) -> Self {
        ScalarValue::Num(OrderedFloat(f))
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        ScalarValue::Bool(b)
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Str(s.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::Str(s)
    }
}

/// Whether an attribute yields a single value or a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// At most one value per record.
    Simple,
    /// Zero or more values per record (e.g. a tags array).
    Multi,
}

type Extractor = Arc<dyn Fn(&Value) -> Vec<ScalarValue> + Send + Sync>;

/// A named, typed, pure projection `record -> value(s)`.
#[derive(Clone)]
pub struct Attribute {
    name: String,
    kind: AttributeKind,
    extractor: Extractor,
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Attribute {
    /// A single-valued attribute from a custom extractor.
    pub fn simple<F>(name: impl Into<String>, extractor: F) -> Self
    where
        F: Fn(&Value) -> Option<ScalarValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: AttributeKind::Simple,
            extractor: Arc::new(move |record| extractor(record).into_iter().collect()),
        }
    }

    /// A multi-valued attribute from a custom extractor.
    pub fn multi<F>(name: impl Into<String>, extractor: F) -> Self
    where
        F: Fn(&Value) -> Vec<ScalarValue> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: AttributeKind::Multi,
            extractor: Arc::new(extractor),
        }
    }

    /// A simple attribute reading a field by dot path; the path doubles as
    /// the attribute name.
    ///
    /// `"address.city"` walks nested maps, returning undefined at any
    /// missing or non-map step.
    #[must_use]
    pub fn field(path: &str) -> Self {
        let segments = path.to_string();
        Self::simple(path, move |record| {
            record.get_path(&segments).and_then(ScalarValue::from_value)
        })
    }

    /// A multi attribute reading an array field by dot path.
    ///
    /// Non-array values yield the empty list, per the attribute contract.
    #[must_use]
    pub fn field_multi(path: &str) -> Self {
        let segments = path.to_string();
        Self::multi(path, move |record| {
            match record.get_path(&segments) {
                Some(Value::Array(items)) => {
                    items.iter().filter_map(ScalarValue::from_value).collect()
                }
                _ => Vec::new(),
            }
        })
    }

    /// Attribute name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this attribute is simple or multi-valued.
    #[must_use]
    pub fn kind(&self) -> AttributeKind {
        self.kind
    }

    /// All values this attribute extracts from a record.
    #[must_use]
    pub fn values_of(&self, record: &Value) -> Vec<ScalarValue> {
        (self.extractor)(record)
    }

    /// First extracted value, for simple attributes.
    #[must_use]
    pub fn value_of(&self, record: &Value) -> Option<ScalarValue> {
        self.values_of(record).into_iter().next()
    }
}

/// Field type names accepted by the schema-driven factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    /// Single string.
    #[serde(rename = "string")]
    String,
    /// Single number.
    #[serde(rename = "number")]
    Number,
    /// Single boolean.
    #[serde(rename = "boolean")]
    Boolean,
    /// Array of strings.
    #[serde(rename = "string[]")]
    StringArray,
    /// Array of numbers.
    #[serde(rename = "number[]")]
    NumberArray,
}

impl FieldType {
    fn accepts(self, scalar: &ScalarValue) -> bool {
        matches!(
            (self, scalar),
            (FieldType::String | FieldType::StringArray, ScalarValue::Str(_))
                | (FieldType::Number | FieldType::NumberArray, ScalarValue::Num(_))
                | (FieldType::Boolean, ScalarValue::Bool(_))
        )
    }

    fn is_array(self) -> bool {
        matches!(self, FieldType::StringArray | FieldType::NumberArray)
    }
}

/// Builds attributes from a `field -> type` schema, with an optional name
/// prefix.
///
/// Field names may be dot paths. Values of the wrong type are dropped
/// rather than coerced, so a `"number"` attribute never yields strings.
#[must_use]
pub fn schema_attributes(
    schema: &BTreeMap<String, FieldType>,
    prefix: Option<&str>,
) -> Vec<Attribute> {
    schema
        .iter()
        .map(|(field, field_type)| {
            let name = match prefix {
                Some(prefix) => format!("{prefix}{field}"),
                None => field.clone(),
            };
            let path = field.clone();
            let field_type = *field_type;
            if field_type.is_array() {
                Attribute::multi(name, move |record| match record.get_path(&path) {
                    Some(Value::Array(items)) => items
                        .iter()
                        .filter_map(ScalarValue::from_value)
                        .filter(|scalar| field_type.accepts(scalar))
                        .collect(),
                    _ => Vec::new(),
                })
            } else {
                Attribute::simple(name, move |record| {
                    record
                        .get_path(&path)
                        .and_then(ScalarValue::from_value)
                        .filter(|scalar| field_type.accepts(scalar))
                })
            }
        })
        .collect()
}

/// Resolves attribute names to attributes, falling back to dot-path field
/// access for unregistered names.
///
/// The indexed façade registers custom attributes here; query evaluation and
/// standing indexes resolve through it so both agree on extraction.
#[derive(Debug, Clone, Default)]
pub struct AttributeResolver {
    registered: BTreeMap<String, Attribute>,
}

impl AttributeResolver {
    /// An empty resolver: every name resolves to a dot-path field read.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a custom attribute under its name.
    pub fn register(&mut self, attribute: Attribute) {
        self.registered
            .insert(attribute.name().to_string(), attribute);
    }

    /// Resolves a name, creating a dot-path attribute when unregistered.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Attribute {
        self.registered
            .get(name)
            .cloned()
            .unwrap_or_else(|| Attribute::field(name))
    }

    /// Extracted values for `name` on `record`.
    #[must_use]
    pub fn values_of(&self, name: &str, record: &Value) -> Vec<ScalarValue> {
        match self.registered.get(name) {
            Some(attribute) => attribute.values_of(record),
            None => Attribute::field(name).values_of(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use synq_core::value::object;

    fn user() -> Value {
        object([
            ("name", Value::from("Alice")),
            ("age", Value::Int(30)),
            ("active", Value::Bool(true)),
            (
                "tags",
                Value::Array(vec![Value::from("admin"), Value::from("ops")]),
            ),
            (
                "address",
                object([("city", Value::from("Oslo"))]),
            ),
            ("nickname", Value::Null),
        ])
    }

    // ---- ScalarValue ----

    #[test]
    fn numbers_collapse_to_one_class() {
        assert_eq!(
            ScalarValue::from_value(&Value::Int(3)),
            ScalarValue::from_value(&Value::Float(3.0))
        );
    }

    #[test]
    fn null_and_containers_are_undefined() {
        assert_eq!(ScalarValue::from_value(&Value::Null), None);
        assert_eq!(ScalarValue::from_value(&Value::Array(vec![])), None);
        assert_eq!(ScalarValue::from_value(&user()), None);
    }

    #[test]
    fn ordering_is_total() {
        let mut values = vec![
            ScalarValue::from("b"),
            ScalarValue::from(2.5),
            ScalarValue::from(true),
            ScalarValue::from("a"),
            ScalarValue::from(1_i64),
            ScalarValue::Null,
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                ScalarValue::Null,
                ScalarValue::from(true),
                ScalarValue::from(1_i64),
                ScalarValue::from(2.5),
                ScalarValue::from("a"),
                ScalarValue::from("b"),
            ]
        );
    }

    #[test]
    fn display_normalizes_integral_floats() {
        assert_eq!(ScalarValue::from(30_i64).to_string(), "30");
        assert_eq!(ScalarValue::from(30.0).to_string(), "30");
        assert_eq!(ScalarValue::from(30.5).to_string(), "30.5");
    }

    // ---- Field attributes ----

    #[test]
    fn field_reads_top_level_and_nested() {
        let record = user();
        assert_eq!(
            Attribute::field("name").value_of(&record),
            Some(ScalarValue::from("Alice"))
        );
        assert_eq!(
            Attribute::field("address.city").value_of(&record),
            Some(ScalarValue::from("Oslo"))
        );
        assert_eq!(Attribute::field("address.zip").value_of(&record), None);
    }

    #[test]
    fn null_field_is_undefined() {
        assert_eq!(Attribute::field("nickname").value_of(&user()), None);
    }

    #[test]
    fn field_multi_reads_arrays() {
        let record = user();
        assert_eq!(
            Attribute::field_multi("tags").values_of(&record),
            vec![ScalarValue::from("admin"), ScalarValue::from("ops")]
        );
    }

    #[test]
    fn field_multi_on_non_array_is_empty() {
        assert!(Attribute::field_multi("name").values_of(&user()).is_empty());
        assert!(Attribute::field_multi("missing").values_of(&user()).is_empty());
    }

    #[test]
    fn extraction_is_pure() {
        let record = user();
        let attribute = Attribute::field("age");
        assert_eq!(attribute.values_of(&record), attribute.values_of(&record));
    }

    // ---- Schema factory ----

    #[test]
    fn schema_factory_builds_typed_attributes() {
        let schema: BTreeMap<String, FieldType> = [
            ("name".to_string(), FieldType::String),
            ("age".to_string(), FieldType::Number),
            ("active".to_string(), FieldType::Boolean),
            ("tags".to_string(), FieldType::StringArray),
        ]
        .into();
        let attributes = schema_attributes(&schema, None);
        assert_eq!(attributes.len(), 4);

        let record = user();
        for attribute in &attributes {
            match attribute.name() {
                "name" => assert_eq!(
                    attribute.value_of(&record),
                    Some(ScalarValue::from("Alice"))
                ),
                "age" => assert_eq!(attribute.value_of(&record), Some(ScalarValue::from(30_i64))),
                "active" => assert_eq!(attribute.value_of(&record), Some(ScalarValue::from(true))),
                "tags" => assert_eq!(attribute.values_of(&record).len(), 2),
                other => panic!("unexpected attribute {other}"),
            }
        }
    }

    #[test]
    fn schema_factory_drops_wrongly_typed_values() {
        let schema: BTreeMap<String, FieldType> =
            [("name".to_string(), FieldType::Number)].into();
        let attributes = schema_attributes(&schema, None);
        assert_eq!(attributes[0].value_of(&user()), None);
    }

    #[test]
    fn schema_factory_applies_prefix() {
        let schema: BTreeMap<String, FieldType> =
            [("city".to_string(), FieldType::String)].into();
        let attributes = schema_attributes(&schema, Some("geo."));
        assert_eq!(attributes[0].name(), "geo.city");
    }

    // ---- Resolver ----

    #[test]
    fn resolver_prefers_registered_attributes() {
        let mut resolver = AttributeResolver::new();
        resolver.register(Attribute::simple("shouty", |record| {
            record
                .get("name")
                .and_then(Value::as_str)
                .map(|s| ScalarValue::from(s.to_uppercase()))
        }));

        let record = user();
        assert_eq!(
            resolver.values_of("shouty", &record),
            vec![ScalarValue::from("ALICE")]
        );
        // Unregistered names fall back to dot-path access.
        assert_eq!(
            resolver.values_of("address.city", &record),
            vec![ScalarValue::from("Oslo")]
        );
    }
}
