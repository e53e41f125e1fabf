//! Document predicates used to select the documents a unit is allowed to touch.

use std::collections::BTreeSet;

use regex::Regex;
use serde_json::Value;

use crate::document::{Document, ValueType};

/// A composable predicate over documents.
///
/// Leaf conditions inspect a single field path, while `And`, `Or` and `Not`
/// build compound expressions.
///
/// # Examples
///
/// ```
/// use docshift::filter::Filter;
/// use docshift::document::ValueType;
///
/// // Documents still carrying the legacy string discount
/// let pending = Filter::and([
///     Filter::exists("discount"),
///     Filter::type_is("discount", ValueType::String),
/// ]);
/// ```
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Exists { path: String, exists: bool },
    TypeIs { path: String, value_type: ValueType },
    /// Equal to `value`, or an array containing `value`.
    Eq { path: String, value: Value },
    /// Negation of `Eq`; missing fields match.
    Ne { path: String, value: Value },
    In { path: String, values: Vec<Value> },
    /// String fields matching a regular expression.
    Regex { path: String, pattern: Regex },
    IdIn(BTreeSet<String>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    #[inline]
    pub fn all() -> Self {
        Filter::All
    }

    #[inline]
    pub fn exists(path: impl Into<String>) -> Self {
        Filter::Exists {
            path: path.into(),
            exists: true,
        }
    }

    #[inline]
    pub fn missing(path: impl Into<String>) -> Self {
        Filter::Exists {
            path: path.into(),
            exists: false,
        }
    }

    #[inline]
    pub fn type_is(path: impl Into<String>, value_type: ValueType) -> Self {
        Filter::TypeIs {
            path: path.into(),
            value_type,
        }
    }

    #[inline]
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            path: path.into(),
            value: value.into(),
        }
    }

    #[inline]
    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Ne {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Match string fields against `pattern`.
    pub fn regex(path: impl Into<String>, pattern: Regex) -> Self {
        Filter::Regex {
            path: path.into(),
            pattern,
        }
    }

    pub fn id_in<S: Into<String>>(ids: impl IntoIterator<Item = S>) -> Self {
        Filter::IdIn(ids.into_iter().map(Into::into).collect())
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Exists { path, exists } => doc.contains(path) == *exists,
            Filter::TypeIs { path, value_type } => doc.value_type(path) == Some(*value_type),
            Filter::Eq { path, value } => {
                doc.get(path).is_some_and(|found| value_matches(found, value))
            }
            Filter::Ne { path, value } => {
                !doc.get(path).is_some_and(|found| value_matches(found, value))
            }
            Filter::In { path, values } => doc
                .get(path)
                .is_some_and(|found| values.iter().any(|value| value_matches(found, value))),
            Filter::Regex { path, pattern } => doc
                .get(path)
                .and_then(Value::as_str)
                .is_some_and(|text| pattern.is_match(text)),
            Filter::IdIn(ids) => ids.contains(doc.id()),
            Filter::And(filters) => filters.iter().all(|filter| filter.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|filter| filter.matches(doc)),
            Filter::Not(filter) => !filter.matches(doc),
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Filter::All
    }
}

fn value_matches(found: &Value, expected: &Value) -> bool {
    if numbers_equal(found, expected) {
        return true;
    }
    match found {
        Value::Array(items) if !expected.is_array() => {
            items.iter().any(|item| numbers_equal(item, expected))
        }
        _ => false,
    }
}

/// JSON equality that treats `1` and `1.0` as the same number.
fn numbers_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deal() -> Document {
        Document::from_fields(
            "d1",
            json!({
                "title": "Spring sale",
                "discount": "15",
                "tags": ["shoes", "sale"],
                "meta": {"brandId": "b1"}
            }),
        )
    }

    #[test]
    fn existence_and_type_predicates() {
        let doc = deal();
        assert!(Filter::exists("discount").matches(&doc));
        assert!(Filter::missing("codes").matches(&doc));
        assert!(Filter::type_is("discount", ValueType::String).matches(&doc));
        assert!(!Filter::type_is("discount", ValueType::Number).matches(&doc));
        assert!(Filter::exists("meta.brandId").matches(&doc));
    }

    #[test]
    fn eq_matches_array_membership() {
        let doc = deal();
        assert!(Filter::eq("tags", "sale").matches(&doc));
        assert!(!Filter::eq("tags", "boots").matches(&doc));
        assert!(Filter::ne("tags", "boots").matches(&doc));
        assert!(Filter::ne("missing", "x").matches(&doc));
    }

    #[test]
    fn numbers_compare_by_value() {
        let doc = Document::new("n").with("count", 1);
        assert!(Filter::eq("count", 1.0).matches(&doc));
        assert!(Filter::is_in("count", [3, 2, 1]).matches(&doc));
    }

    #[test]
    fn regex_only_matches_strings() {
        let doc = deal();
        assert!(Filter::regex("discount", Regex::new(r"^\d+$").unwrap()).matches(&doc));
        assert!(!Filter::regex("tags", Regex::new("sale").unwrap()).matches(&doc));
    }

    #[test]
    fn compound_filters() {
        let doc = deal();
        let filter = Filter::and([
            Filter::exists("title"),
            Filter::or([Filter::eq("meta.brandId", "b2"), Filter::id_in(["d1"])]),
            Filter::not(Filter::exists("deletedAt")),
        ]);
        assert!(filter.matches(&doc));
        assert!(!Filter::not(Filter::All).matches(&doc));
    }
}
