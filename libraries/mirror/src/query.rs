//! Filters and orderings a collection is read with.

use std::cmp::Ordering;

use serde_json::Value;

use crate::Row;

/// A conjunction of equality predicates, `column = value`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push((column.into(), value.into()));
        self
    }

    pub fn predicates(&self) -> &[(String, Value)] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Whether `row` satisfies every predicate. A missing column never matches.
    pub fn matches(&self, row: &Row) -> bool {
        self.predicates
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }

    /// Like [`Self::matches`], but a missing column could have held anything. Used for old
    /// records of pushed changes, which often carry only the primary key.
    pub fn may_match(&self, row: &Row) -> bool {
        self.predicates
            .iter()
            .all(|(column, value)| row.get(column).is_none_or(|v| v == value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// PostgREST spelling, e.g. `created_at.desc`.
    pub fn to_postgrest(&self) -> String {
        let direction = if self.ascending { "asc" } else { "desc" };
        format!("{}.{direction}", self.column)
    }

    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ordering = compare_values(a.get(&self.column), b.get(&self.column));
        if self.ascending {
            ordering
        } else {
            ordering.reverse()
        }
    }
}

/// Everything needed to read a collection: the column selection (which may embed joins),
/// the filter and the order.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub select: String,
    pub filter: Filter,
    pub order: Option<Order>,
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            select: "*".to_string(),
            filter,
            order: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = columns.into();
        self
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = Some(order);
        self
    }
}

/// Total order over the JSON values rows are sorted by.
/// Missing and null values sort first; timestamps are compared as strings, which is correct
/// for RFC 3339 values written with the same precision.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            match (a.as_i64(), b.as_i64()) {
                (Some(a), Some(b)) => a.cmp(&b),
                _ => {
                    let a = a.as_f64().unwrap_or(f64::NAN);
                    let b = b.as_f64().unwrap_or(f64::NAN);
                    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
                }
            }
        }
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Array(a)), Some(Value::Array(b))) => a.len().cmp(&b.len()),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_filter_matches_every_predicate() {
        let filter = Filter::all().eq("is_deleted", false).eq("added_by", "u1");
        assert!(filter.matches(&row(json!({"is_deleted": false, "added_by": "u1"}))));
        assert!(!filter.matches(&row(json!({"is_deleted": true, "added_by": "u1"}))));
        assert!(!filter.matches(&row(json!({"added_by": "u1"}))));
    }

    #[test]
    fn test_may_match_treats_missing_columns_as_unknown() {
        let filter = Filter::all().eq("is_deleted", false);
        assert!(filter.may_match(&row(json!({"id": "p1"}))));
        assert!(filter.may_match(&row(json!({"id": "p1", "is_deleted": false}))));
        assert!(!filter.may_match(&row(json!({"id": "p1", "is_deleted": true}))));
    }

    #[test]
    fn test_empty_filter_matches_anything() {
        assert!(Filter::all().matches(&row(json!({"id": "p1"}))));
    }

    #[test]
    fn test_order_desc_by_timestamp() {
        let older = row(json!({"created_at": "2025-01-01T10:00:00.000000Z"}));
        let newer = row(json!({"created_at": "2025-01-02T10:00:00.000000Z"}));
        let order = Order::desc("created_at");
        assert_eq!(order.compare(&newer, &older), Ordering::Less);
        assert_eq!(Order::asc("created_at").compare(&newer, &older), Ordering::Greater);
    }

    #[test]
    fn test_postgrest_order_spelling() {
        assert_eq!(Order::desc("created_at").to_postgrest(), "created_at.desc");
        assert_eq!(Order::asc("created_at").to_postgrest(), "created_at.asc");
    }

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(
            compare_values(Some(&json!(9)), Some(&json!(150))),
            Ordering::Less
        );
    }
}
