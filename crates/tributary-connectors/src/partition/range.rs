//! Key ranges and their checkpoint encoding.
//!
//! A [`KeyRange`] is the half-open interval `(lower, upper]` over one
//! ordered column. A missing lower bound is unbounded below. The upper bound
//! is always present; it is the column maximum observed when the stream's
//! partition was created.
//!
//! Bounds are compared with the [`KeyOrder`] of the column's type, so
//! decimals carried as strings and timestamps with different offsets sort
//! the way the source sorts them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tributary_core::query::FieldType;

use crate::checkpoint::OpaqueState;
use crate::error::ConnectorError;

/// Compares two key values.
///
/// Numbers compare numerically and strings lexically. This is the order of
/// integer, floating point, text and local ISO-8601 temporal columns.
///
/// # Errors
///
/// Returns `ConnectorError::SchemaMismatch` for values that are not both
/// numbers or both strings.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, ConnectorError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Ok(x.cmp(&y));
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return Ok(x.cmp(&y));
            }
            x.as_f64()
                .zip(y.as_f64())
                .and_then(|(x, y)| x.partial_cmp(&y))
                .ok_or_else(|| incomparable(a, b))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(incomparable(a, b)),
    }
}

fn incomparable(a: &Value, b: &Value) -> ConnectorError {
    ConnectorError::SchemaMismatch(format!("cannot order key values {a} and {b}"))
}

/// How the values of a key column are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyOrder {
    /// [`compare_values`] order.
    #[default]
    Natural,
    /// Exact decimals, given as JSON numbers or numeric strings.
    Decimal,
    /// RFC 3339 timestamps with an offset, ordered by the instant they name.
    Instant,
}

impl KeyOrder {
    /// Returns the order of a column type, or `None` if the type cannot key
    /// a range.
    #[must_use]
    pub fn for_type(field_type: &FieldType) -> Option<Self> {
        match field_type {
            FieldType::BigDecimal => Some(Self::Decimal),
            FieldType::OffsetDateTime => Some(Self::Instant),
            FieldType::Byte
            | FieldType::Short
            | FieldType::Int
            | FieldType::BigInteger
            | FieldType::Float
            | FieldType::Double
            | FieldType::String
            | FieldType::NString
            | FieldType::LocalDate
            | FieldType::LocalTime
            | FieldType::LocalDateTime => Some(Self::Natural),
            _ => None,
        }
    }

    /// Compares two key values.
    ///
    /// # Errors
    ///
    /// Returns `ConnectorError::SchemaMismatch` if either value does not
    /// parse as this order's type.
    pub fn compare(self, a: &Value, b: &Value) -> Result<Ordering, ConnectorError> {
        match self {
            Self::Natural => compare_values(a, b),
            Self::Decimal => Ok(decimal(a)?.cmp(&decimal(b)?)),
            Self::Instant => Ok(instant(a)?.cmp(&instant(b)?)),
        }
    }
}

fn decimal(value: &Value) -> Result<Decimal, ConnectorError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(not_a_key(value, "decimal", "not a number or string")),
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| not_a_key(value, "decimal", &e.to_string()))
}

fn instant(value: &Value) -> Result<DateTime<FixedOffset>, ConnectorError> {
    let Value::String(text) = value else {
        return Err(not_a_key(value, "timestamp", "not a string"));
    };
    DateTime::parse_from_rfc3339(text).map_err(|e| not_a_key(value, "timestamp", &e.to_string()))
}

fn not_a_key(value: &Value, kind: &str, reason: &str) -> ConnectorError {
    ConnectorError::SchemaMismatch(format!("key value {value} is not a {kind}: {reason}"))
}

/// The interval `(lower, upper]` of an ordered key column.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    /// Exclusive lower bound, `None` for unbounded.
    pub lower: Option<Value>,
    /// Inclusive upper bound.
    pub upper: Value,
    order: KeyOrder,
}

impl KeyRange {
    /// Creates a range in [`KeyOrder::Natural`] order.
    #[must_use]
    pub fn new(lower: Option<Value>, upper: Value) -> Self {
        Self {
            lower,
            upper,
            order: KeyOrder::Natural,
        }
    }

    /// Sets the order bounds are compared in.
    #[must_use]
    pub fn with_order(mut self, order: KeyOrder) -> Self {
        self.order = order;
        self
    }

    /// Returns the order bounds are compared in.
    #[must_use]
    pub fn order(&self) -> KeyOrder {
        self.order
    }

    fn compare(&self, a: &Value, b: &Value) -> Result<Ordering, ConnectorError> {
        self.order.compare(a, b)
    }

    fn piece(&self, lower: Option<Value>, upper: Value) -> Self {
        Self::new(lower, upper).with_order(self.order)
    }

    /// Returns `true` if no key lies in the range.
    ///
    /// # Errors
    ///
    /// Returns an error if the bounds cannot be compared.
    pub fn is_empty(&self) -> Result<bool, ConnectorError> {
        self.spans_nothing(self)
    }

    fn spans_nothing(&self, range: &KeyRange) -> Result<bool, ConnectorError> {
        match &range.lower {
            Some(lower) => Ok(self.compare(lower, &range.upper)?.is_ge()),
            None => Ok(false),
        }
    }

    /// Returns `true` if `key` lies in the range.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` cannot be compared with the bounds.
    pub fn contains(&self, key: &Value) -> Result<bool, ConnectorError> {
        if self.compare(key, &self.upper)?.is_gt() {
            return Ok(false);
        }
        match &self.lower {
            Some(lower) => Ok(self.compare(key, lower)?.is_gt()),
            None => Ok(true),
        }
    }

    /// Returns the parts of this range not covered by any of `consumed`,
    /// in ascending key order. `consumed` is compared in this range's order.
    ///
    /// # Errors
    ///
    /// Returns an error if bounds of different kinds are compared.
    pub fn subtract(&self, consumed: &[KeyRange]) -> Result<Vec<KeyRange>, ConnectorError> {
        let mut remaining = if self.is_empty()? {
            Vec::new()
        } else {
            vec![self.clone()]
        };
        for done in consumed {
            if self.spans_nothing(done)? {
                continue;
            }
            let mut next = Vec::with_capacity(remaining.len() + 1);
            for piece in &remaining {
                next.extend(piece.minus(done)?);
            }
            remaining = next;
        }
        Ok(remaining)
    }

    fn minus(&self, other: &KeyRange) -> Result<Vec<KeyRange>, ConnectorError> {
        let below = match &self.lower {
            Some(lower) => self.compare(&other.upper, lower)?.is_le(),
            None => false,
        };
        let above = match &other.lower {
            Some(lower) => self.compare(lower, &self.upper)?.is_ge(),
            None => false,
        };
        if below || above {
            return Ok(vec![self.clone()]);
        }

        let mut pieces = Vec::with_capacity(2);
        if let Some(other_lower) = &other.lower {
            let starts_later = match &self.lower {
                Some(lower) => self.compare(other_lower, lower)?.is_gt(),
                None => true,
            };
            if starts_later {
                pieces.push(self.piece(self.lower.clone(), other_lower.clone()));
            }
        }
        if self.compare(&other.upper, &self.upper)?.is_lt() {
            pieces.push(self.piece(Some(other.upper.clone()), self.upper.clone()));
        }
        Ok(pieces)
    }

    /// Splits an integer range into up to `pieces` contiguous ranges of
    /// near-equal width.
    ///
    /// An unbounded lower end is measured from `min`, the smallest key in the
    /// column; the first piece stays unbounded. Ranges over non-integer keys,
    /// or unbounded ranges without a known minimum, are returned whole.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn subdivide(&self, pieces: usize, min: Option<&Value>) -> Vec<KeyRange> {
        let whole = || vec![self.clone()];
        let Some(upper) = self.upper.as_i64() else {
            return whole();
        };
        let start = match (&self.lower, min.and_then(Value::as_i64)) {
            (Some(lower), _) => match lower.as_i64() {
                Some(lower) => i128::from(lower),
                None => return whole(),
            },
            (None, Some(min)) => i128::from(min) - 1,
            (None, None) => return whole(),
        };
        let span = i128::from(upper) - start;
        let n = (pieces as i128).min(span);
        if n < 2 {
            return whole();
        }

        let bound = |k: i128| start + span * k / n;
        (0..n)
            .map(|k| {
                let lower = if k == 0 {
                    self.lower.clone()
                } else {
                    Some(json!(bound(k) as i64))
                };
                let upper = if k == n - 1 {
                    self.upper.clone()
                } else {
                    json!(bound(k + 1) as i64)
                };
                self.piece(lower, upper)
            })
            .collect()
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Some(lower) => write!(f, "({lower},{}]", self.upper),
            None => write!(f, "(,{}]", self.upper),
        }
    }
}

/// Checkpoint of a range partition. Rows in `(lower, cursor]` are consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RangeCheckpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default)]
    pub lower: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<Value>,
    pub cursor: Value,
}

impl RangeCheckpoint {
    pub(crate) fn completed(column: &str, range: &KeyRange) -> Self {
        Self {
            column: Some(column.to_string()),
            lower: range.lower.clone(),
            upper: Some(range.upper.clone()),
            cursor: range.upper.clone(),
        }
    }

    pub(crate) fn consumed(&self) -> KeyRange {
        KeyRange::new(self.lower.clone(), self.cursor.clone())
    }

    pub(crate) fn to_state(&self) -> OpaqueState {
        OpaqueState::new(serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Checkpoint of a snapshot partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SnapshotCheckpoint {
    pub complete: bool,
}

impl SnapshotCheckpoint {
    pub(crate) fn to_state(&self) -> OpaqueState {
        OpaqueState::new(json!({ "complete": self.complete }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(lower: Option<i64>, upper: i64) -> KeyRange {
        KeyRange::new(lower.map(|l| json!(l)), json!(upper))
    }

    fn keys(ranges: &[KeyRange], domain: std::ops::RangeInclusive<i64>) -> Vec<i64> {
        domain
            .filter(|k| {
                ranges
                    .iter()
                    .filter(|r| r.contains(&json!(k)).unwrap())
                    .count()
                    == 1
            })
            .collect()
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&json!(1), &json!(2)).unwrap(), Ordering::Less);
        assert_eq!(compare_values(&json!(2.5), &json!(2)).unwrap(), Ordering::Greater);
        assert_eq!(
            compare_values(&json!(u64::MAX), &json!(u64::MAX)).unwrap(),
            Ordering::Equal
        );
        assert_eq!(
            compare_values(&json!("2024-01-02"), &json!("2024-01-10")).unwrap(),
            Ordering::Less
        );
        assert!(compare_values(&json!(1), &json!("1")).is_err());
        assert!(compare_values(&Value::Null, &json!(1)).is_err());
    }

    #[test]
    fn test_contains_and_empty() {
        let r = range(Some(5), 10);
        assert!(!r.contains(&json!(5)).unwrap());
        assert!(r.contains(&json!(6)).unwrap());
        assert!(r.contains(&json!(10)).unwrap());
        assert!(!r.contains(&json!(11)).unwrap());
        assert!(range(None, 1).contains(&json!(-100)).unwrap());

        assert!(range(Some(10), 10).is_empty().unwrap());
        assert!(!range(None, 10).is_empty().unwrap());
    }

    #[test]
    fn test_subtract_cursor_prefix() {
        let remaining = range(None, 10).subtract(&[range(None, 5)]).unwrap();
        assert_eq!(remaining, vec![range(Some(5), 10)]);
        assert_eq!(keys(&remaining, 1..=10), vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_subtract_leaves_gaps_in_order() {
        let remaining = range(None, 20)
            .subtract(&[range(Some(12), 15), range(Some(3), 6)])
            .unwrap();
        assert_eq!(
            remaining,
            vec![range(None, 3), range(Some(6), 12), range(Some(15), 20)]
        );
    }

    #[test]
    fn test_subtract_overlapping_and_out_of_range_states() {
        let remaining = range(Some(0), 10)
            .subtract(&[
                range(Some(2), 6),
                range(Some(4), 8),
                range(Some(20), 30),
                range(Some(7), 7),
            ])
            .unwrap();
        assert_eq!(remaining, vec![range(Some(0), 2), range(Some(8), 10)]);

        let all = range(Some(0), 10).subtract(&[range(None, 99)]).unwrap();
        assert!(all.is_empty());

        let none = range(Some(0), 10).subtract(&[]).unwrap();
        assert_eq!(none, vec![range(Some(0), 10)]);
    }

    #[test]
    fn test_subdivide_integer_range() {
        let pieces = range(None, 9).subdivide(3, Some(&json!(1)));
        assert_eq!(
            pieces,
            vec![range(None, 3), range(Some(3), 6), range(Some(6), 9)]
        );
        assert_eq!(keys(&pieces, 1..=9), (1..=9).collect::<Vec<_>>());

        let pieces = range(Some(5), 10).subdivide(2, None);
        assert_eq!(pieces, vec![range(Some(5), 7), range(Some(7), 10)]);
        assert_eq!(keys(&pieces, 1..=10), vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_subdivide_keeps_small_or_unknown_ranges_whole() {
        assert_eq!(range(Some(5), 6).subdivide(4, None).len(), 1);
        assert_eq!(range(Some(5), 8).subdivide(10, None).len(), 3);
        assert_eq!(range(None, 100).subdivide(4, None).len(), 1);
        let text = KeyRange::new(Some(json!("a")), json!("z"));
        assert_eq!(text.subdivide(4, None), vec![text.clone()]);
    }

    #[test]
    fn test_range_checkpoint_encoding() {
        let done = RangeCheckpoint::completed("id", &range(Some(5), 10));
        let state = done.to_state();
        assert_eq!(
            state.value(),
            &json!({"column": "id", "lower": 5, "upper": 10, "cursor": 10})
        );

        let parsed: RangeCheckpoint = serde_json::from_value(json!({"cursor": 5})).unwrap();
        assert_eq!(parsed.consumed(), range(None, 5));
        assert!(serde_json::from_value::<RangeCheckpoint>(json!({"complete": true})).is_err());

        assert_eq!(
            SnapshotCheckpoint { complete: true }.to_state().value(),
            &json!({"complete": true})
        );
    }

    #[test]
    fn test_decimal_keys_compare_numerically() {
        let order = KeyOrder::Decimal;
        assert_eq!(order.compare(&json!("9"), &json!("10")).unwrap(), Ordering::Less);
        assert_eq!(order.compare(&json!("1.50"), &json!(1.5)).unwrap(), Ordering::Equal);
        assert_eq!(order.compare(&json!("-2"), &json!("1e2")).unwrap(), Ordering::Less);
        assert!(order.compare(&json!("ten"), &json!("1")).is_err());

        let whole = KeyRange::new(None, json!("100")).with_order(KeyOrder::Decimal);
        let remaining = whole.subtract(&[KeyRange::new(None, json!("9"))]).unwrap();
        assert_eq!(
            remaining,
            vec![KeyRange::new(Some(json!("9")), json!("100")).with_order(KeyOrder::Decimal)]
        );
        assert!(remaining[0].contains(&json!("10")).unwrap());
        assert!(remaining[0].contains(&json!("99.5")).unwrap());
        assert!(!remaining[0].contains(&json!("9")).unwrap());
        assert!(!remaining[0].contains(&json!("100.01")).unwrap());
    }

    #[test]
    fn test_offset_timestamps_compare_by_instant() {
        let earlier = json!("2024-01-01T10:00:00+02:00");
        let later = json!("2024-01-01T09:00:00Z");
        assert_eq!(
            KeyOrder::Instant.compare(&earlier, &later).unwrap(),
            Ordering::Less
        );
        assert_eq!(
            KeyOrder::Natural.compare(&earlier, &later).unwrap(),
            Ordering::Greater
        );
        assert!(KeyOrder::Instant.compare(&json!("yesterday"), &later).is_err());

        let range = KeyRange::new(Some(earlier), later).with_order(KeyOrder::Instant);
        assert!(range.contains(&json!("2024-01-01T08:30:00Z")).unwrap());
        assert!(!range.is_empty().unwrap());
    }

    #[test]
    fn test_key_order_for_type() {
        assert_eq!(KeyOrder::for_type(&FieldType::Int), Some(KeyOrder::Natural));
        assert_eq!(KeyOrder::for_type(&FieldType::String), Some(KeyOrder::Natural));
        assert_eq!(KeyOrder::for_type(&FieldType::BigDecimal), Some(KeyOrder::Decimal));
        assert_eq!(
            KeyOrder::for_type(&FieldType::OffsetDateTime),
            Some(KeyOrder::Instant)
        );
        assert_eq!(KeyOrder::for_type(&FieldType::Boolean), None);
        assert_eq!(KeyOrder::for_type(&FieldType::Bytes), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(range(None, 5).to_string(), "(,5]");
        assert_eq!(range(Some(5), 10).to_string(), "(5,10]");
    }
}
