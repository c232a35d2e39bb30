//! The select query AST.
//!
//! Every clause family is a closed enum, including an explicit "absent"
//! variant where the clause is optional. Generators match exhaustively, so a
//! new variant is a compile error in every generator until it is handled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::types::{Field, TableName};

/// Root of a select query.
#[derive(Debug, Clone)]
pub struct SelectQueryRoot {
    /// Projection.
    pub select: SelectNode,
    /// Source table.
    pub from: FromNode,
    /// Row filter.
    pub where_clause: WhereNode,
    /// Sort order.
    pub order_by: OrderByNode,
    /// Row limit.
    pub limit: LimitNode,
}

impl SelectQueryRoot {
    /// Creates a query with the given projection and every other clause absent.
    #[must_use]
    pub fn new(select: SelectNode) -> Self {
        Self {
            select,
            from: FromNode::NoFrom,
            where_clause: WhereNode::NoWhere,
            order_by: OrderByNode::NoOrderBy,
            limit: LimitNode::NoLimit,
        }
    }

    /// Sets the source table.
    #[must_use]
    pub fn from(mut self, table: TableName) -> Self {
        self.from = FromNode::From(table);
        self
    }

    /// Sets the row filter.
    #[must_use]
    pub fn filter(mut self, clause: WhereClause) -> Self {
        self.where_clause = WhereNode::Where(clause);
        self
    }

    /// Sets the sort columns.
    #[must_use]
    pub fn order_by(mut self, columns: Vec<Field>) -> Self {
        self.order_by = OrderByNode::OrderBy(columns);
        self
    }

    /// Sets the row limit.
    #[must_use]
    pub fn limit(mut self, limit: LimitNode) -> Self {
        self.limit = limit;
        self
    }
}

/// Projection.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectNode {
    /// `SELECT a, b, c`
    Columns(Vec<Field>),
    /// `SELECT MAX(c)`
    MaxValue(Field),
}

impl SelectNode {
    /// Returns the fields produced by this projection, in output order.
    #[must_use]
    pub fn columns(&self) -> Vec<Field> {
        match self {
            Self::Columns(columns) => columns.clone(),
            Self::MaxValue(column) => vec![column.clone()],
        }
    }
}

/// Source table.
#[derive(Debug, Clone, PartialEq)]
pub enum FromNode {
    /// No `FROM` clause.
    NoFrom,
    /// `FROM table`
    From(TableName),
}

/// Optional row filter.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    /// No `WHERE` clause.
    NoWhere,
    /// `WHERE clause`
    Where(WhereClause),
}

/// A boolean filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    /// Conjunction of sub-clauses.
    And(Vec<WhereClause>),
    /// Disjunction of sub-clauses.
    Or(Vec<WhereClause>),
    /// A single column comparison.
    Compare(Comparison),
}

impl WhereClause {
    /// `column = value`
    #[must_use]
    pub fn equal(column: Field, value: Value) -> Self {
        Self::Compare(Comparison::new(column, ComparisonOp::Equal, value))
    }

    /// `column > value`
    #[must_use]
    pub fn greater(column: Field, value: Value) -> Self {
        Self::Compare(Comparison::new(column, ComparisonOp::Greater, value))
    }

    /// `column <= value`
    #[must_use]
    pub fn lesser_or_equal(column: Field, value: Value) -> Self {
        Self::Compare(Comparison::new(column, ComparisonOp::LesserOrEqual, value))
    }
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    /// `=`
    Equal,
    /// `>`
    Greater,
    /// `<=`
    LesserOrEqual,
}

impl ComparisonOp {
    /// SQL spelling of the operator.
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::Greater => ">",
            Self::LesserOrEqual => "<=",
        }
    }
}

/// A leaf comparison between a column and a bound value.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Column being compared.
    pub column: Field,
    /// Operator.
    pub op: ComparisonOp,
    /// Value, bound as a query parameter.
    pub value: Value,
}

impl Comparison {
    /// Creates a comparison.
    #[must_use]
    pub fn new(column: Field, op: ComparisonOp, value: Value) -> Self {
        Self { column, op, value }
    }
}

/// Optional sort order.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderByNode {
    /// No `ORDER BY` clause.
    NoOrderBy,
    /// `ORDER BY a, b` (ascending)
    OrderBy(Vec<Field>),
}

/// Optional row limit.
#[derive(Debug, Clone)]
pub enum LimitNode {
    /// No `LIMIT` clause.
    NoLimit,
    /// `LIMIT 0`, used to validate a query without reading rows.
    LimitZero,
    /// `LIMIT n` where `n` is read from shared, adaptive state at generation
    /// time.
    Limit(Arc<LimitState>),
}

/// Adaptive row limit shared between a partition reader and the queries it
/// generates.
///
/// The limit grows while reads complete comfortably and shrinks when a read
/// does not fit its reservation. It never drops below 1 or rises above the
/// configured maximum.
#[derive(Debug)]
pub struct LimitState {
    current: AtomicU64,
    maximum: u64,
}

impl LimitState {
    /// Creates a limit starting at `initial`, clamped to `1..=maximum`.
    #[must_use]
    pub fn new(initial: u64, maximum: u64) -> Self {
        let maximum = maximum.max(1);
        Self {
            current: AtomicU64::new(initial.clamp(1, maximum)),
            maximum,
        }
    }

    /// Creates a limit that never changes.
    #[must_use]
    pub fn fixed(n: u64) -> Self {
        Self::new(n, n)
    }

    /// Returns the current limit.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Returns the maximum limit.
    #[must_use]
    pub fn maximum(&self) -> u64 {
        self.maximum
    }

    /// Doubles the limit, saturating at the maximum. Returns the new value.
    pub fn up(&self) -> u64 {
        self.update(|n| n.saturating_mul(2).min(self.maximum))
    }

    /// Halves the limit, never below 1. Returns the new value.
    pub fn down(&self) -> u64 {
        self.update(|n| (n / 2).max(1))
    }

    fn update(&self, f: impl Fn(u64) -> u64) -> u64 {
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            let next = f(current);
            match self.current.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::types::FieldType;
    use serde_json::json;

    #[test]
    fn test_builder_defaults_to_absent_clauses() {
        let root = SelectQueryRoot::new(SelectNode::Columns(vec![Field::new(
            "id",
            FieldType::Int,
        )]));
        assert_eq!(root.from, FromNode::NoFrom);
        assert_eq!(root.where_clause, WhereNode::NoWhere);
        assert_eq!(root.order_by, OrderByNode::NoOrderBy);
        assert!(matches!(root.limit, LimitNode::NoLimit));
    }

    #[test]
    fn test_select_columns() {
        let id = Field::new("id", FieldType::Int);
        assert_eq!(SelectNode::MaxValue(id.clone()).columns(), vec![id.clone()]);
        assert_eq!(
            SelectNode::Columns(vec![id.clone(), Field::new("v", FieldType::String)]).columns()[1].id,
            "v"
        );
    }

    #[test]
    fn test_comparison_helpers() {
        let id = Field::new("id", FieldType::Int);
        let WhereClause::Compare(cmp) = WhereClause::lesser_or_equal(id, json!(5)) else {
            panic!("expected a comparison");
        };
        assert_eq!(cmp.op, ComparisonOp::LesserOrEqual);
        assert_eq!(cmp.op.as_sql(), "<=");
        assert_eq!(cmp.value, json!(5));
    }

    #[test]
    fn test_limit_up_and_down() {
        let limit = LimitState::new(1000, 3000);
        assert_eq!(limit.up(), 2000);
        assert_eq!(limit.up(), 3000);
        assert_eq!(limit.up(), 3000);
        assert_eq!(limit.down(), 1500);

        let small = LimitState::new(3, 10);
        assert_eq!(small.down(), 1);
        assert_eq!(small.down(), 1);
    }

    #[test]
    fn test_limit_clamps_initial() {
        assert_eq!(LimitState::new(0, 10).current(), 1);
        assert_eq!(LimitState::new(50, 10).current(), 10);
        let fixed = LimitState::fixed(1);
        assert_eq!(fixed.up(), 1);
        assert_eq!(fixed.current(), 1);
    }

    #[test]
    fn test_shared_limit_state() {
        let state = Arc::new(LimitState::new(10, 100));
        let node = LimitNode::Limit(Arc::clone(&state));
        state.up();
        let LimitNode::Limit(shared) = node else {
            panic!("expected limit");
        };
        assert_eq!(shared.current(), 20);
    }
}
