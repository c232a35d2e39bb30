//! # Query AST and Generator
//!
//! A bounded read is described as a [`SelectQueryRoot`] with five clause
//! roles (select, from, where, order by, limit) and compiled by a
//! [`SelectQueryGenerator`] into SQL text plus typed [`Binding`]s.
//!
//! ```rust,ignore
//! let ast = SelectQueryRoot::new(SelectNode::Columns(vec![a.clone(), b.clone()]))
//!     .from(TableName::new(None, "t"))
//!     .filter(WhereClause::And(vec![
//!         WhereClause::equal(a, json!(1)),
//!         WhereClause::greater(b, json!(2)),
//!     ]));
//! let query = AnsiSelectQueryGenerator.generate(&ast)?;
//! assert_eq!(query.sql, "SELECT a, b FROM t WHERE (a = ?) AND (b > ?)");
//! ```

mod ast;
mod generator;
mod types;

pub use ast::{
    Comparison, ComparisonOp, FromNode, LimitNode, LimitState, OrderByNode, SelectNode,
    SelectQueryRoot, WhereClause, WhereNode,
};
pub use generator::{AnsiSelectQueryGenerator, Binding, SelectQuery, SelectQueryGenerator};
pub use types::{
    ColumnMetadata, Field, FieldType, FieldTypeMapper, JdbcType, LosslessFieldType,
    StandardFieldTypeMapper, TableName,
};

use thiserror::Error;

/// Errors raised while compiling a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A comparison value cannot be bound losslessly against its column.
    #[error("cannot bind value for column '{column}' ({field_type}): {message}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Declared column type.
        field_type: String,
        /// Details.
        message: String,
    },

    /// An explicit column list with no columns.
    #[error("select clause has no columns")]
    EmptySelect,

    /// An `AND`, `OR`, or `ORDER BY` with no children.
    #[error("{0} clause has no operands")]
    EmptyClause(&'static str),
}
