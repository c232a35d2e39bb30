//! Compiles a [`SelectQueryRoot`] into a parameterized SQL string.

use serde_json::Value;

use super::ast::{
    Comparison, FromNode, LimitNode, OrderByNode, SelectNode, SelectQueryRoot, WhereClause,
    WhereNode,
};
use super::types::{Field, LosslessFieldType};
use super::QueryError;

/// A value bound to one `?` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    /// The value.
    pub value: Value,
    /// The lossless type used to serialize the value on the wire.
    pub field_type: LosslessFieldType,
}

/// A compiled, executable query.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Output columns, in projection order.
    pub columns: Vec<Field>,
    /// Parameter bindings, in placeholder order.
    pub bindings: Vec<Binding>,
}

/// Compiles a query AST into SQL.
///
/// Implementations must be deterministic: the same AST (and the same limit
/// state value) always yields the same SQL and bindings.
pub trait SelectQueryGenerator: Send + Sync {
    /// Compiles `ast`.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] if the AST is malformed or a comparison value
    /// cannot be bound losslessly.
    fn generate(&self, ast: &SelectQueryRoot) -> Result<SelectQuery, QueryError>;
}

/// Generator for ANSI-style SQL with `?` placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiSelectQueryGenerator;

impl SelectQueryGenerator for AnsiSelectQueryGenerator {
    fn generate(&self, ast: &SelectQueryRoot) -> Result<SelectQuery, QueryError> {
        let mut parts = Vec::with_capacity(5);
        parts.push(render_select(&ast.select)?);
        if let Some(from) = render_from(&ast.from) {
            parts.push(from);
        }
        let mut bindings = Vec::new();
        if let WhereNode::Where(clause) = &ast.where_clause {
            parts.push(format!("WHERE {}", render_clause(clause, &mut bindings)?));
        }
        if let Some(order_by) = render_order_by(&ast.order_by)? {
            parts.push(order_by);
        }
        if let Some(limit) = render_limit(&ast.limit) {
            parts.push(limit);
        }

        Ok(SelectQuery {
            sql: parts.join(" "),
            columns: ast.select.columns(),
            bindings,
        })
    }
}

fn render_select(select: &SelectNode) -> Result<String, QueryError> {
    match select {
        SelectNode::Columns(columns) if columns.is_empty() => Err(QueryError::EmptySelect),
        SelectNode::Columns(columns) => Ok(format!("SELECT {}", join_ids(columns))),
        SelectNode::MaxValue(column) => Ok(format!("SELECT MAX({})", column.id)),
    }
}

fn render_from(from: &FromNode) -> Option<String> {
    match from {
        FromNode::NoFrom => None,
        FromNode::From(table) => Some(format!("FROM {table}")),
    }
}

// Depth-first, left to right: bindings are pushed in placeholder order.
fn render_clause(clause: &WhereClause, bindings: &mut Vec<Binding>) -> Result<String, QueryError> {
    match clause {
        WhereClause::And(children) => render_junction("AND", children, bindings),
        WhereClause::Or(children) => render_junction("OR", children, bindings),
        WhereClause::Compare(comparison) => render_comparison(comparison, bindings),
    }
}

fn render_junction(
    keyword: &'static str,
    children: &[WhereClause],
    bindings: &mut Vec<Binding>,
) -> Result<String, QueryError> {
    if children.is_empty() {
        return Err(QueryError::EmptyClause(keyword));
    }
    let rendered = children
        .iter()
        .map(|child| render_clause(child, bindings))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("({})", rendered.join(&format!(") {keyword} ("))))
}

fn render_comparison(
    comparison: &Comparison,
    bindings: &mut Vec<Binding>,
) -> Result<String, QueryError> {
    let field_type = comparison.column.lossless_type_for(&comparison.value)?;
    bindings.push(Binding {
        value: comparison.value.clone(),
        field_type,
    });
    Ok(format!(
        "{} {} ?",
        comparison.column.id,
        comparison.op.as_sql()
    ))
}

fn render_order_by(order_by: &OrderByNode) -> Result<Option<String>, QueryError> {
    match order_by {
        OrderByNode::NoOrderBy => Ok(None),
        OrderByNode::OrderBy(columns) if columns.is_empty() => {
            Err(QueryError::EmptyClause("ORDER BY"))
        }
        OrderByNode::OrderBy(columns) => Ok(Some(format!("ORDER BY {}", join_ids(columns)))),
    }
}

fn render_limit(limit: &LimitNode) -> Option<String> {
    match limit {
        LimitNode::NoLimit => None,
        LimitNode::LimitZero => Some("LIMIT 0".to_string()),
        LimitNode::Limit(state) => Some(format!("LIMIT {}", state.current())),
    }
}

fn join_ids(columns: &[Field]) -> String {
    columns
        .iter()
        .map(|c| c.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::LimitState;
    use crate::query::types::{FieldType, TableName};
    use serde_json::json;
    use std::sync::Arc;

    fn int(id: &str) -> Field {
        Field::new(id, FieldType::Int)
    }

    fn generate(ast: &SelectQueryRoot) -> Result<SelectQuery, QueryError> {
        AnsiSelectQueryGenerator.generate(ast)
    }

    #[test]
    fn test_select_only() {
        let q = generate(&SelectQueryRoot::new(SelectNode::Columns(vec![int("a"), int("b")])))
            .unwrap();
        assert_eq!(q.sql, "SELECT a, b");
        assert!(q.bindings.is_empty());
        assert_eq!(q.columns.len(), 2);
    }

    #[test]
    fn test_and_renders_parenthesized_children_in_binding_order() {
        let ast = SelectQueryRoot::new(SelectNode::Columns(vec![int("a"), int("b")]))
            .from(TableName::new(Some("public".into()), "t"))
            .filter(WhereClause::And(vec![
                WhereClause::equal(int("a"), json!(1)),
                WhereClause::greater(int("b"), json!(2)),
            ]));
        let q = generate(&ast).unwrap();
        assert_eq!(q.sql, "SELECT a, b FROM public.t WHERE (a = ?) AND (b > ?)");
        let values: Vec<_> = q.bindings.iter().map(|b| b.value.clone()).collect();
        assert_eq!(values, vec![json!(1), json!(2)]);
        assert_eq!(q.bindings[0].field_type.field_type(), &FieldType::Int);
    }

    #[test]
    fn test_nested_bindings_are_depth_first() {
        let ast = SelectQueryRoot::new(SelectNode::Columns(vec![int("k")]))
            .from(TableName::new(None, "t"))
            .filter(WhereClause::Or(vec![
                WhereClause::And(vec![
                    WhereClause::greater(int("k"), json!(1)),
                    WhereClause::lesser_or_equal(int("k"), json!(5)),
                ]),
                WhereClause::equal(int("k"), json!(9)),
            ]));
        let q = generate(&ast).unwrap();
        assert_eq!(
            q.sql,
            "SELECT k FROM t WHERE ((k > ?) AND (k <= ?)) OR (k = ?)"
        );
        let values: Vec<_> = q.bindings.iter().map(|b| b.value.clone()).collect();
        assert_eq!(values, vec![json!(1), json!(5), json!(9)]);
    }

    #[test]
    fn test_full_query_clause_order() {
        let limit = Arc::new(LimitState::new(100, 1000));
        let ast = SelectQueryRoot::new(SelectNode::Columns(vec![int("id"), int("v")]))
            .from(TableName::new(None, "events"))
            .filter(WhereClause::greater(int("id"), json!(10)))
            .order_by(vec![int("id")])
            .limit(LimitNode::Limit(Arc::clone(&limit)));
        let q = generate(&ast).unwrap();
        assert_eq!(
            q.sql,
            "SELECT id, v FROM events WHERE id > ? ORDER BY id LIMIT 100"
        );

        limit.up();
        assert_eq!(generate(&ast).unwrap().sql, "SELECT id, v FROM events WHERE id > ? ORDER BY id LIMIT 200");
    }

    #[test]
    fn test_max_value_and_limit_zero() {
        let max = generate(
            &SelectQueryRoot::new(SelectNode::MaxValue(int("id"))).from(TableName::new(None, "t")),
        )
        .unwrap();
        assert_eq!(max.sql, "SELECT MAX(id) FROM t");
        assert_eq!(max.columns, vec![int("id")]);

        let empty = generate(
            &SelectQueryRoot::new(SelectNode::Columns(vec![int("id")]))
                .from(TableName::new(None, "t"))
                .limit(LimitNode::LimitZero),
        )
        .unwrap();
        assert_eq!(empty.sql, "SELECT id FROM t LIMIT 0");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let ast = SelectQueryRoot::new(SelectNode::Columns(vec![int("a")]))
            .filter(WhereClause::And(vec![
                WhereClause::equal(int("a"), json!(3)),
                WhereClause::greater(int("a"), json!(1)),
            ]));
        assert_eq!(generate(&ast).unwrap(), generate(&ast).unwrap());
    }

    #[test]
    fn test_lossy_binding_fails_fast() {
        let ast = SelectQueryRoot::new(SelectNode::Columns(vec![int("a")]))
            .filter(WhereClause::equal(Field::new("g", FieldType::Unknown), json!("x")));
        assert!(matches!(
            generate(&ast),
            Err(QueryError::TypeMismatch { ref column, .. }) if column == "g"
        ));

        let mismatched = SelectQueryRoot::new(SelectNode::Columns(vec![int("a")]))
            .filter(WhereClause::equal(int("a"), json!("not a number")));
        assert!(generate(&mismatched).is_err());
    }

    #[test]
    fn test_malformed_ast_is_rejected() {
        assert_eq!(
            generate(&SelectQueryRoot::new(SelectNode::Columns(vec![]))),
            Err(QueryError::EmptySelect)
        );
        assert_eq!(
            generate(
                &SelectQueryRoot::new(SelectNode::Columns(vec![int("a")]))
                    .filter(WhereClause::Or(vec![]))
            ),
            Err(QueryError::EmptyClause("OR"))
        );
        assert_eq!(
            generate(&SelectQueryRoot::new(SelectNode::Columns(vec![int("a")])).order_by(vec![])),
            Err(QueryError::EmptyClause("ORDER BY"))
        );
    }
}
