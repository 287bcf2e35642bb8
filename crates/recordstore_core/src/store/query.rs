//! Fetch requests, predicates and sort specs.
//!
//! # Responsibility
//! - Describe which records of one entity to fetch and in which order.
//! - Compile that description into parameterized SQL over `json_extract`.
//!
//! # Invariants
//! - Attribute paths and values are always bound as parameters, never
//!   spliced into SQL text.
//! - Every fetch ends with `rowid ASC`, so unsorted fetches and sort ties
//!   follow insertion order.

use super::QueryError;
use rusqlite::types::Value as SqlValue;

/// Scalar operand of a predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl Value {
    /// SQLite binds NaN as NULL, which `IS` would then match against
    /// missing attributes, so non-finite reals are refused.
    fn to_sql(&self, attribute: &str) -> Result<SqlValue, QueryError> {
        Ok(match self {
            // json_extract yields 1/0 for JSON booleans.
            Self::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
            Self::Null => SqlValue::Null,
            Self::Integer(value) => SqlValue::Integer(*value),
            Self::Real(value) if !value.is_finite() => {
                return Err(QueryError::InvalidValue {
                    attribute: attribute.to_string(),
                    reason: format!("non-finite real `{value}`"),
                });
            }
            Self::Real(value) => SqlValue::Real(*value),
            Self::Text(value) => SqlValue::Text(value.clone()),
        })
    }
}

/// Comparison operator for [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Null-safe equality: `Eq(attr, Null)` matches missing attributes.
    Eq,
    /// Null-safe inequality.
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn sql_operator(self) -> &'static str {
        match self {
            Self::Eq => "IS",
            Self::Ne => "IS NOT",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Filter expression evaluated by the store against record attributes.
///
/// Attributes are dotted paths into the record's serialized form, e.g.
/// `"title"` or `"meta.rank"`.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every record.
    True,
    Compare {
        attribute: String,
        op: Comparison,
        value: Value,
    },
    In {
        attribute: String,
        values: Vec<Value>,
    },
    /// Case-sensitive substring match on a text attribute.
    Contains { attribute: String, needle: String },
    /// Case-sensitive prefix match on a text attribute.
    BeginsWith { attribute: String, prefix: String },
    IsNull(String),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Eq, value)
    }

    pub fn ne(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Ne, value)
    }

    pub fn lt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Lt, value)
    }

    pub fn le(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Le, value)
    }

    pub fn gt(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Gt, value)
    }

    pub fn ge(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(attribute, Comparison::Ge, value)
    }

    pub fn compare(attribute: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Self::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn one_of<V: Into<Value>>(
        attribute: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            attribute: attribute.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(attribute: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            attribute: attribute.into(),
            needle: needle.into(),
        }
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::BeginsWith {
            attribute: attribute.into(),
            prefix: prefix.into(),
        }
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Self::IsNull(attribute.into())
    }

    /// Conjunction, flattening nested `And`s.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut terms) => {
                terms.push(other);
                Self::And(terms)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Disjunction, flattening nested `Or`s.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut terms) => {
                terms.push(other);
                Self::Or(terms)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub attribute: String,
    pub direction: SortDirection,
}

/// Ordered sort keys; earlier keys take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSpec {
    keys: Vec<SortDescriptor>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ascending(mut self, attribute: impl Into<String>) -> Self {
        self.keys.push(SortDescriptor {
            attribute: attribute.into(),
            direction: SortDirection::Ascending,
        });
        self
    }

    pub fn descending(mut self, attribute: impl Into<String>) -> Self {
        self.keys.push(SortDescriptor {
            attribute: attribute.into(),
            direction: SortDirection::Descending,
        });
        self
    }

    pub fn keys(&self) -> &[SortDescriptor] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Fetch description for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub entity: String,
    pub predicate: Predicate,
    pub sort: Option<SortSpec>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl FetchRequest {
    /// Request for every record of `entity` in natural order.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: Predicate::True,
            sort: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

/// SQL text plus positional parameters, in placeholder order.
#[derive(Debug)]
pub(crate) struct CompiledFetch {
    pub(crate) sql: String,
    pub(crate) params: Vec<SqlValue>,
}

pub(crate) fn compile_fetch(request: &FetchRequest) -> Result<CompiledFetch, QueryError> {
    let mut sql = String::from("SELECT id, body FROM records WHERE entity = ? AND ");
    let mut params = vec![SqlValue::Text(request.entity.clone())];

    compile_predicate(&request.predicate, &mut sql, &mut params)?;

    sql.push_str(" ORDER BY ");
    if let Some(sort) = &request.sort {
        for key in sort.keys() {
            sql.push_str("json_extract(body, ?) ");
            params.push(SqlValue::Text(json_path(&key.attribute)?));
            sql.push_str(match key.direction {
                SortDirection::Ascending => "ASC, ",
                SortDirection::Descending => "DESC, ",
            });
        }
    }
    sql.push_str("rowid ASC");

    if let Some(limit) = request.limit {
        sql.push_str(" LIMIT ?");
        params.push(SqlValue::Integer(i64::from(limit)));
        if request.offset > 0 {
            sql.push_str(" OFFSET ?");
            params.push(SqlValue::Integer(i64::from(request.offset)));
        }
    } else if request.offset > 0 {
        sql.push_str(" LIMIT -1 OFFSET ?");
        params.push(SqlValue::Integer(i64::from(request.offset)));
    }

    Ok(CompiledFetch { sql, params })
}

fn compile_predicate(
    predicate: &Predicate,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> Result<(), QueryError> {
    match predicate {
        Predicate::True => sql.push_str("1 = 1"),
        Predicate::Compare {
            attribute,
            op,
            value,
        } => {
            push_extract(attribute, sql, params)?;
            sql.push(' ');
            sql.push_str(op.sql_operator());
            sql.push_str(" ?");
            params.push(value.to_sql(attribute)?);
        }
        Predicate::In { attribute, values } => {
            if values.is_empty() {
                sql.push_str("1 = 0");
                return Ok(());
            }
            push_extract(attribute, sql, params)?;
            sql.push_str(" IN (");
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    sql.push_str(", ");
                }
                sql.push('?');
                params.push(value.to_sql(attribute)?);
            }
            sql.push(')');
        }
        Predicate::Contains { attribute, needle } => {
            sql.push_str("instr(");
            push_extract(attribute, sql, params)?;
            sql.push_str(", ?) > 0");
            params.push(SqlValue::Text(needle.clone()));
        }
        Predicate::BeginsWith { attribute, prefix } => {
            // substr() counts characters, not bytes, for TEXT operands.
            sql.push_str("substr(");
            push_extract(attribute, sql, params)?;
            sql.push_str(", 1, ?) = ?");
            let chars = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
            params.push(SqlValue::Integer(chars));
            params.push(SqlValue::Text(prefix.clone()));
        }
        Predicate::IsNull(attribute) => {
            push_extract(attribute, sql, params)?;
            sql.push_str(" IS NULL");
        }
        Predicate::And(terms) => compile_group(terms, " AND ", "1 = 1", sql, params)?,
        Predicate::Or(terms) => compile_group(terms, " OR ", "1 = 0", sql, params)?,
        Predicate::Not(inner) => {
            sql.push_str("NOT (");
            compile_predicate(inner, sql, params)?;
            sql.push(')');
        }
    }
    Ok(())
}

fn compile_group(
    terms: &[Predicate],
    joiner: &str,
    empty: &str,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> Result<(), QueryError> {
    if terms.is_empty() {
        sql.push_str(empty);
        return Ok(());
    }
    sql.push('(');
    for (index, term) in terms.iter().enumerate() {
        if index > 0 {
            sql.push_str(joiner);
        }
        compile_predicate(term, sql, params)?;
    }
    sql.push(')');
    Ok(())
}

fn push_extract(
    attribute: &str,
    sql: &mut String,
    params: &mut Vec<SqlValue>,
) -> Result<(), QueryError> {
    sql.push_str("json_extract(body, ?)");
    params.push(SqlValue::Text(json_path(attribute)?));
    Ok(())
}

fn json_path(attribute: &str) -> Result<String, QueryError> {
    let well_formed = !attribute.is_empty()
        && attribute.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        });
    if !well_formed {
        return Err(QueryError::InvalidAttribute(attribute.to_string()));
    }
    Ok(format!("$.{attribute}"))
}

#[cfg(test)]
mod tests {
    use super::{compile_fetch, FetchRequest, Predicate, SortSpec, Value};
    use crate::store::QueryError;
    use rusqlite::types::Value as SqlValue;

    #[test]
    fn unfiltered_fetch_uses_natural_order() {
        let compiled = compile_fetch(&FetchRequest::new("Note")).unwrap();
        assert_eq!(
            compiled.sql,
            "SELECT id, body FROM records WHERE entity = ? AND 1 = 1 ORDER BY rowid ASC"
        );
        assert_eq!(compiled.params, vec![SqlValue::Text("Note".to_string())]);
    }

    #[test]
    fn params_follow_placeholder_order() {
        let request = FetchRequest::new("Note")
            .with_predicate(Predicate::eq("title", "A").and(Predicate::gt("rank", 3)))
            .with_sort(SortSpec::new().descending("rank"))
            .with_limit(5)
            .with_offset(2);
        let compiled = compile_fetch(&request).unwrap();

        assert_eq!(compiled.sql.matches('?').count(), compiled.params.len());
        assert!(compiled.sql.contains("ORDER BY json_extract(body, ?) DESC, rowid ASC"));
        assert!(compiled.sql.ends_with("LIMIT ? OFFSET ?"));
        assert_eq!(
            compiled.params,
            vec![
                SqlValue::Text("Note".to_string()),
                SqlValue::Text("$.title".to_string()),
                SqlValue::Text("A".to_string()),
                SqlValue::Text("$.rank".to_string()),
                SqlValue::Integer(3),
                SqlValue::Text("$.rank".to_string()),
                SqlValue::Integer(5),
                SqlValue::Integer(2),
            ]
        );
    }

    #[test]
    fn offset_without_limit_is_unbounded() {
        let compiled = compile_fetch(&FetchRequest::new("Note").with_offset(4)).unwrap();
        assert!(compiled.sql.ends_with("LIMIT -1 OFFSET ?"));
    }

    #[test]
    fn empty_groups_have_identity_semantics() {
        let compiled = compile_fetch(
            &FetchRequest::new("Note").with_predicate(Predicate::And(vec![
                Predicate::And(vec![]),
                Predicate::Or(vec![]),
            ])),
        )
        .unwrap();
        assert!(compiled.sql.contains("(1 = 1 AND 1 = 0)"));

        let none = compile_fetch(
            &FetchRequest::new("Note").with_predicate(Predicate::one_of("rank", Vec::<i64>::new())),
        )
        .unwrap();
        assert!(none.sql.contains("AND 1 = 0"));
    }

    #[test]
    fn malformed_attribute_is_rejected() {
        for attribute in ["", "title'", "meta..rank", "$.title", "a b"] {
            let err = compile_fetch(
                &FetchRequest::new("Note").with_predicate(Predicate::is_null(attribute)),
            )
            .unwrap_err();
            assert!(matches!(err, QueryError::InvalidAttribute(ref attr) if attr == attribute));
        }

        let err = compile_fetch(
            &FetchRequest::new("Note").with_sort(SortSpec::new().ascending("bad-name")),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidAttribute(_)));
    }

    #[test]
    fn non_finite_reals_are_rejected() {
        for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let err = compile_fetch(
                &FetchRequest::new("Book").with_predicate(Predicate::eq("score", value)),
            )
            .unwrap_err();
            assert!(
                matches!(err, QueryError::InvalidValue { ref attribute, .. } if attribute == "score")
            );
        }

        let err = compile_fetch(
            &FetchRequest::new("Book").with_predicate(Predicate::one_of("score", [1.5, f64::NAN])),
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidValue { .. }));

        let compiled = compile_fetch(
            &FetchRequest::new("Book").with_predicate(Predicate::ge("score", 4.25)),
        )
        .unwrap();
        assert_eq!(compiled.params[2], SqlValue::Real(4.25));
    }

    #[test]
    fn values_convert_from_rust_scalars() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(7), Value::Integer(7));
        assert_eq!(Value::from(None::<&str>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn and_or_flatten() {
        let predicate = Predicate::eq("a", 1)
            .and(Predicate::eq("b", 2))
            .and(Predicate::eq("c", 3));
        assert!(matches!(predicate, Predicate::And(ref terms) if terms.len() == 3));

        let predicate = Predicate::eq("a", 1).or(Predicate::eq("b", 2)).or(Predicate::True);
        assert!(matches!(predicate, Predicate::Or(ref terms) if terms.len() == 3));
    }
}
