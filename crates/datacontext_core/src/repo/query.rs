//! Typed predicates and sort keys compiled to SQL over JSON record bodies.
//!
//! # Responsibility
//! - Let callers filter and order records without writing SQL.
//! - Reject malformed field paths and operands before touching the store.
//!
//! # Invariants
//! - Field paths and operands are always bound as parameters, never spliced
//!   into SQL text.
//! - Compiled fragments bind parameters in the order they appear in the text.

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value;
use serde_json::Value as JsonValue;
use std::error::Error;
use std::fmt::{Display, Formatter};

static FIELD_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("valid field path regex")
});

const FIELD_SQL: &str = "json_extract(body, ?)";

pub type QueryResult<T> = Result<T, QueryError>;

/// A predicate or sort key that cannot be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    InvalidField(String),
    InvalidOperand { field: String, reason: String },
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidField(field) => write!(f, "invalid field path `{field}`"),
            Self::InvalidOperand { field, reason } => {
                write!(f, "invalid operand for `{field}`: {reason}")
            }
        }
    }
}

impl Error for QueryError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

/// Boolean filter evaluated per record.
///
/// Fields are dotted paths into the serialized record (`name`,
/// `address.city`). `Like` follows SQLite semantics: `%`/`_` wildcards and
/// ASCII case-insensitive matching.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    Compare {
        field: String,
        op: CompareOp,
        value: JsonValue,
    },
    IsNull(String),
    Like {
        field: String,
        pattern: String,
    },
    In {
        field: String,
        values: Vec<JsonValue>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Le, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::compare(field, CompareOp::Ge, value)
    }

    pub fn compare(field: impl Into<String>, op: CompareOp, value: impl Into<JsonValue>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::IsNull(field.into())
    }

    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// Substring match; `text` is matched literally.
    pub fn contains(field: impl Into<String>, text: &str) -> Self {
        Self::like(field, format!("%{}%", escape_like(text)))
    }

    /// Prefix match; `prefix` is matched literally.
    pub fn starts_with(field: impl Into<String>, prefix: &str) -> Self {
        Self::like(field, format!("{}%", escape_like(prefix)))
    }

    pub fn in_list<V: Into<JsonValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Self::And(mut parts) => {
                parts.push(other);
                Self::And(parts)
            }
            current => Self::And(vec![current, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Self::Or(mut parts) => {
                parts.push(other);
                Self::Or(parts)
            }
            current => Self::Or(vec![current, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    pub(crate) fn compile(&self) -> QueryResult<SqlFragment> {
        let mut fragment = SqlFragment::default();
        self.write_sql(&mut fragment)?;
        Ok(fragment)
    }

    fn write_sql(&self, out: &mut SqlFragment) -> QueryResult<()> {
        match self {
            Self::All => out.sql.push_str("1 = 1"),
            Self::Compare { field, op, value } => {
                let path = field_path(field)?;
                let operand = scalar_to_sql(field, value)?;
                out.sql.push_str(FIELD_SQL);
                out.params.push(Value::Text(path));
                match (op, operand) {
                    (CompareOp::Eq, Value::Null) => out.sql.push_str(" IS NULL"),
                    (CompareOp::Ne, Value::Null) => out.sql.push_str(" IS NOT NULL"),
                    (_, Value::Null) => {
                        return Err(QueryError::InvalidOperand {
                            field: field.clone(),
                            reason: "null can only be compared for equality".to_string(),
                        });
                    }
                    (op, operand) => {
                        out.sql.push(' ');
                        out.sql.push_str(op.sql());
                        out.sql.push_str(" ?");
                        out.params.push(operand);
                    }
                }
            }
            Self::IsNull(field) => {
                out.sql.push_str(FIELD_SQL);
                out.sql.push_str(" IS NULL");
                out.params.push(Value::Text(field_path(field)?));
            }
            Self::Like { field, pattern } => {
                out.sql.push_str(FIELD_SQL);
                out.sql.push_str(" LIKE ? ESCAPE '\\'");
                out.params.push(Value::Text(field_path(field)?));
                out.params.push(Value::Text(pattern.clone()));
            }
            Self::In { field, values } => {
                let path = field_path(field)?;
                if values.is_empty() {
                    out.sql.push_str("0 = 1");
                    return Ok(());
                }
                out.sql.push_str(FIELD_SQL);
                out.params.push(Value::Text(path));
                out.sql.push_str(" IN (");
                for (index, value) in values.iter().enumerate() {
                    let operand = scalar_to_sql(field, value)?;
                    if operand == Value::Null {
                        return Err(QueryError::InvalidOperand {
                            field: field.clone(),
                            reason: "null is not allowed in an IN list".to_string(),
                        });
                    }
                    if index > 0 {
                        out.sql.push_str(", ");
                    }
                    out.sql.push('?');
                    out.params.push(operand);
                }
                out.sql.push(')');
            }
            Self::And(parts) => write_joined(out, parts, " AND ", "1 = 1")?,
            Self::Or(parts) => write_joined(out, parts, " OR ", "0 = 1")?,
            Self::Not(inner) => {
                out.sql.push_str("NOT (");
                inner.write_sql(out)?;
                out.sql.push(')');
            }
        }
        Ok(())
    }
}

fn write_joined(
    out: &mut SqlFragment,
    parts: &[Predicate],
    separator: &str,
    empty: &str,
) -> QueryResult<()> {
    if parts.is_empty() {
        out.sql.push_str(empty);
        return Ok(());
    }
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            out.sql.push_str(separator);
        }
        out.sql.push('(');
        part.write_sql(out)?;
        out.sql.push(')');
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One ordering criterion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Descending,
        }
    }
}

/// Filter, ordering and paging for one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub predicate: Option<Predicate>,
    pub sort_by: Vec<SortKey>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort_by.push(key);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Appends `WHERE`-clause conditions, `ORDER BY` and paging to a
    /// `SELECT … FROM records WHERE collection = ?` prefix.
    pub(crate) fn append_sql(&self, out: &mut SqlFragment) -> QueryResult<()> {
        if let Some(predicate) = &self.predicate {
            out.sql.push_str(" AND (");
            predicate.write_sql(out)?;
            out.sql.push(')');
        }

        out.sql.push_str(" ORDER BY ");
        for key in &self.sort_by {
            out.sql.push_str(FIELD_SQL);
            out.sql.push_str(match key.order {
                SortOrder::Ascending => " ASC, ",
                SortOrder::Descending => " DESC, ",
            });
            out.params.push(Value::Text(field_path(&key.field)?));
        }
        out.sql.push_str("seq ASC");

        if let Some(limit) = self.limit {
            out.sql.push_str(" LIMIT ?");
            out.params.push(Value::Integer(i64::from(limit)));
            if self.offset > 0 {
                out.sql.push_str(" OFFSET ?");
                out.params.push(Value::Integer(i64::from(self.offset)));
            }
        } else if self.offset > 0 {
            out.sql.push_str(" LIMIT -1 OFFSET ?");
            out.params.push(Value::Integer(i64::from(self.offset)));
        }
        Ok(())
    }
}

/// SQL text with its positional parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SqlFragment {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Converts a dotted field name into a JSON path (`a.b` -> `$.a.b`).
pub(crate) fn field_path(field: &str) -> QueryResult<String> {
    if !FIELD_PATH_RE.is_match(field) {
        return Err(QueryError::InvalidField(field.to_string()));
    }
    Ok(format!("$.{field}"))
}

fn scalar_to_sql(field: &str, value: &JsonValue) -> QueryResult<Value> {
    match value {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(flag) => Ok(Value::Integer(i64::from(*flag))),
        JsonValue::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Ok(Value::Integer(integer))
            } else if let Some(real) = number.as_f64() {
                Ok(Value::Real(real))
            } else {
                Err(QueryError::InvalidOperand {
                    field: field.to_string(),
                    reason: format!("number `{number}` is out of range"),
                })
            }
        }
        JsonValue::String(text) => Ok(Value::Text(text.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(QueryError::InvalidOperand {
            field: field.to_string(),
            reason: "only scalar values can be compared".to_string(),
        }),
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
