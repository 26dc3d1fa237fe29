use model::{core::value::Value, partition::context::OffsetColumn};
use std::{cmp::Ordering, fmt};

/// Predicate over offset columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Gt(String, Value),
    Eq(String, Value),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

impl Condition {
    /// `(c1, c2, ..) > (v1, v2, ..)` compared lexicographically:
    /// `c1 > v1 OR (c1 = v1 AND (c2 > v2 OR (c2 = v2 AND ...)))`.
    pub fn after(columns: &[OffsetColumn], values: &[Value]) -> Option<Condition> {
        let (col, rest_cols) = columns.split_first()?;
        let (val, rest_vals) = values.split_first()?;

        let gt = Condition::Gt(col.name.clone(), val.clone());
        match Condition::after(rest_cols, rest_vals) {
            None => Some(gt),
            Some(rest) => Some(Condition::Or(
                Box::new(gt),
                Box::new(Condition::And(
                    Box::new(Condition::Eq(col.name.clone(), val.clone())),
                    Box::new(rest),
                )),
            )),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Gt(col, v) => write!(f, "{} > {}", quote_ident(col), literal(v)),
            Condition::Eq(col, v) => write!(f, "{} = {}", quote_ident(col), literal(v)),
            Condition::And(l, r) => write!(f, "({l} AND {r})"),
            Condition::Or(l, r) => write!(f, "({l} OR {r})"),
        }
    }
}

/// An offset-bounded read of one partition: rows strictly after
/// `lower_bound`, ordered by the offset columns.
#[derive(Debug, Clone, PartialEq)]
pub struct OffsetQuery {
    pub partition: String,
    pub columns: Vec<OffsetColumn>,
    /// Exclusive lower bound, one value per offset column. `None` reads from the start.
    pub lower_bound: Option<Vec<Value>>,
    pub limit: Option<usize>,
}

impl OffsetQuery {
    pub fn new(partition: impl Into<String>, columns: Vec<OffsetColumn>) -> Self {
        OffsetQuery {
            partition: partition.into(),
            columns,
            lower_bound: None,
            limit: None,
        }
    }

    pub fn after(mut self, lower_bound: Option<Vec<Value>>) -> Self {
        self.lower_bound = lower_bound;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn condition(&self) -> Option<Condition> {
        self.lower_bound
            .as_ref()
            .and_then(|bound| Condition::after(&self.columns, bound))
    }

    /// Whether a row with the given offset key lies after the lower bound.
    pub fn admits(&self, key: &[Value]) -> bool {
        match &self.lower_bound {
            None => true,
            Some(bound) => compare_keys(key, bound) == Some(Ordering::Greater),
        }
    }

    /// SQL form of the read, for sources that speak SQL and for logging.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("SELECT * FROM {}", quote_ident(&self.partition));

        if let Some(cond) = self.condition() {
            sql.push_str(&format!(" WHERE {cond}"));
        }

        if !self.columns.is_empty() {
            let order = self
                .columns
                .iter()
                .map(|c| format!("{} ASC", quote_ident(&c.name)))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" ORDER BY {order}"));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        sql
    }
}

/// Lexicographic comparison of two offset keys; `None` if any pair is incomparable.
pub fn compare_keys(left: &[Value], right: &[Value]) -> Option<Ordering> {
    for (l, r) in left.iter().zip(right) {
        match l.offset_cmp(r)? {
            Ordering::Equal => continue,
            other => return Some(other),
        }
    }
    Some(left.len().cmp(&right.len()))
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn literal(value: &Value) -> String {
    match value {
        Value::Int(_) | Value::Uint(_) | Value::Float(_) => value.to_string(),
        Value::Null => "NULL".to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}
