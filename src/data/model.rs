use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EdaError, Result};

// ---------------------------------------------------------------------------
// Value – a single cell (or index-level entry) of a table
// ---------------------------------------------------------------------------

/// A dynamically-typed scalar mirroring the dtypes found in instrument files
/// and parsed metadata.
///
/// Grouping and pivoting put `Value`s in `BTreeMap` / `BTreeSet`, so `Value`
/// must be `Ord`, and equality is defined by that ordering. Integers and
/// floats share one numeric rank and compare by magnitude; an integer sorts
/// before a float of equal magnitude. Floats group the way pandas groups
/// them: `-0.0` equals `0.0`, and all NaNs are one key sorting after every
/// other number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

fn cmp_f64(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        fn rank(v: &Value) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) | Float(_) => 2,
                String(_) => 3,
            }
        }
        let ra = rank(self);
        let rb = rank(other);
        if ra != rb {
            return ra.cmp(&rb);
        }
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => cmp_f64(*a, *b),
            (Integer(a), Float(b)) => cmp_f64(*a as f64, *b).then(Ordering::Less),
            (Float(a), Integer(b)) => cmp_f64(*a, *b as f64).then(Ordering::Greater),
            (String(a), String(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => Ok(()),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl Value {
    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Numeric view used when filling matrices; non-numeric cells become NaN.
    pub fn to_f64_or_nan(&self) -> f64 {
        self.as_f64().unwrap_or(f64::NAN)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Unambiguous literal form: strings are quoted and escaped, floats
    /// always keep a decimal point. Distinct values never share a literal.
    pub fn literal(&self) -> String {
        match self {
            Value::String(s) => format!("{s:?}"),
            Value::Integer(i) => i.to_string(),
            Value::Float(v) => format!("{v:?}"),
            Value::Bool(b) => if *b { "True" } else { "False" }.to_string(),
            Value::Null => "None".to_string(),
        }
    }

    /// Guess the type of a raw text cell (int → float → bool → string).
    pub fn guess(s: &str) -> Value {
        let s = s.trim();
        if s.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return Value::Float(f);
        }
        match s {
            "true" | "True" => Value::Bool(true),
            "false" | "False" => Value::Bool(false),
            _ => Value::String(s.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Row – one measurement
// ---------------------------------------------------------------------------

/// A single row: hierarchical key plus one value per table column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// One entry per index level, outermost first.
    pub key: Vec<Value>,
    /// Aligned with [`Table::columns`].
    pub values: Vec<Value>,
}

// ---------------------------------------------------------------------------
// Table – rows sharing one column set and one index layout
// ---------------------------------------------------------------------------

/// An ordered collection of rows with a hierarchical row key.
///
/// The last index level is the sample position within a dataset; after
/// normalization the second-to-last level is the dataset identifier.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    index_names: Vec<String>,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// Empty table with the given index level names and column names.
    pub fn new<I, C>(index_names: I, columns: C) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Table {
            index_names: index_names.into_iter().map(Into::into).collect(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from parts, checking every row against the layout.
    pub fn from_rows(index_names: Vec<String>, columns: Vec<String>, rows: Vec<Row>) -> Result<Self> {
        let mut table = Table {
            index_names,
            columns,
            rows: Vec::with_capacity(rows.len()),
        };
        for row in rows {
            table.push_row(row.key, row.values)?;
        }
        Ok(table)
    }

    /// Append a row; key and value lengths must match the layout.
    pub fn push_row(&mut self, key: Vec<Value>, values: Vec<Value>) -> Result<()> {
        if key.len() != self.index_names.len() {
            return Err(EdaError::ShapeMismatch {
                what: "row key",
                expected: self.index_names.len(),
                found: key.len(),
            });
        }
        if values.len() != self.columns.len() {
            return Err(EdaError::ShapeMismatch {
                what: "row values",
                expected: self.columns.len(),
                found: values.len(),
            });
        }
        self.rows.push(Row { key, values });
        Ok(())
    }

    pub fn index_names(&self) -> &[String] {
        &self.index_names
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Number of index levels.
    pub fn nlevels(&self) -> usize {
        self.index_names.len()
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, or `ColumnNotFound`.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| EdaError::ColumnNotFound(name.to_string()))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| &r.values[idx]).collect())
    }

    /// Numeric view of one column; non-numeric cells become NaN.
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|r| r.values[idx].to_f64_or_nan()).collect())
    }

    /// Returns a copy with an extra column holding `value` on every row
    /// (replacing the column if it already exists).
    pub fn with_constant_column(&self, name: &str, value: Value) -> Table {
        let mut out = self.clone();
        match out.columns.iter().position(|c| c == name) {
            Some(idx) => out.rows.iter_mut().for_each(|r| r.values[idx] = value.clone()),
            None => {
                out.columns.push(name.to_string());
                out.rows.iter_mut().for_each(|r| r.values.push(value.clone()));
            }
        }
        out
    }

    /// Returns a copy whose index is built from the named columns.
    /// The columns stay in the table; any existing index levels are dropped.
    pub fn with_index_columns(&self, names: &[&str]) -> Result<Table> {
        let positions = names
            .iter()
            .map(|n| self.column_index(n))
            .collect::<Result<Vec<_>>>()?;
        let rows = self
            .rows
            .iter()
            .map(|r| Row {
                key: positions.iter().map(|&p| r.values[p].clone()).collect(),
                values: r.values.clone(),
            })
            .collect();
        Ok(Table {
            index_names: names.iter().map(|n| n.to_string()).collect(),
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Rows at the given positions, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Table {
        Table {
            index_names: self.index_names.clone(),
            columns: self.columns.clone(),
            rows: indices.iter().filter_map(|&i| self.rows.get(i).cloned()).collect(),
        }
    }

    /// Rows grouped by the key level at `level`, groups in sorted key order,
    /// rows within a group in source order.
    pub fn group_by_level(&self, level: usize) -> BTreeMap<Value, Vec<usize>> {
        let mut groups: BTreeMap<Value, Vec<usize>> = BTreeMap::new();
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(k) = row.key.get(level) {
                groups.entry(k.clone()).or_default().push(i);
            }
        }
        groups
    }

    /// For each column the sorted set of unique values.
    pub fn unique_values(&self) -> BTreeMap<String, BTreeSet<Value>> {
        let mut unique: BTreeMap<String, BTreeSet<Value>> = BTreeMap::new();
        for (idx, col) in self.columns.iter().enumerate() {
            let set = unique.entry(col.clone()).or_default();
            for row in &self.rows {
                set.insert(row.values[idx].clone());
            }
        }
        unique
    }

    /// Stack tables sharing one layout into a new table.
    pub fn concat(tables: &[Table]) -> Result<Table> {
        let Some(first) = tables.first() else {
            return Ok(Table::default());
        };
        let mut out = Table::new(first.index_names.clone(), first.columns.clone());
        for t in tables {
            if t.index_names != first.index_names || t.columns != first.columns {
                return Err(EdaError::ShapeMismatch {
                    what: "concatenated table columns",
                    expected: first.columns.len(),
                    found: t.columns.len(),
                });
            }
            out.rows.extend(t.rows.iter().cloned());
        }
        Ok(out)
    }

    /// Like [`Table::concat`], but columns may differ: the result carries the
    /// union of columns in first-seen order and missing cells are null.
    pub fn concat_union(tables: &[Table]) -> Result<Table> {
        let Some(first) = tables.first() else {
            return Ok(Table::default());
        };
        let mut columns: Vec<String> = Vec::new();
        for t in tables {
            if t.index_names.len() != first.index_names.len() {
                return Err(EdaError::ShapeMismatch {
                    what: "index levels",
                    expected: first.index_names.len(),
                    found: t.index_names.len(),
                });
            }
            for c in &t.columns {
                if !columns.contains(c) {
                    columns.push(c.clone());
                }
            }
        }
        let mut out = Table::new(first.index_names.clone(), columns.clone());
        for t in tables {
            let positions: Vec<Option<usize>> = columns
                .iter()
                .map(|c| t.columns.iter().position(|tc| tc == c))
                .collect();
            for row in &t.rows {
                let values = positions
                    .iter()
                    .map(|p| p.map(|i| row.values[i].clone()).unwrap_or(Value::Null))
                    .collect();
                out.rows.push(Row {
                    key: row.key.clone(),
                    values,
                });
            }
        }
        Ok(out)
    }
}
