use std::collections::{BTreeMap, BTreeSet};

use super::model::{Row, Table, Value};

// ---------------------------------------------------------------------------
// Filter predicate: which unique values are selected per column
// ---------------------------------------------------------------------------

/// Per-column selection state: maps column_name → set of selected values.
/// A column absent from the state is not filtered; an empty set selects
/// nothing.
pub type FilterState = BTreeMap<String, BTreeSet<Value>>;

/// Initialise a [`FilterState`] with all values selected (i.e., keep everything).
pub fn init_filter_state(table: &Table) -> FilterState {
    table.unique_values()
}

/// Where a filtered name lives in a row: a data column or an index level.
enum Source {
    Column(usize),
    Level(usize),
    Missing,
}

impl Source {
    fn get<'a>(&self, row: &'a Row) -> Option<&'a Value> {
        match self {
            Source::Column(i) => row.values.get(*i),
            Source::Level(i) => row.key.get(*i),
            Source::Missing => None,
        }
    }
}

/// Return indices of rows that pass all active filters.
///
/// A row passes a column filter when:
/// * The column is not present in `filters` → passes (no constraint)
/// * The filter set for that column is empty → nothing selected → fails
/// * The row's value for that column is in the selected set → passes
///
/// Names that are not columns are looked up among the index levels; a name
/// that is neither only passes rows if `Null` is selected.
pub fn filtered_indices(table: &Table, filters: &FilterState) -> Vec<usize> {
    let active: Vec<(Source, &BTreeSet<Value>)> = filters
        .iter()
        .map(|(name, selected)| {
            let source = if let Some(i) = table.columns().iter().position(|c| c == name) {
                Source::Column(i)
            } else if let Some(i) = table.index_names().iter().position(|c| c == name) {
                Source::Level(i)
            } else {
                Source::Missing
            };
            (source, selected)
        })
        .collect();

    table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            active.iter().all(|(source, selected)| match source.get(row) {
                Some(val) => selected.contains(val),
                None => selected.contains(&Value::Null),
            })
        })
        .map(|(i, _)| i)
        .collect()
}

/// New table holding only the rows that pass `filters`.
pub fn filter_table(table: &Table, filters: &FilterState) -> Table {
    table.select_rows(&filtered_indices(table, filters))
}
