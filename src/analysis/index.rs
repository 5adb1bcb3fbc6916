//! Index normalization: reduce any hierarchical row key to exactly two
//! levels (dataset, sample).

use log::debug;

use crate::data::model::{Row, Table, Value};
use crate::error::{EdaError, Result};

/// Separator between the literals of collapsed index levels.
pub const COMPOSITE_SEPARATOR: &str = ", ";

/// A table with a 2-level key plus the names of the levels folded into the
/// outer key.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub table: Table,
    pub dropped_levels: Vec<String>,
}

/// Bring `table` to a 2-level (dataset, sample) key.
///
/// * 2 levels: returned unchanged.
/// * more than 2: every level but the last is folded into one composite
///   string of the values' literals joined by [`COMPOSITE_SEPARATOR`].
///   Strings are quoted, so distinct tuples never produce the same key.
/// * 1 level: a constant `""` outer level is prepended.
pub fn normalize(table: &Table) -> Result<Normalized> {
    let nlevels = table.nlevels();
    match nlevels {
        0 => Err(EdaError::UnsupportedShape { nlevels }),
        1 => {
            let index_names = vec![String::new(), table.index_names()[0].clone()];
            let rows = table
                .rows()
                .iter()
                .map(|r| Row {
                    key: vec![Value::String(String::new()), r.key[0].clone()],
                    values: r.values.clone(),
                })
                .collect();
            let table = Table::from_rows(index_names, table.columns().to_vec(), rows)?;
            Ok(Normalized {
                table,
                dropped_levels: Vec::new(),
            })
        }
        2 => Ok(Normalized {
            table: table.clone(),
            dropped_levels: Vec::new(),
        }),
        _ => {
            let dropped_levels: Vec<String> = table.index_names()[..nlevels - 1].to_vec();
            debug!("normalize: folding levels {dropped_levels:?} into one outer key");
            let index_names = vec![
                dropped_levels.join(","),
                table.index_names()[nlevels - 1].clone(),
            ];
            let rows = table
                .rows()
                .iter()
                .map(|r| Row {
                    key: vec![
                        Value::String(composite_key(&r.key[..nlevels - 1])),
                        r.key[nlevels - 1].clone(),
                    ],
                    values: r.values.clone(),
                })
                .collect();
            let table = Table::from_rows(index_names, table.columns().to_vec(), rows)?;
            Ok(Normalized {
                table,
                dropped_levels,
            })
        }
    }
}

/// Composite string for a tuple of key components.
pub fn composite_key(parts: &[Value]) -> String {
    parts
        .iter()
        .map(Value::literal)
        .collect::<Vec<_>>()
        .join(COMPOSITE_SEPARATOR)
}
