//! Export tables and matrices. Index levels are written as leading columns
//! so that [`super::loader::load_table`] can restore them.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::info;
use nalgebra::DMatrix;
use parquet::arrow::ArrowWriter;

use super::model::{Table, Value};

/// Text form of a cell. Floats keep their decimal point so they read back
/// as floats.
fn csv_cell(value: &Value) -> String {
    match value {
        Value::Float(v) => format!("{v:?}"),
        other => other.to_string(),
    }
}

fn header(table: &Table) -> Vec<String> {
    table
        .index_names()
        .iter()
        .chain(table.columns())
        .cloned()
        .collect()
}

/// Write a table, choosing the format from the extension (`csv` or
/// `parquet`).
pub fn write_table(table: &Table, path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "parquet" | "pq" => write_parquet(table, path),
        "csv" => write_csv(table, path),
        other => bail!("Unsupported output extension: .{other}"),
    }
}

/// Write `table` as CSV with one header row.
pub fn write_csv(table: &Table, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(header(table)).context("writing CSV header")?;
    for (i, row) in table.rows().iter().enumerate() {
        writer
            .write_record(row.key.iter().chain(&row.values).map(csv_cell))
            .with_context(|| format!("writing CSV row {i}"))?;
    }
    writer.flush().context("flushing CSV")?;
    info!("wrote {} rows to {}", table.len(), path.display());
    Ok(())
}

/// Write a matrix as headerless CSV, one matrix row per line.
pub fn write_matrix_csv(matrix: &DMatrix<f64>, path: &Path) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for i in 0..matrix.nrows() {
        writer
            .write_record(matrix.row(i).iter().map(|v| format!("{v:?}")))
            .with_context(|| format!("writing matrix row {i}"))?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

/// Arrow array for one column. The type is the narrowest that holds every
/// non-null cell: Int64, then Float64, then Boolean, else Utf8.
fn column_array<'a>(cells: impl Iterator<Item = &'a Value> + Clone) -> (DataType, ArrayRef) {
    let non_null = cells.clone().filter(|v| !v.is_null());
    let all_int = non_null.clone().all(|v| matches!(v, Value::Integer(_)));
    let all_num = non_null.clone().all(|v| matches!(v, Value::Integer(_) | Value::Float(_)));
    let all_bool = non_null.clone().all(|v| matches!(v, Value::Bool(_)));
    let any = non_null.clone().next().is_some();

    if any && all_int {
        let values: Vec<Option<i64>> = cells
            .map(|v| match v {
                Value::Integer(i) => Some(*i),
                _ => None,
            })
            .collect();
        (DataType::Int64, Arc::new(Int64Array::from(values)))
    } else if any && all_num {
        let values: Vec<Option<f64>> = cells.map(Value::as_f64).collect();
        (DataType::Float64, Arc::new(Float64Array::from(values)))
    } else if any && all_bool {
        let values: Vec<Option<bool>> = cells
            .map(|v| match v {
                Value::Bool(b) => Some(*b),
                _ => None,
            })
            .collect();
        (DataType::Boolean, Arc::new(BooleanArray::from(values)))
    } else {
        let values: Vec<Option<String>> = cells
            .map(|v| if v.is_null() { None } else { Some(v.to_string()) })
            .collect();
        (DataType::Utf8, Arc::new(StringArray::from(values)))
    }
}

/// Write `table` as a single-batch Parquet file.
pub fn write_parquet(table: &Table, path: &Path) -> Result<()> {
    let nlevels = table.nlevels();
    let mut fields = Vec::new();
    let mut arrays = Vec::new();
    for (c, name) in header(table).into_iter().enumerate() {
        let (data_type, array) = if c < nlevels {
            column_array(table.rows().iter().map(move |r| &r.key[c]))
        } else {
            column_array(table.rows().iter().map(move |r| &r.values[c - nlevels]))
        };
        fields.push(Field::new(name, data_type, true));
        arrays.push(array);
    }
    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays).context("Failed to create RecordBatch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("Failed to create writer")?;
    writer.write(&batch).context("Failed to write batch")?;
    writer.close().context("Failed to close writer")?;
    info!("wrote {} rows to {}", table.len(), path.display());
    Ok(())
}
