use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, StringArray, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::DataType;
use log::info;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{Table, Value};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row with column names, one row per sample
/// * `.json`    – `[{ "column": value, ... }, ...]` (records orientation)
/// * `.parquet` – flat columns of strings, integers, floats or bools
///
/// `index_columns` become the levels of the row key and are removed from the
/// data columns. With no index columns, the row position is the only level,
/// named `index`.
pub fn load_table(path: &Path, index_columns: &[&str]) -> Result<Table> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let (columns, records) = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path)?,
        "json" => load_json(path)?,
        "csv" => load_csv(path, b',')?,
        "tsv" | "dat" | "txt" => load_csv(path, b'\t')?,
        other => bail!("Unsupported file extension: .{other}"),
    };
    let table = build_table(columns, records, index_columns)
        .with_context(|| format!("indexing {}", path.display()))?;
    info!(
        "loaded {} rows x {} columns from {}",
        table.len(),
        table.columns().len(),
        path.display()
    );
    Ok(table)
}

/// Split raw records into key and values.
pub(crate) fn build_table(columns: Vec<String>, records: Vec<Vec<Value>>, index_columns: &[&str]) -> Result<Table> {
    let mut key_pos = Vec::with_capacity(index_columns.len());
    for name in index_columns {
        let pos = columns
            .iter()
            .position(|c| c == name)
            .with_context(|| format!("index column '{name}' not found"))?;
        key_pos.push(pos);
    }
    let value_pos: Vec<usize> = (0..columns.len()).filter(|p| !key_pos.contains(p)).collect();

    let mut table = if key_pos.is_empty() {
        Table::new(["index"], value_pos.iter().map(|&p| columns[p].clone()))
    } else {
        Table::new(index_columns.iter().copied(), value_pos.iter().map(|&p| columns[p].clone()))
    };
    for (i, record) in records.into_iter().enumerate() {
        let key = if key_pos.is_empty() {
            vec![Value::from(i)]
        } else {
            key_pos.iter().map(|&p| record[p].clone()).collect()
        };
        let values = value_pos.iter().map(|&p| record[p].clone()).collect();
        table.push_row(key, values)?;
    }
    Ok(table)
}

type Records = (Vec<String>, Vec<Vec<Value>>);

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, the default `df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "run_id": 0, "probe_delay": -100.0, "kerr_rotation": 0.012 },
///   ...
/// ]
/// ```
///
/// Columns are the union of keys over all records; absent keys are null.
fn load_json(path: &Path) -> Result<Records> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut columns: Vec<String> = Vec::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let rows = records
        .iter()
        .filter_map(JsonValue::as_object)
        .map(|obj| {
            columns
                .iter()
                .map(|c| obj.get(c).map_or(Value::Null, json_to_value))
                .collect()
        })
        .collect();
    Ok((columns, rows))
}

fn json_to_value(val: &JsonValue) -> Value {
    match val {
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, then one record per row.
/// Cell types are guessed per cell (int → float → bool → string).
fn load_csv(path: &Path, delimiter: u8) -> Result<Records> {
    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .context("opening CSV")?;
    read_csv_records(reader)
}

/// Read a CSV body whose first record is the header.
pub(crate) fn read_csv_records<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Records> {
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        if record.len() != headers.len() {
            bail!(
                "CSV row {row_no}: {} fields but {} columns",
                record.len(),
                headers.len()
            );
        }
        rows.push(record.iter().map(Value::guess).collect());
    }
    Ok((headers, rows))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with flat scalar columns.
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`), and by [`super::writer::write_parquet`].
fn load_parquet(path: &Path) -> Result<Records> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for row in 0..batch.num_rows() {
            let record = (0..batch.num_columns())
                .map(|c| extract_value(batch.column(c), row))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Row {row}"))?;
            rows.push(record);
        }
    }
    Ok((columns, rows))
}

// -- Parquet / Arrow helpers --

fn downcast<'a, T: 'static>(col: &'a Arc<dyn Array>) -> Result<&'a T> {
    col.as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("column array does not match its type {:?}", col.data_type()))
}

/// Extract a single value from an Arrow column at a given row.
fn extract_value(col: &Arc<dyn Array>, row: usize) -> Result<Value> {
    if col.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match col.data_type() {
        DataType::Utf8 => Value::String(downcast::<StringArray>(col)?.value(row).to_string()),
        DataType::LargeUtf8 => Value::String(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => Value::Integer(downcast::<Int32Array>(col)?.value(row) as i64),
        DataType::Int64 => Value::Integer(downcast::<Int64Array>(col)?.value(row)),
        DataType::UInt32 => Value::Integer(downcast::<UInt32Array>(col)?.value(row) as i64),
        DataType::UInt64 => {
            let v = downcast::<UInt64Array>(col)?.value(row);
            i64::try_from(v).map_or(Value::Float(v as f64), Value::Integer)
        }
        DataType::Float32 => Value::Float(downcast::<Float32Array>(col)?.value(row) as f64),
        DataType::Float64 => Value::Float(downcast::<Float64Array>(col)?.value(row)),
        DataType::Boolean => Value::Bool(downcast::<BooleanArray>(col)?.value(row)),
        other => bail!("unsupported parquet column type {other:?}"),
    };
    Ok(value)
}
