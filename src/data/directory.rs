//! Bulk import of instrument files from a directory tree.
//!
//! Every matching file yields one [`ImportedFile`]: its metadata (path
//! tokens plus header lines) and its CSV body as a table indexed by sample
//! row. [`concat_runs`] stacks the files into one multi-level table.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};

use super::loader::{build_table, read_csv_records};
use super::metadata::{analyze_scan_filepath, merge_header, Metadata};
use super::model::{Row, Table, Value};
use crate::config::{ImportConfig, RunCriteria};

/// Metadata tag holding the run number of a file.
pub const RUN_ID: &str = "Run ID";
/// Column holding the position of a file among the imported files.
pub const FILE_INDEX: &str = "file_index";

/// One imported file.
#[derive(Debug, Clone)]
pub struct ImportedFile {
    pub path: PathBuf,
    pub metadata: Metadata,
    /// Body rows, indexed by 0-based sample position.
    pub table: Table,
}

/// Files under `dir` whose name contains `filename_key`, in walk order:
/// a directory's own files (sorted) before its subdirectories (sorted).
fn matching_files(dir: &Path, filename_key: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("listing {}", dir.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("listing {}", dir.display()))?;
    entries.sort();
    let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) = entries.into_iter().partition(|p| p.is_dir());
    out.extend(files.into_iter().filter(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.contains(filename_key))
    }));
    for sub in dirs {
        matching_files(&sub, filename_key, out)?;
    }
    Ok(())
}

/// Split a file into header text and a parsed body.
fn read_instrument_file(path: &Path, config: &ImportConfig) -> Result<(String, Vec<String>, Vec<Vec<Value>>)> {
    let file = std::fs::File::open(path).context("opening file")?;
    let mut reader = std::io::BufReader::new(file);
    let mut header = String::new();
    for n in 0..config.header_lines {
        let read = reader.read_line(&mut header).context("reading header")?;
        if read == 0 {
            bail!(
                "tried to skip {} header lines, but file ended after {n}",
                config.header_lines
            );
        }
    }
    let mut delimiter = [0u8; 4];
    let delimiter = config.delimiter.encode_utf8(&mut delimiter).as_bytes();
    if delimiter.len() != 1 {
        bail!("delimiter '{}' is not a single byte", config.delimiter);
    }
    let body = csv::ReaderBuilder::new()
        .delimiter(delimiter[0])
        .trim(csv::Trim::All)
        .from_reader(reader);
    let (columns, records) = read_csv_records(body)?;
    if records.is_empty() {
        bail!("no data found");
    }
    Ok((header, columns, records))
}

/// Import every matching file below `dir`.
///
/// Files that cannot be parsed, are shorter than the header or hold no data
/// rows are skipped with a warning. Files rejected by a metadata filter are
/// skipped silently and do not consume a `file_index`.
pub fn import_directory(dir: &Path, config: &ImportConfig) -> Result<Vec<ImportedFile>> {
    let mut paths = Vec::new();
    matching_files(dir, &config.filename_key, &mut paths)?;
    info!("import_directory: {} candidate files under {}", paths.len(), dir.display());

    let mut last_dir: Option<PathBuf> = None;
    let mut run_counter: i64 = -1;
    let mut imported = Vec::new();
    for path in paths {
        let (header, columns, records) = match read_instrument_file(&path, config) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("skipping {}: {e:#}", path.display());
                continue;
            }
        };

        let mut metadata = analyze_scan_filepath(&path.to_string_lossy(), &config.keywords);
        merge_header(&header, &mut metadata);
        let run_id = match config.run_criteria {
            RunCriteria::Same => 0,
            RunCriteria::Directory => {
                let parent = path.parent().map(Path::to_path_buf);
                if parent != last_dir {
                    last_dir = parent;
                    run_counter += 1;
                }
                run_counter
            }
        };
        metadata.insert(RUN_ID.to_string(), Value::Integer(run_id));

        if !config.filters.iter().all(|f| f.accepts(&metadata)) {
            debug!("filtered out {}", path.display());
            continue;
        }

        let mut table = build_table(columns, records, &[])
            .with_context(|| format!("building table for {}", path.display()))?
            .with_constant_column(FILE_INDEX, Value::from(imported.len()));
        for mapping in &config.tag_to_column {
            if let Some(value) = metadata.get(&mapping.tag) {
                table = table.with_constant_column(&mapping.column, value.clone());
            }
        }
        imported.push(ImportedFile { path, metadata, table });
    }
    info!("import_directory: imported {} files", imported.len());
    Ok(imported)
}

/// Stack imported files into one table.
///
/// Each entry of `outer_levels` names a column (or, failing that, a
/// metadata tag) whose value becomes an index level; the file's sample row
/// is the innermost level. Columns are the union over all files.
pub fn concat_runs(files: &[ImportedFile], outer_levels: &[&str]) -> Result<Table> {
    let mut index_names: Vec<String> = outer_levels.iter().map(|s| s.to_string()).collect();
    index_names.push("index".to_string());

    let mut tables = Vec::with_capacity(files.len());
    for file in files {
        let table = &file.table;
        let mut rows = Vec::with_capacity(table.len());
        for row in table.rows() {
            let mut key = Vec::with_capacity(index_names.len());
            for level in outer_levels {
                let value = match table.columns().iter().position(|c| c == level) {
                    Some(p) => row.values[p].clone(),
                    None => file
                        .metadata
                        .get(*level)
                        .cloned()
                        .with_context(|| format!("{}: no column or tag '{level}'", file.path.display()))?,
                };
                key.push(value);
            }
            key.extend(row.key.last().cloned());
            rows.push(Row {
                key,
                values: row.values.clone(),
            });
        }
        tables.push(Table::from_rows(index_names.clone(), table.columns().to_vec(), rows)?);
    }
    Ok(Table::concat_union(&tables)?)
}
