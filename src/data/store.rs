//! SQLite archive of imported files.
//!
//! Two tables: `raw_data` holds the measurement rows of every file,
//! `metadata` holds one `(file_id, key, value)` triple per metadata entry.
//! A file is identified by a stable hash of its name and scan start time.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};

use super::metadata::Metadata;
use super::model::{Table, Value};

/// Measurement columns of the `raw_data` table, after `file_id, file_row`.
pub const RAW_DATA_COLUMNS: &[&str] = &[
    "scancoord",
    "lockin2x",
    "lockin1x",
    "lockin2r",
    "lockin1r",
    "laserpower",
    "cwetalon",
    "lockin3x",
    "lockin3r",
    "lockin4x",
    "lockin4r",
    "lockin5x",
    "lockin5r",
    "lasercomponent1",
    "lasercomponent2",
    "temperature",
    "labtime",
];

/// What to do when a file's raw data is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Replace the stored rows if their count differs.
    Yes,
    /// Always replace the stored rows.
    Force,
    /// Keep the stored rows; log a warning if their count differs.
    #[default]
    Warn,
}

/// What to do when a file's metadata is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetadataOverwrite {
    /// Add new keys, silently keep conflicting values.
    #[serde(rename = "add-only")]
    AddOnly,
    /// Add new keys and overwrite conflicting values.
    Yes,
    /// Erase everything stored for the file and rewrite it.
    Force,
    /// Add new keys, keep conflicting values with a warning.
    #[default]
    Warn,
    /// Warn about conflicts and change nothing if there are any.
    JustWarn,
}

impl FromStr for OverwritePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "yes" => Ok(Self::Yes),
            "force" => Ok(Self::Force),
            "warn" => Ok(Self::Warn),
            other => bail!("unknown overwrite policy '{other}' (expected yes, force or warn)"),
        }
    }
}

impl FromStr for MetadataOverwrite {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add-only" => Ok(Self::AddOnly),
            "yes" => Ok(Self::Yes),
            "force" => Ok(Self::Force),
            "warn" => Ok(Self::Warn),
            "justwarn" => Ok(Self::JustWarn),
            other => bail!("unknown metadata overwrite policy '{other}'"),
        }
    }
}

/// Stable identifier for a file: 64-bit FNV-1a of `filename + scan_start`,
/// as 16 hex digits.
///
/// Not compatible with older eda databases, which key files by
/// `base64(md5(filename + scan_start))`. Files already stored under such an
/// id are not recognised and get imported a second time.
pub fn file_id(filename: &str, scan_start: &str) -> String {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let hash = filename
        .bytes()
        .chain(scan_start.bytes())
        .fold(OFFSET, |h, b| (h ^ b as u64).wrapping_mul(PRIME));
    format!("{hash:016x}")
}

/// [`file_id`] from parsed metadata: the file name of `Filepath` and the
/// `Scan Start` header entry.
pub fn file_id_from_metadata(metadata: &Metadata) -> Result<String> {
    let path = metadata.get("Filepath").context("metadata has no 'Filepath'")?.to_string();
    let filename = path.rsplit(['/', '\\']).next().unwrap_or(path.as_str());
    let scan_start = metadata.get("Scan Start").context("metadata has no 'Scan Start'")?;
    Ok(file_id(filename, &scan_start.to_string()))
}

fn sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Integer(i) => Sql::Integer(*i),
        Value::Float(v) if v.is_nan() => Sql::Null,
        Value::Float(v) => Sql::Real(*v),
        Value::String(s) => Sql::Text(s.clone()),
    }
}

/// Handle on an archive database.
pub struct Store {
    conn: Connection,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("path", &self.conn.path()).finish()
    }
}

impl Store {
    /// Open (or create) the database at `path`, creating missing tables.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
        let store = Store { conn };
        store.create_missing_tables()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Store {
            conn: Connection::open_in_memory().context("opening in-memory database")?,
        };
        store.create_missing_tables()?;
        Ok(store)
    }

    pub fn create_missing_tables(&self) -> Result<()> {
        let measurement_columns: Vec<String> = RAW_DATA_COLUMNS.iter().map(|c| format!("{c} REAL")).collect();
        let raw_data = format!(
            "CREATE TABLE IF NOT EXISTS raw_data (file_id TEXT, file_row INTEGER, {})",
            measurement_columns.join(", ")
        );
        self.conn.execute(&raw_data, []).context("creating raw_data")?;
        self.conn
            .execute("CREATE TABLE IF NOT EXISTS metadata (file_id TEXT, key TEXT, value TEXT)", [])
            .context("creating metadata")?;
        Ok(())
    }

    /// Rows stored for `file_id` in `raw_data`; 0 when absent.
    pub fn raw_data_row_count(&self, file_id: &str) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM raw_data WHERE file_id = ?1", params![file_id], |r| r.get(0))
            .context("counting raw_data rows")?;
        Ok(n as usize)
    }

    pub fn delete_file_from_raw_data(&self, file_id: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM raw_data WHERE file_id = ?1", params![file_id])
            .context("deleting from raw_data")
    }

    pub fn delete_file_from_metadata(&self, file_id: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM metadata WHERE file_id = ?1", params![file_id])
            .context("deleting from metadata")
    }

    pub fn replace_metadata_value(&self, file_id: &str, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE metadata SET value = ?1 WHERE key = ?2 AND file_id = ?3",
                params![value, key, file_id],
            )
            .context("updating metadata value")?;
        Ok(())
    }

    fn insert_raw_data(&mut self, file_id: &str, table: &Table) -> Result<()> {
        let stored: Vec<(usize, &str)> = table
            .columns()
            .iter()
            .enumerate()
            .filter_map(|(i, c)| RAW_DATA_COLUMNS.iter().find(|r| r.eq_ignore_ascii_case(c)).map(|r| (i, *r)))
            .collect();
        let skipped = table.columns().len() - stored.len();
        if skipped > 0 {
            debug!("raw_data: {skipped} columns of {file_id} have no raw_data counterpart");
        }
        let names: Vec<&str> = stored.iter().map(|(_, n)| *n).collect();
        let placeholders: Vec<String> = (0..names.len() + 2).map(|k| format!("?{}", k + 1)).collect();
        let sql = format!(
            "INSERT INTO raw_data (file_id, file_row{}{}) VALUES ({})",
            if names.is_empty() { "" } else { ", " },
            names.join(", "),
            placeholders.join(", ")
        );

        let tx = self.conn.transaction().context("starting transaction")?;
        {
            let mut stmt = tx.prepare(&sql).context("preparing raw_data insert")?;
            for (file_row, row) in table.rows().iter().enumerate() {
                let mut values = vec![
                    rusqlite::types::Value::Text(file_id.to_string()),
                    rusqlite::types::Value::Integer(file_row as i64),
                ];
                values.extend(stored.iter().map(|(i, _)| sql_value(&row.values[*i])));
                stmt.execute(params_from_iter(values))
                    .with_context(|| format!("inserting row {file_row} of {file_id}"))?;
            }
        }
        tx.commit().context("committing raw_data")?;
        Ok(())
    }

    /// Store `table` as the raw data of `file_id` unless it is already
    /// there. Returns whether anything was written.
    pub fn add_file_to_raw_data_if_missing(
        &mut self,
        file_id: &str,
        table: &Table,
        policy: OverwritePolicy,
    ) -> Result<bool> {
        let found = self.raw_data_row_count(file_id)?;
        if found == 0 {
            self.insert_raw_data(file_id, table)?;
            return Ok(true);
        }
        if policy == OverwritePolicy::Force || (found != table.len() && policy == OverwritePolicy::Yes) {
            self.delete_file_from_raw_data(file_id)?;
            self.insert_raw_data(file_id, table)?;
            return Ok(true);
        }
        if found != table.len() {
            warn!(
                "file mismatch for file_id {file_id}: {} rows given, {found} rows in raw_data; not written",
                table.len()
            );
        }
        Ok(false)
    }

    fn insert_metadata<'a>(&mut self, file_id: &str, entries: impl Iterator<Item = (&'a String, &'a Value)>) -> Result<()> {
        let tx = self.conn.transaction().context("starting transaction")?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO metadata (file_id, key, value) VALUES (?1, ?2, ?3)")
                .context("preparing metadata insert")?;
            for (key, value) in entries {
                stmt.execute(params![file_id, key, value.to_string()])
                    .with_context(|| format!("inserting metadata '{key}'"))?;
            }
        }
        tx.commit().context("committing metadata")?;
        Ok(())
    }

    /// Merge `metadata` into the stored metadata of `file_id` following
    /// `policy`. Returns whether any row was added or changed.
    pub fn update_metadata(&mut self, file_id: &str, metadata: &Metadata, policy: MetadataOverwrite) -> Result<bool> {
        if policy == MetadataOverwrite::Force {
            self.delete_file_from_metadata(file_id)?;
        }
        let existing = self.metadata_for_file(file_id)?;
        if existing.is_empty() {
            self.insert_metadata(file_id, metadata.iter())?;
            return Ok(true);
        }

        let mut overwrote = false;
        let mut conflicts = Vec::new();
        for (key, value) in metadata {
            let Some(stored) = existing.get(key) else {
                continue;
            };
            let given = value.to_string();
            let stored = stored.to_string();
            if given != stored {
                if policy == MetadataOverwrite::Yes {
                    self.replace_metadata_value(file_id, key, &given)?;
                    overwrote = true;
                }
                conflicts.push((key.as_str(), given, stored));
            }
        }
        if !conflicts.is_empty() && matches!(policy, MetadataOverwrite::Warn | MetadataOverwrite::JustWarn) {
            warn!("key-value mismatch for file_id {file_id}");
            for (key, given, stored) in &conflicts {
                warn!("  {key}: {given} vs {stored}");
            }
            if policy == MetadataOverwrite::JustWarn {
                warn!("no changes made to database");
                return Ok(false);
            }
            warn!("existing values kept; use the 'yes' policy to update");
        }

        let missing: Vec<(&String, &Value)> = metadata.iter().filter(|(k, _)| !existing.contains_key(*k)).collect();
        if !missing.is_empty() {
            if policy == MetadataOverwrite::Warn {
                info!("adding new keys for {file_id}: {:?}", missing.iter().map(|(k, _)| k).collect::<Vec<_>>());
            }
            self.insert_metadata(file_id, missing.into_iter())?;
            return Ok(true);
        }
        Ok(overwrote)
    }

    /// Stored metadata of `file_id`; values come back as strings.
    pub fn metadata_for_file(&self, file_id: &str) -> Result<Metadata> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM metadata WHERE file_id = ?1")
            .context("preparing metadata query")?;
        let rows = stmt
            .query_map(params![file_id], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?))
            })
            .context("querying metadata")?;
        let mut metadata = Metadata::new();
        for row in rows {
            let (key, value) = row.context("reading metadata row")?;
            metadata.insert(key, value.map_or(Value::Null, Value::String));
        }
        Ok(metadata)
    }

    /// Stored raw data of `file_id`, indexed by `file_row`.
    pub fn raw_data_for_file(&self, file_id: &str) -> Result<Table> {
        let sql = format!(
            "SELECT file_row, {} FROM raw_data WHERE file_id = ?1 ORDER BY file_row",
            RAW_DATA_COLUMNS.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql).context("preparing raw_data query")?;
        let rows = stmt
            .query_map(params![file_id], |r| {
                let file_row: i64 = r.get(0)?;
                let values = (0..RAW_DATA_COLUMNS.len())
                    .map(|k| r.get::<_, Option<f64>>(k + 1).map(|v| v.map_or(Value::Null, Value::Float)))
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((file_row, values))
            })
            .context("querying raw_data")?;
        let mut table = Table::new(["file_row"], RAW_DATA_COLUMNS.iter().copied());
        for row in rows {
            let (file_row, values) = row.context("reading raw_data row")?;
            table.push_row(vec![Value::Integer(file_row)], values)?;
        }
        Ok(table)
    }
}
