/// Data layer: core types, file I/O, metadata, and the SQLite archive.
///
/// Architecture:
/// ```text
///  directory of .dat files        .csv / .json / .parquet
///        │                               │
///        ▼                               ▼
///   ┌───────────┐  metadata        ┌──────────┐
///   │ directory  │◄─ (path, header) │  loader   │
///   └───────────┘                  └──────────┘
///        │ concat_runs                   │
///        ▼                               ▼
///   ┌──────────────────────────────────────────┐
///   │  Table   rows keyed by (run, scan, row…)  │
///   └──────────────────────────────────────────┘
///        │              │               │
///        ▼              ▼               ▼
///   ┌──────────┐  ┌──────────┐   ┌──────────┐
///   │  filter   │  │  writer   │   │  store    │  sqlite raw_data / metadata
///   └──────────┘  └──────────┘   └──────────┘
/// ```

pub mod directory;
pub mod filter;
pub mod loader;
pub mod metadata;
pub mod model;
pub mod store;
pub mod writer;
