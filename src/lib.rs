//! Exploratory analysis of scanned measurement data: import instrument
//! files into hierarchically indexed tables, reshape them for plotting,
//! and fit models per dataset.

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod fit;
pub mod parallel;
pub mod simulation;

pub use data::model::{Row, Table, Value};
pub use error::{EdaError, Result};
