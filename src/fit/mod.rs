//! Least-squares fitting of models to one or many datasets.

pub mod datasets;
pub mod minimize;
pub mod params;
pub mod residuals;

pub use datasets::{fit_each_dataset, fit_linked_datasets, DatasetFits, FitOptions, LinkedFit};
pub use minimize::{minimize, MinimizerOptions, MinimizerResult};
pub use params::{Parameter, Parameters};
pub use residuals::ModelResiduals;
