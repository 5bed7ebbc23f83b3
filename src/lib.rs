#![forbid(unsafe_code)]

//! # emergence-harness
//!
//! Parameter sweeps for causal-emergence measures.
//!
//! A sweep takes a set of models (simulators producing micro/macro time
//! series), a set of emergence measures (PhiID-based and Shannon-based), and
//! one shared manifest of candidate parameter values. For every model and
//! every combination of its parameters it generates one data bundle, runs
//! every measure against it over the measure's own parameter grid, and
//! collects everything into a single long-format table: one row per
//! (metric, parameter combination), with model parameters broadcast as
//! columns.
//!
//! The information-theoretic numerics are delegated to an external engine
//! behind the [`oracle`] traits; this crate owns enumeration, parameter
//! reconciliation, failure handling, checkpointing and the result table.

pub mod bundle;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod measures;
pub mod models;
pub mod oracle;
pub mod params;
pub mod sweep;
pub mod table;

pub use bundle::DataBundle;
pub use checkpoint::{
    Checkpoint, CheckpointBatch, CheckpointError, CheckpointSink, CheckpointWorker,
    JsonlCheckpointSink,
};
pub use config::{load_config_from_path, SweepConfig};
pub use error::SweepError;
pub use measures::{Measure, Metrics, PhiIdAtomsMeasure, PhiIdEmergence, ShannonEmergence};
pub use models::{KuramotoModel, Model, MvarModel, Topology};
pub use oracle::{
    DistributionFamily, EngineConfig, EngineSession, OracleError, PhiIdAtoms, PhiIdOracle,
    RedundancyFunc, ShannonOracle,
};
pub use params::{Assignment, Generator, ParamValue, ParameterManifest, VariableLists};
pub use sweep::{
    compute_emergence, compute_emergence_with, get_result_for_measure,
    reconcile_measure_variables, FailurePolicy, MeasureSet, ModelSet, SweepOptions, SweepPlan,
};
pub use table::{Cell, Heatmap, ResultRow, ResultTable};
