//! Model functions: one parameter assignment in, one fresh data bundle out.
//!
//! Built-in models simulate raw series and then shape the bundle with the
//! generators bound to their parameters: the first parameter whose name
//! contains `micro` selects the micro transform (raw output when absent), the
//! first containing `macro` the macro transform (no macro when absent).

mod generators;
mod kuramoto;
mod mvar;

use nalgebra::DMatrix;
use rand::Rng;

use crate::bundle::{DataBundle, MACRO, MICRO};
use crate::error::SweepError;
use crate::params::Assignment;

pub use generators::{generator, generator_names, GENERATORS};
pub use kuramoto::{simulate_kuramoto, KuramotoModel, KuramotoParams};
pub use mvar::{coupling_matrix, simulate_mvar, MvarModel, Topology};

/// Simulation steps discarded before recording.
pub const BURN_IN: usize = 100;

pub trait Model: Send + Sync {
    fn generate(&self, params: &Assignment) -> Result<DataBundle, SweepError>;
}

impl<F> Model for F
where
    F: Fn(&Assignment) -> Result<DataBundle, SweepError> + Send + Sync,
{
    fn generate(&self, params: &Assignment) -> Result<DataBundle, SweepError> {
        self(params)
    }
}

/// Apply the bound micro/macro generators to a raw simulated series.
pub fn shape_bundle(raw: DMatrix<f64>, params: &Assignment) -> DataBundle {
    let macro_series = params.generator_containing(MACRO).map(|g| g.apply(&raw));
    let micro = match params.generator_containing(MICRO) {
        Some(g) => g.apply(&raw),
        None => raw,
    };
    let bundle = DataBundle::new(micro);
    match macro_series {
        Some(series) => bundle.with_macro(series),
        None => bundle,
    }
}

/// Seed for one model call: an integer `seed` parameter when given, else the
/// model's own.
pub(crate) fn call_seed(params: &Assignment, default: u64) -> Result<u64, SweepError> {
    match params.get("seed") {
        None => Ok(default),
        Some(value) => value
            .as_int()
            .filter(|v| *v >= 0)
            .map(|v| v as u64)
            .ok_or_else(|| SweepError::invalid("seed", "expected a non-negative int")),
    }
}

/// Lag parameter: first declared name containing `time_lag`, default 1.
pub(crate) fn model_lag(params: &Assignment) -> Result<usize, SweepError> {
    match params.name_containing("time_lag") {
        Some(name) => params.positive_int(name),
        None => Ok(1),
    }
}

pub(crate) fn sample_normal(rng: &mut impl Rng, mean: f64, std: f64) -> f64 {
    if std <= 0.0 {
        return mean;
    }
    let u1: f64 = rng.gen::<f64>().max(1e-12);
    let u2: f64 = rng.gen::<f64>();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + z0 * std
}

/// Non-finite values become NaN.
pub(crate) fn sanitize(series: DMatrix<f64>) -> DMatrix<f64> {
    series.map(|v| if v.is_finite() { v } else { f64::NAN })
}
