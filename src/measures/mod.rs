//! Emergence measures: a data bundle plus one parameter assignment in, a
//! handful of named scalar metrics out.
//!
//! Built-in measures defer the numerics to an injected oracle. They all share
//! the degenerate-input policy: if the micro series holds any NaN the measure
//! reports every metric as NaN instead of failing, so a sweep can cross
//! regions where simulated data blows up.

mod phiid;
mod shannon;

use indexmap::IndexMap;

use crate::bundle::DataBundle;
use crate::error::SweepError;
use crate::oracle::{DistributionFamily, RedundancyFunc};
use crate::params::Assignment;

pub use phiid::{PhiIdAtomsMeasure, PhiIdEmergence};
pub use shannon::ShannonEmergence;

pub const TIME_LAG: &str = "time_lag";
pub const REDUNDANCY_FUNC: &str = "redundancy_func";
pub const DISTRIBUTION: &str = "distribution";

/// Ordered metric name → value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    values: IndexMap<String, f64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Every name mapped to NaN.
    pub fn nan<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut out = Self::new();
        for name in names {
            out.insert(name, f64::NAN);
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn all_nan(&self) -> bool {
        self.values.values().all(|v| v.is_nan())
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Metrics {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut out = Self::new();
        for (name, value) in iter {
            out.insert(name, value);
        }
        out
    }
}

/// An emergence measure.
///
/// `params` holds exactly one value per parameter the measure was declared
/// with (its own swept parameters plus any it shares with the model).
/// Parameters a measure does not understand are ignored.
pub trait Measure: Send + Sync {
    fn evaluate(&self, data: &DataBundle, params: &Assignment) -> Result<Metrics, SweepError>;
}

impl<F> Measure for F
where
    F: Fn(&DataBundle, &Assignment) -> Result<Metrics, SweepError> + Send + Sync,
{
    fn evaluate(&self, data: &DataBundle, params: &Assignment) -> Result<Metrics, SweepError> {
        self(data, params)
    }
}

/// Lag for the measure: `time_lag` if declared, else the first parameter
/// whose name contains it (e.g. `time_lag_for_measure`), else 1.
pub fn time_lag(params: &Assignment) -> Result<usize, SweepError> {
    if params.contains(TIME_LAG) {
        return params.positive_int(TIME_LAG);
    }
    match params.name_containing(TIME_LAG) {
        Some(name) => params.positive_int(name),
        None => Ok(1),
    }
}

pub fn redundancy_func(params: &Assignment) -> Result<RedundancyFunc, SweepError> {
    let raw = params.text_or(REDUNDANCY_FUNC, RedundancyFunc::Mmi.as_str())?;
    raw.parse()
        .map_err(|reason: String| SweepError::invalid(REDUNDANCY_FUNC, reason))
}

pub fn distribution(params: &Assignment) -> Result<DistributionFamily, SweepError> {
    let raw = params.text_or(DISTRIBUTION, DistributionFamily::Gaussian.as_str())?;
    raw.parse()
        .map_err(|reason: String| SweepError::invalid(DISTRIBUTION, reason))
}
