//! PhiID-based measures.

use std::sync::Arc;

use tracing::warn;

use super::{redundancy_func, time_lag, Measure, Metrics};
use crate::bundle::{has_nan, require_min_size, DataBundle, MICRO};
use crate::error::SweepError;
use crate::oracle::{PhiIdAtoms, PhiIdOracle};
use crate::params::Assignment;

pub const PHIID_WPE: &str = "phiid_wpe";
pub const PHIID_DC: &str = "phiid_dc";
pub const PHIID_CD: &str = "phiid_cd";

/// Whole-parts emergence, downward causation and causal decoupling from the
/// synergistic PhiID atoms of a two-variable micro series.
#[derive(Clone)]
pub struct PhiIdEmergence {
    oracle: Arc<dyn PhiIdOracle>,
}

impl PhiIdEmergence {
    pub const METRICS: [&'static str; 3] = [PHIID_WPE, PHIID_DC, PHIID_CD];

    pub fn new(oracle: Arc<dyn PhiIdOracle>) -> Self {
        Self { oracle }
    }
}

impl Measure for PhiIdEmergence {
    fn evaluate(&self, data: &DataBundle, params: &Assignment) -> Result<Metrics, SweepError> {
        let Some(atoms) = decompose(self.oracle.as_ref(), data, params)? else {
            return Ok(Metrics::nan(Self::METRICS));
        };
        Ok(Metrics::new()
            .with(PHIID_WPE, atoms.whole_parts_emergence())
            .with(PHIID_DC, atoms.downward_causation())
            .with(PHIID_CD, atoms.causal_decoupling()))
    }
}

/// All 16 PhiID atoms as separate metrics.
#[derive(Clone)]
pub struct PhiIdAtomsMeasure {
    oracle: Arc<dyn PhiIdOracle>,
}

impl PhiIdAtomsMeasure {
    pub fn new(oracle: Arc<dyn PhiIdOracle>) -> Self {
        Self { oracle }
    }
}

impl Measure for PhiIdAtomsMeasure {
    fn evaluate(&self, data: &DataBundle, params: &Assignment) -> Result<Metrics, SweepError> {
        match decompose(self.oracle.as_ref(), data, params)? {
            Some(atoms) => Ok(atoms.pairs().collect()),
            None => Ok(Metrics::nan(PhiIdAtoms::NAMES)),
        }
    }
}

/// Validate inputs and run the decomposition. `None` when the micro series
/// is degenerate (contains NaN).
fn decompose(
    oracle: &dyn PhiIdOracle,
    data: &DataBundle,
    params: &Assignment,
) -> Result<Option<PhiIdAtoms>, SweepError> {
    let lag = time_lag(params)?;
    let redundancy = redundancy_func(params)?;
    let micro = data.micro()?;
    require_min_size(micro, MICRO)?;

    if has_nan(micro) {
        warn!(
            rows = micro.nrows(),
            cols = micro.ncols(),
            "micro series contains NaN; reporting NaN metrics"
        );
        return Ok(None);
    }

    Ok(Some(oracle.phiid_full(micro, lag, redundancy)?))
}
