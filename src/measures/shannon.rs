//! Practical (Shannon) emergence: Psi, Delta and Gamma of a macro series over
//! its micro parts.

use std::sync::Arc;

use nalgebra::DMatrix;
use tracing::warn;

use super::{distribution, time_lag, Measure, Metrics};
use crate::bundle::{has_nan, require_min_size, DataBundle, MACRO, MICRO};
use crate::error::SweepError;
use crate::oracle::ShannonOracle;
use crate::params::Assignment;

pub const SHANNON_WPE: &str = "shannon_wpe";
pub const SHANNON_DC: &str = "shannon_dc";
pub const SHANNON_CD: &str = "shannon_cd";

#[derive(Clone)]
pub struct ShannonEmergence {
    oracle: Arc<dyn ShannonOracle>,
}

impl ShannonEmergence {
    pub const METRICS: [&'static str; 3] = [SHANNON_WPE, SHANNON_DC, SHANNON_CD];

    pub fn new(oracle: Arc<dyn ShannonOracle>) -> Self {
        Self { oracle }
    }
}

impl Measure for ShannonEmergence {
    fn evaluate(&self, data: &DataBundle, params: &Assignment) -> Result<Metrics, SweepError> {
        let lag = time_lag(params)?;
        let family = distribution(params)?;

        // Oracle wants time × variables.
        let micro = data.micro()?.transpose();
        require_min_size(&micro, MICRO)?;
        let macro_series = data
            .macro_series()
            .ok_or_else(|| SweepError::invalid("data", "data bundle has no 'macro' entry"))
            .and_then(macro_column)?;

        if macro_series.nrows() != micro.nrows() {
            return Err(SweepError::invalid(
                MACRO,
                format!(
                    "macro has {} samples but micro has {}",
                    macro_series.nrows(),
                    micro.nrows()
                ),
            ));
        }

        if has_nan(&micro) || has_nan(&macro_series) {
            warn!(
                samples = micro.nrows(),
                "micro or macro series contains NaN; reporting NaN metrics"
            );
            return Ok(Metrics::nan(Self::METRICS));
        }

        let psi = self.oracle.psi(&micro, &macro_series, lag, family)?;
        let delta = self.oracle.delta(&micro, &macro_series, lag, family)?;
        let gamma = self.oracle.gamma(&micro, &macro_series, lag, family)?;

        Ok(Metrics::new()
            .with(SHANNON_WPE, psi)
            .with(SHANNON_DC, delta)
            .with(SHANNON_CD, gamma))
    }
}

/// A single macro series as a T×1 column. Accepts 1×T (one variable over
/// time) or an already-columnar T×1.
fn macro_column(series: &DMatrix<f64>) -> Result<DMatrix<f64>, SweepError> {
    if series.nrows() == 1 {
        Ok(series.transpose())
    } else if series.ncols() == 1 {
        Ok(series.clone())
    } else {
        Err(SweepError::invalid(
            MACRO,
            format!(
                "macro must be a single series, got {}x{}",
                series.nrows(),
                series.ncols()
            ),
        ))
    }
}
