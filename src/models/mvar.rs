//! Multivariate autoregressive networks.
//!
//! `x_t = A x_{t-lag} + e_t` with `e_t ~ N(0, Σ)`, unit noise variances and
//! `noise_corr` on every off-diagonal of Σ.

use std::fmt;
use std::str::FromStr;

use nalgebra::{Cholesky, DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{call_seed, model_lag, sample_normal, sanitize, shape_bundle, Model, BURN_IN};
use crate::bundle::DataBundle;
use crate::error::SweepError;
use crate::params::Assignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Every entry equals `coupling` (the two-node study model).
    #[default]
    Uniform,
    /// Every entry equals `coupling / n`.
    Global,
    /// Self-coupling `coupling / n`; each off-diagonal edge present with
    /// probability `density`, weight `coupling / n`.
    ErdosRenyi,
}

impl Topology {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Global => "global",
            Self::ErdosRenyi => "erdos_renyi",
        }
    }
}

impl FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uniform" => Ok(Self::Uniform),
            "global" => Ok(Self::Global),
            "erdos_renyi" => Ok(Self::ErdosRenyi),
            other => Err(format!(
                "unknown topology '{other}' (expected uniform, global or erdos_renyi)"
            )),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coupling matrix for `nodes` variables.
pub fn coupling_matrix(
    nodes: usize,
    topology: Topology,
    coupling: f64,
    density: f64,
    rng: &mut impl Rng,
) -> DMatrix<f64> {
    let n = nodes as f64;
    match topology {
        Topology::Uniform => DMatrix::from_element(nodes, nodes, coupling),
        Topology::Global => DMatrix::from_element(nodes, nodes, coupling / n),
        Topology::ErdosRenyi => DMatrix::from_fn(nodes, nodes, |i, j| {
            if i == j || rng.gen::<f64>() < density {
                coupling / n
            } else {
                0.0
            }
        }),
    }
}

/// Simulate `npoints` samples (after burn-in) of an MVAR process; returns a
/// variables × time matrix. Exploding trajectories surface as NaN.
pub fn simulate_mvar(
    coupling: &DMatrix<f64>,
    noise_corr: f64,
    npoints: usize,
    lag: usize,
    rng: &mut impl Rng,
) -> Result<DMatrix<f64>, SweepError> {
    let n = coupling.nrows();
    if n == 0 || coupling.ncols() != n {
        return Err(SweepError::invalid(
            "coupling",
            format!("coupling matrix must be square and non-empty, got {}x{}", n, coupling.ncols()),
        ));
    }
    if lag == 0 {
        return Err(SweepError::invalid("time_lag", "must be >= 1, got 0"));
    }

    let sigma = DMatrix::from_fn(n, n, |i, j| if i == j { 1.0 } else { noise_corr });
    let chol = Cholesky::new(sigma).ok_or_else(|| {
        SweepError::invalid(
            "noise_corr",
            format!("noise covariance with correlation {noise_corr} is not positive definite"),
        )
    })?;
    let l = chol.l();

    let total = BURN_IN + npoints;
    let mut x = DMatrix::<f64>::zeros(n, total);
    for t in 0..total {
        let z = DVector::from_fn(n, |_, _| sample_normal(rng, 0.0, 1.0));
        let mut next = &l * z;
        if t >= lag {
            next += coupling * x.column(t - lag);
        }
        x.set_column(t, &next);
    }

    Ok(sanitize(x.columns(BURN_IN, npoints).into_owned()))
}

/// MVAR network model.
///
/// Parameters: `coupling`, `noise_corr`, `npoints`, a lag (any name
/// containing `time_lag`, default 1), optional `density` (Erdős–Rényi edge
/// probability, default 0.5) and `seed`.
#[derive(Debug, Clone, PartialEq)]
pub struct MvarModel {
    nodes: usize,
    topology: Topology,
    seed: u64,
}

impl MvarModel {
    pub fn new(nodes: usize, topology: Topology) -> Result<Self, SweepError> {
        if nodes < 2 {
            return Err(SweepError::invalid(
                "nodes",
                format!("an MVAR network needs at least 2 nodes, got {nodes}"),
            ));
        }
        Ok(Self {
            nodes,
            topology,
            seed: 0,
        })
    }

    /// The two-node, uniformly coupled model used throughout the study.
    pub fn two_node() -> Self {
        Self {
            nodes: 2,
            topology: Topology::Uniform,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }
}

impl Model for MvarModel {
    fn generate(&self, params: &Assignment) -> Result<DataBundle, SweepError> {
        let coupling = params.number("coupling")?;
        let noise_corr = params.number("noise_corr")?;
        let npoints = params.positive_int("npoints")?;
        let lag = model_lag(params)?;
        let density = params.number_or("density", 0.5)?;
        if !(0.0..=1.0).contains(&density) {
            return Err(SweepError::invalid(
                "density",
                format!("must be within [0, 1], got {density}"),
            ));
        }
        let seed = call_seed(params, self.seed)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let raw = if coupling.is_nan() {
            DMatrix::from_element(self.nodes, npoints, f64::NAN)
        } else {
            let a = coupling_matrix(self.nodes, self.topology, coupling, density, &mut rng);
            simulate_mvar(&a, noise_corr, npoints, lag, &mut rng)?
        };
        debug!(
            nodes = self.nodes,
            topology = %self.topology,
            coupling,
            noise_corr,
            npoints,
            lag,
            "simulated mvar network"
        );

        Ok(shape_bundle(raw, params))
    }
}
