//! Numerical oracles for information decomposition.
//!
//! The information-theoretic quantities themselves (PhiID atoms, Gaussian
//! mutual-information emergence criteria) are computed by an external engine.
//! This module fixes the contract: what goes in, what comes back. Measures
//! receive an oracle by injection; [`EngineSession`] is the subprocess-backed
//! implementation with an explicit start/close lifecycle.

pub mod engine;

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

pub use engine::{EngineConfig, EngineSession};

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to start engine `{program}`: {message}")]
    Spawn { program: String, message: String },
    #[error("serialization error: {0}")]
    Serde(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Failure reported by the engine itself (non-convergence, singular
    /// covariance, ...).
    #[error("engine error: {0}")]
    Engine(String),
    #[error("engine session closed")]
    Closed,
    #[error("engine session lock poisoned")]
    Poisoned,
}

/// Redundancy function used by a PhiID computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedundancyFunc {
    /// Minimum mutual information.
    Mmi,
    /// Common change in surprisal.
    Ccs,
}

impl RedundancyFunc {
    pub const ALL: [RedundancyFunc; 2] = [RedundancyFunc::Mmi, RedundancyFunc::Ccs];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mmi => "mmi",
            Self::Ccs => "ccs",
        }
    }
}

impl FromStr for RedundancyFunc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mmi" => Ok(Self::Mmi),
            "ccs" => Ok(Self::Ccs),
            other => Err(format!("unknown redundancy function '{other}' (expected mmi or ccs)")),
        }
    }
}

impl fmt::Display for RedundancyFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distribution family assumed by the Shannon emergence estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionFamily {
    Gaussian,
    Discrete,
}

impl DistributionFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gaussian => "gaussian",
            Self::Discrete => "discrete",
        }
    }
}

impl FromStr for DistributionFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gaussian" => Ok(Self::Gaussian),
            "discrete" => Ok(Self::Discrete),
            other => Err(format!(
                "unknown distribution family '{other}' (expected gaussian or discrete)"
            )),
        }
    }
}

/// The 16 atoms of a two-source, two-target integrated information
/// decomposition. `r` redundancy, `x`/`y` unique to each source, `s` synergy;
/// `atb` reads "a at the past to b at the present".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhiIdAtoms {
    pub rtr: f64,
    pub rtx: f64,
    pub rty: f64,
    pub rts: f64,
    pub xtr: f64,
    pub xtx: f64,
    pub xty: f64,
    pub xts: f64,
    pub ytr: f64,
    pub ytx: f64,
    pub yty: f64,
    pub yts: f64,
    pub str: f64,
    pub stx: f64,
    pub sty: f64,
    pub sts: f64,
}

impl PhiIdAtoms {
    pub const NAMES: [&'static str; 16] = [
        "rtr", "rtx", "rty", "rts", "xtr", "xtx", "xty", "xts", "ytr", "ytx", "yty", "yts", "str",
        "stx", "sty", "sts",
    ];

    pub fn values(&self) -> [f64; 16] {
        [
            self.rtr, self.rtx, self.rty, self.rts, self.xtr, self.xtx, self.xty, self.xts,
            self.ytr, self.ytx, self.yty, self.yts, self.str, self.stx, self.sty, self.sts,
        ]
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&'static str, f64)> {
        Self::NAMES.into_iter().zip(self.values())
    }

    /// Synergy of the sources carried to any target:
    /// `{12}->{1}{2} + {12}->{1} + {12}->{2} + {12}->{12}`.
    pub fn whole_parts_emergence(&self) -> f64 {
        self.str + self.stx + self.sty + self.sts
    }

    /// Synergy carried down to redundant or unique targets.
    pub fn downward_causation(&self) -> f64 {
        self.str + self.stx + self.sty
    }

    /// Synergy that stays synergy (`{12}->{12}`).
    pub fn causal_decoupling(&self) -> f64 {
        self.whole_parts_emergence() - self.downward_causation()
    }
}

/// Full PhiID of a micro series (variables × time).
pub trait PhiIdOracle: Send + Sync {
    fn phiid_full(
        &self,
        micro: &DMatrix<f64>,
        time_lag: usize,
        redundancy: RedundancyFunc,
    ) -> Result<PhiIdAtoms, OracleError>;
}

/// Shannon-information emergence criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShannonQuantity {
    /// Causal emergence.
    Psi,
    /// Downward causation.
    Delta,
    /// Causal decoupling.
    Gamma,
}

/// Practical (Shannon) emergence of a macro series over micro parts.
///
/// Series are passed time × variables: `micro` is T×n, `macro_series` is T×1.
pub trait ShannonOracle: Send + Sync {
    fn emergence(
        &self,
        quantity: ShannonQuantity,
        micro: &DMatrix<f64>,
        macro_series: &DMatrix<f64>,
        time_lag: usize,
        family: DistributionFamily,
    ) -> Result<f64, OracleError>;

    fn psi(
        &self,
        micro: &DMatrix<f64>,
        macro_series: &DMatrix<f64>,
        time_lag: usize,
        family: DistributionFamily,
    ) -> Result<f64, OracleError> {
        self.emergence(ShannonQuantity::Psi, micro, macro_series, time_lag, family)
    }

    fn delta(
        &self,
        micro: &DMatrix<f64>,
        macro_series: &DMatrix<f64>,
        time_lag: usize,
        family: DistributionFamily,
    ) -> Result<f64, OracleError> {
        self.emergence(ShannonQuantity::Delta, micro, macro_series, time_lag, family)
    }

    fn gamma(
        &self,
        micro: &DMatrix<f64>,
        macro_series: &DMatrix<f64>,
        time_lag: usize,
        family: DistributionFamily,
    ) -> Result<f64, OracleError> {
        self.emergence(ShannonQuantity::Gamma, micro, macro_series, time_lag, family)
    }
}
