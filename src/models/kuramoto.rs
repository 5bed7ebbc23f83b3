//! Community-structured Sakaguchi–Kuramoto oscillator networks.
//!
//! `n_comm` communities of `intra_comm_size` identical oscillators:
//!
//! ```text
//! dθ_i/dt = ω + Σ_j K_ij / m · sin(θ_j − θ_i − α)
//! ```
//!
//! with `K_ij = (1 + coupling) / 2` inside a community, `(1 − coupling) / 2`
//! across communities, `m = intra_comm_size` and phase lag `α = π/2 − beta`.

use std::f64::consts::{PI, TAU};

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{call_seed, shape_bundle, Model, BURN_IN};
use crate::bundle::DataBundle;
use crate::error::SweepError;
use crate::params::Assignment;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KuramotoParams {
    pub coupling: f64,
    pub beta: f64,
    pub frequency: f64,
    pub intra_comm_size: usize,
    pub n_comm: usize,
    pub npoints: usize,
    pub dt: f64,
}

impl KuramotoParams {
    pub fn oscillators(&self) -> usize {
        self.intra_comm_size * self.n_comm
    }
}

/// Integrate with forward Euler; returns oscillators × time phases wrapped
/// to `[0, 2π)`.
pub fn simulate_kuramoto(params: &KuramotoParams, rng: &mut impl Rng) -> DMatrix<f64> {
    let n = params.oscillators();
    let m = params.intra_comm_size as f64;
    let alpha = PI / 2.0 - params.beta;
    let intra = (1.0 + params.coupling) / 2.0;
    let inter = (1.0 - params.coupling) / 2.0;
    let weights = DMatrix::from_fn(n, n, |i, j| {
        let same = i / params.intra_comm_size == j / params.intra_comm_size;
        (if same { intra } else { inter }) / m
    });

    let mut theta = DVector::from_fn(n, |_, _| rng.gen::<f64>() * TAU);
    let total = BURN_IN + params.npoints;
    let mut out = DMatrix::<f64>::zeros(n, params.npoints);

    for step in 0..total {
        let drift = DVector::from_fn(n, |i, _| {
            let pull: f64 = (0..n)
                .map(|j| weights[(i, j)] * (theta[j] - theta[i] - alpha).sin())
                .sum();
            params.frequency + pull
        });
        theta += drift * params.dt;
        if step >= BURN_IN {
            let wrapped = theta.map(|t| t.rem_euclid(TAU));
            out.set_column(step - BURN_IN, &wrapped);
        }
    }
    out
}

/// Kuramoto community model.
///
/// Parameters: `coupling`, `beta`, `npoints`, optional `intra_comm_size`
/// (default 4), `n_comm` (default 2), `frequency` (default 1.0) and `seed`.
/// Initial phases are uniform on `[0, 2π)`.
#[derive(Debug, Clone, PartialEq)]
pub struct KuramotoModel {
    dt: f64,
    seed: u64,
}

impl KuramotoModel {
    pub fn new(dt: f64) -> Result<Self, SweepError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SweepError::invalid(
                "dt",
                format!("integration step must be positive, got {dt}"),
            ));
        }
        Ok(Self { dt, seed: 0 })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    fn resolve(&self, params: &Assignment) -> Result<KuramotoParams, SweepError> {
        Ok(KuramotoParams {
            coupling: params.number("coupling")?,
            beta: params.number("beta")?,
            frequency: params.number_or("frequency", 1.0)?,
            intra_comm_size: params.positive_int_or("intra_comm_size", 4)?,
            n_comm: params.positive_int_or("n_comm", 2)?,
            npoints: params.positive_int("npoints")?,
            dt: self.dt,
        })
    }
}

impl Default for KuramotoModel {
    fn default() -> Self {
        Self { dt: 0.01, seed: 0 }
    }
}

impl Model for KuramotoModel {
    fn generate(&self, params: &Assignment) -> Result<DataBundle, SweepError> {
        let resolved = self.resolve(params)?;
        let mut rng = StdRng::seed_from_u64(call_seed(params, self.seed)?);
        let raw = simulate_kuramoto(&resolved, &mut rng);
        debug!(
            oscillators = resolved.oscillators(),
            coupling = resolved.coupling,
            beta = resolved.beta,
            npoints = resolved.npoints,
            "simulated kuramoto network"
        );
        Ok(shape_bundle(raw, params))
    }
}
