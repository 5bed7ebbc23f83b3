//! Sweep configuration files.
//!
//! A sweep is described in TOML or JSON (picked by file extension):
//!
//! ```toml
//! [parameters]
//! coupling = { linspace = { start = 0.01, stop = 0.45, num = 10 } }
//! noise_corr = [0.0, 0.3, 0.6, 0.9]
//! time_lag = [1]
//! npoints = [2000]
//! micro_func_mvar = [{ generator = "identity" }]
//! macro_func_mvar = [{ generator = "sum" }]
//! redundancy_func = ["mmi", "ccs"]
//!
//! [models.mvar]
//! kind = "mvar"
//! variables = ["coupling", "noise_corr", "time_lag", "npoints", "micro_func_mvar", "macro_func_mvar"]
//!
//! [measures.phiid_wpe]
//! kind = "phiid_wpe"
//! variables = ["micro", "time_lag", "redundancy_func"]
//!
//! [engine]
//! program = "octave-engine"
//! ```
//!
//! Key order is significant: it is the enumeration order of the sweep.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SweepError;
use crate::measures::{Measure, PhiIdAtomsMeasure, PhiIdEmergence, ShannonEmergence};
use crate::models::{generator, KuramotoModel, Model, MvarModel, Topology};
use crate::oracle::{EngineConfig, EngineSession};
use crate::params::{linspace, ParamValue, ParameterManifest};
use crate::sweep::{FailurePolicy, SweepOptions, SweepPlan};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default)]
    pub parameters: IndexMap<String, ValueList>,
    pub models: IndexMap<String, ModelSpec>,
    pub measures: IndexMap<String, MeasureSpec>,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub options: ConfigOptions,
}

/// Candidate values for one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueList {
    Linspace { linspace: LinspaceSpec },
    Values(Vec<ValueSpec>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinspaceSpec {
    pub start: f64,
    pub stop: f64,
    pub num: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
    Int(i64),
    Float(f64),
    Text(String),
    Generator { generator: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelSpec {
    Mvar {
        variables: Vec<String>,
        #[serde(default = "default_nodes")]
        nodes: usize,
        #[serde(default)]
        topology: Topology,
        #[serde(default)]
        seed: u64,
    },
    Kuramoto {
        variables: Vec<String>,
        #[serde(default = "default_dt")]
        dt: f64,
        #[serde(default)]
        seed: u64,
    },
}

fn default_nodes() -> usize {
    2
}

fn default_dt() -> f64 {
    0.01
}

impl ModelSpec {
    pub fn variables(&self) -> &[String] {
        match self {
            Self::Mvar { variables, .. } | Self::Kuramoto { variables, .. } => variables,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeasureSpec {
    PhiidWpe { variables: Vec<String> },
    PhiidAtoms { variables: Vec<String> },
    ShannonWpe { variables: Vec<String> },
}

impl MeasureSpec {
    pub fn variables(&self) -> &[String] {
        match self {
            Self::PhiidWpe { variables }
            | Self::PhiidAtoms { variables }
            | Self::ShannonWpe { variables } => variables,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOptions {
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: impl AsRef<Path>) -> Result<SweepConfig, SweepError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SweepError::config(format!("failed to read {}: {e}", path.display())))?;
    let config = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => SweepConfig::from_toml_str(&raw)?,
        Some("json") => SweepConfig::from_json_str(&raw)?,
        _ => {
            return Err(SweepError::config(format!(
                "unsupported config extension for {} (expected .toml or .json)",
                path.display()
            )))
        }
    };
    info!(
        path = %path.display(),
        models = config.models.len(),
        measures = config.measures.len(),
        parameters = config.parameters.len(),
        "loaded sweep config"
    );
    Ok(config)
}

impl SweepConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, SweepError> {
        let config: SweepConfig = toml::from_str(raw)
            .map_err(|e| SweepError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, SweepError> {
        let config: SweepConfig = serde_json::from_str(raw)
            .map_err(|e| SweepError::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Everything that can be checked without running anything.
    pub fn validate(&self) -> Result<(), SweepError> {
        self.manifest()?;
        for (name, spec) in &self.models {
            validate_model_spec(name, spec)?;
        }
        if self.needs_engine() && self.engine.is_none() {
            return Err(SweepError::config(
                "declared measures need a numerical engine but no [engine] section is present",
            ));
        }
        if let Some(engine) = &self.engine {
            if engine.program.trim().is_empty() {
                return Err(SweepError::config("engine program must be non-empty"));
            }
        }
        Ok(())
    }

    pub fn manifest(&self) -> Result<ParameterManifest, SweepError> {
        let mut manifest = ParameterManifest::new();
        for (name, list) in &self.parameters {
            manifest.insert(name.clone(), resolve_values(name, list)?);
        }
        Ok(manifest)
    }

    pub fn needs_engine(&self) -> bool {
        !self.measures.is_empty()
    }

    /// Start the engine session if one is configured.
    pub fn start_engine(&self) -> Result<Option<Arc<EngineSession>>, SweepError> {
        match &self.engine {
            Some(engine) => Ok(Some(Arc::new(EngineSession::start(engine)?))),
            None => Ok(None),
        }
    }

    pub fn model(&self, name: &str) -> Result<Arc<dyn Model>, SweepError> {
        let spec = self
            .models
            .get(name)
            .ok_or_else(|| SweepError::config(format!("unknown model '{name}'")))?;
        model_from_spec(name, spec)
    }

    pub fn sweep_options(&self) -> SweepOptions {
        SweepOptions {
            failure_policy: self.options.failure_policy,
            resume: None,
        }
    }

    /// Resolve into a runnable plan. Measures receive `engine` as their
    /// oracle.
    pub fn build_plan(&self, engine: Option<Arc<EngineSession>>) -> Result<SweepPlan, SweepError> {
        let mut plan = SweepPlan::new(self.manifest()?);
        for (name, spec) in &self.models {
            plan = plan.with_model(name.clone(), model_from_spec(name, spec)?, spec.variables().iter().cloned());
        }
        for (name, spec) in &self.measures {
            let engine = engine.clone().ok_or_else(|| {
                SweepError::config(format!("measure '{name}' needs a numerical engine"))
            })?;
            plan = plan.with_measure(
                name.clone(),
                measure_from_spec(spec, engine),
                spec.variables().iter().cloned(),
            );
        }
        Ok(plan)
    }
}

fn resolve_values(name: &str, list: &ValueList) -> Result<Vec<ParamValue>, SweepError> {
    match list {
        ValueList::Linspace { linspace: grid } => {
            if grid.num == 0 {
                return Err(SweepError::config(format!(
                    "parameter '{name}': linspace num must be >= 1"
                )));
            }
            if !(grid.start.is_finite() && grid.stop.is_finite()) {
                return Err(SweepError::config(format!(
                    "parameter '{name}': linspace bounds must be finite"
                )));
            }
            Ok(linspace(grid.start, grid.stop, grid.num)
                .into_iter()
                .map(ParamValue::Float)
                .collect())
        }
        ValueList::Values(values) => values
            .iter()
            .map(|value| match value {
                ValueSpec::Int(v) => Ok(ParamValue::Int(*v)),
                ValueSpec::Float(v) => Ok(ParamValue::Float(*v)),
                ValueSpec::Text(v) => Ok(ParamValue::Text(v.clone())),
                ValueSpec::Generator { generator: g } => generator(g)
                    .map(ParamValue::Generator)
                    .ok_or_else(|| {
                        SweepError::config(format!("parameter '{name}': unknown generator '{g}'"))
                    }),
            })
            .collect(),
    }
}

fn validate_model_spec(name: &str, spec: &ModelSpec) -> Result<(), SweepError> {
    match spec {
        ModelSpec::Mvar { nodes, .. } => {
            if *nodes < 2 {
                return Err(SweepError::config(format!(
                    "model '{name}': nodes must be >= 2"
                )));
            }
        }
        ModelSpec::Kuramoto { dt, .. } => {
            if !(dt.is_finite() && *dt > 0.0) {
                return Err(SweepError::config(format!("model '{name}': dt must be > 0")));
            }
        }
    }
    Ok(())
}

pub fn model_from_spec(name: &str, spec: &ModelSpec) -> Result<Arc<dyn Model>, SweepError> {
    validate_model_spec(name, spec)?;
    Ok(match spec {
        ModelSpec::Mvar {
            nodes,
            topology,
            seed,
            ..
        } => Arc::new(MvarModel::new(*nodes, *topology)?.with_seed(*seed)),
        ModelSpec::Kuramoto { dt, seed, .. } => Arc::new(KuramotoModel::new(*dt)?.with_seed(*seed)),
    })
}

pub fn measure_from_spec(spec: &MeasureSpec, engine: Arc<EngineSession>) -> Arc<dyn Measure> {
    match spec {
        MeasureSpec::PhiidWpe { .. } => Arc::new(PhiIdEmergence::new(engine)),
        MeasureSpec::PhiidAtoms { .. } => Arc::new(PhiIdAtomsMeasure::new(engine)),
        MeasureSpec::ShannonWpe { .. } => Arc::new(ShannonEmergence::new(engine)),
    }
}
