//! Sweep orchestration.
//!
//! [`get_result_for_measure`] evaluates one measure over the Cartesian product
//! of its own parameters against one fixed data bundle. [`compute_emergence`]
//! drives the whole sweep: for every model and every combination of the
//! model's parameters it generates one bundle, evaluates every measure against
//! it, and broadcasts the model combination onto the resulting rows.
//!
//! Parameter ownership between a model and a measure is resolved per
//! (model, measure) pair:
//!
//! - A measure listing the literal name `micro` (or `macro`) is pointed at the
//!   manifest key carrying that data selector (e.g. `micro_func_mvar`).
//!   The key the current model declares wins; otherwise the last matching
//!   manifest key is used. Caller declarations are never modified.
//! - Names the model combination already fixes are not swept again by the
//!   measure. The measure still receives them, with the model's value, and
//!   they appear once in the row as model columns.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bundle::{DataBundle, MACRO, MICRO};
use crate::checkpoint::{Checkpoint, CheckpointBatch, CheckpointSink};
use crate::error::SweepError;
use crate::measures::Measure;
use crate::models::Model;
use crate::params::{Assignment, ParameterManifest, VariableLists};
use crate::table::{Cell, ResultRow, ResultTable};

/// Column carrying the error message of a recorded failure.
pub const ERROR_COLUMN: &str = "error";
/// Column carrying [`SweepError::code`] of a recorded failure.
pub const ERROR_CODE_COLUMN: &str = "error_code";

// =============================================================================
// Declarations
// =============================================================================

/// Name → implementation, in declaration order.
pub struct Declarations<T: ?Sized> {
    entries: IndexMap<String, Arc<T>>,
}

pub type ModelSet = Declarations<dyn Model>;
pub type MeasureSet = Declarations<dyn Measure>;

impl<T: ?Sized> Declarations<T> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, item: Arc<T>) -> Self {
        self.insert(name, item);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, item: Arc<T>) {
        self.entries.insert(name.into(), item);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<T>> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<T>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> Default for Declarations<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for Declarations<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Declarations<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

// =============================================================================
// Options
// =============================================================================

/// What to do when a model or measure call fails mid-sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the sweep with the error.
    #[default]
    FailFast,
    /// Emit one NaN row per affected measure with the message under
    /// [`ERROR_COLUMN`], then continue.
    RecordFailure,
}

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    pub failure_policy: FailurePolicy,
    /// Completed batches from an earlier run of the same plan. Their
    /// combinations are not recomputed; their rows are re-emitted in place.
    pub resume: Option<Checkpoint>,
}

// =============================================================================
// Result accumulator
// =============================================================================

/// One row per (metric × combination of `params`), in enumeration order.
///
/// An empty manifest is rejected with [`SweepError::EmptyResult`]: there is
/// nothing to enumerate.
pub fn get_result_for_measure(
    measure: &dyn Measure,
    params: &ParameterManifest,
    data: &DataBundle,
    measure_name: &str,
) -> Result<ResultTable, SweepError> {
    if measure_name.trim().is_empty() {
        return Err(SweepError::invalid(
            "measure_name",
            "must be a non-empty label",
        ));
    }
    if params.is_empty() {
        return Err(SweepError::empty(format!(
            "measure '{measure_name}' has no parameters to enumerate"
        )));
    }
    evaluate_grid(
        measure,
        params,
        data,
        measure_name,
        &Assignment::new(),
        FailurePolicy::FailFast,
    )
}

/// Evaluate `measure` at every combination of `own`, each merged with the
/// `fixed` values. Only `own` values become row columns.
fn evaluate_grid(
    measure: &dyn Measure,
    own: &ParameterManifest,
    data: &DataBundle,
    measure_name: &str,
    fixed: &Assignment,
    policy: FailurePolicy,
) -> Result<ResultTable, SweepError> {
    let mut rows = Vec::new();
    for combination in own.combinations() {
        let call = combination.merged(fixed);
        match measure.evaluate(data, &call) {
            Ok(metrics) => rows.extend(
                metrics
                    .iter()
                    .map(|(metric, value)| with_cells(ResultRow::new(value, metric), &combination)),
            ),
            Err(err) if policy == FailurePolicy::RecordFailure => {
                warn!(
                    measure = %measure_name,
                    params = %call.key(),
                    code = err.code(),
                    error = %err,
                    "measure failed; recording failure row"
                );
                rows.push(with_cells(failure_row(measure_name, &err), &combination));
            }
            Err(err) => return Err(err),
        }
    }

    // No combinations, or a measure that reported no metrics.
    if rows.is_empty() {
        return Err(SweepError::empty(format!(
            "measure '{measure_name}' produced no result rows"
        )));
    }
    Ok(ResultTable::from_rows(rows))
}

fn with_cells(mut row: ResultRow, assignment: &Assignment) -> ResultRow {
    for (name, cell) in assignment.cells() {
        row.set(name, cell);
    }
    row
}

fn failure_row(measure_name: &str, err: &SweepError) -> ResultRow {
    ResultRow::new(f64::NAN, measure_name)
        .with_column(ERROR_CODE_COLUMN, Cell::Text(err.code().to_string()))
        .with_column(ERROR_COLUMN, Cell::Text(err.to_string()))
}

// =============================================================================
// Name reconciliation
// =============================================================================

/// The measure's variable list with `micro`/`macro` pointed at the data
/// selector keys of the manifest. Returns a new list.
pub fn reconcile_measure_variables(
    measure_vars: &[String],
    parameters: &ParameterManifest,
    model_vars: &[String],
) -> Vec<String> {
    measure_vars
        .iter()
        .map(|var| {
            [MICRO, MACRO]
                .into_iter()
                .filter(|tag| var == tag)
                .find_map(|tag| selector_key(tag, parameters, model_vars))
                .unwrap_or_else(|| var.clone())
        })
        .collect()
}

fn selector_key(tag: &str, parameters: &ParameterManifest, model_vars: &[String]) -> Option<String> {
    model_vars
        .iter()
        .find(|name| name.contains(tag) && parameters.contains_key(name))
        .cloned()
        .or_else(|| {
            parameters
                .keys()
                .filter(|key| key.contains(tag))
                .last()
                .map(str::to_string)
        })
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Everything a sweep needs, owned.
#[derive(Debug, Clone, Default)]
pub struct SweepPlan {
    pub models: ModelSet,
    pub model_variables: VariableLists,
    pub measures: MeasureSet,
    pub measure_variables: VariableLists,
    pub parameters: ParameterManifest,
}

/// One measure as seen from one model: its own swept sub-manifest and the
/// names it takes from the model combination.
struct MeasureSlot<'a> {
    name: &'a str,
    measure: &'a dyn Measure,
    own: ParameterManifest,
    shared: Vec<String>,
}

impl SweepPlan {
    pub fn new(parameters: ParameterManifest) -> Self {
        Self {
            parameters,
            ..Self::default()
        }
    }

    pub fn with_model<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        model: Arc<dyn Model>,
        variables: impl IntoIterator<Item = S>,
    ) -> Self {
        let name = name.into();
        self.model_variables.insert(
            name.clone(),
            variables.into_iter().map(Into::into).collect(),
        );
        self.models.insert(name, model);
        self
    }

    pub fn with_measure<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        measure: Arc<dyn Measure>,
        variables: impl IntoIterator<Item = S>,
    ) -> Self {
        let name = name.into();
        self.measure_variables.insert(
            name.clone(),
            variables.into_iter().map(Into::into).collect(),
        );
        self.measures.insert(name, measure);
        self
    }

    fn model_vars(&self, model: &str) -> Result<&[String], SweepError> {
        self.model_variables.get(model).ok_or_else(|| {
            SweepError::invalid(
                "model_variables",
                format!("no variable list declared for model '{model}'"),
            )
        })
    }

    fn measure_vars(&self, measure: &str) -> Result<&[String], SweepError> {
        self.measure_variables.get(measure).ok_or_else(|| {
            SweepError::invalid(
                "measure_variables",
                format!("no variable list declared for measure '{measure}'"),
            )
        })
    }

    /// Check every declaration against the manifest before any computation.
    pub fn validate(&self) -> Result<(), SweepError> {
        self.model_variables.validate("model_variables")?;
        self.measure_variables.validate("measure_variables")?;
        if self.models.is_empty() {
            return Err(SweepError::empty("no model declarations"));
        }
        if self.measures.is_empty() {
            return Err(SweepError::empty("no measure declarations"));
        }
        for name in self.measures.names() {
            if name.trim().is_empty() {
                return Err(SweepError::invalid("measure_name", "must be a non-empty label"));
            }
        }
        for model in self.models.names() {
            if model.trim().is_empty() {
                return Err(SweepError::invalid("models", "model names must be non-empty"));
            }
            self.measure_slots(model)?;
        }
        Ok(())
    }

    fn measure_slots(&self, model: &str) -> Result<(ParameterManifest, Vec<MeasureSlot<'_>>), SweepError> {
        let model_vars = self.model_vars(model)?;
        let model_manifest = self.parameters.restrict(model_vars, model)?;

        let mut slots = Vec::with_capacity(self.measures.len());
        for (name, measure) in self.measures.iter() {
            let reconciled =
                reconcile_measure_variables(self.measure_vars(name)?, &self.parameters, model_vars);
            let (shared, own): (Vec<String>, Vec<String>) = reconciled
                .into_iter()
                .partition(|var| model_vars.contains(var));
            slots.push(MeasureSlot {
                name,
                measure: measure.as_ref(),
                own: self.parameters.restrict(&own, name)?,
                shared,
            });
        }
        Ok((model_manifest, slots))
    }

    /// Stable hash of the declarations and manifest. Model and measure
    /// internals (topology, oracle) are not part of it.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        feed(&mut hasher, "models");
        for name in self.models.names() {
            feed(&mut hasher, name);
            for var in self.model_variables.get(name).unwrap_or_default() {
                feed(&mut hasher, var);
            }
        }
        feed(&mut hasher, "measures");
        for name in self.measures.names() {
            feed(&mut hasher, name);
            for var in self.measure_variables.get(name).unwrap_or_default() {
                feed(&mut hasher, var);
            }
        }
        feed(&mut hasher, "parameters");
        for (name, values) in self.parameters.iter() {
            feed(&mut hasher, name);
            for value in values {
                feed(&mut hasher, &format!("{}:{}", value.kind(), value));
            }
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Total number of data bundles the sweep will generate.
    pub fn bundle_count(&self) -> Result<usize, SweepError> {
        let mut total = 0;
        for model in self.models.names() {
            total += self
                .parameters
                .restrict(self.model_vars(model)?, model)?
                .combination_count();
        }
        Ok(total)
    }

    pub fn run(
        &self,
        options: &SweepOptions,
        sink: Option<&dyn CheckpointSink>,
    ) -> Result<ResultTable, SweepError> {
        self.validate()?;
        let fingerprint = self.fingerprint();
        if let Some(checkpoint) = &options.resume {
            checkpoint.verify(&fingerprint)?;
        }
        info!(
            models = self.models.len(),
            measures = self.measures.len(),
            bundles = self.bundle_count()?,
            fingerprint = %&fingerprint[..12],
            "starting sweep"
        );

        let mut tables = Vec::new();
        let mut restored = 0usize;
        for (model_name, model) in self.models.iter() {
            let (model_manifest, slots) = self.measure_slots(model_name)?;
            info!(
                model = %model_name,
                combinations = model_manifest.combination_count(),
                "sweeping model"
            );

            for combination in model_manifest.combinations() {
                let key = combination.key();
                if let Some(snapshot) = options
                    .resume
                    .as_ref()
                    .and_then(|checkpoint| checkpoint.get(model_name, &key))
                {
                    debug!(model = %model_name, combination = %key, "restored from checkpoint");
                    tables.push(ResultTable::from_snapshot(snapshot.clone())?);
                    restored += 1;
                    continue;
                }

                debug!(model = %model_name, combination = %key, "generating data");
                let table =
                    run_combination(model.as_ref(), &combination, &slots, options.failure_policy)?;

                if let Some(sink) = sink {
                    sink.record(CheckpointBatch {
                        fingerprint: fingerprint.clone(),
                        model: model_name.to_string(),
                        combination: key,
                        rows: table.to_snapshot(),
                    })?;
                }
                tables.push(table);
            }
        }

        let table = ResultTable::concat(tables)?;
        if table.is_empty() {
            return Err(SweepError::empty("the sweep produced no result rows"));
        }
        info!(rows = table.len(), restored, "sweep finished");
        Ok(table)
    }
}

fn feed(hasher: &mut blake3::Hasher, part: &str) {
    hasher.update(part.as_bytes());
    hasher.update(&[0]);
}

/// One data bundle, every measure.
fn run_combination(
    model: &dyn Model,
    combination: &Assignment,
    slots: &[MeasureSlot<'_>],
    policy: FailurePolicy,
) -> Result<ResultTable, SweepError> {
    let data = match model.generate(combination) {
        Ok(data) => data,
        Err(err) if policy == FailurePolicy::RecordFailure => {
            warn!(
                combination = %combination.key(),
                code = err.code(),
                error = %err,
                "model failed; recording failure rows"
            );
            let mut table =
                ResultTable::from_rows(slots.iter().map(|s| failure_row(s.name, &err)).collect());
            table.broadcast(combination);
            return Ok(table);
        }
        Err(err) => return Err(err),
    };

    let mut table = ResultTable::new();
    for slot in slots {
        let mut fixed = Assignment::new();
        for name in &slot.shared {
            if let Some(value) = combination.get(name) {
                fixed.insert(name.clone(), value.clone());
            }
        }
        let mut sub = evaluate_grid(slot.measure, &slot.own, &data, slot.name, &fixed, policy)?;
        sub.broadcast(combination);
        table.append(sub);
    }
    Ok(table)
}

/// Run a full sweep, failing fast.
pub fn compute_emergence(
    models: &ModelSet,
    model_variables: &VariableLists,
    measures: &MeasureSet,
    measure_variables: &VariableLists,
    parameters: &ParameterManifest,
) -> Result<ResultTable, SweepError> {
    compute_emergence_with(
        models,
        model_variables,
        measures,
        measure_variables,
        parameters,
        &SweepOptions::default(),
        None,
    )
}

/// Run a full sweep with a failure policy, optional resume state and an
/// optional checkpoint sink.
pub fn compute_emergence_with(
    models: &ModelSet,
    model_variables: &VariableLists,
    measures: &MeasureSet,
    measure_variables: &VariableLists,
    parameters: &ParameterManifest,
    options: &SweepOptions,
    sink: Option<&dyn CheckpointSink>,
) -> Result<ResultTable, SweepError> {
    let plan = SweepPlan {
        models: models.clone(),
        model_variables: model_variables.clone(),
        measures: measures.clone(),
        measure_variables: measure_variables.clone(),
        parameters: parameters.clone(),
    };
    plan.run(options, sink)
}
