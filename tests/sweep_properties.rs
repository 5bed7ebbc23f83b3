use std::sync::{Arc, Mutex};

use emergence_harness::measures::{time_lag, Metrics};
use emergence_harness::models::generator;
use emergence_harness::oracle::{
    DistributionFamily, OracleError, PhiIdAtoms, PhiIdOracle, RedundancyFunc, ShannonOracle,
    ShannonQuantity,
};
use emergence_harness::sweep::ERROR_COLUMN;
use emergence_harness::{
    compute_emergence, compute_emergence_with, get_result_for_measure, Assignment, Cell,
    DataBundle, FailurePolicy, Measure, MeasureSet, Model, ModelSet, MvarModel, ParameterManifest,
    PhiIdEmergence, ShannonEmergence, SweepError, SweepOptions, VariableLists,
};
use nalgebra::DMatrix;

struct FixedAtoms {
    calls: Mutex<Vec<(usize, RedundancyFunc)>>,
}

impl FixedAtoms {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl PhiIdOracle for FixedAtoms {
    fn phiid_full(
        &self,
        _micro: &DMatrix<f64>,
        time_lag: usize,
        redundancy: RedundancyFunc,
    ) -> Result<PhiIdAtoms, OracleError> {
        self.calls.lock().unwrap().push((time_lag, redundancy));
        Ok(PhiIdAtoms {
            str: 0.25,
            stx: 0.5,
            sty: 0.75,
            sts: 1.0,
            ..PhiIdAtoms::default()
        })
    }
}

struct ConstantShannon;

impl ShannonOracle for ConstantShannon {
    fn emergence(
        &self,
        _quantity: ShannonQuantity,
        _micro: &DMatrix<f64>,
        _macro_series: &DMatrix<f64>,
        _time_lag: usize,
        _family: DistributionFamily,
    ) -> Result<f64, OracleError> {
        Ok(0.5)
    }
}

fn closure_model() -> Arc<dyn Model> {
    Arc::new(|params: &Assignment| -> Result<DataBundle, SweepError> {
        let scale = params.number_or("coupling", 1.0)?;
        Ok(DataBundle::new(DMatrix::from_fn(2, 20, |i, j| {
            scale * (i as f64 + 1.0) * j as f64
        })))
    })
}

fn counting_measure(metrics: usize) -> Arc<dyn Measure> {
    Arc::new(
        move |data: &DataBundle, params: &Assignment| -> Result<Metrics, SweepError> {
            let total = data.micro()?.sum();
            let lag = time_lag(params)? as f64;
            Ok((0..metrics)
                .map(|idx| (format!("metric_{idx}"), total * lag + idx as f64))
                .collect())
        },
    )
}

fn data_without_nan() -> DataBundle {
    DataBundle::new(DMatrix::from_fn(2, 40, |i, j| ((i + 1) * j) as f64 * 0.01))
}

// ---------------------------------------------------------------------------
// Measure contracts
// ---------------------------------------------------------------------------

#[test]
fn measures_reject_bundles_without_micro() {
    let empty = DataBundle::default();
    let params = Assignment::new().with("time_lag", 1);

    let phiid = PhiIdEmergence::new(FixedAtoms::new());
    let err = phiid.evaluate(&empty, &params).unwrap_err();
    assert!(matches!(err, SweepError::InvalidArgument { .. }));

    let shannon = ShannonEmergence::new(Arc::new(ConstantShannon));
    let err = shannon.evaluate(&empty, &params).unwrap_err();
    assert!(matches!(err, SweepError::InvalidArgument { .. }));
}

#[test]
fn nan_micro_gives_all_nan_metrics() {
    let mut micro = DMatrix::from_element(2, 30, 0.3);
    micro[(1, 7)] = f64::NAN;
    let data = DataBundle::new(micro).with_macro(DMatrix::from_element(1, 30, 0.6));
    let params = Assignment::new().with("time_lag", 1);

    let oracle = FixedAtoms::new();
    let metrics = PhiIdEmergence::new(oracle.clone())
        .evaluate(&data, &params)
        .unwrap();
    assert_eq!(metrics.len(), 3);
    assert!(metrics.all_nan());
    assert!(oracle.calls.lock().unwrap().is_empty());

    let metrics = ShannonEmergence::new(Arc::new(ConstantShannon))
        .evaluate(&data, &params)
        .unwrap();
    assert_eq!(metrics.len(), 3);
    assert!(metrics.all_nan());
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

#[test]
fn row_count_is_combinations_times_metrics() {
    let manifest = ParameterManifest::new()
        .with("time_lag", [1, 2])
        .with("window", [0.1, 0.2, 0.3]);
    let measure = counting_measure(2);

    let table =
        get_result_for_measure(measure.as_ref(), &manifest, &data_without_nan(), "counting")
            .unwrap();
    assert_eq!(table.len(), 2 * 3 * 2);
    assert_eq!(
        table.columns(),
        vec!["value", "measure", "time_lag", "window"]
    );
    assert_eq!(table.measures(), vec!["metric_0", "metric_1"]);

    // Last parameter turns over fastest.
    let first_windows: Vec<_> = table
        .rows()
        .iter()
        .step_by(2)
        .map(|row| row.column("window").cloned())
        .collect();
    assert_eq!(first_windows[0], Some(Cell::Float(0.1)));
    assert_eq!(first_windows[1], Some(Cell::Float(0.2)));
    assert_eq!(first_windows[3], Some(Cell::Float(0.1)));
}

#[test]
fn single_metric_measures_still_emit_long_rows() {
    let manifest = ParameterManifest::new().with("time_lag", [1, 2, 3]);
    let table = get_result_for_measure(
        counting_measure(1).as_ref(),
        &manifest,
        &data_without_nan(),
        "single",
    )
    .unwrap();
    assert_eq!(table.len(), 3);
    assert!(table.rows().iter().all(|row| row.measure == "metric_0"));
}

#[test]
fn empty_measure_manifest_is_empty_result() {
    let err = get_result_for_measure(
        counting_measure(3).as_ref(),
        &ParameterManifest::new(),
        &data_without_nan(),
        "counting",
    )
    .unwrap_err();
    assert!(matches!(err, SweepError::EmptyResult(_)));

    let err = get_result_for_measure(
        counting_measure(3).as_ref(),
        &ParameterManifest::new().with("time_lag", [1]),
        &data_without_nan(),
        "  ",
    )
    .unwrap_err();
    assert!(matches!(err, SweepError::InvalidArgument { .. }));
}

#[test]
fn measures_without_metrics_are_empty_result() {
    let silent: Arc<dyn Measure> = Arc::new(
        |_: &DataBundle, _: &Assignment| -> Result<Metrics, SweepError> { Ok(Metrics::new()) },
    );

    let err = get_result_for_measure(
        silent.as_ref(),
        &ParameterManifest::new().with("k", [1]),
        &data_without_nan(),
        "silent",
    )
    .unwrap_err();
    assert!(matches!(err, SweepError::EmptyResult(_)));

    let models = ModelSet::new().with("net", closure_model());
    let measures = MeasureSet::new().with("silent", silent);
    let err = compute_emergence(
        &models,
        &VariableLists::new().with("net", ["coupling"]),
        &measures,
        &VariableLists::new().with("silent", Vec::<String>::new()),
        &ParameterManifest::new().with("coupling", [0.1, 0.2]),
    )
    .unwrap_err();
    assert!(matches!(err, SweepError::EmptyResult(_)));
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[test]
fn model_parameters_are_broadcast_per_combination() {
    let models = ModelSet::new().with("net", closure_model());
    let measures = MeasureSet::new().with("counting", counting_measure(2));
    let parameters = ParameterManifest::new()
        .with("coupling", [0.1, 0.2])
        .with("npoints", [20])
        .with("time_lag", [1, 2]);
    let model_variables = VariableLists::new().with("net", ["coupling", "npoints"]);
    let measure_variables = VariableLists::new().with("counting", ["time_lag"]);

    let table = compute_emergence(
        &models,
        &model_variables,
        &measures,
        &measure_variables,
        &parameters,
    )
    .unwrap();

    // 2 model combinations × 2 measure combinations × 2 metrics.
    assert_eq!(table.len(), 8);
    assert_eq!(
        table.columns(),
        vec!["value", "measure", "time_lag", "coupling", "npoints"]
    );
    for (idx, chunk) in table.rows().chunks(4).enumerate() {
        let coupling = if idx == 0 { 0.1 } else { 0.2 };
        for row in chunk {
            assert_eq!(row.column("coupling"), Some(&Cell::Float(coupling)));
            assert_eq!(row.column("npoints"), Some(&Cell::Int(20)));
        }
    }
}

#[test]
fn shared_parameters_reach_the_measure_once() {
    let lags = Arc::new(Mutex::new(Vec::new()));
    let seen = lags.clone();
    let measure: Arc<dyn Measure> = Arc::new(
        move |data: &DataBundle, params: &Assignment| -> Result<Metrics, SweepError> {
            let lag = time_lag(params)?;
            seen.lock().unwrap().push(lag);
            let total = data.micro()?.sum();
            Ok(Metrics::new()
                .with("total", total)
                .with("lagged", total * lag as f64))
        },
    );
    let models = ModelSet::new().with("net", closure_model());
    let measures = MeasureSet::new().with("lagged", measure);
    let parameters = ParameterManifest::new()
        .with("coupling", [0.1, 0.2])
        .with("time_lag", [3]);

    let table = compute_emergence(
        &models,
        &VariableLists::new().with("net", ["coupling", "time_lag"]),
        &measures,
        &VariableLists::new().with("lagged", ["time_lag"]),
        &parameters,
    )
    .unwrap();

    // One call per bundle, with the model's lag.
    assert_eq!(*lags.lock().unwrap(), vec![3, 3]);
    assert_eq!(table.len(), 2 * 2);
    let columns = table.columns();
    assert_eq!(columns.iter().filter(|c| c.as_str() == "time_lag").count(), 1);
    assert_eq!(columns, vec!["value", "measure", "coupling", "time_lag"]);
    assert!(table
        .rows()
        .iter()
        .all(|row| row.column("time_lag") == Some(&Cell::Int(3))));
}

#[test]
fn repeated_sweeps_are_identical_and_leave_declarations_alone() {
    let models = ModelSet::new().with("mvar", closure_model());
    let measures = MeasureSet::new().with("counting", counting_measure(2));
    let parameters = ParameterManifest::new()
        .with("coupling", [0.1, 0.3])
        .with("micro_func_mvar", [generator("identity").unwrap()])
        .with("time_lag", [1]);
    let model_variables = VariableLists::new().with("mvar", ["coupling", "micro_func_mvar"]);
    let measure_variables = VariableLists::new().with("counting", ["micro", "time_lag"]);
    let before = measure_variables.clone();

    let first = compute_emergence(
        &models,
        &model_variables,
        &measures,
        &measure_variables,
        &parameters,
    )
    .unwrap();
    let second = compute_emergence(
        &models,
        &model_variables,
        &measures,
        &measure_variables,
        &parameters,
    )
    .unwrap();

    assert_eq!(first.to_json_string().unwrap(), second.to_json_string().unwrap());
    assert_eq!(measure_variables, before);
    // The selector resolved to the model's key and is not duplicated.
    assert_eq!(
        first.columns(),
        vec!["value", "measure", "time_lag", "coupling", "micro_func_mvar"]
    );
    assert_eq!(
        first.rows()[0].column("micro_func_mvar"),
        Some(&Cell::Text("identity".to_string()))
    );
}

#[test]
fn two_node_network_with_phiid_gives_three_rows() {
    let oracle = FixedAtoms::new();
    let models = ModelSet::new().with("mvar", Arc::new(MvarModel::two_node()));
    let measures = MeasureSet::new().with("phiid", Arc::new(PhiIdEmergence::new(oracle.clone())));
    let parameters = ParameterManifest::new()
        .with("coupling", [0.1])
        .with("noise_corr", [0.5])
        .with("time_lag", [1])
        .with("npoints", [500])
        .with("redundancy_func", ["mmi"]);
    let model_variables =
        VariableLists::new().with("mvar", ["coupling", "noise_corr", "time_lag", "npoints"]);
    let measure_variables = VariableLists::new().with("phiid", ["redundancy_func"]);

    let table = compute_emergence(
        &models,
        &model_variables,
        &measures,
        &measure_variables,
        &parameters,
    )
    .unwrap();

    assert_eq!(table.len(), 3);
    assert_eq!(table.measures(), PhiIdEmergence::METRICS.to_vec());
    for row in table.rows() {
        assert_eq!(row.column("coupling"), Some(&Cell::Float(0.1)));
        assert_eq!(row.column("noise_corr"), Some(&Cell::Float(0.5)));
        assert_eq!(row.column("time_lag"), Some(&Cell::Int(1)));
        assert_eq!(row.column("npoints"), Some(&Cell::Int(500)));
        assert_eq!(
            row.column("redundancy_func"),
            Some(&Cell::Text("mmi".to_string()))
        );
    }
    let wpe = table.rows()[0].value;
    assert!((wpe - 2.5).abs() < 1e-12);
    assert_eq!(
        *oracle.calls.lock().unwrap(),
        vec![(1, RedundancyFunc::Mmi)]
    );
}

#[test]
fn empty_declarations_are_empty_result() {
    let parameters = ParameterManifest::new().with("coupling", [0.1]);
    let model_variables = VariableLists::new().with("net", ["coupling"]);

    let err = compute_emergence(
        &ModelSet::new().with("net", closure_model()),
        &model_variables,
        &MeasureSet::new(),
        &VariableLists::new(),
        &parameters,
    )
    .unwrap_err();
    assert!(matches!(err, SweepError::EmptyResult(_)));
}

#[test]
fn rows_scale_with_models_and_combinations() {
    let models = ModelSet::new()
        .with("a", closure_model())
        .with("b", closure_model());
    let measures = MeasureSet::new().with("counting", counting_measure(3));
    let parameters = ParameterManifest::new()
        .with("coupling", [0.1, 0.2])
        .with("noise_corr", [0.3, 0.6])
        .with("redundancy_func", ["mmi"]);
    let model_variables = VariableLists::new()
        .with("a", ["coupling"])
        .with("b", ["noise_corr"]);
    let measure_variables = VariableLists::new().with("counting", ["redundancy_func"]);

    let table = compute_emergence(
        &models,
        &model_variables,
        &measures,
        &measure_variables,
        &parameters,
    )
    .unwrap();
    assert_eq!(table.len(), 2 * 2 * 3);

    // Model b never declares coupling.
    assert!(table.rows()[6..]
        .iter()
        .all(|row| row.column("coupling").is_none() && row.column("noise_corr").is_some()));
}

#[test]
fn missing_declarations_fail_before_any_model_runs() {
    let calls = Arc::new(Mutex::new(0usize));
    let seen = calls.clone();
    let model: Arc<dyn Model> = Arc::new(move |_: &Assignment| -> Result<DataBundle, SweepError> {
        *seen.lock().unwrap() += 1;
        Ok(data_without_nan())
    });
    let parameters = ParameterManifest::new().with("coupling", [0.1]);

    let err = compute_emergence(
        &ModelSet::new().with("net", model),
        &VariableLists::new().with("net", ["coupling", "not_declared"]),
        &MeasureSet::new().with("counting", counting_measure(1)),
        &VariableLists::new().with("counting", ["time_lag"]),
        &parameters,
    )
    .unwrap_err();
    assert!(matches!(err, SweepError::InvalidArgument { .. }));
    assert_eq!(*calls.lock().unwrap(), 0);
}

#[test]
fn record_failure_keeps_sweeping_past_model_errors() {
    let failing: Arc<dyn Model> = Arc::new(|params: &Assignment| -> Result<DataBundle, SweepError> {
        let coupling = params.number("coupling")?;
        if coupling > 0.15 {
            return Err(SweepError::invalid("coupling", "unstable network"));
        }
        Ok(data_without_nan())
    });
    let models = ModelSet::new().with("net", failing);
    let measures = MeasureSet::new()
        .with("first", counting_measure(2))
        .with("second", counting_measure(1));
    let parameters = ParameterManifest::new()
        .with("coupling", [0.1, 0.2])
        .with("time_lag", [1]);
    let model_variables = VariableLists::new().with("net", ["coupling"]);
    let measure_variables = VariableLists::new()
        .with("first", ["time_lag"])
        .with("second", ["time_lag"]);

    let err = compute_emergence(
        &models,
        &model_variables,
        &measures,
        &measure_variables,
        &parameters,
    )
    .unwrap_err();
    assert!(matches!(err, SweepError::InvalidArgument { .. }));

    let options = SweepOptions {
        failure_policy: FailurePolicy::RecordFailure,
        resume: None,
    };
    let table = compute_emergence_with(
        &models,
        &model_variables,
        &measures,
        &measure_variables,
        &parameters,
        &options,
        None,
    )
    .unwrap();

    // Three healthy rows, then one failure row per measure.
    assert_eq!(table.len(), 3 + 2);
    let failed = &table.rows()[3..];
    assert_eq!(failed[0].measure, "first");
    assert_eq!(failed[1].measure, "second");
    for row in failed {
        assert!(row.value.is_nan());
        assert_eq!(row.column("coupling"), Some(&Cell::Float(0.2)));
        assert!(row
            .column(ERROR_COLUMN)
            .and_then(Cell::as_text)
            .unwrap()
            .contains("unstable network"));
    }
}
