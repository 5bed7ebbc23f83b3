#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use emergence_harness::checkpoint::{Checkpoint, CheckpointSink, JsonlCheckpointSink};
use emergence_harness::config::load_config_from_path;
use emergence_harness::models::{generator, GENERATORS};
use emergence_harness::params::ParamValue;
use emergence_harness::sweep::FailurePolicy;
use emergence_harness::table::{Cell, ResultTable};

#[derive(Parser)]
#[command(name = "emergence", version, about = "Causal emergence sweep CLI")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep described by a TOML/JSON config
    Sweep {
        #[arg(long)]
        config: PathBuf,
        /// Result table (JSON snapshot)
        #[arg(long)]
        out: PathBuf,
        /// Also write the table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
        /// Persist completed combinations to this JSONL file
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Skip combinations already in --checkpoint
        #[arg(long)]
        resume: bool,
        /// Record failing model/measure calls as NaN rows instead of aborting
        #[arg(long)]
        record_failures: bool,
    },
    /// Pivot one measure of a result table onto a 2D grid (CSV)
    Heatmap {
        #[arg(long)]
        table: PathBuf,
        #[arg(long)]
        measure: String,
        /// Column filter, e.g. `time_lag=1` (repeatable)
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long, default_value = "coupling")]
        rows: String,
        #[arg(long, default_value = "noise_corr")]
        cols: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Generate one data bundle from a configured model (CSV)
    Simulate {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        model: String,
        /// Override a parameter, e.g. `coupling=0.3` or `macro_func_mvar=gen:sum`
        #[arg(long = "set")]
        overrides: Vec<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// List named micro/macro generators
    Generators,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Sweep {
            config,
            out,
            csv,
            checkpoint,
            resume,
            record_failures,
        } => {
            if resume && checkpoint.is_none() {
                return Err("--resume requires --checkpoint".into());
            }
            let config = load_config_from_path(&config)?;
            let mut options = config.sweep_options();
            if record_failures {
                options.failure_policy = FailurePolicy::RecordFailure;
            }
            if let Some(path) = checkpoint.as_ref().filter(|p| resume && p.exists()) {
                options.resume = Some(Checkpoint::load(path)?);
            }

            let engine = config.start_engine()?;
            let plan = config.build_plan(engine.clone())?;

            let (sink, worker) = match &checkpoint {
                Some(path) if resume => {
                    let (sink, worker) = JsonlCheckpointSink::append(path)?;
                    (Some(sink), Some(worker))
                }
                Some(path) => {
                    let (sink, worker) = JsonlCheckpointSink::new(path)?;
                    (Some(sink), Some(worker))
                }
                None => (None, None),
            };

            let result = plan.run(
                &options,
                sink.as_ref().map(|s| s as &dyn CheckpointSink),
            );

            drop(sink);
            if let Some(worker) = worker {
                worker.join()?;
            }
            drop(plan);
            if let Some(engine) = engine {
                engine.close()?;
            }

            let table = result?;
            table.save_json(&out)?;
            if let Some(csv) = csv {
                let mut writer = BufWriter::new(File::create(&csv)?);
                table.write_csv(&mut writer)?;
                writer.flush()?;
            }
            info!(rows = table.len(), out = %out.display(), "sweep written");
            println!("wrote {} rows to {}", table.len(), out.display());
        }
        Commands::Heatmap {
            table,
            measure,
            filters,
            rows,
            cols,
            out,
        } => {
            let table = ResultTable::load_json(&table)?;
            let filters = filters
                .iter()
                .map(|raw| parse_pair(raw).map(|(k, v)| (k, Cell::parse_literal(&v))))
                .collect::<Result<Vec<_>, _>>()?;
            let heatmap = table.heatmap(&measure, &filters, &rows, &cols)?;
            let mut writer = BufWriter::new(File::create(&out)?);
            heatmap.write_csv(&mut writer)?;
            writer.flush()?;
            println!(
                "wrote {}x{} grid for {} to {}",
                heatmap.row_values.len(),
                heatmap.col_values.len(),
                measure,
                out.display()
            );
        }
        Commands::Simulate {
            config,
            model,
            overrides,
            out,
        } => {
            let config = load_config_from_path(&config)?;
            let spec = config
                .models
                .get(&model)
                .ok_or_else(|| format!("unknown model '{model}'"))?;
            let instance = config.model(&model)?;

            // First combination of the model's own grid, then overrides.
            let manifest = config.manifest()?.restrict(spec.variables(), &model)?;
            let mut params = manifest.combinations().next().unwrap_or_default();
            for raw in &overrides {
                let (name, value) = parse_pair(raw)?;
                params.insert(name, parse_param(&value)?);
            }

            let bundle = instance.generate(&params)?;
            let mut writer = BufWriter::new(File::create(&out)?);
            bundle.write_csv(&mut writer)?;
            writer.flush()?;
            println!("simulated {model} ({}) to {}", params.key(), out.display());
        }
        Commands::Generators => {
            for (name, description) in GENERATORS {
                println!("{name}\t{description}");
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn parse_param(raw: &str) -> Result<ParamValue, String> {
    if let Some(name) = raw.strip_prefix("gen:") {
        return generator(name)
            .map(ParamValue::Generator)
            .ok_or_else(|| format!("unknown generator '{name}'"));
    }
    Ok(match Cell::parse_literal(raw) {
        Cell::Int(v) => ParamValue::Int(v),
        Cell::Float(v) => ParamValue::Float(v),
        Cell::Text(v) => ParamValue::Text(v),
    })
}
