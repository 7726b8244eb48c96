//! Reference command-line front end for the shared core (spec §6):
//!
//! ```text
//! merson-sim <parameter_file> [<master_rank>] [<batch_upper_bounds>]
//! ```
//!
//! `batch_upper_bounds` is a comma-separated list of positive integers.
//! This binary plugs in the two built-in demo right-hand sides
//! (`decay`, `heat1d`) selected via the parameter script's `set
//! model=...` option — a production simulator links the library and
//! supplies its own [`merson_core::integrator::rhs::RightHandSide`]
//! instead of going through this binary at all.

use std::collections::HashMap;
use std::path::PathBuf;
use std::thread;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use merson_core::batch::{BatchEnumerator, LoopAxis, PostprocessFlags, PostprocessReaper};
use merson_core::dataset::memory::InMemoryDataset;
use merson_core::dataset::Dataset;
use merson_core::demos::decay::Decay;
use merson_core::demos::heat1d::Heat1D;
use merson_core::driver::{run_series, DriverFlags, IcondSource, ParameterRecord, TriggerCallback};
use merson_core::error::{CoreError, CoreResult};
use merson_core::grid::GridSpec;
use merson_core::integrator::rhs::{NoRebalance, RhsProvider, RightHandSide};
use merson_core::params::script::{Directive, InMemoryScript, ScriptSource};
use merson_core::params::{ExpressionEnv, ScalarEnv};
use merson_core::state::DeltaMode;
use merson_core::topology::Topology;

#[derive(Parser, Debug)]
#[command(name = "merson-sim", version, about = "Reference driver for merson-core")]
struct Cli {
    parameter_file: PathBuf,
    master_rank: Option<usize>,
    batch_upper_bounds: Option<String>,
}

fn main() {
    let _debug_log_guard = init_tracing();

    let cli = Cli::parse();
    let code = match run(&cli) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("{err}");
            eprintln!("merson-sim: {err}");
            err.exit_code()
        }
    };
    std::process::exit(code);
}

/// Installs the `tracing` subscriber: `RUST_LOG`-driven filtering to
/// stderr, plus a daily rolling debug logfile under `./logs` if one is
/// requested. Returns the appender's guard, which must stay alive for
/// the process's lifetime or the rolling writer's background flush
/// thread is dropped.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily("logs", "merson-sim.debug.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "merson_sim=info,merson_core=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    guard
}

/// One fully-parsed iteration of the parameter script: scalars resolved
/// into an env, commands bucketed by name (spec §4.6 PARSE).
struct ParsedScript {
    env: ScalarEnv,
    set_options: Vec<(String, Option<String>)>,
    icond_options: Vec<(String, Option<String>)>,
    grid_full: bool,
    continue_skip: bool,
    broke: bool,
}

fn parse_script(directives: &[Directive], loop_bindings: &HashMap<String, i64>) -> CoreResult<ParsedScript> {
    let mut env = ScalarEnv::new();
    for (name, value) in loop_bindings {
        env.set(name, *value as f64);
    }

    let mut set_options = Vec::new();
    let mut icond_options = Vec::new();
    let mut grid_full = false;
    let mut continue_skip = false;
    let mut broke = false;

    for directive in directives {
        match directive {
            Directive::Assignment { name, expr } => {
                let v = env.eval(expr)?;
                env.set(name, v);
            }
            Directive::Command { name, options } => match name.as_str() {
                "set" => set_options.extend(options.iter().cloned()),
                "icond" => icond_options.extend(options.iter().cloned()),
                "grid" => grid_full = options.iter().any(|(k, _)| k == "full"),
                "mnemonic" => {} // consumed ahead of time when building the batch enumerator
                "continue_if" => {
                    if let Some((expr, _)) = options.first() {
                        continue_skip = env.eval(expr)? != 0.0;
                    }
                }
                "break" => broke = true,
                other => {
                    return Err(CoreError::Configuration(format!("unrecognized command: {other}")));
                }
            },
        }
    }

    Ok(ParsedScript { env, set_options, icond_options, grid_full, continue_skip, broke })
}

fn required(env: &ScalarEnv, name: &str) -> CoreResult<f64> {
    env.get(name).ok_or_else(|| CoreError::Configuration(format!("missing required variable: {name}")))
}

fn build_parameter_record(env: &ScalarEnv) -> CoreResult<ParameterRecord> {
    let grid = GridSpec {
        n1: required(env, "n1")? as usize,
        n2: required(env, "n2")? as usize,
        n3_total: required(env, "n3_total")? as usize,
        bc: env.get("bc").unwrap_or(1.0) as usize,
        num_vars: env.get("num_vars").unwrap_or(1.0) as usize,
    };
    grid.validate()?;

    let delta_mode = match env.get("delta_mode").unwrap_or(0.0) as i64 {
        0 => DeltaMode::Local,
        _ => DeltaMode::Global,
    };

    let mut model_params = HashMap::new();
    for key in ["kappa", "dz"] {
        if let Some(v) = env.get(key) {
            model_params.insert(key.to_string(), v);
        }
    }

    Ok(ParameterRecord {
        l1: env.get("L1").unwrap_or(1.0),
        l2: env.get("L2").unwrap_or(1.0),
        l3: env.get("L3").unwrap_or(1.0),
        grid,
        t0: env.get("t0").unwrap_or(0.0),
        t_end: required(env, "t_end")?,
        total_snapshots: required(env, "total_snapshots")? as u32,
        start_snapshot: env.get("start_snapshot").unwrap_or(0.0) as u32,
        h_init: required(env, "h_init")?,
        h_min: env.get("h_min").unwrap_or(1e-10),
        delta: required(env, "delta")?,
        delta_mode,
        nan_handling: env.get("nan_handling").map(|v| v != 0.0).unwrap_or(false),
        model_params,
    })
}

fn option_value<'a>(options: &'a [(String, Option<String>)], key: &str) -> Option<&'a str> {
    options.iter().find(|(k, _)| k == key).and_then(|(_, v)| v.as_deref())
}

fn has_flag(options: &[(String, Option<String>)], key: &str) -> bool {
    options.iter().any(|(k, _)| k == key)
}

fn model_rhs(model_params: &HashMap<String, f64>, name: &str) -> CoreResult<Box<dyn RightHandSide>> {
    match name {
        "decay" => Ok(Box::new(Decay)),
        "heat1d" => {
            let kappa = model_params.get("kappa").copied().unwrap_or(1.0);
            let dz = model_params.get("dz").copied().unwrap_or(1.0);
            Ok(Box::new(Heat1D { kappa, dz }))
        }
        other => Err(CoreError::Configuration(format!("unknown model: {other}"))),
    }
}

/// Runs one iteration: builds the parameter record, topology, dataset,
/// and drives `run_series` to completion.
fn run_iteration(parsed: &ParsedScript, master_rank: usize, var_names: &[String]) -> CoreResult<()> {
    let params = build_parameter_record(&parsed.env)?;
    let model_name = option_value(&parsed.set_options, "model").unwrap_or("decay").to_string();

    let flags = DriverFlags {
        skip_initial_snapshot: has_flag(&parsed.set_options, "skip_icond"),
        continue_series: has_flag(&parsed.set_options, "continue_series"),
        emit_full_grid: parsed.grid_full,
    };

    let mut formulas = HashMap::new();
    for name in var_names {
        if let Some(expr) = option_value(&parsed.icond_options, name) {
            formulas.insert(name.clone(), expr.to_string());
        }
    }

    let snapshot_trigger = option_value(&parsed.set_options, "snapshot_trigger").map(PathBuf::from);

    // `MPIprocs` (spec §3's block-tiling formula) is ordinarily supplied by
    // the process launcher (`mpirun -np N`), external to the parameter
    // script. Simulating workers as threads in one process, we take it
    // from an optional `rank_count` scalar instead, falling back to the
    // host's available parallelism.
    let rank_count = parsed.env.get("rank_count").map(|v| v as usize).unwrap_or_else(num_cpus);
    let mut topo = Topology::init(rank_count, master_rank)?;

    let master_dataset_title = option_value(&parsed.set_options, "out_file").unwrap_or("<in-memory>").to_string();
    let model_params = params.model_params.clone();

    let handles: Vec<_> = topo
        .drain(..)
        .enumerate()
        .map(|(_rank, t)| {
            let params = params.clone();
            let flags = flags.clone();
            let formulas = formulas.clone();
            let var_names = var_names.to_vec();
            let model_name = model_name.clone();
            let model_params = model_params.clone();
            let snapshot_trigger = snapshot_trigger.clone();
            let title = master_dataset_title.clone();

            thread::spawn(move || -> CoreResult<()> {
                let rhs = model_rhs(&model_params, &model_name)?;
                struct OneShot(Box<dyn RightHandSide>);
                impl RhsProvider for OneShot {
                    fn resolve(&mut self, _step_count: u64) -> &dyn RightHandSide {
                        self.0.as_ref()
                    }
                }
                let mut provider = OneShot(rhs);
                let mut rebalance = NoRebalance;
                let mut callback = TriggerCallback::new(snapshot_trigger);

                // Per-snapshot variables (e.g. "u.5", "u.5.000" for an
                // on-demand dump within snapshot 5) are declared lazily by
                // `run_series` itself via `Dataset::ensure_var`, since the
                // on-demand count isn't known ahead of time.
                let mut dataset = InMemoryDataset::new();
                if t.is_master() {
                    dataset.put_attr_text("title", &title)?;
                }

                run_series(
                    &t,
                    &params,
                    &flags,
                    IcondSource::Formulas(formulas),
                    &var_names,
                    &mut provider,
                    Some(&mut rebalance),
                    &mut dataset,
                    &mut callback,
                )
            })
        })
        .collect();

    let mut first_err = None;
    for h in handles {
        if let Err(err) = h.join().expect("worker thread panicked") {
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }
    if let Some(err) = first_err {
        return Err(err);
    }
    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1).min(8)
}

fn run(cli: &Cli) -> CoreResult<()> {
    let text = std::fs::read_to_string(&cli.parameter_file)
        .map_err(|e| CoreError::Resource(format!("reading {:?}: {e}", cli.parameter_file)))?;
    let script = InMemoryScript::new(text);
    let directives = script.directives()?;

    let var_names = vec!["u".to_string()];
    let master_rank = cli.master_rank.unwrap_or(0);

    let Some(bounds_spec) = &cli.batch_upper_bounds else {
        let parsed = parse_script(&directives, &HashMap::new())?;
        if parsed.continue_skip || parsed.broke {
            return Ok(());
        }
        return run_iteration(&parsed, master_rank, &var_names);
    };

    let upper_bounds: Vec<u32> = bounds_spec
        .split(',')
        .map(|s| {
            s.trim()
                .parse::<u32>()
                .map_err(|_| CoreError::Configuration(format!("invalid batch upper bound: {s}")))
        })
        .collect::<CoreResult<_>>()?;
    let axes: Vec<LoopAxis> = upper_bounds.into_iter().map(LoopAxis::new).collect();
    let enumerator = BatchEnumerator::new(axes)?;

    let pproc_script = directives.iter().find_map(|d| match d {
        Directive::Command { name, options } if name == "set" => {
            option_value(options, "pproc_script").map(|s| s.to_string())
        }
        _ => None,
    });
    let pproc_flags = PostprocessFlags {
        nofail: directives.iter().any(|d| matches!(d, Directive::Command { name, options } if name == "set" && has_flag(options, "pproc_nofail"))),
        nowait: directives.iter().any(|d| matches!(d, Directive::Command { name, options } if name == "set" && has_flag(options, "pproc_nowait"))),
    };
    let mut reaper = PostprocessReaper::new();
    let tuples = enumerator.tuples();

    let progress = ProgressBar::new(tuples.len() as u64);
    progress.set_style(
        ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap()
            .progress_chars("=>-"),
    );
    progress.set_message("batch");

    for tuple in tuples {
        let bindings = enumerator.bindings_for(&tuple);
        let parsed = parse_script(&directives, &bindings)?;
        if parsed.broke {
            break;
        }
        if parsed.continue_skip {
            progress.inc(1);
            continue;
        }

        run_iteration(&parsed, master_rank, &var_names)?;

        if let Some(script) = &pproc_script {
            let suffix = enumerator.suffix_for(&tuple);
            let out_dir = merson_core::batch::ensure_output_dir(std::path::Path::new("."), &suffix)?;
            reaper.run(script, &out_dir, pproc_flags)?;
        }
        progress.inc(1);
    }
    progress.finish_with_message("batch complete");

    reaper.reap_all();
    Ok(())
}
