//! Driver State Machine (spec §4.6): the master-side top-level loop —
//! parse, distribute, build an initial condition, run snapshot-by-
//! snapshot integration, emit datasets, and hand control back to the
//! batch loop. Workers other than the master only ever see `run`; they
//! have no PARSE/ICOND branching of their own beyond what `run` drives
//! them through cooperatively.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::Dataset;
use crate::error::{CoreError, CoreResult};
use crate::grid::{BlockLayout, ChunkList, GridSpec};
use crate::integrator::rhs::{RebalanceHook, RhsProvider, ServiceCallback, StepContext};
use crate::integrator::{integrate, Outcome};
use crate::logbuf::LogBuffer;
use crate::snapshot::{gather_variable, scatter_variable, GridExtent};
use crate::state::block::Block;
use crate::state::{DeltaMode, IntegrationState};
use crate::topology::Topology;

/// Model-independent parameters the driver needs to build a layout and
/// drive the integrator (spec §3 "Driver state"). Model-specific scalars
/// (e.g. diffusivity) live in `model_params` and are handed to the
/// right-hand side out of band — the driver never interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub l1: f64,
    pub l2: f64,
    pub l3: f64,
    pub grid: GridSpec,
    pub t0: f64,
    pub t_end: f64,
    pub total_snapshots: u32,
    pub start_snapshot: u32,
    pub h_init: f64,
    pub h_min: f64,
    pub delta: f64,
    pub delta_mode: DeltaMode,
    pub nan_handling: bool,
    pub model_params: HashMap<String, f64>,
}

/// Flags controlling driver behavior beyond the numeric record (spec §6
/// `set` command options relevant to the core, not application-specific
/// ones like output path formatting).
#[derive(Debug, Clone, Default)]
pub struct DriverFlags {
    pub skip_initial_snapshot: bool,
    pub continue_series: bool,
    pub emit_full_grid: bool,
}

/// Where the initial condition comes from (spec §4.6 ICOND).
pub enum IcondSource<'a> {
    /// Multi-pass formula evaluation, one formula per variable name.
    Formulas(HashMap<String, String>),
    /// Read from an already-open dataset; grid dimensions present there
    /// override or must match the parameter record's.
    File(&'a mut dyn Dataset),
}

/// Per-step hook bundling the service callback's two responsibilities
/// (spec §4.10): a structured debug-log line, and polling for a snapshot
/// trigger file. Only ever invoked on the master.
pub struct TriggerCallback {
    pub log: LogBuffer,
    pub trigger_path: Option<PathBuf>,
    pub on_demand_counter: u32,
}

impl TriggerCallback {
    pub fn new(trigger_path: Option<PathBuf>) -> Self {
        Self { log: LogBuffer::new(), trigger_path, on_demand_counter: 0 }
    }
}

impl ServiceCallback for TriggerCallback {
    fn on_accepted_step(&mut self, ctx: &StepContext) -> bool {
        self.log.append(&format!(
            "t={:.6} h={:.3e} steps={} next_deadline={:.6} wall/sim={:.3}",
            ctx.t, ctx.h, ctx.steps, ctx.next_snapshot_deadline, ctx.wall_per_sim_time
        ));
        self.log.commit(false);

        if let Some(path) = &self.trigger_path {
            if path.exists() {
                let _ = std::fs::remove_file(path);
                return true;
            }
        }
        false
    }
}

/// Computes the snapshot deadline `t_k` for snapshot index `k` (spec
/// §4.6 RUN_SNAP): `t0 + (t_end - t0) * (k - k0) / (N - 1 - k0)`.
pub fn snapshot_deadline(t0: f64, t_end: f64, k: u32, k0: u32, total_snapshots: u32) -> f64 {
    if total_snapshots <= 1 + k0 {
        return t_end;
    }
    t0 + (t_end - t0) * ((k - k0) as f64) / ((total_snapshots - 1 - k0) as f64)
}

/// Runs every worker cooperatively through DISTRIBUTE, ICOND, and the
/// RUN_SNAP/EMIT loop for one batch iteration. `var_names` lists the
/// per-cell variables in the block, in storage order. Boundary setup and
/// ghost exchange are not driven from here — per `RightHandSide::eval`'s
/// contract, a correct right-hand side performs both on `x` itself before
/// differencing, since only it knows the stencil width its terms need.
#[allow(clippy::too_many_arguments)]
pub fn run_series(
    topo: &Topology,
    params: &ParameterRecord,
    flags: &DriverFlags,
    icond: IcondSource,
    var_names: &[String],
    rhs: &mut dyn RhsProvider,
    mut rebalance: Option<&mut dyn RebalanceHook>,
    dataset: &mut dyn Dataset,
    callback: &mut TriggerCallback,
) -> CoreResult<()> {
    // DISTRIBUTE: every worker already has its own copy of `params` in
    // this in-process simulation (no separate blob broadcast is needed
    // because there is no separate address space); the collective
    // discipline is still honored by every worker reaching the same
    // barrier before proceeding.
    topo.barrier();

    let layout = BlockLayout::for_rank(params.grid, topo.my_rank(), topo.rank_count())?;
    let mut block = Block::zeros(layout);
    let mut chunks = ChunkList::default_for(&layout);
    chunks.validate_covers_interior(&layout)?;

    build_initial_condition(topo, &mut block, var_names, icond)?;

    let extent = if flags.emit_full_grid { GridExtent::Full } else { GridExtent::Inner };
    let grid = params.grid;

    let mut state = IntegrationState::new(
        block,
        params.t0,
        params.h_init,
        params.h_min,
        params.delta,
        params.delta_mode,
    );

    let k0 = params.start_snapshot;
    if !flags.skip_initial_snapshot {
        emit_snapshot(topo, &state.x, var_names, k0, extent, grid, dataset)?;
    }

    let mut k = k0 + 1;
    while k < params.total_snapshots {
        let deadline = snapshot_deadline(params.t0, params.t_end, k, k0, params.total_snapshots);
        tracing::debug!(snapshot = k, deadline, "entering RUN_SNAP");

        loop {
            let outcome = integrate(
                topo,
                &mut state,
                deadline,
                &mut chunks,
                rhs,
                params.nan_handling,
                deadline,
                Some(callback),
                rebalance.as_deref_mut(),
            )?;
            match outcome {
                Outcome::Completed => break,
                Outcome::Interrupted => {
                    let suffix = format!(".{:03}", callback.on_demand_counter);
                    callback.on_demand_counter += 1;
                    emit_snapshot_named(topo, &state.x, var_names, &format!("{k}{suffix}"), extent, grid, dataset)?;
                }
            }
        }

        callback.on_demand_counter = 0;
        emit_snapshot(topo, &state.x, var_names, k, extent, grid, dataset)?;
        tracing::info!(snapshot = k, t = state.t, "emitted snapshot");
        k += 1;
    }

    topo.finalize_and_wait();
    Ok(())
}

fn build_initial_condition(
    topo: &Topology,
    block: &mut Block,
    var_names: &[String],
    icond: IcondSource,
) -> CoreResult<()> {
    match icond {
        IcondSource::Formulas(formulas) => {
            let mut env = crate::params::ScalarEnv::new();
            crate::params::resolve_formulas(&mut env, &formulas)?;
            for (variable, name) in var_names.iter().enumerate() {
                let layout = block.layout;
                let mut values = Vec::with_capacity(layout.interior_range_k().count()
                    * layout.interior_range_j().count()
                    * layout.interior_range_i().count());
                for _k in layout.interior_range_k() {
                    for _j in layout.interior_range_j() {
                        for _i in layout.interior_range_i() {
                            let v = env.get(name).ok_or_else(|| {
                                CoreError::Configuration(format!("no initial-condition formula for {name}"))
                            })?;
                            values.push(v);
                        }
                    }
                }
                block.fill_interior(variable, values.into_iter());
            }
            Ok(())
        }
        IcondSource::File(dataset) => {
            for (variable, name) in var_names.iter().enumerate() {
                scatter_variable(topo, block, variable, name, GridExtent::Inner, dataset)?;
            }
            Ok(())
        }
    }
}

fn emit_snapshot(
    topo: &Topology,
    block: &Block,
    var_names: &[String],
    k: u32,
    extent: GridExtent,
    grid: GridSpec,
    dataset: &mut dyn Dataset,
) -> CoreResult<()> {
    emit_snapshot_named(topo, block, var_names, &k.to_string(), extent, grid, dataset)
}

fn emit_snapshot_named(
    topo: &Topology,
    block: &Block,
    var_names: &[String],
    label: &str,
    extent: GridExtent,
    grid: GridSpec,
    dataset: &mut dyn Dataset,
) -> CoreResult<()> {
    let dims = [grid.n3_total, grid.n2, grid.n1];
    for (variable, name) in var_names.iter().enumerate() {
        let snapshot_var = format!("{name}.{label}");
        dataset.ensure_var(&snapshot_var, &dims)?;
        gather_variable(topo, block, variable, &snapshot_var, extent, dataset)?;
    }
    Ok(())
}

/// Series continuation (spec §4.6, §8 "Series continuation"): if the
/// initial-condition dataset carries the reserved annotations, override
/// `params` so the run resumes transparently instead of starting over at
/// snapshot zero.
pub fn apply_series_continuation(params: &mut ParameterRecord, dataset: &dyn Dataset) -> CoreResult<bool> {
    use crate::dataset::reserved_attrs;

    let snapshot = dataset.get_attr_int(reserved_attrs::SNAPSHOT)?;
    let total_snapshots = dataset.get_attr_int(reserved_attrs::TOTAL_SNAPSHOTS)?;
    let t = dataset.get_attr_double(reserved_attrs::T)?;
    let final_time = dataset.get_attr_double(reserved_attrs::FINAL_TIME)?;
    let tau = dataset.get_attr_double(reserved_attrs::TAU)?;

    let (Some(snapshot), Some(total_snapshots), Some(t), Some(final_time), Some(tau)) =
        (snapshot, total_snapshots, t, final_time, tau)
    else {
        return Ok(false);
    };

    params.start_snapshot = snapshot as u32;
    params.total_snapshots = total_snapshots as u32;
    params.t0 = t;
    params.t_end = final_time;
    params.h_init = tau;
    Ok(true)
}

/// Polls `path`, returning `true` once and only once per occurrence (spec
/// §4.6 "on-demand trigger"). Exposed separately from `TriggerCallback`
/// for direct unit testing.
pub fn trigger_present(path: &Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_deadline_matches_linear_schedule() {
        let d = snapshot_deadline(0.0, 10.0, 5, 0, 11);
        assert!((d - 5.0).abs() < 1e-12);
    }

    #[test]
    fn emit_snapshot_named_keeps_snapshots_distinct() {
        use crate::dataset::memory::InMemoryDataset;

        let mut topo = Topology::init(1, 0).unwrap();
        let t = topo.remove(0);
        let grid = GridSpec { n1: 1, n2: 1, n3_total: 1, bc: 1, num_vars: 1 };
        let layout = BlockLayout::for_rank(grid, 0, 1).unwrap();
        let var_names = vec!["u".to_string()];
        let mut dataset = InMemoryDataset::new();

        let mut block = Block::zeros(layout);
        block.set(0, 1, 1, 1, 1.0);
        emit_snapshot(&t, &block, &var_names, 0, GridExtent::Inner, grid, &mut dataset).unwrap();

        block.set(0, 1, 1, 1, 2.0);
        emit_snapshot(&t, &block, &var_names, 1, GridExtent::Inner, grid, &mut dataset).unwrap();

        let h0 = dataset.lookup_var("u.0").unwrap();
        let h1 = dataset.lookup_var("u.1").unwrap();
        let mut buf = [0.0; 1];
        dataset.read_var_slab(h0, &[0, 0, 0], &[1, 1, 1], &mut buf).unwrap();
        assert_eq!(buf[0], 1.0);
        dataset.read_var_slab(h1, &[0, 0, 0], &[1, 1, 1], &mut buf).unwrap();
        assert_eq!(buf[0], 2.0);
    }

    #[test]
    fn series_continuation_overrides_params() {
        use crate::dataset::memory::InMemoryDataset;

        let mut ds = InMemoryDataset::new();
        ds.put_attr_int("snapshot", 5).unwrap();
        ds.put_attr_int("total_snapshots", 10).unwrap();
        ds.put_attr_double("t", 2.5).unwrap();
        ds.put_attr_double("final_time", 5.0).unwrap();
        ds.put_attr_double("tau", 0.01).unwrap();

        let mut params = ParameterRecord {
            l1: 1.0,
            l2: 1.0,
            l3: 1.0,
            grid: GridSpec { n1: 1, n2: 1, n3_total: 1, bc: 1, num_vars: 1 },
            t0: 0.0,
            t_end: 1.0,
            total_snapshots: 3,
            start_snapshot: 0,
            h_init: 0.1,
            h_min: 1e-8,
            delta: 1e-6,
            delta_mode: DeltaMode::Local,
            nan_handling: false,
            model_params: HashMap::new(),
        };
        let resumed = apply_series_continuation(&mut params, &ds).unwrap();
        assert!(resumed);
        assert_eq!(params.start_snapshot, 5);
        assert_eq!(params.total_snapshots, 10);
        assert_eq!(params.t0, 2.5);
        assert_eq!(params.t_end, 5.0);
        assert_eq!(params.h_init, 0.01);
    }

    #[test]
    fn parameter_record_round_trips_as_a_blob() {
        // Spec §4.6 DISTRIBUTE describes broadcasting the parameter
        // record as a single opaque blob; `serde_json` is the encoding
        // a worker on the other end of `Topology::broadcast_bytes` would
        // decode it with.
        let params = ParameterRecord {
            l1: 1.0,
            l2: 2.0,
            l3: 3.0,
            grid: GridSpec { n1: 4, n2: 5, n3_total: 6, bc: 1, num_vars: 1 },
            t0: 0.0,
            t_end: 1.0,
            total_snapshots: 10,
            start_snapshot: 0,
            h_init: 0.01,
            h_min: 1e-9,
            delta: 1e-6,
            delta_mode: DeltaMode::Local,
            nan_handling: false,
            model_params: HashMap::new(),
        };
        let blob = serde_json::to_vec(&params).unwrap();
        let decoded: ParameterRecord = serde_json::from_slice(&blob).unwrap();
        assert_eq!(decoded.grid, params.grid);
        assert_eq!(decoded.total_snapshots, params.total_snapshots);
        assert_eq!(decoded.delta_mode, params.delta_mode);
    }

    #[test]
    fn trigger_file_detected_and_consumed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("trigger");
        std::fs::write(&path, b"").unwrap();
        let mut cb = TriggerCallback::new(Some(path.clone()));
        let ctx = StepContext { next_snapshot_deadline: 1.0, t: 0.5, h: 0.1, steps: 3, wall_per_sim_time: 1.0 };
        assert!(cb.on_accepted_step(&ctx));
        assert!(!path.exists());
    }
}
