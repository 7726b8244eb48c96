//! Batch & Postprocess (spec §4.9): Cartesian-product nested loop over up
//! to 20 counters, per-iteration output directories, `continue_if`/`break`
//! directives, and an optional postprocess shell invocation in wait or
//! concurrent mode.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::error::{CoreError, CoreResult};

pub const MAX_BATCH_AXES: usize = 20;

/// One nested loop counter: an upper bound and optional mnemonic labels
/// (spec §6 `mnemonic` command).
#[derive(Debug, Clone)]
pub struct LoopAxis {
    pub upper_bound: u32,
    pub labels: Option<Vec<String>>,
}

impl LoopAxis {
    pub fn new(upper_bound: u32) -> Self {
        Self { upper_bound, labels: None }
    }

    pub fn with_labels(upper_bound: u32, labels: Vec<String>) -> Self {
        Self { upper_bound, labels: Some(labels) }
    }

    /// The variable-string suffix for 1-based counter `i`: the label if
    /// present, else the zero-padded number.
    fn suffix(&self, i: u32) -> String {
        if let Some(labels) = &self.labels {
            labels
                .get((i - 1) as usize)
                .cloned()
                .unwrap_or_else(|| format!("{i:03}"))
        } else {
            let width = self.upper_bound.to_string().len();
            format!("{i:0width$}", width = width)
        }
    }
}

/// Enumerates the Cartesian product of 1-based counters
/// `(i1, ..., iN)` over `axes`, innermost axis advancing fastest —
/// matching spec §8's `(2,3)` bounds producing `(1,1)(1,2)(1,3)(2,1)...`.
pub struct BatchEnumerator {
    axes: Vec<LoopAxis>,
}

impl BatchEnumerator {
    pub fn new(axes: Vec<LoopAxis>) -> CoreResult<Self> {
        if axes.len() > MAX_BATCH_AXES {
            return Err(CoreError::Configuration(format!(
                "batch loop supports at most {MAX_BATCH_AXES} nested axes, got {}",
                axes.len()
            )));
        }
        if axes.iter().any(|a| a.upper_bound == 0) {
            return Err(CoreError::Configuration("batch loop upper bound must be >= 1".into()));
        }
        Ok(Self { axes })
    }

    /// All tuples in enumeration order.
    pub fn tuples(&self) -> Vec<Vec<u32>> {
        let mut out = vec![vec![]];
        for axis in &self.axes {
            let mut next = Vec::with_capacity(out.len() * axis.upper_bound as usize);
            for prefix in &out {
                for i in 1..=axis.upper_bound {
                    let mut t = prefix.clone();
                    t.push(i);
                    next.push(t);
                }
            }
            out = next;
        }
        out
    }

    /// The output-directory suffix for one tuple: `_` joined per-axis
    /// suffixes.
    pub fn suffix_for(&self, tuple: &[u32]) -> String {
        self.axes
            .iter()
            .zip(tuple.iter())
            .map(|(axis, &i)| axis.suffix(i))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Loop-counter bindings (`i1`, `i2`, ...) for one tuple, to be made
    /// visible to the expression evaluator before re-entering PARSE.
    pub fn bindings_for(&self, tuple: &[u32]) -> HashMap<String, i64> {
        tuple
            .iter()
            .enumerate()
            .map(|(axis, &i)| (format!("i{}", axis + 1), i as i64))
            .collect()
    }
}

/// Ensures the per-iteration output directory exists, creating it (and
/// its parents) if absent.
pub fn ensure_output_dir(base: &Path, suffix: &str) -> CoreResult<PathBuf> {
    let dir = base.join(suffix);
    std::fs::create_dir_all(&dir)
        .map_err(|e| CoreError::Resource(format!("creating batch output directory {dir:?}: {e}")))?;
    Ok(dir)
}

/// Whether to escalate a nonzero postprocess exit into a hard stop.
#[derive(Debug, Clone, Copy)]
pub struct PostprocessFlags {
    pub nofail: bool,
    pub nowait: bool,
}

/// Tracks concurrently spawned postprocess children so they can all be
/// reaped before the simulator exits (spec §8 scenario 6).
#[derive(Default)]
pub struct PostprocessReaper {
    children: Vec<Child>,
}

impl PostprocessReaper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the postprocess script for one batch iteration. In `nowait`
    /// mode the child is spawned detached (stdout/stderr to null) and
    /// tracked for later reaping; the call returns immediately. Otherwise
    /// the script runs to completion and a nonzero exit becomes a hard
    /// error unless `nofail` is set.
    pub fn run(&mut self, script: &str, output_dir: &Path, flags: PostprocessFlags) -> CoreResult<()> {
        let mut cmd = Command::new(script);
        cmd.arg(output_dir);

        if flags.nowait {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
            let child = cmd
                .spawn()
                .map_err(|e| CoreError::Resource(format!("spawning postprocess script {script}: {e}")))?;
            lower_priority(&child);
            self.children.push(child);
            Ok(())
        } else {
            let status = cmd
                .status()
                .map_err(|e| CoreError::Resource(format!("running postprocess script {script}: {e}")))?;
            if !status.success() && !flags.nofail {
                return Err(CoreError::Postprocess {
                    code: status.code().unwrap_or(1),
                    message: format!("postprocess script {script} failed"),
                });
            }
            Ok(())
        }
    }

    /// Waits for every tracked child, discarding results (errors here are
    /// not escalated — by the time we reap, the simulation has already
    /// finished).
    pub fn reap_all(&mut self) {
        for mut child in self.children.drain(..) {
            let _ = child.wait();
        }
    }
}

impl Drop for PostprocessReaper {
    fn drop(&mut self) {
        self.reap_all();
    }
}

/// Pushes a concurrent postprocess child to near-minimum scheduling
/// priority (spec §4.9) so it doesn't contend with the next batch
/// iteration's own workers. Best-effort: a failure (e.g. permission
/// denied) is not escalated, since priority is a fairness concern, not a
/// correctness one.
#[cfg(unix)]
fn lower_priority(child: &Child) {
    // SAFETY: setpriority with PRIO_PROCESS only touches scheduling
    // metadata for the given pid and cannot violate memory safety; its
    // return value is discarded deliberately, per the doc comment above.
    unsafe {
        libc::setpriority(libc::PRIO_PROCESS, child.id() as libc::id_t, 19);
    }
}

#[cfg(not(unix))]
fn lower_priority(_child: &Child) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_enumeration_matches_spec_example() {
        let axes = vec![LoopAxis::new(2), LoopAxis::new(3)];
        let en = BatchEnumerator::new(axes).unwrap();
        assert_eq!(
            en.tuples(),
            vec![vec![1, 1], vec![1, 2], vec![1, 3], vec![2, 1], vec![2, 2], vec![2, 3]]
        );
    }

    #[test]
    fn rejects_too_many_axes() {
        let axes = vec![LoopAxis::new(2); MAX_BATCH_AXES + 1];
        assert!(BatchEnumerator::new(axes).is_err());
    }

    #[test]
    fn suffix_uses_labels_when_present() {
        let axes = vec![LoopAxis::with_labels(2, vec!["lo".into(), "hi".into()])];
        let en = BatchEnumerator::new(axes).unwrap();
        assert_eq!(en.suffix_for(&[1]), "lo");
        assert_eq!(en.suffix_for(&[2]), "hi");
    }

    #[test]
    fn output_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ensure_output_dir(tmp.path(), "run_001").unwrap();
        assert!(dir.is_dir());
    }
}
