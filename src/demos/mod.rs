//! Self-contained reference scenarios exercising the integrator, ghost
//! exchange, and boundary modules end to end without a parameter script
//! or dataset backend. Mirrors the teacher's `examples/` demo-runner
//! convention: one module per scenario, a `run()` entry point the CLI's
//! `demo` subcommand can dispatch to by name.

pub mod decay;
pub mod heat1d;

/// Runs the named demo scenario, printing its result. Unknown names are
/// reported on stderr rather than panicking, since this is reachable
/// from the CLI with user-supplied input.
pub fn run_named(name: &str) {
    match name {
        "decay" => match decay::run() {
            Ok(x_final) => println!("decay: x(1) = {x_final:.10}"),
            Err(err) => eprintln!("decay failed: {err}"),
        },
        "heat1d" => match heat1d::run() {
            Ok(sums) => {
                for (rank, (initial, final_)) in sums.into_iter().enumerate() {
                    println!("heat1d: rank {rank} initial = {initial:.6}, final = {final_:.6}");
                }
            }
            Err(err) => eprintln!("heat1d failed: {err}"),
        },
        other => eprintln!("unknown demo {other:?}; available demos: decay, heat1d"),
    }
}
