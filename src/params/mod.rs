//! Parameter script, expression evaluator, and multi-pass initial-
//! condition formula resolution (spec §4.6 ICOND *formula* mode, §9
//! design note). Supplemented scope per spec.md §1: the grammar and
//! evaluator are out of scope as an independent component, but the
//! driver needs the trait boundary plus a working reference
//! implementation to run standalone.

pub mod expr;
pub mod script;

use std::collections::HashMap;

use crate::error::{CoreError, CoreResult};
pub use expr::{ExpressionEnv, ScalarEnv};
pub use script::{Directive, InMemoryScript, ScriptSource};

/// Resolve one formula per named variable against a shared `env`,
/// iterating passes until every formula evaluates or a pass makes no
/// further progress (cyclic reference). Matches the §9 design note's
/// "topological dependency resolver": each pass attempts every
/// still-unresolved formula, terminating when a pass binds nothing new.
pub fn resolve_formulas(env: &mut ScalarEnv, formulas: &HashMap<String, String>) -> CoreResult<()> {
    let mut remaining: Vec<(&String, &String)> = formulas.iter().collect();

    loop {
        let before = remaining.len();
        let mut next_remaining = Vec::new();
        for (name, expr) in remaining {
            match env.eval(expr) {
                Ok(v) => env.set(name, v),
                Err(_) => next_remaining.push((name, expr)),
            }
        }
        remaining = next_remaining;
        if remaining.is_empty() {
            return Ok(());
        }
        if remaining.len() == before {
            let names: Vec<&str> = remaining.iter().map(|(n, _)| n.as_str()).collect();
            return Err(CoreError::Configuration(format!(
                "cyclic or unresolved initial-condition formulas: {}",
                names.join(", ")
            )));
        }
    }
}
