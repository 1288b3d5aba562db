//! Verifier configuration.
//!
//! All solver- and strategy-related knobs live here. The struct is
//! serde-derived so embedders can load it from JSON; every field has a
//! default, so `Config::default()` is a working configuration whenever `z3`
//! is on the `PATH`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the solver binary location.
pub const Z3_EXE_ENV: &str = "OPALINE_Z3_EXE";

/// How `assert` discharges a goal against the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionMode {
    /// `(push) (assert (not G)) (check-sat) (pop)` — simple, but churns the
    /// solver stack.
    #[serde(rename = "push-pop")]
    PushPop,
    /// Mint a fresh boolean guard `g`, assert `g => !G` once, then
    /// `(check-sat g)` — avoids stack churn at the cost of accumulating
    /// guarded clauses.
    #[serde(rename = "soft-constraints")]
    SoftConstraints,
}

/// Solver and strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the Z3 binary. `None` means: consult [`Z3_EXE_ENV`], then
    /// fall back to `z3` on the `PATH`. A set value is still overridden by
    /// the environment variable.
    pub z3_exe: Option<String>,

    /// Extra arguments passed to the solver, space-separated.
    pub z3_args: String,

    /// Default per-query timeout in milliseconds. `0` disables the timeout.
    pub z3_timeout: u32,

    /// Directory for per-verifier solver logs; `None` disables logging.
    pub log_dir: Option<PathBuf>,

    /// How goals are discharged.
    pub assertion_mode: AssertionMode,

    /// Timeout (ms) for the optional in-loop depleted checks of the
    /// quantified-permission split algorithm. The final must-check always
    /// runs without a timeout.
    pub split_timeout: u32,

    /// Skip the hint-based candidate reordering in the split algorithm.
    pub disable_chunk_order_heuristics: bool,

    /// Omit generated triggers on inverse-function and non-null axioms.
    pub disable_isc_triggers: bool,

    /// Fetch `(get-model)` after failed assertions, for IDE integration.
    pub ide_mode_advanced: bool,

    /// Emit the predicate trigger function when producing predicate
    /// instances.
    pub enable_predicate_triggers_on_inhale: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            z3_exe: None,
            z3_args: String::new(),
            z3_timeout: 10_000,
            log_dir: None,
            assertion_mode: AssertionMode::PushPop,
            split_timeout: 500,
            disable_chunk_order_heuristics: false,
            disable_isc_triggers: false,
            ide_mode_advanced: false,
            enable_predicate_triggers_on_inhale: false,
        }
    }
}

impl Config {
    /// The solver binary to spawn, after applying the environment override.
    pub fn resolve_z3_exe(&self) -> String {
        if let Ok(path) = std::env::var(Z3_EXE_ENV) {
            if !path.is_empty() {
                return path;
            }
        }
        self.z3_exe.clone().unwrap_or_else(|| "z3".to_string())
    }

    /// Extra solver arguments, split on whitespace.
    pub fn z3_args_vec(&self) -> Vec<String> {
        self.z3_args
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }

    /// The log file for the verifier with the given id, if logging is on.
    pub fn z3_log_file(&self, id: &str) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("prover_{}.smt2", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_usable() {
        let c = Config::default();
        assert_eq!(c.assertion_mode, AssertionMode::PushPop);
        assert!(c.z3_timeout > 0);
        assert!(c.z3_log_file("00").is_none());
    }

    #[test]
    fn args_split_on_whitespace() {
        let c = Config {
            z3_args: "smt.arith.solver=2  model.v2=true".to_string(),
            ..Config::default()
        };
        assert_eq!(c.z3_args_vec(), vec!["smt.arith.solver=2", "model.v2=true"]);
    }

    #[test]
    fn log_file_is_per_verifier() {
        let c = Config {
            log_dir: Some(PathBuf::from("/tmp/opaline")),
            ..Config::default()
        };
        assert_eq!(
            c.z3_log_file("m01"),
            Some(PathBuf::from("/tmp/opaline/prover_m01.smt2"))
        );
    }

    #[test]
    fn assertion_mode_serializes_kebab_case() {
        let j = serde_json::to_string(&AssertionMode::SoftConstraints).unwrap();
        assert_eq!(j, "\"soft-constraints\"");
        let back: AssertionMode = serde_json::from_str("\"push-pop\"").unwrap();
        assert_eq!(back, AssertionMode::PushPop);
    }
}
