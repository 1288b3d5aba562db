//! The solver subprocess driver.
//!
//! One [`SmtDriver`] owns one Z3 process and talks SMT-LIB2 to it over
//! stdin/stdout, line by line. The dialog is strictly synchronous: every
//! command that answers `success` has its answer consumed before the next
//! command is written, so requests and responses can never slip out of
//! phase. `WARNING` lines may arrive interleaved and are logged and skipped.
//!
//! The driver keeps a verbatim copy of every outgoing line in a log file
//! (when configured), caches the last `:timeout` value so the option is only
//! re-emitted on change, and tracks the push/pop depth for the lock-step
//! invariant with the decider's path-condition stack.
//!
//! Lifecycle: `Created → Initialised → Running → Stopped`, with `Erroneous`
//! terminal when the binary cannot be spawned. Any other transition is a
//! programming error and aborts.

use crate::config::{AssertionMode, Config};
use crate::error::{ProverError, ProverResult};
use crate::preamble;
use crate::printer::{decl_to_smt, term_to_smt, Decl};
use log::{debug, trace, warn};
use opaline_term::{Function, Sort, Term};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

/// How long `stop` waits for the solver to exit before killing it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Lifecycle states of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProverState {
    Created,
    Initialised,
    Running,
    Stopped,
    /// Terminal: the solver binary could not be spawned.
    Erroneous,
}

/// Answer of a `(check-sat)` query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown,
}

/// A Z3 subprocess with a line-oriented SMT-LIB2 dialog.
pub struct SmtDriver {
    config: Config,
    verifier_id: String,
    state: ProverState,
    child: Option<Child>,
    stdin: Option<BufWriter<ChildStdin>>,
    stdout: Option<BufReader<ChildStdout>>,
    log: Option<BufWriter<std::fs::File>>,
    push_pop_scope_depth: u32,
    last_timeout: Option<u32>,
    counters: BTreeMap<String, u32>,
    last_model: Option<String>,
}

impl SmtDriver {
    /// Creates a driver in the `Created` state; no process is spawned yet.
    pub fn new(config: Config, verifier_id: impl Into<String>) -> Self {
        Self {
            config,
            verifier_id: verifier_id.into(),
            state: ProverState::Created,
            child: None,
            stdin: None,
            stdout: None,
            log: None,
            push_pop_scope_depth: 0,
            last_timeout: None,
            counters: BTreeMap::new(),
            last_model: None,
        }
    }

    pub fn state(&self) -> ProverState {
        self.state
    }

    /// The current push/pop depth, for the lock-step debug invariant.
    pub fn scope_depth(&self) -> u32 {
        self.push_pop_scope_depth
    }

    fn transition(&mut self, to: ProverState) {
        use ProverState::*;
        let ok = matches!(
            (self.state, to),
            (Created, Initialised)
                | (Created, Erroneous)
                | (Initialised, Running)
                | (Running, Stopped)
                | (Initialised, Stopped)
        );
        if !ok {
            panic!(
                "invalid prover state transition: {:?} -> {:?}",
                self.state, to
            );
        }
        self.state = to;
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawns the solver, configures it, and emits the static preamble.
    pub fn start(&mut self) -> ProverResult<()> {
        let exe = self.config.resolve_z3_exe();
        let mut cmd = Command::new(&exe);
        cmd.arg("-smt2")
            .arg("-in")
            .args(self.config.z3_args_vec())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.state = ProverState::Erroneous;
                return Err(ProverError::dependency_not_found(exe, e.to_string()));
            }
        };

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProverError::interaction_failed("a stdin pipe", "none"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProverError::interaction_failed("a stdout pipe", "none"))?;
        self.stdin = Some(BufWriter::new(stdin));
        self.stdout = Some(BufReader::new(stdout));
        self.child = Some(child);
        self.transition(ProverState::Initialised);

        if let Some(path) = self.config.z3_log_file(&self.verifier_id) {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ProverError::io("create log directory", e))?;
            }
            let file = std::fs::File::create(&path)
                .map_err(|e| ProverError::io("create prover log", e))?;
            self.log = Some(BufWriter::new(file));
        }

        self.configure()?;
        for cmd in preamble::basic_preamble() {
            self.emit(&cmd)?;
        }
        self.transition(ProverState::Running);

        match self.version() {
            Ok(version) => debug!("prover {} started: {}", self.verifier_id, version),
            Err(e) => warn!("could not query prover version: {}", e),
        }
        Ok(())
    }

    fn configure(&mut self) -> ProverResult<()> {
        self.write_line("(set-option :print-success true)")?;
        self.read_success()?;
        self.write_line("(set-option :global-declarations true)")?;
        self.read_success()?;
        self.write_line("(set-option :smtlib2_compliant true)")?;
        self.read_success()?;
        self.last_timeout = None;
        self.set_timeout(None)?;
        Ok(())
    }

    /// Resets the solver to a clean state, keeping the process alive.
    ///
    /// All declarations and assertions are dropped; options are re-applied
    /// because `(reset)` restores solver defaults.
    pub fn reset(&mut self) -> ProverResult<()> {
        self.write_line("(reset)")?;
        // Whether the reset itself still answers `success` depends on when
        // the solver drops the print-success option; sync on an echo marker
        // instead of guessing, swallowing any stray answer before it.
        self.write_line("(echo \"opaline-sync\")")?;
        loop {
            let line = self.read_line("opaline-sync")?;
            if line.contains("opaline-sync") {
                break;
            }
        }
        self.push_pop_scope_depth = 0;
        self.last_model = None;
        self.configure()?;
        for cmd in preamble::basic_preamble() {
            self.emit(&cmd)?;
        }
        Ok(())
    }

    /// Shuts the solver down: closes stdin, waits up to ten seconds, then
    /// kills the process. Flushes and closes the log file.
    pub fn stop(&mut self) -> ProverResult<()> {
        if matches!(self.state, ProverState::Running | ProverState::Initialised) {
            self.transition(ProverState::Stopped);
        } else {
            return Ok(());
        }

        // Dropping the writer closes the pipe; most solvers exit on EOF.
        self.stdin = None;
        self.stdout = None;

        if let Some(child) = self.child.as_mut() {
            let deadline = Instant::now() + SHUTDOWN_GRACE;
            loop {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        debug!("prover {} exited: {}", self.verifier_id, status);
                        break;
                    }
                    Ok(None) => {
                        if Instant::now() >= deadline {
                            warn!("prover {} did not exit; killing", self.verifier_id);
                            let _ = child.kill();
                            let _ = child.wait();
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        let _ = child.kill();
                        return Err(ProverError::io("wait for prover exit", e));
                    }
                }
            }
        }
        self.child = None;

        if let Some(mut log) = self.log.take() {
            log.flush().map_err(|e| ProverError::io("flush prover log", e))?;
        }
        Ok(())
    }

    // =========================================================================
    // Raw dialog
    // =========================================================================

    fn write_line(&mut self, line: &str) -> ProverResult<()> {
        trace!("prover {} <- {}", self.verifier_id, line);
        if let Some(log) = self.log.as_mut() {
            let _ = writeln!(log, "{}", line);
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| ProverError::interaction_failed("an open stdin pipe", "closed"))?;
        writeln!(stdin, "{}", line).map_err(|e| ProverError::io("write to prover stdin", e))?;
        stdin
            .flush()
            .map_err(|e| ProverError::io("flush prover stdin", e))?;
        Ok(())
    }

    /// Reads the next meaningful line, tolerating interleaved warnings.
    fn read_line(&mut self, expected: &str) -> ProverResult<String> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| ProverError::interaction_failed(expected, ""))?;
        loop {
            let mut line = String::new();
            let n = stdout
                .read_line(&mut line)
                .map_err(|e| ProverError::io("read from prover stdout", e))?;
            if n == 0 {
                return Err(ProverError::interaction_failed(expected, ""));
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with("WARNING") {
                warn!("prover {}: {}", self.verifier_id, line);
                continue;
            }
            trace!("prover {} -> {}", self.verifier_id, line);
            return Ok(line.to_string());
        }
    }

    fn read_success(&mut self) -> ProverResult<()> {
        let line = self.read_line("success")?;
        if line == "success" {
            Ok(())
        } else {
            Err(ProverError::interaction_failed("success", line))
        }
    }

    /// Writes one command and consumes its `success` answer.
    fn emit(&mut self, cmd: &str) -> ProverResult<()> {
        self.write_line(cmd)?;
        self.read_success()
    }

    /// Reads a parenthesized block (model, statistics), possibly spanning
    /// multiple lines.
    fn read_block(&mut self, expected: &str) -> ProverResult<String> {
        let mut block = String::new();
        let mut depth: i64 = 0;
        loop {
            let line = self.read_line(expected)?;
            depth += line.matches('(').count() as i64;
            depth -= line.matches(')').count() as i64;
            if !block.is_empty() {
                block.push('\n');
            }
            block.push_str(&line);
            if depth <= 0 {
                return Ok(block);
            }
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Writes a comment into the prover log (not sent to the solver).
    pub fn comment(&mut self, text: &str) {
        if let Some(log) = self.log.as_mut() {
            for line in text.lines() {
                let _ = writeln!(log, "; {}", line);
            }
        }
    }

    pub fn push(&mut self, n: u32) -> ProverResult<()> {
        self.emit(&format!("(push {})", n))?;
        self.push_pop_scope_depth += n;
        Ok(())
    }

    pub fn pop(&mut self, n: u32) -> ProverResult<()> {
        debug_assert!(self.push_pop_scope_depth >= n, "pop below the preamble");
        self.emit(&format!("(pop {})", n))?;
        self.push_pop_scope_depth -= n;
        Ok(())
    }

    /// Asserts a term as a fact.
    pub fn assume(&mut self, term: &Term) -> ProverResult<()> {
        self.emit(&format!("(assert {})", term_to_smt(term)))
    }

    /// Asserts a pre-rendered SMT-LIB command (theory instantiations).
    pub fn emit_raw(&mut self, cmd: &str) -> ProverResult<()> {
        self.emit(cmd)
    }

    /// Ships a declaration.
    pub fn declare(&mut self, decl: &Decl) -> ProverResult<()> {
        self.emit(&decl_to_smt(decl))
    }

    /// Mints a fresh name with the given prefix; unique per driver.
    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let n = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{}@{}", prefix, n);
        *n += 1;
        name
    }

    /// Mints, declares, and returns a fresh uninterpreted function.
    pub fn fresh_function(
        &mut self,
        prefix: &str,
        arg_sorts: Vec<Sort>,
        result_sort: Sort,
    ) -> ProverResult<Function> {
        let name = self.fresh_name(prefix);
        let function = Function::new(name, arg_sorts, result_sort);
        self.declare(&Decl::Func(function.clone()))?;
        Ok(function)
    }

    fn set_timeout(&mut self, timeout: Option<u32>) -> ProverResult<()> {
        let effective = timeout.unwrap_or(self.config.z3_timeout);
        if self.last_timeout != Some(effective) {
            self.emit(&format!("(set-option :timeout {})", effective))?;
            self.last_timeout = Some(effective);
        }
        Ok(())
    }

    /// Checks satisfiability of the current assertion stack.
    pub fn check(&mut self, timeout: Option<u32>) -> ProverResult<SatResult> {
        self.set_timeout(timeout)?;
        self.write_line("(check-sat)")?;
        self.read_sat_result()
    }

    fn read_sat_result(&mut self) -> ProverResult<SatResult> {
        match self.read_line("sat|unsat|unknown")?.as_str() {
            "sat" => Ok(SatResult::Sat),
            "unsat" => Ok(SatResult::Unsat),
            "unknown" => Ok(SatResult::Unknown),
            other => Err(ProverError::interaction_failed("sat|unsat|unknown", other)),
        }
    }

    /// Attempts to prove `goal` under the current assertions.
    ///
    /// Returns `true` iff the negated goal is unsatisfiable. `unknown`
    /// counts as not proved. In push-pop mode with `ide_mode_advanced`, a
    /// model is fetched on failure and kept for [`Self::last_model`].
    pub fn assert_goal(&mut self, goal: &Term, timeout: Option<u32>) -> ProverResult<bool> {
        match self.config.assertion_mode {
            AssertionMode::PushPop => {
                self.push(1)?;
                self.emit(&format!("(assert (not {}))", term_to_smt(goal)))?;
                self.set_timeout(timeout)?;
                self.write_line("(check-sat)")?;
                let result = self.read_sat_result()?;
                if result != SatResult::Unsat && self.config.ide_mode_advanced {
                    self.fetch_model()?;
                }
                self.pop(1)?;
                Ok(result == SatResult::Unsat)
            }
            AssertionMode::SoftConstraints => {
                let guard = self.fresh_name("grd");
                self.declare(&Decl::Const {
                    name: guard.clone(),
                    sort: Sort::Bool,
                })?;
                self.emit(&format!(
                    "(assert (=> {} (not {})))",
                    guard,
                    term_to_smt(goal)
                ))?;
                self.set_timeout(timeout)?;
                self.write_line(&format!("(check-sat {})", guard))?;
                let result = self.read_sat_result()?;
                if result != SatResult::Unsat && self.config.ide_mode_advanced {
                    self.fetch_model()?;
                }
                Ok(result == SatResult::Unsat)
            }
        }
    }

    fn fetch_model(&mut self) -> ProverResult<()> {
        self.write_line("(get-model)")?;
        let model = self.read_block("a model")?;
        self.last_model = Some(model);
        Ok(())
    }

    /// The most recent model fetched after a failed assertion.
    pub fn last_model(&self) -> Option<&str> {
        self.last_model.as_deref()
    }

    /// The solver's version string.
    pub fn version(&mut self) -> ProverResult<String> {
        self.write_line("(get-info :version)")?;
        let line = self.read_block("version info")?;
        Ok(line
            .trim_start_matches('(')
            .trim_end_matches(')')
            .trim_start_matches(":version")
            .trim()
            .trim_matches('"')
            .to_string())
    }

    /// Solver statistics as a key/value map.
    pub fn statistics(&mut self) -> ProverResult<BTreeMap<String, String>> {
        self.write_line("(get-info :all-statistics)")?;
        let block = self.read_block("statistics")?;
        let mut stats = BTreeMap::new();
        let cleaned = block.replace(['(', ')'], " ");
        let mut tokens = cleaned.split_whitespace().peekable();
        while let Some(tok) = tokens.next() {
            if let Some(key) = tok.strip_prefix(':') {
                let value = tokens
                    .peek()
                    .filter(|v| !v.starts_with(':'))
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                if !value.is_empty() {
                    tokens.next();
                }
                stats.insert(key.to_string(), value);
            }
        }
        Ok(stats)
    }
}

impl Drop for SmtDriver {
    fn drop(&mut self) {
        if matches!(self.state, ProverState::Running | ProverState::Initialised) {
            if let Err(e) = self.stop() {
                warn!("prover {} shutdown failed: {}", self.verifier_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opaline_term::TermVar;

    fn z3_available() -> bool {
        let config = Config::default();
        Command::new(config.resolve_z3_exe())
            .arg("--version")
            .output()
            .is_ok()
    }

    fn running_driver() -> Option<SmtDriver> {
        if !z3_available() {
            eprintln!("z3 not found; skipping driver test");
            return None;
        }
        let mut driver = SmtDriver::new(Config::default(), "test");
        driver.start().expect("driver should start");
        Some(driver)
    }

    #[test]
    fn missing_binary_is_a_dependency_error() {
        let config = Config {
            z3_exe: Some("/nonexistent/z3-binary".to_string()),
            ..Config::default()
        };
        // Only meaningful when the env override is not set.
        if std::env::var(crate::config::Z3_EXE_ENV).is_ok() {
            return;
        }
        let mut driver = SmtDriver::new(config, "test");
        match driver.start() {
            Err(ProverError::DependencyNotFound { .. }) => {
                assert_eq!(driver.state(), ProverState::Erroneous);
            }
            other => panic!("expected DependencyNotFound, got {:?}", other.err()),
        }
    }

    #[test]
    fn trivial_goal_is_proved() {
        let Some(mut driver) = running_driver() else {
            return;
        };
        let x = Term::Var(TermVar::new("x", Sort::Int));
        driver
            .declare(&Decl::Const {
                name: "x".into(),
                sort: Sort::Int,
            })
            .unwrap();
        driver.assume(&Term::less(Term::int(0), x.clone())).unwrap();
        assert!(driver
            .assert_goal(&Term::less(Term::int(-1), x.clone()), None)
            .unwrap());
        assert!(!driver
            .assert_goal(&Term::less(Term::int(1), x), None)
            .unwrap());
        driver.stop().unwrap();
    }

    #[test]
    fn push_pop_tracks_depth() {
        let Some(mut driver) = running_driver() else {
            return;
        };
        assert_eq!(driver.scope_depth(), 0);
        driver.push(1).unwrap();
        driver.push(2).unwrap();
        assert_eq!(driver.scope_depth(), 3);
        driver.pop(3).unwrap();
        assert_eq!(driver.scope_depth(), 0);
        driver.stop().unwrap();
    }

    #[test]
    fn soft_constraint_mode_discharges_goals() {
        if !z3_available() {
            return;
        }
        let config = Config {
            assertion_mode: AssertionMode::SoftConstraints,
            ..Config::default()
        };
        let mut driver = SmtDriver::new(config, "test-soft");
        driver.start().unwrap();
        assert!(driver
            .assert_goal(&Term::eq(Term::int(2), Term::plus(Term::int(1), Term::int(1))), None)
            .unwrap());
        assert!(!driver.assert_goal(&Term::False, None).unwrap());
        driver.stop().unwrap();
    }

    #[test]
    fn statistics_are_parsed() {
        let Some(mut driver) = running_driver() else {
            return;
        };
        driver.check(None).unwrap();
        let stats = driver.statistics().unwrap();
        assert!(!stats.is_empty());
        driver.stop().unwrap();
    }

    #[test]
    fn log_file_mirrors_commands() {
        if !z3_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            log_dir: Some(dir.path().to_path_buf()),
            ..Config::default()
        };
        let mut driver = SmtDriver::new(config.clone(), "logged");
        driver.start().unwrap();
        driver.comment("hello from the test");
        driver.assume(&Term::True).unwrap();
        driver.stop().unwrap();
        let contents =
            std::fs::read_to_string(config.z3_log_file("logged").unwrap()).unwrap();
        assert!(contents.contains("(set-option :print-success true)"));
        assert!(contents.contains("; hello from the test"));
        assert!(contents.contains("(assert true)"));
    }

    #[test]
    fn invalid_transition_panics() {
        let result = std::panic::catch_unwind(|| {
            let mut driver = SmtDriver::new(Config::default(), "bad");
            // Running without Initialised first is a programming error.
            driver.transition(ProverState::Running);
        });
        assert!(result.is_err());
    }
}
