//! Verifier Pipeline: Sequential execution of validation gates
//!
//! Each gate is an arbitrary command line (split with `shlex`) executed in the
//! workspace root. Gates run in order and stop at the first failure unless the
//! pipeline is in comprehensive mode, in which case every gate runs.
//!
//! All gates are run async with `tokio::process::Command` and enforced
//! timeout via `tokio::time::timeout(gate_timeout_secs)`. A gate runs in its
//! own process group, and the whole group is killed when it times out.

use crate::verifier::report::{GateOutcome, GateResult, VerifierReport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

/// One named validation command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSpec {
    pub name: String,
    pub command: String,
}

impl GateSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }

    /// Parse `name=command`; a bare command is named after its program.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Some((name, command)) = raw.split_once('=') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(char::is_whitespace) {
                return Some(Self::new(name, command.trim()));
            }
        }
        let program = shlex::split(raw)?.into_iter().next()?;
        Some(Self::new(program, raw))
    }
}

/// Configuration for the Verifier pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Gates in execution order
    pub gates: Vec<GateSpec>,
    /// Run all gates even if earlier ones fail
    pub comprehensive: bool,
    /// Maximum time per gate (seconds)
    pub gate_timeout_secs: u64,
    /// Keep at most this many trailing bytes of gate output
    pub output_max_bytes: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            gates: Vec::new(),
            comprehensive: false,
            gate_timeout_secs: 300,
            output_max_bytes: 4096,
        }
    }
}

impl VerifierConfig {
    pub fn with_gates(gates: Vec<GateSpec>) -> Self {
        Self {
            gates,
            ..Default::default()
        }
    }
}

/// The Verifier: runs the gate pipeline against one workspace
pub struct Verifier {
    /// Workspace root
    working_dir: PathBuf,
    config: VerifierConfig,
}

impl Verifier {
    pub fn new(working_dir: impl AsRef<Path>, config: VerifierConfig) -> Self {
        Self {
            working_dir: working_dir.as_ref().to_path_buf(),
            config,
        }
    }

    /// Run every configured gate and collect a report.
    ///
    /// With no gates configured the report is trivially green.
    pub async fn run_pipeline(&self) -> VerifierReport {
        let start = Instant::now();
        let mut report = VerifierReport::new(self.working_dir.display().to_string());
        let mut failed = false;

        for spec in &self.config.gates {
            if failed && !self.config.comprehensive {
                report.add_gate(GateResult::skipped(&spec.name));
                continue;
            }

            let result = self.run_gate(spec).await;
            tracing::debug!(
                gate = %result.gate,
                outcome = %result.outcome,
                duration_ms = result.duration_ms,
                "gate finished"
            );
            failed |= result.outcome == GateOutcome::Failed;
            report.add_gate(result);
        }

        report.finalize(start.elapsed());
        report
    }

    async fn run_gate(&self, spec: &GateSpec) -> GateResult {
        let start = Instant::now();
        let failed = |exit_code: Option<i32>, excerpt: String| GateResult {
            gate: spec.name.clone(),
            outcome: GateOutcome::Failed,
            duration_ms: start.elapsed().as_millis() as u64,
            exit_code,
            output_excerpt: Some(excerpt),
        };

        let argv = match shlex::split(&spec.command) {
            Some(argv) if !argv.is_empty() => argv,
            _ => return failed(None, format!("unparseable gate command: {}", spec.command)),
        };

        let mut cmd = tokio::process::Command::new(&argv[0]);
        cmd.args(&argv[1..]);

        match self.run_with_timeout(&mut cmd).await {
            Ok(output) if output.status.success() => GateResult {
                gate: spec.name.clone(),
                outcome: GateOutcome::Passed,
                duration_ms: start.elapsed().as_millis() as u64,
                exit_code: output.status.code(),
                output_excerpt: None,
            },
            Ok(output) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                failed(output.status.code(), self.tail(&combined))
            }
            Err(e) => failed(None, e),
        }
    }

    async fn run_with_timeout(
        &self,
        cmd: &mut tokio::process::Command,
    ) -> Result<std::process::Output, String> {
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so descendants can be killed with the gate.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| format!("Failed to execute: {e}"))?;
        let pid = child.id();

        let timeout_dur = Duration::from_secs(self.config.gate_timeout_secs);
        match tokio::time::timeout(timeout_dur, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("Failed to execute: {e}")),
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                Err(format!(
                    "Gate timed out after {}s",
                    self.config.gate_timeout_secs
                ))
            }
        }
    }

    /// Keep the last `output_max_bytes` of `s`, on a char boundary
    fn tail(&self, s: &str) -> String {
        let max = self.config.output_max_bytes;
        if s.len() <= max {
            return s.to_string();
        }
        let mut cut = s.len() - max;
        while !s.is_char_boundary(cut) {
            cut += 1;
        }
        format!("[truncated {} bytes]...\n{}", cut, &s[cut..])
    }
}

/// SIGKILL the process group led by `pid` (the gate's own group).
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; no memory is shared.
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, "failed to kill gate process group: {err}");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}
