//! `.docx` → `.pdf` conversion through external programs.
//!
//! The primary converter (LibreOffice) is launched detached and judged by the
//! appearance of its output file. If it is missing or never produces output,
//! a secondary converter command is tried. A missing secondary, or one that
//! reports the office renderer itself is absent, is fatal for the process.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::document::poll::{PollOutcome, PollSchedule, Probe, poll, settle_file};
use crate::error::{DocumentError, FatalEnvironmentError};

/// Secondary-converter output that means the renderer is not installed,
/// as opposed to a one-off conversion error.
const MISSING_RENDERER_MARKERS: [&str; 4] = ["word", "not installed", "could not locate", "microsoft"];

// ── Job state machine ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionState {
    Pending,
    Converting,
    Succeeded,
    Failed,
    TimedOut,
}

impl ConversionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    Primary,
    Secondary,
    None,
}

/// One document's conversion. Lives only for the duration of the attempt.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub source: PathBuf,
    pub target: PathBuf,
    state: ConversionState,
    attempted: ConverterKind,
}

impl ConversionJob {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let target = source.with_extension("pdf");
        Self {
            source,
            target,
            state: ConversionState::Pending,
            attempted: ConverterKind::None,
        }
    }

    pub fn state(&self) -> ConversionState {
        self.state
    }

    pub fn attempted(&self) -> ConverterKind {
        self.attempted
    }

    /// Move to `next`. Only `Pending → Converting → terminal` is allowed;
    /// returns `false` and leaves the state alone otherwise.
    pub fn advance(&mut self, next: ConversionState) -> bool {
        let allowed = match (self.state, next) {
            (ConversionState::Pending, ConversionState::Converting) => true,
            (ConversionState::Converting, n) => n.is_terminal(),
            _ => false,
        };
        if allowed {
            debug!(from = ?self.state, to = ?next, source = %self.source.display(), "Conversion state");
            self.state = next;
        } else {
            warn!(from = ?self.state, to = ?next, "Rejected conversion state change");
        }
        allowed
    }

    fn attempt(&mut self, kind: ConverterKind) {
        self.attempted = kind;
    }
}

// ── Converter seam ──────────────────────────────────────────────────

/// Turns a filled document into the deliverable.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Convert `source`, returning the deliverable's path.
    ///
    /// On any error `source` has been removed. [`DocumentError::Fatal`] means
    /// no converter can work in this environment.
    async fn convert(&self, source: &Path) -> Result<PathBuf, DocumentError>;
}

/// Converter programs and timing.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Candidate names/paths for the primary converter, first found wins.
    pub primary_programs: Vec<String>,
    /// Secondary command line; source and target paths are appended.
    pub secondary_program: Option<String>,
    pub schedule: PollSchedule,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            primary_programs: vec!["soffice".to_string(), "libreoffice".to_string()],
            secondary_program: Some("docx2pdf".to_string()),
            schedule: PollSchedule::default(),
        }
    }
}

/// Locate `program` on `PATH` (or as a direct path).
pub fn find_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Converter backed by external programs.
pub struct SubprocessConverter {
    config: ConverterConfig,
}

impl SubprocessConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    fn primary(&self) -> Option<PathBuf> {
        self.config
            .primary_programs
            .iter()
            .find_map(|p| find_program(p))
    }

    /// Launch the primary converter and watch for its output.
    async fn run_primary(&self, program: &Path, job: &ConversionJob) -> PollOutcome {
        let out_dir = job.source.parent().unwrap_or(Path::new("."));
        let spawned = Command::new(program)
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(out_dir)
            .arg(&job.source)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program.display(), error = %e, "Primary converter failed to launch");
                return PollOutcome::Failed;
            }
        };

        let schedule = &self.config.schedule;
        let target = job.target.as_path();
        let outcome = poll(schedule, || {
            if target.exists() {
                return Probe::Ready;
            }
            match child.try_wait() {
                Ok(None) => Probe::Pending,
                Ok(Some(_)) | Err(_) => Probe::Stopped,
            }
        })
        .await;

        match outcome {
            PollOutcome::Succeeded => {
                if settle_file(target, schedule).await {
                    PollOutcome::Succeeded
                } else {
                    PollOutcome::Failed
                }
            }
            other => {
                if let Err(e) = child.start_kill() {
                    debug!(error = %e, "Primary converter already gone");
                }
                other
            }
        }
    }

    /// Run the secondary converter command to completion (bounded by the ceiling).
    async fn run_secondary(&self, job: &mut ConversionJob) -> Result<(), DocumentError> {
        let Some(command_line) = self.config.secondary_program.as_deref() else {
            return Err(FatalEnvironmentError::new(
                "no primary converter produced output and no secondary converter is configured",
            )
            .into());
        };
        let mut words = command_line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let Some(program) = find_program(name) else {
            return Err(FatalEnvironmentError::new(format!(
                "secondary converter '{name}' is not available"
            ))
            .into());
        };

        job.attempt(ConverterKind::Secondary);
        info!(program = %program.display(), "Trying secondary converter");

        let run = Command::new(&program)
            .args(words)
            .arg(&job.source)
            .arg(&job.target)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.config.schedule.ceiling, run).await {
            Err(_) => {
                job.advance(ConversionState::TimedOut);
                return Err(DocumentError::ConversionTimedOut(self.config.schedule.ceiling));
            }
            Ok(Err(e)) => {
                return Err(DocumentError::ConversionFailed {
                    converter: name.to_string(),
                    reason: e.to_string(),
                });
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() && job.target.is_file() {
            return Ok(());
        }

        let mut detail = String::from_utf8_lossy(&output.stderr).to_string();
        detail.push_str(&String::from_utf8_lossy(&output.stdout));
        let detail = detail.trim().to_string();

        if mentions_missing_renderer(&detail) {
            return Err(FatalEnvironmentError::new(format!(
                "secondary converter '{name}' cannot find its renderer: {detail}"
            ))
            .into());
        }
        Err(DocumentError::ConversionFailed {
            converter: name.to_string(),
            reason: if detail.is_empty() {
                format!("exited with {} and produced no output", output.status)
            } else {
                detail
            },
        })
    }

    async fn run(&self, job: &mut ConversionJob) -> Result<(), DocumentError> {
        job.advance(ConversionState::Converting);

        match self.primary() {
            Some(program) => {
                job.attempt(ConverterKind::Primary);
                info!(program = %program.display(), source = %job.source.display(), "Converting with primary converter");
                match self.run_primary(&program, job).await {
                    PollOutcome::Succeeded => return Ok(()),
                    PollOutcome::TimedOut => {
                        warn!(ceiling = ?self.config.schedule.ceiling, "Primary converter produced no output in time");
                    }
                    PollOutcome::Failed => {
                        warn!("Primary converter exited without output");
                    }
                }
            }
            None => {
                warn!(candidates = ?self.config.primary_programs, "Primary converter not found");
            }
        }

        // Partial primary output must not be mistaken for the secondary's.
        remove_if_exists(&job.target).await;
        self.run_secondary(job).await
    }
}

/// Whether converter output says the office renderer itself is missing.
pub fn mentions_missing_renderer(output: &str) -> bool {
    let lower = output.to_lowercase();
    MISSING_RENDERER_MARKERS.iter().any(|m| lower.contains(m))
}

async fn remove_if_exists(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove file"),
    }
}

#[async_trait]
impl DocumentConverter for SubprocessConverter {
    async fn convert(&self, source: &Path) -> Result<PathBuf, DocumentError> {
        let mut job = ConversionJob::new(source);
        remove_if_exists(&job.target).await;

        match self.run(&mut job).await {
            Ok(()) => {
                job.advance(ConversionState::Succeeded);
                info!(target = %job.target.display(), converter = ?job.attempted(), "Conversion succeeded");
                Ok(job.target)
            }
            Err(e) => {
                if !job.state().is_terminal() {
                    job.advance(ConversionState::Failed);
                }
                remove_if_exists(&job.source).await;
                remove_if_exists(&job.target).await;
                if e.is_fatal() {
                    error!(error = %e, source = %job.source.display(), "Conversion impossible in this environment");
                } else {
                    error!(error = %e, state = ?job.state(), "Conversion failed");
                }
                Err(e)
            }
        }
    }
}
