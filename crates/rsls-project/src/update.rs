//! Running `cargo metadata` and turning its output into a [`CargoWorkspace`].
//!
//! An [`UpdateTask`] resolves the toolchain, launches the subprocess in the
//! project directory, streams stderr so progress lines (`Updating`,
//! `Downloading`) reach the caller, and parses stdout on success. Every
//! failure is folded into [`UpdateError`]; nothing is thrown past
//! [`UpdateTask::run`].

use std::fmt;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Read;
use std::process::Child;
use std::process::Command;
use std::process::ExitStatus;
use std::process::Stdio;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use camino::Utf8Path;
use camino::Utf8PathBuf;
use rsls_conf::Settings;
use thiserror::Error;

use crate::metadata::parse_metadata;
use crate::model::CargoWorkspace;
use crate::toolchain::Toolchain;
use crate::toolchain::ToolchainError;

/// Prefixes of cargo stderr lines worth surfacing as progress.
const PROGRESS_MARKERS: [&str; 2] = ["Updating", "Downloading"];

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),
    #[error("failed to run `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` exited with {status}\n{stderr}")]
    Failed {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("`{command}` did not finish within {}s", after.as_secs())]
    TimedOut { command: String, after: Duration },
    #[error("failed to parse `cargo metadata` output")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read `cargo metadata` output")]
    Io(#[from] io::Error),
}

/// Outcome of one update attempt.
pub type UpdateResult = Result<Arc<CargoWorkspace>, UpdateError>;

/// Everything needed to describe the project: where it is, which cargo to
/// use, and which flags to pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CargoInvocation {
    project_dir: Utf8PathBuf,
    cargo_path: Option<Utf8PathBuf>,
    all_features: bool,
    offline: bool,
    timeout: Option<Duration>,
}

impl CargoInvocation {
    #[must_use]
    pub fn new(project_dir: impl Into<Utf8PathBuf>) -> Self {
        Self::from_settings(&Settings::default(), project_dir)
    }

    #[must_use]
    pub fn from_settings(settings: &Settings, project_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            cargo_path: settings.cargo_path().map(Utf8Path::to_path_buf),
            all_features: settings.all_features(),
            offline: settings.offline(),
            timeout: settings.metadata_timeout(),
        }
    }

    #[must_use]
    pub fn project_dir(&self) -> &Utf8Path {
        &self.project_dir
    }

    #[must_use]
    pub fn cargo_path(&self) -> Option<&Utf8Path> {
        self.cargo_path.as_deref()
    }

    #[must_use]
    pub fn offline(&self) -> bool {
        self.offline
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Resolve the toolchain this invocation would launch.
    pub fn toolchain(&self) -> Result<Toolchain, ToolchainError> {
        Toolchain::resolve(self.cargo_path())
    }

    #[must_use]
    pub fn args(&self) -> Vec<&'static str> {
        let mut args = vec!["metadata", "--format-version", "1"];
        if self.all_features {
            args.push("--all-features");
        }
        if self.offline {
            args.push("--offline");
        }
        args
    }
}

/// Receives progress text while an update runs.
pub trait Progress: Sync {
    fn report(&self, text: &str);
}

impl<F> Progress for F
where
    F: Fn(&str) + Sync,
{
    fn report(&self, text: &str) {
        self(text);
    }
}

/// Ignores all progress.
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _text: &str) {}
}

/// One `cargo metadata` run for a project.
#[derive(Clone, Debug)]
pub struct UpdateTask {
    invocation: CargoInvocation,
}

impl UpdateTask {
    #[must_use]
    pub fn new(invocation: CargoInvocation) -> Self {
        Self { invocation }
    }

    #[must_use]
    pub fn invocation(&self) -> &CargoInvocation {
        &self.invocation
    }

    /// Run cargo and parse its output. Produces exactly one result.
    pub fn run(&self, progress: &dyn Progress) -> UpdateResult {
        let toolchain = self.invocation.toolchain()?;
        let output = self.execute(&toolchain, progress)?;
        let workspace = parse_metadata(&output)?;
        tracing::debug!(
            "Parsed {} packages from cargo metadata for {}",
            workspace.packages().len(),
            self.invocation.project_dir
        );
        Ok(Arc::new(workspace))
    }

    fn execute(&self, toolchain: &Toolchain, progress: &dyn Progress) -> Result<String, UpdateError> {
        let args = self.invocation.args();
        let command = CommandLine {
            program: toolchain.cargo(),
            args: &args,
        }
        .to_string();

        tracing::debug!("Running `{}` in {}", command, self.invocation.project_dir);

        let mut cmd = Command::new(toolchain.cargo());
        cmd
            .args(&args)
            .current_dir(&self.invocation.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // A group of its own, so a timeout also reaches whatever cargo (or a
        // wrapper script) started with our pipes inherited.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| UpdateError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| UpdateError::Spawn {
            command: command.clone(),
            source: io::Error::other("stdout was not captured"),
        })?;
        let stderr = child.stderr.take().ok_or_else(|| UpdateError::Spawn {
            command: command.clone(),
            source: io::Error::other("stderr was not captured"),
        })?;

        thread::scope(|scope| {
            let stdout_reader = scope.spawn(move || {
                let mut buffer = String::new();
                BufReader::new(stdout)
                    .read_to_string(&mut buffer)
                    .map(|_| buffer)
            });
            let stderr_reader = scope.spawn(move || stream_stderr(stderr, progress));

            let waited = wait_with_timeout(&mut child, self.invocation.timeout);

            let stdout = stdout_reader
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("stdout reader panicked")));
            let stderr = stderr_reader.join().unwrap_or_default();

            match waited? {
                Some(status) if status.success() => Ok(stdout?),
                Some(status) => Err(UpdateError::Failed {
                    command: command.clone(),
                    status,
                    stderr,
                }),
                None => Err(UpdateError::TimedOut {
                    command: command.clone(),
                    after: self.invocation.timeout.unwrap_or_default(),
                }),
            }
        })
    }
}

/// Forward progress lines and keep the whole stream for error reporting.
fn stream_stderr(stderr: impl Read, progress: &dyn Progress) -> String {
    let mut captured = String::new();
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else {
            break;
        };
        let text = line.trim_start();
        if PROGRESS_MARKERS
            .iter()
            .any(|marker| text.starts_with(marker))
        {
            progress.report(text);
        }
        captured.push_str(&line);
        captured.push('\n');
    }
    captured
}

/// Wait for `child`, killing it once `timeout` elapses. `Ok(None)` means it was killed.
fn wait_with_timeout(child: &mut Child, timeout: Option<Duration>) -> io::Result<Option<ExitStatus>> {
    let Some(timeout) = timeout else {
        return child.wait().map(Some);
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if started.elapsed() >= timeout {
            tracing::warn!("cargo metadata exceeded {}s, killing it", timeout.as_secs());
            terminate_process_group(child)?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill `child` and everything in its process group, then reap it.
fn terminate_process_group(child: &mut Child) -> io::Result<()> {
    #[cfg(unix)]
    {
        if let Ok(pid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: `kill` has no memory effects; the negative pid names the
            // group created for this child by `process_group(0)`.
            unsafe {
                libc::kill(-pid, libc::SIGKILL);
            }
        }
    }
    // the process may exit between try_wait and kill
    let _ = child.kill();
    child.wait().map(drop)
}

struct CommandLine<'a> {
    program: &'a Utf8Path,
    args: &'a [&'a str],
}

impl fmt::Display for CommandLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
