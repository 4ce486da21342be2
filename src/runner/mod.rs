//! Host application session lifecycle
//!
//! A [`WorkflowRunner`] owns at most one background host process. The
//! session moves through [`SessionState`]:
//!
//! ```text
//! Idle --start()--> Starting --probe ok--> Running --stop()--> Stopping --> Idle
//!                       \--probe failed--> Idle
//! ```
//!
//! Workflows run through the host's synchronous run command while the
//! session is `Running`. A timed-out run leaves the host process alive.

pub mod probe;
pub mod watchdog;

use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::atomic::write_atomic;
use crate::error::{LifecycleError, RunError};
use crate::install::{venv_python, VENV_DIR};
use crate::logging::{operations, status};
use crate::process::{resolve_program, stderr_for, stdout_for};
use crate::workflow::{populate, retrieve, InputValue, WorkflowGraph};

pub use watchdog::{spawn_watchdog, terminate_self, LostHandler, WatchdogHandle};

/// Environment variable naming an already running host (`host[:port]`)
pub const SERVER_ENV: &str = "COMFYUI_SERVER";

/// Graph file the run command reads, relative to the workspace
pub const WORKFLOW_FILE: &str = "workflow.json";

const STOP_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// Directories the host process is bound to for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDirs {
    pub input: Option<PathBuf>,
    pub temp: PathBuf,
    pub output: PathBuf,
}

impl SessionDirs {
    /// `cli_run/temp` and `cli_run/output` under the workspace, host default input
    pub fn under(workspace: &Path) -> Self {
        let base = workspace.join("cli_run");
        Self {
            input: None,
            temp: base.join("temp"),
            output: base.join("output"),
        }
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Address of a host HTTP server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEndpoint {
    pub host: String,
    pub port: u16,
}

impl HostEndpoint {
    /// Parse `host[:port]`; the port defaults to 80
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (host, port) = match value.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("Invalid port in server address '{}'", value))?;
                (host, port)
            }
            None => (value, 80),
        };
        if host.is_empty() {
            bail!("Server address '{}' has no host", value);
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

impl fmt::Display for HostEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Whether the runner launches its own host or drives an existing one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    Managed,
    External(HostEndpoint),
}

impl ServerMode {
    /// `External` when `COMFYUI_SERVER` is set and non-empty
    pub fn from_env() -> Result<Self> {
        match std::env::var(SERVER_ENV) {
            Ok(value) if !value.trim().is_empty() => Ok(Self::External(
                HostEndpoint::parse(&value)
                    .with_context(|| format!("Invalid {}", SERVER_ENV))?,
            )),
            _ => Ok(Self::Managed),
        }
    }
}

/// How the host and its run command are invoked
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Interpreter used when the workspace has no environment of its own
    pub python: String,
    /// Program providing the synchronous `run` command
    pub cli: String,
    pub listen: String,
    pub port: u16,
    pub probe_path: String,
    pub startup_timeout: Duration,
    pub verbosity: u8,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            cli: "comfy".to_string(),
            listen: "127.0.0.1".to_string(),
            port: 8188,
            probe_path: "/api/customnode/getmappings?mode=nickname".to_string(),
            startup_timeout: Duration::from_secs(120),
            verbosity: 0,
        }
    }
}

pub struct WorkflowRunner {
    workspace: PathBuf,
    dirs: SessionDirs,
    options: RunnerOptions,
    mode: ServerMode,
    state: SessionState,
    child: Option<Arc<Mutex<Child>>>,
    watchdog_config: Option<(Duration, LostHandler)>,
    watchdog: Option<WatchdogHandle>,
}

impl WorkflowRunner {
    pub fn new(
        workspace: impl Into<PathBuf>,
        dirs: SessionDirs,
        options: RunnerOptions,
        mode: ServerMode,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            dirs,
            options,
            mode,
            state: SessionState::Idle,
            child: None,
            watchdog_config: None,
            watchdog: None,
        }
    }

    /// Watch the managed host every `interval` and call `on_lost` if it dies
    pub fn with_watchdog(mut self, interval: Duration, on_lost: LostHandler) -> Self {
        self.watchdog_config = Some((interval, on_lost));
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn dirs(&self) -> &SessionDirs {
        &self.dirs
    }

    /// Where the run command and probe connect
    pub fn endpoint(&self) -> HostEndpoint {
        match &self.mode {
            ServerMode::External(endpoint) => endpoint.clone(),
            ServerMode::Managed => {
                let host = match self.options.listen.as_str() {
                    "" | "0.0.0.0" | "::" => "127.0.0.1",
                    other => other,
                };
                HostEndpoint {
                    host: host.to_string(),
                    port: self.options.port,
                }
            }
        }
    }

    fn host_python(&self) -> PathBuf {
        let venv = venv_python(&self.workspace.join(VENV_DIR));
        if venv.is_file() {
            venv
        } else {
            resolve_program(&self.options.python)
        }
    }

    fn prepare_dirs(&self) -> Result<()> {
        let mut dirs = vec![&self.dirs.temp, &self.dirs.output];
        if let Some(input) = &self.dirs.input {
            dirs.push(input);
        }
        for dir in dirs {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    fn launch(&self) -> Result<Child> {
        let python = self.host_python();
        let mut cmd = Command::new(&python);
        cmd.arg("main.py")
            .args(["--listen", &self.options.listen])
            .args(["--port", &self.options.port.to_string()])
            .arg("--output-directory")
            .arg(&self.dirs.output)
            .arg("--temp-directory")
            .arg(&self.dirs.temp);
        if let Some(input) = &self.dirs.input {
            cmd.arg("--input-directory").arg(input);
        }
        cmd.current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(stdout_for(self.options.verbosity))
            .stderr(stderr_for(self.options.verbosity))
            .kill_on_drop(true);

        cmd.spawn().map_err(|source| {
            anyhow::Error::from(RunError::Spawn {
                program: python.display().to_string(),
                source,
            })
        })
    }

    /// Launch (or attach to) the host and wait until it answers the probe
    pub async fn start(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(LifecycleError::AlreadyRunning.into());
        }
        self.state = SessionState::Starting;

        match self.start_inner().await {
            Ok(()) => {
                self.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                if let Some(child) = self.child.take() {
                    if let Err(stop_err) = terminate(child).await {
                        warn!("Failed to stop host after failed start: {:#}", stop_err);
                    }
                }
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    async fn start_inner(&mut self) -> Result<()> {
        self.prepare_dirs()?;
        let endpoint = self.endpoint();
        let url = endpoint.url(&self.options.probe_path);

        match self.mode {
            ServerMode::External(_) => {
                info!(operation = operations::START, endpoint = %endpoint, "Using external host");
                probe::wait_until_ready(&url, self.options.startup_timeout, || None).await?;
            }
            ServerMode::Managed => {
                let child = Arc::new(Mutex::new(self.launch()?));
                self.child = Some(Arc::clone(&child));
                info!(
                    operation = operations::START,
                    path = %self.workspace.display(),
                    endpoint = %endpoint,
                    "Launched host application"
                );

                probe::wait_until_ready(&url, self.options.startup_timeout, || {
                    let mut guard = child.lock().ok()?;
                    match guard.try_wait() {
                        Ok(Some(status)) => Some(format!("host exited during startup ({})", status)),
                        Ok(None) => None,
                        Err(e) => Some(format!("cannot poll host process: {}", e)),
                    }
                })
                .await?;

                if let Some((interval, on_lost)) = &self.watchdog_config {
                    self.watchdog = Some(spawn_watchdog(child, *interval, Arc::clone(on_lost)));
                }
            }
        }
        Ok(())
    }

    /// Run `graph` with `values` and return the produced file
    ///
    /// Outputs land under `output_dir`. A timeout aborts only this run.
    pub async fn run_workflow(
        &mut self,
        graph: &WorkflowGraph,
        output_dir: &Path,
        values: &BTreeMap<String, InputValue>,
        timeout: Duration,
    ) -> Result<PathBuf> {
        if self.state != SessionState::Running {
            return Err(LifecycleError::NotRunning.into());
        }

        let run_id = hex::encode(rand::random::<[u8; 8]>());
        let populated = populate(graph, output_dir, values)?;

        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;
        let workflow_file = self.workspace.join(WORKFLOW_FILE);
        write_atomic(&workflow_file, populated.to_json_pretty()?.as_bytes())?;

        let endpoint = self.endpoint();
        let timeout_secs = timeout.as_secs().max(1).to_string();
        let program = resolve_program(&self.options.cli);

        let mut cmd = Command::new(&program);
        cmd.arg("run")
            .arg("--workflow")
            .arg(&workflow_file)
            .args(["--host", &endpoint.host])
            .args(["--port", &endpoint.port.to_string()])
            .args(["--timeout", &timeout_secs])
            .arg("--wait");
        if self.options.verbosity > 0 {
            cmd.arg("--verbose");
        }
        cmd.env("NO_COLOR", "1")
            .stdin(Stdio::null())
            .stdout(stdout_for(self.options.verbosity))
            .stderr(stderr_for(self.options.verbosity))
            .kill_on_drop(true);

        info!(operation = operations::RUN, run_id = %run_id, endpoint = %endpoint, "Running workflow");
        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            program: self.options.cli.clone(),
            source,
        })?;

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.context("Failed to wait for run command")?,
            Err(_) => {
                warn!(operation = operations::RUN, run_id = %run_id, status = status::TIMEOUT, "Workflow run timed out");
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill run command: {}", e);
                }
                return Err(RunError::Timeout(timeout).into());
            }
        };
        if !status.success() {
            return Err(RunError::NonZeroExit {
                program: self.options.cli.clone(),
                code: status.code().unwrap_or(-1),
            }
            .into());
        }

        let output = retrieve(&populated, output_dir)?;
        info!(
            operation = operations::RUN,
            run_id = %run_id,
            status = status::SUCCESS,
            path = %output.display(),
            "Workflow finished"
        );
        Ok(output)
    }

    /// Stop the host and remove the session's transient directories
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != SessionState::Running {
            return Err(LifecycleError::NotRunning.into());
        }
        self.state = SessionState::Stopping;

        if let Some(handle) = self.watchdog.take() {
            handle.shutdown().await;
        }
        let stopped = match self.child.take() {
            Some(child) => terminate(child).await,
            None => Ok(()),
        };

        for dir in [&self.dirs.temp, &self.dirs.output] {
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(dir) {
                    warn!(path = %dir.display(), "Failed to remove session directory: {}", e);
                }
            }
        }
        let workflow_file = self.workspace.join(WORKFLOW_FILE);
        if workflow_file.exists() {
            if let Err(e) = fs::remove_file(&workflow_file) {
                warn!(path = %workflow_file.display(), "Failed to remove workflow file: {}", e);
            }
        }

        self.state = SessionState::Idle;
        info!(operation = operations::STOP, status = status::SUCCESS, "Host application stopped");
        stopped
    }
}

/// Ask the host to exit, then kill it after a grace period
async fn terminate(child: Arc<Mutex<Child>>) -> Result<()> {
    let mut child = Arc::try_unwrap(child)
        .map_err(|_| anyhow!("Host process handle is still shared"))?
        .into_inner()
        .map_err(|_| anyhow!("Host process handle is poisoned"))?;

    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!("Failed to signal host process: {}", e);
        }
    }
    #[cfg(not(unix))]
    child.start_kill().context("Failed to stop host process")?;

    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(status) => {
            let status = status.context("Failed to wait for host process")?;
            debug!(status = %status, "Host process exited");
        }
        Err(_) => {
            warn!("Host process ignored SIGTERM, killing");
            child.kill().await.context("Failed to kill host process")?;
        }
    }
    Ok(())
}
