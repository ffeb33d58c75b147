//! The process the Windows SCM actually starts.
//!
//! A plain executable cannot answer SCM control requests, so the service is
//! registered as `svcinstall run ... -- <program> <args>`. The host reports
//! its state to the SCM, runs the launch command with its output appended to
//! `<id>.out.log`/`<id>.err.log`, and kills it when the service is stopped.
//! It does not restart the child.

use crate::{LaunchCommand, ServiceDefinition};
use anyhow::{anyhow, bail, Result};
use std::ffi::OsString;
use std::path::PathBuf;

/// Subcommand name the host is registered under.
pub const RUN_COMMAND: &str = "run";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub service_name: String,
    pub launch: LaunchCommand,
    pub log_dir: PathBuf,
}

impl HostSpec {
    pub fn from_definition(definition: &ServiceDefinition) -> Self {
        Self {
            service_name: definition.id.clone(),
            launch: definition.launch.clone(),
            log_dir: definition.log_dir.clone(),
        }
    }

    /// Arguments that follow the host executable on the service's command line.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            RUN_COMMAND.into(),
            "--service-name".into(),
            self.service_name.clone().into(),
            "--log-dir".into(),
            self.log_dir.clone().into(),
        ];
        if let Some(wd) = &self.launch.working_directory {
            args.push("--working-dir".into());
            args.push(wd.clone().into());
        }
        for (key, value) in &self.launch.env_vars {
            args.push("--env".into());
            args.push(format!("{key}={value}").into());
        }
        args.push("--".into());
        args.push(self.launch.program.clone().into());
        args.extend(self.launch.arguments.iter().map(OsString::from));
        args
    }

    /// Read back the arguments written by [`HostSpec::to_args`].
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut args = args.iter();
        if args.next().map(String::as_str) != Some(RUN_COMMAND) {
            bail!("Not a svcinstall service host command line");
        }
        let mut value = |flag: &str| {
            args.next()
                .cloned()
                .ok_or_else(|| anyhow!("Missing value for {flag}"))
        };

        let mut service_name = None;
        let mut log_dir = None;
        let mut working_directory = None;
        let mut env_vars = Vec::new();
        loop {
            let flag = value("the launch command")?;
            match flag.as_str() {
                "--" => break,
                "--service-name" => service_name = Some(value(&flag)?),
                "--log-dir" => log_dir = Some(PathBuf::from(value(&flag)?)),
                "--working-dir" => working_directory = Some(PathBuf::from(value(&flag)?)),
                "--env" => {
                    let assignment = value(&flag)?;
                    let (key, val) = assignment
                        .split_once('=')
                        .ok_or_else(|| anyhow!("Malformed --env value: {assignment}"))?;
                    env_vars.push((key.to_string(), val.to_string()));
                }
                other => bail!("Unexpected service host argument: {other}"),
            }
        }
        let program = value("the launch command")?;
        let arguments = args.cloned().collect();

        Ok(Self {
            service_name: service_name.ok_or_else(|| anyhow!("Missing --service-name"))?,
            launch: LaunchCommand {
                program: PathBuf::from(program),
                arguments,
                working_directory,
                env_vars,
            },
            log_dir: log_dir.ok_or_else(|| anyhow!("Missing --log-dir"))?,
        })
    }

    pub fn stdout_log(&self) -> PathBuf {
        self.log_dir.join(format!("{}.out.log", self.service_name))
    }

    pub fn stderr_log(&self) -> PathBuf {
        self.log_dir.join(format!("{}.err.log", self.service_name))
    }

    pub fn host_log(&self) -> PathBuf {
        self.log_dir.join(format!("{}.wrapper.log", self.service_name))
    }
}

/// Split a Windows command line the way `CommandLineToArgvW` does:
/// `2n` backslashes before a quote are `n` backslashes and a delimiter,
/// `2n+1` are `n` backslashes and a literal quote.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let mut backslashes = 1;
                while chars.peek() == Some(&'\\') {
                    chars.next();
                    backslashes += 1;
                }
                if chars.peek() == Some(&'"') {
                    current.extend(std::iter::repeat('\\').take(backslashes / 2));
                    if backslashes % 2 == 1 {
                        chars.next();
                        current.push('"');
                    }
                } else {
                    current.extend(std::iter::repeat('\\').take(backslashes));
                }
                in_word = true;
            }
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' => {
                in_quotes = !in_quotes;
                in_word = true;
            }
            ' ' | '\t' if !in_quotes => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if in_word {
        words.push(current);
    }
    words
}

/// The last `lines` lines of `contents`.
pub fn tail(contents: &str, lines: usize) -> Vec<&str> {
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].to_vec()
}

#[cfg(windows)]
pub use dispatch::run;

#[cfg(windows)]
mod dispatch {
    use super::HostSpec;
    use anyhow::{anyhow, Context, Result};
    use std::ffi::OsString;
    use std::fs::{self, OpenOptions};
    use std::process::{Child, Command, Stdio};
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::sync::OnceLock;
    use std::time::Duration;
    use windows_service::service::{
        ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus,
        ServiceType,
    };
    use windows_service::service_control_handler::{self, ServiceControlHandlerResult};
    use windows_service::{define_windows_service, service_dispatcher};

    const POLL_INTERVAL: Duration = Duration::from_millis(500);

    static SPEC: OnceLock<HostSpec> = OnceLock::new();

    define_windows_service!(ffi_service_main, service_main);

    /// Hand the current thread to the SCM dispatcher. Returns when the service stops.
    pub fn run(spec: HostSpec) -> Result<()> {
        let name = spec.service_name.clone();
        SPEC.set(spec)
            .map_err(|_| anyhow!("Service host is already running"))?;
        service_dispatcher::start(&name, ffi_service_main).context(
            "Failed to connect to the service control manager (the host only runs as a service)",
        )?;
        Ok(())
    }

    fn service_main(_arguments: Vec<OsString>) {
        if let Err(e) = run_service() {
            tracing::error!("Service host failed: {e:#}");
        }
    }

    fn status(state: ServiceState, exit_code: u32) -> ServiceStatus {
        let controls_accepted = if state == ServiceState::Running {
            ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN
        } else {
            ServiceControlAccept::empty()
        };
        ServiceStatus {
            service_type: ServiceType::OWN_PROCESS,
            current_state: state,
            controls_accepted,
            exit_code: ServiceExitCode::Win32(exit_code),
            checkpoint: 0,
            wait_hint: Duration::from_secs(10),
            process_id: None,
        }
    }

    fn run_service() -> Result<()> {
        let spec = SPEC
            .get()
            .context("Service host started without a launch command")?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel();
        let event_handler = move |control| -> ServiceControlHandlerResult {
            match control {
                ServiceControl::Stop | ServiceControl::Shutdown => {
                    let _ = shutdown_tx.send(());
                    ServiceControlHandlerResult::NoError
                }
                ServiceControl::Interrogate => ServiceControlHandlerResult::NoError,
                _ => ServiceControlHandlerResult::NotImplemented,
            }
        };
        let status_handle = service_control_handler::register(&spec.service_name, event_handler)
            .context("Failed to register service control handler")?;
        status_handle.set_service_status(status(ServiceState::StartPending, 0))?;

        let mut child = match spawn(spec) {
            Ok(child) => child,
            Err(e) => {
                status_handle.set_service_status(status(ServiceState::Stopped, 1))?;
                return Err(e);
            }
        };
        tracing::info!(pid = child.id(), program = %spec.launch.program.display(), "started");
        status_handle.set_service_status(status(ServiceState::Running, 0))?;

        let exit_code = loop {
            match shutdown_rx.recv_timeout(POLL_INTERVAL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    status_handle.set_service_status(status(ServiceState::StopPending, 0))?;
                    tracing::info!(pid = child.id(), "stop requested, terminating");
                    if let Err(e) = child.kill() {
                        tracing::warn!("Failed to terminate child: {e}");
                    }
                    child.wait().context("Failed to wait for child process")?;
                    break 0;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if let Some(exit) = child.try_wait().context("Failed to poll child process")? {
                tracing::warn!(%exit, "child exited on its own");
                break exit.code().map(|c| c as u32).unwrap_or(1);
            }
        };

        status_handle.set_service_status(status(ServiceState::Stopped, exit_code))?;
        Ok(())
    }

    fn spawn(spec: &HostSpec) -> Result<Child> {
        fs::create_dir_all(&spec.log_dir).with_context(|| {
            format!("Failed to create log directory: {}", spec.log_dir.display())
        })?;
        let append = |path: std::path::PathBuf| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))
        };

        let launch = &spec.launch;
        let mut cmd = Command::new(&launch.program);
        cmd.args(&launch.arguments)
            .envs(launch.env_vars.iter().cloned())
            .stdin(Stdio::null())
            .stdout(append(spec.stdout_log())?)
            .stderr(append(spec.stderr_log())?);
        if let Some(wd) = &launch.working_directory {
            cmd.current_dir(wd);
        }
        tracing::debug!(command = ?cmd, "executing");
        cmd.spawn()
            .with_context(|| format!("Failed to launch {}", launch.program.display()))
    }
}
