use super::{ServiceManager, ServiceStatus};
use crate::host::{split_command_line, HostSpec};
use crate::{LaunchCommand, ServiceDefinition};
use anyhow::{anyhow, bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::thread::sleep;
use std::time::{Duration, Instant};
use windows_service::service::{
    Service, ServiceAccess, ServiceErrorControl, ServiceInfo, ServiceStartType, ServiceState,
    ServiceType,
};
use windows_service::service_manager::{
    ServiceManager as ControlManager, ServiceManagerAccess,
};

const ERROR_ACCESS_DENIED: i32 = 5;
const ERROR_SERVICE_DOES_NOT_EXIST: i32 = 1060;
const STOP_TIMEOUT: Duration = Duration::from_secs(30);
const STOP_POLL: Duration = Duration::from_millis(250);

/// Windows Service Control Manager backend.
///
/// Services are registered with the current executable as their binary,
/// running the `run` host that supervises the configured launch command.
#[derive(Debug, Clone, Default)]
pub struct ScmManager;

impl ScmManager {
    pub fn new() -> Self {
        Self
    }

    fn connect(&self, access: ServiceManagerAccess) -> Result<ControlManager> {
        tracing::debug!(?access, "connecting to the service control manager");
        ControlManager::local_computer(None::<&str>, access)
            .map_err(|e| describe(e, "connect to the service control manager"))
    }

    fn open(&self, id: &str, access: ServiceAccess) -> windows_service::Result<Service> {
        let manager = ControlManager::local_computer(None::<&str>, ServiceManagerAccess::CONNECT)?;
        tracing::debug!(id, ?access, "opening service");
        manager.open_service(id, access)
    }

    fn open_existing(&self, id: &str, access: ServiceAccess) -> Result<Service> {
        self.open(id, access).map_err(|e| {
            if is_missing(&e) {
                anyhow!("Service '{}' is not installed", id)
            } else {
                describe(e, &format!("open service '{id}'"))
            }
        })
    }

    fn service_info(&self, definition: &ServiceDefinition) -> Result<ServiceInfo> {
        let executable_path =
            std::env::current_exe().context("Failed to locate the svcinstall executable")?;
        Ok(ServiceInfo {
            name: OsString::from(&definition.id),
            display_name: OsString::from(&definition.display_name),
            service_type: ServiceType::OWN_PROCESS,
            start_type: ServiceStartType::AutoStart,
            error_control: ServiceErrorControl::Normal,
            executable_path,
            launch_arguments: HostSpec::from_definition(definition).to_args(),
            dependencies: vec![],
            account_name: None,
            account_password: None,
        })
    }
}

impl ServiceManager for ScmManager {
    fn exists(&self, id: &str) -> Result<bool> {
        match self.open(id, ServiceAccess::QUERY_STATUS) {
            Ok(_) => Ok(true),
            Err(e) if is_missing(&e) => Ok(false),
            Err(e) => Err(describe(e, &format!("open service '{id}'"))),
        }
    }

    fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        let manager =
            self.connect(ServiceManagerAccess::CONNECT | ServiceManagerAccess::CREATE_SERVICE)?;
        let info = self.service_info(definition)?;
        tracing::debug!(id = %definition.id, binary = %info.executable_path.display(), "creating service");
        let service = manager
            .create_service(&info, ServiceAccess::CHANGE_CONFIG | ServiceAccess::DELETE)
            .map_err(|e| describe(e, &format!("create service '{}'", definition.id)))?;
        if let Err(e) = service.set_description(&definition.description) {
            // Leave no half-configured registration behind.
            if let Err(delete) = service.delete() {
                tracing::warn!(id = %definition.id, "Failed to delete service after failed install: {delete}");
            }
            return Err(describe(e, &format!("set description of '{}'", definition.id)));
        }
        Ok(())
    }

    fn start(&self, id: &str) -> Result<()> {
        let service = self.open_existing(id, ServiceAccess::START)?;
        service
            .start::<&OsStr>(&[])
            .map_err(|e| describe(e, &format!("start service '{id}'")))
    }

    fn stop(&self, id: &str) -> Result<()> {
        let service = self.open_existing(id, ServiceAccess::STOP | ServiceAccess::QUERY_STATUS)?;
        service
            .stop()
            .map_err(|e| describe(e, &format!("stop service '{id}'")))?;

        let deadline = Instant::now() + STOP_TIMEOUT;
        loop {
            let state = service
                .query_status()
                .map_err(|e| describe(e, &format!("query service '{id}'")))?
                .current_state;
            if state == ServiceState::Stopped {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("Service '{}' did not stop within {:?}", id, STOP_TIMEOUT);
            }
            sleep(STOP_POLL);
        }
    }

    fn uninstall(&self, id: &str) -> Result<()> {
        let service = self.open_existing(id, ServiceAccess::DELETE)?;
        service
            .delete()
            .map_err(|e| describe(e, &format!("delete service '{id}'")))
    }

    fn status(&self, id: &str) -> Result<ServiceStatus> {
        let service = match self.open(id, ServiceAccess::QUERY_STATUS) {
            Ok(service) => service,
            Err(e) if is_missing(&e) => return Ok(ServiceStatus::NotInstalled),
            Err(e) => return Err(describe(e, &format!("open service '{id}'"))),
        };
        let state = service
            .query_status()
            .map_err(|e| describe(e, &format!("query service '{id}'")))?
            .current_state;
        Ok(match state {
            ServiceState::Running => ServiceStatus::Running,
            ServiceState::Stopped | ServiceState::Paused => ServiceStatus::Stopped,
            ServiceState::StartPending
            | ServiceState::StopPending
            | ServiceState::ContinuePending
            | ServiceState::PausePending => ServiceStatus::Pending,
        })
    }

    fn installed_command(&self, id: &str) -> Result<Option<LaunchCommand>> {
        let service = match self.open(id, ServiceAccess::QUERY_CONFIG) {
            Ok(service) => service,
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(describe(e, &format!("open service '{id}'"))),
        };
        let config = service
            .query_config()
            .map_err(|e| describe(e, &format!("query configuration of '{id}'")))?;
        let command_line = config.executable_path.to_string_lossy().to_string();
        let words = split_command_line(&command_line);
        let spec = HostSpec::from_args(words.get(1..).unwrap_or_default()).with_context(|| {
            format!("Service '{id}' was not registered by svcinstall: {command_line}")
        })?;
        Ok(Some(spec.launch))
    }

    fn render(&self, definition: &ServiceDefinition) -> Result<String> {
        let info = self.service_info(definition)?;
        let spec = HostSpec::from_definition(definition);
        let mut command_line = quote(info.executable_path.as_os_str());
        for arg in &info.launch_arguments {
            command_line.push(' ');
            command_line.push_str(&quote(arg));
        }
        Ok(format!(
            "Service:      {}\nDisplay name: {}\nDescription:  {}\nStart type:   automatic\nBinary path:  {}\nLogs:         {}\n",
            definition.id,
            definition.display_name,
            definition.description,
            command_line,
            spec.log_dir.display(),
        ))
    }

    fn show_logs(&self, definition: &ServiceDefinition, lines: u32, follow: bool) -> Result<()> {
        if follow {
            bail!("Following logs is not supported on Windows");
        }
        let spec = HostSpec::from_definition(definition);
        for path in [spec.host_log(), spec.stdout_log(), spec.stderr_log()] {
            println!("==> {} <==", path.display());
            match fs::read_to_string(&path) {
                Ok(contents) => {
                    for line in crate::host::tail(&contents, lines as usize) {
                        println!("{line}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => println!("(no log file yet)"),
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to read log file: {}", path.display()))
                }
            }
        }
        Ok(())
    }
}

fn is_missing(e: &windows_service::Error) -> bool {
    matches!(e, windows_service::Error::Winapi(io) if io.raw_os_error() == Some(ERROR_SERVICE_DOES_NOT_EXIST))
}

fn describe(e: windows_service::Error, action: &str) -> anyhow::Error {
    let denied = matches!(&e, windows_service::Error::Winapi(io) if io.raw_os_error() == Some(ERROR_ACCESS_DENIED));
    let err = anyhow::Error::new(e).context(format!("Failed to {action}"));
    if denied {
        err.context("Access denied: run as Administrator")
    } else {
        err
    }
}

fn quote(arg: &OsStr) -> String {
    let arg = arg.to_string_lossy();
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.to_string()
    }
}
