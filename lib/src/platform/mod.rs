#[cfg(target_os = "linux")]
mod linux;
#[cfg(windows)]
mod windows;

use crate::{LaunchCommand, ServiceDefinition};
use anyhow::Result;
use std::fmt;

#[cfg(target_os = "linux")]
pub use linux::SystemdManager;
#[cfg(windows)]
pub use windows::ScmManager;

/// Where a service is registered. Only systemd distinguishes the two;
/// the Windows SCM is always machine-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    System,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Running,
    Stopped,
    Pending,
    NotInstalled,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Pending => "pending",
            ServiceStatus::NotInstalled => "not installed",
        };
        f.write_str(s)
    }
}

/// The operating system's service manager. Services are addressed by id.
pub trait ServiceManager {
    fn exists(&self, id: &str) -> Result<bool>;
    /// Register the service to start at boot. Does not start it.
    fn install(&self, definition: &ServiceDefinition) -> Result<()>;
    fn start(&self, id: &str) -> Result<()>;
    fn stop(&self, id: &str) -> Result<()>;
    /// Remove the registration. The service is expected to be stopped.
    fn uninstall(&self, id: &str) -> Result<()>;
    fn status(&self, id: &str) -> Result<ServiceStatus>;
    /// The command line the service manager currently has registered,
    /// or `None` when the service is not installed.
    fn installed_command(&self, id: &str) -> Result<Option<LaunchCommand>>;
    /// Human-readable rendering of what `install` would register.
    fn render(&self, definition: &ServiceDefinition) -> Result<String>;
    /// Print the last `lines` lines of the service's output.
    fn show_logs(&self, definition: &ServiceDefinition, lines: u32, follow: bool) -> Result<()> {
        let _ = (lines, follow);
        anyhow::bail!("Logs are not available for service '{}'", definition.id)
    }
}

impl<M: ServiceManager + ?Sized> ServiceManager for Box<M> {
    fn exists(&self, id: &str) -> Result<bool> {
        (**self).exists(id)
    }
    fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        (**self).install(definition)
    }
    fn start(&self, id: &str) -> Result<()> {
        (**self).start(id)
    }
    fn stop(&self, id: &str) -> Result<()> {
        (**self).stop(id)
    }
    fn uninstall(&self, id: &str) -> Result<()> {
        (**self).uninstall(id)
    }
    fn status(&self, id: &str) -> Result<ServiceStatus> {
        (**self).status(id)
    }
    fn installed_command(&self, id: &str) -> Result<Option<LaunchCommand>> {
        (**self).installed_command(id)
    }
    fn render(&self, definition: &ServiceDefinition) -> Result<String> {
        (**self).render(definition)
    }
    fn show_logs(&self, definition: &ServiceDefinition, lines: u32, follow: bool) -> Result<()> {
        (**self).show_logs(definition, lines, follow)
    }
}

/// The service manager of the running platform.
#[cfg(target_os = "linux")]
pub fn native(scope: Scope) -> Result<Box<dyn ServiceManager>> {
    Ok(Box::new(SystemdManager::new(scope)?))
}

#[cfg(windows)]
pub fn native(scope: Scope) -> Result<Box<dyn ServiceManager>> {
    if scope == Scope::User {
        tracing::warn!("Windows services are always registered machine-wide; ignoring user scope");
    }
    Ok(Box::new(ScmManager::new()))
}

#[cfg(not(any(target_os = "linux", windows)))]
pub fn native(_scope: Scope) -> Result<Box<dyn ServiceManager>> {
    anyhow::bail!("Unsupported platform: only Windows and Linux services can be installed")
}
