use crate::platform::{ServiceManager, ServiceStatus};
use crate::{LaunchCommand, ServiceConfig};
use anyhow::{bail, Result};
use std::fmt;

/// Lifecycle notifications emitted by [`Service`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    Install,
    AlreadyInstalled,
    Start,
    Stop,
    Uninstall,
    Error(String),
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceEvent::Install => f.write_str("install"),
            ServiceEvent::AlreadyInstalled => f.write_str("alreadyinstalled"),
            ServiceEvent::Start => f.write_str("start"),
            ServiceEvent::Stop => f.write_str("stop"),
            ServiceEvent::Uninstall => f.write_str("uninstall"),
            ServiceEvent::Error(message) => write!(f, "error: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

type Listener = Box<dyn Fn(&ServiceEvent)>;

/// A configured service bound to a service manager.
pub struct Service<M> {
    config: ServiceConfig,
    manager: M,
    listeners: Vec<Listener>,
}

impl<M: ServiceManager> Service<M> {
    pub fn new(config: ServiceConfig, manager: M) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            manager,
            listeners: Vec::new(),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn id(&self) -> String {
        self.config.service_id()
    }

    /// Subscribe to lifecycle events. Listeners run in registration order.
    pub fn on(&mut self, listener: impl Fn(&ServiceEvent) + 'static) -> &mut Self {
        self.listeners.push(Box::new(listener));
        self
    }

    fn emit(&self, event: ServiceEvent) {
        match &event {
            ServiceEvent::Error(message) => {
                tracing::error!(service = %self.config.name, "{message}")
            }
            _ => tracing::info!(service = %self.config.name, %event, "service event"),
        }
        for listener in &self.listeners {
            listener(&event);
        }
    }

    /// Emit a failure as [`ServiceEvent::Error`] before handing it back.
    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.emit(ServiceEvent::Error(format!("{e:#}")));
        }
        result
    }

    /// Register the service with the OS. An existing registration is left untouched.
    pub fn install(&self) -> Result<InstallOutcome> {
        let outcome = self.report(self.try_install())?;
        match outcome {
            InstallOutcome::Installed => self.emit(ServiceEvent::Install),
            InstallOutcome::AlreadyInstalled => self.emit(ServiceEvent::AlreadyInstalled),
        }
        Ok(outcome)
    }

    fn try_install(&self) -> Result<InstallOutcome> {
        if !self.config.script.is_file() {
            bail!("Script not found: {}", self.config.script.display());
        }
        let definition = self.config.definition()?;
        if self.manager.exists(&definition.id)? {
            return Ok(InstallOutcome::AlreadyInstalled);
        }
        self.manager.install(&definition)?;
        Ok(InstallOutcome::Installed)
    }

    /// Install, and start the service once the install has happened.
    pub fn install_and_start(&self) -> Result<InstallOutcome> {
        let outcome = self.install()?;
        if outcome == InstallOutcome::Installed {
            self.start()?;
        }
        Ok(outcome)
    }

    pub fn start(&self) -> Result<()> {
        self.report(self.manager.start(&self.id()))?;
        self.emit(ServiceEvent::Start);
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.report(self.manager.stop(&self.id()))?;
        self.emit(ServiceEvent::Stop);
        Ok(())
    }

    pub fn restart(&self) -> Result<()> {
        if self.status()? == ServiceStatus::Running {
            self.stop()?;
        }
        self.start()
    }

    /// Stop the service if needed, then remove its registration.
    pub fn uninstall(&self) -> Result<()> {
        self.report(self.try_uninstall())?;
        self.emit(ServiceEvent::Uninstall);
        Ok(())
    }

    fn try_uninstall(&self) -> Result<()> {
        let id = self.id();
        match self.manager.status(&id)? {
            ServiceStatus::NotInstalled => bail!("Service '{}' is not installed", self.config.name),
            ServiceStatus::Running | ServiceStatus::Pending => {
                self.manager.stop(&id)?;
                self.emit(ServiceEvent::Stop);
            }
            ServiceStatus::Stopped => {}
        }
        self.manager.uninstall(&id)
    }

    pub fn status(&self) -> Result<ServiceStatus> {
        self.report(self.manager.status(&self.id()))
    }

    /// The command line registered with the service manager, which may differ
    /// from the current configuration if it changed since the install.
    pub fn installed_command(&self) -> Result<Option<LaunchCommand>> {
        self.report(self.manager.installed_command(&self.id()))
    }

    /// What `install` would register, rendered for the current platform.
    pub fn render(&self) -> Result<String> {
        let definition = self.config.definition()?;
        self.manager.render(&definition)
    }

    pub fn show_logs(&self, lines: u32, follow: bool) -> Result<()> {
        let definition = self.config.definition()?;
        self.manager.show_logs(&definition, lines, follow)
    }
}
