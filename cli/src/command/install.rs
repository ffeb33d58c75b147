use anyhow::Result;
use clap::Args;

use crate::args::ConfigArgs;
use svclib::platform::ServiceManager;
use svclib::{InstallOutcome, Service, ServiceEvent};

#[derive(Debug, Args)]
pub struct Install {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(long, help = "Register the service without starting it")]
    pub no_start: bool,
}

impl Install {
    pub fn run(&self) -> Result<()> {
        let mut service = self.config.service()?;
        let name = service.config().name.clone();
        service.on(move |event| {
            if let Some(message) = event_message(event, &name) {
                println!("{message}");
            }
        });

        if self.execute(&service)? == InstallOutcome::AlreadyInstalled {
            eprintln!("Run `svcinstall uninstall` first to change its configuration.");
        }
        Ok(())
    }

    fn execute<M: ServiceManager>(&self, service: &Service<M>) -> Result<InstallOutcome> {
        if self.no_start {
            service.install()
        } else {
            service.install_and_start()
        }
    }
}

/// What the user sees for each event. Errors surface through the returned `Result`.
fn event_message(event: &ServiceEvent, name: &str) -> Option<String> {
    match event {
        ServiceEvent::Install => Some(format!("Service '{name}' installed.")),
        ServiceEvent::AlreadyInstalled => Some(format!("Service '{name}' is already installed.")),
        ServiceEvent::Start => Some(format!("Service '{name}' started.")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use std::path::Path;
    use std::rc::Rc;
    use svclib::platform::ServiceStatus;
    use svclib::{LaunchCommand, ServiceConfig, ServiceDefinition};

    #[derive(Default)]
    struct FakeManager {
        installed: bool,
        calls: RefCell<Vec<String>>,
    }

    impl ServiceManager for &FakeManager {
        fn exists(&self, _id: &str) -> Result<bool> {
            Ok(self.installed)
        }
        fn install(&self, definition: &ServiceDefinition) -> Result<()> {
            self.calls.borrow_mut().push(format!("install {}", definition.id));
            Ok(())
        }
        fn start(&self, id: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("start {id}"));
            Ok(())
        }
        fn stop(&self, id: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("stop {id}"));
            Ok(())
        }
        fn uninstall(&self, id: &str) -> Result<()> {
            self.calls.borrow_mut().push(format!("uninstall {id}"));
            Ok(())
        }
        fn status(&self, _id: &str) -> Result<ServiceStatus> {
            Ok(ServiceStatus::Stopped)
        }
        fn installed_command(&self, _id: &str) -> Result<Option<LaunchCommand>> {
            Ok(None)
        }
        fn render(&self, definition: &ServiceDefinition) -> Result<String> {
            Ok(definition.id.clone())
        }
    }

    fn config(dir: &Path) -> ServiceConfig {
        let script = dir.join("node_modules/.bin/n8n");
        fs::create_dir_all(script.parent().unwrap()).unwrap();
        fs::write(&script, "").unwrap();
        let mut config = ServiceConfig::defaults(dir);
        config.interpreter = Some(dir.join("node"));
        config
    }

    /// Runs the command against `manager`, returning the outcome and the printed lines.
    fn install(no_start: bool, manager: &FakeManager, dir: &Path) -> (InstallOutcome, Vec<String>) {
        let command = Install {
            config: ConfigArgs::default(),
            no_start,
        };
        let mut service = Service::new(config(dir), manager).unwrap();
        let printed = Rc::new(RefCell::new(Vec::new()));
        let sink = printed.clone();
        service.on(move |event| {
            if let Some(message) = event_message(event, "n8n-service") {
                sink.borrow_mut().push(message);
            }
        });
        let outcome = command.execute(&service).unwrap();
        let printed = printed.borrow().clone();
        (outcome, printed)
    }

    #[test]
    fn test_install_starts_fresh_service() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FakeManager::default();

        let (outcome, printed) = install(false, &manager, dir.path());

        assert_eq!(outcome, InstallOutcome::Installed);
        assert_eq!(*manager.calls.borrow(), vec!["install n8nservice", "start n8nservice"]);
        assert_eq!(
            printed,
            vec![
                "Service 'n8n-service' installed.",
                "Service 'n8n-service' started."
            ]
        );
    }

    #[test]
    fn test_no_start_only_installs() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FakeManager::default();

        let (outcome, printed) = install(true, &manager, dir.path());

        assert_eq!(outcome, InstallOutcome::Installed);
        assert_eq!(*manager.calls.borrow(), vec!["install n8nservice"]);
        assert_eq!(printed, vec!["Service 'n8n-service' installed."]);
    }

    #[test]
    fn test_already_installed_is_reported_and_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let manager = FakeManager {
            installed: true,
            ..Default::default()
        };

        let (outcome, printed) = install(false, &manager, dir.path());

        assert_eq!(outcome, InstallOutcome::AlreadyInstalled);
        assert!(manager.calls.borrow().is_empty());
        assert_eq!(printed, vec!["Service 'n8n-service' is already installed."]);
    }

    #[test]
    fn test_event_message() {
        assert_eq!(event_message(&ServiceEvent::Stop, "svc"), None);
        assert_eq!(event_message(&ServiceEvent::Error("boom".into()), "svc"), None);
        assert_eq!(
            event_message(&ServiceEvent::Start, "svc").as_deref(),
            Some("Service 'svc' started.")
        );
    }
}
