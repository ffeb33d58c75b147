use super::{Scope, ServiceManager, ServiceStatus};
use crate::systemd::{generate_file, parse_systemd, MANAGED_BY_COMMENT};
use crate::{LaunchCommand, ServiceDefinition};
use anyhow::{anyhow, bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// systemd backend: one `<id>.service` unit per service.
#[derive(Debug, Clone)]
pub struct SystemdManager {
    scope: Scope,
    unit_dir: PathBuf,
    systemctl: PathBuf,
}

impl SystemdManager {
    pub fn new(scope: Scope) -> Result<Self> {
        let unit_dir = match scope {
            Scope::System => PathBuf::from("/etc/systemd/system"),
            Scope::User => dirs::config_dir()
                .context("Could not determine the user configuration directory")?
                .join("systemd/user"),
        };
        Ok(Self::with_unit_dir(scope, unit_dir))
    }

    pub fn with_unit_dir(scope: Scope, unit_dir: PathBuf) -> Self {
        Self {
            scope,
            unit_dir,
            systemctl: PathBuf::from("systemctl"),
        }
    }

    /// Use another `systemctl` binary.
    pub fn with_systemctl(mut self, program: impl Into<PathBuf>) -> Self {
        self.systemctl = program.into();
        self
    }

    pub fn unit_path(&self, id: &str) -> PathBuf {
        self.unit_dir.join(unit_name(id))
    }

    fn systemctl(&self, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.systemctl);
        if self.scope == Scope::User {
            cmd.arg("--user");
        }
        cmd.args(args);
        tracing::debug!(command = ?cmd, "executing");
        cmd.output().context("Failed to execute systemctl")
    }

    fn systemctl_checked(&self, args: &[&str], action: &str, id: &str) -> Result<()> {
        let output = self.systemctl(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Failed to {} service '{}': {}{}",
                action,
                id,
                stderr.trim(),
                privilege_hint(&stderr)
            ));
        }
        Ok(())
    }

    fn refresh_daemon(&self) -> Result<()> {
        let output = self.systemctl(&["daemon-reload"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "Failed to reload systemd units: {}{}",
                stderr.trim(),
                privilege_hint(&stderr)
            );
        }
        Ok(())
    }

    fn activate(&self, id: &str) -> Result<()> {
        self.refresh_daemon()?;
        self.systemctl_checked(&["enable", &unit_name(id)], "enable", id)
    }
}

impl ServiceManager for SystemdManager {
    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.unit_path(id).exists())
    }

    fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        fs::create_dir_all(&self.unit_dir).with_context(|| {
            format!("Failed to create systemd unit directory: {}", self.unit_dir.display())
        })?;

        let path = self.unit_path(&definition.id);
        let content = generate_file(definition, self.scope)?;
        fs::write(&path, content).with_context(|| {
            format!("Failed to write unit file: {}{}", path.display(), write_hint(&self.unit_dir))
        })?;
        tracing::debug!(path = %path.display(), "wrote unit file");

        if let Err(e) = self.activate(&definition.id) {
            // A unit systemd never accepted must not look installed.
            if let Err(remove) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), "Failed to remove unit file: {remove}");
            } else if let Err(reload) = self.refresh_daemon() {
                tracing::debug!("{reload:#}");
            }
            return Err(e);
        }
        Ok(())
    }

    fn start(&self, id: &str) -> Result<()> {
        self.systemctl_checked(&["start", &unit_name(id)], "start", id)
    }

    fn stop(&self, id: &str) -> Result<()> {
        self.systemctl_checked(&["stop", &unit_name(id)], "stop", id)
    }

    fn uninstall(&self, id: &str) -> Result<()> {
        let path = self.unit_path(id);
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read unit file: {}", path.display()))?;
        if !contents.starts_with(MANAGED_BY_COMMENT) {
            bail!(
                "Refusing to remove {}: it was not created by svcinstall",
                path.display()
            );
        }

        self.systemctl_checked(&["disable", &unit_name(id)], "disable", id)?;
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove unit file: {}", path.display()))?;
        self.refresh_daemon()
    }

    fn status(&self, id: &str) -> Result<ServiceStatus> {
        if !self.exists(id)? {
            return Ok(ServiceStatus::NotInstalled);
        }
        let output = self.systemctl(&["is-active", &unit_name(id)])?;
        let state = String::from_utf8_lossy(&output.stdout);
        Ok(parse_active_state(state.trim()))
    }

    fn installed_command(&self, id: &str) -> Result<Option<LaunchCommand>> {
        let path = self.unit_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read unit file: {}", path.display()))?;
        let details = parse_systemd(&contents)
            .with_context(|| format!("Failed to parse unit file: {}", path.display()))?;
        Ok(Some(details.launch))
    }

    fn render(&self, definition: &ServiceDefinition) -> Result<String> {
        let content = generate_file(definition, self.scope)?;
        Ok(format!(
            "# {}\n{}",
            self.unit_path(&definition.id).display(),
            content
        ))
    }

    fn show_logs(&self, definition: &ServiceDefinition, lines: u32, follow: bool) -> Result<()> {
        let mut cmd = Command::new("journalctl");
        if self.scope == Scope::User {
            cmd.arg("--user");
        }
        cmd.args(["-u", &unit_name(&definition.id)]);
        cmd.arg("-n").arg(lines.to_string());
        if follow {
            cmd.arg("-f");
        }
        cmd.arg("--no-pager");
        tracing::debug!(command = ?cmd, "executing");

        let status = cmd
            .status()
            .context("Failed to execute journalctl command")?;
        if !status.success() {
            return Err(anyhow!("Journalctl command failed with status: {}", status));
        }
        Ok(())
    }
}

fn unit_name(id: &str) -> String {
    format!("{id}.service")
}

fn parse_active_state(state: &str) -> ServiceStatus {
    match state {
        "active" | "reloading" => ServiceStatus::Running,
        "activating" | "deactivating" => ServiceStatus::Pending,
        _ => ServiceStatus::Stopped,
    }
}

fn privilege_hint(stderr: &str) -> &'static str {
    if stderr.contains("Access denied") || stderr.contains("Interactive authentication required") {
        " (try again as root)"
    } else {
        ""
    }
}

fn write_hint(dir: &Path) -> String {
    match fs::metadata(dir) {
        Ok(meta) if meta.permissions().readonly() => " (directory is read-only)".to_string(),
        Ok(_) if dir.starts_with("/etc") => " (try again as root)".to_string(),
        _ => String::new(),
    }
}
