pub mod host;
pub mod platform;
pub mod service;
pub mod systemd;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

pub use service::{InstallOutcome, Service, ServiceEvent};

pub const DEFAULT_NAME: &str = "n8n-service";
pub const DEFAULT_DESCRIPTION: &str = "n8n automation service";
pub const DEFAULT_INTERPRETER: &str = "node";
pub const DEFAULT_NODE_OPTIONS: &[&str] = &["--harmony", "--max_old_space_size=4096"];

/// What gets registered: the service's identity and the process it launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub name: String,
    pub description: String,
    pub script: PathBuf,
    pub node_options: Vec<String>,
    pub interpreter: Option<PathBuf>,
    pub script_args: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub env_vars: Vec<(String, String)>,
    pub log_dir: Option<PathBuf>,
}

/// A config with every field optional, as read from a config file or the command line.
///
/// An empty `interpreter` string means "run the script directly". In JSON,
/// environment variables are an `"env": {"KEY": "VALUE"}` object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PartialConfig {
    pub name: Option<String>,
    pub description: Option<String>,
    pub script: Option<PathBuf>,
    pub node_options: Option<Vec<String>>,
    pub interpreter: Option<PathBuf>,
    pub script_args: Option<Vec<String>>,
    pub working_directory: Option<PathBuf>,
    #[serde(default, rename = "env")]
    pub env_vars: BTreeMap<String, String>,
    pub log_dir: Option<PathBuf>,
}

/// The program and arguments the service runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub arguments: Vec<String>,
    pub working_directory: Option<PathBuf>,
    pub env_vars: Vec<(String, String)>,
}

/// Everything a backend needs to register a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub launch: LaunchCommand,
    pub log_dir: PathBuf,
}

impl ServiceConfig {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        script: impl Into<PathBuf>,
        node_options: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            script: script.into(),
            node_options,
            interpreter: Some(PathBuf::from(DEFAULT_INTERPRETER)),
            script_args: Vec::new(),
            working_directory: None,
            env_vars: Vec::new(),
            log_dir: None,
        }
    }

    /// The stock n8n service, with the script looked up under `package_dir`.
    pub fn defaults(package_dir: &Path) -> Self {
        Self::new(
            DEFAULT_NAME,
            DEFAULT_DESCRIPTION,
            package_dir.join("node_modules").join(".bin").join("n8n"),
            DEFAULT_NODE_OPTIONS.iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Defaults overlaid with a JSON config file. Relative paths in the file
    /// are taken relative to the file's directory.
    pub fn load(path: &Path, package_dir: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let partial: PartialConfig = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = Self::defaults(package_dir);
        config.merge(partial.relative_to(base));
        Ok(config)
    }

    /// Overwrite every field `partial` sets. Environment variables accumulate.
    pub fn merge(&mut self, partial: PartialConfig) {
        if let Some(name) = partial.name {
            self.name = name;
        }
        if let Some(description) = partial.description {
            self.description = description;
        }
        if let Some(script) = partial.script {
            self.script = script;
        }
        if let Some(node_options) = partial.node_options {
            self.node_options = node_options;
        }
        if let Some(interpreter) = partial.interpreter {
            self.interpreter = if interpreter.as_os_str().is_empty() {
                None
            } else {
                Some(interpreter)
            };
        }
        if let Some(script_args) = partial.script_args {
            self.script_args = script_args;
        }
        if let Some(wd) = partial.working_directory {
            self.working_directory = Some(wd);
        }
        for (key, value) in partial.env_vars {
            self.env_vars.retain(|(k, _)| *k != key);
            self.env_vars.push((key, value));
        }
        if let Some(log_dir) = partial.log_dir {
            self.log_dir = Some(log_dir);
        }
    }

    /// Name used as the SCM key and unit file stem: word characters only, lowercase.
    pub fn service_id(&self) -> String {
        service_id(&self.name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("Service name cannot be empty");
        }
        if self.service_id().is_empty() {
            bail!(
                "Service name '{}' must contain at least one letter, digit or underscore",
                self.name
            );
        }
        if self.script.as_os_str().is_empty() {
            bail!("Script path cannot be empty");
        }
        if let Some(flag) = self.node_options.iter().find(|f| f.trim().is_empty()) {
            bail!("Runtime flags cannot be empty (got {:?})", flag);
        }
        if let Some((key, _)) = self.env_vars.iter().find(|(k, _)| k.is_empty() || k.contains('=')) {
            bail!("Invalid environment variable name {:?}", key);
        }

        // Service definitions are line-oriented; a newline would start a new directive.
        let paths = [
            Some(&self.script),
            self.interpreter.as_ref(),
            self.working_directory.as_ref(),
            self.log_dir.as_ref(),
        ];
        let texts = [&self.name, &self.description]
            .into_iter()
            .chain(&self.node_options)
            .chain(&self.script_args)
            .chain(self.env_vars.iter().flat_map(|(k, v)| [k, v]))
            .map(|s| s.to_string())
            .chain(paths.into_iter().flatten().map(|p| p.to_string_lossy().to_string()));
        for text in texts {
            if text.contains(char::is_control) {
                bail!("Control characters are not allowed in service settings (got {:?})", text);
            }
        }
        Ok(())
    }

    pub fn launch_command(&self) -> LaunchCommand {
        let script = self.script.to_string_lossy().to_string();
        let (program, mut arguments) = match &self.interpreter {
            Some(interpreter) => {
                let mut args = self.node_options.clone();
                args.push(script);
                (interpreter.clone(), args)
            }
            None => (self.script.clone(), self.node_options.clone()),
        };
        arguments.extend(self.script_args.iter().cloned());

        let working_directory = self
            .working_directory
            .clone()
            .or_else(|| self.script.parent().filter(|p| !p.as_os_str().is_empty()).map(Path::to_path_buf));

        LaunchCommand {
            program,
            arguments,
            working_directory,
            env_vars: self.env_vars.clone(),
        }
    }

    /// The log directory: configured, or a `daemon` folder next to the script.
    pub fn log_dir(&self) -> PathBuf {
        match &self.log_dir {
            Some(dir) => dir.clone(),
            None => self
                .script
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("daemon"),
        }
    }

    /// Validate and resolve into what a backend registers. A bare interpreter
    /// name is looked up on `PATH`, since service managers do not search it.
    pub fn definition(&self) -> Result<ServiceDefinition> {
        self.validate()?;
        let mut launch = self.launch_command();
        if is_bare_name(&launch.program) {
            let path_var = std::env::var_os("PATH").unwrap_or_default();
            launch.program = find_in_path(&launch.program, &path_var)
                .ok_or_else(|| anyhow!("Binary '{}' not found in PATH", launch.program.display()))?;
        }
        Ok(ServiceDefinition {
            id: self.service_id(),
            display_name: self.name.clone(),
            description: self.description.clone(),
            launch,
            log_dir: self.log_dir(),
        })
    }
}

impl PartialConfig {
    /// Anchor relative paths at `base`.
    pub fn relative_to(mut self, base: &Path) -> Self {
        let anchor = |p: PathBuf| if p.is_relative() { base.join(p) } else { p };
        self.script = self.script.map(anchor);
        self.working_directory = self.working_directory.map(anchor);
        self.log_dir = self.log_dir.map(anchor);
        self
    }
}

pub fn service_id(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_lowercase()
}

fn is_bare_name(program: &Path) -> bool {
    program.components().count() == 1 && !program.is_absolute()
}

/// Search a `PATH`-style variable for an existing file named `binary`.
pub fn find_in_path(binary: &Path, path_var: &OsStr) -> Option<PathBuf> {
    for dir in std::env::split_paths(path_var) {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) && candidate.extension().is_none() {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n8n() -> ServiceConfig {
        ServiceConfig::defaults(Path::new("/srv/app"))
    }

    #[test]
    fn test_defaults_match_stock_service() {
        let config = n8n();
        assert_eq!(config.name, "n8n-service");
        assert_eq!(config.description, "n8n automation service");
        assert_eq!(config.script, PathBuf::from("/srv/app/node_modules/.bin/n8n"));
        assert_eq!(config.node_options, vec!["--harmony", "--max_old_space_size=4096"]);
        assert_eq!(config.interpreter, Some(PathBuf::from("node")));
    }

    #[test]
    fn test_service_id_strips_non_word_characters() {
        assert_eq!(service_id("n8n-service"), "n8nservice");
        assert_eq!(service_id("My Service_2.0"), "myservice_20");
        assert_eq!(service_id("---"), "");
    }

    #[test]
    fn test_launch_command_preserves_flag_order() {
        let mut config = n8n();
        config.script_args = vec!["start".to_string()];
        let launch = config.launch_command();
        assert_eq!(launch.program, PathBuf::from("node"));
        assert_eq!(
            launch.arguments,
            vec![
                "--harmony",
                "--max_old_space_size=4096",
                "/srv/app/node_modules/.bin/n8n",
                "start"
            ]
        );
        assert_eq!(
            launch.working_directory,
            Some(PathBuf::from("/srv/app/node_modules/.bin"))
        );
    }

    #[test]
    fn test_launch_command_without_interpreter() {
        let mut config = ServiceConfig::new("svc", "d", "/opt/bin/server", vec!["--fast".into()]);
        config.interpreter = None;
        config.working_directory = Some(PathBuf::from("/var/lib/svc"));
        let launch = config.launch_command();
        assert_eq!(launch.program, PathBuf::from("/opt/bin/server"));
        assert_eq!(launch.arguments, vec!["--fast"]);
        assert_eq!(launch.working_directory, Some(PathBuf::from("/var/lib/svc")));
    }

    #[test]
    fn test_validate_rejects_bad_names_and_flags() {
        let mut config = n8n();
        assert!(config.validate().is_ok());

        config.name = "  ".into();
        assert!(config.validate().is_err());

        config.name = "!!".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("at least one letter"));

        config = n8n();
        config.node_options.push(String::new());
        assert!(config.validate().is_err());

        config = n8n();
        config.env_vars.push(("A=B".into(), "c".into()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_control_characters() {
        let mut config = n8n();
        config.node_options.push("a\nUser=root".into());
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Control characters"));

        config = n8n();
        config.env_vars.push(("TZ".into(), "UTC\r\nUser=root".into()));
        assert!(config.validate().is_err());

        config = n8n();
        config.description = "first\nsecond".into();
        assert!(config.validate().is_err());

        config = n8n();
        config.working_directory = Some(PathBuf::from("/srv/a\tb"));
        assert!(config.validate().is_err());

        config = n8n();
        config.node_options.push("--title=50%n".into());
        config.script_args.push("--x=$HOME".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_env_pair_lists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(&path, r#"{ "env": [["TZ", "UTC"]] }"#).unwrap();
        assert!(ServiceConfig::load(&path, dir.path()).is_err());
    }

    #[test]
    fn test_merge_overrides_only_set_fields() {
        let mut config = n8n();
        config.env_vars.push(("N8N_PORT".into(), "5678".into()));
        config.merge(PartialConfig {
            description: Some("custom".into()),
            interpreter: Some(PathBuf::new()),
            env_vars: BTreeMap::from([
                ("N8N_PORT".to_string(), "8080".to_string()),
                ("TZ".to_string(), "UTC".to_string()),
            ]),
            ..Default::default()
        });
        assert_eq!(config.name, "n8n-service");
        assert_eq!(config.description, "custom");
        assert_eq!(config.interpreter, None);
        assert_eq!(
            config.env_vars,
            vec![
                ("N8N_PORT".to_string(), "8080".to_string()),
                ("TZ".to_string(), "UTC".to_string())
            ]
        );
    }

    #[test]
    fn test_load_resolves_relative_paths_against_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(
            &path,
            r#"{
                "name": "worker",
                "script": "bin/worker.js",
                "nodeOptions": ["--max_old_space_size=1024"],
                "env": { "NODE_ENV": "production" }
            }"#,
        )
        .unwrap();

        let config = ServiceConfig::load(&path, Path::new("/unused")).unwrap();
        assert_eq!(config.name, "worker");
        assert_eq!(config.description, DEFAULT_DESCRIPTION);
        assert_eq!(config.script, dir.path().join("bin/worker.js"));
        assert_eq!(config.node_options, vec!["--max_old_space_size=1024"]);
        assert_eq!(
            config.env_vars,
            vec![("NODE_ENV".to_string(), "production".to_string())]
        );
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        fs::write(&path, r#"{ "nodeOption": ["--harmony"] }"#).unwrap();
        let err = ServiceConfig::load(&path, dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown field"));
    }

    #[test]
    fn test_log_dir_defaults_next_to_script() {
        let config = n8n();
        assert_eq!(config.log_dir(), PathBuf::from("/srv/app/node_modules/.bin/daemon"));
    }

    #[test]
    fn test_find_in_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("node");
        fs::write(&bin, "").unwrap();
        let path_var = std::env::join_paths([Path::new("/nonexistent"), dir.path()]).unwrap();
        assert_eq!(find_in_path(Path::new("node"), &path_var), Some(bin));
        assert_eq!(find_in_path(Path::new("deno"), &path_var), None);
    }

    #[test]
    fn test_definition_keeps_absolute_interpreter() {
        let mut config = n8n();
        config.interpreter = Some(PathBuf::from("/usr/bin/node"));
        let definition = config.definition().unwrap();
        assert_eq!(definition.id, "n8nservice");
        assert_eq!(definition.display_name, "n8n-service");
        assert_eq!(definition.launch.program, PathBuf::from("/usr/bin/node"));
    }
}
