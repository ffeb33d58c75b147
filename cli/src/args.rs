use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use svclib::platform::{self, Scope, ServiceManager};
use svclib::{PartialConfig, Service, ServiceConfig};

/// Settings shared by every command that addresses a service.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    #[arg(short, long, help = "JSON file with service settings")]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        help = "Directory holding node_modules (default: current directory)"
    )]
    pub package_dir: Option<PathBuf>,
    #[arg(long, help = "Service name")]
    pub name: Option<String>,
    #[arg(long, help = "Service description")]
    pub description: Option<String>,
    #[arg(long, help = "Executable the service launches")]
    pub script: Option<PathBuf>,
    #[arg(
        long = "node-option",
        value_name = "FLAG",
        allow_hyphen_values = true,
        help = "Runtime flag for the launched process (repeatable, replaces the defaults)"
    )]
    pub node_options: Vec<String>,
    #[arg(long, help = "Runtime that executes the script [default: node]")]
    pub interpreter: Option<PathBuf>,
    #[arg(
        long,
        conflicts_with = "interpreter",
        help = "Launch the script directly instead of through a runtime"
    )]
    pub no_interpreter: bool,
    #[arg(
        long = "arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        help = "Argument passed after the script (repeatable)"
    )]
    pub script_args: Vec<String>,
    #[arg(long, help = "Working directory [default: the script's directory]")]
    pub working_dir: Option<PathBuf>,
    #[arg(
        long = "env",
        value_name = "KEY=VALUE",
        value_parser = parse_env,
        help = "Environment variable for the launched process (repeatable)"
    )]
    pub env: Vec<(String, String)>,
    #[arg(long, help = "Directory for the service's log files (Windows)")]
    pub log_dir: Option<PathBuf>,
    #[arg(long, help = "Register a per-user service (Linux)")]
    pub user: bool,
}

impl ConfigArgs {
    pub fn scope(&self) -> Scope {
        if self.user {
            Scope::User
        } else {
            Scope::System
        }
    }

    /// Defaults, then the config file, then flags.
    pub fn resolve(&self) -> Result<ServiceConfig> {
        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        let package_dir = match &self.package_dir {
            Some(dir) => cwd.join(dir),
            None => cwd.clone(),
        };

        let mut config = match &self.config {
            Some(path) => ServiceConfig::load(&cwd.join(path), &package_dir)?,
            None => ServiceConfig::defaults(&package_dir),
        };
        config.merge(self.overrides().relative_to(&cwd));
        Ok(config)
    }

    fn overrides(&self) -> PartialConfig {
        let interpreter = if self.no_interpreter {
            Some(PathBuf::new())
        } else {
            self.interpreter.clone()
        };
        PartialConfig {
            name: self.name.clone(),
            description: self.description.clone(),
            script: self.script.clone(),
            node_options: non_empty(&self.node_options),
            interpreter,
            script_args: non_empty(&self.script_args),
            working_directory: self.working_dir.clone(),
            env_vars: self.env.iter().cloned().collect(),
            log_dir: self.log_dir.clone(),
        }
    }

    pub fn service(&self) -> Result<Service<Box<dyn ServiceManager>>> {
        let config = self.resolve()?;
        let manager = platform::native(self.scope())?;
        Service::new(config, manager)
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

pub fn parse_env(s: &str) -> Result<(String, String), String> {
    let Some((key, value)) = s.split_once('=') else {
        return Err(format!("expected KEY=VALUE, got '{s}'"));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing variable name in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::fs;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        config: ConfigArgs,
    }

    fn parse(args: &[&str]) -> ConfigArgs {
        Harness::try_parse_from(std::iter::once("svcinstall").chain(args.iter().copied()))
            .unwrap()
            .config
    }

    #[test]
    fn test_defaults_without_flags() {
        let dir = tempfile::tempdir().unwrap();
        let args = ConfigArgs {
            package_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.name, "n8n-service");
        assert_eq!(config.script, dir.path().join("node_modules/.bin/n8n"));
        assert_eq!(config.node_options, vec!["--harmony", "--max_old_space_size=4096"]);
    }

    #[test]
    fn test_hyphenated_node_options_replace_defaults() {
        let args = parse(&[
            "--node-option",
            "--max_old_space_size=8192",
            "--node-option=--trace-warnings",
        ]);
        let config = args.resolve().unwrap();
        assert_eq!(
            config.node_options,
            vec!["--max_old_space_size=8192", "--trace-warnings"]
        );
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.json");
        fs::write(
            &path,
            r#"{ "name": "from-file", "description": "file", "script": "app.js" }"#,
        )
        .unwrap();

        let mut args = parse(&["--description", "flag", "--env", "TZ=UTC", "--no-interpreter"]);
        args.config = Some(path);
        let config = args.resolve().unwrap();

        assert_eq!(config.name, "from-file");
        assert_eq!(config.description, "flag");
        assert_eq!(config.script, dir.path().join("app.js"));
        assert_eq!(config.interpreter, None);
        assert_eq!(config.env_vars, vec![("TZ".to_string(), "UTC".to_string())]);
    }

    #[test]
    fn test_interpreter_conflicts_with_no_interpreter() {
        let result = Harness::try_parse_from([
            "svcinstall",
            "--interpreter",
            "bun",
            "--no-interpreter",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_env() {
        assert_eq!(
            parse_env("N8N_PORT=5678").unwrap(),
            ("N8N_PORT".to_string(), "5678".to_string())
        );
        assert_eq!(
            parse_env("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env("novalue").is_err());
        assert!(parse_env("=x").is_err());
    }

    #[test]
    fn test_user_flag_selects_user_scope() {
        assert_eq!(parse(&["--user"]).scope(), Scope::User);
        assert_eq!(parse(&[]).scope(), Scope::System);
    }
}
