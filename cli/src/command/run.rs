use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use crate::args::parse_env;
use svclib::host::HostSpec;
use svclib::LaunchCommand;

/// Service host entry point, as registered with the Windows SCM.
#[derive(Debug, Args)]
pub struct Run {
    #[arg(long, help = "Id the service is registered under")]
    pub service_name: String,
    #[arg(long, help = "Directory for output and host logs")]
    pub log_dir: PathBuf,
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Run {
    pub fn spec(&self) -> Result<HostSpec> {
        let (program, arguments) = self
            .command
            .split_first()
            .context("No command to run")?;
        Ok(HostSpec {
            service_name: self.service_name.clone(),
            launch: LaunchCommand {
                program: PathBuf::from(program),
                arguments: arguments.to_vec(),
                working_directory: self.working_dir.clone(),
                env_vars: self.env.clone(),
            },
            log_dir: self.log_dir.clone(),
        })
    }

    pub fn run(&self) -> Result<()> {
        let spec = self.spec()?;
        tracing::info!(service = %spec.service_name, "service host starting");
        #[cfg(windows)]
        {
            svclib::host::run(spec)
        }
        #[cfg(not(windows))]
        {
            anyhow::bail!(
                "The service host only runs under the Windows service control manager (service '{}')",
                spec.service_name
            )
        }
    }
}
