use anyhow::{bail, Result};
use clap::Args;

use crate::args::ConfigArgs;
use svclib::platform::ServiceStatus;

#[derive(Debug, Args)]
pub struct Start {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl Start {
    pub fn run(&self) -> Result<()> {
        let service = self.config.service()?;
        let name = &service.config().name;

        match service.status()? {
            ServiceStatus::NotInstalled => bail!("Service '{}' not found.", name),
            ServiceStatus::Running => {
                println!("Service '{name}' is already running.");
                return Ok(());
            }
            ServiceStatus::Stopped | ServiceStatus::Pending => {}
        }

        print!("Starting service '{name}'...");
        service.start()?;
        println!(" done.");
        Ok(())
    }
}
