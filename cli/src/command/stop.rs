use anyhow::{bail, Result};
use clap::Args;

use crate::args::ConfigArgs;
use svclib::platform::ServiceStatus;

#[derive(Debug, Args)]
pub struct Stop {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl Stop {
    pub fn run(&self) -> Result<()> {
        let service = self.config.service()?;
        let name = &service.config().name;

        match service.status()? {
            ServiceStatus::NotInstalled => bail!("Service '{}' not found.", name),
            ServiceStatus::Stopped => {
                println!("Service '{name}' is already stopped.");
                return Ok(());
            }
            ServiceStatus::Running | ServiceStatus::Pending => {}
        }

        print!("Stopping service '{name}'...");
        service.stop()?;
        println!(" done.");
        Ok(())
    }
}
