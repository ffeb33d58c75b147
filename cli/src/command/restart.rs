use anyhow::Result;
use clap::Args;

use crate::args::ConfigArgs;

#[derive(Debug, Args)]
pub struct Restart {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl Restart {
    pub fn run(&self) -> Result<()> {
        let service = self.config.service()?;

        print!("Restarting service '{}'...", service.config().name);
        service.restart()?;
        println!(" done.");
        Ok(())
    }
}
