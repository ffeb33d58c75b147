use anyhow::Result;
use clap::Args;

use crate::args::ConfigArgs;

#[derive(Debug, Args)]
pub struct Generate {
    #[command(flatten)]
    pub config: ConfigArgs,
}

impl Generate {
    pub fn run(&self) -> Result<()> {
        let service = self.config.service()?;
        let content = service.render()?;
        print!("{content}");

        if !service.config().script.is_file() {
            eprintln!(
                "warning: {} does not exist yet; install will fail until it does.",
                service.config().script.display()
            );
        }
        Ok(())
    }
}
