use anyhow::Result;
use clap::Args;
use dialoguer::{theme::ColorfulTheme, Confirm};

use crate::args::ConfigArgs;

#[derive(Debug, Args)]
pub struct Uninstall {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(short, long, help = "Do not ask for confirmation")]
    pub yes: bool,
}

impl Uninstall {
    pub fn run(&self) -> Result<()> {
        let service = self.config.service()?;
        let name = &service.config().name;

        if !self.yes && atty::is(atty::Stream::Stdin) {
            let confirmed = Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Stop and remove service '{name}'?"))
                .default(false)
                .interact()?;
            if !confirmed {
                println!("Aborted.");
                return Ok(());
            }
        }

        print!("Uninstalling service '{name}'...");
        service.uninstall()?;
        println!(" done.");
        Ok(())
    }
}
