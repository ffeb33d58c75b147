use anyhow::Result;
use clap::Args;

use crate::args::ConfigArgs;

#[derive(Debug, Args)]
pub struct Logs {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(
        short = 'n',
        long,
        default_value = "50",
        help = "Number of lines to show"
    )]
    pub lines: u32,
    #[arg(short, long, help = "Follow log output (like tail -f)")]
    pub follow: bool,
}

impl Logs {
    pub fn run(&self) -> Result<()> {
        let service = self.config.service()?;
        service.show_logs(self.lines, self.follow)
    }
}
