use anyhow::Result;
use clap::Args;
use tabled::{
    settings::{Padding, Style},
    Table, Tabled,
};

use crate::args::ConfigArgs;
use svclib::LaunchCommand;

#[derive(Debug, Args)]
pub struct Status {
    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Command")]
    command: String,
}

impl Status {
    pub fn run(&self) -> Result<()> {
        let service = self.config.service()?;
        let row = StatusRow {
            name: service.config().name.clone(),
            id: service.id(),
            status: service.status()?.to_string(),
            command: command_line(service.installed_command()?.as_ref()),
        };

        if atty::isnt(atty::Stream::Stdout) {
            println!("{}\t{}\t{}\t{}", row.name, row.id, row.status, row.command);
        } else {
            let mut table = Table::new([row]);
            table.with(Style::blank()).with(Padding::zero());
            println!("{table}");
        }
        Ok(())
    }
}

/// The registered command as one line, or `-` when nothing is registered.
fn command_line(launch: Option<&LaunchCommand>) -> String {
    let Some(launch) = launch else {
        return "-".to_string();
    };
    let mut command = launch.program.display().to_string();
    for arg in &launch.arguments {
        command.push(' ');
        if arg.is_empty() || arg.contains(char::is_whitespace) {
            command.push_str(&format!("\"{arg}\""));
        } else {
            command.push_str(arg);
        }
    }
    command
}
