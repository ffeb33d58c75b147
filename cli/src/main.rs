use anyhow::Result;
use clap::{Parser, Subcommand};

mod args;
mod command;
mod logging;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("SVCINSTALL_GIT_HASH"),
    ")"
);

#[derive(Parser)]
#[command(name = "svcinstall")]
#[command(about = "Register an executable as an operating-system service and start it")]
#[command(version = VERSION)]
struct Cli {
    /// Log every executed command and SCM call to stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Install the service and start it")]
    Install(command::Install),
    #[command(about = "Stop and remove the service")]
    #[command(alias = "remove")]
    Uninstall(command::Uninstall),
    #[command(about = "Start the service")]
    Start(command::Start),
    #[command(about = "Stop the service")]
    Stop(command::Stop),
    #[command(about = "Restart the service")]
    Restart(command::Restart),
    #[command(about = "Show whether the service is installed and running")]
    Status(command::Status),
    #[command(about = "Print the service definition without installing it")]
    Generate(command::Generate),
    #[command(about = "Show logs for the service")]
    Logs(command::Logs),
    #[command(hide = true)]
    Run(command::Run),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Commands::Run(run_cmd) => logging::init_file(&run_cmd.spec()?.host_log(), cli.verbose)?,
        _ => logging::init(cli.verbose),
    }
    match cli.command {
        Commands::Install(install_cmd) => install_cmd.run()?,
        Commands::Uninstall(uninstall_cmd) => uninstall_cmd.run()?,
        Commands::Start(start_cmd) => start_cmd.run()?,
        Commands::Stop(stop_cmd) => stop_cmd.run()?,
        Commands::Restart(restart_cmd) => restart_cmd.run()?,
        Commands::Status(status_cmd) => status_cmd.run()?,
        Commands::Generate(generate_cmd) => generate_cmd.run()?,
        Commands::Logs(logs_cmd) => logs_cmd.run()?,
        Commands::Run(run_cmd) => run_cmd.run()?,
    }
    Ok(())
}
