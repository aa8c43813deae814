use crate::cli::Commands;
use crate::error::CliError;
use htcflow_client::CondorCli;
use htcflow_core::config::Config;

pub mod prepare;
pub mod report;
pub mod restart;
pub mod submit;

pub fn run(command: Commands, config: &Config) -> Result<(), CliError> {
    let scheduler = CondorCli::new();
    match command {
        Commands::Prepare(args) => prepare::handle_prepare(args, config, &scheduler),
        Commands::Submit(args) => submit::handle_submit(args, &scheduler),
        Commands::Report(args) => report::handle_report(args, &scheduler),
        Commands::Restart(args) => restart::handle_restart(args, &scheduler),
    }
}
