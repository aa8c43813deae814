use crate::cli::RestartArgs;
use crate::error::CliError;
use colored::Colorize;
use htcflow_client::{RestartCoordinator, Scheduler};

pub fn handle_restart(args: RestartArgs, scheduler: &dyn Scheduler) -> Result<(), CliError> {
    let outcome = RestartCoordinator::new(scheduler).restart(&args.id)?;
    let Some(run_id) = outcome.run_id else {
        return Err(CliError::RestartRefused(outcome.message));
    };

    println!("Run Id: {}", run_id.green());
    println!("Run Name: {}", outcome.run_name.unwrap_or_default());
    if !outcome.message.is_empty() {
        println!("{}", outcome.message.yellow());
    }
    Ok(())
}
