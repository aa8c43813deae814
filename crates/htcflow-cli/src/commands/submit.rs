use crate::cli::SubmitArgs;
use crate::error::CliError;
use colored::Colorize;
use htcflow_client::{submit, Scheduler, Submission};

pub fn handle_submit(args: SubmitArgs, scheduler: &dyn Scheduler) -> Result<(), CliError> {
    let submission = submit(scheduler, &args.submit_dir)?;
    print_submission(&submission);
    Ok(())
}

pub(crate) fn print_submission(submission: &Submission) {
    println!("Run Id: {}", submission.run_id.green());
    println!("Run Name: {}", submission.run_name);
    println!("Submit Directory: {}", submission.submit_dir.display());
}
