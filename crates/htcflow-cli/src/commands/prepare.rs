use crate::cli::PrepareArgs;
use crate::error::CliError;
use colored::Colorize;
use htcflow_client::{submit, Scheduler, SchedulerPool};
use htcflow_core::config::Config;
use htcflow_core::constants::attrs;
use htcflow_core::workflow::WorkflowGraph;
use htcflow_dag::prepare;

pub fn handle_prepare(
    args: PrepareArgs,
    config: &Config,
    scheduler: &dyn Scheduler,
) -> Result<(), CliError> {
    let graph = WorkflowGraph::from_file(&args.workflow)?;
    let prepared = prepare(config, &SchedulerPool(scheduler), &graph, &args.out)?;

    println!("Workflow: {}", graph.name.bold());
    println!("DAG file: {}", prepared.dag_file.display());
    if let Some(summary) = prepared
        .dag
        .attrs
        .get(attrs::WORKFLOW_JOB_SUMMARY)
        .and_then(|v| v.as_str())
    {
        println!("Jobs: {}", summary);
    }

    if args.submit {
        let submission = submit(scheduler, &args.out)?;
        super::submit::print_submission(&submission);
    }
    Ok(())
}
