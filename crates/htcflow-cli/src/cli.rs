use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "htcflow",
    author,
    version,
    about = "Runs workflow graphs on HTCondor through DAGMan.",
    long_about = "Translates a workflow graph into a DAGMan submit directory, submits it, \
                  reports on its progress and restarts it from its rescue DAG."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        long,
        global = true,
        help = "Path to a config.toml used instead of the user configuration"
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true, help = "Increase verbosity level (-v for debug, -vv for trace)")]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Write the submit directory of a workflow")]
    Prepare(PrepareArgs),

    #[command(about = "Submit a prepared workflow to HTCondor")]
    Submit(SubmitArgs),

    #[command(about = "Report the status of one run or summarize all runs")]
    Report(ReportArgs),

    #[command(about = "Restart a failed run from its rescue DAG")]
    Restart(RestartArgs),
}

#[derive(Args)]
pub struct PrepareArgs {
    #[arg(short, long, help = "Workflow graph in JSON")]
    pub workflow: PathBuf,

    #[arg(short, long, help = "Submit directory to create")]
    pub out: PathBuf,

    #[arg(long, help = "Submit the workflow once it is prepared")]
    pub submit: bool,
}

#[derive(Args)]
pub struct SubmitArgs {
    #[arg(help = "Submit directory written by 'prepare'")]
    pub submit_dir: PathBuf,
}

#[derive(Args)]
pub struct ReportArgs {
    #[arg(help = "Run id (ClusterId, global job id) or submit directory")]
    pub id: Option<String>,

    #[arg(long, help = "Also search runs that finished within this many days")]
    pub hist: Option<f64>,

    #[arg(long, help = "Only summarize runs of this user")]
    pub user: Option<String>,

    #[arg(long, help = "ClassAd constraint selecting the runs to summarize")]
    pub pass_thru: Option<String>,

    #[arg(long, help = "Query every scheduler daemon in the pool")]
    pub global: bool,

    #[arg(long, help = "Print the reports as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct RestartArgs {
    #[arg(help = "Run id (ClusterId, global job id) or submit directory")]
    pub id: String,
}
