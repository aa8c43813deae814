mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::Cli;
use colored::Colorize;
use error::CliError;
use htcflow_core::config::Config;
use htcflow_core::logging::{self, LogLevel};

fn main() {
    let cli = Cli::parse();

    logging::set_log_level_from_env();
    if cli.verbose > 0 {
        logging::set_log_level(LogLevel::from_verbosity(cli.verbose));
    }

    let config = Config::load(cli.config.as_deref());
    let logging_config = config
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    if let Err(e) = logging::init_session_logger(&logging_config) {
        eprintln!(
            "{}",
            format!("[ERROR] Failed to initialize session logger: {}", e).red()
        );
        logging::init_stderr_logger();
    }

    let result = config
        .map_err(CliError::from)
        .and_then(|config| commands::run(cli.command, &config));
    if let Err(e) = result {
        tracing::error!("{}", e);
        eprintln!("{}", format!("[ERROR] {}", e).red());
        std::process::exit(1);
    }
}
