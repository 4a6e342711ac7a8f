//! castkeeper - keeps a web page cast to a smart display
//!
//! # Usage
//!
//! ```bash
//! # Run the daemon (what the service unit starts)
//! castkeeper --config /etc/castkeeper/config.toml
//!
//! # One-shot helpers
//! castkeeper locate --json
//! castkeeper check
//! ```

use clap::Parser;

use castkeeper::cli::{Cli, Command, ExitCode, Output};
use castkeeper::commands;
use castkeeper::config::Config;
use castkeeper::logging;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    run(cli).await.into()
}

async fn run(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => return output.error(e.to_string(), ExitCode::ConfigError),
    };
    cli.overrides.apply(&mut config);

    if let Err(e) = config.validate() {
        return output.error(e.to_string(), ExitCode::ConfigError);
    }

    let command = cli.command.unwrap_or(Command::Run);

    // One-shot commands keep stdout for their result
    let log_file = match command {
        Command::Run => config.log_file.clone(),
        _ => None,
    };
    if command == Command::Run || cli.verbose {
        if let Err(e) = logging::init(log_file.as_deref(), cli.verbose) {
            return output.error(e.to_string(), commands::startup_exit_code(&e));
        }
    }

    match command {
        Command::Run => commands::run_cmd(config).await,
        Command::Locate => commands::locate_cmd(&config, &output).await,
        Command::Check => commands::check_cmd(&config, &output).await,
    }
}

