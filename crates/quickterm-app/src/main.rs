use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use quickterm_broker::BrokerClient;
use quickterm_core::config::default_config_path;
use quickterm_core::QuicktermConfig;
use tracing::warn;

mod cli;
mod daemon;
mod executor;
mod launcher;
mod presenter;

use cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_log_filter(cli.daemon).into()),
        )
        .init();

    let config_path = default_config_path();
    if cli.print_config_path {
        println!("{}", config_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    if let Err(e) = QuicktermConfig::write_default_if_missing(&config_path) {
        warn!(path = %config_path.display(), error = %e, "could not write default config");
    }
    let config = QuicktermConfig::load(config_path.to_str()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        QuicktermConfig::default()
    });

    if cli.daemon {
        daemon::run(config).await?;
        return Ok(ExitCode::SUCCESS);
    }

    match cli.command_text() {
        None => start_daemon(config).await,
        Some(command) => submit(&cli, &config, command).await,
    }
}

/// The client stays quiet unless asked; the daemon logs its activity.
fn default_log_filter(daemon: bool) -> &'static str {
    if daemon {
        "quickterm=info,quickterm_broker=info,quickterm_sessions=info,quickterm_terminal=info"
    } else {
        "warn"
    }
}

/// Launched by hand from a terminal, as opposed to a service manager.
fn launched_interactively(stdin: &impl IsTerminal) -> bool {
    stdin.is_terminal()
}

/// No command given: make sure exactly one daemon runs.
async fn start_daemon(config: QuicktermConfig) -> anyhow::Result<ExitCode> {
    if launcher::daemon_running(&config.ipc).await {
        eprintln!("Daemon is already running");
        return Ok(ExitCode::FAILURE);
    }
    if launched_interactively(&std::io::stdin()) {
        launcher::spawn_daemon()?;
        eprintln!("Started daemon");
        return Ok(ExitCode::SUCCESS);
    }
    daemon::run(config).await?;
    Ok(ExitCode::SUCCESS)
}

/// Hand `command` to the running daemon through the broker.
async fn submit(cli: &Cli, config: &QuicktermConfig, command: String) -> anyhow::Result<ExitCode> {
    let cwd = std::env::current_dir()?;
    let configuration = cli.configuration(&config.command, cwd, command);
    configuration.validate()?;

    if cli.dump {
        println!("{}", configuration.dump()?);
        return Ok(ExitCode::SUCCESS);
    }

    if !launcher::daemon_running(&config.ipc).await {
        eprintln!("Daemon is not running");
        return Ok(ExitCode::FAILURE);
    }

    let queued = match BrokerClient::connect(&config.ipc.broker_socket()).await {
        Ok(mut client) => client.queue_command(configuration).await,
        Err(e) => Err(e),
    };
    match queued {
        Ok(true) => Ok(ExitCode::SUCCESS),
        Ok(false) => {
            eprintln!("Unable to schedule command");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            eprintln!("Unable to reach broker: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_logs_every_quickterm_crate() {
        let filter = default_log_filter(true);
        for target in [
            "quickterm=info",
            "quickterm_broker=info",
            "quickterm_sessions=info",
            "quickterm_terminal=info",
        ] {
            assert!(filter.split(',').any(|d| d == target), "missing {target}");
        }
        assert_eq!(default_log_filter(false), "warn");
    }

    #[test]
    fn redirected_stdin_runs_in_foreground() {
        let file = tempfile::tempfile().unwrap();
        assert!(!launched_interactively(&file));
    }
}
