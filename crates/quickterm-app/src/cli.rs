use std::path::PathBuf;

use clap::Parser;
use quickterm_core::config::CommandDefaults;
use quickterm_core::CommandConfiguration;

/// Run a shell command and watch its output in a transient notification.
///
/// Without a command, starts the daemon (or reports that it already runs).
#[derive(Parser, Debug)]
#[command(name = "quickterm")]
#[command(version)]
pub struct Cli {
    /// Shell used to run the command (default from config, `bash`)
    #[arg(long, value_name = "SHELL")]
    pub shell: Option<String>,

    /// Seconds before the command is terminated (default 5)
    #[arg(long, value_name = "SECS", value_parser = non_negative_secs, conflicts_with = "no_timeout")]
    pub timeout: Option<f64>,

    /// Never time out
    #[arg(long)]
    pub no_timeout: bool,

    /// Keep the output visible after exit until dismissed
    #[arg(long)]
    pub keep: bool,

    /// Animate output (presentation hint)
    #[arg(long)]
    pub animate: bool,

    /// Present the output only once the command has exited
    #[arg(long)]
    pub wait_for_exit: bool,

    /// Do not source ~/.bash_profile before running (bash only)
    #[arg(long)]
    pub no_bash_profile: bool,

    /// Seconds the output stays visible after exit (default 3)
    #[arg(long, value_name = "SECS", value_parser = non_negative_secs)]
    pub delay_after_exit: Option<f64>,

    /// Print the command configuration as JSON instead of sending it
    #[arg(long)]
    pub dump: bool,

    /// Print the config file path and exit
    #[arg(long)]
    pub print_config_path: bool,

    /// Run the daemon in the foreground
    #[arg(long, hide = true)]
    pub daemon: bool,

    /// Command to run
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl Cli {
    /// The command words joined by spaces, or `None` when none were given.
    pub fn command_text(&self) -> Option<String> {
        if self.command.is_empty() {
            None
        } else {
            Some(self.command.join(" "))
        }
    }

    /// Config defaults overridden by whatever flags were passed. Starts now.
    pub fn configuration(
        &self,
        defaults: &CommandDefaults,
        working_directory: PathBuf,
        command: String,
    ) -> CommandConfiguration {
        let mut cfg = defaults
            .configuration(working_directory, command)
            .with_keep(defaults.keep || self.keep)
            .with_animate(defaults.animate || self.animate)
            .with_wait_for_exit(defaults.wait_for_exit || self.wait_for_exit)
            .with_source_bash_profile(defaults.source_bash_profile && !self.no_bash_profile);

        if let Some(shell) = &self.shell {
            cfg = cfg.with_shell(shell.clone());
        }
        if self.no_timeout {
            cfg = cfg.without_timeout();
        } else if let Some(timeout) = self.timeout {
            cfg = cfg.with_timeout(timeout);
        }
        if let Some(delay) = self.delay_after_exit {
            cfg = cfg.with_delay_after_exit(delay);
        }
        cfg
    }
}

fn non_negative_secs(raw: &str) -> Result<f64, String> {
    let secs: f64 = raw.parse().map_err(|_| format!("`{raw}` is not a number"))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(format!("`{raw}` must be a non-negative number of seconds"));
    }
    Ok(secs)
}
