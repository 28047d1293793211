//! The immutable description of one command to run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{QuicktermError, Result};

/// Timeout sentinel meaning "never terminate the command".
pub const NEVER_TIMEOUT: f64 = -1.0;

/// Snippet prepended to the command when the bash profile should be sourced.
const BASH_PROFILE_PRELUDE: &str = "shopt -s expand_aliases;source ~/.bash_profile\n";

/// Everything the daemon needs to know to run a command.
///
/// Fields are private: a configuration is built once (via [`new`](Self::new)
/// and the `with_*` builders) and then only read. All fields are plain data,
/// so the value crosses process boundaries as JSON.
///
/// Wire: `{ "workingDirectory": "/tmp", "command": "ls", "shell": "bash", ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConfiguration {
    working_directory: PathBuf,
    command: String,
    shell: String,
    /// Seconds; [`NEVER_TIMEOUT`] disables the timeout.
    timeout: f64,
    keep: bool,
    start_time: DateTime<Utc>,
    animate: bool,
    wait_for_exit: bool,
    source_bash_profile: bool,
    /// Seconds the finished session lingers before it is dismissed.
    delay_after_exit: f64,
}

impl CommandConfiguration {
    /// Configuration with the built-in defaults: bash, 5 s timeout, 3 s linger,
    /// bash profile sourced, start as soon as possible.
    pub fn new(working_directory: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            working_directory: working_directory.into(),
            command: command.into(),
            shell: "bash".to_string(),
            timeout: 5.0,
            keep: false,
            start_time: Utc::now(),
            animate: false,
            wait_for_exit: false,
            source_bash_profile: true,
            delay_after_exit: 3.0,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = NEVER_TIMEOUT;
        self
    }

    pub fn with_keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn with_animate(mut self, animate: bool) -> Self {
        self.animate = animate;
        self
    }

    pub fn with_wait_for_exit(mut self, wait_for_exit: bool) -> Self {
        self.wait_for_exit = wait_for_exit;
        self
    }

    pub fn with_source_bash_profile(mut self, source: bool) -> Self {
        self.source_bash_profile = source;
        self
    }

    pub fn with_delay_after_exit(mut self, seconds: f64) -> Self {
        self.delay_after_exit = seconds;
        self
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn keep(&self) -> bool {
        self.keep
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn animate(&self) -> bool {
        self.animate
    }

    pub fn wait_for_exit(&self) -> bool {
        self.wait_for_exit
    }

    pub fn source_bash_profile(&self) -> bool {
        self.source_bash_profile
    }

    /// Raw timeout in seconds, [`NEVER_TIMEOUT`] included.
    pub fn timeout_secs(&self) -> f64 {
        self.timeout
    }

    /// `None` when the command should never time out.
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout < 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(self.timeout).ok()
    }

    pub fn delay_after_exit(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_after_exit.max(0.0)).unwrap_or_default()
    }

    /// Time left until `start_time`, clamped to zero for past start times.
    pub fn start_delay(&self, now: DateTime<Utc>) -> Duration {
        (self.start_time - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// The script handed to `<shell> -c`.
    ///
    /// The bash profile prelude only applies when the shell is bash; other
    /// shells get the command verbatim.
    pub fn script(&self) -> String {
        if self.source_bash_profile && self.is_bash() {
            format!("{BASH_PROFILE_PRELUDE}{}", self.command)
        } else {
            self.command.clone()
        }
    }

    fn is_bash(&self) -> bool {
        Path::new(&self.shell)
            .file_name()
            .is_some_and(|name| name == "bash")
    }

    /// Reject configurations the daemon could never run.
    pub fn validate(&self) -> Result<()> {
        if !self.working_directory.is_absolute() {
            return Err(QuicktermError::InvalidCommand(format!(
                "working directory must be absolute: {}",
                self.working_directory.display()
            )));
        }
        if self.command.trim().is_empty() {
            return Err(QuicktermError::InvalidCommand("command is empty".into()));
        }
        if self.shell.trim().is_empty() {
            return Err(QuicktermError::InvalidCommand("shell is empty".into()));
        }
        if !self.timeout.is_finite() || (self.timeout < 0.0 && self.timeout != NEVER_TIMEOUT) {
            return Err(QuicktermError::InvalidCommand(format!(
                "timeout must be >= 0 or {NEVER_TIMEOUT}, got {}",
                self.timeout
            )));
        }
        if !self.delay_after_exit.is_finite() || self.delay_after_exit < 0.0 {
            return Err(QuicktermError::InvalidCommand(format!(
                "delay after exit must be >= 0, got {}",
                self.delay_after_exit
            )));
        }
        Ok(())
    }

    /// Pretty JSON, as printed by `quickterm --dump`.
    pub fn dump(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_builtin_values() {
        let cfg = CommandConfiguration::new("/tmp", "ls");
        assert_eq!(cfg.shell(), "bash");
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(cfg.delay_after_exit(), Duration::from_secs(3));
        assert!(cfg.source_bash_profile());
        assert!(!cfg.keep());
        assert!(!cfg.wait_for_exit());
    }

    #[test]
    fn never_timeout_sentinel_disables_timeout() {
        let cfg = CommandConfiguration::new("/tmp", "ls").without_timeout();
        assert_eq!(cfg.timeout_secs(), NEVER_TIMEOUT);
        assert!(cfg.timeout().is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bash_profile_prelude_only_for_bash() {
        let bash = CommandConfiguration::new("/tmp", "ll");
        assert!(bash.script().starts_with("shopt -s expand_aliases;"));
        assert!(bash.script().ends_with("\nll"));

        let abs_bash = CommandConfiguration::new("/tmp", "ll").with_shell("/bin/bash");
        assert!(abs_bash.script().starts_with("shopt"));

        let zsh = CommandConfiguration::new("/tmp", "ll").with_shell("zsh");
        assert_eq!(zsh.script(), "ll");

        let opted_out = CommandConfiguration::new("/tmp", "ll").with_source_bash_profile(false);
        assert_eq!(opted_out.script(), "ll");
    }

    #[test]
    fn start_delay_is_clamped_to_zero() {
        let now = Utc::now();
        let past = CommandConfiguration::new("/tmp", "ls")
            .with_start_time(now - chrono::Duration::seconds(10));
        assert_eq!(past.start_delay(now), Duration::ZERO);

        let future = CommandConfiguration::new("/tmp", "ls")
            .with_start_time(now + chrono::Duration::milliseconds(500));
        assert_eq!(future.start_delay(now), Duration::from_millis(500));
    }

    #[test]
    fn validate_rejects_relative_directory() {
        let err = CommandConfiguration::new("relative/dir", "ls")
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_COMMAND");
    }

    #[test]
    fn validate_rejects_negative_values() {
        assert!(CommandConfiguration::new("/tmp", "ls")
            .with_timeout(-3.0)
            .validate()
            .is_err());
        assert!(CommandConfiguration::new("/tmp", "ls")
            .with_delay_after_exit(-1.0)
            .validate()
            .is_err());
        assert!(CommandConfiguration::new("/tmp", "   ").validate().is_err());
    }

    #[test]
    fn json_uses_camel_case_keys() {
        let cfg = CommandConfiguration::new("/tmp", "echo hi").with_wait_for_exit(true);
        let json = cfg.dump().unwrap();
        assert!(json.contains(r#""workingDirectory": "/tmp""#));
        assert!(json.contains(r#""waitForExit": true"#));
        assert!(json.contains(r#""sourceBashProfile": true"#));
        assert!(json.contains(r#""delayAfterExit": 3.0"#));

        let back: CommandConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }
}
