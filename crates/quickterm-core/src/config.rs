use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::command::CommandConfiguration;
use crate::error::{QuicktermError, Result};

// Relay protocol constants: broker and daemon must agree on these.
pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PAYLOAD_BYTES: usize = 128 * 1024; // 128 KB hard cap per frame
pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000; // executor must answer executor.hello in 5s
pub const REGISTER_RETRY_MS: u64 = 1_000; // daemon backoff between broker registrations
pub const BROKER_SPAWN_ATTEMPTS: u32 = 10;
pub const BROKER_SPAWN_BACKOFF_MS: u64 = 100;

pub const BROKER_SOCKET_NAME: &str = "broker.sock";
pub const EXECUTOR_SOCKET_NAME: &str = "executor.sock";
pub const DEFAULT_BROKER_PROGRAM: &str = "quickterm-broker";

/// Top-level config (config.toml + QUICKTERM_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuicktermConfig {
    #[serde(default)]
    pub command: CommandDefaults,
    #[serde(default)]
    pub hotkeys: HotkeyConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
}

/// Defaults applied to every new [`CommandConfiguration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDefaults {
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Seconds; -1 never times out.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub keep: bool,
    #[serde(default)]
    pub animate: bool,
    #[serde(default)]
    pub wait_for_exit: bool,
    #[serde(default = "bool_true")]
    pub source_bash_profile: bool,
    #[serde(default = "default_delay_after_exit")]
    pub delay_after_exit: f64,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            timeout: default_timeout(),
            keep: false,
            animate: false,
            wait_for_exit: false,
            source_bash_profile: true,
            delay_after_exit: default_delay_after_exit(),
        }
    }
}

impl CommandDefaults {
    /// Build a configuration for `command` in `working_directory` starting now.
    pub fn configuration(
        &self,
        working_directory: impl Into<PathBuf>,
        command: impl Into<String>,
    ) -> CommandConfiguration {
        CommandConfiguration::new(working_directory, command)
            .with_shell(self.shell.clone())
            .with_timeout(self.timeout)
            .with_keep(self.keep)
            .with_animate(self.animate)
            .with_wait_for_exit(self.wait_for_exit)
            .with_source_bash_profile(self.source_bash_profile)
            .with_delay_after_exit(self.delay_after_exit)
    }
}

/// Global hotkeys. Consumed by the presentation layer, not by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotkeyConfig {
    #[serde(default = "default_command_entry_hotkey")]
    pub show_command_entry: String,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            show_command_entry: default_command_entry_hotkey(),
        }
    }
}

/// Where the broker and executor sockets live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpcConfig {
    /// Directory holding both sockets.
    /// Defaults to `$XDG_RUNTIME_DIR/quickterm`, else `~/.quickterm/run`.
    pub runtime_dir: Option<String>,
    /// Broker binary to launch when no broker is reachable.
    pub broker_program: Option<String>,
}

impl IpcConfig {
    pub fn runtime_dir(&self) -> PathBuf {
        if let Some(dir) = &self.runtime_dir {
            return PathBuf::from(dir);
        }
        match std::env::var("XDG_RUNTIME_DIR") {
            Ok(dir) if !dir.is_empty() => Path::new(&dir).join("quickterm"),
            _ => {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                Path::new(&home).join(".quickterm").join("run")
            }
        }
    }

    pub fn broker_socket(&self) -> PathBuf {
        self.runtime_dir().join(BROKER_SOCKET_NAME)
    }

    pub fn executor_socket(&self) -> PathBuf {
        self.runtime_dir().join(EXECUTOR_SOCKET_NAME)
    }
}

fn bool_true() -> bool {
    true
}
fn default_shell() -> String {
    "bash".to_string()
}
fn default_timeout() -> f64 {
    5.0
}
fn default_delay_after_exit() -> f64 {
    3.0
}
fn default_command_entry_hotkey() -> String {
    "option+cmd+t".to_string()
}

impl QuicktermConfig {
    /// Load config from a TOML file with QUICKTERM_* env var overrides.
    ///
    /// Path resolution: explicit argument, then `QUICKTERM_CONFIG`, then
    /// `~/.config/quickterm/config.toml`. A missing file yields the defaults.
    /// Nested keys use a double underscore: `QUICKTERM_COMMAND__SHELL=zsh`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path);

        let config: QuicktermConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("QUICKTERM_").split("__"))
            .extract()
            .map_err(|e| QuicktermError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Write the built-in defaults to `path` unless a file already exists there.
    ///
    /// Returns `true` when a file was written.
    pub fn write_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = toml::to_string_pretty(&QuicktermConfig::default())
            .map_err(|e| QuicktermError::Config(e.to_string()))?;
        std::fs::write(path, body)?;
        info!(path = %path.display(), "wrote default configuration");
        Ok(true)
    }
}

/// `QUICKTERM_CONFIG` if set, else `~/.config/quickterm/config.toml`.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("QUICKTERM_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home)
        .join(".config")
        .join("quickterm")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let config = QuicktermConfig::load(path.to_str()).unwrap();
        assert_eq!(config.command.shell, "bash");
        assert_eq!(config.command.timeout, 5.0);
        assert!(config.command.source_bash_profile);
        assert_eq!(config.hotkeys.show_command_entry, "option+cmd+t");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[command]\nshell = \"zsh\"\ntimeout = 12.5\nkeep = true\n\n[ipc]\nruntime_dir = \"/tmp/qt\"\n",
        )
        .unwrap();

        let config = QuicktermConfig::load(path.to_str()).unwrap();
        assert_eq!(config.command.shell, "zsh");
        assert_eq!(config.command.timeout, 12.5);
        assert!(config.command.keep);
        assert_eq!(config.command.delay_after_exit, 3.0);
        assert_eq!(config.ipc.broker_socket(), PathBuf::from("/tmp/qt/broker.sock"));
        assert_eq!(config.ipc.executor_socket(), PathBuf::from("/tmp/qt/executor.sock"));
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[command]\ntimeout = \"soon\"\n").unwrap();
        let err = QuicktermConfig::load(path.to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn default_file_written_once_and_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quickterm").join("config.toml");

        assert!(QuicktermConfig::write_default_if_missing(&path).unwrap());
        assert!(!QuicktermConfig::write_default_if_missing(&path).unwrap());

        let config = QuicktermConfig::load(path.to_str()).unwrap();
        assert_eq!(config.command.delay_after_exit, 3.0);
    }

    #[test]
    fn defaults_build_a_configuration() {
        let defaults = CommandDefaults {
            shell: "sh".into(),
            wait_for_exit: true,
            ..CommandDefaults::default()
        };
        let cfg = defaults.configuration("/tmp", "true");
        assert_eq!(cfg.shell(), "sh");
        assert!(cfg.wait_for_exit());
        assert_eq!(cfg.command(), "true");
    }
}
