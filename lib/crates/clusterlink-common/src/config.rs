use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable prefix for every agent setting.
pub const ENV_PREFIX: &str = "CLUSTERLINK_";

/// Agent configuration loaded from `CLUSTERLINK_*` environment variables.
///
/// Each field maps to `CLUSTERLINK_<FIELD>`, e.g. `CLUSTERLINK_SSH_KEY_DIR`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Listen address for the control-plane bridge (default: 0.0.0.0:8080)
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Directory holding one private key per namespace.
    #[serde(default = "default_ssh_key_dir")]
    pub ssh_key_dir: PathBuf,

    /// SSH client config the git client reads host aliases from.
    #[serde(default = "default_ssh_config_path")]
    pub ssh_config_path: PathBuf,

    #[serde(default = "default_git_poll_interval_secs")]
    pub git_poll_interval_secs: u64,

    /// Upper bound for a single `git ls-remote` call.
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,

    /// Fallback reconcile period when no upstream change is seen.
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,

    /// Ceiling on concurrently running command handlers.
    #[serde(default = "default_max_in_flight_commands")]
    pub max_in_flight_commands: usize,

    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// Program run for each reconcile. Unset disables reconciliation.
    #[serde(default)]
    pub reconcile_command: Option<String>,
}

impl AgentConfig {
    #[must_use]
    pub fn git_poll_interval(&self) -> Duration {
        Duration::from_secs(self.git_poll_interval_secs.max(1))
    }

    #[must_use]
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs.max(1))
    }

    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }

    #[must_use]
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_ssh_key_dir() -> PathBuf {
    PathBuf::from("/ssh-keys")
}

fn default_ssh_config_path() -> PathBuf {
    PathBuf::from("/root/.ssh/config")
}

fn default_git_poll_interval_secs() -> u64 {
    60
}

fn default_git_timeout_secs() -> u64 {
    20
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_status_interval_secs() -> u64 {
    60
}

fn default_max_in_flight_commands() -> usize {
    64
}

fn default_command_queue_capacity() -> usize {
    256
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            ssh_key_dir: default_ssh_key_dir(),
            ssh_config_path: default_ssh_config_path(),
            git_poll_interval_secs: default_git_poll_interval_secs(),
            git_timeout_secs: default_git_timeout_secs(),
            sync_interval_secs: default_sync_interval_secs(),
            status_interval_secs: default_status_interval_secs(),
            max_in_flight_commands: default_max_in_flight_commands(),
            command_queue_capacity: default_command_queue_capacity(),
            reconcile_command: None,
        }
    }
}
