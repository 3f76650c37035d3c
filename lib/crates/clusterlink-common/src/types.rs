use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command_types::{NamespaceError, validate_namespace};

/// The unit of exchange with the control plane.
///
/// `key` correlates a request with its response, `kind` selects the handler
/// and `payload` is opaque to everything but that handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: String,
}

impl Command {
    pub fn new(
        key: impl Into<String>,
        kind: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            kind: kind.into(),
            payload: payload.into(),
        }
    }

    /// Build a response correlated with this command.
    #[must_use]
    pub fn reply(&self, kind: &str, payload: impl Into<String>) -> Self {
        Self::new(self.key.clone(), kind, payload)
    }

    /// Build an error response whose payload is the error's display text.
    #[must_use]
    pub fn reply_error(&self, kind: &str, err: &dyn std::error::Error) -> Self {
        self.reply(kind, err.to_string())
    }
}

/// Desired global configuration. Each update replaces the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInitOptions {
    #[serde(default)]
    pub git_host: String,
    #[serde(default)]
    pub envs: Vec<EnvPara>,
}

/// One managed environment, keyed by its namespace.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvPara {
    pub namespace: String,
    pub git_url: String,
    #[serde(default)]
    pub git_rsa_key: String,
}

impl fmt::Debug for EnvPara {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvPara")
            .field("namespace", &self.namespace)
            .field("git_url", &self.git_url)
            .field("git_rsa_key", &"<redacted>")
            .finish()
    }
}

impl EnvPara {
    /// Per-namespace remote: the first occurrence of `git_host` in the
    /// environment's URL is replaced by the namespace, which the SSH
    /// client config maps back to the real host with this namespace's key.
    #[must_use]
    pub fn remote(&self, git_host: &str) -> String {
        self.git_url.replacen(git_host, &self.namespace, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitOptionsError {
    #[error("gitHost must be set when environments are present")]
    MissingGitHost,

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error("namespace '{0}' appears more than once")]
    DuplicateNamespace(String),

    #[error("gitUrl for namespace '{0}' is empty")]
    MissingGitUrl(String),
}

impl AgentInitOptions {
    /// Parse and validate an `agent_init` payload.
    pub fn from_payload(payload: &str) -> Result<Self, InitPayloadError> {
        let options: Self = serde_json::from_str(payload)?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), InitOptionsError> {
        if !self.envs.is_empty() && self.git_host.trim().is_empty() {
            return Err(InitOptionsError::MissingGitHost);
        }
        let mut seen = HashSet::with_capacity(self.envs.len());
        for env in &self.envs {
            validate_namespace(&env.namespace)?;
            if env.git_url.trim().is_empty() {
                return Err(InitOptionsError::MissingGitUrl(env.namespace.clone()));
            }
            if !seen.insert(env.namespace.as_str()) {
                return Err(InitOptionsError::DuplicateNamespace(env.namespace.clone()));
            }
        }
        Ok(())
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.envs.iter().map(|e| e.namespace.as_str())
    }

    #[must_use]
    pub fn env(&self, namespace: &str) -> Option<&EnvPara> {
        self.envs.iter().find(|e| e.namespace == namespace)
    }
}

#[derive(Debug, Error)]
pub enum InitPayloadError {
    #[error("malformed agent_init payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid agent_init payload: {0}")]
    Invalid(#[from] InitOptionsError),
}

/// Payload of a `namespace_sync` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSyncRequest {
    pub namespaces: Vec<String>,
}

/// Response payload of an `agent_status` command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub git_host: String,
    pub namespaces: Vec<NamespaceStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceStatus {
    pub namespace: String,
    pub remote: String,
    /// Last upstream revision the watcher observed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

/// Payload of the periodic `status_sync` heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub namespaces: Vec<String>,
    pub reported_at: DateTime<Utc>,
}
