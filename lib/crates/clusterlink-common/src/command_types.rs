use thiserror::Error;

/// Command type vocabulary exchanged with the control plane.
pub mod kinds {
    /// Replace the full set of managed environments.
    /// Payload: JSON-serialized `AgentInitOptions`
    pub const AGENT_INIT: &str = "agent_init";

    /// Response: every environment in the update was applied.
    /// Payload: the original request payload, echoed back
    pub const AGENT_INIT_SUCCEED: &str = "agent_init_succeed";

    /// Response: the update was rejected and nothing changed.
    /// Payload: human-readable error text
    pub const AGENT_INIT_FAILED: &str = "agent_init_failed";

    /// Ask one or more namespaces to reconcile now.
    /// Payload: JSON-serialized `NamespaceSyncRequest`
    pub const NAMESPACE_SYNC: &str = "namespace_sync";

    /// Response: a sync was queued (or coalesced with a pending one).
    pub const NAMESPACE_SYNC_QUEUED: &str = "namespace_sync_queued";

    /// Response: the namespace is not tracked by this agent.
    pub const NAMESPACE_SYNC_FAILED: &str = "namespace_sync_failed";

    /// Request and response: snapshot of the tracked namespaces.
    /// Response payload: JSON-serialized `AgentStatus`
    pub const AGENT_STATUS: &str = "agent_status";

    /// Periodic, unsolicited heartbeat.
    /// Payload: JSON-serialized `StatusReport`
    pub const STATUS_SYNC: &str = "status_sync";
}

/// Correlation key used for unsolicited status packets.
pub const STATUS_SYNC_KEY: &str = "agent:status";

/// Longest namespace name Kubernetes accepts (DNS-1123 label).
pub const MAX_NAMESPACE_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamespaceError {
    #[error("namespace must not be empty")]
    Empty,

    #[error("namespace '{0}' is longer than 63 characters")]
    TooLong(String),

    #[error("namespace '{0}' must match ^[a-z0-9]([a-z0-9-]*[a-z0-9])?$")]
    InvalidCharacters(String),
}

/// Validate that `namespace` is a DNS-1123 label.
///
/// Namespaces end up in file names and SSH host aliases, so anything
/// outside `[a-z0-9-]` is rejected before it reaches the filesystem.
pub fn validate_namespace(namespace: &str) -> Result<(), NamespaceError> {
    if namespace.is_empty() {
        return Err(NamespaceError::Empty);
    }
    if namespace.len() > MAX_NAMESPACE_LEN {
        return Err(NamespaceError::TooLong(namespace.to_string()));
    }
    let valid_chars = namespace
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || namespace.starts_with('-') || namespace.ends_with('-') {
        return Err(NamespaceError::InvalidCharacters(namespace.to_string()));
    }
    Ok(())
}
