//! Git remote watching via `git ls-remote`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GitError;
use crate::ports::{RepoFactory, RepoWatcher};

/// Smallest poll interval accepted; a zero interval would spin.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Opens [`GitRemote`] handles that shell out to the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl GitCli {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RepoFactory for GitCli {
    fn open(
        &self,
        remote: &str,
        poll_interval: Duration,
    ) -> Result<Arc<dyn RepoWatcher>, GitError> {
        validate_remote(remote)?;
        Ok(Arc::new(GitRemote {
            remote: remote.to_string(),
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            timeout: self.timeout,
        }))
    }
}

/// Remotes starting with `-` would be parsed by git as options.
pub fn validate_remote(remote: &str) -> Result<(), GitError> {
    if remote.trim().is_empty() || remote.starts_with('-') || remote.contains(char::is_whitespace)
    {
        return Err(GitError::InvalidRemote(remote.to_string()));
    }
    Ok(())
}

#[derive(Debug)]
pub struct GitRemote {
    remote: String,
    poll_interval: Duration,
    timeout: Duration,
}

#[async_trait]
impl RepoWatcher for GitRemote {
    fn remote(&self) -> &str {
        &self.remote
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn head(&self) -> Result<String, GitError> {
        let child = tokio::process::Command::new("git")
            .args(["ls-remote", &self.remote, "HEAD"])
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(GitError::Spawn)?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| GitError::Timeout {
                remote: self.remote.clone(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(GitError::Spawn)?;

        if !output.status.success() {
            return Err(GitError::Failed {
                remote: self.remote.clone(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_head(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| GitError::Failed {
            remote: self.remote.clone(),
            stderr: "remote has no HEAD".to_string(),
        })
    }
}

/// Extract the revision from `ls-remote` output (`<sha>\tHEAD`).
#[must_use]
pub fn parse_head(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        let sha = parts.next()?;
        (parts.next() == Some("HEAD")).then(|| sha.to_string())
    })
}
