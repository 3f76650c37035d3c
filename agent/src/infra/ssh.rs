//! SSH credential files: per-namespace deploy keys and the client config
//! that maps each namespace alias to the shared git host.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use clusterlink_common::EnvPara;
use tracing::{debug, info, warn};

use crate::error::CredentialError;
use crate::ports::CredentialStore;

/// Writes keys as `<key_dir>/rsa-<namespace>` and replaces the SSH config
/// at `config_path` with one `Host <namespace>` stanza per environment.
#[derive(Debug, Clone)]
pub struct SshCredentialStore {
    key_dir: PathBuf,
    config_path: PathBuf,
}

impl SshCredentialStore {
    #[must_use]
    pub fn new(key_dir: PathBuf, config_path: PathBuf) -> Self {
        Self {
            key_dir,
            config_path,
        }
    }

    #[must_use]
    pub fn key_path(&self, namespace: &str) -> PathBuf {
        key_path(&self.key_dir, namespace)
    }

    fn provision_blocking(&self, git_host: &str, envs: &[EnvPara]) -> Result<(), CredentialError> {
        let mut staged = Staged::default();

        ensure_private_dir(&self.key_dir)?;
        for env in envs {
            let target = self.key_path(&env.namespace);
            let mut key = env.git_rsa_key.clone();
            if !key.ends_with('\n') {
                key.push('\n');
            }
            staged.stage(target, key.as_bytes())?;
        }

        if let Some(parent) = self.config_path.parent() {
            ensure_private_dir(parent)?;
        }
        let config = render_config(git_host, envs, |ns| self.key_path(ns));
        staged.stage(self.config_path.clone(), config.as_bytes())?;

        staged.commit()?;
        info!(
            environments = envs.len(),
            config = %self.config_path.display(),
            "ssh credentials written"
        );
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SshCredentialStore {
    async fn provision(&self, git_host: &str, envs: &[EnvPara]) -> Result<(), CredentialError> {
        let store = self.clone();
        let git_host = git_host.to_string();
        let envs = envs.to_vec();
        tokio::task::spawn_blocking(move || store.provision_blocking(&git_host, &envs))
            .await
            .map_err(|e| CredentialError::Task(e.to_string()))?
    }

    async fn revoke(&self, namespace: &str) -> Result<(), CredentialError> {
        let path = self.key_path(namespace);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed deploy key");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CredentialError::Remove { path, source }),
        }
    }
}

#[must_use]
pub fn key_path(key_dir: &Path, namespace: &str) -> PathBuf {
    key_dir.join(format!("rsa-{namespace}"))
}

/// One stanza per environment. `IdentitiesOnly` stops ssh from offering a
/// sibling namespace's key to the shared host. The key path is quoted so a
/// key directory containing spaces still parses.
pub fn render_config(
    git_host: &str,
    envs: &[EnvPara],
    key_path: impl Fn(&str) -> PathBuf,
) -> String {
    let mut config = String::new();
    for env in envs {
        let key = key_path(&env.namespace);
        config.push_str(&format!("Host {}\n", env.namespace));
        config.push_str(&format!("  HostName {git_host}\n"));
        config.push_str(&format!("  IdentityFile \"{}\"\n", key.display()));
        config.push_str("  IdentitiesOnly yes\n");
        config.push_str("  StrictHostKeyChecking accept-new\n");
        config.push_str("  LogLevel error\n\n");
    }
    config
}

/// Files written next to their targets, renamed into place only once every
/// write succeeded. Dropping an uncommitted set removes the temp files.
#[derive(Default)]
struct Staged {
    files: Vec<(PathBuf, PathBuf)>,
}

/// A target already swapped in during commit, with the file it replaced.
struct Swapped {
    target: PathBuf,
    backup: Option<PathBuf>,
}

impl Staged {
    fn stage(&mut self, target: PathBuf, content: &[u8]) -> Result<(), CredentialError> {
        let tmp = temp_path(&target);
        write_private(&tmp, content).map_err(|source| CredentialError::Write {
            path: tmp.clone(),
            source,
        })?;
        self.files.push((tmp, target));
        Ok(())
    }

    /// Rename every staged file over its target. Existing targets are moved
    /// aside first; if any rename fails, every target swapped so far gets
    /// its previous file back and targets that did not exist are removed.
    fn commit(mut self) -> Result<(), CredentialError> {
        let files = std::mem::take(&mut self.files);
        let mut swapped: Vec<Swapped> = Vec::with_capacity(files.len());
        let mut pending = files.into_iter();
        while let Some((tmp, target)) = pending.next() {
            match swap_in(&tmp, &target) {
                Ok(backup) => swapped.push(Swapped { target, backup }),
                Err(source) => {
                    let _ = fs::remove_file(&tmp);
                    self.files = pending.collect();
                    roll_back(swapped);
                    return Err(CredentialError::Commit {
                        path: target,
                        source,
                    });
                }
            }
        }

        for backup in swapped.into_iter().filter_map(|s| s.backup) {
            if let Err(e) = fs::remove_file(&backup) {
                warn!(path = %backup.display(), error = %e, "failed to remove credential backup");
            }
        }
        Ok(())
    }
}

/// Move `tmp` over `target`, keeping a regular file already at `target` as
/// a hidden `.bak` sibling. Returns the backup path, if one was made.
fn swap_in(tmp: &Path, target: &Path) -> std::io::Result<Option<PathBuf>> {
    let backup = if fs::symlink_metadata(target).is_ok_and(|m| m.is_file()) {
        let backup = backup_path(target);
        fs::rename(target, &backup)?;
        Some(backup)
    } else {
        None
    };

    if let Err(e) = fs::rename(tmp, target) {
        if let Some(backup) = &backup {
            let _ = fs::rename(backup, target);
        }
        return Err(e);
    }
    Ok(backup)
}

fn roll_back(swapped: Vec<Swapped>) {
    for Swapped { target, backup } in swapped.into_iter().rev() {
        let restored = match &backup {
            Some(backup) => fs::rename(backup, &target),
            None => fs::remove_file(&target),
        };
        if let Err(e) = restored {
            warn!(path = %target.display(), error = %e, "failed to roll back credential file");
        }
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        for (tmp, _) in &self.files {
            let _ = fs::remove_file(tmp);
        }
    }
}

fn temp_path(target: &Path) -> PathBuf {
    hidden_sibling(target, "tmp")
}

fn backup_path(target: &Path) -> PathBuf {
    hidden_sibling(target, "bak")
}

fn hidden_sibling(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{suffix}"))
}

fn write_private(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file: File = options.open(path)?;
    file.write_all(content)?;
    file.sync_all()?;
    set_permissions(path, 0o600)
}

fn ensure_private_dir(dir: &Path) -> Result<(), CredentialError> {
    if dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .and_then(|()| set_permissions(dir, 0o700))
        .map_err(|source| CredentialError::Write {
            path: dir.to_path_buf(),
            source,
        })
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
