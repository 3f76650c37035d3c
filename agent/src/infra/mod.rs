//! Infrastructure layer: production implementations of the port traits.
//!
//! Everything that touches the filesystem or spawns processes lives here.
//! Imports from `crate::ports` and `crate::error` only.

pub mod git;
pub mod reconcile;
pub mod ssh;

pub use git::GitCli;
pub use reconcile::CommandReconciler;
pub use ssh::SshCredentialStore;
