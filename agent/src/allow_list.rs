//! Shared set of namespaces the agent is authorized to act on.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

/// Cheap-to-clone handle onto the namespace allow-list.
///
/// The lifecycle manager is the only writer; other subsystems read it to
/// decide whether a namespace is theirs to touch.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    inner: Arc<RwLock<BTreeSet<String>>>,
}

impl AllowList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set, returning the previous contents.
    pub fn replace<I, S>(&self, namespaces: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let next: BTreeSet<String> = namespaces.into_iter().map(Into::into).collect();
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, next)
    }

    #[must_use]
    pub fn contains(&self, namespace: &str) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(namespace)
    }

    /// Sorted copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}
