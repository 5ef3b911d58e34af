//! LinkRegistry: link id → link routing for inbound messages.
//!
//! Lookups happen for every inbound message and take the read lock;
//! register/deregister happen once per link lifetime and take the write
//! lock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::error::{LinkError, LinkResult};
use crate::link::Link;
use crate::types::LinkId;

/// Shared map of started links, keyed by their local id.
#[derive(Clone, Default)]
pub struct LinkRegistry {
    links: Arc<RwLock<HashMap<LinkId, Link>>>,
}

impl std::fmt::Debug for LinkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkRegistry")
            .field("links", &self.len())
            .finish()
    }
}

impl LinkRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<LinkId, Link>> {
        self.links.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<LinkId, Link>> {
        self.links.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a link under its local id.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::AlreadyRegistered`] if the id is taken.
    pub fn register(&self, link: &Link) -> LinkResult<()> {
        let id = link.id();
        let mut links = self.write();
        if links.contains_key(&id) {
            return Err(LinkError::AlreadyRegistered { id });
        }
        links.insert(id, link.clone());
        trace!(link = %id, "link registered");
        Ok(())
    }

    /// Remove a link. Returns it if it was registered.
    pub fn deregister(&self, id: &LinkId) -> Option<Link> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            trace!(link = %id, "link deregistered");
        }
        removed
    }

    /// Find a link by local id.
    pub fn find(&self, id: &LinkId) -> Option<Link> {
        self.read().get(id).cloned()
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &LinkId) -> bool {
        self.read().contains_key(id)
    }

    /// Registered ids.
    pub fn ids(&self) -> Vec<LinkId> {
        self.read().keys().copied().collect()
    }

    /// Number of registered links.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::types::LinkParams;

    fn link(second: u64) -> Link {
        Link::new(
            &LinkConfig::default(),
            LinkParams::new(
                LinkId::new(1, second),
                LinkId::new(2, second),
                LinkId::default(),
                true,
            ),
        )
    }

    #[test]
    fn test_register_find_deregister() {
        let registry = LinkRegistry::new();
        let a = link(1);
        registry.register(&a).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find(&a.id()).map(|l| l.id()), Some(a.id()));
        assert!(registry.find(&LinkId::new(9, 9)).is_none());

        assert!(registry.deregister(&a.id()).is_some());
        assert!(registry.deregister(&a.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_is_refused() {
        let registry = LinkRegistry::new();
        registry.register(&link(1)).unwrap();
        let err = registry.register(&link(1)).unwrap_err();
        assert_eq!(
            err,
            LinkError::AlreadyRegistered {
                id: LinkId::new(1, 1)
            }
        );
        assert_eq!(registry.ids(), vec![LinkId::new(1, 1)]);
    }
}
