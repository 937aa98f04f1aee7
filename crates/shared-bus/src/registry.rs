//! # Handler Registry
//!
//! Topic to handler map shared by the coordinator and its pollers.
//! Lookups take the read lock, so pollers never block each other; register
//! and remove take the write lock. The lock is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use shared_types::Topic;

use crate::handler::MessageHandler;

/// Thread-safe topic to handler binding.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<Topic, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `topic`, returning the handler it replaced.
    pub fn register(
        &self,
        topic: Topic,
        handler: Arc<dyn MessageHandler>,
    ) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.write().insert(topic, handler)
    }

    /// Current handler for `topic`.
    #[must_use]
    pub fn lookup(&self, topic: Topic) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().get(&topic).cloned()
    }

    pub fn remove(&self, topic: Topic) -> bool {
        self.handlers.write().remove(&topic).is_some()
    }

    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl MessageHandler for Named {
        async fn dispatch(&self, _body: &[u8]) -> Result<(), DispatchError> {
            Err(DispatchError::Panicked(self.0.to_string()))
        }
    }

    async fn name_of(handler: Arc<dyn MessageHandler>) -> String {
        match handler.dispatch(&[]).await {
            Err(DispatchError::Panicked(name)) => name,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_register_replaces() {
        let registry = HandlerRegistry::new();
        assert!(registry.register(Topic::ForkFound, Arc::new(Named("first"))).is_none());
        let replaced = registry.register(Topic::ForkFound, Arc::new(Named("second")));

        assert_eq!(name_of(replaced.unwrap()).await, "first");
        assert_eq!(registry.len(), 1);
        let current = registry.lookup(Topic::ForkFound).unwrap();
        assert_eq!(name_of(current).await, "second");
    }

    #[test]
    fn test_lookup_missing_and_remove() {
        let registry = HandlerRegistry::new();
        assert!(registry.lookup(Topic::BundleMatch).is_none());

        registry.register(Topic::BundleMatch, Arc::new(Named("bundle")));
        registry.register(Topic::MatchMonitoring, Arc::new(Named("monitoring")));
        assert!(registry.remove(Topic::BundleMatch));
        assert!(!registry.remove(Topic::BundleMatch));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_lookups() {
        let registry = Arc::new(HandlerRegistry::new());
        registry.register(Topic::ForkFound, Arc::new(Named("fork")));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(registry.lookup(Topic::ForkFound).is_some());
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
