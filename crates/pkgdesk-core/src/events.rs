use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{ChangeEvent, CoreError};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SubscriptionId(pub u64);

pub trait ChangeSubscriber: Send + Sync {
    fn on_change(&self, event: &ChangeEvent) -> Result<(), CoreError>;
}

impl<F> ChangeSubscriber for F
where
    F: Fn(&ChangeEvent) -> Result<(), CoreError> + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) -> Result<(), CoreError> {
        self(event)
    }
}

/// Publish point for package change events.
///
/// Delivery is synchronous and follows registration order. A subscriber that fails
/// or panics is logged and skipped; the publisher never sees its failure.
#[derive(Default)]
pub struct ChangeNotificationBus {
    subscribers: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<(SubscriptionId, Arc<dyn ChangeSubscriber>)>,
}

impl ChangeNotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ChangeSubscriber>) -> SubscriptionId {
        let mut registry = self.registry();
        let id = SubscriptionId(registry.next_id);
        registry.next_id = registry.next_id.saturating_add(1);
        registry.entries.push((id, subscriber));
        id
    }

    pub fn subscribe_fn<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) -> Result<(), CoreError> + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(callback))
    }

    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let before = registry.entries.len();
        registry.entries.retain(|(entry_id, _)| *entry_id != id);
        registry.entries.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().entries.len()
    }

    pub fn clear(&self) {
        self.registry().entries.clear();
    }

    /// Delivers `event` to every current subscriber and returns how many accepted it.
    pub fn publish(&self, event: &ChangeEvent) -> usize {
        let subscribers: Vec<_> = self.registry().entries.clone();

        tracing::info!(
            kind = ?event.kind,
            package = %event.package,
            version = ?event.version.as_ref().map(|version| version.as_str()),
            subscribers = subscribers.len(),
            "publishing package change"
        );

        let mut delivered = 0usize;
        for (id, subscriber) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_change(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(error)) => {
                    tracing::warn!(
                        subscription = id.0,
                        kind = ?error.kind,
                        message = %error.message,
                        "change subscriber failed"
                    );
                }
                Err(_) => {
                    tracing::warn!(subscription = id.0, "change subscriber panicked");
                }
            }
        }
        delivered
    }

    // Poisoning only means a subscriber panicked while the registry was borrowed for
    // cloning; the list itself is still consistent.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
