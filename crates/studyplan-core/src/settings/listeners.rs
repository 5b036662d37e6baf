use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::models::SettingsCache;

type Listener = Arc<dyn Fn(&SettingsCache) + Send + Sync>;

#[derive(Default)]
struct ListenerSet {
    next_id: u64,
    listeners: Vec<(u64, Listener)>,
}

/// Listener registry owned by one `SettingsSyncService`.
///
/// Listeners run synchronously, in subscription order, every time the
/// service's cache changes.
#[derive(Default, Clone)]
pub struct SettingsListeners {
    inner: Arc<Mutex<ListenerSet>>,
}

fn lock(set: &Mutex<ListenerSet>) -> MutexGuard<'_, ListenerSet> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SettingsListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SettingsCache) + Send + Sync + 'static,
    {
        let mut set = lock(&self.inner);
        let id = set.next_id;
        set.next_id += 1;
        set.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            set: Arc::downgrade(&self.inner),
        }
    }

    pub fn notify(&self, cache: &SettingsCache) {
        // Released before calling out: callbacks may subscribe or unsubscribe
        let listeners: Vec<Listener> = lock(&self.inner)
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(cache);
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for one subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes the listener immediately"]
pub struct Subscription {
    id: u64,
    set: Weak<Mutex<ListenerSet>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}

    /// Keep the listener registered for the registry's whole lifetime.
    pub fn detach(mut self) {
        self.set = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            lock(&set).listeners.retain(|(id, _)| *id != self.id);
        }
    }
}
