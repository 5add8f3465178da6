//! Listener registries for inbound messages and connection-state changes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use kindred_shared::{DirectMessage, GroupMessage};

/// Handle returned by every registration, used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered set of callbacks for one kind of event.
pub struct ListenerSet<T: ?Sized> {
    entries: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

impl<T: ?Sized> ListenerSet<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ListenerId, Callback<T>)>> {
        // A panicking listener cannot leave the Vec half-updated.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, id: ListenerId, callback: Callback<T>) {
        self.lock().push((id, callback));
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Call every listener once, in registration order, with the same value.
    ///
    /// The list is snapshotted first, so a listener may register or remove
    /// listeners without deadlocking; such changes apply from the next event.
    pub fn notify(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in snapshot {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// All listeners of one messaging channel.
#[derive(Default)]
pub struct Listeners {
    next_id: AtomicU64,
    pub messages: ListenerSet<DirectMessage>,
    pub group_messages: ListenerSet<GroupMessage>,
    pub connection: ListenerSet<bool>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&DirectMessage) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.messages.add(id, Arc::new(callback));
        id
    }

    pub fn on_group_message<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&GroupMessage) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.group_messages.add(id, Arc::new(callback));
        id
    }

    pub fn on_connection_change<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&bool) + Send + Sync + 'static,
    {
        let id = self.next_id();
        self.connection.add(id, Arc::new(callback));
        id
    }

    /// Deregister a listener of any kind. Returns whether it was registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.messages.remove(id) || self.group_messages.remove(id) || self.connection.remove(id)
    }

    pub fn clear(&self) {
        self.messages.clear();
        self.group_messages.clear();
        self.connection.clear();
    }

    pub fn total(&self) -> usize {
        self.messages.len() + self.group_messages.len() + self.connection.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kindred_shared::{GroupId, UserId};

    #[test]
    fn test_fan_out_in_registration_order() {
        let listeners = Listeners::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let calls = calls.clone();
            listeners.on_message(move |msg: &DirectMessage| {
                calls.lock().unwrap().push((n, msg.content.clone()));
            });
        }

        let msg = DirectMessage::chat(UserId(1), UserId(2), "ping");
        listeners.messages.notify(&msg);

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                (0, "ping".to_string()),
                (1, "ping".to_string()),
                (2, "ping".to_string())
            ]
        );
    }

    #[test]
    fn test_listeners_see_identical_object() {
        let listeners = Listeners::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let seen = seen.clone();
            listeners.on_group_message(move |msg: &GroupMessage| {
                seen.lock().unwrap().push(msg as *const GroupMessage as usize);
            });
        }

        let msg = GroupMessage::chat(UserId(3), GroupId(7), "hello");
        listeners.group_messages.notify(&msg);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(seen[0], &msg as *const GroupMessage as usize);
    }

    #[test]
    fn test_remove_and_clear() {
        let listeners = Listeners::new();
        let a = listeners.on_connection_change(|_| {});
        let b = listeners.on_message(|_| {});
        let _c = listeners.on_group_message(|_| {});
        assert_eq!(listeners.total(), 3);

        assert!(listeners.remove(a));
        assert!(!listeners.remove(a));
        assert!(listeners.remove(b));
        assert_eq!(listeners.total(), 1);

        listeners.clear();
        assert_eq!(listeners.total(), 0);
    }

    #[test]
    fn test_listener_may_register_during_notify() {
        let listeners = Arc::new(Listeners::new());
        let inner = listeners.clone();
        listeners.on_connection_change(move |_| {
            inner.on_connection_change(|_| {});
        });

        listeners.connection.notify(&true);
        assert_eq!(listeners.connection.len(), 2);
    }
}
