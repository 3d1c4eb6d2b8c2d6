use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

pub type ListenerId = u64;

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

enum Listener<E> {
    Callback(Callback<E>),
    Channel(Mutex<Sender<E>>),
}

/// Observer registry that decouples event producers from consumers.
///
/// Listeners are invoked in subscription order, exactly once per `publish`,
/// on the publishing thread. The listener list is copy-on-write: `publish`
/// works on a snapshot and calls listeners without holding any lock, so a
/// listener may subscribe or unsubscribe from inside its callback. A listener
/// removed while a publish is in flight can still observe that one event.
pub struct NotificationBus<E> {
    listeners: RwLock<Arc<Vec<(ListenerId, Arc<Listener<E>>)>>>,
    next_id: AtomicU64,
}

impl<E: Clone + Send + 'static> NotificationBus<E> {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.insert(Listener::Callback(Arc::new(callback)))
    }

    /// Registers a queue listener; events are cloned into the returned receiver.
    /// The listener is dropped automatically once the receiver goes away.
    pub fn subscribe_channel(&self) -> (ListenerId, Receiver<E>) {
        let (tx, rx) = channel();
        let id = self.insert(Listener::Channel(Mutex::new(tx)));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.write();
        if !guard.iter().any(|(lid, _)| *lid == id) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|(lid, _)| *lid != id)
            .map(|(lid, l)| (*lid, Arc::clone(l)))
            .collect();
        *guard = Arc::new(next);
        true
    }

    pub fn publish(&self, event: &E) {
        let snapshot = Arc::clone(&self.listeners.read());
        let mut disconnected = Vec::new();
        for (id, listener) in snapshot.iter() {
            match listener.as_ref() {
                Listener::Callback(cb) => cb(event),
                Listener::Channel(tx) => {
                    if tx.lock().send(event.clone()).is_err() {
                        disconnected.push(*id);
                    }
                }
            }
        }
        for id in disconnected {
            log::trace!("dropping disconnected channel listener {id}");
            self.unsubscribe(id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn clear(&self) {
        *self.listeners.write() = Arc::new(Vec::new());
    }

    fn insert(&self, listener: Listener<E>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.listeners.write();
        let mut next: Vec<_> = guard.iter().map(|(lid, l)| (*lid, Arc::clone(l))).collect();
        next.push((id, Arc::new(listener)));
        *guard = Arc::new(next);
        id
    }
}

impl<E: Clone + Send + 'static> Default for NotificationBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delivers_in_subscription_order() {
        let bus = NotificationBus::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in 0..3u32 {
            let seen = Arc::clone(&seen);
            bus.subscribe(move |ev: &u32| seen.lock().push((tag, *ev)));
        }
        bus.publish(&7);
        assert_eq!(*seen.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = NotificationBus::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(&1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn listener_can_subscribe_reentrantly() {
        let bus = Arc::new(NotificationBus::<u32>::new());
        let inner = Arc::clone(&bus);
        bus.subscribe(move |_| {
            inner.subscribe(|_| {});
        });
        bus.publish(&1);
        assert_eq!(bus.listener_count(), 2);
    }

    #[test]
    fn channel_listener_is_pruned_when_receiver_drops() {
        let bus = NotificationBus::<u32>::new();
        let (_, rx) = bus.subscribe_channel();
        bus.publish(&5);
        assert_eq!(rx.try_recv().unwrap(), 5);
        drop(rx);
        bus.publish(&6);
        assert_eq!(bus.listener_count(), 0);
    }
}
