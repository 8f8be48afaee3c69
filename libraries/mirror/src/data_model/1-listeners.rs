//! # Listeners
//! Views register a callback and get told when the mirror they render has changed.
//! Callbacks are cloned out of the registry before they run, so a callback may register or
//! unregister listeners itself.

use std::rc::Rc;

use slotmap::SlotMap;

slotmap::new_key_type! {
    pub struct ListenerKey;
}

pub type Listener = Rc<dyn Fn(ListenerKey, &str)>;

#[derive(Default)]
pub struct Listeners {
    callbacks: SlotMap<ListenerKey, Listener>,
}

impl Listeners {
    pub fn register(&mut self, callback: impl Fn(ListenerKey, &str) + 'static) -> ListenerKey {
        self.callbacks.insert(Rc::new(callback))
    }

    pub fn unregister(&mut self, key: ListenerKey) {
        self.callbacks.remove(key);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Everything that should be called for one notification.
    pub fn snapshot(&self) -> Vec<(ListenerKey, Listener)> {
        self.callbacks
            .iter()
            .map(|(key, callback)| (key, Rc::clone(callback)))
            .collect()
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_unregistered_listener_is_not_in_snapshot() {
        let calls = Rc::new(Cell::new(0));
        let mut listeners = Listeners::default();

        let counter = Rc::clone(&calls);
        let key = listeners.register(move |_, _| counter.set(counter.get() + 1));
        let counter = Rc::clone(&calls);
        listeners.register(move |_, _| counter.set(counter.get() + 10));

        listeners.unregister(key);
        for (key, callback) in listeners.snapshot() {
            callback(key, "place");
        }
        assert_eq!(calls.get(), 10);
        assert_eq!(listeners.len(), 1);
    }
}
