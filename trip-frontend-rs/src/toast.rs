//! Short-lived messages shown over the board.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use mirror::ListenerKey;
use mirror::data_model::Listeners;

use crate::error::IntentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toast {
    pub id: u64,
    pub message: String,
    pub kind: ToastKind,
    pub shown_at: DateTime<Utc>,
}

/// At most `capacity` toasts are visible; showing another evicts the oldest.
pub struct Toasts {
    visible: RefCell<VecDeque<Toast>>,
    next_id: Cell<u64>,
    capacity: usize,
    lifetime: Duration,
    listeners: RefCell<Listeners>,
}

impl Toasts {
    pub fn new(capacity: usize, lifetime: Duration) -> Self {
        Self {
            visible: RefCell::new(VecDeque::with_capacity(capacity)),
            next_id: Cell::new(0),
            capacity,
            lifetime,
            listeners: RefCell::new(Listeners::default()),
        }
    }

    pub fn show(&self, message: impl Into<String>, kind: ToastKind) -> u64 {
        self.show_at(message, kind, Utc::now())
    }

    pub fn success(&self, message: impl Into<String>) -> u64 {
        self.show(message, ToastKind::Success)
    }

    pub fn error(&self, message: impl Into<String>) -> u64 {
        self.show(message, ToastKind::Error)
    }

    pub fn warning(&self, message: impl Into<String>) -> u64 {
        self.show(message, ToastKind::Warning)
    }

    pub fn show_at(&self, message: impl Into<String>, kind: ToastKind, now: DateTime<Utc>) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let message = message.into();
        match kind {
            ToastKind::Error => log::warn!("Toast: {message}"),
            _ => log::debug!("Toast: {message}"),
        }
        {
            let mut visible = self.visible.borrow_mut();
            visible.push_back(Toast {
                id,
                message,
                kind,
                shown_at: now,
            });
            while visible.len() > self.capacity {
                visible.pop_front();
            }
        }
        self.notify();
        id
    }

    pub fn dismiss(&self, id: u64) {
        let removed = {
            let mut visible = self.visible.borrow_mut();
            let before = visible.len();
            visible.retain(|toast| toast.id != id);
            visible.len() != before
        };
        if removed {
            self.notify();
        }
    }

    /// Drop every toast that has been visible for its whole lifetime.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let removed = {
            let mut visible = self.visible.borrow_mut();
            let before = visible.len();
            visible.retain(|toast| now - toast.shown_at < self.lifetime);
            before - visible.len()
        };
        if removed > 0 {
            self.notify();
        }
        removed
    }

    /// Show a failed intent to the user and hand the result back unchanged.
    pub fn report<T>(&self, result: Result<T, IntentError>) -> Result<T, IntentError> {
        if let Err(e) = &result {
            let kind = match e {
                IntentError::Validation(_)
                | IntentError::Permission(_)
                | IntentError::AlreadyTrashed(_)
                | IntentError::NotTrashed(_) => ToastKind::Warning,
                _ => ToastKind::Error,
            };
            self.show(e.to_string(), kind);
        }
        result
    }

    pub fn visible(&self) -> Vec<Toast> {
        self.visible.borrow().iter().cloned().collect()
    }

    pub fn register_listener(&self, callback: impl Fn(ListenerKey, &str) + 'static) -> ListenerKey {
        self.listeners.borrow_mut().register(callback)
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.listeners.borrow_mut().unregister(key)
    }

    fn notify(&self) {
        let listeners = self.listeners.borrow().snapshot();
        for (key, callback) in listeners {
            callback(key, "toasts");
        }
    }
}
