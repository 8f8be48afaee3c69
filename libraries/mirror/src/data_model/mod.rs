//! The local side of the sync: listener registry and the mirror itself.

#[path = "1-listeners.rs"]
mod listeners;
#[path = "2-mirror.rs"]
mod mirror;

pub use listeners::{Listener, ListenerKey, Listeners};
pub use mirror::{LoadTicket, Mirror, MirrorState, Undo};
