//! This is a library for keeping a local, ordered mirror of a remote collection.
//! It was created for a trip-planning board, so it doesn't include much that was not needed for that project.
//!
//! Syncing strategy:
//! 1. A [`Collection`] names a remote table plus the filter and order the view wants.
//! 2. [`Synchronizer::load`] reads the whole filtered result set and replaces the mirror wholesale.
//! 3. [`Synchronizer::subscribe`] opens a push channel for the same filter. Every change event
//!    triggers another full load (invalidate-and-refetch), because the pushed delta carries no
//!    ordering guarantee relative to concurrent writes.
//! 4. Mutations update the mirror optimistically, then write to the [`Gateway`]. If the write fails,
//!    the optimistic change is rolled back unless a newer load has already replaced it.
//!
//! Sounds simple, but there are a few tricky parts that this library handles:
//! - Every load takes an epoch ticket, and only the most recently issued load may commit.
//!   Overlapping loads are never cancelled, but stale responses are dropped.
//! - Listeners are notified after an operation finishes, never while the mirror is borrowed.
//! - Voter-style array columns are changed with atomic membership writes instead of
//!   read-modify-write of the whole array.

pub mod data_model;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod query;
mod sync;

#[cfg(feature = "supabase")]
pub mod supabase;

pub use data_model::{ListenerKey, LoadTicket, Mirror, MirrorState};
pub use error::{AuthError, DeleteError, FetchError, InsertError, MutationError, UpdateError, UploadError};
pub use gateway::{
    AuthSession, AuthUser, ChangeEvent, ChangeKind, Credentials, Gateway, Row, Subscription,
    SubscriptionHandle,
};
pub use memory::MemoryGateway;
pub use query::{Filter, Order, Query};
pub use sync::{LocalEffect, Mutation, RemoteWrite, Synchronizer};

use serde::{Serialize, de::DeserializeOwned};

/// Describes one remote collection a [`Synchronizer`] mirrors.
///
/// Implementations are small configuration types: a table name, the filter and order a view
/// needs, and how to read the id of a row.
pub trait Collection {
    type Row: Clone + Serialize + DeserializeOwned;

    /// The remote table name.
    fn table(&self) -> &str;

    /// The filter, order and column selection for the current view.
    fn query(&self) -> Query;

    fn id(row: &Self::Row) -> &str;
}

/// Convert a typed row into the untyped map the gateway works with.
pub fn to_row<T: Serialize>(value: &T) -> Result<Row, serde_json::Error> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected a JSON object, got `{other}`"
        ))),
    }
}

/// Convert a gateway row into a typed row.
pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(row))
}
