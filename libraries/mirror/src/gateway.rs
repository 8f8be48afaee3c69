//! The remote backend a [`Synchronizer`](crate::Synchronizer) mirrors.
//!
//! A gateway offers row CRUD over named collections, a change feed per collection and filter,
//! blob storage and credential-based sessions. Two implementations ship with this crate:
//! [`MemoryGateway`](crate::MemoryGateway) and, behind the `supabase` feature,
//! `SupabaseGateway`.

use std::task::{Context, Poll};

use futures::{FutureExt as _, StreamExt as _, channel::mpsc::UnboundedReceiver};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, DeleteError, FetchError, InsertError, UpdateError, UploadError};
use crate::query::{Filter, Query};

/// A row as the gateway sees it: a JSON object keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

slotmap::new_key_type! {
    pub struct SubscriptionHandle;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One pushed change. Only used as an invalidation signal; the payload is not trusted to be
/// complete or ordered.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub record: Option<Row>,
    pub old_record: Option<Row>,
}

impl ChangeEvent {
    /// Whether this change may add, alter or remove a row matching `filter`.
    pub fn concerns(&self, filter: &Filter) -> bool {
        if self.record.as_ref().is_some_and(|r| filter.matches(r)) {
            return true;
        }
        match (self.kind, &self.old_record) {
            (ChangeKind::Insert, _) => false,
            (_, Some(old)) => filter.may_match(old),
            (_, None) => true,
        }
    }
}

/// An open push channel. Releasing it (explicitly or by dropping it) closes the channel.
pub struct Subscription {
    handle: SubscriptionHandle,
    events: UnboundedReceiver<ChangeEvent>,
    release: Option<Box<dyn FnOnce(SubscriptionHandle)>>,
}

impl Subscription {
    pub fn new(
        handle: SubscriptionHandle,
        events: UnboundedReceiver<ChangeEvent>,
        release: impl FnOnce(SubscriptionHandle) + 'static,
    ) -> Self {
        Self {
            handle,
            events,
            release: Some(Box::new(release)),
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Wait for the next change. Returns `None` once the channel is closed.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.events.next().await
    }

    pub fn poll_next_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<ChangeEvent>> {
        self.events.poll_next_unpin(cx)
    }

    /// The next change if one is already queued.
    pub fn try_next_event(&mut self) -> Option<ChangeEvent> {
        self.events.next().now_or_never().flatten()
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            log::debug!("Releasing subscription {:?}", self.handle);
            release(self.handle);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("released", &self.release.is_none())
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub access_token: String,
    pub user: AuthUser,
}

/// The backend as the synchronizer needs it.
///
/// Futures returned by a gateway are not required to be `Send`: everything runs on one
/// event loop and state is kept in `RefCell`s.
#[allow(async_fn_in_trait)]
pub trait Gateway {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, FetchError>;

    /// Insert a row and return it with server-generated fields (id, timestamps, defaults).
    async fn insert(&self, collection: &str, row: Row) -> Result<Row, InsertError>;

    /// Overwrite the given columns of one row.
    async fn update(&self, collection: &str, id: &str, patch: Row) -> Result<(), UpdateError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), DeleteError>;

    /// Atomically add `member` to the array column if it is not already there.
    async fn append_member(
        &self,
        collection: &str,
        id: &str,
        column: &str,
        member: &str,
    ) -> Result<(), UpdateError>;

    /// Atomically remove every occurrence of `member` from the array column.
    async fn remove_member(
        &self,
        collection: &str,
        id: &str,
        column: &str,
        member: &str,
    ) -> Result<(), UpdateError>;

    async fn subscribe(&self, collection: &str, filter: &Filter)
    -> Result<Subscription, FetchError>;

    fn unsubscribe(&self, handle: SubscriptionHandle);

    async fn upload_blob(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), UploadError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn get_session(&self) -> Option<AuthSession>;

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, AuthError>;

    /// Register a new identity. Backends that confirm emails may not open a session.
    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}
