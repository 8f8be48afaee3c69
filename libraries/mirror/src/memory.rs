//! An in-process [`Gateway`].
//!
//! Tables, blobs, users and push channels all live in memory. Besides backing tests and demos,
//! it records every call it receives, can be told to fail the next call of a given kind, and
//! can hold select responses back so overlapping loads can be completed in any order.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::channel::{mpsc, oneshot};
use serde_json::Value;
use slotmap::SlotMap;

use crate::error::{AuthError, DeleteError, FetchError, InsertError, UpdateError, UploadError};
use crate::gateway::{
    AuthSession, AuthUser, ChangeEvent, ChangeKind, Credentials, Gateway, Row, Subscription,
    SubscriptionHandle,
};
use crate::query::{Filter, Query};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Membership,
    Subscribe,
    Upload,
    SignIn,
    SignUp,
    SignOut,
}

/// One call the gateway received, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayCall {
    pub operation: Operation,
    pub target: String,
}

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    defaults: Row,
    foreign_keys: Vec<(String, String)>,
}

struct Subscriber {
    table: String,
    filter: Filter,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

struct StoredUser {
    id: String,
    password: String,
    confirmed: bool,
}

#[derive(Default)]
struct Inner {
    tables: BTreeMap<String, Table>,
    subscribers: SlotMap<SubscriptionHandle, Subscriber>,
    blobs: BTreeMap<(String, String), Vec<u8>>,
    users: BTreeMap<String, StoredUser>,
    session: Option<AuthSession>,
    failures: HashMap<Operation, String>,
    calls: Vec<GatewayCall>,
    held_selects: Option<Vec<Option<oneshot::Sender<()>>>>,
    last_timestamp: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
pub struct MemoryGateway {
    inner: Rc<RefCell<Inner>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. Columns missing from an inserted row are filled from `defaults`.
    pub fn with_table(self, name: &str, defaults: Value) -> Self {
        let defaults = match defaults {
            Value::Object(map) => map,
            _ => Row::new(),
        };
        self.inner.borrow_mut().tables.insert(
            name.to_string(),
            Table {
                defaults,
                ..Table::default()
            },
        );
        self
    }

    /// Require `table.column` to name an existing row id of `references`.
    pub fn with_foreign_key(self, table: &str, column: &str, references: &str) -> Self {
        if let Some(t) = self.inner.borrow_mut().tables.get_mut(table) {
            t.foreign_keys
                .push((column.to_string(), references.to_string()));
        }
        self
    }

    /// Insert a row directly, without recording a call or pushing an event.
    pub fn seed(&self, table: &str, row: Value) -> Result<Row, InsertError> {
        let Value::Object(row) = row else {
            return Err(InsertError::Rejected {
                status: 400,
                message: "row must be a JSON object".to_string(),
            });
        };
        self.inner.borrow_mut().insert_row(table, row)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.inner
            .borrow()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn row(&self, table: &str, id: &str) -> Option<Row> {
        self.inner
            .borrow()
            .tables
            .get(table)
            .and_then(|t| t.rows.iter().find(|row| row_id(row) == Some(id)).cloned())
    }

    /// Register a user that can sign in. Returns the user id.
    pub fn add_user(&self, email: &str, password: &str, confirmed: bool) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.inner.borrow_mut().users.insert(
            email.to_string(),
            StoredUser {
                id: id.clone(),
                password: password.to_string(),
                confirmed,
            },
        );
        id
    }

    /// Make the next call of kind `operation` fail with `message`.
    pub fn fail_next(&self, operation: Operation, message: &str) {
        self.inner
            .borrow_mut()
            .failures
            .insert(operation, message.to_string());
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.inner.borrow().calls.clone()
    }

    pub fn count(&self, operation: Operation) -> usize {
        self.inner
            .borrow()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    pub fn blob(&self, bucket: &str, path: &str) -> Option<Vec<u8>> {
        self.inner
            .borrow()
            .blobs
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }

    /// From now on, select responses wait until released with [`Self::release_select`].
    pub fn hold_selects(&self) {
        self.inner.borrow_mut().held_selects.get_or_insert_with(Vec::new);
    }

    /// Let the `n`th held select (in arrival order) return.
    pub fn release_select(&self, n: usize) -> bool {
        let mut inner = self.inner.borrow_mut();
        let sender = inner
            .held_selects
            .as_mut()
            .and_then(|held| held.get_mut(n))
            .and_then(Option::take);
        match sender {
            Some(sender) => sender.send(()).is_ok(),
            None => false,
        }
    }

    pub fn held_selects(&self) -> usize {
        self.inner
            .borrow()
            .held_selects
            .as_ref()
            .map(|held| held.iter().filter(|gate| gate.is_some()).count())
            .unwrap_or(0)
    }
}

fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}

fn rejected(status: u16, message: impl Into<String>) -> (u16, String) {
    (status, message.into())
}

impl Inner {
    fn record(&mut self, operation: Operation, target: impl Into<String>) -> Option<String> {
        self.calls.push(GatewayCall {
            operation,
            target: target.into(),
        });
        self.failures.remove(&operation)
    }

    fn next_timestamp(&mut self) -> String {
        let now = Utc::now();
        let next = match self.last_timestamp {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(next);
        next.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn table(&self, name: &str) -> Result<&Table, (u16, String)> {
        self.tables
            .get(name)
            .ok_or_else(|| rejected(404, format!("relation \"{name}\" does not exist")))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, (u16, String)> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| rejected(404, format!("relation \"{name}\" does not exist")))
    }

    fn insert_row(&mut self, table: &str, row: Row) -> Result<Row, InsertError> {
        let timestamp = self.next_timestamp();
        let into_insert_error = |(status, message)| InsertError::Rejected { status, message };

        let t = self.table(table).map_err(into_insert_error)?;
        let mut full = t.defaults.clone();
        full.extend(row);
        full.entry("id")
            .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
        full.entry("created_at")
            .or_insert_with(|| Value::String(timestamp));

        let id = row_id(&full).unwrap_or_default().to_string();
        if t.rows.iter().any(|row| row_id(row) == Some(id.as_str())) {
            return Err(into_insert_error(rejected(
                409,
                format!("duplicate key value violates unique constraint \"{table}_pkey\""),
            )));
        }
        for (column, references) in &t.foreign_keys {
            let target = full.get(column).and_then(Value::as_str);
            let exists = self
                .tables
                .get(references)
                .is_some_and(|r| r.rows.iter().any(|row| row_id(row) == target));
            if !exists {
                return Err(into_insert_error(rejected(
                    409,
                    format!(
                        "insert or update on table \"{table}\" violates foreign key constraint \"{table}_{column}_fkey\""
                    ),
                )));
            }
        }

        self.table_mut(table)
            .map_err(into_insert_error)?
            .rows
            .push(full.clone());
        Ok(full)
    }

    fn notify(&mut self, table: &str, kind: ChangeKind, record: Option<&Row>, old: Option<&Row>) {
        for (handle, subscriber) in &self.subscribers {
            if subscriber.table != table {
                continue;
            }
            let event = ChangeEvent {
                kind,
                table: table.to_string(),
                record: record.cloned(),
                old_record: old.cloned(),
            };
            if !event.concerns(&subscriber.filter) {
                continue;
            }
            if subscriber.sender.unbounded_send(event).is_err() {
                log::debug!("Subscriber {handle:?} is gone");
            }
        }
    }

    /// Apply `f` to the row with `id`, then push an update event.
    fn update_row(
        &mut self,
        table: &str,
        id: &str,
        f: impl FnOnce(&mut Row) -> Result<(), (u16, String)>,
    ) -> Result<(), UpdateError> {
        let into_update_error = |(status, message)| UpdateError::Rejected { status, message };
        let t = self.table_mut(table).map_err(into_update_error)?;
        let row = t
            .rows
            .iter_mut()
            .find(|row| row_id(row) == Some(id))
            .ok_or_else(|| UpdateError::NotFound(id.to_string()))?;
        let old = row.clone();
        f(row).map_err(into_update_error)?;
        let new = row.clone();
        self.notify(table, ChangeKind::Update, Some(&new), Some(&old));
        Ok(())
    }
}

fn members(row: &Row, column: &str) -> Result<Vec<Value>, (u16, String)> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(values)) => Ok(values.clone()),
        Some(_) => Err(rejected(400, format!("column \"{column}\" is not an array"))),
    }
}

impl Gateway for MemoryGateway {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, FetchError> {
        let (rows, gate) = {
            let mut inner = self.inner.borrow_mut();
            if let Some(message) = inner.record(Operation::Select, collection) {
                return Err(FetchError::Transport(message));
            }
            let table = inner
                .table(collection)
                .map_err(|(status, message)| FetchError::Rejected { status, message })?;
            let mut rows: Vec<Row> = table
                .rows
                .iter()
                .filter(|row| query.filter.matches(row))
                .cloned()
                .collect();
            if let Some(order) = &query.order {
                rows.sort_by(|a, b| order.compare(a, b));
            }
            let gate = inner.held_selects.as_mut().map(|held| {
                let (sender, receiver) = oneshot::channel();
                held.push(Some(sender));
                receiver
            });
            (rows, gate)
        };

        if let Some(gate) = gate {
            if gate.await.is_err() {
                return Err(FetchError::Transport("request dropped".to_string()));
            }
        }
        Ok(rows)
    }

    async fn insert(&self, collection: &str, row: Row) -> Result<Row, InsertError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::Insert, collection) {
            return Err(InsertError::Transport(message));
        }
        let created = inner.insert_row(collection, row)?;
        inner.notify(collection, ChangeKind::Insert, Some(&created), None);
        Ok(created)
    }

    async fn update(&self, collection: &str, id: &str, patch: Row) -> Result<(), UpdateError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::Update, collection) {
            return Err(UpdateError::Transport(message));
        }
        inner.update_row(collection, id, |row| {
            row.extend(patch);
            Ok(())
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), DeleteError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::Delete, collection) {
            return Err(DeleteError::Transport(message));
        }
        let table = inner
            .table_mut(collection)
            .map_err(|(status, message)| DeleteError::Rejected { status, message })?;
        let Some(index) = table.rows.iter().position(|row| row_id(row) == Some(id)) else {
            // Deleting nothing is not an error, as with a filtered DELETE.
            return Ok(());
        };
        let old = table.rows.remove(index);
        inner.notify(collection, ChangeKind::Delete, None, Some(&old));
        Ok(())
    }

    async fn append_member(
        &self,
        collection: &str,
        id: &str,
        column: &str,
        member: &str,
    ) -> Result<(), UpdateError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::Membership, collection) {
            return Err(UpdateError::Transport(message));
        }
        inner.update_row(collection, id, |row| {
            let mut values = members(row, column)?;
            if !values.iter().any(|v| v.as_str() == Some(member)) {
                values.push(Value::String(member.to_string()));
            }
            row.insert(column.to_string(), Value::Array(values));
            Ok(())
        })
    }

    async fn remove_member(
        &self,
        collection: &str,
        id: &str,
        column: &str,
        member: &str,
    ) -> Result<(), UpdateError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::Membership, collection) {
            return Err(UpdateError::Transport(message));
        }
        inner.update_row(collection, id, |row| {
            let mut values = members(row, column)?;
            values.retain(|v| v.as_str() != Some(member));
            row.insert(column.to_string(), Value::Array(values));
            Ok(())
        })
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Subscription, FetchError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::Subscribe, collection) {
            return Err(FetchError::Transport(message));
        }
        inner
            .table(collection)
            .map_err(|(status, message)| FetchError::Rejected { status, message })?;

        let (sender, receiver) = mpsc::unbounded();
        let handle = inner.subscribers.insert(Subscriber {
            table: collection.to_string(),
            filter: filter.clone(),
            sender,
        });

        let weak: Weak<RefCell<Inner>> = Rc::downgrade(&self.inner);
        Ok(Subscription::new(handle, receiver, move |handle| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match inner.try_borrow_mut() {
                Ok(mut inner) => {
                    inner.subscribers.remove(handle);
                }
                Err(_) => log::warn!("Could not release {handle:?} while the gateway is busy"),
            };
        }))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner.borrow_mut().subscribers.remove(handle);
    }

    async fn upload_blob(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), UploadError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::Upload, format!("{bucket}/{path}")) {
            return Err(UploadError::Transport(message));
        }
        let key = (bucket.to_string(), path.to_string());
        if inner.blobs.contains_key(&key) {
            return Err(UploadError::Conflict(path.to_string()));
        }
        inner.blobs.insert(key, bytes);
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://storage/v1/object/public/{bucket}/{path}")
    }

    async fn get_session(&self) -> Option<AuthSession> {
        self.inner.borrow().session.clone()
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, AuthError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::SignIn, &credentials.email) {
            return Err(AuthError::Transport(message));
        }
        let user = inner
            .users
            .get(&credentials.email)
            .filter(|user| user.password == credentials.password)
            .ok_or_else(|| AuthError::Rejected("Invalid login credentials".to_string()))?;
        if !user.confirmed {
            return Err(AuthError::Rejected("Email not confirmed".to_string()));
        }
        let session = AuthSession {
            access_token: format!("memory-token-{}", uuid::Uuid::new_v4()),
            user: AuthUser {
                id: user.id.clone(),
                email: Some(credentials.email.clone()),
            },
        };
        inner.session = Some(session.clone());
        Ok(session)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser, AuthError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::SignUp, &credentials.email) {
            return Err(AuthError::Transport(message));
        }
        if inner.users.contains_key(&credentials.email) {
            return Err(AuthError::Rejected("User already registered".to_string()));
        }
        if credentials.password.chars().count() < 6 {
            return Err(AuthError::Rejected(
                "Password should be at least 6 characters.".to_string(),
            ));
        }
        let id = uuid::Uuid::new_v4().to_string();
        inner.users.insert(
            credentials.email.clone(),
            StoredUser {
                id: id.clone(),
                password: credentials.password.clone(),
                confirmed: true,
            },
        );
        let user = AuthUser {
            id,
            email: Some(credentials.email.clone()),
        };
        inner.session = Some(AuthSession {
            access_token: format!("memory-token-{}", uuid::Uuid::new_v4()),
            user: user.clone(),
        });
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(message) = inner.record(Operation::SignOut, "session") {
            return Err(AuthError::Transport(message));
        }
        inner.session = None;
        Ok(())
    }
}
