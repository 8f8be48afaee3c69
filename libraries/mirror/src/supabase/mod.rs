//! Utilities for syncing against a Supabase project.
//!
//! Tables go through PostgREST, blobs and auth through plain `reqwest` calls, and push events
//! through the realtime websocket (see [`realtime`]).

mod realtime;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::channel::mpsc;
use postgrest::Postgrest;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use slotmap::SlotMap;
use tokio::task::JoinHandle;

use crate::error::{AuthError, DeleteError, FetchError, InsertError, UpdateError, UploadError};
use crate::gateway::{
    AuthSession, AuthUser, Credentials, Gateway, Row, Subscription, SubscriptionHandle,
};
use crate::query::{Filter, Query};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupabaseConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set")]
    Missing(&'static str),
}

impl SupabaseConfig {
    /// Read `SUPABASE_URL` and `SUPABASE_ANON_KEY`, loading a `.env` file first if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {e}");
        }
        let supabase_url =
            std::env::var("SUPABASE_URL").map_err(|_| ConfigError::Missing("SUPABASE_URL"))?;
        let supabase_anon_key = std::env::var("SUPABASE_ANON_KEY")
            .map_err(|_| ConfigError::Missing("SUPABASE_ANON_KEY"))?;
        Ok(Self {
            supabase_url: supabase_url.trim_end_matches('/').to_string(),
            supabase_anon_key,
        })
    }
}

/// Status and body of a PostgREST response, as `(u16, String)`. A macro rather than a function
/// because `postgrest` pins its own `reqwest` version.
macro_rules! read_response {
    ($response:expr) => {{
        let response = $response;
        let status = response.status().as_u16();
        response
            .text()
            .await
            .map(|body| (status, body))
            .map_err(|e| e.to_string())
    }};
}

type Channels = SlotMap<SubscriptionHandle, JoinHandle<()>>;

pub struct SupabaseGateway {
    config: SupabaseConfig,
    http: reqwest::Client,
    session: RefCell<Option<AuthSession>>,
    channels: Rc<RefCell<Channels>>,
}

impl SupabaseGateway {
    pub fn new(config: SupabaseConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            session: RefCell::new(None),
            channels: Rc::new(RefCell::new(SlotMap::with_key())),
        }
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    /// The signed-in user's token, or the anon key when nobody is signed in.
    fn bearer(&self) -> String {
        self.session
            .borrow()
            .as_ref()
            .map(|session| session.access_token.clone())
            .unwrap_or_else(|| self.config.supabase_anon_key.clone())
    }

    fn rest(&self) -> Postgrest {
        let SupabaseConfig {
            supabase_url,
            supabase_anon_key,
        } = &self.config;
        Postgrest::new(format!("{supabase_url}/rest/v1"))
            .insert_header("apikey", supabase_anon_key.clone())
            .insert_header("Authorization", format!("Bearer {}", self.bearer()))
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.config.supabase_url)
    }

    async fn call_membership_rpc(
        &self,
        function: &str,
        collection: &str,
        id: &str,
        column: &str,
        member: &str,
    ) -> Result<(), UpdateError> {
        let params = json!({
            "target_table": collection,
            "row_id": id,
            "column_name": column,
            "member": member,
        });
        let response = self
            .rest()
            .rpc(function, params.to_string())
            .execute()
            .await
            .map_err(|e| UpdateError::Transport(e.to_string()))?;
        let (status, body) = read_response!(response).map_err(UpdateError::Transport)?;
        if status == 404 && body.contains(id) {
            return Err(UpdateError::NotFound(id.to_string()));
        }
        if !(200..300).contains(&status) {
            return Err(UpdateError::Rejected {
                status,
                message: body,
            });
        }
        Ok(())
    }
}

/// PostgREST wants filter values without JSON quoting.
fn filter_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The most readable message in a GoTrue error body.
fn auth_message(body: &str) -> String {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| parsed.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string())
}

impl Gateway for SupabaseGateway {
    async fn select(&self, collection: &str, query: &Query) -> Result<Vec<Row>, FetchError> {
        let mut builder = self.rest().from(collection).select(&query.select);
        for (column, value) in query.filter.predicates() {
            builder = builder.eq(column, filter_value(value));
        }
        if let Some(order) = &query.order {
            builder = builder.order(order.to_postgrest());
        }

        let response = builder
            .execute()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let (status, body) = read_response!(response).map_err(FetchError::Transport)?;
        if !(200..300).contains(&status) {
            return Err(FetchError::Rejected {
                status,
                message: body,
            });
        }
        serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }

    async fn insert(&self, collection: &str, row: Row) -> Result<Row, InsertError> {
        let body = Value::Array(vec![Value::Object(row)]).to_string();
        let response = self
            .rest()
            .from(collection)
            .insert(body)
            .execute()
            .await
            .map_err(|e| InsertError::Transport(e.to_string()))?;
        let (status, body) = read_response!(response).map_err(InsertError::Transport)?;
        if !(200..300).contains(&status) {
            return Err(InsertError::Rejected {
                status,
                message: body,
            });
        }
        let mut rows: Vec<Row> =
            serde_json::from_str(&body).map_err(|e| InsertError::Decode(e.to_string()))?;
        if rows.is_empty() {
            return Err(InsertError::Decode(
                "insert returned no representation".to_string(),
            ));
        }
        Ok(rows.swap_remove(0))
    }

    async fn update(&self, collection: &str, id: &str, patch: Row) -> Result<(), UpdateError> {
        let response = self
            .rest()
            .from(collection)
            .eq("id", id)
            .update(Value::Object(patch).to_string())
            .execute()
            .await
            .map_err(|e| UpdateError::Transport(e.to_string()))?;
        let (status, body) = read_response!(response).map_err(UpdateError::Transport)?;
        if !(200..300).contains(&status) {
            return Err(UpdateError::Rejected {
                status,
                message: body,
            });
        }
        let rows: Vec<Row> = serde_json::from_str(&body).unwrap_or_default();
        if rows.is_empty() {
            // Row-level security hides rows the caller may not touch the same way as
            // missing ones.
            return Err(UpdateError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), DeleteError> {
        let response = self
            .rest()
            .from(collection)
            .eq("id", id)
            .delete()
            .execute()
            .await
            .map_err(|e| DeleteError::Transport(e.to_string()))?;
        let (status, body) = read_response!(response).map_err(DeleteError::Transport)?;
        if !(200..300).contains(&status) {
            return Err(DeleteError::Rejected {
                status,
                message: body,
            });
        }
        Ok(())
    }

    async fn append_member(
        &self,
        collection: &str,
        id: &str,
        column: &str,
        member: &str,
    ) -> Result<(), UpdateError> {
        self.call_membership_rpc("array_append_member", collection, id, column, member)
            .await
    }

    async fn remove_member(
        &self,
        collection: &str,
        id: &str,
        column: &str,
        member: &str,
    ) -> Result<(), UpdateError> {
        self.call_membership_rpc("array_remove_member", collection, id, column, member)
            .await
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> Result<Subscription, FetchError> {
        let (sender, receiver) = mpsc::unbounded();
        let task = realtime::open_channel(
            &self.config,
            &self.bearer(),
            collection,
            filter.clone(),
            sender,
        )
        .await?;
        let handle = self.channels.borrow_mut().insert(task);

        let channels: Weak<RefCell<Channels>> = Rc::downgrade(&self.channels);
        Ok(Subscription::new(handle, receiver, move |handle| {
            if let Some(channels) = channels.upgrade()
                && let Some(task) = channels.borrow_mut().remove(handle)
            {
                task.abort();
            }
        }))
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        if let Some(task) = self.channels.borrow_mut().remove(handle) {
            task.abort();
        }
    }

    async fn upload_blob(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), UploadError> {
        let response = self
            .http
            .post(format!(
                "{}/storage/v1/object/{bucket}/{path}",
                self.config.supabase_url
            ))
            .header("apikey", &self.config.supabase_anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer()))
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        if status == 409 || message.contains("Duplicate") {
            return Err(UploadError::Conflict(path.to_string()));
        }
        Err(UploadError::Rejected {
            status: status.as_u16(),
            message,
        })
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{bucket}/{path}",
            self.config.supabase_url
        )
    }

    async fn get_session(&self) -> Option<AuthSession> {
        self.session.borrow().clone()
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, AuthError> {
        let response = self
            .http
            .post(self.auth_url("token?grant_type=password"))
            .header("apikey", &self.config.supabase_anon_key)
            .json(credentials)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::Rejected(auth_message(&body)));
        }
        let session: AuthSession = serde_json::from_str(&body)
            .map_err(|e| AuthError::Transport(format!("unexpected auth response: {e}")))?;
        log::info!("Signed in as {}", session.user.id);
        *self.session.borrow_mut() = Some(session.clone());
        Ok(session)
    }

    async fn sign_up(&self, credentials: &Credentials) -> Result<AuthUser, AuthError> {
        let response = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.config.supabase_anon_key)
            .json(credentials)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::Rejected(auth_message(&body)));
        }

        // With email confirmation off the signup response is a full session, otherwise it is
        // just the user.
        if let Ok(session) = serde_json::from_str::<AuthSession>(&body) {
            let user = session.user.clone();
            *self.session.borrow_mut() = Some(session);
            return Ok(user);
        }
        serde_json::from_str(&body)
            .map_err(|e| AuthError::Transport(format!("unexpected auth response: {e}")))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.session.borrow().clone() else {
            return Ok(());
        };
        let response = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.config.supabase_anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;

        // The local session is gone either way; a stale token is useless.
        *self.session.borrow_mut() = None;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(auth_message(&body)));
        }
        Ok(())
    }
}

impl Drop for SupabaseGateway {
    fn drop(&mut self) {
        for (_, task) in self.channels.borrow_mut().drain() {
            task.abort();
        }
    }
}
