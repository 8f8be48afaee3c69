//! Who is signed in, and their profile.

use std::cell::RefCell;
use std::rc::Rc;

use mirror::data_model::Listeners;
use mirror::{AuthSession, Credentials, Filter, Gateway, ListenerKey, Query, from_row, to_row};

use crate::config::AppConfig;
use crate::error::{AuthError, PermissionError};
use crate::model::Profile;
use crate::schema::PROFILES;

#[derive(Clone, Debug, Default)]
struct SessionState {
    auth: Option<AuthSession>,
    profile: Option<Profile>,
    loading: bool,
}

pub struct Session<G: Gateway> {
    gateway: Rc<G>,
    placeholder_domain: String,
    state: RefCell<SessionState>,
    listeners: RefCell<Listeners>,
}

impl<G: Gateway> Session<G> {
    pub fn new(gateway: Rc<G>, config: &AppConfig) -> Self {
        Self {
            gateway,
            placeholder_domain: config.placeholder_domain.clone(),
            state: RefCell::new(SessionState::default()),
            listeners: RefCell::new(Listeners::default()),
        }
    }

    pub fn auth(&self) -> Option<AuthSession> {
        self.state.borrow().auth.clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.state.borrow().auth.as_ref().map(|auth| auth.user.id.clone())
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn require_user(&self) -> Result<String, PermissionError> {
        self.user_id().ok_or(PermissionError::NotSignedIn)
    }

    /// Bare usernames sign in with a placeholder email.
    pub fn email_for(&self, username_or_email: &str) -> String {
        let name = username_or_email.trim();
        if name.contains('@') {
            name.to_string()
        } else {
            format!("{name}{}", self.placeholder_domain)
        }
    }

    pub fn on_session_change(&self, callback: impl Fn(ListenerKey, &str) + 'static) -> ListenerKey {
        self.listeners.borrow_mut().register(callback)
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.listeners.borrow_mut().unregister(key)
    }

    fn notify(&self) {
        let listeners = self.listeners.borrow().snapshot();
        for (key, callback) in listeners {
            callback(key, "session");
        }
    }

    fn set_loading(&self, loading: bool) {
        self.state.borrow_mut().loading = loading;
        self.notify();
    }

    pub async fn sign_in(&self, username_or_email: &str, password: &str) -> Result<(), AuthError> {
        let credentials = Credentials {
            email: self.email_for(username_or_email),
            password: password.to_string(),
        };
        let auth = self
            .gateway
            .sign_in(&credentials)
            .await
            .map_err(AuthError::from_sign_in)?;
        log::info!("Signed in as {}", auth.user.id);
        self.state.borrow_mut().auth = Some(auth);
        self.notify();

        if let Err(e) = self.refetch_profile().await {
            log::warn!("Signed in without a profile: {e}");
        }
        Ok(())
    }

    /// Create the identity and its profile row. The username is the part before `@`.
    pub async fn register(&self, username_or_email: &str, password: &str) -> Result<(), AuthError> {
        let credentials = Credentials {
            email: self.email_for(username_or_email),
            password: password.to_string(),
        };
        let user = self.gateway.sign_up(&credentials).await?;

        let username = credentials
            .email
            .split_once('@')
            .map(|(name, _)| name)
            .unwrap_or(&credentials.email)
            .to_string();
        let profile = Profile {
            id: user.id.clone(),
            username,
            avatar_url: None,
        };
        let row = to_row(&profile).map_err(|e| AuthError::ProfileNotSaved(e.to_string()))?;
        self.gateway
            .insert(PROFILES, row)
            .await
            .map_err(|e| AuthError::ProfileNotSaved(e.to_string()))?;
        log::info!("Registered {}", user.id);

        if let Some(auth) = self.gateway.get_session().await {
            self.state.borrow_mut().auth = Some(auth);
            self.state.borrow_mut().profile = Some(profile);
            self.notify();
        }
        Ok(())
    }

    /// Re-read the gateway's session and the profile that goes with it.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        self.set_loading(true);
        let auth = self.gateway.get_session().await;
        {
            let mut state = self.state.borrow_mut();
            if auth.is_none() {
                state.profile = None;
            }
            state.auth = auth;
        }
        let result = self.refetch_profile().await.map(|_| ());
        self.set_loading(false);
        result
    }

    /// A missing profile row is `Ok(None)`.
    pub async fn refetch_profile(&self) -> Result<Option<Profile>, AuthError> {
        let Some(user_id) = self.user_id() else {
            return Ok(None);
        };
        let query = Query::new(Filter::all().eq("id", user_id.as_str()));
        let rows = self
            .gateway
            .select(PROFILES, &query)
            .await
            .map_err(|e| AuthError::ProfileNotLoaded(e.to_string()))?;
        let profile = rows
            .into_iter()
            .next()
            .map(from_row::<Profile>)
            .transpose()
            .map_err(|e| AuthError::ProfileNotLoaded(e.to_string()))?;

        self.state.borrow_mut().profile = profile.clone();
        self.notify();
        Ok(profile)
    }

    /// Local state is cleared even if the gateway call fails.
    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let result = self.gateway.sign_out().await;
        *self.state.borrow_mut() = SessionState::default();
        self.notify();
        result.map_err(AuthError::from)
    }
}
