//! The trip board's client core.
//!
//! [`App`] owns everything that lives as long as the app does: the gateway handle, the
//! session, the toast queue and the place board. Comment threads and the profile editor are
//! created on demand and share those objects.

pub mod add_place;
pub mod board;
pub mod collections;
pub mod comments;
pub mod config;
pub mod error;
pub mod model;
pub mod profile;
pub mod schema;
pub mod session;
pub mod toast;
pub mod votes;

use std::rc::Rc;
use std::sync::LazyLock;

use mirror::Gateway;

pub use add_place::AddPlaceForm;
pub use board::PlaceBoard;
pub use collections::View;
pub use comments::CommentThread;
pub use config::AppConfig;
pub use error::{AuthError, IntentError, PermissionError, ValidationError};
pub use model::{Comment, ImageFile, OwnerRef, Place, Profile};
pub use profile::ProfileEditor;
pub use session::Session;
pub use toast::{Toast, ToastKind, Toasts};

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    if env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init()
        .is_ok()
    {
        log::info!("Logging initialized");
    }
});

pub struct App<G: Gateway> {
    gateway: Rc<G>,
    config: AppConfig,
    session: Rc<Session<G>>,
    toasts: Rc<Toasts>,
    board: PlaceBoard<G>,
}

impl<G: Gateway> App<G> {
    pub fn new(gateway: G, config: AppConfig) -> Self {
        LazyLock::force(&LOGGER);

        let gateway = Rc::new(gateway);
        let session = Rc::new(Session::new(Rc::clone(&gateway), &config));
        let toasts = Rc::new(Toasts::new(config.max_toasts, config.toast_lifetime));
        let board = PlaceBoard::new(
            Rc::clone(&gateway),
            Rc::clone(&session),
            Rc::clone(&toasts),
            config.clone(),
        );
        Self {
            gateway,
            config,
            session,
            toasts,
            board,
        }
    }

    pub fn gateway(&self) -> &Rc<G> {
        &self.gateway
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn session(&self) -> &Session<G> {
        &self.session
    }

    pub fn toasts(&self) -> &Toasts {
        &self.toasts
    }

    pub fn board(&self) -> &PlaceBoard<G> {
        &self.board
    }

    /// Restore a session the gateway already holds, then load the board.
    pub async fn start(&self) -> Result<usize, IntentError> {
        let restored = self.session.refresh().await.map_err(IntentError::from);
        self.toasts.report(restored)?;
        self.board.load().await
    }

    pub async fn sign_in(&self, username_or_email: &str, password: &str) -> Result<(), IntentError> {
        let result = self
            .session
            .sign_in(username_or_email, password)
            .await
            .map_err(IntentError::from);
        if result.is_ok() {
            self.toasts.success("Signed in.");
        }
        self.toasts.report(result)
    }

    pub async fn register(&self, username_or_email: &str, password: &str) -> Result<(), IntentError> {
        let result = self
            .session
            .register(username_or_email, password)
            .await
            .map_err(IntentError::from);
        if result.is_ok() {
            self.toasts.success("Registered!");
        }
        self.toasts.report(result)
    }

    pub async fn sign_out(&self) -> Result<(), IntentError> {
        let result = self.session.sign_out().await.map_err(IntentError::from);
        if result.is_ok() {
            self.toasts.success("Signed out.");
        }
        self.toasts.report(result)
    }

    pub fn comment_thread(&self, place_id: impl Into<String>) -> CommentThread<G> {
        CommentThread::new(
            Rc::clone(&self.gateway),
            place_id,
            Rc::clone(&self.session),
            Rc::clone(&self.toasts),
            &self.config,
        )
    }

    pub fn profile_editor(&self) -> ProfileEditor<G> {
        ProfileEditor::new(
            Rc::clone(&self.gateway),
            Rc::clone(&self.session),
            Rc::clone(&self.toasts),
            &self.config,
        )
    }
}

#[cfg(feature = "supabase")]
impl App<mirror::supabase::SupabaseGateway> {
    /// Connect to the project named by `SUPABASE_URL` and `SUPABASE_ANON_KEY`.
    pub fn from_env() -> Result<Self, mirror::supabase::ConfigError> {
        let config = mirror::supabase::SupabaseConfig::from_env()?;
        Ok(Self::new(
            mirror::supabase::SupabaseGateway::new(config),
            AppConfig::default(),
        ))
    }
}
