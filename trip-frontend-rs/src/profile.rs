use std::rc::Rc;

use chrono::Utc;
use mirror::{Gateway, Row};
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::IntentError;
use crate::model::{ImageFile, Profile};
use crate::schema::{AVATAR_URL, PROFILES};
use crate::session::Session;
use crate::toast::Toasts;

pub struct ProfileEditor<G: Gateway> {
    gateway: Rc<G>,
    session: Rc<Session<G>>,
    toasts: Rc<Toasts>,
    avatars_bucket: String,
}

impl<G: Gateway> ProfileEditor<G> {
    pub fn new(gateway: Rc<G>, session: Rc<Session<G>>, toasts: Rc<Toasts>, config: &AppConfig) -> Self {
        Self {
            gateway,
            session,
            toasts,
            avatars_bucket: config.avatars_bucket.clone(),
        }
    }

    /// Upload a new picture, point the profile at it and refresh the session's copy.
    pub async fn update_avatar(&self, image: &ImageFile) -> Result<Option<Profile>, IntentError> {
        let result = self.update_avatar_inner(image).await;
        if result.is_ok() {
            self.toasts.success("Profile picture updated.");
        }
        self.toasts.report(result)
    }

    async fn update_avatar_inner(&self, image: &ImageFile) -> Result<Option<Profile>, IntentError> {
        let user_id = self.session.require_user()?;
        let path = image.storage_path(&user_id, Utc::now());
        self.gateway
            .upload_blob(&self.avatars_bucket, &path, image.bytes.clone(), &image.content_type)
            .await?;
        let url = self.gateway.public_url(&self.avatars_bucket, &path);

        let mut patch = Row::new();
        patch.insert(AVATAR_URL.to_string(), Value::String(url));
        self.gateway.update(PROFILES, &user_id, patch).await?;
        log::info!("Updated avatar of {user_id}");

        Ok(self.session.refetch_profile().await?)
    }
}
