use chrono::Duration;

/// Settings that would otherwise be scattered as literals through the intents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub place_images_bucket: String,
    pub avatars_bucket: String,
    /// Appended to sign-in names that are not email addresses.
    pub placeholder_domain: String,
    pub max_toasts: usize,
    pub toast_lifetime: Duration,
    pub place_name_max: usize,
    pub place_description_max: usize,
    pub comment_max: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            place_images_bucket: "place-images".to_string(),
            avatars_bucket: "avatars".to_string(),
            placeholder_domain: "@fakedomain.co".to_string(),
            max_toasts: 3,
            toast_lifetime: Duration::seconds(4),
            place_name_max: 36,
            place_description_max: 68,
            comment_max: 200,
        }
    }
}
