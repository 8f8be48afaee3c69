use mirror::{
    AuthError as GatewayAuthError, DeleteError, FetchError, InsertError, MutationError,
    UpdateError, UploadError,
};
use thiserror::Error;

/// Input rejected before anything is sent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a name.")]
    EmptyName,
    #[error("Name must be at most {max} characters.")]
    NameTooLong { max: usize },
    #[error("Description must be at most {max} characters.")]
    DescriptionTooLong { max: usize },
    #[error("Cost must be a whole number greater than 0.")]
    InvalidCost,
    #[error("Comment can't be empty.")]
    EmptyComment,
    #[error("Comment must be at most {max} characters.")]
    CommentTooLong { max: usize },
}

/// The acting user may not do this.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("You need to sign in first.")]
    NotSignedIn,
    #[error("Only the person who added this place can do that.")]
    NotOwner,
    #[error("You can only delete your own comments.")]
    NotAuthor,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Email not confirmed. (Contact Admin).")]
    EmailNotConfirmed,
    #[error("Incorrect Username or Password.")]
    InvalidCredentials,
    #[error("Signed up, but the profile could not be saved: {0}")]
    ProfileNotSaved(String),
    #[error("Could not load the profile: {0}")]
    ProfileNotLoaded(String),
    #[error(transparent)]
    Gateway(GatewayAuthError),
}

impl AuthError {
    /// Turn a sign-in failure into something a person can act on.
    pub fn from_sign_in(error: GatewayAuthError) -> Self {
        match &error {
            GatewayAuthError::Rejected(message)
                if message.to_lowercase().contains("email not confirmed") =>
            {
                AuthError::EmailNotConfirmed
            }
            GatewayAuthError::Rejected(_) => AuthError::InvalidCredentials,
            _ => AuthError::Gateway(error),
        }
    }
}

impl From<GatewayAuthError> for AuthError {
    fn from(e: GatewayAuthError) -> Self {
        AuthError::Gateway(e)
    }
}

/// Everything an intent can fail with.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntentError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Insert(#[from] InsertError),
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Delete(#[from] DeleteError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("no place with id `{0}`")]
    UnknownPlace(String),
    #[error("no comment with id `{0}`")]
    UnknownComment(String),
    #[error("This place is already in the trash.")]
    AlreadyTrashed(String),
    #[error("This place is not in the trash.")]
    NotTrashed(String),
}

impl From<MutationError> for IntentError {
    fn from(e: MutationError) -> Self {
        match e {
            MutationError::Update(e) => IntentError::Update(e),
            MutationError::Delete(e) => IntentError::Delete(e),
        }
    }
}
