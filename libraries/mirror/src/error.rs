//! Errors reported by a [`Gateway`](crate::Gateway).
//!
//! None of these are fatal. Callers turn them into a user-facing notification and leave the
//! mirror showing its last good snapshot.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("could not reach the backend: {0}")]
    Transport(String),
    #[error("backend refused the read ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode row: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InsertError {
    #[error("could not reach the backend: {0}")]
    Transport(String),
    #[error("backend refused the insert ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode inserted row: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpdateError {
    #[error("could not reach the backend: {0}")]
    Transport(String),
    #[error("backend refused the update ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("no row with id `{0}`")]
    NotFound(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeleteError {
    #[error("could not reach the backend: {0}")]
    Transport(String),
    #[error("backend refused the delete ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("could not reach storage: {0}")]
    Transport(String),
    #[error("storage refused the upload ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("a file already exists at `{0}`")]
    Conflict(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("could not reach the auth service: {0}")]
    Transport(String),
    #[error("{0}")]
    Rejected(String),
    #[error("not signed in")]
    NoSession,
}

/// The error of a [`Synchronizer::mutate`](crate::Synchronizer::mutate) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error(transparent)]
    Update(#[from] UpdateError),
    #[error(transparent)]
    Delete(#[from] DeleteError),
}

#[cfg(feature = "supabase")]
mod from_reqwest {
    use super::*;

    impl From<reqwest::Error> for FetchError {
        fn from(e: reqwest::Error) -> Self {
            FetchError::Transport(e.to_string())
        }
    }

    impl From<reqwest::Error> for InsertError {
        fn from(e: reqwest::Error) -> Self {
            InsertError::Transport(e.to_string())
        }
    }

    impl From<reqwest::Error> for UpdateError {
        fn from(e: reqwest::Error) -> Self {
            UpdateError::Transport(e.to_string())
        }
    }

    impl From<reqwest::Error> for DeleteError {
        fn from(e: reqwest::Error) -> Self {
            DeleteError::Transport(e.to_string())
        }
    }

    impl From<reqwest::Error> for UploadError {
        fn from(e: reqwest::Error) -> Self {
            UploadError::Transport(e.to_string())
        }
    }

    impl From<reqwest::Error> for AuthError {
        fn from(e: reqwest::Error) -> Self {
            AuthError::Transport(e.to_string())
        }
    }
}
