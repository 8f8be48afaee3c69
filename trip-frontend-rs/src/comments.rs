//! The discussion under one place.

use std::rc::Rc;

use im::Vector;
use mirror::{
    Gateway, InsertError, ListenerKey, LocalEffect, Mutation, RemoteWrite, SubscriptionHandle,
    Synchronizer, to_row,
};

use crate::collections::CommentsCollection;
use crate::config::AppConfig;
use crate::error::{IntentError, PermissionError, ValidationError};
use crate::model::{Comment, NewComment};
use crate::schema::COMMENTS;
use crate::session::Session;
use crate::toast::Toasts;

pub struct CommentThread<G: Gateway> {
    sync: Synchronizer<G, CommentsCollection>,
    session: Rc<Session<G>>,
    toasts: Rc<Toasts>,
    comment_max: usize,
}

impl<G: Gateway> CommentThread<G> {
    pub fn new(
        gateway: Rc<G>,
        place_id: impl Into<String>,
        session: Rc<Session<G>>,
        toasts: Rc<Toasts>,
        config: &AppConfig,
    ) -> Self {
        let collection = CommentsCollection {
            place_id: place_id.into(),
        };
        Self {
            sync: Synchronizer::new(gateway, collection),
            session,
            toasts,
            comment_max: config.comment_max,
        }
    }

    pub fn place_id(&self) -> String {
        self.sync.collection().place_id.clone()
    }

    pub fn comments(&self) -> Vector<Comment> {
        self.sync.rows()
    }

    pub fn register_listener(&self, callback: impl Fn(ListenerKey, &str) + 'static) -> ListenerKey {
        self.sync.register_listener(callback)
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.sync.unregister_listener(key)
    }

    pub async fn load(&self) -> Result<usize, IntentError> {
        let result = self.sync.load().await.map_err(IntentError::from);
        self.toasts.report(result)
    }

    /// Push channel for this place's comments only. Released with the thread.
    pub async fn subscribe(&self) -> Result<SubscriptionHandle, IntentError> {
        let result = self.sync.attach().await.map_err(IntentError::from);
        self.toasts.report(result)
    }

    pub fn unsubscribe(&self) {
        self.sync.detach()
    }

    pub async fn follow(&self) -> usize {
        self.sync.follow().await
    }

    pub fn validate(&self, text: &str) -> Result<String, ValidationError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyComment);
        }
        if text.chars().count() > self.comment_max {
            return Err(ValidationError::CommentTooLong {
                max: self.comment_max,
            });
        }
        Ok(text.to_string())
    }

    /// Post a comment, then reload so it shows up in server order with its author joined.
    pub async fn send(&self, text: &str) -> Result<(), IntentError> {
        let result = async {
            let author = self.session.require_user()?;
            let text = self.validate(text)?;
            let new_comment = NewComment {
                place_id: self.place_id(),
                author,
                text,
            };
            let row = to_row(&new_comment).map_err(|e| InsertError::Decode(e.to_string()))?;
            self.sync.gateway().insert(COMMENTS, row).await?;
            self.sync.load().await?;
            Ok::<(), IntentError>(())
        }
        .await;
        if result.is_ok() {
            self.toasts.success("Comment posted.");
        }
        self.toasts.report(result)
    }

    /// Delete one of the signed-in user's own comments.
    pub async fn delete(&self, comment_id: &str) -> Result<(), IntentError> {
        let result = async {
            let user_id = self.session.require_user()?;
            let comment = self
                .sync
                .get(comment_id)
                .ok_or_else(|| IntentError::UnknownComment(comment_id.to_string()))?;
            if comment.author != user_id {
                return Err(PermissionError::NotAuthor.into());
            }
            self.sync
                .mutate(Mutation::new(comment_id, RemoteWrite::Delete).optimistic(LocalEffect::Remove))
                .await?;
            Ok::<(), IntentError>(())
        }
        .await;
        if result.is_ok() {
            self.toasts.success("Comment deleted.");
        }
        self.toasts.report(result)
    }
}
