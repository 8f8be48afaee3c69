//! The board of candidate places: its two views and every intent a place card can fire.

use std::rc::Rc;

use chrono::Utc;
use im::Vector;
use mirror::{
    Gateway, InsertError, ListenerKey, LocalEffect, MirrorState, Mutation, RemoteWrite, Row,
    SubscriptionHandle, Synchronizer, to_row,
};
use serde_json::Value;

use crate::add_place::AddPlaceForm;
use crate::collections::{PlacesCollection, View};
use crate::config::AppConfig;
use crate::error::{IntentError, PermissionError};
use crate::model::{NewPlace, OwnerRef, Place};
use crate::schema::IS_DELETED;
use crate::session::Session;
use crate::toast::Toasts;
use crate::votes::{toggled, vote_write};

pub struct PlaceBoard<G: Gateway> {
    sync: Synchronizer<G, PlacesCollection>,
    session: Rc<Session<G>>,
    toasts: Rc<Toasts>,
    config: AppConfig,
}

impl<G: Gateway> PlaceBoard<G> {
    pub fn new(gateway: Rc<G>, session: Rc<Session<G>>, toasts: Rc<Toasts>, config: AppConfig) -> Self {
        Self {
            sync: Synchronizer::new(gateway, PlacesCollection::default()),
            session,
            toasts,
            config,
        }
    }

    pub fn synchronizer(&self) -> &Synchronizer<G, PlacesCollection> {
        &self.sync
    }

    pub fn places(&self) -> Vector<Place> {
        self.sync.rows()
    }

    pub fn place(&self, id: &str) -> Option<Place> {
        self.sync.get(id)
    }

    pub fn view(&self) -> View {
        self.sync.collection().view
    }

    pub fn state(&self) -> MirrorState {
        self.sync.state()
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

    /// Switch view and reload. An open push channel moves to the new view.
    pub async fn set_view(&self, view: View) -> Result<usize, IntentError> {
        let result = self
            .sync
            .rescope(|collection| collection.view = view)
            .await
            .map_err(IntentError::from);
        self.toasts.report(result)
    }

    /// Open the board's push channel for the current view, replacing any previous one.
    pub async fn subscribe(&self) -> Result<SubscriptionHandle, IntentError> {
        let result = self.sync.attach().await.map_err(IntentError::from);
        self.toasts.report(result)
    }

    pub fn unsubscribe(&self) {
        self.sync.detach()
    }

    pub fn subscription(&self) -> Option<SubscriptionHandle> {
        self.sync.attached()
    }

    /// Reload on every pushed change until the channel is closed or [`Self::unsubscribe`]d.
    pub async fn follow(&self) -> usize {
        self.sync.follow().await
    }

    /// Add or remove the signed-in user's vote.
    pub async fn vote(&self, place_id: &str) -> Result<(), IntentError> {
        let result = self.vote_inner(place_id).await;
        self.toasts.report(result)
    }

    async fn vote_inner(&self, place_id: &str) -> Result<(), IntentError> {
        let user_id = self.session.require_user()?;
        let place = self
            .sync
            .get(place_id)
            .ok_or_else(|| IntentError::UnknownPlace(place_id.to_string()))?;

        let remote = vote_write(&place, &user_id);
        let local = LocalEffect::Modify(Box::new(move |place: &mut Place| {
            place.voters = toggled(&place.voters, &user_id);
        }));
        self.sync
            .mutate(Mutation::new(place_id, remote).optimistic(local))
            .await?;
        Ok(())
    }

    /// The place, if the signed-in user owns it.
    fn owned_place(&self, place_id: &str) -> Result<Place, IntentError> {
        let user_id = self.session.require_user()?;
        let place = self
            .sync
            .get(place_id)
            .ok_or_else(|| IntentError::UnknownPlace(place_id.to_string()))?;
        if place.owner_id() != user_id {
            return Err(PermissionError::NotOwner.into());
        }
        Ok(place)
    }

    async fn set_deleted(&self, place_id: &str, deleted: bool) -> Result<(), IntentError> {
        let place = self.owned_place(place_id)?;
        match (place.is_deleted, deleted) {
            (true, true) => return Err(IntentError::AlreadyTrashed(place.id)),
            (false, false) => return Err(IntentError::NotTrashed(place.id)),
            _ => {}
        }
        let mut patch = Row::new();
        patch.insert(IS_DELETED.to_string(), Value::Bool(deleted));
        // Either way the place leaves the view it is shown in.
        self.sync
            .mutate(
                Mutation::new(place_id, RemoteWrite::Update(patch)).optimistic(LocalEffect::Remove),
            )
            .await?;
        Ok(())
    }

    pub async fn soft_delete(&self, place_id: &str) -> Result<(), IntentError> {
        let result = self.set_deleted(place_id, true).await;
        if result.is_ok() {
            self.toasts.success("Moved to trash.");
        }
        self.toasts.report(result)
    }

    pub async fn restore(&self, place_id: &str) -> Result<(), IntentError> {
        let result = self.set_deleted(place_id, false).await;
        if result.is_ok() {
            self.toasts.success("Place restored.");
        }
        self.toasts.report(result)
    }

    pub async fn permanent_delete(&self, place_id: &str) -> Result<(), IntentError> {
        let result = async {
            self.owned_place(place_id)?;
            self.sync
                .mutate(Mutation::new(place_id, RemoteWrite::Delete).optimistic(LocalEffect::Remove))
                .await?;
            Ok::<(), IntentError>(())
        }
        .await;
        if result.is_ok() {
            self.toasts.success("Place deleted permanently.");
        }
        self.toasts.report(result)
    }

    /// Validate, upload the image if there is one, insert, and show the new place at the top.
    pub async fn add(&self, form: &AddPlaceForm) -> Result<Place, IntentError> {
        let result = self.add_inner(form).await;
        if result.is_ok() {
            self.toasts.success("Place added.");
        }
        self.toasts.report(result)
    }

    async fn add_inner(&self, form: &AddPlaceForm) -> Result<Place, IntentError> {
        let owner_id = self.session.require_user()?;
        let valid = form.validate(&self.config)?;
        let gateway = self.sync.gateway();

        let image_url = match &form.image {
            Some(image) => {
                let bucket = &self.config.place_images_bucket;
                let path = image.storage_path(&owner_id, Utc::now());
                gateway
                    .upload_blob(bucket, &path, image.bytes.clone(), &image.content_type)
                    .await?;
                Some(gateway.public_url(bucket, &path))
            }
            None => None,
        };

        let new_place = NewPlace {
            name: valid.name,
            description: valid.description,
            image_url,
            cost: valid.cost,
            added_by: owner_id,
        };
        let row = to_row(&new_place).map_err(|e| InsertError::Decode(e.to_string()))?;
        let profile = self.session.profile();
        let place = self
            .sync
            .create_with(row, |place| {
                if let Some(profile) = profile {
                    place.added_by = OwnerRef::Profile(profile);
                }
            })
            .await?;
        log::info!("Added place `{}` ({})", place.name, place.id);
        Ok(place)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::memory_gateway;
    use mirror::MemoryGateway;

    fn board() -> PlaceBoard<MemoryGateway> {
        let gateway = Rc::new(memory_gateway());
        let config = AppConfig::default();
        let session = Rc::new(Session::new(Rc::clone(&gateway), &config));
        let toasts = Rc::new(Toasts::new(config.max_toasts, config.toast_lifetime));
        PlaceBoard::new(gateway, session, toasts, config)
    }

    #[tokio::test]
    async fn test_intents_need_a_signed_in_user() {
        let board = board();
        assert_eq!(
            board.vote("p1").await,
            Err(IntentError::Permission(PermissionError::NotSignedIn))
        );
        assert_eq!(board.toasts.visible().len(), 1);
    }

    #[tokio::test]
    async fn test_view_defaults_to_live_places() {
        let board = board();
        assert_eq!(board.view(), View::Default);
        assert_eq!(board.state(), MirrorState::Uninitialized);
        board.set_view(View::Trash).await.unwrap();
        assert_eq!(board.view(), View::Trash);
        assert_eq!(board.state(), MirrorState::Ready);
    }
}
