use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::task::{Poll, Waker};

use im::Vector;

use crate::data_model::{ListenerKey, Listeners, Mirror, MirrorState};
use crate::error::{FetchError, InsertError, MutationError};
use crate::gateway::{ChangeEvent, Gateway, Row, Subscription, SubscriptionHandle};
use crate::{Collection, from_row};

/// What a mutation does to the mirror before the remote write is confirmed.
pub enum LocalEffect<R> {
    None,
    Replace(R),
    Modify(Box<dyn FnOnce(&mut R)>),
    Remove,
}

/// The remote half of a mutation.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoteWrite {
    Update(Row),
    Delete,
    AppendMember { column: String, member: String },
    RemoveMember { column: String, member: String },
}

pub struct Mutation<R> {
    pub id: String,
    pub local: LocalEffect<R>,
    pub remote: RemoteWrite,
}

impl<R> Mutation<R> {
    pub fn new(id: impl Into<String>, remote: RemoteWrite) -> Self {
        Self {
            id: id.into(),
            local: LocalEffect::None,
            remote,
        }
    }

    /// Apply `local` to the mirror right away, before the gateway answers.
    pub fn optimistic(mut self, local: LocalEffect<R>) -> Self {
        self.local = local;
        self
    }
}

/// Keeps a [`Mirror`] of one [`Collection`] consistent with a [`Gateway`].
///
/// All methods take `&self`. State lives in `RefCell`s that are never borrowed across an
/// `.await`, so several operations may be in flight at once on one event loop.
pub struct Synchronizer<G: Gateway, C: Collection> {
    gateway: Rc<G>,
    collection: RefCell<C>,
    mirror: RefCell<Mirror<C::Row>>,
    listeners: RefCell<Listeners>,
    /// The channel opened by [`Self::attach`], kept on the current filter.
    attached: RefCell<Option<Subscription>>,
    /// Woken when the attached channel is replaced or dropped, so [`Self::follow`] moves on.
    follower: RefCell<Option<Waker>>,
}

impl<G: Gateway, C: Collection> Synchronizer<G, C> {
    pub fn new(gateway: Rc<G>, collection: C) -> Self {
        Self {
            gateway,
            collection: RefCell::new(collection),
            mirror: RefCell::new(Mirror::new(C::id)),
            listeners: RefCell::new(Listeners::default()),
            attached: RefCell::new(None),
            follower: RefCell::new(None),
        }
    }

    pub fn gateway(&self) -> &Rc<G> {
        &self.gateway
    }

    pub fn collection(&self) -> Ref<'_, C> {
        self.collection.borrow()
    }

    /// Change the filter or order. The mirror keeps its rows until the next [`Self::load`], and
    /// an attached channel stays on the old filter; [`Self::rescope`] takes care of both.
    pub fn reconfigure(&self, f: impl FnOnce(&mut C)) {
        f(&mut self.collection.borrow_mut());
    }

    /// Change the filter or order, move the attached channel (if any) onto the new filter and
    /// reload. If the channel cannot be reopened it is detached and the error returned after
    /// the reload.
    pub async fn rescope(&self, f: impl FnOnce(&mut C)) -> Result<usize, FetchError> {
        self.reconfigure(f);
        let reattached = match self.attached() {
            Some(_) => self.attach().await.map(|_| ()).inspect_err(|e| {
                log::error!("Could not move the push channel to the new filter: {e}");
                self.detach();
            }),
            None => Ok(()),
        };
        let loaded = self.load().await;
        reattached?;
        loaded
    }

    pub fn state(&self) -> MirrorState {
        self.mirror.borrow().state()
    }

    pub fn rows(&self) -> Vector<C::Row> {
        self.mirror.borrow().rows()
    }

    pub fn get(&self, id: &str) -> Option<C::Row> {
        self.mirror.borrow().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.mirror.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.borrow().is_empty()
    }

    pub fn register_listener(&self, callback: impl Fn(ListenerKey, &str) + 'static) -> ListenerKey {
        self.listeners.borrow_mut().register(callback)
    }

    pub fn unregister_listener(&self, key: ListenerKey) {
        self.listeners.borrow_mut().unregister(key)
    }

    fn flush_notifications(&self) {
        if !self.mirror.borrow_mut().take_dirty() {
            return;
        }
        let table = self.collection.borrow().table().to_string();
        let listeners = self.listeners.borrow().snapshot();
        for (key, callback) in listeners {
            callback(key, &table);
        }
    }

    /// Fetch the full result set and replace the mirror with it.
    ///
    /// On failure the previous rows are kept and the error is returned; nothing is retried.
    /// Returns the number of rows committed, or `0` if a newer load superseded this one.
    pub async fn load(&self) -> Result<usize, FetchError> {
        let _flusher = FlushLater::new(self);

        let (table, query) = {
            let collection = self.collection.borrow();
            (collection.table().to_string(), collection.query())
        };
        let ticket = self.mirror.borrow_mut().begin_load();

        let fetched = self
            .gateway
            .select(&table, &query)
            .await
            .and_then(|rows| {
                rows.into_iter()
                    .map(|row| from_row::<C::Row>(row).map_err(|e| FetchError::Decode(e.to_string())))
                    .collect::<Result<Vec<_>, _>>()
            });

        match fetched {
            Ok(rows) => {
                let count = rows.len();
                if self.mirror.borrow_mut().commit(ticket, rows) {
                    log::debug!("Loaded {count} rows from `{table}` (load {ticket})");
                    Ok(count)
                } else {
                    Ok(0)
                }
            }
            Err(e) => {
                log::error!("Failed to load `{table}`: {e}");
                self.mirror.borrow_mut().fail(ticket);
                Err(e)
            }
        }
    }

    /// Open a push channel scoped to the current filter.
    pub async fn subscribe(&self) -> Result<Subscription, FetchError> {
        let (table, filter) = {
            let collection = self.collection.borrow();
            (collection.table().to_string(), collection.query().filter)
        };
        let subscription = self.gateway.subscribe(&table, &filter).await?;
        log::info!("Subscribed to `{table}` ({:?})", subscription.handle());
        Ok(subscription)
    }

    /// React to one pushed change by reloading.
    pub async fn handle_event(&self, event: &ChangeEvent) -> Result<usize, FetchError> {
        log::debug!("{:?} on `{}`, reloading", event.kind, event.table);
        self.load().await
    }

    /// Open a push channel owned by this synchronizer, replacing (and releasing) any previous
    /// one. Unlike a channel from [`Self::subscribe`], it is moved by [`Self::rescope`].
    pub async fn attach(&self) -> Result<SubscriptionHandle, FetchError> {
        let subscription = self.subscribe().await?;
        let handle = subscription.handle();
        self.replace_attached(Some(subscription));
        Ok(handle)
    }

    pub fn detach(&self) {
        self.replace_attached(None);
    }

    pub fn attached(&self) -> Option<SubscriptionHandle> {
        self.attached.borrow().as_ref().map(Subscription::handle)
    }

    fn replace_attached(&self, subscription: Option<Subscription>) {
        let previous = self.attached.replace(subscription);
        drop(previous);
        let follower = self.follower.borrow_mut().take();
        if let Some(waker) = follower {
            waker.wake();
        }
    }

    async fn next_attached_event(&self) -> Option<ChangeEvent> {
        futures::future::poll_fn(|cx| {
            let mut attached = self.attached.borrow_mut();
            let Some(subscription) = attached.as_mut() else {
                return Poll::Ready(None);
            };
            *self.follower.borrow_mut() = Some(cx.waker().clone());
            subscription.poll_next_event(cx)
        })
        .await
    }

    /// Reload on every event of the attached channel until it is detached or closed. A channel
    /// replaced by [`Self::rescope`] is picked up without interruption.
    pub async fn follow(&self) -> usize {
        let mut reloads = 0;
        while let Some(event) = self.next_attached_event().await {
            reloads += 1;
            if let Err(e) = self.handle_event(&event).await {
                log::warn!("Reload after push event failed: {e}");
            }
        }
        reloads
    }

    /// Reload on every event until the subscription is released. Failed reloads are logged
    /// and the loop carries on with the next event.
    pub async fn run_subscription(&self, subscription: &mut Subscription) -> usize {
        let mut reloads = 0;
        while let Some(event) = subscription.next_event().await {
            reloads += 1;
            if let Err(e) = self.handle_event(&event).await {
                log::warn!("Reload after push event failed: {e}");
            }
        }
        reloads
    }

    /// Put a row that is known to be complete at the head of the mirror.
    pub fn insert_local(&self, row: C::Row) {
        let _flusher = FlushLater::new(self);
        self.mirror.borrow_mut().insert_front(row);
    }

    /// Insert a row remotely. If the created row belongs in this mirror it is prepended right
    /// away instead of waiting for the push round-trip.
    pub async fn create(&self, row: Row) -> Result<C::Row, InsertError> {
        self.create_with(row, |_| {}).await
    }

    /// [`Self::create`], with `finish` applied to the created row before it is prepended and
    /// returned. For fields the insert response lacks, such as embedded joins.
    pub async fn create_with(
        &self,
        row: Row,
        finish: impl FnOnce(&mut C::Row),
    ) -> Result<C::Row, InsertError> {
        let _flusher = FlushLater::new(self);

        let (table, filter) = {
            let collection = self.collection.borrow();
            (collection.table().to_string(), collection.query().filter)
        };
        let created = self.gateway.insert(&table, row).await?;
        let belongs_here = filter.matches(&created);
        let mut created: C::Row =
            from_row(created).map_err(|e| InsertError::Decode(e.to_string()))?;
        finish(&mut created);
        if belongs_here {
            self.mirror.borrow_mut().insert_front(created.clone());
        }
        log::info!("Created `{}` in `{table}`", C::id(&created));
        Ok(created)
    }

    /// Apply a mutation: optimistic local change first, then the remote write.
    ///
    /// If the write fails, the local change is rolled back unless a load has committed in the
    /// meantime, in which case the loaded rows already reflect the server's truth.
    pub async fn mutate(&self, mutation: Mutation<C::Row>) -> Result<(), MutationError> {
        let _flusher = FlushLater::new(self);

        let Mutation { id, local, remote } = mutation;
        let table = self.collection.borrow().table().to_string();

        let undo = {
            let mut mirror = self.mirror.borrow_mut();
            match local {
                LocalEffect::None => None,
                LocalEffect::Replace(row) => mirror.replace(&id, row),
                LocalEffect::Modify(f) => mirror.modify(&id, f),
                LocalEffect::Remove => mirror.remove(&id),
            }
        };

        let result: Result<(), MutationError> = match remote {
            RemoteWrite::Update(patch) => self
                .gateway
                .update(&table, &id, patch)
                .await
                .map_err(Into::into),
            RemoteWrite::Delete => self.gateway.delete(&table, &id).await.map_err(Into::into),
            RemoteWrite::AppendMember { column, member } => self
                .gateway
                .append_member(&table, &id, &column, &member)
                .await
                .map_err(Into::into),
            RemoteWrite::RemoveMember { column, member } => self
                .gateway
                .remove_member(&table, &id, &column, &member)
                .await
                .map_err(Into::into),
        };

        if let Err(e) = &result {
            log::error!("Write to `{table}` row `{id}` failed: {e}");
            if let Some(undo) = undo {
                self.mirror.borrow_mut().rollback(undo);
            }
        }
        result
    }
}

/// Flushes listener notifications when dropped, whichever path the operation took.
struct FlushLater<'a, G: Gateway, C: Collection> {
    sync: &'a Synchronizer<G, C>,
}

impl<'a, G: Gateway, C: Collection> FlushLater<'a, G, C> {
    fn new(sync: &'a Synchronizer<G, C>) -> Self {
        Self { sync }
    }
}

impl<G: Gateway, C: Collection> Drop for FlushLater<'_, G, C> {
    fn drop(&mut self) {
        self.sync.flush_notifications();
    }
}
