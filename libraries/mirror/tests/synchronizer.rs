use std::cell::Cell;
use std::rc::Rc;

use mirror::memory::Operation;
use mirror::{
    Collection, FetchError, Filter, Gateway as _, LocalEffect, MemoryGateway, MirrorState,
    Mutation, MutationError, Order, Query, RemoteWrite, Synchronizer, UpdateError, to_row,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Trip {
    id: String,
    created_at: String,
    name: String,
    #[serde(default)]
    is_deleted: bool,
    #[serde(default)]
    voters: Vec<String>,
}

struct Trips {
    deleted: bool,
}

impl Collection for Trips {
    type Row = Trip;

    fn table(&self) -> &str {
        "trip"
    }

    fn query(&self) -> Query {
        Query::new(Filter::all().eq("is_deleted", self.deleted)).order(Order::desc("created_at"))
    }

    fn id(row: &Trip) -> &str {
        &row.id
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup() -> (Rc<MemoryGateway>, Synchronizer<MemoryGateway, Trips>) {
    init_logger();
    let gateway = Rc::new(
        MemoryGateway::new().with_table("trip", json!({ "is_deleted": false, "voters": [] })),
    );
    let sync = Synchronizer::new(Rc::clone(&gateway), Trips { deleted: false });
    (gateway, sync)
}

fn seed(gateway: &MemoryGateway, id: &str, name: &str) {
    gateway
        .seed("trip", json!({ "id": id, "name": name }))
        .unwrap();
}

fn names(sync: &Synchronizer<MemoryGateway, Trips>) -> Vec<String> {
    sync.rows().iter().map(|t| t.name.clone()).collect()
}

#[tokio::test]
async fn test_load_replaces_mirror_in_order() {
    let (gateway, sync) = setup();
    seed(&gateway, "a", "Porto");
    seed(&gateway, "b", "Lisbon");
    gateway
        .seed("trip", json!({ "id": "c", "name": "Faro", "is_deleted": true }))
        .unwrap();

    assert_eq!(sync.state(), MirrorState::Uninitialized);
    assert_eq!(sync.load().await, Ok(2));
    assert_eq!(sync.state(), MirrorState::Ready);
    assert_eq!(names(&sync), vec!["Lisbon", "Porto"]);
}

#[tokio::test]
async fn test_failed_load_keeps_last_good_rows() {
    let (gateway, sync) = setup();
    seed(&gateway, "a", "Porto");
    sync.load().await.unwrap();

    seed(&gateway, "b", "Lisbon");
    gateway.fail_next(Operation::Select, "offline");
    assert_eq!(
        sync.load().await,
        Err(FetchError::Transport("offline".to_string()))
    );
    assert_eq!(sync.state(), MirrorState::Ready);
    assert_eq!(names(&sync), vec!["Porto"]);
    // No retry.
    assert_eq!(gateway.count(Operation::Select), 2);
}

#[tokio::test]
async fn test_stale_load_never_overwrites_newer() {
    let (gateway, sync) = setup();
    gateway.hold_selects();
    seed(&gateway, "a", "Porto");

    let mut older = Box::pin(sync.load());
    assert!(futures::poll!(older.as_mut()).is_pending());

    seed(&gateway, "b", "Lisbon");
    let mut newer = Box::pin(sync.load());
    assert!(futures::poll!(newer.as_mut()).is_pending());
    assert_eq!(gateway.held_selects(), 2);
    assert_eq!(sync.state(), MirrorState::Loading);

    assert!(gateway.release_select(1));
    assert_eq!(newer.await, Ok(2));
    assert!(gateway.release_select(0));
    assert_eq!(older.await, Ok(0));

    assert_eq!(names(&sync), vec!["Lisbon", "Porto"]);
    assert_eq!(sync.state(), MirrorState::Ready);
}

#[tokio::test]
async fn test_failed_write_is_rolled_back() {
    let (gateway, sync) = setup();
    seed(&gateway, "a", "Porto");
    sync.load().await.unwrap();

    gateway.fail_next(Operation::Update, "offline");
    let mut patch = serde_json::Map::new();
    patch.insert("name".to_string(), json!("Braga"));
    let result = sync
        .mutate(
            Mutation::new("a", RemoteWrite::Update(patch))
                .optimistic(LocalEffect::Modify(Box::new(|t: &mut Trip| {
                    t.name = "Braga".to_string()
                }))),
        )
        .await;

    assert_eq!(
        result,
        Err(MutationError::Update(UpdateError::Transport(
            "offline".to_string()
        )))
    );
    assert_eq!(names(&sync), vec!["Porto"]);
}

#[tokio::test]
async fn test_optimistic_remove_and_rollback() {
    let (gateway, sync) = setup();
    seed(&gateway, "a", "Porto");
    seed(&gateway, "b", "Lisbon");
    sync.load().await.unwrap();

    gateway.fail_next(Operation::Delete, "offline");
    let result = sync
        .mutate(Mutation::new("a", RemoteWrite::Delete).optimistic(LocalEffect::Remove))
        .await;
    assert!(result.is_err());
    assert_eq!(names(&sync), vec!["Lisbon", "Porto"]);

    sync.mutate(Mutation::new("a", RemoteWrite::Delete).optimistic(LocalEffect::Remove))
        .await
        .unwrap();
    assert_eq!(names(&sync), vec!["Lisbon"]);
    assert!(gateway.row("trip", "a").is_none());
}

#[tokio::test]
async fn test_membership_writes_are_idempotent() {
    let (gateway, sync) = setup();
    seed(&gateway, "a", "Porto");
    sync.load().await.unwrap();

    let append = || {
        Mutation::new(
            "a",
            RemoteWrite::AppendMember {
                column: "voters".to_string(),
                member: "u1".to_string(),
            },
        )
    };
    sync.mutate(append()).await.unwrap();
    sync.mutate(append()).await.unwrap();
    assert_eq!(gateway.row("trip", "a").unwrap()["voters"], json!(["u1"]));
}

#[tokio::test]
async fn test_create_prepends_only_matching_rows() {
    let (gateway, sync) = setup();
    seed(&gateway, "a", "Porto");
    sync.load().await.unwrap();

    let created = sync
        .create(to_row(&json!({ "name": "Lisbon" })).unwrap())
        .await
        .unwrap();
    assert_eq!(sync.rows().head(), Some(&created));
    assert_eq!(gateway.count(Operation::Select), 1);

    sync.create(to_row(&json!({ "name": "Faro", "is_deleted": true })).unwrap())
        .await
        .unwrap();
    assert_eq!(names(&sync), vec!["Lisbon", "Porto"]);
}

#[tokio::test]
async fn test_push_events_trigger_reloads() {
    let (gateway, sync) = setup();
    sync.load().await.unwrap();

    let mut subscription = sync.subscribe().await.unwrap();
    gateway
        .insert("trip", to_row(&json!({ "name": "Porto" })).unwrap())
        .await
        .unwrap();
    gateway
        .insert("trip", to_row(&json!({ "name": "Lisbon" })).unwrap())
        .await
        .unwrap();
    // Filtered out by the channel.
    gateway
        .insert("trip", to_row(&json!({ "name": "Faro", "is_deleted": true })).unwrap())
        .await
        .unwrap();

    gateway.unsubscribe(subscription.handle());
    assert_eq!(sync.run_subscription(&mut subscription).await, 2);
    assert_eq!(names(&sync), vec!["Lisbon", "Porto"]);
}

#[tokio::test]
async fn test_released_subscription_stops_events() {
    let (gateway, sync) = setup();
    let subscription = sync.subscribe().await.unwrap();
    assert_eq!(gateway.subscriber_count(), 1);
    subscription.release();
    assert_eq!(gateway.subscriber_count(), 0);

    {
        let _dropped = sync.subscribe().await.unwrap();
        assert_eq!(gateway.subscriber_count(), 1);
    }
    assert_eq!(gateway.subscriber_count(), 0);
}

#[tokio::test]
async fn test_listeners_hear_about_finished_operations() {
    let (gateway, sync) = setup();
    seed(&gateway, "a", "Porto");

    let calls = Rc::new(Cell::new(0));
    let counter = Rc::clone(&calls);
    let key = sync.register_listener(move |_, table| {
        assert_eq!(table, "trip");
        counter.set(counter.get() + 1);
    });

    sync.load().await.unwrap();
    assert_eq!(calls.get(), 1);

    sync.unregister_listener(key);
    sync.load().await.unwrap();
    assert_eq!(calls.get(), 1);
}

#[tokio::test]
async fn test_reconfigure_switches_view_on_next_load() {
    let (gateway, sync) = setup();
    seed(&gateway, "a", "Porto");
    gateway
        .seed("trip", json!({ "id": "b", "name": "Faro", "is_deleted": true }))
        .unwrap();
    sync.load().await.unwrap();
    assert_eq!(names(&sync), vec!["Porto"]);

    sync.reconfigure(|trips| trips.deleted = true);
    assert_eq!(names(&sync), vec!["Porto"]);
    sync.load().await.unwrap();
    assert_eq!(names(&sync), vec!["Faro"]);
}

#[tokio::test]
async fn test_rescope_moves_attached_channel() {
    let (gateway, sync) = setup();
    gateway
        .seed("trip", json!({ "id": "b", "name": "Faro", "is_deleted": true }))
        .unwrap();
    let live = sync.attach().await.unwrap();
    assert_eq!(sync.attached(), Some(live));

    assert_eq!(sync.rescope(|trips| trips.deleted = true).await, Ok(1));
    let trash = sync.attached().unwrap();
    assert_ne!(trash, live);
    assert_eq!(gateway.subscriber_count(), 1);

    // Purged from the trash.
    gateway.delete("trip", "b").await.unwrap();
    // Not in the trash.
    gateway
        .insert("trip", to_row(&json!({ "name": "Porto" })).unwrap())
        .await
        .unwrap();
    gateway.unsubscribe(trash);
    assert_eq!(sync.follow().await, 1);
    assert!(names(&sync).is_empty());
}

#[tokio::test]
async fn test_detach_ends_follow() {
    let (gateway, sync) = setup();
    sync.attach().await.unwrap();
    sync.detach();
    assert_eq!(gateway.subscriber_count(), 0);
    assert_eq!(sync.attached(), None);
    assert_eq!(sync.follow().await, 0);

    // Without an attached channel, rescope only reloads.
    assert_eq!(sync.rescope(|trips| trips.deleted = true).await, Ok(0));
    assert_eq!(gateway.subscriber_count(), 0);
}

#[tokio::test]
async fn test_follow_survives_rescope() {
    let (gateway, sync) = setup();
    sync.attach().await.unwrap();
    let mut following = std::pin::pin!(sync.follow());
    assert!(futures::poll!(following.as_mut()).is_pending());

    sync.rescope(|trips| trips.deleted = true).await.unwrap();
    gateway
        .insert("trip", to_row(&json!({ "name": "Faro", "is_deleted": true })).unwrap())
        .await
        .unwrap();
    gateway.unsubscribe(sync.attached().unwrap());
    assert_eq!(following.await, 1);
    assert_eq!(names(&sync), vec!["Faro"]);
}
