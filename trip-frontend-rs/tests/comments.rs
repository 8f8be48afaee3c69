mod common;

use common::{seed_place, signed_in_app};
use mirror::{Gateway, InsertError};
use mirror::memory::Operation;
use serde_json::json;
use trip_frontend_rs::{IntentError, PermissionError, ValidationError, schema};

#[tokio::test]
async fn test_send_validates_and_reloads() {
    let (app, user) = signed_in_app().await;
    seed_place(&app, "p1", &user, false);
    let thread = app.comment_thread("p1");
    thread.load().await.unwrap();

    assert_eq!(
        thread.send("   ").await,
        Err(IntentError::Validation(ValidationError::EmptyComment))
    );
    assert_eq!(
        thread.send(&"x".repeat(201)).await,
        Err(IntentError::Validation(ValidationError::CommentTooLong { max: 200 }))
    );
    assert!(app.gateway().rows(schema::COMMENTS).is_empty());

    thread.send("  first!  ").await.unwrap();
    thread.send("second").await.unwrap();
    let texts: Vec<_> = thread.comments().iter().map(|c| c.text.clone()).collect();
    assert_eq!(texts, vec!["first!", "second"]);
    assert!(thread.comments().iter().all(|c| c.author == user));
}

#[tokio::test]
async fn test_thread_only_shows_its_place() {
    let (app, user) = signed_in_app().await;
    seed_place(&app, "p1", &user, false);
    seed_place(&app, "p2", &user, false);

    app.comment_thread("p2").send("elsewhere").await.unwrap();
    let thread = app.comment_thread("p1");
    thread.load().await.unwrap();
    assert!(thread.comments().is_empty());
}

#[tokio::test]
async fn test_comment_needs_existing_place() {
    let (app, _) = signed_in_app().await;
    let thread = app.comment_thread("missing");
    assert!(matches!(
        thread.send("hello").await,
        Err(IntentError::Insert(InsertError::Rejected { status: 409, .. }))
    ));
}

#[tokio::test]
async fn test_delete_only_own_comment() {
    let (app, user) = signed_in_app().await;
    seed_place(&app, "p1", &user, false);
    for (id, author) in [("c1", user.as_str()), ("c2", "u2"), ("c3", user.as_str())] {
        app.gateway()
            .seed(
                schema::COMMENTS,
                json!({ "id": id, "text": id, "author": author, "place_id": "p1" }),
            )
            .unwrap();
    }
    let thread = app.comment_thread("p1");
    thread.load().await.unwrap();

    assert_eq!(
        thread.delete("c2").await,
        Err(IntentError::Permission(PermissionError::NotAuthor))
    );
    assert_eq!(app.gateway().count(Operation::Delete), 0);

    thread.delete("c1").await.unwrap();
    let ids: Vec<_> = thread.comments().iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec!["c2", "c3"]);
    assert!(app.gateway().row(schema::COMMENTS, "c1").is_none());
    assert!(app.gateway().row(schema::COMMENTS, "c3").is_some());
}

#[tokio::test]
async fn test_failed_comment_delete_is_rolled_back() {
    let (app, user) = signed_in_app().await;
    seed_place(&app, "p1", &user, false);
    app.gateway()
        .seed(
            schema::COMMENTS,
            json!({ "id": "c1", "text": "hi", "author": user, "place_id": "p1" }),
        )
        .unwrap();
    let thread = app.comment_thread("p1");
    thread.load().await.unwrap();

    app.gateway().fail_next(Operation::Delete, "offline");
    assert!(thread.delete("c1").await.is_err());
    assert_eq!(thread.comments().len(), 1);
}

#[tokio::test]
async fn test_thread_reloads_on_its_own_pushed_comments() {
    let (app, user) = signed_in_app().await;
    seed_place(&app, "p1", &user, false);
    seed_place(&app, "p2", &user, false);
    let thread = app.comment_thread("p1");
    let handle = thread.subscribe().await.unwrap();

    app.comment_thread("p2").send("elsewhere").await.unwrap();
    app.comment_thread("p1").send("here").await.unwrap();
    app.gateway().unsubscribe(handle);
    assert_eq!(thread.follow().await, 1);
    let texts: Vec<_> = thread.comments().iter().map(|c| c.text.clone()).collect();
    assert_eq!(texts, vec!["here"]);
}
