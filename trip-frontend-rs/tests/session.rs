mod common;

use std::cell::Cell;
use std::rc::Rc;

use common::{app, signed_in_app};
use mirror::memory::{GatewayCall, Operation};
use trip_frontend_rs::{AuthError, ImageFile, IntentError, ToastKind, schema};

#[tokio::test]
async fn test_bare_username_gets_placeholder_domain() {
    let app = app();
    app.gateway().add_user("bob@fakedomain.co", "hunter22", true);

    app.session().sign_in("bob", "hunter22").await.unwrap();
    assert!(app.gateway().calls().contains(&GatewayCall {
        operation: Operation::SignIn,
        target: "bob@fakedomain.co".to_string(),
    }));
    assert!(app.session().user_id().is_some());
}

#[tokio::test]
async fn test_sign_in_failures_are_readable() {
    let app = app();
    app.gateway().add_user("eve@fakedomain.co", "hunter22", false);

    assert_eq!(
        app.session().sign_in("eve", "hunter22").await,
        Err(AuthError::EmailNotConfirmed)
    );
    assert_eq!(
        AuthError::EmailNotConfirmed.to_string(),
        "Email not confirmed. (Contact Admin)."
    );
    assert_eq!(
        app.session().sign_in("eve", "wrong").await,
        Err(AuthError::InvalidCredentials)
    );
    assert_eq!(
        app.session().sign_in("nobody", "hunter22").await,
        Err(AuthError::InvalidCredentials)
    );
    assert!(app.session().auth().is_none());
}

#[tokio::test]
async fn test_register_saves_profile() {
    let app = app();
    app.session()
        .register("carol@example.com", "secret1")
        .await
        .unwrap();

    let user_id = app.session().user_id().unwrap();
    let row = app.gateway().row(schema::PROFILES, &user_id).unwrap();
    assert_eq!(row["username"], "carol");
    assert_eq!(app.session().profile().unwrap().username, "carol");
}

#[tokio::test]
async fn test_register_reports_unsaved_profile() {
    let app = app();
    app.gateway().fail_next(Operation::Insert, "offline");
    assert!(matches!(
        app.session().register("dave", "secret1").await,
        Err(AuthError::ProfileNotSaved(_))
    ));
}

#[tokio::test]
async fn test_missing_profile_is_not_an_error() {
    let app = app();
    app.gateway().add_user("frank@fakedomain.co", "hunter22", true);
    app.session().sign_in("frank", "hunter22").await.unwrap();
    assert_eq!(app.session().refetch_profile().await, Ok(None));
    assert!(app.session().profile().is_none());
}

#[tokio::test]
async fn test_sign_out_clears_and_notifies() {
    let (app, _) = signed_in_app().await;
    let changes = Rc::new(Cell::new(0));
    let counter = Rc::clone(&changes);
    app.session()
        .on_session_change(move |_, _| counter.set(counter.get() + 1));

    app.session().sign_out().await.unwrap();
    assert!(app.session().auth().is_none());
    assert!(app.session().profile().is_none());
    assert_eq!(changes.get(), 1);

    app.session().refresh().await.unwrap();
    assert!(app.session().auth().is_none());
    assert!(!app.session().is_loading());
}

#[tokio::test]
async fn test_start_restores_session() {
    let (app, user) = signed_in_app().await;
    assert_eq!(app.start().await, Ok(0));
    assert_eq!(app.session().user_id(), Some(user));
    assert_eq!(app.session().profile().unwrap().username, "ann");
}

#[tokio::test]
async fn test_update_avatar() {
    let (app, user) = signed_in_app().await;
    let image = ImageFile::new("me.JPG", "image/jpeg", vec![9, 9]);

    let profile = app
        .profile_editor()
        .update_avatar(&image)
        .await
        .unwrap()
        .unwrap();
    let url = profile.avatar_url.unwrap();
    let path = url
        .strip_prefix("memory://storage/v1/object/public/avatars/")
        .unwrap();
    assert!(path.starts_with(&format!("{user}/")));
    assert!(path.ends_with(".jpg"));
    assert_eq!(app.gateway().blob("avatars", path), Some(vec![9, 9]));
    assert_eq!(
        app.session().profile().unwrap().avatar_url.as_deref(),
        Some(url.as_str())
    );
}

#[tokio::test]
async fn test_auth_outcomes_are_toasted() {
    let app = app();
    app.gateway().add_user("gus@fakedomain.co", "hunter22", true);

    assert_eq!(
        app.sign_in("gus", "wrong").await,
        Err(IntentError::Auth(AuthError::InvalidCredentials))
    );
    let toast = app.toasts().visible().last().cloned().unwrap();
    assert_eq!(toast.kind, ToastKind::Error);
    assert_eq!(toast.message, "Incorrect Username or Password.");

    app.sign_in("gus", "hunter22").await.unwrap();
    assert_eq!(app.toasts().visible().last().unwrap().kind, ToastKind::Success);

    app.sign_out().await.unwrap();
    assert_eq!(app.toasts().visible().last().unwrap().message, "Signed out.");
}

#[tokio::test]
async fn test_failed_registration_is_toasted() {
    let app = app();
    app.register("hal", "secret1").await.unwrap();
    assert_eq!(app.toasts().visible().last().unwrap().message, "Registered!");

    assert!(app.register("hal", "secret1").await.is_err());
    let toast = app.toasts().visible().last().cloned().unwrap();
    assert_eq!(toast.kind, ToastKind::Error);
    assert!(toast.message.contains("User already registered"));
}
