#![allow(dead_code)]

use mirror::MemoryGateway;
use serde_json::json;
use trip_frontend_rs::{App, AppConfig, schema};

pub fn app() -> App<MemoryGateway> {
    let _ = env_logger::builder().is_test(true).try_init();
    App::new(schema::memory_gateway(), AppConfig::default())
}

/// An app with `ann` registered and signed in. Returns her user id.
pub async fn signed_in_app() -> (App<MemoryGateway>, String) {
    let app = app();
    app.session().register("ann", "secret1").await.unwrap();
    let user_id = app.session().user_id().unwrap();
    (app, user_id)
}

pub fn seed_place(app: &App<MemoryGateway>, id: &str, owner: &str, deleted: bool) {
    app.gateway()
        .seed(
            schema::PLACES,
            json!({
                "id": id,
                "name": format!("Place {id}"),
                "cost": 150,
                "addedBy": owner,
                "is_deleted": deleted,
            }),
        )
        .unwrap();
}

pub fn place_ids(app: &App<MemoryGateway>) -> Vec<String> {
    app.board().places().iter().map(|p| p.id.clone()).collect()
}
