//! Table and column names, plus an in-memory backend laid out like the real one.

use mirror::MemoryGateway;
use serde_json::json;

pub const PLACES: &str = "place";
pub const COMMENTS: &str = "comments";
pub const PROFILES: &str = "profiles";

pub const VOTERS: &str = "voters";
pub const IS_DELETED: &str = "is_deleted";
pub const CREATED_AT: &str = "created_at";
pub const PLACE_ID: &str = "place_id";
pub const AVATAR_URL: &str = "avatar_url";

/// Place reads embed the owner's profile under `addedBy`.
pub const PLACE_SELECT: &str = "*, addedBy:profiles!place_addedBy_fkey (id, username, avatar_url)";
/// Comment reads embed the author's profile under `profiles`.
pub const COMMENT_SELECT: &str = "*, profiles:profiles!comments_author_fkey (id, username, avatar_url)";

/// A [`MemoryGateway`] with the three tables, their defaults and their foreign keys.
pub fn memory_gateway() -> MemoryGateway {
    MemoryGateway::new()
        .with_table(PROFILES, json!({ "avatar_url": null }))
        .with_table(
            PLACES,
            json!({ "description": "", "imageUrl": null, "is_deleted": false, "voters": [] }),
        )
        .with_table(COMMENTS, json!({}))
        .with_foreign_key(COMMENTS, PLACE_ID, PLACES)
}
