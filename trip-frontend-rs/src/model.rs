//! Row types for the three tables the board reads: `place`, `comments` and `profiles`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Postgres hands back `null` for empty optional columns; treat it like a missing column.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub username: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// The `addedBy` column. Plain reads give the owner's id; reads that join `profiles` give the
/// whole profile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OwnerRef {
    Id(String),
    Profile(Profile),
}

impl OwnerRef {
    pub fn id(&self) -> &str {
        match self {
            OwnerRef::Id(id) => id,
            OwnerRef::Profile(profile) => &profile.id,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            OwnerRef::Id(_) => None,
            OwnerRef::Profile(profile) => Some(profile),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(rename = "imageUrl", default)]
    pub image_url: Option<String>,
    pub cost: i64,
    #[serde(rename = "addedBy")]
    pub added_by: OwnerRef,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_deleted: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub voters: Vec<String>,
}

impl Place {
    pub fn owner_id(&self) -> &str {
        self.added_by.id()
    }

    pub fn has_voted(&self, user_id: &str) -> bool {
        self.voters.iter().any(|voter| voter == user_id)
    }

    pub fn vote_count(&self) -> usize {
        self.voters.len()
    }
}

/// What the client sends when adding a place. Id, timestamp and voters come from the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewPlace {
    pub name: String,
    pub description: String,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
    pub cost: i64,
    #[serde(rename = "addedBy")]
    pub added_by: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub author: String,
    pub place_id: String,
    /// The author's profile, when the read joined it.
    #[serde(rename = "profiles", default, skip_serializing_if = "Option::is_none")]
    pub author_profile: Option<Profile>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NewComment {
    pub place_id: String,
    pub author: String,
    pub text: String,
}

/// A file picked by the user, ready to upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    /// Extension from the file name, falling back to the MIME subtype.
    pub fn extension(&self) -> String {
        let from_name = self
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty());
        let from_type = self.content_type.split_once('/').map(|(_, sub)| sub);
        from_name
            .or(from_type)
            .unwrap_or("bin")
            .to_ascii_lowercase()
    }

    /// `{owner}/{unix_millis}.{ext}`, unique per owner as long as uploads are a millisecond apart.
    pub fn storage_path(&self, owner_id: &str, now: DateTime<Utc>) -> String {
        format!("{owner_id}/{}.{}", now.timestamp_millis(), self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn place_json(added_by: serde_json::Value) -> serde_json::Value {
        json!({
            "id": "p1",
            "created_at": "2025-03-01T10:00:00.000000+00:00",
            "name": "Doi Suthep",
            "description": null,
            "imageUrl": null,
            "cost": 150,
            "addedBy": added_by,
            "is_deleted": false,
            "voters": null,
        })
    }

    #[test]
    fn test_place_accepts_bare_owner_id() {
        let place: Place = serde_json::from_value(place_json(json!("u1"))).unwrap();
        assert_eq!(place.owner_id(), "u1");
        assert!(place.added_by.profile().is_none());
        assert!(place.voters.is_empty());
        assert_eq!(place.description, "");
    }

    #[test]
    fn test_place_accepts_joined_owner_profile() {
        let place: Place = serde_json::from_value(place_json(
            json!({ "id": "u1", "username": "ann", "avatar_url": null }),
        ))
        .unwrap();
        assert_eq!(place.owner_id(), "u1");
        assert_eq!(place.added_by.profile().map(|p| p.username.as_str()), Some("ann"));
    }

    #[test]
    fn test_image_extension() {
        assert_eq!(ImageFile::new("Beach.JPG", "image/jpeg", vec![]).extension(), "jpg");
        assert_eq!(ImageFile::new("clipboard", "image/png", vec![]).extension(), "png");
        assert_eq!(ImageFile::new("noext.", "", vec![]).extension(), "bin");
    }

    #[test]
    fn test_storage_path() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let image = ImageFile::new("a.webp", "image/webp", vec![]);
        assert_eq!(image.storage_path("u1", now), "u1/1700000000123.webp");
    }
}
