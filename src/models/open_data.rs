//! Open data records: named, UUID-addressable pointers to an owning entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::{collections::BTreeMap, fmt, str::FromStr};
use uuid::Uuid;

/// A persisted open data record.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct OpenData {
    pub id: i64,

    /// Public identifier, generated on insert and never changed.
    pub uuid: Uuid,

    pub name: String,

    /// Primary key of the owning entity.
    pub object_id: i64,

    /// Type tag of the owning entity (the `clazz` of the request).
    #[serde(rename = "clazz")]
    pub content_type: String,

    pub active: bool,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

/// Entity types an open data record may point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    XForm,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::XForm => "xform",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OwnerKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "xform" => Ok(OwnerKind::XForm),
            _ => Err(()),
        }
    }
}

/// Request body for create and partial update.
///
/// Each known field distinguishes "absent" (`None`) from "explicit null"
/// (`Some(None)`). Anything else ends up in `unknown`.
#[derive(Debug, Default, Deserialize)]
pub struct OpenDataPayload {
    #[serde(default, deserialize_with = "present")]
    pub object_id: Option<Option<Value>>,

    #[serde(default, deserialize_with = "present")]
    pub clazz: Option<Option<Value>>,

    #[serde(default, deserialize_with = "present")]
    pub name: Option<Option<Value>>,

    #[serde(flatten)]
    pub unknown: BTreeMap<String, Value>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<Value>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Value>::deserialize(deserializer).map(Some)
}

impl OpenDataPayload {
    /// All of `object_id`, `clazz` and `name` are present (null counts as present).
    pub fn has_all_fields(&self) -> bool {
        self.object_id.is_some() && self.clazz.is_some() && self.name.is_some()
    }

    pub fn has_unknown_fields(&self) -> bool {
        !self.unknown.is_empty()
    }

    /// Every known field is absent or null.
    pub fn is_empty_update(&self) -> bool {
        [&self.object_id, &self.clazz, &self.name]
            .iter()
            .all(|field| matches!(field, None | Some(None)))
    }
}

/// Validated input for a new record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOpenData {
    pub object_id: i64,
    pub owner: OwnerKind,
    pub name: String,
}

/// Validated partial update. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenDataChanges {
    pub object_id: Option<i64>,
    pub owner: Option<OwnerKind>,
    pub name: Option<String>,
}
