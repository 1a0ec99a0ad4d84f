//! Organizations: profiles wrapping a user account, with member accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, types::Json};

/// Roles allowed to change an organization.
pub const MANAGING_ROLES: [&str; 2] = ["owner", "admin"];

/// An organization row joined with its wrapped account and creator.
#[derive(Clone, FromRow, Debug)]
pub struct OrganizationProfile {
    /// Id of the wrapped account.
    pub user_id: i64,
    /// Username of the wrapped account.
    pub org: String,
    pub name: String,
    pub email: String,
    pub creator: String,
    pub metadata: Json<Value>,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

/// A member account with its role and profile metadata.
#[derive(Clone, FromRow, Debug)]
pub struct OrganizationMemberRow {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: String,
    pub metadata: Option<Json<Value>>,
}

/// `POST /orgs` body.
#[derive(Debug, Default, Deserialize)]
pub struct CreateOrganizationReq {
    pub org: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub metadata: Option<Value>,
}

/// `PATCH /orgs/{org}` body. `org` is accepted but never applied.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateOrganizationReq {
    #[allow(dead_code)]
    pub org: Option<String>,
    pub name: Option<String>,
    pub metadata: Option<Value>,
}

/// Wire representation of an organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationRepr {
    pub org: String,
    pub name: String,
    pub email: String,
    pub creator: String,
    pub metadata: Value,
    pub users: Vec<OrganizationMember>,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

/// One entry of [`OrganizationRepr::users`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrganizationMember {
    pub user: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub gravatar: String,
    pub metadata: Value,
}
