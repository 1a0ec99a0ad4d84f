//! OrganizationService: validate, create, update and represent organizations.
//!
//! An organization wraps a user account whose username is the `org` handle.
//! Creation writes the account, its profile, the organization profile and the
//! creator's `owner` membership in one transaction.

use crate::{
    errors::{AppError, FieldErrors, NOT_FOUND, is_unique_violation, push_field_error},
    models::{
        organization::{
            CreateOrganizationReq, MANAGING_ROLES, OrganizationMember, OrganizationMemberRow,
            OrganizationProfile, OrganizationRepr, UpdateOrganizationReq,
        },
        user::{NAME_PART_MAX_LEN, User, gravatar_url},
    },
};
use chrono::Utc;
use serde_json::json;
use sqlx::{SqlitePool, types::Json};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Handles that would clash with routes or well-known accounts.
pub const RESERVED_USERNAMES: [&str; 24] = [
    "about",
    "accounts",
    "admin",
    "api",
    "clients",
    "crowdform",
    "crowdforms",
    "data",
    "forms",
    "maps",
    "odk",
    "open-data",
    "orgs",
    "osm",
    "public",
    "save",
    "static",
    "submission",
    "submit",
    "support",
    "syntax",
    "users",
    "xls2xform",
    "xforms",
];

const ORG_MAX_LEN: usize = 30;
const PROFILE_NAME_MAX_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum OrganizationError {
    #[error("invalid organization fields: {0:?}")]
    Validation(FieldErrors),
    #[error("organization `{0}` not found")]
    NotFound(String),
    #[error("user `{user}` may not change organization `{org}`")]
    PermissionDenied { user: String, org: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type OrganizationResult<T> = Result<T, OrganizationError>;

impl From<OrganizationError> for AppError {
    fn from(err: OrganizationError) -> Self {
        match err {
            OrganizationError::Validation(errors) => AppError::fields(errors),
            OrganizationError::NotFound(_) => AppError::not_found(NOT_FOUND),
            OrganizationError::PermissionDenied { .. } => AppError::permission_denied(),
            OrganizationError::Sqlx(err) => AppError::from(err),
        }
    }
}

#[derive(Clone)]
pub struct OrganizationService {
    pub db: Arc<SqlitePool>,
}

const PROFILE_SELECT: &str = "SELECT o.user_id, u.username AS org, o.name, u.email,
            c.username AS creator, o.metadata, o.date_created, o.date_modified
     FROM organization_profiles o
     JOIN users u ON u.id = o.user_id
     JOIN users c ON c.id = o.creator_id";

impl OrganizationService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Check an `org` handle: not reserved and only ASCII alphanumerics or
    /// underscores. Expects the lowercased value.
    pub fn validate_org(org: &str) -> Result<(), String> {
        if RESERVED_USERNAMES.contains(&org) {
            return Err(format!("{} is a reserved name, please choose another", org));
        }
        if org.is_empty()
            || !org
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(
                "organization may only contain alpha-numeric characters and underscores".into(),
            );
        }
        if org.len() > ORG_MAX_LEN {
            return Err(format!(
                "Ensure this value has at most {} characters (it has {}).",
                ORG_MAX_LEN,
                org.len()
            ));
        }
        Ok(())
    }

    /// Create an organization owned by `creator`.
    ///
    /// Nothing is written unless every field validates and the handle is free.
    pub async fn create(
        &self,
        creator: &User,
        req: CreateOrganizationReq,
    ) -> OrganizationResult<OrganizationRepr> {
        let mut errors = FieldErrors::new();

        let org = match non_blank(req.org.as_deref()) {
            Some(org) => {
                let org = org.to_lowercase();
                match Self::validate_org(&org) {
                    Ok(()) => Some(org),
                    Err(message) => {
                        push_field_error(&mut errors, "org", message);
                        None
                    }
                }
            }
            None => {
                push_field_error(&mut errors, "org", "org is required!");
                None
            }
        };

        let name = match non_blank(req.name.as_deref()) {
            Some(name) => Some(name.to_string()),
            None => {
                push_field_error(&mut errors, "name", "name is required!");
                None
            }
        };
        let (first_name, last_name) = name
            .as_deref()
            .map(|name| split_account_name(&mut errors, name))
            .unwrap_or_default();

        let email = req.email.unwrap_or_default().trim().to_string();
        if !email.is_empty() && !email.contains('@') {
            push_field_error(&mut errors, "email", "Enter a valid email address.");
        }

        let (Some(org), Some(name)) = (org, name) else {
            return Err(OrganizationError::Validation(errors));
        };
        if !errors.is_empty() {
            return Err(OrganizationError::Validation(errors));
        }

        let metadata = req.metadata.unwrap_or_else(|| json!({}));
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let inserted = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (username, first_name, last_name, email, date_joined)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&org)
        .bind(&first_name)
        .bind(&last_name)
        .bind(&email)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        let org_user_id = match inserted {
            Ok(id) => id,
            Err(err) if is_unique_violation(&err) => {
                let mut errors = FieldErrors::new();
                push_field_error(
                    &mut errors,
                    "org",
                    format!("Organization {} already exists.", org),
                );
                return Err(OrganizationError::Validation(errors));
            }
            Err(err) => return Err(err.into()),
        };

        sqlx::query(
            "INSERT INTO user_profiles (user_id, name, metadata, created_by) VALUES (?, ?, ?, ?)",
        )
        .bind(org_user_id)
        .bind(&name)
        .bind(Json(json!({})))
        .bind(creator.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO organization_profiles
                (user_id, name, creator_id, metadata, date_created, date_modified)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(org_user_id)
        .bind(&name)
        .bind(creator.id)
        .bind(Json(metadata))
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO organization_members (organization_id, user_id, role)
             VALUES (?, ?, 'owner')",
        )
        .bind(org_user_id)
        .bind(creator.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(org = %org, creator = %creator.username, "created organization");

        self.retrieve(&org).await
    }

    /// Apply `name` and `metadata` changes. The `org` handle never changes.
    pub async fn update(
        &self,
        caller: &User,
        org: &str,
        req: UpdateOrganizationReq,
    ) -> OrganizationResult<OrganizationRepr> {
        let profile = self.fetch_profile(org).await?;
        let role = self.role_of(profile.user_id, caller.id).await?;
        if !role.is_some_and(|role| MANAGING_ROLES.contains(&role.as_str())) {
            return Err(OrganizationError::PermissionDenied {
                user: caller.username.clone(),
                org: profile.org,
            });
        }

        let mut errors = FieldErrors::new();
        let name = match req.name.as_deref() {
            Some(raw) => match non_blank(Some(raw)) {
                Some(name) => {
                    if name.chars().count() > PROFILE_NAME_MAX_LEN {
                        push_field_error(
                            &mut errors,
                            "name",
                            format!(
                                "Ensure this value has at most {} characters.",
                                PROFILE_NAME_MAX_LEN
                            ),
                        );
                    }
                    let parts = split_account_name(&mut errors, name);
                    Some((name.to_string(), parts))
                }
                None => {
                    push_field_error(&mut errors, "name", "This field may not be blank.");
                    None
                }
            },
            None => None,
        };
        if !errors.is_empty() {
            return Err(OrganizationError::Validation(errors));
        }

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        if let Some((name, (first_name, last_name))) = &name {
            sqlx::query("UPDATE users SET first_name = ?, last_name = ? WHERE id = ?")
                .bind(first_name)
                .bind(last_name)
                .bind(profile.user_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("UPDATE user_profiles SET name = ? WHERE user_id = ?")
                .bind(name)
                .bind(profile.user_id)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "UPDATE organization_profiles
             SET name = COALESCE(?, name),
                 metadata = COALESCE(?, metadata),
                 date_modified = ?
             WHERE user_id = ?",
        )
        .bind(name.as_ref().map(|(name, _)| name.as_str()))
        .bind(req.metadata.map(Json))
        .bind(now)
        .bind(profile.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(org = %profile.org, "updated organization");

        self.retrieve(&profile.org).await
    }

    /// Representation of a single organization.
    pub async fn retrieve(&self, org: &str) -> OrganizationResult<OrganizationRepr> {
        let profile = self.fetch_profile(org).await?;
        self.represent(profile).await
    }

    /// Every organization, ordered by handle.
    pub async fn list(&self) -> OrganizationResult<Vec<OrganizationRepr>> {
        let sql = format!("{} ORDER BY u.username", PROFILE_SELECT);
        let profiles = sqlx::query_as::<_, OrganizationProfile>(&sql)
            .fetch_all(&*self.db)
            .await?;

        let mut orgs = Vec::with_capacity(profiles.len());
        for profile in profiles {
            orgs.push(self.represent(profile).await?);
        }
        Ok(orgs)
    }

    /// Members of an organization in membership order.
    pub async fn members(
        &self,
        organization_id: i64,
    ) -> OrganizationResult<Vec<OrganizationMember>> {
        let rows = sqlx::query_as::<_, OrganizationMemberRow>(
            "SELECT u.username, u.first_name, u.last_name, u.email, m.role, p.metadata
             FROM organization_members m
             JOIN users u ON u.id = m.user_id
             LEFT JOIN user_profiles p ON p.user_id = u.id
             WHERE m.organization_id = ?
             ORDER BY m.rowid",
        )
        .bind(organization_id)
        .fetch_all(&*self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OrganizationMember {
                gravatar: gravatar_url(&row.email),
                user: row.username,
                role: row.role,
                first_name: row.first_name,
                last_name: row.last_name,
                metadata: row.metadata.map(|m| m.0).unwrap_or_else(|| json!({})),
            })
            .collect())
    }

    async fn represent(
        &self,
        profile: OrganizationProfile,
    ) -> OrganizationResult<OrganizationRepr> {
        let users = self.members(profile.user_id).await?;
        Ok(OrganizationRepr {
            org: profile.org,
            name: profile.name,
            email: profile.email,
            creator: profile.creator,
            metadata: profile.metadata.0,
            users,
            date_created: profile.date_created,
            date_modified: profile.date_modified,
        })
    }

    async fn fetch_profile(&self, org: &str) -> OrganizationResult<OrganizationProfile> {
        let sql = format!("{} WHERE u.username = ?", PROFILE_SELECT);
        sqlx::query_as::<_, OrganizationProfile>(&sql)
            .bind(org.to_lowercase())
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| OrganizationError::NotFound(org.to_string()))
    }

    async fn role_of(
        &self,
        organization_id: i64,
        user_id: i64,
    ) -> OrganizationResult<Option<String>> {
        let role = sqlx::query_scalar::<_, String>(
            "SELECT role FROM organization_members WHERE organization_id = ? AND user_id = ?",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(role)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Split a display name for the wrapped account, reporting parts that exceed
/// the account's name limits.
fn split_account_name(errors: &mut FieldErrors, name: &str) -> (String, String) {
    let (first_name, last_name) = User::split_name(name);
    for (field, value) in [("first_name", &first_name), ("last_name", &last_name)] {
        let len = value.chars().count();
        if len > NAME_PART_MAX_LEN {
            push_field_error(
                errors,
                field,
                format!(
                    "Ensure this value has at most {} characters (it has {}).",
                    NAME_PART_MAX_LEN, len
                ),
            );
        }
    }
    (first_name, last_name)
}
