//! OpenDataService: create, read, update and delete open data records, and
//! expose the submissions of the entity a record points at.

use crate::{
    errors::{AppError, FieldErrors, NOT_FOUND, is_unique_violation, push_field_error},
    models::{
        open_data::{NewOpenData, OpenData, OpenDataChanges, OpenDataPayload, OwnerKind},
        xform::Instance,
    },
};
use axum::http::StatusCode;
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const REQUIRED_FIELDS_MESSAGE: &str = "Fields object_id, clazz and name are required.";
pub const VALID_FIELDS_MESSAGE: &str = "Valid fields are object_id, clazz and name.";
pub const CREATED_MESSAGE: &str = "Record was successfully created.";
pub const UPDATED_MESSAGE: &str = "Record was successfully updated.";

pub const INVALID_INTEGER: &str = "A valid integer is required.";
pub const FIELD_REQUIRED: &str = "This field is required.";
const FIELD_NULL: &str = "This field may not be null.";
const FIELD_BLANK: &str = "This field may not be blank.";
const NOT_A_STRING: &str = "Not a valid string.";
const NAME_MAX_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum OpenDataError {
    #[error("{}", REQUIRED_FIELDS_MESSAGE)]
    RequiredFields,
    #[error("{}", VALID_FIELDS_MESSAGE)]
    InvalidFields,
    #[error("invalid open data fields: {0:?}")]
    Validation(FieldErrors),
    #[error("{owner} `{object_id}` not found")]
    OwnerNotFound { owner: OwnerKind, object_id: i64 },
    #[error("open data `{0}` not found")]
    NotFound(String),
    #[error("open data for {owner} `{object_id}` already exists")]
    AlreadyExists { owner: OwnerKind, object_id: i64 },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type OpenDataResult<T> = Result<T, OpenDataError>;

impl From<OpenDataError> for AppError {
    fn from(err: OpenDataError) -> Self {
        match err {
            OpenDataError::RequiredFields | OpenDataError::InvalidFields => {
                AppError::bad_request(err.to_string())
            }
            OpenDataError::Validation(errors) => AppError::fields(errors),
            OpenDataError::OwnerNotFound { .. } | OpenDataError::NotFound(_) => {
                AppError::not_found(NOT_FOUND)
            }
            OpenDataError::AlreadyExists { .. } => {
                AppError::new(StatusCode::CONFLICT, "Record already exists.")
            }
            OpenDataError::Sqlx(err) => AppError::from(err),
        }
    }
}

/// OpenDataService owns the `open_data` table.
///
/// Records are keyed by a generated UUID. Each points at exactly one owning
/// entity, identified by `(object_id, clazz)`; the pair is unique.
#[derive(Clone)]
pub struct OpenDataService {
    pub db: Arc<SqlitePool>,
}

const OPEN_DATA_COLUMNS: &str =
    "id, uuid, name, object_id, content_type, active, date_created, date_modified";

impl OpenDataService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Validate a create payload.
    ///
    /// Missing fields are reported before unknown ones, then each field is
    /// checked and all field errors are returned together.
    pub fn validate_new(payload: &OpenDataPayload) -> OpenDataResult<NewOpenData> {
        if !payload.has_all_fields() {
            return Err(OpenDataError::RequiredFields);
        }
        if payload.has_unknown_fields() {
            return Err(OpenDataError::InvalidFields);
        }

        let mut errors = FieldErrors::new();
        let object_id = required(&mut errors, "object_id", &payload.object_id, parse_object_id);
        let owner = required(&mut errors, "clazz", &payload.clazz, parse_owner);
        let name = required(&mut errors, "name", &payload.name, parse_name);

        match (object_id, owner, name) {
            (Some(object_id), Some(owner), Some(name)) if errors.is_empty() => Ok(NewOpenData {
                object_id,
                owner,
                name,
            }),
            _ => Err(OpenDataError::Validation(errors)),
        }
    }

    /// Validate a partial update payload.
    ///
    /// Absent and null fields are left alone. Re-pointing the record with a
    /// new `object_id` also requires a `name`.
    pub fn validate_changes(payload: &OpenDataPayload) -> OpenDataResult<OpenDataChanges> {
        if payload.has_unknown_fields() {
            return Err(OpenDataError::InvalidFields);
        }

        let mut errors = FieldErrors::new();
        let object_id = optional(&mut errors, "object_id", &payload.object_id, parse_object_id);
        let owner = optional(&mut errors, "clazz", &payload.clazz, parse_owner);
        let name = optional(&mut errors, "name", &payload.name, parse_name);

        let repointing = matches!(payload.object_id, Some(Some(_)));
        let has_name = matches!(payload.name, Some(Some(_)));
        if repointing && !has_name {
            push_field_error(&mut errors, "name", FIELD_REQUIRED);
        }

        if !errors.is_empty() {
            return Err(OpenDataError::Validation(errors));
        }

        Ok(OpenDataChanges {
            object_id,
            owner,
            name,
        })
    }

    /// Create a record pointing at an existing owner.
    ///
    /// Uniqueness of `(object_id, clazz)` is left to the table constraint;
    /// a violation maps to AlreadyExists.
    pub async fn create(&self, payload: &OpenDataPayload) -> OpenDataResult<OpenData> {
        let new = Self::validate_new(payload)?;
        self.ensure_owner_exists(new.owner, new.object_id).await?;

        let now = Utc::now();
        let insert = sqlx::query_as::<_, OpenData>(&format!(
            "INSERT INTO open_data
                (uuid, name, object_id, content_type, active, date_created, date_modified)
             VALUES (?, ?, ?, ?, 1, ?, ?)
             RETURNING {}",
            OPEN_DATA_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(new.object_id)
        .bind(new.owner.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&*self.db)
        .await;

        match insert {
            Ok(record) => {
                info!(uuid = %record.uuid, object_id = record.object_id, "created open data");
                Ok(record)
            }
            Err(err) if is_unique_violation(&err) => Err(OpenDataError::AlreadyExists {
                owner: new.owner,
                object_id: new.object_id,
            }),
            Err(err) => Err(OpenDataError::Sqlx(err)),
        }
    }

    /// Fetch an active record by its public uuid.
    ///
    /// Malformed uuids are reported as NotFound.
    pub async fn fetch(&self, uuid: &str) -> OpenDataResult<OpenData> {
        let parsed =
            Uuid::parse_str(uuid).map_err(|_| OpenDataError::NotFound(uuid.to_string()))?;
        sqlx::query_as::<_, OpenData>(&format!(
            "SELECT {} FROM open_data WHERE uuid = ? AND active = 1",
            OPEN_DATA_COLUMNS
        ))
        .bind(parsed)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| OpenDataError::NotFound(uuid.to_string()))
    }

    /// Submissions of the record's owner, ordered by id.
    ///
    /// `gt_id` keeps only submissions whose id is strictly greater.
    pub async fn data(&self, uuid: &str, gt_id: Option<i64>) -> OpenDataResult<Vec<Value>> {
        let record = self.fetch(uuid).await?;
        let instances = match owner_kind(&record) {
            Some(OwnerKind::XForm) => {
                sqlx::query_as::<_, Instance>(
                    "SELECT id, xform_id, uuid, json, date_created, deleted_at
                     FROM instances
                     WHERE xform_id = ? AND deleted_at IS NULL AND id > ?
                     ORDER BY id ASC",
                )
                .bind(record.object_id)
                .bind(gt_id.unwrap_or(i64::MIN))
                .fetch_all(&*self.db)
                .await?
            }
            None => Vec::new(),
        };

        debug!(uuid, count = instances.len(), "loaded open data submissions");
        Ok(instances.iter().map(Instance::to_data).collect())
    }

    /// Number of submissions [`OpenDataService::data`] would return.
    pub async fn count(&self, uuid: &str, gt_id: Option<i64>) -> OpenDataResult<i64> {
        let record = self.fetch(uuid).await?;
        let count = match owner_kind(&record) {
            Some(OwnerKind::XForm) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM instances
                     WHERE xform_id = ? AND deleted_at IS NULL AND id > ?",
                )
                .bind(record.object_id)
                .bind(gt_id.unwrap_or(i64::MIN))
                .fetch_one(&*self.db)
                .await?
            }
            None => 0,
        };
        Ok(count)
    }

    /// Apply a partial update. An update naming no field returns the record untouched.
    pub async fn update(&self, uuid: &str, payload: &OpenDataPayload) -> OpenDataResult<OpenData> {
        let record = self.fetch(uuid).await?;
        let changes = Self::validate_changes(payload)?;
        if payload.is_empty_update() {
            debug!(uuid, "open data update carried no changes");
            return Ok(record);
        }

        let object_id = changes.object_id.unwrap_or(record.object_id);
        let owner = match changes.owner {
            Some(owner) => owner,
            None => owner_kind(&record).unwrap_or(OwnerKind::XForm),
        };
        if changes.object_id.is_some() || changes.owner.is_some() {
            self.ensure_owner_exists(owner, object_id).await?;
        }

        let update = sqlx::query_as::<_, OpenData>(&format!(
            "UPDATE open_data
             SET name = COALESCE(?, name),
                 object_id = ?,
                 content_type = ?,
                 date_modified = ?
             WHERE id = ?
             RETURNING {}",
            OPEN_DATA_COLUMNS
        ))
        .bind(changes.name.as_deref())
        .bind(object_id)
        .bind(owner.as_str())
        .bind(Utc::now())
        .bind(record.id)
        .fetch_one(&*self.db)
        .await;

        match update {
            Ok(updated) => {
                info!(uuid, "updated open data");
                Ok(updated)
            }
            Err(err) if is_unique_violation(&err) => {
                Err(OpenDataError::AlreadyExists { owner, object_id })
            }
            Err(err) => Err(OpenDataError::Sqlx(err)),
        }
    }

    /// Remove a record.
    pub async fn delete(&self, uuid: &str) -> OpenDataResult<()> {
        let record = self.fetch(uuid).await?;
        let result = sqlx::query("DELETE FROM open_data WHERE id = ?")
            .bind(record.id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OpenDataError::NotFound(uuid.to_string()));
        }

        info!(uuid, "deleted open data");
        Ok(())
    }

    async fn ensure_owner_exists(&self, owner: OwnerKind, object_id: i64) -> OpenDataResult<()> {
        let exists = match owner {
            OwnerKind::XForm => {
                sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM xforms WHERE id = ? AND deleted_at IS NULL)",
                )
                .bind(object_id)
                .fetch_one(&*self.db)
                .await?
            }
        };

        if exists {
            Ok(())
        } else {
            Err(OpenDataError::OwnerNotFound { owner, object_id })
        }
    }
}

fn owner_kind(record: &OpenData) -> Option<OwnerKind> {
    record.content_type.parse().ok()
}

/// Validate a field that must be present and non-null.
fn required<T>(
    errors: &mut FieldErrors,
    field: &str,
    value: &Option<Option<Value>>,
    parse: fn(&Value) -> Result<T, String>,
) -> Option<T> {
    match value {
        Some(Some(value)) => parse(value)
            .map_err(|message| push_field_error(errors, field, message))
            .ok(),
        Some(None) => {
            push_field_error(errors, field, FIELD_NULL);
            None
        }
        None => {
            push_field_error(errors, field, FIELD_REQUIRED);
            None
        }
    }
}

/// Validate a field only when it carries a value.
fn optional<T>(
    errors: &mut FieldErrors,
    field: &str,
    value: &Option<Option<Value>>,
    parse: fn(&Value) -> Result<T, String>,
) -> Option<T> {
    match value {
        Some(Some(value)) => parse(value)
            .map_err(|message| push_field_error(errors, field, message))
            .ok(),
        _ => None,
    }
}

/// Integers arrive either as JSON numbers or as strings (form posts).
pub fn parse_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn parse_object_id(value: &Value) -> Result<i64, String> {
    parse_integer(value).ok_or_else(|| INVALID_INTEGER.to_string())
}

fn parse_owner(value: &Value) -> Result<OwnerKind, String> {
    let text = value.as_str().ok_or_else(|| NOT_A_STRING.to_string())?;
    text.parse::<OwnerKind>()
        .map_err(|_| format!("\"{}\" is not a valid choice.", text))
}

fn parse_name(value: &Value) -> Result<String, String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return Err(NOT_A_STRING.to_string()),
    };
    if text.is_empty() {
        return Err(FIELD_BLANK.to_string());
    }
    if text.chars().count() > NAME_MAX_LEN {
        return Err(format!(
            "Ensure this field has no more than {} characters.",
            NAME_MAX_LEN
        ));
    }
    Ok(text)
}
