//! OsmService: read-only access to OSM extracts of forms and submissions.

use crate::{
    errors::{AppError, NOT_FOUND},
    models::{
        osm::OsmData,
        xform::{Instance, XForm},
    },
    pagination::Page,
};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OsmError {
    #[error("form `{0}` not found")]
    FormNotFound(String),
    #[error("Invalid dataid {0}")]
    InvalidDataId(String),
    #[error("submission `{dataid}` not found in form `{pk}`")]
    SubmissionNotFound { pk: i64, dataid: i64 },
    #[error("Invalid page.")]
    InvalidPage,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type OsmResult<T> = Result<T, OsmError>;

impl From<OsmError> for AppError {
    fn from(err: OsmError) -> Self {
        match err {
            OsmError::FormNotFound(_) | OsmError::SubmissionNotFound { .. } => {
                AppError::not_found(NOT_FOUND)
            }
            OsmError::InvalidPage => AppError::not_found(err.to_string()),
            OsmError::InvalidDataId(_) => AppError::bad_request(err.to_string()),
            OsmError::Sqlx(err) => AppError::from(err),
        }
    }
}

/// What a `(pk, dataid)` lookup resolved to.
#[derive(Debug, Clone)]
pub enum OsmTarget {
    Form(XForm),
    Submission(Instance),
}

/// A form that has at least one `.osm` attachment.
#[derive(Debug, Clone, FromRow, PartialEq)]
pub struct OsmForm {
    pub xform_id: i64,
    pub title: String,
    pub id_string: String,
    pub username: String,
}

#[derive(Clone)]
pub struct OsmService {
    pub db: Arc<SqlitePool>,
}

const OSM_COLUMNS: &str = "o.id, o.instance_id, o.xml, o.osm_id, o.osm_type, o.filename, \
                           o.field_name, o.date_created";

impl OsmService {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Resolve a form, or a submission scoped to that form when `dataid` is given.
    ///
    /// The form is looked up first, so an unknown form wins over a malformed dataid.
    pub async fn resolve(&self, pk: &str, dataid: Option<&str>) -> OsmResult<OsmTarget> {
        let form_id = parse_pk(pk)?;
        let form = self.fetch_form(form_id).await?;

        let Some(dataid) = dataid else {
            return Ok(OsmTarget::Form(form));
        };

        let submission_id = dataid
            .trim()
            .parse::<i64>()
            .map_err(|_| OsmError::InvalidDataId(dataid.to_string()))?;

        sqlx::query_as::<_, Instance>(
            "SELECT id, xform_id, uuid, json, date_created, deleted_at
             FROM instances
             WHERE id = ? AND xform_id = ? AND deleted_at IS NULL",
        )
        .bind(submission_id)
        .bind(form.id)
        .fetch_optional(&*self.db)
        .await?
        .map(OsmTarget::Submission)
        .ok_or(OsmError::SubmissionNotFound {
            pk: form.id,
            dataid: submission_id,
        })
    }

    /// OSM data of a resolved target: every live submission of a form, or a
    /// single submission.
    ///
    /// Form listings honour `page`; a page past the end, or one whose offset
    /// does not fit the store, is InvalidPage.
    pub async fn osm_for(
        &self,
        target: &OsmTarget,
        page: Option<Page>,
    ) -> OsmResult<Vec<OsmData>> {
        let rows = match target {
            OsmTarget::Form(form) => {
                let (limit, offset) = match page {
                    Some(page) => page.bounds().ok_or(OsmError::InvalidPage)?,
                    None => (-1, 0),
                };
                let rows = sqlx::query_as::<_, OsmData>(&format!(
                    "SELECT {} FROM osm_data o
                     JOIN instances i ON i.id = o.instance_id
                     WHERE i.xform_id = ? AND i.deleted_at IS NULL AND o.deleted_at IS NULL
                     ORDER BY o.id ASC
                     LIMIT ? OFFSET ?",
                    OSM_COLUMNS
                ))
                .bind(form.id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&*self.db)
                .await?;

                if rows.is_empty() && page.is_some_and(|p| p.page > 1) {
                    return Err(OsmError::InvalidPage);
                }
                debug!(form_id = form.id, count = rows.len(), "loaded form osm data");
                rows
            }
            OsmTarget::Submission(instance) => {
                sqlx::query_as::<_, OsmData>(&format!(
                    "SELECT {} FROM osm_data o
                     WHERE o.instance_id = ? AND o.deleted_at IS NULL
                     ORDER BY o.id ASC",
                    OSM_COLUMNS
                ))
                .bind(instance.id)
                .fetch_all(&*self.db)
                .await?
            }
        };
        Ok(rows)
    }

    /// Forms having at least one `.osm` attachment, one entry per form,
    /// ordered by form id.
    pub async fn sitemap(&self) -> OsmResult<Vec<OsmForm>> {
        let forms = sqlx::query_as::<_, OsmForm>(
            "SELECT DISTINCT x.id AS xform_id, x.title, x.id_string, u.username
             FROM attachments a
             JOIN instances i ON i.id = a.instance_id
             JOIN xforms x ON x.id = i.xform_id
             JOIN users u ON u.id = x.user_id
             WHERE a.extension = 'osm' AND x.deleted_at IS NULL
             ORDER BY x.id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(forms)
    }

    async fn fetch_form(&self, form_id: i64) -> OsmResult<XForm> {
        sqlx::query_as::<_, XForm>(
            "SELECT id, user_id, id_string, title, date_created, deleted_at
             FROM xforms WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(form_id)
        .fetch_optional(&*self.db)
        .await?
        .ok_or_else(|| OsmError::FormNotFound(form_id.to_string()))
    }
}

fn parse_pk(pk: &str) -> OsmResult<i64> {
    pk.trim()
        .parse::<i64>()
        .map_err(|_| OsmError::FormNotFound(pk.to_string()))
}
