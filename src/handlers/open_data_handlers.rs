//! HTTP handlers for open data records.
//! Payload validation and persistence live in `OpenDataService`.

use crate::{
    errors::{AppError, FieldErrors, push_field_error},
    middleware::CurrentUser,
    models::open_data::OpenDataPayload,
    services::open_data_service::{
        CREATED_MESSAGE, INVALID_INTEGER, OpenDataService, UPDATED_MESSAGE, parse_integer,
    },
};
use axum::{
    Form, Json,
    extract::{FromRequest, Path, Query, Request, State, rejection::QueryRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

/// Query params accepted when reading a record's data.
#[derive(Debug, Default, Deserialize)]
pub struct OpenDataQuery {
    pub gt_id: Option<String>,
    pub count: Option<String>,
}

/// Open data payload read from a JSON or urlencoded body. An empty body is an
/// empty payload.
pub struct OpenDataForm(pub OpenDataPayload);

impl<S> FromRequest<S> for OpenDataForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_form = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

        if is_form {
            let Form(payload) = Form::<OpenDataPayload>::from_request(req, state)
                .await
                .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
            return Ok(Self(payload));
        }

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(OpenDataPayload::default()));
        }

        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|err| AppError::bad_request(format!("JSON parse error - {}", err)))
    }
}

/// `POST /open-data`: create a record pointing at an owning entity.
pub async fn create_open_data(
    State(service): State<OpenDataService>,
    CurrentUser(user): CurrentUser,
    OpenDataForm(payload): OpenDataForm,
) -> Result<impl IntoResponse, AppError> {
    let record = service.create(&payload).await?;
    debug!(user = %user.username, uuid = %record.uuid, "open data created via api");
    Ok((StatusCode::CREATED, Json(CREATED_MESSAGE)))
}

/// `GET /open-data/{uuid}`: submissions of the owning entity.
///
/// `?gt_id=N` keeps submissions with an id above N; `?count=true` returns
/// only their number.
pub async fn get_open_data(
    State(service): State<OpenDataService>,
    Path(uuid): Path<String>,
    query: Result<Query<OpenDataQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(q) = query.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let gt_id = match q.gt_id.as_deref() {
        Some(raw) => match parse_integer(&Value::from(raw)) {
            Some(id) => Some(id),
            None => {
                let mut errors = FieldErrors::new();
                push_field_error(&mut errors, "gt_id", INVALID_INTEGER);
                return Err(AppError::fields(errors));
            }
        },
        None => None,
    };

    if q.count.as_deref().is_some_and(is_truthy) {
        let count = service.count(&uuid, gt_id).await?;
        return Ok(Json(json!({ "count": count })).into_response());
    }

    let data = service.data(&uuid, gt_id).await?;
    Ok(Json(data).into_response())
}

/// `PATCH /open-data/{uuid}`: partial update.
pub async fn update_open_data(
    State(service): State<OpenDataService>,
    CurrentUser(user): CurrentUser,
    Path(uuid): Path<String>,
    OpenDataForm(payload): OpenDataForm,
) -> Result<impl IntoResponse, AppError> {
    service.update(&uuid, &payload).await?;
    debug!(user = %user.username, uuid = %uuid, "open data updated via api");
    Ok((StatusCode::OK, Json(UPDATED_MESSAGE)))
}

/// `DELETE /open-data/{uuid}`
pub async fn delete_open_data(
    State(service): State<OpenDataService>,
    CurrentUser(user): CurrentUser,
    Path(uuid): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    service.delete(&uuid).await?;
    debug!(user = %user.username, uuid = %uuid, "open data deleted via api");
    Ok(StatusCode::NO_CONTENT)
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
