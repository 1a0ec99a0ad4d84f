//! HTTP handlers for organizations.

use crate::{
    errors::AppError,
    middleware::CurrentUser,
    models::organization::{CreateOrganizationReq, OrganizationRepr, UpdateOrganizationReq},
    services::organization_service::OrganizationService,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};

/// `POST /orgs`
pub async fn create_organization(
    State(service): State<OrganizationService>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<CreateOrganizationReq>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let Json(req) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let org = service.create(&user, req).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

/// `GET /orgs`
pub async fn list_organizations(
    State(service): State<OrganizationService>,
) -> Result<Json<Vec<OrganizationRepr>>, AppError> {
    Ok(Json(service.list().await?))
}

/// `GET /orgs/{org}`
pub async fn get_organization(
    State(service): State<OrganizationService>,
    Path(org): Path<String>,
) -> Result<Json<OrganizationRepr>, AppError> {
    Ok(Json(service.retrieve(&org).await?))
}

/// `PATCH /orgs/{org}`: rename or replace metadata; owners and admins only.
pub async fn update_organization(
    State(service): State<OrganizationService>,
    CurrentUser(user): CurrentUser,
    Path(org): Path<String>,
    body: Result<Json<UpdateOrganizationReq>, JsonRejection>,
) -> Result<Json<OrganizationRepr>, AppError> {
    let Json(req) = body.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    Ok(Json(service.update(&user, &org, req).await?))
}
