//! Route table of the form data API.
//!
//! ## Structure
//! - **Probes** (mounted at root)
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Open data** under `/api/v1`
//!   - `POST   /open-data`: create a record
//!   - `GET    /open-data/{uuid}`: owner's submissions (`gt_id`, `count`)
//!   - `PATCH  /open-data/{uuid}`: partial update
//!   - `DELETE /open-data/{uuid}`: delete
//!
//! - **OSM** under `/api/v1`
//!   - `GET    /osm`, `/osm.json`, `/osm.osm`: sitemap
//!   - `GET    /osm/{pk}[.osm]`: OSM data of a form
//!   - `GET    /osm/{pk}/{dataid}[.osm]`: OSM data of a submission
//!
//! - **Organizations** under `/api/v1`
//!   - `GET    /orgs`, `POST /orgs`
//!   - `GET    /orgs/{org}`, `PATCH /orgs/{org}`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        open_data_handlers::{
            create_open_data, delete_open_data, get_open_data, update_open_data,
        },
        organization_handlers::{
            create_organization, get_organization, list_organizations, update_organization,
        },
        osm_handlers::{list_form_osm, list_osm, retrieve_osm},
    },
    middleware::{authenticate, authenticate_header, cache_control, etags},
    services::AppState,
};
use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// API routes, relative to `/api/v1`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/open-data", post(create_open_data))
        .route(
            "/open-data/{uuid}",
            get(get_open_data)
                .patch(update_open_data)
                .delete(delete_open_data),
        )
        .route("/osm", get(list_osm))
        .route("/osm.json", get(list_osm))
        .route("/osm.osm", get(list_osm))
        .route("/osm/{pk}", get(list_form_osm))
        .route("/osm/{pk}/{dataid}", get(retrieve_osm))
        .route("/orgs", get(list_organizations).post(create_organization))
        .route(
            "/orgs/{org}",
            get(get_organization).patch(update_organization),
        )
}

/// Every route with state applied.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .nest("/api/v1", api_routes())
}

/// The complete application: routes wrapped in the request pipeline.
///
/// Layers run outermost first: tracing, etags, cache-control, the
/// `WWW-Authenticate` tagging, then token authentication.
pub fn app(state: AppState) -> Router {
    routes()
        .layer(from_fn_with_state(state.clone(), authenticate))
        .layer(from_fn(authenticate_header))
        .layer(from_fn_with_state(state.clone(), cache_control))
        .layer(from_fn(etags))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
