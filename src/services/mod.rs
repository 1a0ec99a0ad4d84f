//! Store-facing services and the shared state handed to every handler.

pub mod open_data_service;
pub mod organization_service;
pub mod osm_service;

use crate::config::AppConfig;
use axum::extract::FromRef;
use open_data_service::OpenDataService;
use organization_service::OrganizationService;
use osm_service::OsmService;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Router state. Handlers pick the part they need through `FromRef`.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    pub config: Arc<AppConfig>,
    pub open_data: OpenDataService,
    pub osm: OsmService,
    pub organizations: OrganizationService,
}

impl AppState {
    pub fn new(db: Arc<SqlitePool>, config: AppConfig) -> Self {
        Self {
            open_data: OpenDataService::new(db.clone()),
            osm: OsmService::new(db.clone()),
            organizations: OrganizationService::new(db.clone()),
            config: Arc::new(config),
            db,
        }
    }
}
