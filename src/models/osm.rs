//! OSM extracts attached to submissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// OSM XML captured from a submission's `.osm` attachment.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct OsmData {
    pub id: i64,
    pub instance_id: i64,
    /// Raw `<osm>` document.
    pub xml: String,
    pub osm_id: String,
    pub osm_type: String,
    pub filename: String,
    pub field_name: String,
    pub date_created: DateTime<Utc>,
}

/// One entry of the OSM sitemap: a form that has OSM attachments.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OsmSiteMapEntry {
    pub url: String,
    pub title: String,
    pub id_string: String,
    pub user: String,
}
