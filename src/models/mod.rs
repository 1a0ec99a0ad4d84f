//! Core data models for the form data API.
//!
//! These entities represent the rows the API reads and writes. They map
//! cleanly to database tables via `sqlx::FromRow` and serialize as JSON via
//! `serde`.

pub mod open_data;
pub mod organization;
pub mod osm;
pub mod user;
pub mod xform;
