pub mod health_handlers;
pub mod open_data_handlers;
pub mod organization_handlers;
pub mod osm_handlers;
