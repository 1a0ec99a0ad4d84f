//! Exposes [TestApp] to ease the setup of the test axum server over an
//! in-memory database, plus fixtures for users, forms and submissions.

use crate::{config::AppConfig, db, models::user::User, routes::routes::app, services::AppState};
use axum::http::{HeaderValue, header};
use axum_test::{TestRequest, TestServer};
use chrono::Utc;
use serde_json::Value;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions, types::Json};
use std::sync::Arc;
use uuid::Uuid;

/// Wraps the fully configured router and the pool behind it.
pub struct TestApp {
    pub server: TestServer,
    pub db: Arc<SqlitePool>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        // a single connection keeps the in-memory database alive and shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should open");
        db::MIGRATOR
            .run(&pool)
            .await
            .expect("migrations should apply");

        let db = Arc::new(pool);
        let state = AppState::new(db.clone(), config);
        let server = TestServer::new(app(state)).expect("test server should build properly");

        Self { server, db }
    }

    /// Attach `Authorization: Token <token>` to a request.
    pub fn authorized(&self, request: TestRequest, token: &str) -> TestRequest {
        request.add_header(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Token {}", token)).unwrap(),
        )
    }

    /// Insert an account with an API token; returns the account and the token.
    pub async fn create_user(&self, username: &str) -> (User, String) {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users (username, first_name, last_name, email, date_joined)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, username, first_name, last_name, email, date_joined",
        )
        .bind(username)
        .bind(username)
        .bind("")
        .bind(format!("{}@example.com", username))
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
        .unwrap();

        sqlx::query("INSERT INTO user_profiles (user_id, name, metadata) VALUES (?, ?, ?)")
            .bind(user.id)
            .bind(username)
            .bind(Json(serde_json::json!({"last_page": "forms"})))
            .execute(&*self.db)
            .await
            .unwrap();

        let token = Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO auth_tokens (key, user_id, created) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(user.id)
            .bind(Utc::now())
            .execute(&*self.db)
            .await
            .unwrap();

        (user, token)
    }

    pub async fn publish_form(&self, user_id: i64, id_string: &str, title: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO xforms (user_id, id_string, title, date_created)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(user_id)
        .bind(id_string)
        .bind(title)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
        .unwrap()
    }

    pub async fn make_submission(&self, xform_id: i64, answers: Value) -> i64 {
        sqlx::query_scalar::<_, i64>(
            "INSERT INTO instances (xform_id, uuid, json, date_created)
             VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(xform_id)
        .bind(Uuid::new_v4().to_string())
        .bind(Json(answers))
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
        .unwrap()
    }

    /// Attach an `.osm` file to a submission and record its parsed OSM data.
    pub async fn add_osm(&self, instance_id: i64, osm_id: &str, xml: &str) -> i64 {
        let filename = format!("{}.osm", osm_id);
        sqlx::query(
            "INSERT INTO attachments (instance_id, media_file, mimetype, extension)
             VALUES (?, ?, 'text/xml', 'osm')",
        )
        .bind(instance_id)
        .bind(&filename)
        .execute(&*self.db)
        .await
        .unwrap();

        sqlx::query_scalar::<_, i64>(
            "INSERT INTO osm_data
                (instance_id, xml, osm_id, osm_type, filename, field_name, date_created)
             VALUES (?, ?, ?, 'way', ?, 'osm_road', ?) RETURNING id",
        )
        .bind(instance_id)
        .bind(xml)
        .bind(osm_id)
        .bind(&filename)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
        .unwrap()
    }

    /// Insert an open data record for a form directly; returns its uuid.
    pub async fn open_data_for(&self, form_id: i64, name: &str) -> String {
        let uuid = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO open_data
                (uuid, name, object_id, content_type, active, date_created, date_modified)
             VALUES (?, ?, ?, 'xform', 1, ?, ?)",
        )
        .bind(uuid)
        .bind(name)
        .bind(form_id)
        .bind(now)
        .bind(now)
        .execute(&*self.db)
        .await
        .unwrap();
        uuid.to_string()
    }

    pub async fn last_open_data_uuid(&self) -> String {
        sqlx::query_scalar::<_, Uuid>("SELECT uuid FROM open_data ORDER BY id DESC LIMIT 1")
            .fetch_one(&*self.db)
            .await
            .unwrap()
            .to_string()
    }

    pub async fn open_data_name(&self, uuid: &str) -> String {
        sqlx::query_scalar::<_, String>("SELECT name FROM open_data WHERE uuid = ?")
            .bind(Uuid::parse_str(uuid).unwrap())
            .fetch_one(&*self.db)
            .await
            .unwrap()
    }

    /// Row count of `table`. Only call with literal table names.
    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&*self.db)
            .await
            .unwrap()
    }
}
