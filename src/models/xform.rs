//! Forms and their submissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, types::Json};

/// A published form (XForm).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct XForm {
    pub id: i64,
    /// Owner account.
    pub user_id: i64,
    pub id_string: String,
    pub title: String,
    pub date_created: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One submission (Instance) made against a form.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Instance {
    pub id: i64,
    pub xform_id: i64,
    pub uuid: String,
    /// Submitted answers, keyed by question name.
    pub json: Json<Value>,
    pub date_created: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Instance {
    /// Submission answers decorated with the `_id`, `_uuid` and
    /// `_submission_time` keys clients rely on.
    pub fn to_data(&self) -> Value {
        let mut data = match &self.json.0 {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        data.insert("_id".into(), Value::from(self.id));
        data.insert("_uuid".into(), Value::from(self.uuid.clone()));
        data.insert(
            "_submission_time".into(),
            Value::from(self.date_created.format("%Y-%m-%dT%H:%M:%S").to_string()),
        );
        Value::Object(data)
    }
}
