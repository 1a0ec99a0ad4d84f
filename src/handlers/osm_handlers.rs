//! HTTP handlers for OSM extracts.
//!
//! Every endpoint is content-negotiated between JSON and raw OSM XML. The
//! format comes from a `.osm` / `.json` suffix on the last path segment,
//! then `?format=`, then the `Accept` header, defaulting to JSON. Requests for
//! a representation an endpoint does not serve are answered with a permanent
//! redirect to the one it does.

use crate::{
    config::AppConfig,
    errors::{AppError, NOT_FOUND},
    models::osm::{OsmData, OsmSiteMapEntry},
    pagination::PaginationQueryParams,
    services::osm_service::OsmService,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

/// Mount point of the API; used to build redirect targets and sitemap URLs.
pub const API_PREFIX: &str = "/api/v1";

const OSM_CONTENT_TYPE: &str = "text/xml; charset=utf-8";
const OSM_ROOT_OPEN: &str = r#"<osm version="0.6" generator="formdata-api">"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsmFormat {
    Osm,
    Json,
}

impl OsmFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "osm" => Some(OsmFormat::Osm),
            "json" => Some(OsmFormat::Json),
            _ => None,
        }
    }

    fn extension(&self) -> &'static str {
        match self {
            OsmFormat::Osm => "osm",
            OsmFormat::Json => "json",
        }
    }
}

/// `?format=` override.
#[derive(Debug, Default, Deserialize)]
pub struct FormatQuery {
    pub format: Option<String>,
}

/// `GET /osm`, `/osm.json`, `/osm.osm`: sitemap of forms with OSM data.
///
/// The sitemap only exists as JSON; OSM requests are redirected to it.
pub async fn list_osm(
    State(service): State<OsmService>,
    uri: Uri,
    headers: HeaderMap,
    format: Result<Query<FormatQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let explicit = split_format(uri.path()).1;
    let format = negotiate(explicit, format_query(format)?.as_deref(), &headers)?;

    if format == OsmFormat::Osm {
        let json = OsmFormat::Json.extension();
        return Ok(permanent_redirect(&format!("{}/osm.{}", API_PREFIX, json), &uri));
    }

    let entries: Vec<OsmSiteMapEntry> = service
        .sitemap()
        .await?
        .into_iter()
        .map(|form| OsmSiteMapEntry {
            url: format!("{}/osm/{}.osm", API_PREFIX, form.xform_id),
            title: form.title,
            id_string: form.id_string,
            user: form.username,
        })
        .collect();

    Ok(Json(entries).into_response())
}

/// `GET /osm/{pk}[.osm]`: all OSM data of a form, concatenated.
///
/// Paginated when `?page=` is given.
pub async fn list_form_osm(
    State(service): State<OsmService>,
    State(config): State<Arc<AppConfig>>,
    Path(segment): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    format: Result<Query<FormatQuery>, QueryRejection>,
    pagination: Result<Query<PaginationQueryParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let (pk, explicit) = split_format(&segment);
    let format = negotiate(explicit, format_query(format)?.as_deref(), &headers)?;

    if format != OsmFormat::Osm {
        let osm = OsmFormat::Osm.extension();
        return Ok(permanent_redirect(
            &format!("{}/osm/{}.{}", API_PREFIX, pk, osm),
            &uri,
        ));
    }

    let Query(pagination) =
        pagination.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    let target = service.resolve(pk, None).await?;
    let osm = service
        .osm_for(&target, pagination.page(config.page_size))
        .await?;

    Ok(osm_response(&osm))
}

/// `GET /osm/{pk}/{dataid}[.osm]`: OSM data of a single submission.
pub async fn retrieve_osm(
    State(service): State<OsmService>,
    Path((pk, segment)): Path<(String, String)>,
    uri: Uri,
    headers: HeaderMap,
    format: Result<Query<FormatQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let (dataid, explicit) = split_format(&segment);
    let format = negotiate(explicit, format_query(format)?.as_deref(), &headers)?;

    if format != OsmFormat::Osm {
        let osm = OsmFormat::Osm.extension();
        return Ok(permanent_redirect(
            &format!("{}/osm/{}/{}.{}", API_PREFIX, pk, dataid, osm),
            &uri,
        ));
    }

    let target = service.resolve(&pk, Some(dataid)).await?;
    let osm = service.osm_for(&target, None).await?;

    Ok(osm_response(&osm))
}

fn format_query(
    format: Result<Query<FormatQuery>, QueryRejection>,
) -> Result<Option<String>, AppError> {
    let Query(q) = format.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
    Ok(q.format)
}

/// Split a trailing `.osm` / `.json` off the last path segment.
fn split_format(path: &str) -> (&str, Option<OsmFormat>) {
    let segment = path.rsplit('/').next().unwrap_or(path);
    if let Some((stem, ext)) = segment.rsplit_once('.') {
        if let Some(format) = OsmFormat::parse(ext) {
            let stem_len = path.len() - segment.len() + stem.len();
            return (&path[..stem_len], Some(format));
        }
    }
    (path, None)
}

/// Pick the response format. Unknown `?format=` values are 404, like an
/// unknown route.
fn negotiate(
    explicit: Option<OsmFormat>,
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<OsmFormat, AppError> {
    if let Some(format) = explicit {
        return Ok(format);
    }
    if let Some(raw) = query {
        return OsmFormat::parse(raw).ok_or_else(|| AppError::not_found(NOT_FOUND));
    }

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    for media in accept.split(',') {
        let media = media.split(';').next().unwrap_or_default().trim();
        match media {
            "application/json" => return Ok(OsmFormat::Json),
            "text/xml" | "application/xml" | "application/osm+xml" => return Ok(OsmFormat::Osm),
            _ => continue,
        }
    }
    Ok(OsmFormat::Json)
}

/// 301 to `location`, carrying over the request's query string minus `format`.
fn permanent_redirect(location: &str, uri: &Uri) -> Response {
    let query: Vec<&str> = uri
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("format="))
        .collect();
    let target = if query.is_empty() {
        location.to_string()
    } else {
        format!("{}?{}", location, query.join("&"))
    };

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    if let Ok(value) = HeaderValue::from_str(&target) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    tracing::debug!(from = %uri, to = %target, "osm format redirect");
    response
}

fn osm_response(osm: &[OsmData]) -> Response {
    let mut response = Response::new(Body::from(combine_osm(osm)));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(OSM_CONTENT_TYPE),
    );
    response
}

/// Merge OSM documents into a single `<osm>` document.
///
/// Each document loses its XML declaration and outer `<osm>` element; the
/// nodes, ways and relations inside are emitted in order under one root.
pub fn combine_osm(osm: &[OsmData]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push_str(OSM_ROOT_OPEN);
    for data in osm {
        xml.push_str(osm_body(&data.xml));
    }
    xml.push_str("</osm>");
    xml
}

/// The content between `<osm ...>` and `</osm>`, or the whole document when it
/// has no `<osm>` root.
fn osm_body(doc: &str) -> &str {
    let mut rest = doc.trim();
    if rest.starts_with("<?xml") {
        if let Some(end) = rest.find("?>") {
            rest = rest[end + 2..].trim_start();
        }
    }

    if !rest.starts_with("<osm") {
        return rest;
    }
    let Some(open_end) = rest.find('>') else {
        return "";
    };
    if rest[..open_end].ends_with('/') {
        return "";
    }
    let inner = &rest[open_end + 1..];
    match inner.rfind("</osm>") {
        Some(close) => inner[..close].trim(),
        None => inner.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_app::TestApp;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    const WAY: &str = r#"<?xml version='1.0' encoding='UTF-8' ?>
<osm version="0.6" generator="JOSM">
  <node id="-1" lat="-1.28" lon="36.81" />
  <way id="-2"><nd ref="-1" /><tag k="highway" v="path" /></way>
</osm>"#;

    const BUILDING: &str =
        r#"<osm version="0.6"><way id="-9"><tag k="building" v="yes" /></way></osm>"#;

    /// A form with two submissions, each with one OSM file.
    async fn osm_form(app: &TestApp) -> (i64, Vec<i64>) {
        let (user, _) = app.create_user("bob").await;
        let form_id = app.publish_form(user.id, "osm", "OSM roads").await;
        let first = app.make_submission(form_id, json!({"osm_road": "way.osm"})).await;
        let second = app.make_submission(form_id, json!({"osm_road": "building.osm"})).await;
        app.add_osm(first, "-2", WAY).await;
        app.add_osm(second, "-9", BUILDING).await;
        (form_id, vec![first, second])
    }

    fn osm_data(xml: &str) -> OsmData {
        OsmData {
            id: 1,
            instance_id: 1,
            xml: xml.into(),
            osm_id: "-1".into(),
            osm_type: "way".into(),
            filename: "a.osm".into(),
            field_name: "osm_road".into(),
            date_created: chrono::Utc::now(),
        }
    }

    #[test]
    fn split_format_strips_known_suffixes_only() {
        assert_eq!(split_format("28058.osm"), ("28058", Some(OsmFormat::Osm)));
        assert_eq!(split_format("/osm.json"), ("/osm", Some(OsmFormat::Json)));
        assert_eq!(split_format("28058"), ("28058", None));
        assert_eq!(split_format("28058.xml"), ("28058.xml", None));
    }

    #[test]
    fn combine_osm_merges_documents_under_one_root() {
        let combined = combine_osm(&[osm_data(WAY), osm_data(BUILDING)]);
        assert!(
            combined.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><osm version="0.6""#)
        );
        assert_eq!(combined.matches("<osm").count(), 1);
        assert_eq!(combined.matches("</osm>").count(), 1);
        let first = combined.find(r#"<way id="-2">"#).unwrap();
        let second = combined.find(r#"<way id="-9">"#).unwrap();
        assert!(first < second);
    }

    #[test]
    fn combine_osm_skips_empty_documents() {
        let combined = combine_osm(&[osm_data(r#"<osm version="0.6"/>"#)]);
        assert_eq!(
            combined,
            format!(r#"<?xml version="1.0" encoding="UTF-8"?>{}</osm>"#, OSM_ROOT_OPEN)
        );
    }

    #[tokio::test]
    async fn retrieve_submission_osm() {
        let app = TestApp::new().await;
        let (form_id, submissions) = osm_form(&app).await;

        let response = app
            .server
            .get(&format!("/api/v1/osm/{}/{}.osm", form_id, submissions[0]))
            .await;

        response.assert_status(StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            OSM_CONTENT_TYPE
        );
        let body = response.text();
        assert!(body.contains(r#"<way id="-2">"#));
        assert!(!body.contains(r#"<way id="-9">"#));
    }

    #[tokio::test]
    async fn retrieve_submission_of_another_form_is_not_found() {
        let app = TestApp::new().await;
        let (form_id, _) = osm_form(&app).await;
        let (other_user, _) = app.create_user("alice").await;
        let other_form = app.publish_form(other_user.id, "other", "Other").await;
        let foreign = app.make_submission(other_form, json!({})).await;

        app.server
            .get(&format!("/api/v1/osm/{}/{}.osm", form_id, foreign))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn retrieve_with_non_integer_dataid_is_a_parse_error() {
        let app = TestApp::new().await;
        let (form_id, _) = osm_form(&app).await;

        let response = app
            .server
            .get(&format!("/api/v1/osm/{}/abc.osm", form_id))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], json!("Invalid dataid abc"));
    }

    #[tokio::test]
    async fn retrieve_in_json_redirects_to_osm() {
        let app = TestApp::new().await;
        let (form_id, submissions) = osm_form(&app).await;

        let response = app
            .server
            .get(&format!("/api/v1/osm/{}/{}.json", form_id, submissions[1]))
            .await;

        response.assert_status(StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            &format!("/api/v1/osm/{}/{}.osm", form_id, submissions[1])
        );
    }

    #[tokio::test]
    async fn list_form_osm_concatenates_every_submission() {
        let app = TestApp::new().await;
        let (form_id, _) = osm_form(&app).await;

        let response = app.server.get(&format!("/api/v1/osm/{}.osm", form_id)).await;

        response.assert_status(StatusCode::OK);
        let body = response.text();
        assert!(body.contains(r#"<way id="-2">"#));
        assert!(body.contains(r#"<way id="-9">"#));
    }

    #[tokio::test]
    async fn list_form_osm_paginates() {
        let app = TestApp::new().await;
        let (form_id, _) = osm_form(&app).await;
        let path = format!("/api/v1/osm/{}.osm", form_id);

        let response = app
            .server
            .get(&path)
            .add_query_param("page", 2)
            .add_query_param("page_size", 1)
            .await;
        response.assert_status(StatusCode::OK);
        let body = response.text();
        assert!(!body.contains(r#"<way id="-2">"#));
        assert!(body.contains(r#"<way id="-9">"#));

        app.server
            .get(&path)
            .add_query_param("page", 3)
            .add_query_param("page_size", 1)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_form_in_json_redirects_to_osm() {
        let app = TestApp::new().await;
        let (form_id, _) = osm_form(&app).await;

        let response = app
            .server
            .get(&format!("/api/v1/osm/{}", form_id))
            .add_query_param("page", 1)
            .await;

        response.assert_status(StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            &format!("/api/v1/osm/{}.osm?page=1", form_id)
        );
    }

    #[tokio::test]
    async fn accept_header_selects_osm() {
        let app = TestApp::new().await;
        let (form_id, _) = osm_form(&app).await;

        let response = app
            .server
            .get(&format!("/api/v1/osm/{}", form_id))
            .add_header(header::ACCEPT, HeaderValue::from_static("text/xml"))
            .await;

        response.assert_status(StatusCode::OK);
        assert!(response.text().contains("<osm"));
    }

    #[tokio::test]
    async fn collection_in_osm_redirects_to_json() {
        let app = TestApp::new().await;

        for path in ["/api/v1/osm.osm", "/api/v1/osm?format=osm"] {
            let response = app.server.get(path).await;
            response.assert_status(StatusCode::MOVED_PERMANENTLY);
            assert_eq!(
                response.headers().get(header::LOCATION).unwrap(),
                "/api/v1/osm.json"
            );
        }
    }

    #[tokio::test]
    async fn sitemap_lists_each_form_with_osm_once() {
        let app = TestApp::new().await;
        let (form_id, submissions) = osm_form(&app).await;
        app.add_osm(submissions[0], "-3", BUILDING).await;
        let (user, _) = app.create_user("alice").await;
        let without_osm = app.publish_form(user.id, "plain", "Plain").await;
        app.make_submission(without_osm, json!({})).await;
        let second_form = app.publish_form(user.id, "roads", "Roads").await;
        let submission = app.make_submission(second_form, json!({})).await;
        app.add_osm(submission, "-4", WAY).await;

        let response = app.server.get("/api/v1/osm").await;

        response.assert_status(StatusCode::OK);
        let entries: Vec<OsmSiteMapEntry> = response.json();
        assert_eq!(
            entries,
            vec![
                OsmSiteMapEntry {
                    url: format!("/api/v1/osm/{}.osm", form_id),
                    title: "OSM roads".into(),
                    id_string: "osm".into(),
                    user: "bob".into(),
                },
                OsmSiteMapEntry {
                    url: format!("/api/v1/osm/{}.osm", second_form),
                    title: "Roads".into(),
                    id_string: "roads".into(),
                    user: "alice".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn unknown_form_is_not_found() {
        let app = TestApp::new().await;
        app.server
            .get("/api/v1/osm/999/1.osm")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        app.server
            .get("/api/v1/osm/999?format=xml")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        app.server
            .get("/api/v1/osm/999.osm")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_integer_form_pk_is_not_found() {
        let app = TestApp::new().await;
        osm_form(&app).await;

        app.server
            .get("/api/v1/osm/abc.osm")
            .await
            .assert_status(StatusCode::NOT_FOUND);
        app.server
            .get("/api/v1/osm/abc/1.osm")
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn format_query_on_submission_redirects_to_osm() {
        let app = TestApp::new().await;
        let (form_id, submissions) = osm_form(&app).await;

        let response = app
            .server
            .get(&format!("/api/v1/osm/{}/{}", form_id, submissions[0]))
            .add_query_param("format", "json")
            .await;

        response.assert_status(StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            &format!("/api/v1/osm/{}/{}.osm", form_id, submissions[0])
        );
    }

    #[tokio::test]
    async fn page_with_overflowing_offset_is_invalid() {
        let app = TestApp::new().await;
        let (form_id, _) = osm_form(&app).await;

        let response = app
            .server
            .get(&format!("/api/v1/osm/{}.osm", form_id))
            .add_query_param("page", u64::MAX)
            .add_query_param("page_size", 2)
            .await;

        response.assert_status(StatusCode::NOT_FOUND);
        response.assert_json(&json!({"error": "Invalid page.", "status": 404}));
    }
}
