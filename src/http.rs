//! HTTP transport glue (spec §6). Out of the core's budget by spec §1, but
//! built in the teacher's `client-api` idiom (`axum::Router` over a
//! `State<RegistryHandle>`, route handlers returning `impl IntoResponse`)
//! so the crate is an actually runnable server.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::actor::ActorError;
use crate::codec::Record;
use crate::registry::{is_valid_log_name, RegistryError, RegistryHandle, RESERVED_STATS_LOG};

const MAX_PUT_BYTES: usize = 5 * 1024 * 1024;

pub enum ApiError {
    Validation(String),
    InvalidLog,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::InvalidLog => (StatusCode::BAD_REQUEST, "Invalid log").into_response(),
            ApiError::Internal(msg) => {
                tracing::warn!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response()
            }
        }
    }
}

impl From<ActorError> for ApiError {
    fn from(err: ActorError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

pub fn router(registry: RegistryHandle) -> Router {
    Router::new()
        .route("/put/:logname", post(put).layer(DefaultBodyLimit::disable()))
        .route("/get/:logname", get(get_log))
        .route("/archive/:logname", post(archive))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn put(
    State(registry): State<RegistryHandle>,
    Path(logname): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    validate_put_target(&logname)?;
    if headers.get(http::header::CONTENT_LENGTH).is_none() {
        return Err(ApiError::Validation("Content-Length required".into()));
    }
    if body.is_empty() {
        return Err(ApiError::Validation("empty payload".into()));
    }
    if body.len() > MAX_PUT_BYTES {
        return Err(ApiError::Validation("payload exceeds 5 MiB".into()));
    }

    let handle = registry
        .lookup_or_create(&logname, true)
        .await?
        .expect("lookup_or_create(create=true) always resolves to Some");
    let num = handle.put(body.to_vec()).await?;

    Ok((
        StatusCode::OK,
        [(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        num.to_string(),
    ))
}

fn validate_put_target(logname: &str) -> Result<(), ApiError> {
    if !is_valid_log_name(logname) {
        return Err(ApiError::Validation("invalid log name".into()));
    }
    if logname == RESERVED_STATS_LOG {
        return Err(ApiError::Validation("_kaf is reserved".into()));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct GetQuery {
    from: Option<u32>,
    format: Option<String>,
}

async fn get_log(
    State(registry): State<RegistryHandle>,
    Path(logname): Path<String>,
    Query(query): Query<GetQuery>,
) -> Result<Response, ApiError> {
    if !is_valid_log_name(&logname) {
        return Err(ApiError::Validation("invalid log name".into()));
    }
    let from = query
        .from
        .filter(|&f| f >= 1)
        .ok_or_else(|| ApiError::Validation("from must be a decimal >= 1".into()))?;
    let format = query.format.as_deref().unwrap_or("kaf");

    let records = match registry.lookup_or_create(&logname, false).await? {
        Some(handle) => handle.get(from).await?,
        None => Vec::new(),
    };

    render(format, &records)
}

#[derive(Debug, Deserialize)]
struct ArchiveQuery {
    upto: Option<u32>,
}

async fn archive(
    State(registry): State<RegistryHandle>,
    Path(logname): Path<String>,
    Query(query): Query<ArchiveQuery>,
) -> Result<StatusCode, ApiError> {
    if !is_valid_log_name(&logname) {
        return Err(ApiError::InvalidLog);
    }
    let upto = query
        .upto
        .filter(|&u| u >= 1)
        .ok_or_else(|| ApiError::Validation("upto must be a decimal >= 1".into()))?;

    let handle = registry
        .lookup_or_create(&logname, false)
        .await?
        .ok_or(ApiError::InvalidLog)?;
    handle.archive(upto).await?;
    Ok(StatusCode::OK)
}

fn render(format: &str, records: &[Record]) -> Result<Response, ApiError> {
    let (content_type, body) = match format {
        "kaf" => ("application/octet-stream", render_kaf(records)),
        "raw" => ("application/octet-stream", render_raw(records)),
        "json" => ("application/json", render_json(records)),
        other => return Err(ApiError::Validation(format!("unknown format: {other}"))),
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, content_type)
        .header(http::header::CONTENT_LENGTH, body.len());
    if let Some(last) = records.last() {
        builder = builder.header("X-Kaf-LastMsgSent", last.num.to_string());
    }
    Ok(builder.body(Body::from(body)).expect("response has a well-formed header set"))
}

fn render_kaf(records: &[Record]) -> Vec<u8> {
    let mut body = format!("KAF_MSGS|v1|{}", records.len()).into_bytes();
    for r in records {
        body.extend_from_slice(format!("\nKAF_MSG|{}|{}\n", r.num, r.payload.len()).as_bytes());
        body.extend_from_slice(&r.payload);
    }
    body
}

fn render_raw(records: &[Record]) -> Vec<u8> {
    let mut body = Vec::new();
    for r in records {
        body.extend_from_slice(&r.payload);
        body.push(b'\n');
    }
    body
}

fn render_json(records: &[Record]) -> Vec<u8> {
    let mut body = vec![b'['];
    for (i, r) in records.iter().enumerate() {
        if i > 0 {
            body.extend_from_slice(b",\n");
        }
        body.extend_from_slice(&r.payload);
    }
    body.push(b']');
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::Request;
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> Router {
        router(crate::registry::spawn(dir.to_path_buf()))
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .clone()
            .oneshot(
                Request::post("/put/foo")
                    .header(http::header::CONTENT_LENGTH, 5)
                    .body(Body::from("Hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"1");

        let response = app
            .oneshot(Request::get("/get/foo?from=1&format=raw").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("X-Kaf-LastMsgSent").unwrap(),
            "1"
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Hello\n");
    }

    #[tokio::test]
    async fn get_of_unknown_log_returns_empty_kaf_window_with_no_header() {
        let dir = tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .oneshot(
                Request::get("/get/neverexisted?from=1&format=kaf")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("X-Kaf-LastMsgSent").is_none());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"KAF_MSGS|v1|0");
    }

    #[tokio::test]
    async fn archive_of_unknown_log_is_400() {
        let dir = tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .oneshot(
                Request::post("/archive/neverexisted?upto=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn put_without_content_length_is_validation_error() {
        let dir = tempdir().unwrap();
        let app = app(dir.path());

        let response = app
            .oneshot(Request::post("/put/foo").body(Body::from("Hello")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
