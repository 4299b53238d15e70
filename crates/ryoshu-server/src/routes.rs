//! HTTP routes.

use std::convert::Infallible;
use std::path::Path;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::Stream;
use ryoshu::db::job_repo::{self, JobRow, DEFAULT_LIST_LIMIT};
use ryoshu::db::receipt_repo::{self, ReceiptRow};
use ryoshu::retrieval::FileRef;
use ryoshu::status::{self, StatusFrame, Viewer};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;

use crate::auth::Session;
use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/sse", get(job_stream))
        .route("/api/batches", post(create_batch))
        .route("/api/receipts", get(list_receipts))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<u64>,
}

impl ListParams {
    fn limit(&self) -> u64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(DEFAULT_LIST_LIMIT)
    }
}

/// GET /api/jobs
async fn list_jobs(
    State(state): State<AppState>,
    Session(viewer): Session,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<JobRow>>, ApiError> {
    let jobs = status::snapshot(state.db(), &viewer, params.limit())?;
    Ok(Json(jobs))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub files: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub batch_id: i64,
    pub job_ids: Vec<i64>,
}

/// POST /api/batches
///
/// Non-admin sessions may only name local files inside the configured upload
/// directory; those paths are stored in canonical form.
async fn create_batch(
    State(state): State<AppState>,
    Session(viewer): Session,
    Json(request): Json<BatchRequest>,
) -> Result<(StatusCode, Json<BatchResponse>), ApiError> {
    if request.files.is_empty() {
        return Err(ApiError::BadRequest("No files in batch".to_string()));
    }

    let mut files = Vec::with_capacity(request.files.len());
    for file in &request.files {
        let file = file.trim();
        if file.is_empty() {
            return Err(ApiError::BadRequest("Empty file reference".to_string()));
        }
        let file = match FileRef::parse(file).map_err(|e| ApiError::BadRequest(e.to_string()))? {
            FileRef::Local(path) if !viewer.is_admin => {
                local_upload(state.upload_root(), &viewer, &path).await?
            }
            _ => file.to_string(),
        };
        files.push(file);
    }

    let (batch_id, job_ids) = job_repo::enqueue_batch(state.db(), &viewer.uploader_name, &files)?;
    tracing::info!(
        "Queued batch {} with {} job(s) for {}",
        batch_id,
        job_ids.len(),
        viewer.uploader_name
    );

    Ok((StatusCode::CREATED, Json(BatchResponse { batch_id, job_ids })))
}

async fn local_upload(
    root: Option<&Path>,
    viewer: &Viewer,
    path: &Path,
) -> Result<String, ApiError> {
    let Some(root) = root else {
        return Err(ApiError::BadRequest(
            "Local file references are not accepted; use an object-store reference".to_string(),
        ));
    };

    let resolved = tokio::fs::canonicalize(path).await.ok();
    match resolved {
        Some(resolved) if resolved.starts_with(root) => Ok(resolved.to_string_lossy().into_owned()),
        _ => {
            tracing::warn!(
                "Rejected local file {} from {}: not inside the upload directory",
                path.display(),
                viewer.uploader_name
            );
            Err(ApiError::BadRequest(format!(
                "File is not inside the upload directory: {}",
                path.display()
            )))
        }
    }
}

/// GET /api/receipts
async fn list_receipts(
    State(state): State<AppState>,
    Session(viewer): Session,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ReceiptRow>>, ApiError> {
    let receipts = receipt_repo::list(state.db(), viewer.scope(), params.limit())?;
    Ok(Json(receipts))
}

/// GET /api/jobs/sse
///
/// Sends a `connected` frame, then a `jobs_update` snapshot right away and on
/// every interval tick. Progress events for jobs the caller can see trigger an
/// extra snapshot between ticks. The interval lives inside the stream, so a
/// disconnect drops it.
async fn job_stream(
    State(state): State<AppState>,
    Session(viewer): Session,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("Status stream opened for {}", viewer.uploader_name);

    let ticks = IntervalStream::new(tokio::time::interval(state.stream_interval())).map(|_| ());

    let progress_viewer = viewer.clone();
    let progress = BroadcastStream::new(state.broadcaster().subscribe()).filter_map(
        move |event| match event {
            Ok(event) if progress_viewer.can_see(&event.uploader_name) => Some(()),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(_)) => Some(()),
        },
    );

    let db = state.db().clone();
    let limit = state.stream_limit();
    let updates = ticks
        .merge(progress)
        .map(move |_| frame_event(&status::snapshot_frame(&db, &viewer, limit)));

    let frames = tokio_stream::once(frame_event(&StatusFrame::connected())).chain(updates);

    let mut shutdown = state.shutdown();
    let stream = futures_util::StreamExt::take_until(frames, async move {
        let _ = shutdown.wait_for(|stop| *stop).await;
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn frame_event(frame: &StatusFrame) -> Result<Event, Infallible> {
    Ok(Event::default().json_data(frame).unwrap_or_else(|e| {
        tracing::warn!("Failed to encode status frame: {}", e);
        Event::default().comment("encode error")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use ryoshu::config::{Config, SessionConfig};
    use ryoshu::db::job_repo::NewJob;
    use ryoshu::{Database, JobProgressBroadcaster};
    use tokio::sync::watch;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        db: Database,
        _shutdown: watch::Sender<bool>,
    }

    fn app() -> TestApp {
        app_with(Config::default())
    }

    fn app_with(mut config: Config) -> TestApp {
        config.auth.sessions = vec![
            SessionConfig {
                token: "tok-alice".to_string(),
                uploader_name: "alice".to_string(),
                is_admin: false,
            },
            SessionConfig {
                token: "tok-root".to_string(),
                uploader_name: "root".to_string(),
                is_admin: true,
            },
        ];
        let db = Database::open_in_memory().unwrap();
        let (tx, rx) = watch::channel(false);
        let state = AppState::new(&config, db.clone(), JobProgressBroadcaster::default(), rx);
        TestApp {
            router: router(state),
            db,
            _shutdown: tx,
        }
    }

    fn seed(db: &Database, uploader: &str) -> i64 {
        job_repo::create_job(
            db,
            &NewJob {
                uploader_name: uploader.to_string(),
                file_path: format!("/tmp/{}.jpg", uploader),
                batch_id: None,
            },
        )
        .unwrap()
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let response = app.router.oneshot(get("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_jobs_require_auth() {
        let app = app();
        let response = app.router.oneshot(get("/api/jobs", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Authentication required");
    }

    #[tokio::test]
    async fn test_jobs_are_scoped() {
        let app = app();
        seed(&app.db, "alice");
        seed(&app.db, "bob");

        let response = app
            .router
            .clone()
            .oneshot(get("/api/jobs", Some("tok-alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let jobs = body_json(response).await;
        assert_eq!(jobs.as_array().unwrap().len(), 1);
        assert_eq!(jobs[0]["uploader_name"], "alice");

        let response = app
            .router
            .oneshot(get("/api/jobs", Some("tok-root")))
            .await
            .unwrap();
        assert_eq!(body_json(response).await.as_array().unwrap().len(), 2);
    }

    fn post_batch(token: &str, files: &[&str]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/batches")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "files": files }).to_string()))
            .unwrap()
    }

    fn app_with_uploads() -> (TestApp, tempfile::TempDir) {
        let uploads = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.upload_dir = Some(uploads.path().to_path_buf());
        (app_with(config), uploads)
    }

    #[tokio::test]
    async fn test_create_batch() {
        let (app, uploads) = app_with_uploads();
        let receipt = uploads.path().join("a.jpg");
        std::fs::write(&receipt, b"jpeg").unwrap();

        let request = post_batch(
            "tok-alice",
            &[receipt.to_str().unwrap(), "s3://receipts/b.jpg"],
        );
        let response = app.router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["job_ids"].as_array().unwrap().len(), 2);

        let id = body["job_ids"][0].as_i64().unwrap();
        let job = job_repo::find_by_id(&app.db, id).unwrap().unwrap();
        assert_eq!(job.uploader_name, "alice");
        assert_eq!(job.status, ryoshu::JobStatus::Pending);
        let stored = std::fs::canonicalize(&receipt).unwrap();
        assert_eq!(job.file_path, stored.to_string_lossy());
    }

    #[tokio::test]
    async fn test_create_batch_rejects_paths_outside_upload_dir() {
        let (app, uploads) = app_with_uploads();
        let outside = tempfile::NamedTempFile::new().unwrap();
        let escape = format!("{}/../{}", uploads.path().display(), "etc/passwd");

        for file in [
            "/etc/passwd",
            outside.path().to_str().unwrap(),
            escape.as_str(),
            "relative/a.jpg",
        ] {
            let response = app
                .router
                .clone()
                .oneshot(post_batch("tok-alice", &[file]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "file: {}", file);
        }
        assert!(job_repo::find_by_id(&app.db, 1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_files_need_upload_dir_unless_admin() {
        let app = app();

        let response = app
            .router
            .clone()
            .oneshot(post_batch("tok-alice", &["/tmp/a.jpg"]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .router
            .clone()
            .oneshot(post_batch("tok-alice", &["s3://receipts/b.jpg"]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .router
            .oneshot(post_batch("tok-root", &["/srv/scans/c.jpg"]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_create_batch_rejects_bad_input() {
        let app = app();
        for body in [
            r#"{"files": []}"#,
            r#"{"files": ["  "]}"#,
            r#"{"files": ["https://example.com/r.jpg"]}"#,
        ] {
            let request = Request::builder()
                .method("POST")
                .uri("/api/batches")
                .header(header::AUTHORIZATION, "Bearer tok-alice")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap();
            let response = app.router.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        }
    }

    #[tokio::test]
    async fn test_receipts_empty() {
        let app = app();
        let response = app
            .router
            .oneshot(get("/api/receipts", Some("tok-alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stream_sends_connected_then_jobs() {
        let app = app();
        seed(&app.db, "alice");

        let response = app
            .router
            .oneshot(get("/api/jobs/sse", Some("tok-alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        let mut body = response.into_body();
        let mut text = String::new();
        while !text.contains("jobs_update") {
            let frame = tokio::time::timeout(std::time::Duration::from_secs(5), body.frame())
                .await
                .expect("no frame in time")
                .unwrap()
                .unwrap();
            if let Ok(data) = frame.into_data() {
                text.push_str(&String::from_utf8_lossy(&data));
            }
        }

        let connected = text.find("\"connected\"").unwrap();
        let update = text.find("\"jobs_update\"").unwrap();
        assert!(connected < update);
        assert!(text.contains("alice.jpg"));
    }

    #[tokio::test]
    async fn test_stream_requires_auth() {
        let app = app();
        let response = app.router.oneshot(get("/api/jobs/sse", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
