use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use relayvisor::{Registry, RegistryError, StreamInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

const ACCEPTED_SCHEMES: [&str; 2] = ["rtmp://", "rtmps://"];

#[derive(Clone)]
pub struct AppState {
	pub registry: Arc<Registry>,
}

pub fn router(registry: Arc<Registry>) -> Router {
	let state = AppState { registry };

	Router::new()
		.route("/api/streams", get(list_streams).post(create_stream))
		.route("/api/streams/clear-errors", post(clear_all_errors))
		.route("/api/streams/{name}", get(stream_detail).delete(delete_stream))
		.route("/api/streams/{name}/clear-error", post(clear_error))
		.route("/logs/{name}", get(stream_logs))
		.layer(CorsLayer::permissive())
		.with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateStream {
	source_url: String,
	name: String,
	#[serde(default = "default_target_port")]
	target_port: u32,
}

fn default_target_port() -> u32 { 8554 }

#[derive(Serialize)]
struct ActionResponse {
	message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
	error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl ToString) -> ApiError {
	(status, Json(ErrorResponse { error: error.to_string() }))
}

fn registry_error(err: RegistryError) -> ApiError {
	let status = match &err {
		RegistryError::DuplicateName(_) => StatusCode::CONFLICT,
		RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
		RegistryError::Start(_) => StatusCode::BAD_GATEWAY,
		RegistryError::Stop(_) | RegistryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
	};
	api_error(status, err)
}

fn not_found(name: &str) -> ApiError {
	registry_error(RegistryError::NotFound(name.to_string()))
}

async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamInfo>> {
	Json(state.registry.list().await)
}

async fn create_stream(
	State(state): State<AppState>,
	Json(req): Json<CreateStream>,
) -> Result<(StatusCode, Json<StreamInfo>), ApiError> {
	if !ACCEPTED_SCHEMES.iter().any(|s| req.source_url.starts_with(s)) {
		return Err(api_error(
			StatusCode::BAD_REQUEST,
			format!("source_url must start with {}", ACCEPTED_SCHEMES.join(" or ")),
		));
	}
	let spec = state
		.registry
		.spec(req.name.trim(), req.source_url.trim(), req.target_port)
		.map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

	// Detached: request cancellation must not interrupt a half-done add.
	let registry = Arc::clone(&state.registry);
	let info = tokio::spawn(async move { registry.add(spec).await })
		.await
		.map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?
		.map_err(registry_error)?;

	Ok((StatusCode::CREATED, Json(info)))
}

async fn stream_detail(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<Json<StreamInfo>, ApiError> {
	state.registry.get(&name).await.map(Json).ok_or_else(|| not_found(&name))
}

async fn delete_stream(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
	state.registry.remove(&name).await.map_err(registry_error)?;
	Ok(Json(ActionResponse {
		message: format!("stream {} deleted", name),
	}))
}

async fn clear_error(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<Json<ActionResponse>, ApiError> {
	state.registry.clear_error(&name).await.map_err(registry_error)?;
	Ok(Json(ActionResponse {
		message: format!("error cleared for {}", name),
	}))
}

async fn clear_all_errors(State(state): State<AppState>) -> Json<ActionResponse> {
	state.registry.clear_all_errors().await;
	Json(ActionResponse {
		message: "errors cleared".to_string(),
	})
}

async fn stream_logs(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
	let logs = state.registry.logs(&name).await.ok_or_else(|| not_found(&name))?;
	Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], logs))
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::Body;
	use axum::http::Request;
	use relayvisor::{CommandLauncher, HealthPolicy, Launcher, MemoryStore, RegistrySettings, SupervisorSettings};
	use std::time::Duration;
	use tower::ServiceExt;

	fn registry(dir: &std::path::Path, launcher: Arc<dyn Launcher>) -> Arc<Registry> {
		let supervisor = SupervisorSettings {
			startup_grace: Duration::from_millis(50),
			stop_timeout: Duration::from_secs(2),
			kill_timeout: Duration::from_secs(1),
			health: HealthPolicy {
				cache_ttl: Duration::ZERO,
				..HealthPolicy::default()
			},
			..SupervisorSettings::new(dir)
		};
		let settings = RegistrySettings {
			max_retries: 2,
			retry_delay: Duration::from_millis(10),
			target_host: "localhost".into(),
		};
		Arc::new(Registry::new(Arc::new(MemoryStore::new()), launcher, supervisor, settings))
	}

	fn sleeper() -> Arc<dyn Launcher> {
		Arc::new(CommandLauncher::new("sleep", ["60"]))
	}

	async fn send(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, String) {
		let mut req = Request::builder().method(method).uri(uri);
		let body = match body {
			Some(json) => {
				req = req.header(header::CONTENT_TYPE, "application/json");
				Body::from(json.to_string())
			}
			None => Body::empty(),
		};
		let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
		let status = resp.status();
		let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
		(status, String::from_utf8_lossy(&bytes).into_owned())
	}

	fn create(name: &str, source_url: &str) -> Option<serde_json::Value> {
		Some(serde_json::json!({ "source_url": source_url, "name": name }))
	}

	#[tokio::test]
	async fn stream_lifecycle_over_http() {
		let dir = tempfile::tempdir().unwrap();
		let registry = registry(dir.path(), sleeper());
		let app = router(Arc::clone(&registry));

		let (status, body) = send(&app, "POST", "/api/streams", create("cam1", "rtmp://origin/live/cam1")).await;
		assert_eq!(status, StatusCode::CREATED, "{}", body);
		let info: StreamInfo = serde_json::from_str(&body).unwrap();
		assert_eq!(info.output_url, "rtsp://localhost:8554/cam1");
		assert_eq!(info.logs_url, "/logs/cam1");
		assert!(info.healthy);

		let (status, body) = send(&app, "GET", "/api/streams", None).await;
		assert_eq!(status, StatusCode::OK);
		let list: Vec<StreamInfo> = serde_json::from_str(&body).unwrap();
		assert_eq!(list.len(), 1);

		let (status, _) = send(&app, "POST", "/api/streams", create("cam1", "rtmp://origin/other")).await;
		assert_eq!(status, StatusCode::CONFLICT);

		let (status, body) = send(&app, "GET", "/logs/cam1", None).await;
		assert_eq!(status, StatusCode::OK);
		assert!(body.contains("[relayvisor] cam1: started"));

		let (status, _) = send(&app, "POST", "/api/streams/cam1/clear-error", None).await;
		assert_eq!(status, StatusCode::OK);
		let (status, _) = send(&app, "POST", "/api/streams/clear-errors", None).await;
		assert_eq!(status, StatusCode::OK);

		let (status, body) = send(&app, "DELETE", "/api/streams/cam1", None).await;
		assert_eq!(status, StatusCode::OK);
		assert!(body.contains("deleted"));

		let (status, body) = send(&app, "GET", "/api/streams/cam1", None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		assert!(body.contains("stream not found: cam1"));
		let (status, _) = send(&app, "DELETE", "/api/streams/cam1", None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
		let (status, _) = send(&app, "GET", "/logs/cam1", None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn invalid_input_is_rejected_before_spawning() {
		let dir = tempfile::tempdir().unwrap();
		let registry = registry(dir.path(), sleeper());
		let app = router(Arc::clone(&registry));

		let (status, body) = send(&app, "POST", "/api/streams", create("cam1", "http://origin/cam1")).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert!(body.contains("rtmp://"));

		let (status, _) = send(&app, "POST", "/api/streams", create("two words", "rtmp://origin/cam1")).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);

		let body = serde_json::json!({ "source_url": "rtmp://o/c", "name": "c", "target_port": 80 });
		let (status, body) = send(&app, "POST", "/api/streams", Some(body)).await;
		assert_eq!(status, StatusCode::BAD_REQUEST);
		assert!(body.contains("1024"));

		assert!(registry.list().await.is_empty());
	}

	#[tokio::test]
	async fn start_failure_maps_to_bad_gateway() {
		let dir = tempfile::tempdir().unwrap();
		let launcher: Arc<dyn Launcher> = Arc::new(CommandLauncher::new("sh", ["-c", "exit 1"]));
		let registry = registry(dir.path(), launcher);
		let app = router(Arc::clone(&registry));

		let (status, body) = send(&app, "POST", "/api/streams", create("cam1", "rtmps://origin/cam1")).await;
		assert_eq!(status, StatusCode::BAD_GATEWAY);
		assert!(body.contains("failed to start after 2 attempts"), "{}", body);

		let (status, _) = send(&app, "GET", "/api/streams/cam1", None).await;
		assert_eq!(status, StatusCode::NOT_FOUND);
	}
}
