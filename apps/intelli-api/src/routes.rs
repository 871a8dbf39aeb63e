use std::convert::Infallible;

use axum::{
	Json, Router,
	extract::{FromRef, FromRequestParts, Path, Query, State},
	http::{HeaderMap, StatusCode, header, request::Parts},
	response::{
		IntoResponse, Response,
		sse::{Event, KeepAlive, Sse},
	},
	routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use uuid::Uuid;

use intelli_chunking::ContentSource;
use intelli_domain::stages;
use intelli_service::{
	ActionOutput, Error as ServiceError, Identity, IngestReport, NewThread, ThreadAction,
	TutorMessageRequest,
};

use crate::state::AppState;

const USER_ID_HEADER: &str = "x-user-id";
const USER_EMAIL_HEADER: &str = "x-user-email";
const USER_ROLE_HEADER: &str = "x-user-role";
const CURRENT_STAGE_HEADER: &str = "x-current-stage";
const DEFAULT_ROLE: &str = "student";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/tutor/messages", post(send_message))
		.route("/v1/tutor/actions", post(run_action))
		.route("/v1/tutor/threads", get(list_threads).post(create_thread))
		.route("/v1/tutor/threads/{thread_id}", get(get_thread).delete(delete_thread))
		.route("/v1/tutor/threads/{thread_id}/items", get(thread_items))
		.route("/v1/tutor/usage", get(usage))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/admin/content/ingest", post(ingest_content))
		.route("/v1/admin/content/{content_id}", delete(remove_content))
		.route("/v1/admin/threads/cleanup", post(cleanup_threads))
		.with_state(state)
}

/// The learner as asserted by the upstream auth layer.
pub struct Caller(pub Identity);
impl<S> FromRequestParts<S> for Caller
where
	S: Send + Sync,
	AppState: FromRef<S>,
{
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let AppState { service } = AppState::from_ref(state);

		check_bearer(&parts.headers, service.cfg.security.api_auth_token.as_deref())?;

		let headers = &parts.headers;
		let user_id = header_value(headers, USER_ID_HEADER)
			.ok_or_else(|| ApiError::unauthorized("Missing X-User-Id header."))?;
		let email = header_value(headers, USER_EMAIL_HEADER);
		let role = header_value(headers, USER_ROLE_HEADER)
			.map(|role| role.to_ascii_lowercase())
			.unwrap_or_else(|| DEFAULT_ROLE.to_string());
		let current_stage = match header_value(headers, CURRENT_STAGE_HEADER) {
			Some(raw) => raw.parse::<i32>().map_err(|_| {
				ApiError::new(
					StatusCode::BAD_REQUEST,
					"INVALID_REQUEST",
					"X-Current-Stage must be an integer.",
				)
			})?,
			None => 1,
		};
		let max_stage = service.cfg.tutor.max_stage;

		if !stages::is_valid_current_stage(current_stage, max_stage) {
			return Err(ApiError::new(
				StatusCode::BAD_REQUEST,
				"INVALID_REQUEST",
				format!("X-Current-Stage must be between 1 and {max_stage}."),
			));
		}

		Ok(Self(Identity { user_id, email, role, current_stage }))
	}
}

/// Admin routes require `security.admin_auth_token` when one is configured.
pub struct AdminAuth;
impl<S> FromRequestParts<S> for AdminAuth
where
	S: Send + Sync,
	AppState: FromRef<S>,
{
	type Rejection = ApiError;

	async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
		let AppState { service } = AppState::from_ref(state);

		check_bearer(&parts.headers, service.cfg.security.admin_auth_token.as_deref())?;

		Ok(Self)
	}
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
	#[serde(default)]
	limit: Option<u32>,
	#[serde(default)]
	offset: Option<u32>,
	#[serde(default)]
	status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemsQuery {
	#[serde(default)]
	limit: Option<u32>,
	#[serde(default)]
	before_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
	#[serde(flatten)]
	source: ContentSource,
	#[serde(default)]
	force_reindex: bool,
}

#[derive(Debug, Serialize)]
struct RemoveResponse {
	content_id: Uuid,
	removed: bool,
}

#[derive(Debug, Serialize)]
struct CleanupResponse {
	deleted: u64,
	retention_days: i64,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn send_message(
	State(state): State<AppState>,
	Caller(identity): Caller,
	Json(payload): Json<TutorMessageRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
	let rx = state.service.stream_message(identity, payload);
	let stream = ReceiverStream::new(rx).map(|event| {
		Ok::<_, Infallible>(Event::default().event(event.name()).data(event.data().to_string()))
	});

	Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn run_action(
	State(state): State<AppState>,
	Caller(identity): Caller,
	Json(action): Json<ThreadAction>,
) -> Result<Json<ActionOutput>, ApiError> {
	dispatch(&state, &identity, action).await
}

async fn list_threads(
	State(state): State<AppState>,
	Caller(identity): Caller,
	Query(query): Query<ListQuery>,
) -> Result<Json<ActionOutput>, ApiError> {
	let action =
		ThreadAction::List { limit: query.limit, offset: query.offset, status: query.status };

	dispatch(&state, &identity, action).await
}

async fn create_thread(
	State(state): State<AppState>,
	Caller(identity): Caller,
	Json(thread): Json<NewThread>,
) -> Result<(StatusCode, Json<ActionOutput>), ApiError> {
	let output = dispatch(&state, &identity, ThreadAction::Create { thread }).await?;

	Ok((StatusCode::CREATED, output))
}

async fn get_thread(
	State(state): State<AppState>,
	Caller(identity): Caller,
	Path(thread_id): Path<Uuid>,
) -> Result<Json<ActionOutput>, ApiError> {
	dispatch(&state, &identity, ThreadAction::Get { thread_id }).await
}

async fn delete_thread(
	State(state): State<AppState>,
	Caller(identity): Caller,
	Path(thread_id): Path<Uuid>,
) -> Result<Json<ActionOutput>, ApiError> {
	dispatch(&state, &identity, ThreadAction::Delete { thread_id }).await
}

async fn thread_items(
	State(state): State<AppState>,
	Caller(identity): Caller,
	Path(thread_id): Path<Uuid>,
	Query(query): Query<ItemsQuery>,
) -> Result<Json<ActionOutput>, ApiError> {
	let action = ThreadAction::Items { thread_id, limit: query.limit, before_id: query.before_id };

	dispatch(&state, &identity, action).await
}

async fn usage(
	State(state): State<AppState>,
	Caller(identity): Caller,
) -> Result<Json<ActionOutput>, ApiError> {
	dispatch(&state, &identity, ThreadAction::Usage).await
}

async fn ingest_content(
	State(state): State<AppState>,
	_: AdminAuth,
	Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestReport>, ApiError> {
	let report = state
		.service
		.ingest(&payload.source, payload.force_reindex)
		.await
		.map_err(|err| state.api_error(err))?;

	Ok(Json(report))
}

async fn remove_content(
	State(state): State<AppState>,
	_: AdminAuth,
	Path(content_id): Path<Uuid>,
) -> Result<Json<RemoveResponse>, ApiError> {
	let removed =
		state.service.remove_content(content_id).await.map_err(|err| state.api_error(err))?;

	Ok(Json(RemoveResponse { content_id, removed }))
}

async fn cleanup_threads(
	State(state): State<AppState>,
	_: AdminAuth,
) -> Result<Json<CleanupResponse>, ApiError> {
	let retention_days = state.service.cfg.sessions.retention_days;
	let deleted = state
		.service
		.cleanup_expired_threads(retention_days)
		.await
		.map_err(|err| state.api_error(err))?;

	Ok(Json(CleanupResponse { deleted, retention_days }))
}

async fn dispatch(
	state: &AppState,
	identity: &Identity,
	action: ThreadAction,
) -> Result<Json<ActionOutput>, ApiError> {
	let name = action.name();
	let output = state.service.dispatch(identity, action).await.map_err(|err| {
		tracing::debug!(action = name, user_id = %identity.user_id, error = %err, "Thread action failed.");

		state.api_error(err)
	})?;

	Ok(Json(output))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
	headers
		.get(name)
		.and_then(|value| value.to_str().ok())
		.map(str::trim)
		.filter(|value| !value.is_empty())
		.map(ToString::to_string)
}

fn check_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), ApiError> {
	let Some(expected) = expected else {
		return Ok(());
	};
	let provided = headers
		.get(header::AUTHORIZATION)
		.and_then(|value| value.to_str().ok())
		.and_then(|value| value.strip_prefix("Bearer "))
		.map(str::trim);

	if provided == Some(expected) {
		Ok(())
	} else {
		Err(ApiError::unauthorized("Missing or invalid bearer token."))
	}
}

impl AppState {
	fn api_error(&self, err: ServiceError) -> ApiError {
		ApiError::from_service(&err, self.service.cfg.security.expose_error_details)
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	reset_at: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
	reset_at: Option<String>,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into(), reset_at: None }
	}

	fn unauthorized(message: impl Into<String>) -> Self {
		Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
	}

	pub fn from_service(err: &ServiceError, expose_details: bool) -> Self {
		let status = match err {
			ServiceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
			ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
			ServiceError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
			ServiceError::Provider { .. } => StatusCode::BAD_GATEWAY,
			ServiceError::Storage { .. } | ServiceError::Internal { .. } =>
				StatusCode::INTERNAL_SERVER_ERROR,
		};

		if status.is_server_error() {
			tracing::error!(error = %err, "Request failed.");
		}

		let mut api_error = Self::new(status, err.code(), err.public_message(expose_details));

		if let ServiceError::RateLimited { reset_at, .. } = err {
			api_error.reset_at =
				reset_at.format(&time::format_description::well_known::Rfc3339).ok();
		}

		api_error
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody {
			error_code: self.error_code,
			message: self.message,
			reset_at: self.reset_at,
		};

		(self.status, Json(body)).into_response()
	}
}
