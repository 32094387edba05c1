use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::config::DispatchConfig;

use super::chat::{ChatOverlay, HistoryCursor};
use super::domain::{
    GeoPoint, NewServiceRequest, Principal, ProviderId, RequestId, RequestStatus, RequesterId,
    StatusChange, VehicleClass,
};
use super::error::DispatchError;
use super::fanout::NotificationPublisher;
use super::repository::DispatchStore;
use super::service::{AcceptRequest, DispatchCoordinator, DEFAULT_PAGE_SIZE};

/// Set by the authentication layer in front of this service.
pub const PRINCIPAL_TYPE_HEADER: &str = "x-principal-type";
pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";

/// Shared handler state: the coordinator and the chat overlay over one store and hub.
pub struct DispatchApi<S, N> {
    pub coordinator: Arc<DispatchCoordinator<S, N>>,
    pub chat: Arc<ChatOverlay<S, N>>,
}

impl<S, N> Clone for DispatchApi<S, N> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            chat: self.chat.clone(),
        }
    }
}

impl<S, N> DispatchApi<S, N>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(store: Arc<S>, publisher: Arc<N>, config: &DispatchConfig) -> Self {
        let coordinator = DispatchCoordinator::new(
            store.clone(),
            publisher.clone(),
            config.matching.clone(),
        );
        let chat = ChatOverlay::new(store, publisher, config.chat_page_size);
        Self {
            coordinator: Arc::new(coordinator),
            chat: Arc::new(chat),
        }
    }
}

/// Router builder exposing every dispatch operation over HTTP.
pub fn dispatch_router<S, N>(api: DispatchApi<S, N>) -> Router
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route("/api/v1/requests", post(create_handler::<S, N>))
        .route("/api/v1/requests/mine", get(my_requests_handler::<S, N>))
        .route("/api/v1/requests/:request_id", get(details_handler::<S, N>))
        .route(
            "/api/v1/requests/:request_id/accept",
            post(accept_handler::<S, N>),
        )
        .route(
            "/api/v1/requests/:request_id/status",
            patch(status_handler::<S, N>),
        )
        .route(
            "/api/v1/requests/:request_id/location",
            post(location_handler::<S, N>),
        )
        .route(
            "/api/v1/requests/:request_id/chat",
            get(history_handler::<S, N>).post(post_message_handler::<S, N>),
        )
        .route("/api/v1/providers/nearby", get(nearby_handler::<S, N>))
        .route(
            "/api/v1/providers/me/requests",
            get(provider_queue_handler::<S, N>),
        )
        .with_state(api)
}

#[derive(Debug)]
pub enum ApiError {
    Unauthenticated(&'static str),
    Dispatch(DispatchError),
}

impl From<DispatchError> for ApiError {
    fn from(value: DispatchError) -> Self {
        Self::Dispatch(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthenticated(reason) => {
                let payload = json!({ "error": reason, "code": "unauthenticated" });
                (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
            }
            ApiError::Dispatch(err) => err.into_response(),
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let (status, payload) = match &self {
            DispatchError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                json!({ "error": self.to_string(), "code": "not_found" }),
            ),
            DispatchError::Forbidden(_) => (
                StatusCode::FORBIDDEN,
                json!({ "error": self.to_string(), "code": "forbidden" }),
            ),
            DispatchError::Conflict => (
                StatusCode::CONFLICT,
                json!({ "error": "request is no longer available", "code": "conflict" }),
            ),
            DispatchError::QuotaExceeded(denial) => (
                StatusCode::FORBIDDEN,
                json!({
                    "error": denial.to_string(),
                    "code": "quota_exceeded",
                    "reason": denial.code(),
                }),
            ),
            DispatchError::Validation(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": self.to_string(), "code": "validation" }),
            ),
            DispatchError::Internal(detail) => {
                error!(%detail, "dispatch operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal error", "code": "internal" }),
                )
            }
        };
        (status, Json(payload)).into_response()
    }
}

pub(crate) fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, ApiError> {
    let kind = headers
        .get(PRINCIPAL_TYPE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthenticated("missing principal type"))?;
    let id = headers
        .get(PRINCIPAL_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(ApiError::Unauthenticated("missing principal id"))?;

    match kind.trim().to_ascii_lowercase().as_str() {
        "requester" | "user" => Ok(Principal::Requester(RequesterId::from(id))),
        "provider" | "workshop" => Ok(Principal::Provider(ProviderId::from(id))),
        _ => Err(ApiError::Unauthenticated("unknown principal type")),
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct MyRequestsQuery {
    #[serde(default)]
    status: Option<RequestStatus>,
    #[serde(default)]
    page: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct QueueQuery {
    #[serde(default)]
    status: Option<RequestStatus>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct NearbyQuery {
    #[serde(default)]
    pub(crate) lat: Option<f64>,
    #[serde(default)]
    pub(crate) lng: Option<f64>,
    #[serde(default)]
    pub(crate) radius: Option<f64>,
    #[serde(default)]
    pub(crate) vehicle_class: Option<VehicleClass>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatBody {
    #[serde(alias = "message")]
    pub(crate) text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LocationBody {
    lat: f64,
    lng: f64,
}

pub(crate) async fn create_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Json(draft): Json<NewServiceRequest>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let created = api.coordinator.create_request(&principal, draft)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub(crate) async fn my_requests_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Query(query): Query<MyRequestsQuery>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let page = api.coordinator.list_my_requests(
        &principal,
        query.status,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    )?;
    Ok(Json(page).into_response())
}

pub(crate) async fn details_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let request = api
        .coordinator
        .request_details(&principal, &RequestId(request_id))?;
    Ok(Json(json!({ "request": request })).into_response())
}

pub(crate) async fn accept_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    body: Option<Json<AcceptRequest>>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let accept = body.map(|Json(accept)| accept).unwrap_or_default();
    let request = api
        .coordinator
        .accept_request(&principal, &RequestId(request_id), accept)?;
    Ok(Json(json!({ "message": "request accepted", "request": request })).into_response())
}

pub(crate) async fn status_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(change): Json<StatusChange>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let request = api
        .coordinator
        .update_status(&principal, &RequestId(request_id), change)?;
    Ok(Json(json!({ "request": request })).into_response())
}

pub(crate) async fn location_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(body): Json<LocationBody>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let delivered = api.coordinator.share_location(
        &principal,
        &RequestId(request_id),
        GeoPoint::new(body.lat, body.lng),
    )?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "delivered": delivered }))).into_response())
}

pub(crate) async fn history_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Query(cursor): Query<HistoryCursor>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let page = api
        .chat
        .history(&principal, &RequestId(request_id), cursor)?;
    Ok(Json(page).into_response())
}

pub(crate) async fn post_message_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let message = api
        .chat
        .post_message(&principal, &RequestId(request_id), &body.text)?;
    Ok((StatusCode::CREATED, Json(json!({ "message": message }))).into_response())
}

pub(crate) async fn nearby_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let (Some(lat), Some(lng)) = (query.lat, query.lng) else {
        return Err(DispatchError::Validation(
            "latitude and longitude are required".to_string(),
        )
        .into());
    };
    let providers = api.coordinator.nearby_providers(
        GeoPoint::new(lat, lng),
        query.radius,
        query.vehicle_class,
    )?;
    Ok(Json(json!({ "providers": providers })).into_response())
}

pub(crate) async fn provider_queue_handler<S, N>(
    State(api): State<DispatchApi<S, N>>,
    headers: HeaderMap,
    Query(query): Query<QueueQuery>,
) -> Result<Response, ApiError>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    let principal = principal_from_headers(&headers)?;
    let requests = api
        .coordinator
        .provider_queue(&principal, query.status.unwrap_or(RequestStatus::Pending))?;
    Ok(Json(json!({ "requests": requests })).into_response())
}
