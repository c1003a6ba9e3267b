//! REST surface for the approval core.
//!
//! Endpoints:
//! - `POST   /api/v1/requests`                  — submit a request
//! - `GET    /api/v1/requests?view=...`         — list (all | mine | pending)
//! - `GET    /api/v1/requests/{id}`             — fetch one request
//! - `PUT    /api/v1/requests/{id}`             — edit the payload
//! - `DELETE /api/v1/requests/{id}`             — soft delete
//! - `POST   /api/v1/requests/{id}/approve`     — approve the current level
//! - `POST   /api/v1/requests/{id}/reject`      — reject (comment mandatory)
//! - `POST   /api/v1/requests/{id}/cancel`      — requester withdraws
//! - `GET    /api/v1/requests/{id}/history`     — append-only trail
//! - `PUT    /api/v1/divisions/{id}/flow`       — configure the approver chain
//! - `GET    /api/v1/divisions/{id}/flow`       — read the approver chain
//!
//! Actor identity arrives from the authentication gateway as `X-Actor-Id`,
//! `X-Actor-Name` and `X-Actor-Role` headers; this layer never authenticates,
//! it only threads the identity through to the core's equality checks.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cswflow_core::domain::flow::{ApprovalFlowDefinition, DivisionId, EmployeeId, FlowStep};
use cswflow_core::domain::request::{
    CategoryId, RequestId, RequestPayload, RequesterSnapshot, ServiceRequest,
};
use cswflow_core::errors::TransitionError;
use cswflow_core::history::{ActorSnapshot, HistoryEntry};
use cswflow_core::views::RequestView;
use cswflow_db::ServiceError;

use crate::bootstrap::AppService;

#[derive(Clone)]
pub struct ApiState {
    service: Arc<AppService>,
    gateway_secret: Option<SecretString>,
}

impl ApiState {
    pub fn new(service: Arc<AppService>, gateway_secret: Option<SecretString>) -> Self {
        Self { service, gateway_secret }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/requests", post(create_request).get(list_requests))
        .route(
            "/api/v1/requests/{id}",
            get(get_request).put(edit_request).delete(delete_request),
        )
        .route("/api/v1/requests/{id}/approve", post(approve_request))
        .route("/api/v1/requests/{id}/reject", post(reject_request))
        .route("/api/v1/requests/{id}/cancel", post(cancel_request))
        .route("/api/v1/requests/{id}/history", get(request_history))
        .route("/api/v1/divisions/{id}/flow", put(put_division_flow).get(get_division_flow))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub requester_name: String,
    pub requester_position: String,
    pub division: String,
    pub category: String,
    pub situation: String,
    pub information: String,
    pub solution: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub level: u32,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub level: u32,
    pub comments: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub category: String,
    pub situation: String,
    pub information: String,
    pub solution: String,
}

#[derive(Debug, Deserialize)]
pub struct FlowBody {
    pub steps: Vec<FlowStepBody>,
}

#[derive(Debug, Deserialize)]
pub struct FlowStepBody {
    pub order: u32,
    pub approver_id: String,
    pub approver_name: String,
    pub approver_position: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub view: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiErrorBody { error: self.message })).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(error: ServiceError) -> Self {
        let status = match &error {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::InvalidConfiguration { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Transition(TransitionError::Forbidden { .. }) => StatusCode::FORBIDDEN,
            ServiceError::Transition(_) | ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::ImmutabilityViolation { .. } | ServiceError::Repository(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, error.to_string())
    }
}

// ---------------------------------------------------------------------------
// Gateway trust and actor identity
// ---------------------------------------------------------------------------

fn check_gateway(state: &ApiState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.gateway_secret else {
        return Ok(());
    };
    let presented = headers.get("x-gateway-token").and_then(|value| value.to_str().ok());
    if presented == Some(expected.expose_secret()) {
        Ok(())
    } else {
        Err(ApiError::new(StatusCode::UNAUTHORIZED, "missing or invalid gateway token"))
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn actor_from_headers(headers: &HeaderMap) -> Result<ActorSnapshot, ApiError> {
    let actor_id = header_value(headers, "x-actor-id").ok_or_else(|| {
        ApiError::new(StatusCode::UNAUTHORIZED, "X-Actor-Id header is required")
    })?;
    let name = header_value(headers, "x-actor-name").unwrap_or_else(|| actor_id.clone());
    let role = header_value(headers, "x-actor-role").unwrap_or_else(|| "employee".to_string());
    Ok(ActorSnapshot { actor_id: EmployeeId(actor_id), name, role })
}

fn correlation_id(headers: &HeaderMap) -> String {
    header_value(headers, "x-correlation-id").unwrap_or_else(|| Uuid::new_v4().to_string())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn create_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<ServiceRequest>), ApiError> {
    check_gateway(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let correlation = correlation_id(&headers);

    let requester = RequesterSnapshot {
        employee_id: actor.actor_id,
        name: body.requester_name,
        position: body.requester_position,
        division: DivisionId(body.division),
    };
    let payload = RequestPayload {
        category: CategoryId(body.category),
        situation: body.situation,
        information: body.information,
        solution: body.solution,
    };

    let request = state.service.create(requester, payload, &correlation).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_requests(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ServiceRequest>>, ApiError> {
    check_gateway(&state, &headers)?;

    let view = match query.view.as_deref().unwrap_or("all") {
        "all" => RequestView::All,
        "mine" => RequestView::Mine(actor_from_headers(&headers)?.actor_id),
        "pending" => RequestView::PendingApprovalBy(actor_from_headers(&headers)?.actor_id),
        other => {
            return Err(ApiError::new(
                StatusCode::BAD_REQUEST,
                format!("unknown view `{other}` (expected all|mine|pending)"),
            ));
        }
    };

    let requests = state.service.list(&view).await?;
    Ok(Json(requests))
}

async fn get_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ServiceRequest>, ApiError> {
    check_gateway(&state, &headers)?;
    let request = state.service.get(&RequestId(id)).await?;
    Ok(Json(request))
}

async fn approve_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<ServiceRequest>, ApiError> {
    check_gateway(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let correlation = correlation_id(&headers);

    let request = state
        .service
        .approve(&RequestId(id), &actor, body.level, body.comments.as_deref(), &correlation)
        .await?;
    Ok(Json(request))
}

async fn reject_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Result<Json<ServiceRequest>, ApiError> {
    check_gateway(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let correlation = correlation_id(&headers);

    let request = state
        .service
        .reject(&RequestId(id), &actor, body.level, &body.comments, &correlation)
        .await?;
    Ok(Json(request))
}

async fn cancel_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<CancelBody>,
) -> Result<Json<ServiceRequest>, ApiError> {
    check_gateway(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let correlation = correlation_id(&headers);

    let request = state
        .service
        .cancel(&RequestId(id), &actor, body.comments.as_deref(), &correlation)
        .await?;
    Ok(Json(request))
}

async fn edit_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<EditBody>,
) -> Result<Json<ServiceRequest>, ApiError> {
    check_gateway(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let correlation = correlation_id(&headers);

    let payload = RequestPayload {
        category: CategoryId(body.category),
        situation: body.situation,
        information: body.information,
        solution: body.solution,
    };
    let request =
        state.service.edit(&RequestId(id), &actor, payload, &correlation).await?;
    Ok(Json(request))
}

async fn delete_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    check_gateway(&state, &headers)?;
    let actor = actor_from_headers(&headers)?;
    let correlation = correlation_id(&headers);

    state.service.soft_delete(&RequestId(id), &actor, &correlation).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn request_history(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    check_gateway(&state, &headers)?;
    let entries = state.service.history(&RequestId(id)).await?;
    Ok(Json(entries))
}

async fn put_division_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<FlowBody>,
) -> Result<StatusCode, ApiError> {
    check_gateway(&state, &headers)?;

    let flow = ApprovalFlowDefinition {
        division_id: DivisionId(id),
        steps: body
            .steps
            .into_iter()
            .map(|step| FlowStep {
                order: step.order,
                approver_id: EmployeeId(step.approver_id),
                approver_name: step.approver_name,
                approver_position: step.approver_position,
            })
            .collect(),
    };
    state.service.configure_flow(flow).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_division_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ApprovalFlowDefinition>, ApiError> {
    check_gateway(&state, &headers)?;
    let flow = state.service.flow_for_division(&DivisionId(id)).await?;
    Ok(Json(flow))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use cswflow_core::audit::TracingAuditSink;
    use cswflow_core::domain::request::PayloadLimits;
    use cswflow_db::repositories::{SqlFlowRepository, SqlRequestRepository};
    use cswflow_db::{connect_with_settings, migrations, ApprovalService};

    use super::{router, ApiState};

    async fn test_router(gateway_secret: Option<&str>) -> Router {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let service = Arc::new(ApprovalService::new(
            Arc::new(SqlRequestRepository::new(pool.clone())),
            Arc::new(SqlFlowRepository::new(pool)),
            TracingAuditSink,
            PayloadLimits::default(),
        ));
        router(ApiState::new(service, gateway_secret.map(|secret| secret.to_string().into())))
    }

    async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        actor: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder
                .header("x-actor-id", actor)
                .header("x-actor-name", format!("Employee {actor}"))
                .header("x-actor-role", "employee");
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .expect("request"),
            None => builder.body(Body::empty()).expect("request"),
        };

        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn division_flow() -> Value {
        json!({
            "steps": [
                {
                    "order": 1,
                    "approver_id": "e-lead",
                    "approver_name": "Maya Kusuma",
                    "approver_position": "Tech Lead"
                },
                {
                    "order": 2,
                    "approver_id": "e-em",
                    "approver_name": "Bimo Nugroho",
                    "approver_position": "Engineering Manager"
                }
            ]
        })
    }

    fn create_body() -> Value {
        json!({
            "requester_name": "Putri Maharani",
            "requester_position": "Software Engineer",
            "division": "engineering",
            "category": "it-access",
            "situation": "CI runners lost access to the artifact store",
            "information": "Nightly builds have failed since the token rotation",
            "solution": "Issue a scoped token for the runner pool"
        })
    }

    #[tokio::test]
    async fn full_chain_over_http_reaches_approved() {
        let router = test_router(None).await;

        let (status, _) = send(
            &router,
            "PUT",
            "/api/v1/divisions/engineering/flow",
            Some("e-admin"),
            Some(division_flow()),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, created) =
            send(&router, "POST", "/api/v1/requests", Some("e-dev"), Some(create_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().expect("request id").to_string();
        assert_eq!(created["status"], "pending");
        assert_eq!(created["current_level"], 1);

        let (status, _) = send(
            &router,
            "POST",
            &format!("/api/v1/requests/{id}/approve"),
            Some("e-lead"),
            Some(json!({ "level": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, approved) = send(
            &router,
            "POST",
            &format!("/api/v1/requests/{id}/approve"),
            Some("e-em"),
            Some(json!({ "level": 2, "comments": "approved for release week" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approved["status"], "approved");

        let (status, history) = send(
            &router,
            "GET",
            &format!("/api/v1/requests/{id}/history"),
            Some("e-dev"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history.as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn create_without_configured_division_is_unprocessable() {
        let router = test_router(None).await;

        let (status, body) =
            send(&router, "POST", "/api/v1/requests", Some("e-dev"), Some(create_body())).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap_or_default().contains("engineering"));
    }

    #[tokio::test]
    async fn approve_by_wrong_actor_is_forbidden() {
        let router = test_router(None).await;
        send(
            &router,
            "PUT",
            "/api/v1/divisions/engineering/flow",
            Some("e-admin"),
            Some(division_flow()),
        )
        .await;
        let (_, created) =
            send(&router, "POST", "/api/v1/requests", Some("e-dev"), Some(create_body())).await;
        let id = created["id"].as_str().expect("request id");

        let (status, _) = send(
            &router,
            "POST",
            &format!("/api/v1/requests/{id}/approve"),
            Some("e-imposter"),
            Some(json!({ "level": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn reject_without_comment_is_bad_request() {
        let router = test_router(None).await;
        send(
            &router,
            "PUT",
            "/api/v1/divisions/engineering/flow",
            Some("e-admin"),
            Some(division_flow()),
        )
        .await;
        let (_, created) =
            send(&router, "POST", "/api/v1/requests", Some("e-dev"), Some(create_body())).await;
        let id = created["id"].as_str().expect("request id");

        let (status, _) = send(
            &router,
            "POST",
            &format!("/api/v1/requests/{id}/reject"),
            Some("e-lead"),
            Some(json!({ "level": 1, "comments": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let router = test_router(None).await;
        let (status, _) =
            send(&router, "GET", "/api/v1/requests/req-ghost", Some("e-dev"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_actor_header_is_unauthorized() {
        let router = test_router(None).await;
        let (status, _) =
            send(&router, "POST", "/api/v1/requests", None, Some(create_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn pending_view_tracks_the_current_approver() {
        let router = test_router(None).await;
        send(
            &router,
            "PUT",
            "/api/v1/divisions/engineering/flow",
            Some("e-admin"),
            Some(division_flow()),
        )
        .await;
        let (_, created) =
            send(&router, "POST", "/api/v1/requests", Some("e-dev"), Some(create_body())).await;
        let id = created["id"].as_str().expect("request id").to_string();

        let (_, lead_queue) =
            send(&router, "GET", "/api/v1/requests?view=pending", Some("e-lead"), None).await;
        assert_eq!(lead_queue.as_array().map(Vec::len), Some(1));

        send(
            &router,
            "POST",
            &format!("/api/v1/requests/{id}/approve"),
            Some("e-lead"),
            Some(json!({ "level": 1 })),
        )
        .await;

        let (_, lead_queue) =
            send(&router, "GET", "/api/v1/requests?view=pending", Some("e-lead"), None).await;
        assert_eq!(lead_queue.as_array().map(Vec::len), Some(0));

        let (_, manager_queue) =
            send(&router, "GET", "/api/v1/requests?view=pending", Some("e-em"), None).await;
        assert_eq!(manager_queue.as_array().map(Vec::len), Some(1));

        let (_, mine) =
            send(&router, "GET", "/api/v1/requests?view=mine", Some("e-dev"), None).await;
        assert_eq!(mine.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn soft_delete_returns_no_content_and_hides_the_request() {
        let router = test_router(None).await;
        send(
            &router,
            "PUT",
            "/api/v1/divisions/engineering/flow",
            Some("e-admin"),
            Some(division_flow()),
        )
        .await;
        let (_, created) =
            send(&router, "POST", "/api/v1/requests", Some("e-dev"), Some(create_body())).await;
        let id = created["id"].as_str().expect("request id");

        let (status, _) =
            send(&router, "DELETE", &format!("/api/v1/requests/{id}"), Some("e-dev"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) =
            send(&router, "GET", &format!("/api/v1/requests/{id}"), Some("e-dev"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn gateway_secret_gates_every_route() {
        let router = test_router(Some("gw-secret")).await;

        let (status, _) =
            send(&router, "GET", "/api/v1/requests", Some("e-dev"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .method("GET")
            .uri("/api/v1/requests")
            .header("x-actor-id", "e-dev")
            .header("x-gateway-token", "gw-secret")
            .body(Body::empty())
            .expect("request");
        let response = router.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
