//! Message REST API endpoints

use crate::{AppState, error::ApiError, middleware::auth::require_permission};
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smsgate_core::models::{
    AuthContext, Message, MessageStatus, NewMessage, Priority, RetryStrategy,
};
use smsgate_core::validation;
use store::CancelOutcome;
use utoipa::ToSchema;

/// How long before the appointment the message becomes eligible for
/// dispatch.
const DISPATCH_LEAD_HOURS: i64 = 24;

/// Upper bound on one bulk submission.
const MAX_BULK_MESSAGES: usize = 100;

/// Queue one SMS request
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequest {
    /// Destination in E.164 form
    #[schema(example = "+48123456789")]
    pub phone_number: String,
    /// Message text, up to 1600 characters
    #[schema(example = "Your appointment is tomorrow at 10:00")]
    pub message: String,
    /// RFC 3339 appointment time; dispatch opens 24 hours before it
    #[schema(example = "2026-08-02T10:00:00Z")]
    pub appointment_time: String,
    /// Defaults to NORMAL
    pub priority: Option<Priority>,
    /// Defaults to EXP
    pub retry_strategy: Option<RetryStrategy>,
    /// Defaults to 3, allowed range 0-10
    pub max_retries: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QueueResponse {
    pub id: i64,
    pub status: MessageStatus,
}

/// Bulk submission
#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkRequest {
    pub messages: Vec<QueueRequest>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkRejection {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkResponse {
    pub accepted: Vec<i64>,
    pub rejected: Vec<BulkRejection>,
}

/// History query parameters
#[derive(Debug, Deserialize, ToSchema, utoipa::IntoParams)]
pub struct HistoryQuery {
    /// 1-based page number
    #[schema(default = 1)]
    pub page: Option<u32>,
    /// Page size, capped at 100
    #[schema(default = 20)]
    pub size: Option<u32>,
    /// Filter by status
    pub status: Option<MessageStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub items: Vec<MessageResponse>,
    pub total: i64,
    pub page: u32,
    pub size: u32,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub id: i64,
    pub status: MessageStatus,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PriorityRequest {
    pub priority: Priority,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PriorityResponse {
    pub id: i64,
    pub priority: Priority,
}

/// Message as reported over the API
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: i64,
    pub phone_number: String,
    pub message: String,
    pub priority: Priority,
    pub retry_strategy: RetryStrategy,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
}

impl From<Message> for MessageResponse {
    fn from(msg: Message) -> Self {
        Self {
            id: msg.id,
            status: msg.public_status(),
            phone_number: msg.phone_number,
            message: msg.content,
            priority: msg.priority,
            retry_strategy: msg.retry_strategy,
            created_at: msg.created_at,
            scheduled_at: msg.scheduled_at,
            sent_at: msg.sent_at,
            retry_count: msg.retry_count,
            max_retries: msg.max_retries,
            last_error: msg.last_error,
        }
    }
}

/// Queue a message for dispatch
#[utoipa::path(
    post,
    path = "/sms/queue",
    request_body = QueueRequest,
    responses(
        (status = 201, description = "Message queued", body = QueueResponse),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Missing sms:write"),
        (status = 429, description = "Rate limited")
    ),
    tag = "sms",
    security(("bearer_token" = []))
)]
pub(crate) async fn queue_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<QueueRequest>,
) -> Result<Response, ApiError> {
    require_permission(&ctx, "sms:write")?;

    let msg = enqueue_one(&state, req).await?;
    tracing::info!("Queued message {} for {}", msg.id, msg.phone_number);

    let response = QueueResponse {
        id: msg.id,
        status: msg.public_status(),
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

/// Get message status by id
#[utoipa::path(
    get,
    path = "/sms/status/{id}",
    responses(
        (status = 200, description = "Message details", body = MessageResponse),
        (status = 404, description = "Unknown message"),
        (status = 401, description = "Unauthorized")
    ),
    params(("id" = i64, Path, description = "Message id")),
    tag = "sms",
    security(("bearer_token" = []))
)]
pub(crate) async fn message_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    require_permission(&ctx, "sms:read")?;

    let msg = state
        .store
        .get_message(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("message not found: {}", id)))?;

    Ok(Json(MessageResponse::from(msg)))
}

/// Page through message history
#[utoipa::path(
    get,
    path = "/sms/history",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Message page", body = HistoryResponse),
        (status = 401, description = "Unauthorized")
    ),
    tag = "sms",
    security(("bearer_token" = []))
)]
pub(crate) async fn message_history(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    require_permission(&ctx, "sms:read")?;

    let page = query.page.unwrap_or(1).max(1);
    let size = query.size.unwrap_or(20).clamp(1, 100);

    let (items, total) = state.store.list_messages(query.status, page, size).await?;

    Ok(Json(HistoryResponse {
        items: items.into_iter().map(MessageResponse::from).collect(),
        total,
        page,
        size,
    }))
}

/// Cancel a message
#[utoipa::path(
    delete,
    path = "/sms/cancel/{id}",
    responses(
        (status = 200, description = "Cancellation accepted", body = CancelResponse),
        (status = 404, description = "Unknown message"),
        (status = 409, description = "Already delivered or failed"),
        (status = 401, description = "Unauthorized")
    ),
    params(("id" = i64, Path, description = "Message id")),
    tag = "sms",
    security(("bearer_token" = []))
)]
pub(crate) async fn cancel_message(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
) -> Result<Json<CancelResponse>, ApiError> {
    require_permission(&ctx, "sms:write")?;

    match state.store.cancel(id).await? {
        // An in-flight cancel is accepted; the worker applies it best effort
        CancelOutcome::Cancelled | CancelOutcome::InFlight => Ok(Json(CancelResponse {
            id,
            status: MessageStatus::Cancelled,
        })),
        CancelOutcome::AlreadyTerminal(status) => Err(ApiError::Conflict(format!(
            "message {} is already {}",
            id, status
        ))),
        CancelOutcome::NotFound => {
            Err(ApiError::NotFound(format!("message not found: {}", id)))
        }
    }
}

/// Change the priority of a not-yet-dispatched message
#[utoipa::path(
    put,
    path = "/sms/{id}/priority",
    request_body = PriorityRequest,
    responses(
        (status = 200, description = "Priority updated", body = PriorityResponse),
        (status = 404, description = "Unknown message"),
        (status = 409, description = "Message already in delivery"),
        (status = 401, description = "Unauthorized")
    ),
    params(("id" = i64, Path, description = "Message id")),
    tag = "sms",
    security(("bearer_token" = []))
)]
pub(crate) async fn update_priority(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<i64>,
    Json(req): Json<PriorityRequest>,
) -> Result<Json<PriorityResponse>, ApiError> {
    require_permission(&ctx, "sms:write")?;

    if let Some(msg) = state.store.update_priority(id, req.priority).await? {
        return Ok(Json(PriorityResponse {
            id: msg.id,
            priority: msg.priority,
        }));
    }

    match state.store.get_message(id).await? {
        None => Err(ApiError::NotFound(format!("message not found: {}", id))),
        Some(msg) => Err(ApiError::Conflict(format!(
            "message {} is already {}",
            id,
            msg.public_status()
        ))),
    }
}

/// Queue a batch of messages
#[utoipa::path(
    post,
    path = "/sms/bulk",
    request_body = BulkRequest,
    responses(
        (status = 201, description = "Batch processed", body = BulkResponse),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Rate limited")
    ),
    tag = "sms",
    security(("bearer_token" = []))
)]
pub(crate) async fn queue_bulk(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(req): Json<BulkRequest>,
) -> Result<Response, ApiError> {
    require_permission(&ctx, "sms:write")?;

    if req.messages.len() > MAX_BULK_MESSAGES {
        return Err(ApiError::Validation(format!(
            "bulk submissions are limited to {} messages",
            MAX_BULK_MESSAGES
        )));
    }

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for (index, item) in req.messages.into_iter().enumerate() {
        match enqueue_one(&state, item).await {
            Ok(msg) => accepted.push(msg.id),
            // Internal failures abort the batch; per-item rejections don't
            Err(err @ ApiError::Internal(_)) => return Err(err),
            Err(err) => rejected.push(BulkRejection {
                index,
                reason: err.code().to_string(),
            }),
        }
    }

    tracing::info!(
        "Bulk queue: {} accepted, {} rejected",
        accepted.len(),
        rejected.len()
    );

    Ok((StatusCode::CREATED, Json(BulkResponse { accepted, rejected })).into_response())
}

/// Validate one submission and write it as a `QUEUED` row.
async fn enqueue_one(state: &AppState, req: QueueRequest) -> Result<Message, ApiError> {
    validation::validate_phone_number(&req.phone_number)?;
    validation::validate_content(&req.message)?;

    let appointment = DateTime::parse_from_rfc3339(&req.appointment_time)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ApiError::Validation(format!("appointmentTime is not a valid ISO-8601 time: {}", e))
        })?;
    let now = Utc::now();
    validation::validate_appointment(appointment, now)?;

    if let Some(max_retries) = req.max_retries {
        validation::validate_max_retries(max_retries)?;
    }

    let mut new = NewMessage::new(req.phone_number, req.message)
        .scheduled_at(appointment - Duration::hours(DISPATCH_LEAD_HOURS));
    if let Some(priority) = req.priority {
        new = new.with_priority(priority);
    }
    if let Some(strategy) = req.retry_strategy {
        new = new.with_strategy(strategy);
    }
    if let Some(max_retries) = req.max_retries {
        new = new.with_max_retries(max_retries);
    }

    Ok(state.store.insert_message(new).await?)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sms/queue", post(queue_message))
        .route("/sms/status/{id}", get(message_status))
        .route("/sms/history", get(message_history))
        .route("/sms/cancel/{id}", delete(cancel_message))
        .route("/sms/{id}/priority", put(update_priority))
        .route("/sms/bulk", post(queue_bulk))
}
