use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use huddle_shared::errors::{AppError, AppResult, ErrorCode};
use huddle_shared::middleware::ValidatedJson;
use huddle_shared::types::api::{ApiMessage, ApiResponse};
use huddle_shared::types::auth::AuthUser;
use huddle_shared::types::pagination::{Paginated, PaginationParams};
use huddle_shared::types::request::RequestMeta;

use crate::models::{ReportReason, ReportStatus};
use crate::services::moderation::{
    self, ReviewDecision, AUDIT_PAGE_SIZE, BLOCKED_IPS_PAGE_SIZE, MY_REPORTS_PAGE_SIZE,
    REPORTS_PAGE_SIZE,
};
use crate::views::{AuditEntryView, BlockedIpView, ReportView};
use crate::AppState;

// --- Request DTOs ---

#[derive(Debug, Deserialize, Validate)]
pub struct ReportMessageRequest {
    pub reason: ReportReason,
    #[validate(length(max = 1000, message = "the description may not be greater than 1000 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReportFilterParams {
    pub status: Option<ReportStatus>,
    #[serde(default = "first_page")]
    pub page: u64,
}

fn first_page() -> u64 { 1 }

#[derive(Debug, Deserialize, Validate)]
pub struct ReviewReportRequest {
    pub status: ReportStatus,
    #[validate(length(max = 1000, message = "the moderator notes may not be greater than 1000 characters"))]
    pub moderator_notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct BlockIpRequest {
    pub ip_address: String,
    #[validate(length(max = 500, message = "the reason may not be greater than 500 characters"))]
    pub reason: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UnblockIpRequest {
    pub ip_address: String,
}

fn parse_ip(raw: &str) -> AppResult<IpAddr> {
    raw.trim().parse().map_err(|_| {
        AppError::field(ErrorCode::ValidationError, "ip_address", "the ip address must be a valid ip address")
    })
}

// --- Handlers ---

/// POST /messages/:mid/report
pub async fn report_message(
    auth_user: AuthUser,
    meta: RequestMeta,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReportMessageRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<ReportView>>)> {
    let report = moderation::report(
        state.store.as_ref(),
        &auth_user,
        &meta,
        message_id,
        req.reason,
        req.description,
    )?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(report, "Message reported successfully")),
    ))
}

/// GET /moderation/my-reports
pub async fn my_reports(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<ReportView>>>> {
    let page = moderation::my_reports(state.store.as_ref(), &auth_user, params.sized(MY_REPORTS_PAGE_SIZE))?;
    Ok(Json(ApiResponse::ok(page)))
}

/// GET /moderation/reports
pub async fn list_reports(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReportFilterParams>,
) -> AppResult<Json<ApiResponse<Paginated<ReportView>>>> {
    let page = moderation::list_reports(
        state.store.as_ref(),
        &auth_user,
        params.status,
        PaginationParams { page: params.page }.sized(REPORTS_PAGE_SIZE),
    )?;
    Ok(Json(ApiResponse::ok(page)))
}

/// PUT /moderation/reports/:id
pub async fn review_report(
    auth_user: AuthUser,
    meta: RequestMeta,
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<ReviewReportRequest>,
) -> AppResult<Json<ApiResponse<ReportView>>> {
    let report = moderation::review(
        state.store.as_ref(),
        state.broadcaster.as_ref(),
        &auth_user,
        &meta,
        report_id,
        ReviewDecision {
            status: req.status,
            moderator_notes: req.moderator_notes,
        },
    )?;
    Ok(Json(ApiResponse::ok_with_message(report, "Report reviewed successfully")))
}

/// POST /moderation/block-ip
pub async fn block_ip(
    auth_user: AuthUser,
    meta: RequestMeta,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<BlockIpRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<BlockedIpView>>)> {
    let ip = parse_ip(&req.ip_address)?;
    let block = moderation::block_ip(state.store.as_ref(), &auth_user, &meta, ip, req.reason, req.expires_at)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(block, "IP address blocked successfully")),
    ))
}

/// POST /moderation/unblock-ip
pub async fn unblock_ip(
    auth_user: AuthUser,
    meta: RequestMeta,
    State(state): State<Arc<AppState>>,
    ValidatedJson(req): ValidatedJson<UnblockIpRequest>,
) -> AppResult<Json<ApiMessage>> {
    let ip = parse_ip(&req.ip_address)?;
    moderation::unblock_ip(state.store.as_ref(), &auth_user, &meta, ip)?;
    Ok(Json(ApiMessage::new("IP address unblocked successfully")))
}

/// GET /moderation/blocked-ips
pub async fn list_blocked_ips(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<BlockedIpView>>>> {
    let page = moderation::list_blocked_ips(state.store.as_ref(), &auth_user, params.sized(BLOCKED_IPS_PAGE_SIZE))?;
    Ok(Json(ApiResponse::ok(page)))
}

/// GET /moderation/audit-logs
pub async fn list_audit_logs(
    auth_user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<AuditEntryView>>>> {
    let page = moderation::list_audit_logs(state.store.as_ref(), &auth_user, params.sized(AUDIT_PAGE_SIZE))?;
    Ok(Json(ApiResponse::ok(page)))
}
