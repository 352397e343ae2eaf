//! Route handlers and the JSON shapes they answer with.
//!
//! Each handler pulls the caller and payload out of the request, calls one
//! pipeline operation, and shapes the result. Extractor rejections become
//! `ApiError`s so malformed bodies, paths and queries get the same
//! `{"detail"}` envelope as pipeline errors.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::auth::CurrentUser;
use super::error::ApiError;
use super::AppState;
use crate::classifier::ClassificationResult;
use crate::error::NotificationError;
use crate::intake::{IntakeOutcome, IntakeRequest};
use crate::lifecycle;
use crate::models::{Authority, Category, Issue, IssueStatus, Priority, Radius, Vote};
use crate::store::NotificationQuery;

type ApiResult<T> = Result<T, ApiError>;

// ── Response shapes ──

/// A report as the API shows it: the row, its authority, its vote count.
#[derive(Debug, Serialize)]
pub struct IssueView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub authority_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub status: IssueStatus,
    pub location: String,
    pub radius: Radius,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub authority: Option<Authority>,
    pub vote_count: i64,
}

impl IssueView {
    fn new(issue: Issue, authority: Option<Authority>, vote_count: i64) -> Self {
        Self {
            id: issue.id,
            user_id: issue.user_id,
            authority_id: issue.authority_id,
            title: issue.title,
            description: issue.description,
            category: issue.category,
            priority: issue.priority,
            status: issue.status,
            location: issue.location,
            radius: issue.radius,
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            authority,
            vote_count,
        }
    }
}

async fn issue_view(state: &AppState, issue: Issue) -> ApiResult<IssueView> {
    let authority = state.store.get_authority(issue.authority_id).await?;
    let votes = state.store.vote_count(issue.id).await?;
    Ok(IssueView::new(issue, authority, votes))
}

#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    message: String,
    issue: IssueView,
    classification: ClassificationResult,
    spam_check_degraded: bool,
}

#[derive(Debug, Serialize)]
pub struct MergedResponse {
    message: String,
    existing_issue: IssueView,
    auto_upvoted: bool,
    distance_meters: f64,
    total_votes: i64,
    classification: ClassificationResult,
    spam_check_degraded: bool,
}

#[derive(Debug, Serialize)]
pub struct HeatmapEntry {
    id: Uuid,
    title: String,
    location: String,
    priority: Priority,
    status: IssueStatus,
    category: Category,
    radius: Radius,
}

#[derive(Debug, Serialize)]
pub struct VoteView {
    id: Uuid,
    user_id: Uuid,
    issue_id: Uuid,
}

impl From<Vote> for VoteView {
    fn from(v: Vote) -> Self {
        Self {
            id: v.id,
            user_id: v.user_id,
            issue_id: v.issue_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct VoteResponse {
    message: &'static str,
    vote: Option<VoteView>,
    total_votes: i64,
    user_has_voted: bool,
}

// ── Operational ──

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot(state.boundary.breaker().snapshot()))
}

// ── Issues ──

pub async fn submit_issue(
    State(state): State<Arc<AppState>>,
    CurrentUser(reporter): CurrentUser,
    payload: Result<Json<IntakeRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = payload?;
    let outcome = state.intake.submit(reporter, request).await?;

    let response = match outcome {
        IntakeOutcome::Created {
            issue,
            authority,
            classification,
            spam_check_degraded,
        } => {
            let body = CreatedResponse {
                message: "Issue created successfully".to_string(),
                issue: IssueView::new(issue, Some(authority), 0),
                classification,
                spam_check_degraded,
            };
            (StatusCode::CREATED, Json(body)).into_response()
        }
        IntakeOutcome::Merged {
            existing_issue,
            auto_upvoted,
            distance_meters,
            total_votes,
            classification,
            spam_check_degraded,
        } => {
            let message = format!(
                "Similar issue already reported {:.0}m away within its {}m radius; {}",
                distance_meters,
                existing_issue.radius.meters().max(classification.radius.meters()),
                if auto_upvoted {
                    "your vote was added to it"
                } else {
                    "you had already voted on it"
                }
            );
            let authority = state.store.get_authority(existing_issue.authority_id).await?;
            let body = MergedResponse {
                message,
                existing_issue: IssueView::new(existing_issue, authority, total_votes),
                auto_upvoted,
                distance_meters,
                total_votes,
                classification,
                spam_check_degraded,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
    };

    Ok(response)
}

pub async fn get_issue(
    State(state): State<Arc<AppState>>,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<IssueView>> {
    let Path(id) = path?;
    let issue = state
        .store
        .get_issue(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Issue not found".to_string()))?;
    Ok(Json(issue_view(&state, issue).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: IssueStatus,
}

pub async fn update_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> ApiResult<Response> {
    let Path(id) = path?;
    let Json(update) = payload?;

    let change = lifecycle::update_status(&state.store, actor, id, update.status).await?;
    if change.changed {
        state.metrics.increment_notifications();
    }

    let message = if change.changed {
        format!("Status changed to {}", change.issue.status)
    } else {
        format!("Status is already {}", change.issue.status)
    };
    let view = issue_view(&state, change.issue).await?;

    Ok(Json(json!({ "message": message, "changed": change.changed, "issue": view })).into_response())
}

pub async fn heatmap(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<HeatmapEntry>>> {
    let entries = state
        .store
        .list_issues()
        .await?
        .into_iter()
        .map(|i| HeatmapEntry {
            id: i.id,
            title: i.title,
            location: i.location,
            priority: i.priority,
            status: i.status,
            category: i.category,
            radius: i.radius,
        })
        .collect();
    Ok(Json(entries))
}

// ── Votes ──

pub async fn vote(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Response> {
    let Path(issue_id) = path?;
    let outcome = state.votes.vote(issue_id, user).await?;

    let (status, message) = if outcome.added {
        (StatusCode::CREATED, "Vote added successfully")
    } else {
        (StatusCode::OK, "You have already voted on this issue")
    };
    let body = VoteResponse {
        message,
        vote: Some(outcome.vote.into()),
        total_votes: outcome.total_votes,
        user_has_voted: true,
    };
    Ok((status, Json(body)).into_response())
}

pub async fn unvote(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<VoteResponse>> {
    let Path(issue_id) = path?;
    let outcome = state.votes.unvote(issue_id, user).await?;

    Ok(Json(VoteResponse {
        message: if outcome.removed {
            "Vote removed successfully"
        } else {
            "You haven't voted on this issue"
        },
        vote: None,
        total_votes: outcome.total_votes,
        user_has_voted: false,
    }))
}

pub async fn vote_count(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(issue_id) = path?;
    Ok(Json(state.votes.tally(issue_id, user).await?))
}

// ── Notifications ──

#[derive(Debug, Deserialize)]
pub struct NotificationParams {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub unread_only: Option<bool>,
}

impl NotificationParams {
    fn into_query(self) -> ApiResult<NotificationQuery> {
        let defaults = NotificationQuery::default();
        let skip = self.skip.unwrap_or(defaults.skip);
        let limit = self.limit.unwrap_or(defaults.limit);

        if skip < 0 {
            return Err(ApiError::Validation("skip must be at least 0".to_string()));
        }
        if !(1..=100).contains(&limit) {
            return Err(ApiError::Validation("limit must be between 1 and 100".to_string()));
        }

        Ok(NotificationQuery {
            skip,
            limit,
            unread_only: self.unread_only.unwrap_or(defaults.unread_only),
        })
    }
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    params: Result<Query<NotificationParams>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(params) = params?;
    let page = state.store.list_notifications(user, params.into_query()?).await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct MarkRead {
    pub notification_ids: Vec<Uuid>,
}

pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    payload: Result<Json<MarkRead>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = payload?;
    let updated = state
        .store
        .mark_read(user, &body.notification_ids)
        .await?
        .ok_or(NotificationError::NotFound)?;
    Ok(Json(json!({ "message": format!("Marked {updated} notifications as read") })))
}

pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<impl IntoResponse> {
    let updated = state.store.mark_all_read(user).await?;
    Ok(Json(json!({ "message": format!("Marked {updated} notifications as read") })))
}

pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    path: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<impl IntoResponse> {
    let Path(id) = path?;
    if !state.store.delete_notification(user, id).await? {
        return Err(ApiError::NotFound("Notification not found".to_string()));
    }
    Ok(Json(json!({ "message": "Notification deleted successfully" })))
}
