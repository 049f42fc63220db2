use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use leadpilot_common::{Lead, LeadStatus, PostedComment};

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::rest::products::owned_product;
use crate::AppState;

pub const DEFAULT_LEADS_LIMIT: i64 = 50;
pub const MAX_LEADS_LIMIT: i64 = 200;

/// Reddit's own cap on comment length.
const MAX_COMMENT_CHARS: usize = 10_000;

#[derive(Debug, Deserialize)]
pub struct LeadsQuery {
    status: Option<String>,
    limit: Option<i64>,
}

pub fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LEADS_LIMIT).clamp(1, MAX_LEADS_LIMIT)
}

pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(product_id): Path<Uuid>,
    Query(query): Query<LeadsQuery>,
) -> ApiResult<Json<Vec<Lead>>> {
    let product = owned_product(&state, &user, product_id).await?;

    let status = match query.status.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(s) => Some(s.parse::<LeadStatus>()?),
    };
    let leads = state
        .store
        .leads_for_product(product.id, status, clamp_limit(query.limit))
        .await?;
    Ok(Json(leads))
}

async fn owned_lead(state: &AppState, user_id: Uuid, lead_id: Uuid) -> ApiResult<Lead> {
    state
        .store
        .lead_for_user(user_id, lead_id)
        .await?
        .ok_or(ApiError::NotFound("lead"))
}

pub async fn dismiss(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<Lead>> {
    let mut lead = owned_lead(&state, user.id, lead_id).await?;
    state.store.set_lead_status(lead.id, LeadStatus::Dismissed).await?;
    lead.status = LeadStatus::Dismissed;
    Ok(Json(lead))
}

#[derive(Debug, Serialize)]
pub struct DraftResponse {
    pub draft: String,
}

pub async fn draft(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<DraftResponse>> {
    if !state.draft_limiter.allow(user.id).await {
        return Err(ApiError::TooManyRequests(format!(
            "draft limit reached, max {} per hour",
            state.draft_limiter.max_per_hour()
        )));
    }

    let lead = owned_lead(&state, user.id, lead_id).await?;
    let product = owned_product(&state, &user, lead.product_id).await?;
    let draft = state.scout.draft_comment(&product, &lead).await?;
    Ok(Json(DraftResponse { draft }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentRequest {
    #[serde(default)]
    text: Option<String>,
}

/// Post the given text, or the lead's stored draft, as a reply.
pub async fn comment(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(lead_id): Path<Uuid>,
    Json(body): Json<CommentRequest>,
) -> ApiResult<(StatusCode, Json<PostedComment>)> {
    let lead = owned_lead(&state, user.id, lead_id).await?;
    if lead.status == LeadStatus::Replied {
        return Err(ApiError::BadRequest("lead already has a reply".to_string()));
    }

    let text = comment_text(body.text.as_deref(), lead.draft.as_deref())?;
    let posted = state.scout.reply(&user, &lead, &text).await?;
    info!(user_id = %user.id, lead_id = %lead.id, "Manual comment posted");
    Ok((StatusCode::CREATED, Json(posted)))
}

fn comment_text(given: Option<&str>, draft: Option<&str>) -> ApiResult<String> {
    let text = given
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or_else(|| draft.map(str::trim).filter(|t| !t.is_empty()))
        .ok_or_else(|| ApiError::BadRequest("no comment text and no stored draft".to_string()))?;
    if text.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApiError::BadRequest(format!(
            "comment is too long (max {MAX_COMMENT_CHARS} characters)"
        )));
    }
    Ok(text.to_string())
}
