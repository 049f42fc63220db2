use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse, Json, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use leadpilot_common::{Plan, PlanLimits, User};
use reddit_client::RedditError;

use crate::auth::{
    clear_oauth_cookie, clear_session_cookie, constant_time_eq, create_oauth_state, oauth_cookie,
    parse_cookie, session_cookie, verify_oauth_state, CurrentUser, OAUTH_COOKIE_NAME,
};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Identity to read the username, submit to post comments, read for search.
const SCOPES: &[&str] = &["identity", "submit", "read"];

pub async fn login(State(state): State<Arc<AppState>>) -> Response {
    let oauth_state = create_oauth_state(&state.config.session_secret);
    let url = state.reddit.authorize_url(&oauth_state, SCOPES);
    (
        AppendHeaders([(header::SET_COOKIE, oauth_cookie(&oauth_state))]),
        Redirect::to(&url),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

pub async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> ApiResult<Response> {
    if let Some(err) = params.error {
        return Err(ApiError::BadRequest(format!("Reddit authorization failed: {err}")));
    }
    let (Some(code), Some(returned_state)) = (params.code.as_deref(), params.state.as_deref()) else {
        return Err(ApiError::BadRequest("missing code or state".to_string()));
    };

    let cookie_header = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let same_browser = parse_cookie(cookie_header, OAUTH_COOKIE_NAME)
        .is_some_and(|c| constant_time_eq(c.as_bytes(), returned_state.as_bytes()));
    if !same_browser || !verify_oauth_state(returned_state, &state.config.session_secret) {
        warn!("Rejected OAuth callback with invalid state");
        return Err(ApiError::BadRequest("invalid OAuth state".to_string()));
    }

    let grant = state.reddit.exchange_code(code).await.map_err(sign_in_error)?;
    let identity = state.reddit.me(&grant.access_token).await.map_err(sign_in_error)?;
    if grant.refresh_token.is_none() {
        warn!(username = %identity.name, "Reddit granted no refresh token");
    }

    let user = state
        .store
        .upsert_user(&identity.name, grant.refresh_token.as_deref())
        .await?;
    info!(user_id = %user.id, "User signed in");

    let dashboard = format!("{}/dashboard", state.config.app_url.trim_end_matches('/'));
    Ok((
        AppendHeaders([
            (header::SET_COOKIE, session_cookie(user.id, &state.config.session_secret)),
            (header::SET_COOKIE, clear_oauth_cookie()),
        ]),
        Redirect::to(&dashboard),
    )
        .into_response())
}

fn sign_in_error(err: RedditError) -> ApiError {
    match err {
        RedditError::Auth(msg) => ApiError::BadRequest(format!("Reddit sign-in failed: {msg}")),
        other => ApiError::Internal(other.into()),
    }
}

pub async fn logout() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        AppendHeaders([(header::SET_COOKIE, clear_session_cookie())]),
    )
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    /// The plan whose limits apply right now.
    pub plan: Plan,
    pub limits: PlanLimits,
    pub reddit_linked: bool,
}

pub async fn me(CurrentUser(user): CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        plan: user.effective_plan(),
        limits: user.limits(),
        reddit_linked: user.reddit_refresh_token.is_some(),
        user,
    })
}
