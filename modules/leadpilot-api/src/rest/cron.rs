// Scheduler entry points. Both run synchronously and return the aggregate.

use std::sync::Arc;

use axum::{extract::State, response::Json};

use leadpilot_common::{RunStats, RunTrigger};

use crate::auth::CronAuth;
use crate::error::ApiResult;
use crate::AppState;

pub async fn discover(State(state): State<Arc<AppState>>, _auth: CronAuth) -> ApiResult<Json<RunStats>> {
    Ok(Json(state.scout.discover_all(RunTrigger::Cron).await?))
}

pub async fn autopilot(State(state): State<Arc<AppState>>, _auth: CronAuth) -> ApiResult<Json<RunStats>> {
    Ok(Json(state.scout.run_autopilot().await?))
}
