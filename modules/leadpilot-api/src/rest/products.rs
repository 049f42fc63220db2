use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{Duration, Utc};
use tracing::info;
use uuid::Uuid;

use leadpilot_common::{NewProduct, Product, RunStats, RunTrigger, User};

use crate::auth::CurrentUser;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub async fn list_products(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<Product>>> {
    Ok(Json(state.store.products_for_user(user.id).await?))
}

pub async fn create_product(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(input): Json<NewProduct>,
) -> ApiResult<(StatusCode, Json<Product>)> {
    let input = input.validated()?;
    check_autopilot(&user, &input)?;

    let limits = user.limits();
    let existing = state.store.count_products(user.id).await?;
    if existing >= limits.max_products as i64 {
        return Err(ApiError::PaymentRequired(format!(
            "the {} plan allows {} product(s), upgrade to add more",
            user.effective_plan(),
            limits.max_products
        )));
    }

    let product = state.store.create_product(user.id, &input).await?;
    info!(user_id = %user.id, product_id = %product.id, "Product created");
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn get_product(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Product>> {
    owned_product(&state, &user, id).await.map(Json)
}

pub async fn update_product(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(input): Json<NewProduct>,
) -> ApiResult<Json<Product>> {
    let input = input.validated()?;
    check_autopilot(&user, &input)?;

    let product = state
        .store
        .update_product(user.id, id, &input)
        .await?
        .ok_or(ApiError::NotFound("product"))?;
    Ok(Json(product))
}

pub async fn delete_product(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.store.delete_product(user.id, id).await? {
        info!(user_id = %user.id, product_id = %id, "Product deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound("product"))
    }
}

/// Manual discovery run, bounded per user per day by plan.
pub async fn discover(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunStats>> {
    let product = owned_product(&state, &user, id).await?;

    let allowed = user.limits().manual_runs_per_day;
    let since = Utc::now() - Duration::hours(24);
    let used = state.store.runs_since(user.id, RunTrigger::Manual, since).await?;
    if used >= allowed as i64 {
        return Err(ApiError::TooManyRequests(format!(
            "daily limit of {allowed} manual runs reached"
        )));
    }

    let stats = state.scout.discover(&product, RunTrigger::Manual).await?;
    Ok(Json(stats))
}

pub(crate) async fn owned_product(state: &AppState, user: &User, id: Uuid) -> ApiResult<Product> {
    state
        .store
        .product_for_user(user.id, id)
        .await?
        .ok_or(ApiError::NotFound("product"))
}

fn check_autopilot(user: &User, input: &NewProduct) -> ApiResult<()> {
    if input.autopilot && !user.limits().autopilot {
        return Err(ApiError::PaymentRequired(
            "auto-pilot requires a paid plan".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadpilot_common::{Plan, SubscriptionStatus};

    fn user(plan: Plan, status: SubscriptionStatus) -> User {
        User {
            id: Uuid::new_v4(),
            reddit_username: "founder".into(),
            email: None,
            reddit_refresh_token: None,
            plan,
            subscription_status: status,
            stripe_customer_id: None,
            created_at: Utc::now(),
        }
    }

    fn input(autopilot: bool) -> NewProduct {
        NewProduct {
            name: "Invoicer".into(),
            description: String::new(),
            url: None,
            keywords: vec!["invoice".into()],
            subreddits: vec![],
            autopilot,
        }
    }

    #[test]
    fn autopilot_needs_paid_plan() {
        let free = user(Plan::Free, SubscriptionStatus::None);
        assert!(matches!(
            check_autopilot(&free, &input(true)),
            Err(ApiError::PaymentRequired(_))
        ));
        assert!(check_autopilot(&free, &input(false)).is_ok());

        let lapsed = user(Plan::Starter, SubscriptionStatus::Canceled);
        assert!(check_autopilot(&lapsed, &input(true)).is_err());

        let paying = user(Plan::Starter, SubscriptionStatus::Active);
        assert!(check_autopilot(&paying, &input(true)).is_ok());
    }
}
