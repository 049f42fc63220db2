use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use leadpilot_store::Store;

use crate::error::{ApiError, ApiResult};
use crate::stripe::{billing_action, verify_signature, BillingAction, StripeEvent};
use crate::AppState;

pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing Stripe-Signature header".to_string()))?;

    verify_signature(
        signature,
        &body,
        &state.config.stripe_webhook_secret,
        Utc::now().timestamp(),
    )
    .map_err(|e| {
        warn!(error = %e, "Rejected Stripe webhook");
        ApiError::BadRequest(e.to_string())
    })?;

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid event payload: {e}")))?;

    if !state.store.record_stripe_event(&event.id, &event.event_type).await? {
        info!(event_id = %event.id, "Stripe event already processed");
        return Ok(Json(json!({ "received": true, "duplicate": true })));
    }

    let action = billing_action(&event, &state.prices());
    if let Err(e) = apply(&state.store, &action).await {
        if let Err(forget) = state.store.forget_stripe_event(&event.id).await {
            warn!(event_id = %event.id, error = %forget, "Could not release failed Stripe event");
        }
        return Err(e);
    }

    info!(event_id = %event.id, event_type = %event.event_type, "Stripe event processed");
    Ok(Json(json!({ "received": true })))
}

async fn apply(store: &Store, action: &BillingAction) -> ApiResult<()> {
    match action {
        BillingAction::LinkCustomer { user_id, customer_id } => {
            if !store.link_stripe_customer(*user_id, customer_id).await? {
                warn!(%user_id, "Checkout completed for unknown user");
            }
        }
        BillingAction::UpdateSubscription {
            customer_id,
            plan,
            status,
            subscription_id,
        } => {
            store
                .update_subscription(customer_id, *plan, *status, subscription_id.as_deref())
                .await?;
        }
        BillingAction::Ignore => {}
    }
    Ok(())
}
