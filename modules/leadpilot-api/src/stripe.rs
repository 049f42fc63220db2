// Stripe webhook verification and event interpretation. No I/O here; the
// billing route applies the resulting action to the store.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use leadpilot_common::{Plan, SubscriptionStatus};

use crate::auth::constant_time_eq;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook timestamp.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("malformed Stripe-Signature header")]
    Malformed,

    #[error("webhook timestamp outside tolerance")]
    Expired,

    #[error("no matching signature")]
    Mismatch,
}

/// Check a `Stripe-Signature` header (`t=<ts>,v1=<hex>[,v1=<hex>...]`)
/// against the raw request body. Any matching `v1` is accepted.
pub fn verify_signature(header: &str, body: &[u8], secret: &str, now: i64) -> Result<(), SignatureError> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for item in header.split(',') {
        match item.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    let expected = compute_signature(timestamp, body, secret);
    if signatures
        .iter()
        .any(|sig| constant_time_eq(sig.as_bytes(), expected.as_bytes()))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`.
pub fn compute_signature(timestamp: &str, body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

// --- Events ---

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Price ids configured for each paid plan.
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub starter: String,
    pub pro: String,
}

impl PriceIds {
    pub fn plan_for(&self, price_id: &str) -> Option<Plan> {
        if price_id.is_empty() {
            return None;
        }
        if price_id == self.starter {
            Some(Plan::Starter)
        } else if price_id == self.pro {
            Some(Plan::Pro)
        } else {
            None
        }
    }
}

/// What an event means for our users table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingAction {
    LinkCustomer {
        user_id: Uuid,
        customer_id: String,
    },
    UpdateSubscription {
        customer_id: String,
        plan: Option<Plan>,
        status: SubscriptionStatus,
        subscription_id: Option<String>,
    },
    Ignore,
}

pub fn billing_action(event: &StripeEvent, prices: &PriceIds) -> BillingAction {
    let object = &event.data.object;
    let customer = object["customer"].as_str().map(str::to_string);

    match event.event_type.as_str() {
        "checkout.session.completed" => {
            let user_id = object["client_reference_id"]
                .as_str()
                .and_then(|s| s.parse::<Uuid>().ok());
            match (user_id, customer) {
                (Some(user_id), Some(customer_id)) => BillingAction::LinkCustomer { user_id, customer_id },
                _ => BillingAction::Ignore,
            }
        }
        "customer.subscription.created" | "customer.subscription.updated" => {
            let Some(customer_id) = customer else {
                return BillingAction::Ignore;
            };
            let price_id = object["items"]["data"][0]["price"]["id"].as_str().unwrap_or("");
            BillingAction::UpdateSubscription {
                customer_id,
                plan: prices.plan_for(price_id),
                status: SubscriptionStatus::from_stripe(object["status"].as_str().unwrap_or("")),
                subscription_id: object["id"].as_str().map(str::to_string),
            }
        }
        "customer.subscription.deleted" => match customer {
            Some(customer_id) => BillingAction::UpdateSubscription {
                customer_id,
                plan: Some(Plan::Free),
                status: SubscriptionStatus::Canceled,
                subscription_id: None,
            },
            None => BillingAction::Ignore,
        },
        "invoice.payment_failed" => match customer {
            Some(customer_id) => BillingAction::UpdateSubscription {
                customer_id,
                plan: None,
                status: SubscriptionStatus::PastDue,
                subscription_id: None,
            },
            None => BillingAction::Ignore,
        },
        _ => BillingAction::Ignore,
    }
}
