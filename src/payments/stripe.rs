use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::StripeConfig;
use crate::error::{AppError, Result};

use super::{
    CreateSessionRequest, PaymentProvider, ProviderSession, RefundReceipt, SessionSnapshot,
    SessionState,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a webhook timestamp before it's rejected (in seconds).
/// Stripe recommends 300 seconds (5 minutes).
const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Bounded timeout for all provider API calls; no automatic retry here -
/// user-facing callers surface the failure, webhook callers lean on
/// provider-side redelivery.
const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Verify a Stripe-style `t=timestamp,v1=hex` signature header.
///
/// Shared as a free function so test doubles verify exactly what the real
/// client verifies.
pub fn verify_stripe_signature(secret: &str, payload: &[u8], signature: &str) -> Result<bool> {
    let mut timestamp = None;
    let mut sig_v1 = None;

    for part in signature.split(',') {
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(s) = part.strip_prefix("v1=") {
            sig_v1 = Some(s);
        }
    }

    let timestamp_str =
        timestamp.ok_or_else(|| AppError::BadRequest("Invalid signature format".into()))?;
    let sig_v1 = sig_v1.ok_or_else(|| AppError::BadRequest("Invalid signature format".into()))?;

    // Reject stale timestamps to prevent replay of captured deliveries.
    let timestamp: i64 = timestamp_str
        .parse()
        .map_err(|_| AppError::BadRequest("Invalid timestamp in signature".into()))?;

    let age = chrono::Utc::now().timestamp() - timestamp;

    if age > WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            "Webhook rejected: timestamp too old (age={}s, max={}s)",
            age,
            WEBHOOK_TIMESTAMP_TOLERANCE_SECS
        );
        return Ok(false);
    }

    // Also reject timestamps from the future (clock skew tolerance: 60 seconds)
    if age < -60 {
        tracing::warn!("Webhook rejected: timestamp in the future (age={}s)", age);
        return Ok(false);
    }

    let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("Invalid webhook secret".into()))?;
    mac.update(signed_payload.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison; signature length is not secret (always 64
    // hex chars for SHA-256), so the length check may short-circuit.
    let expected_bytes = expected.as_bytes();
    let provided_bytes = sig_v1.as_bytes();
    if expected_bytes.len() != provided_bytes.len() {
        return Ok(false);
    }

    Ok(expected_bytes.ct_eq(provided_bytes).into())
}

#[derive(Debug, Deserialize)]
struct CreateCheckoutSessionResponse {
    id: String,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RetrieveSessionResponse {
    status: String,
    payment_intent: Option<String>,
    #[serde(default)]
    amount_refunded: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreateRefundResponse {
    id: String,
}

/// Thin Stripe API client over reqwest.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

impl StripeClient {
    pub fn new(config: &StripeConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                return Err(AppError::NotFound(format!("Stripe {}", what)));
            }
            return Err(AppError::ProviderUnavailable(format!(
                "Stripe {} error: {} {}",
                what, status, error_text
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("Stripe {} parse error: {}", what, e)))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    fn name(&self) -> &'static str {
        "stripe"
    }

    async fn create_checkout_session(
        &self,
        req: &CreateSessionRequest,
    ) -> Result<ProviderSession> {
        let amount = req.amount_cents.to_string();
        let response = self
            .client
            .post("https://api.stripe.com/v1/checkout/sessions")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&[
                ("mode", "payment"),
                ("success_url", &req.success_url),
                ("cancel_url", &req.cancel_url),
                ("line_items[0][price_data][currency]", &req.currency),
                ("line_items[0][price_data][unit_amount]", &amount),
                (
                    "line_items[0][price_data][product_data][name]",
                    &req.course_title,
                ),
                ("line_items[0][quantity]", "1"),
                ("metadata[payment_id]", &req.payment_id),
                ("metadata[user_id]", &req.user_id),
                ("metadata[course_id]", &req.course_id),
                ("payment_intent_data[metadata][payment_id]", &req.payment_id),
            ])
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("Stripe API error: {}", e)))?;

        let session: CreateCheckoutSessionResponse =
            Self::parse_response(response, "checkout session").await?;

        Ok(ProviderSession {
            id: session.id,
            url: session.url,
        })
    }

    async fn fetch_session(&self, provider_session_id: &str) -> Result<SessionSnapshot> {
        let response = self
            .client
            .get(format!(
                "https://api.stripe.com/v1/checkout/sessions/{}",
                provider_session_id
            ))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("Stripe API error: {}", e)))?;

        let session: RetrieveSessionResponse =
            Self::parse_response(response, "session lookup").await?;

        let state = match session.status.as_str() {
            "open" => SessionState::Open,
            "complete" => SessionState::Complete,
            _ => SessionState::Expired,
        };

        Ok(SessionSnapshot {
            state,
            charge_id: session.payment_intent,
            amount_refunded: session.amount_refunded,
        })
    }

    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        reason: Option<&str>,
    ) -> Result<RefundReceipt> {
        let amount = amount_cents.to_string();
        let mut form: Vec<(&str, &str)> = vec![("payment_intent", charge_id), ("amount", &amount)];
        if let Some(reason) = reason {
            form.push(("metadata[reason]", reason));
        }

        let response = self
            .client
            .post("https://api.stripe.com/v1/refunds")
            .basic_auth(&self.secret_key, None::<&str>)
            .form(&form)
            .send()
            .await
            .map_err(|e| AppError::ProviderUnavailable(format!("Stripe API error: {}", e)))?;

        let refund: CreateRefundResponse = Self::parse_response(response, "refund").await?;

        Ok(RefundReceipt { id: refund.id })
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        verify_stripe_signature(&self.webhook_secret, payload, signature)
    }
}

// ============ Webhook payloads ============

/// Generic webhook event envelope - object is parsed based on event_type.
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

/// Correlation tags we attach at session creation and Stripe echoes back.
#[derive(Debug, Default, Deserialize)]
pub struct StripeMetadata {
    pub payment_id: Option<String>,
    pub user_id: Option<String>,
    pub course_id: Option<String>,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub payment_status: Option<String>,
    /// Charge reference used for refund/dispute linkage.
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: Option<StripeMetadata>,
}

// ============ charge.succeeded / charge.failed / payment_intent.payment_failed ============

#[derive(Debug, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    pub payment_intent: Option<String>,
    pub failure_message: Option<String>,
    #[serde(default)]
    pub metadata: Option<StripeMetadata>,
}

impl StripeCharge {
    /// The identifier stored as the local charge reference. Prefer the
    /// payment intent id so session-completed and charge events agree.
    pub fn charge_ref(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeLastPaymentError {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntentObject {
    pub id: String,
    pub last_payment_error: Option<StripeLastPaymentError>,
    #[serde(default)]
    pub metadata: Option<StripeMetadata>,
}

// ============ charge.dispute.created ============

#[derive(Debug, Deserialize)]
pub struct StripeDispute {
    pub id: String,
    pub charge: Option<String>,
    pub payment_intent: Option<String>,
    pub reason: Option<String>,
}

impl StripeDispute {
    pub fn charge_ref(&self) -> Option<&str> {
        self.payment_intent.as_deref().or(self.charge.as_deref())
    }
}
