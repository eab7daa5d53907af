mod stripe;

pub use stripe::*;

use async_trait::async_trait;

use crate::error::Result;

/// Request to open a provider-hosted checkout session.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    /// Local payment intent id; carried in session metadata so charge-level
    /// events can be correlated back without the session event.
    pub payment_id: String,
    pub user_id: String,
    pub course_id: String,
    pub course_title: String,
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A created provider checkout session.
#[derive(Debug, Clone)]
pub struct ProviderSession {
    pub id: String,
    pub url: String,
}

/// Live state of a provider session, as read back during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Complete,
    Expired,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Charge reference, present once the session completed.
    pub charge_id: Option<String>,
    /// Total refunded against the session's charge, when the provider
    /// reports it. Used to heal a crash between provider refund and local
    /// accounting.
    pub amount_refunded: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RefundReceipt {
    pub id: String,
}

/// Payment provider capability consumed by the orchestrator, the webhook
/// processor, the refund manager, and the reconciler.
///
/// Injected through `AppState` rather than reached as a global so tests can
/// substitute a deterministic double.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Provider name for logging and dedup storage (e.g. "stripe").
    fn name(&self) -> &'static str;

    async fn create_checkout_session(&self, req: &CreateSessionRequest)
        -> Result<ProviderSession>;

    /// Read back the live state of a session.
    async fn fetch_session(&self, provider_session_id: &str) -> Result<SessionSnapshot>;

    /// Execute a (partial) refund against a charge. The provider is the
    /// source of truth for money movement; local state is a cache of it.
    async fn create_refund(
        &self,
        charge_id: &str,
        amount_cents: i64,
        reason: Option<&str>,
    ) -> Result<RefundReceipt>;

    /// Verify a webhook signature header against the raw payload.
    /// Local computation, no I/O.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool>;
}
