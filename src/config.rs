use std::env;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    pub stripe: StripeConfig,
    pub admin_api_key: String,
    /// How long a pending checkout may sit before it is considered stale
    /// and eligible for self-healing cancellation.
    pub checkout_ttl_secs: i64,
    /// Refunds are only accepted within this many days of payment.
    pub refund_window_days: i64,
    /// Webhook dedup records older than this are purged.
    pub webhook_retention_days: i64,
    /// Whether a created dispute suspends enrollment access immediately.
    pub suspend_on_dispute: bool,
    pub success_url: String,
    pub cancel_url: String,
    pub dev_mode: bool,
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("COURSEPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let checkout_ttl_minutes = env_i64("CHECKOUT_TTL_MINUTES", 30);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "coursepay.db".to_string()),
            stripe: StripeConfig {
                secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
                webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            },
            admin_api_key: env::var("ADMIN_API_KEY").unwrap_or_default(),
            checkout_ttl_secs: checkout_ttl_minutes * 60,
            refund_window_days: env_i64("REFUND_WINDOW_DAYS", 90),
            webhook_retention_days: env_i64("WEBHOOK_RETENTION_DAYS", 30),
            suspend_on_dispute: env::var("SUSPEND_ON_DISPUTE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
            success_url: env::var("SUCCESS_URL")
                .unwrap_or_else(|_| format!("{}/success", base_url)),
            cancel_url: env::var("CANCEL_URL").unwrap_or_else(|_| format!("{}/cancel", base_url)),
            base_url,
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
