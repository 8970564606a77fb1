use std::env;
use std::time::Duration;

use crate::refunds::RefundPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,
    /// Stripe secret API key (sk_...) used for refunds and intent lookups
    pub stripe_secret_key: String,
    /// Shared secret for `Stripe-Signature` verification (whsec_...)
    pub stripe_webhook_secret: String,
    pub stripe_api_base: String,
    /// Upper bound on any single processor API call
    pub processor_timeout: Duration,
    pub db_busy_timeout: Duration,
    pub refund_policy: RefundPolicy,
    pub catalog_cache_ttl: Duration,
    pub catalog_cache_capacity: usize,
    /// Where confirmation/refund messages are POSTed. None = log only.
    pub notify_webhook_url: Option<String>,
    pub notify_queue_capacity: usize,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("BOXOFFICE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();
        if stripe_webhook_secret.is_empty() {
            tracing::warn!("STRIPE_WEBHOOK_SECRET is not set; every webhook will be rejected");
        }

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("PORT", 3000),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "boxoffice.db".to_string()),
            dev_mode,
            stripe_secret_key,
            stripe_webhook_secret,
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            processor_timeout: Duration::from_secs(env_parse("PROCESSOR_TIMEOUT_SECS", 10)),
            db_busy_timeout: Duration::from_millis(env_parse("DB_BUSY_TIMEOUT_MS", 5000)),
            refund_policy: RefundPolicy {
                processing_fee_cents: env_parse("REFUND_FEE_CENTS", 30),
                cutoff_hours: env_parse("REFUND_CUTOFF_HOURS", 24),
            },
            catalog_cache_ttl: Duration::from_secs(env_parse("CATALOG_CACHE_TTL_SECS", 300)),
            catalog_cache_capacity: env_parse("CATALOG_CACHE_CAPACITY", 1024),
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL").ok().filter(|s| !s.is_empty()),
            notify_queue_capacity: env_parse("NOTIFY_QUEUE_CAPACITY", 256),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
