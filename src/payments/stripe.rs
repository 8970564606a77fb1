use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;

use super::{CreateRefund, PaymentProcessor, ProcessorError};

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

impl StripeClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(secret_key: &str, api_base: &str, timeout: Duration) -> Result<Self, ProcessorError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            secret_key: secret_key.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProcessorError> {
        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{}", self.api_base, id))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(transport_error)?;

        decode(response).await
    }

    async fn post_refund(&self, req: CreateRefund) -> Result<Refund, ProcessorError> {
        let amount = req.amount_cents.to_string();
        let mut form = vec![
            ("payment_intent", req.payment_intent_id.as_str()),
            ("amount", amount.as_str()),
            ("metadata[order_id]", req.order_id.as_str()),
        ];
        if let Some(reason) = req.reason.as_deref() {
            form.push(("metadata[reason]", reason));
        }

        let response = self
            .client
            .post(format!("{}/v1/refunds", self.api_base))
            .basic_auth(&self.secret_key, None::<&str>)
            .header("Idempotency-Key", &req.idempotency_key)
            .form(&form)
            .send()
            .await
            .map_err(transport_error)?;

        decode(response).await
    }
}

impl PaymentProcessor for StripeClient {
    fn retrieve_payment_intent<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<PaymentIntent, ProcessorError>> {
        Box::pin(self.fetch_payment_intent(id))
    }

    fn create_refund(&self, req: CreateRefund) -> BoxFuture<'_, Result<Refund, ProcessorError>> {
        Box::pin(self.post_refund(req))
    }
}

fn transport_error(e: reqwest::Error) -> ProcessorError {
    if e.is_timeout() {
        ProcessorError::Timeout
    } else {
        ProcessorError::Transport(e.to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProcessorError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .json::<StripeErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or_else(|| "no error message".to_string());
        return Err(ProcessorError::Rejected {
            status: status.as_u16(),
            message,
        });
    }

    response.json().await.map_err(|e| {
        if e.is_timeout() {
            ProcessorError::Timeout
        } else {
            ProcessorError::Decode(e.to_string())
        }
    })
}

// ============ Webhook envelope ============

/// Generic Stripe webhook event - object is parsed based on event_type
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

// ============ Objects ============

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub amount_received: Option<i64>,
    pub currency: String,
    pub status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub receipt_email: Option<String>,
}

impl PaymentIntent {
    /// Amount actually captured, falling back to the requested amount.
    pub fn paid_amount(&self) -> i64 {
        self.amount_received
            .filter(|received| *received > 0)
            .unwrap_or(self.amount)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount: i64,
    /// Cumulative amount refunded on this charge, across all refunds
    #[serde(default)]
    pub amount_refunded: i64,
    #[serde(default)]
    pub refunded: bool,
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    pub amount: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub charge: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_intent_paid_amount_prefers_received() {
        let pi: PaymentIntent = serde_json::from_value(serde_json::json!({
            "id": "pi_1", "amount": 5000, "amount_received": 4500,
            "currency": "usd", "status": "succeeded"
        }))
        .unwrap();
        assert_eq!(pi.paid_amount(), 4500);
        assert!(pi.metadata.is_empty());
    }

    #[test]
    fn test_charge_defaults() {
        let charge: Charge = serde_json::from_value(serde_json::json!({
            "id": "ch_1", "amount": 5000, "payment_intent": "pi_1"
        }))
        .unwrap();
        assert_eq!(charge.amount_refunded, 0);
        assert!(!charge.refunded);
    }
}
