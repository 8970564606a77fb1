//! Test utilities and fixtures for boxoffice integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::future::BoxFuture;
use rusqlite::Connection;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;

pub use boxoffice::catalog::EventCatalog;
pub use boxoffice::db::{AppState, DbPool, create_pool, init_db, queries};
pub use boxoffice::identity::{Caller, SessionIdentityProvider, generate_session_token, hash_token};
pub use boxoffice::models::*;
pub use boxoffice::notify::{Notification, Notifier};
pub use boxoffice::payments::{
    CreateRefund, PaymentIntent, PaymentProcessor, ProcessorError, Refund, WebhookVerifier,
};
pub use boxoffice::refunds::{RefundError, RefundPolicy, RefundReconciler};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn hours_from_now(hours: i64) -> i64 {
    now() + hours * 3600
}

// ============ Database ============

/// A file-backed database in its own temp directory, removed on drop along
/// with its WAL files. File-backed so every pooled connection sees the same
/// data and concurrent writers really contend.
pub struct TempDb {
    _dir: TempDir,
    path: PathBuf,
}

impl TempDb {
    pub fn new() -> Self {
        let dir = tempfile::Builder::new()
            .prefix("boxoffice-test-")
            .tempdir()
            .expect("Failed to create temp dir");
        let path = dir.path().join("boxoffice.db");
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &str {
        self.path.to_str().expect("temp path is utf-8")
    }
}

// ============ Mock processor ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundBehavior {
    Succeed,
    Timeout,
    Reject,
}

type RefundHook = Box<dyn Fn(&CreateRefund) + Send + Sync>;

/// In-process stand-in for the payment processor.
pub struct MockProcessor {
    intents: Mutex<HashMap<String, PaymentIntent>>,
    behavior: Mutex<RefundBehavior>,
    /// Runs after the refund "happens" at the processor, before the response returns
    on_refund: Mutex<Option<RefundHook>>,
    pub refund_calls: Mutex<Vec<CreateRefund>>,
}

impl Default for MockProcessor {
    fn default() -> Self {
        Self {
            intents: Mutex::new(HashMap::new()),
            behavior: Mutex::new(RefundBehavior::Succeed),
            on_refund: Mutex::new(None),
            refund_calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockProcessor {
    pub fn add_intent(&self, intent: PaymentIntent) {
        self.intents.lock().unwrap().insert(intent.id.clone(), intent);
    }

    pub fn set_behavior(&self, behavior: RefundBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn on_refund(&self, hook: impl Fn(&CreateRefund) + Send + Sync + 'static) {
        *self.on_refund.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn refund_call_count(&self) -> usize {
        self.refund_calls.lock().unwrap().len()
    }
}

impl PaymentProcessor for MockProcessor {
    fn retrieve_payment_intent<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, Result<PaymentIntent, ProcessorError>> {
        Box::pin(async move {
            self.intents
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| ProcessorError::Rejected {
                    status: 404,
                    message: format!("No such payment_intent: '{}'", id),
                })
        })
    }

    fn create_refund(&self, req: CreateRefund) -> BoxFuture<'_, Result<Refund, ProcessorError>> {
        Box::pin(async move {
            let n = {
                let mut calls = self.refund_calls.lock().unwrap();
                calls.push(req.clone());
                calls.len()
            };

            match *self.behavior.lock().unwrap() {
                RefundBehavior::Timeout => return Err(ProcessorError::Timeout),
                RefundBehavior::Reject => {
                    return Err(ProcessorError::Rejected {
                        status: 400,
                        message: "Charge has already been refunded".into(),
                    });
                }
                RefundBehavior::Succeed => {}
            }

            if let Some(hook) = self.on_refund.lock().unwrap().as_ref() {
                hook(&req);
            }

            Ok(Refund {
                id: format!("re_test_{}", n),
                amount: req.amount_cents,
                status: Some("succeeded".into()),
                payment_intent: Some(req.payment_intent_id.clone()),
                charge: None,
                failure_reason: None,
            })
        })
    }
}

// ============ App state ============

pub struct TestContext {
    pub state: AppState,
    pub processor: Arc<MockProcessor>,
    pub notifications: mpsc::Receiver<Notification>,
    _db: TempDb,
}

impl TestContext {
    pub fn conn(&self) -> r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager> {
        self.state.db.get().unwrap()
    }

    pub fn app(&self) -> Router {
        boxoffice::app(self.state.clone())
    }

    pub fn reconciler(&self) -> RefundReconciler {
        RefundReconciler::from_state(&self.state)
    }

    /// Everything enqueued so far.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }

    pub fn order(&self, id: &str) -> Order {
        queries::get_order_by_id(&self.conn(), id).unwrap().expect("order exists")
    }

    pub fn order_count(&self) -> i64 {
        self.conn()
            .query_row("SELECT COUNT(*) FROM orders", [], |r| r.get(0))
            .unwrap()
    }

    pub fn tickets(&self, order_id: &str) -> Vec<Ticket> {
        queries::list_tickets_for_order(&self.conn(), order_id).unwrap()
    }
}

pub fn create_test_context() -> TestContext {
    let db = TempDb::new();
    let pool = create_pool(db.path(), Duration::from_secs(5)).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    let processor = Arc::new(MockProcessor::default());
    let (notifier, notifications) = Notifier::channel(64);

    let state = AppState {
        db: pool,
        verifier: Arc::new(WebhookVerifier::new(WEBHOOK_SECRET)),
        processor: processor.clone(),
        catalog: Arc::new(EventCatalog::new(64, Duration::from_secs(60))),
        identity: Arc::new(SessionIdentityProvider),
        notifier,
        refund_policy: RefundPolicy::default(),
    };

    TestContext {
        state,
        processor,
        notifications,
        _db: db,
    }
}

// ============ Catalog fixtures ============

pub struct Showcase {
    pub event: Event,
    pub ga: TicketType,
    pub vip: TicketType,
}

pub fn create_test_event(
    conn: &Connection,
    slug: &str,
    starts_at: i64,
    capacity: Option<i64>,
) -> Event {
    queries::create_event(
        conn,
        &CreateEvent {
            legacy_id: None,
            slug: slug.to_string(),
            name: format!("Test Event {}", slug),
            starts_at,
            capacity,
        },
    )
    .expect("Failed to create test event")
}

pub fn create_test_ticket_type(
    conn: &Connection,
    event_id: &str,
    name: &str,
    price_cents: i64,
    capacity: i64,
) -> TicketType {
    queries::create_ticket_type(
        conn,
        event_id,
        &CreateTicketType {
            name: name.to_string(),
            price_cents,
            capacity,
            sale_starts_at: None,
            sale_ends_at: None,
        },
    )
    .expect("Failed to create test ticket type")
}

/// An event a week out with GA ($25 x 100) and VIP ($75 x 10).
pub fn create_showcase(conn: &Connection) -> Showcase {
    let event = create_test_event(conn, "showcase", hours_from_now(24 * 7), Some(100));
    let ga = create_test_ticket_type(conn, &event.id, "General Admission", 2500, 100);
    let vip = create_test_ticket_type(conn, &event.id, "VIP", 7500, 10);
    Showcase { event, ga, vip }
}

pub fn create_user_session(conn: &Connection, user_id: &str) -> String {
    let token = generate_session_token();
    queries::create_session(conn, &hash_token(&token), Some(user_id), None, None, hours_from_now(1))
        .expect("Failed to create user session");
    token
}

pub fn create_guest_session(conn: &Connection, email: &str) -> String {
    let token = generate_session_token();
    queries::create_session(conn, &hash_token(&token), None, Some(email), None, hours_from_now(1))
        .expect("Failed to create guest session");
    token
}

// ============ Payments ============

/// A succeeded payment intent carrying checkout metadata for `items`.
/// The amount is the items' total.
pub fn payment_intent(
    id: &str,
    event_ref: &str,
    user_id: &str,
    email: &str,
    items: &[(&TicketType, i64)],
) -> PaymentIntent {
    let ticket_items: Vec<Value> = items
        .iter()
        .map(|(tt, qty)| json!({"ticket_type_id": tt.id, "quantity": qty, "unit_price": tt.price_cents}))
        .collect();
    let amount: i64 = items.iter().map(|(tt, qty)| tt.price_cents * qty).sum();

    let mut metadata = HashMap::new();
    metadata.insert("event_id".to_string(), event_ref.to_string());
    metadata.insert("user_id".to_string(), user_id.to_string());
    metadata.insert("email".to_string(), email.to_string());
    metadata.insert("name".to_string(), "Test Purchaser".to_string());
    metadata.insert("ticket_items".to_string(), Value::Array(ticket_items).to_string());

    PaymentIntent {
        id: id.to_string(),
        amount,
        amount_received: Some(amount),
        currency: "usd".to_string(),
        status: "succeeded".to_string(),
        metadata,
        receipt_email: Some(email.to_string()),
    }
}

pub fn intent_json(intent: &PaymentIntent) -> Value {
    json!({
        "id": intent.id,
        "object": "payment_intent",
        "amount": intent.amount,
        "amount_received": intent.amount_received,
        "currency": intent.currency,
        "status": intent.status,
        "metadata": intent.metadata,
    })
}

pub fn webhook_body(event_id: &str, kind: &str, object: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "object": "event",
        "type": kind,
        "data": { "object": object }
    }))
    .unwrap()
}

pub fn charge_refunded_body(event_id: &str, payment_intent: &str, amount: i64, refunded: i64) -> Vec<u8> {
    webhook_body(
        event_id,
        "charge.refunded",
        json!({
            "id": format!("ch_{}", payment_intent),
            "object": "charge",
            "amount": amount,
            "amount_refunded": refunded,
            "refunded": refunded >= amount,
            "payment_intent": payment_intent,
        }),
    )
}

pub fn sign(body: &[u8]) -> String {
    WebhookVerifier::new(WEBHOOK_SECRET).sign(body, now()).unwrap()
}

// ============ HTTP ============

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

/// POST a correctly signed webhook.
pub async fn post_webhook(app: Router, body: Vec<u8>) -> (StatusCode, Value) {
    let signature = sign(&body);
    send(
        app,
        Request::builder()
            .method("POST")
            .uri("/webhooks/stripe")
            .header("content-type", "application/json")
            .header("Stripe-Signature", signature)
            .body(Body::from(body))
            .unwrap(),
    )
    .await
}

pub async fn post_json(app: Router, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    send(app, builder.body(Body::from(body.to_string())).unwrap()).await
}

/// Deliver `intent` as payment_intent.succeeded and return the order id.
pub async fn fulfill(ctx: &TestContext, intent: &PaymentIntent) -> String {
    let body = webhook_body(
        &format!("evt_{}", intent.id),
        "payment_intent.succeeded",
        intent_json(intent),
    );
    let (status, ack) = post_webhook(ctx.app(), body).await;
    assert_eq!(status, StatusCode::OK, "fulfillment failed: {}", ack);
    ack["order_id"].as_str().expect("ack has order_id").to_string()
}
