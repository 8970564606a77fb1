use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use boxoffice::catalog::EventCatalog;
use boxoffice::config::Config;
use boxoffice::db::{AppState, create_pool, init_db, queries};
use boxoffice::identity::{SessionIdentityProvider, generate_session_token, hash_token};
use boxoffice::models::{CreateEvent, CreateTicketType};
use boxoffice::notify::{LogSink, NotificationSink, Notifier, WebhookSink, default_retry_delays};
use boxoffice::payments::{StripeClient, WebhookVerifier};

/// Processed webhook ids are kept this long for replay detection.
const WEBHOOK_EVENT_RETENTION_DAYS: i64 = 30;

const DEV_EVENT_SLUG: &str = "dev-showcase";

#[derive(Parser, Debug)]
#[command(name = "boxoffice")]
#[command(about = "Payment reconciliation and ticket fulfillment for the events platform")]
struct Cli {
    /// Seed the database with dev data (event, ticket types, sessions)
    #[arg(long)]
    seed: bool,
}

/// Seeds the database with dev data for testing.
/// Only runs in dev mode and when the dev event doesn't exist yet.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    if queries::get_event_by_slug(&conn, DEV_EVENT_SLUG)
        .expect("Failed to look up dev event")
        .is_some()
    {
        tracing::info!("Database already has dev data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let now = queries::now();
    let event = queries::create_event(
        &conn,
        &CreateEvent {
            legacy_id: Some(1001),
            slug: DEV_EVENT_SLUG.to_string(),
            name: "Dev Showcase".to_string(),
            starts_at: now + 30 * 86400,
            capacity: Some(200),
        },
    )
    .expect("Failed to create dev event");
    tracing::info!("Event: {} (id: {}, legacy: 1001)", event.name, event.id);

    let general = queries::create_ticket_type(
        &conn,
        &event.id,
        &CreateTicketType {
            name: "General Admission".to_string(),
            price_cents: 2500,
            capacity: 150,
            sale_starts_at: None,
            sale_ends_at: None,
        },
    )
    .expect("Failed to create GA ticket type");

    let vip = queries::create_ticket_type(
        &conn,
        &event.id,
        &CreateTicketType {
            name: "VIP".to_string(),
            price_cents: 7500,
            capacity: 50,
            sale_starts_at: None,
            sale_ends_at: Some(event.starts_at),
        },
    )
    .expect("Failed to create VIP ticket type");
    tracing::info!("Ticket types: {} ({}), {} ({})", general.name, general.id, vip.name, vip.id);

    let expires_at = now + 7 * 86400;
    let user_token = generate_session_token();
    queries::create_session(&conn, &hash_token(&user_token), Some("user_dev"), None, None, expires_at)
        .expect("Failed to create user session");

    let guest_token = generate_session_token();
    queries::create_session(
        &conn,
        &hash_token(&guest_token),
        None,
        Some("guest@boxoffice.local"),
        Some("Dev Guest"),
        expires_at,
    )
    .expect("Failed to create guest session");

    tracing::info!("============================================");
    tracing::info!("DEV DATA SEEDED SUCCESSFULLY");
    tracing::info!("============================================");

    // Copy-paste friendly output (tokens are not stored in plaintext)
    println!();
    println!("--- COPY FROM HERE ---");
    println!("  event_id: {}", event.id);
    println!("  ga_ticket_type_id: {}", general.id);
    println!("  vip_ticket_type_id: {}", vip.id);
    println!("  user_session_token: {}", user_token);
    println!("  guest_session_token: {}", guest_token);
    println!("--- END COPY ---");
    println!();
}

/// Spawns a background task that periodically purges old webhook replay records.
fn spawn_cleanup_task(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => {
                    match queries::purge_old_webhook_events(&conn, WEBHOOK_EVENT_RETENTION_DAYS) {
                        Ok(count) if count > 0 => {
                            tracing::debug!("Purged {} old webhook event records", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("Failed to purge webhook events: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("Failed to get db connection for cleanup: {}", e);
                }
            }
        }
    });

    tracing::info!("Background cleanup task started (runs hourly)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path, config.db_busy_timeout)
        .expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let processor = StripeClient::new(
        &config.stripe_secret_key,
        &config.stripe_api_base,
        config.processor_timeout,
    )
    .expect("Failed to create Stripe client");

    let sink: Arc<dyn NotificationSink> = match &config.notify_webhook_url {
        Some(url) => {
            tracing::info!("Notifications delivered to {}", url);
            Arc::new(WebhookSink::new(reqwest::Client::new(), url.clone()))
        }
        None => {
            tracing::info!("NOTIFY_WEBHOOK_URL not set; notifications are logged only");
            Arc::new(LogSink)
        }
    };
    let notifier = Notifier::spawn(sink, config.notify_queue_capacity, default_retry_delays());

    let state = AppState {
        db: db_pool,
        verifier: Arc::new(WebhookVerifier::new(config.stripe_webhook_secret.clone())),
        processor: Arc::new(processor),
        catalog: Arc::new(EventCatalog::new(
            config.catalog_cache_capacity,
            config.catalog_cache_ttl,
        )),
        identity: Arc::new(SessionIdentityProvider),
        notifier,
        refund_policy: config.refund_policy,
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set BOXOFFICE_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_cleanup_task(state.clone());

    let app = boxoffice::app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("boxoffice listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
