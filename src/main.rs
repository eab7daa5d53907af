use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursepay::config::Config;
use coursepay::db::{create_pool, init_db, queries, AppState};
use coursepay::handlers;
use coursepay::models::CreateCourse;
use coursepay::payments::StripeClient;

#[derive(Parser, Debug)]
#[command(name = "coursepay")]
#[command(about = "Payment-to-enrollment reconciliation service for course purchases")]
struct Cli {
    /// Seed the database with demo courses (dev mode only)
    #[arg(long)]
    seed: bool,
}

/// Seeds demo courses for local development.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let existing = queries::list_courses(&conn).expect("Failed to list courses");
    if !existing.is_empty() {
        tracing::info!("Courses already exist, skipping seed");
        return;
    }

    let demo = [
        ("Intro to Systems Programming", 9999),
        ("Distributed Systems in Practice", 14999),
        ("Database Internals", 12999),
    ];

    tracing::info!("============================================");
    tracing::info!("SEEDING DEMO COURSES");
    for (title, price_cents) in demo {
        let course = queries::create_course(
            &conn,
            &CreateCourse {
                title: title.to_string(),
                price_cents,
                currency: "usd".to_string(),
                purchasable: true,
            },
        )
        .expect("Failed to create demo course");
        tracing::info!("  {} ({}) - {}", course.title, course.id, course.price());
    }
    tracing::info!("============================================");
}

/// Spawns a background task that periodically purges expired webhook dedup
/// records. Providers stop redelivering long before the retention window
/// closes, so these rows only need to outlive the redelivery horizon.
fn spawn_cleanup_task(state: AppState, retention_days: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(60 * 60); // hourly

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::purge_old_webhook_events(&conn, retention_days) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::debug!("Purged {} expired webhook events", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to purge webhook events: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for cleanup: {}", e);
                }
            }
        }
    });

    tracing::info!("Background webhook-event cleanup task started (runs hourly)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursepay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        provider: Arc::new(StripeClient::new(&config.stripe)),
        base_url: config.base_url.clone(),
        success_url: config.success_url.clone(),
        cancel_url: config.cancel_url.clone(),
        admin_api_key: config.admin_api_key.clone(),
        checkout_ttl_secs: config.checkout_ttl_secs,
        refund_window_days: config.refund_window_days,
        suspend_on_dispute: config.suspend_on_dispute,
    };

    // Purge expired webhook dedup records on startup (0 = never purge)
    if config.webhook_retention_days > 0 {
        let conn = state.db.get().expect("Failed to get connection for purge");
        match queries::purge_old_webhook_events(&conn, config.webhook_retention_days) {
            Ok(count) if count > 0 => {
                tracing::info!(
                    "Purged {} webhook events older than {} days",
                    count,
                    config.webhook_retention_days
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to purge old webhook events: {}", e);
            }
        }
    }

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set COURSEPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    if config.webhook_retention_days > 0 {
        spawn_cleanup_task(state.clone(), config.webhook_retention_days);
    }

    let app = Router::new()
        // User-facing endpoints (gateway-authenticated)
        .merge(handlers::checkout::router())
        // Webhook endpoint (provider signature auth)
        .merge(handlers::webhooks::router())
        // Admin endpoints (admin key auth)
        .merge(handlers::admin::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Coursepay server listening on {}", addr);

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
