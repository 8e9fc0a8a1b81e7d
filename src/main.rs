//! Payment-gated HTTP entrypoint.
//!
//! Launches an Axum server with one protected completion endpoint. Unpaid
//! requests to it receive a `402 Payment Required` challenge; requests
//! carrying a verified proof of payment pass through to the handler.
//!
//! Endpoints:
//! - `POST /chat` – Payment-gated completion endpoint
//! - `GET /healthz` – Liveness probe, never gated
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `CONFIG` points at the JSON configuration file
//! - `RUST_LOG` controls log filtering

use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dotenvy::dotenv;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use sol_paygate::challenge::InMemoryChallengeStore;
use sol_paygate::config::Config;
use sol_paygate::gate::PaymentGate;
use sol_paygate::layer::PaymentGateLayer;
use sol_paygate::pricing::CostEstimator;
use sol_paygate::proto::PricedRequest;
use sol_paygate::settlement::{LedgerReader, SolanaLedger};
use sol_paygate::telemetry;
use sol_paygate::util::shutdown_token;

/// Initializes the payment gate server.
///
/// - Loads `.env` variables and tracing.
/// - Builds the gate from configuration: price table, challenge registry,
///   and the Solana ledger client.
/// - Starts an Axum HTTP server with the gated endpoint.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    telemetry::init();

    let config = Config::load()?;
    let payment = config.payment();

    let estimator = CostEstimator::new(
        config.models().clone(),
        payment.minimum_amount.inner(),
        payment.fallback_amount.inner(),
    );
    let store = Arc::new(InMemoryChallengeStore::new(
        payment.challenge_window_secs,
        payment.max_challenges,
    ));
    let ledger = Arc::new(SolanaLedger::new(
        payment.rpc_url.to_string(),
        Duration::from_millis(payment.rpc_timeout_ms),
    )) as Arc<dyn LedgerReader>;
    let gate = PaymentGate::new(
        estimator,
        store,
        ledger,
        payment.asset,
        payment.recipient,
        payment.currency.clone(),
    );

    let http_endpoints = Router::new()
        .route("/chat", post(completion).layer(PaymentGateLayer::new(gate)))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let cancellation_token = shutdown_token()?;
    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}

/// Stand-in for the upstream completion call. Only ever reached once the
/// gate has verified payment for the request.
async fn completion(Json(request): Json<PricedRequest>) -> impl IntoResponse {
    Json(json!({
        "model": request.model,
        "promptChars": request.prompt_chars(),
        "status": "accepted",
    }))
}

async fn healthz() -> &'static str {
    "ok"
}
