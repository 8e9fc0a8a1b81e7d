//! Axum middleware that puts a [`PaymentGate`] in front of a route.
//!
//! The service buffers the request body (the gate needs it for pricing),
//! runs the gate, and either forwards the reconstructed request to the
//! wrapped handler or returns the gate's refusal unchanged.

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};

use crate::gate::PaymentGate;

/// Upper bound on buffered request bodies. Pricing inputs are chat-sized;
/// anything larger is refused before the gate runs.
const MAX_BODY_BYTES: usize = 1 << 20;

/// Layer wrapping a route with payment enforcement.
#[derive(Clone)]
pub struct PaymentGateLayer {
    gate: PaymentGate,
}

impl PaymentGateLayer {
    pub fn new(gate: PaymentGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for PaymentGateLayer
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Service = PaymentGateService;

    fn layer(&self, inner: S) -> Self::Service {
        PaymentGateService {
            gate: self.gate.clone(),
            inner: BoxCloneSyncService::new(inner),
        }
    }
}

/// The per-request service produced by [`PaymentGateLayer`].
#[derive(Clone)]
pub struct PaymentGateService {
    gate: PaymentGate,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
}

impl Service<Request> for PaymentGateService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let gate = self.gate.clone();
        let inner = self.inner.clone();
        Box::pin(handle(gate, inner, request))
    }
}

async fn handle(
    gate: PaymentGate,
    inner: BoxCloneSyncService<Request, Response, Infallible>,
    request: Request,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return Ok(StatusCode::PAYLOAD_TOO_LARGE.into_response()),
    };
    match gate.authorize(&parts.headers, &bytes).await {
        Ok(()) => {
            let request = Request::from_parts(parts, Body::from(bytes));
            inner.oneshot(request).await
        }
        Err(refusal) => Ok(refusal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Address;
    use crate::challenge::InMemoryChallengeStore;
    use crate::pricing::{CostEstimator, ModelPrice};
    use crate::proto::headers;
    use crate::settlement::tests::{
        MockLedger, mint_account, reference, token_account, transfer_checked_transaction,
    };
    use crate::settlement::{LedgerReader, LedgerTransaction};
    use crate::signature::canonical_message;
    use crate::timestamp::UnixTimestamp;
    use axum::Router;
    use axum::http::HeaderValue;
    use axum::routing::post;
    use ed25519_dalek::{Signer, SigningKey};
    use rust_decimal::Decimal;
    use solana_pubkey::Pubkey;
    use std::collections::HashMap;
    use std::sync::Arc;

    const BODY: &str = r#"{"model":"sonar","message":"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"}"#;

    async fn completion() -> &'static str {
        "completed"
    }

    /// Full app: one protected route, a gate against a mock ledger that
    /// holds a settled 10_100-unit transfer to the recipient.
    fn app() -> (Router, SigningKey, String) {
        let mint = Pubkey::new_unique();
        let recipient = Pubkey::new_unique();
        let destination = Pubkey::new_unique();
        let keypair = SigningKey::from_bytes(&[9u8; 32]);
        let wallet = Pubkey::new_from_array(keypair.verifying_key().to_bytes()).to_string();
        let (tx_signature, _) = reference();

        let mut ledger = MockLedger::default();
        ledger.transactions.insert(
            tx_signature,
            LedgerTransaction {
                transaction: transfer_checked_transaction(&mint, &destination, 10_100, 6),
                failed: false,
            },
        );
        ledger.accounts.insert(mint, mint_account(6));
        ledger
            .accounts
            .insert(destination, token_account(&mint, &recipient, 10_100));

        let mut models = HashMap::new();
        models.insert(
            "sonar".to_string(),
            ModelPrice {
                base_price: Decimal::from_str_exact("0.01").unwrap(),
                per_token_input: Decimal::from_str_exact("0.00001").unwrap(),
                per_token_output: Decimal::ZERO,
            },
        );
        let gate = PaymentGate::new(
            CostEstimator::new(
                models,
                Decimal::from_str_exact("0.001").unwrap(),
                Decimal::from_str_exact("0.01").unwrap(),
            ),
            Arc::new(InMemoryChallengeStore::default()),
            Arc::new(ledger) as Arc<dyn LedgerReader>,
            Address::new(mint),
            Address::new(recipient),
            "USDC".to_string(),
        );
        let router = Router::new().route(
            "/chat",
            post(completion).layer(PaymentGateLayer::new(gate)),
        );
        (router, keypair, wallet)
    }

    fn chat_request() -> axum::http::request::Builder {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
    }

    #[tokio::test]
    async fn test_unpaid_request_is_refused_with_challenge() {
        let (router, _, _) = app();
        let response = router
            .oneshot(chat_request().body(Body::from(BODY)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            response.headers().get(&headers::AMOUNT).unwrap(),
            "0.0101"
        );
        let body = axum::body::to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["reason"], "payment-required");
        assert!(parsed["challenge"]["nonce"].as_str().unwrap().len() >= 64);
        assert_eq!(parsed["challenge"]["currency"], "USDC");
    }

    #[tokio::test]
    async fn test_settled_payment_reaches_handler() {
        let (router, keypair, wallet) = app();
        let refused = router
            .clone()
            .oneshot(chat_request().body(Body::from(BODY)).unwrap())
            .await
            .unwrap();
        let get_header = |name: &axum::http::HeaderName| {
            refused.headers().get(name).unwrap().to_str().unwrap().to_string()
        };
        let nonce = get_header(&headers::NONCE);
        let salt = get_header(&headers::SALT);
        let expires: u64 = get_header(&headers::EXPIRES_AT).parse().unwrap();
        let message =
            canonical_message(&nonce, &salt, &wallet, UnixTimestamp::from_secs(expires));
        let signature = hex::encode(keypair.sign(message.as_bytes()).to_bytes());
        let (_, tx_reference) = reference();

        let paid = chat_request()
            .header(headers::PAYMENT, HeaderValue::from_static("true"))
            .header(headers::NONCE, HeaderValue::from_str(&nonce).unwrap())
            .header(headers::SIGNATURE, HeaderValue::from_str(&signature).unwrap())
            .header(headers::WALLET, HeaderValue::from_str(&wallet).unwrap())
            .header(
                headers::TRANSACTION,
                HeaderValue::from_str(&tx_reference).unwrap(),
            )
            .body(Body::from(BODY))
            .unwrap();
        let response = router.oneshot(paid).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), MAX_BODY_BYTES)
            .await
            .unwrap();
        assert_eq!(&body[..], b"completed");
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused_before_gating() {
        let (router, _, _) = app();
        let huge = vec![b'a'; MAX_BODY_BYTES + 1];
        let response = router
            .oneshot(chat_request().body(Body::from(huge)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
