//! The payment gate: decides, for one request, whether to let it through
//! or answer with a 402 challenge.
//!
//! The checks run in a fixed order and the gate fails closed at every
//! step: anything it cannot positively verify is answered with a
//! challenge, and only infrastructure faults (registry capacity, ledger
//! transport) surface as a 503 so clients can tell "pay up" apart from
//! "come back later".

use axum::Json;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;

use crate::chain::Address;
use crate::challenge::ChallengeStore;
use crate::pricing::CostEstimator;
use crate::proto::{PricedRequest, ProofOfPayment, ReasonCode, payment_required};
use crate::settlement::{LedgerReader, SettlementVerifier};
use crate::signature;

/// Per-route payment gate. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct PaymentGate {
    estimator: Arc<CostEstimator>,
    store: Arc<dyn ChallengeStore>,
    verifier: Arc<SettlementVerifier<Arc<dyn LedgerReader>>>,
    recipient: Address,
    currency: String,
}

impl PaymentGate {
    pub fn new(
        estimator: CostEstimator,
        store: Arc<dyn ChallengeStore>,
        ledger: Arc<dyn LedgerReader>,
        asset: Address,
        recipient: Address,
        currency: String,
    ) -> Self {
        Self {
            estimator: Arc::new(estimator),
            store,
            verifier: Arc::new(SettlementVerifier::new(ledger, asset)),
            recipient,
            currency,
        }
    }

    /// Runs the full gate for one request. `Ok(())` means the request is
    /// paid for and the wrapped handler may run; `Err` carries the
    /// response to send instead (402, 400, or 503).
    pub async fn authorize(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), Response> {
        let priced: PricedRequest = match serde_json::from_slice(body) {
            Ok(priced) => priced,
            Err(error) => return Err(bad_request(&error.to_string())),
        };
        let Some(chars) = priced.prompt_chars() else {
            return Err(bad_request("missing message or messages"));
        };
        let amount = self.estimator.estimate(&priced.model, chars);

        let Some(proof) = ProofOfPayment::from_headers(headers) else {
            return Err(
                self.fresh_challenge(ReasonCode::PaymentRequired, amount, &priced.model)
                    .await,
            );
        };

        let Some(challenge) = self.store.get(&proof.nonce).await else {
            return Err(
                self.fresh_challenge(ReasonCode::ChallengeExpired, amount, &priced.model)
                    .await,
            );
        };

        // The wallet proof failed, not the challenge itself, so the same
        // challenge is re-offered and the client can sign again.
        if !signature::verify(&challenge, &proof.wallet, &proof.signature) {
            return Err(payment_required(
                ReasonCode::InvalidSignature,
                &challenge,
                &self.currency,
                &priced.model,
            ));
        }

        let Some(reference) = proof.transaction.as_deref() else {
            return Err(payment_required(
                ReasonCode::SettlementNotConfirmed,
                &challenge,
                &self.currency,
                &priced.model,
            ));
        };

        let record = match self
            .verifier
            .verify(reference, &challenge.recipient, challenge.amount)
            .await
        {
            Ok(record) => record,
            Err(error) => {
                tracing::error!(%error, "Ledger unavailable during settlement check");
                return Err(system_failure());
            }
        };
        if !record.verified {
            tracing::debug!(
                nonce = %challenge.nonce,
                code = ?record.code,
                "Settlement not confirmed"
            );
            return Err(payment_required(
                ReasonCode::SettlementNotConfirmed,
                &challenge,
                &self.currency,
                &priced.model,
            ));
        }

        // Single redemption: exactly one of any concurrent duplicates wins
        // the consume; the losers are told the challenge is gone.
        if self.store.consume(&challenge.nonce).await.is_none() {
            return Err(
                self.fresh_challenge(ReasonCode::ChallengeExpired, amount, &priced.model)
                    .await,
            );
        }

        tracing::info!(
            wallet = %proof.wallet,
            nonce = %challenge.nonce,
            amount_atomic = record.amount_atomic,
            "Payment verified, request authorized"
        );
        Ok(())
    }

    async fn fresh_challenge(
        &self,
        reason: ReasonCode,
        amount: Decimal,
        model: &str,
    ) -> Response {
        match self.store.create(amount, self.recipient).await {
            Ok(challenge) => payment_required(reason, &challenge, &self.currency, model),
            Err(error) => {
                tracing::error!(%error, "Failed to mint challenge");
                system_failure()
            }
        }
    }
}

fn bad_request(detail: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": detail })),
    )
        .into_response()
}

fn system_failure() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "reason": ReasonCode::PaymentSystemError })),
    )
        .into_response()
}
