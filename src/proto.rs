//! Wire types for the payment-gating protocol: the proof-of-payment
//! headers a client attaches, the 402 challenge response the gate emits,
//! and the priced request body the cost estimator reads.

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::challenge::Challenge;

/// Protocol header names. The `X-Payment` flag marks a request as carrying
/// proof of payment; the rest carry the proof fields and, on 402 responses,
/// mirror the challenge so non-JSON clients can read it.
pub mod headers {
    use axum::http::HeaderName;

    pub const PAYMENT: HeaderName = HeaderName::from_static("x-payment");
    pub const NONCE: HeaderName = HeaderName::from_static("x-payment-nonce");
    pub const SIGNATURE: HeaderName = HeaderName::from_static("x-payment-signature");
    pub const WALLET: HeaderName = HeaderName::from_static("x-payment-wallet");
    pub const TRANSACTION: HeaderName = HeaderName::from_static("x-payment-transaction");
    pub const SALT: HeaderName = HeaderName::from_static("x-payment-salt");
    pub const AMOUNT: HeaderName = HeaderName::from_static("x-payment-amount");
    pub const CURRENCY: HeaderName = HeaderName::from_static("x-payment-currency");
    pub const RECIPIENT: HeaderName = HeaderName::from_static("x-payment-recipient");
    pub const EXPIRES_AT: HeaderName = HeaderName::from_static("x-payment-expires-at");
    pub const REASON: HeaderName = HeaderName::from_static("x-payment-reason");
}

/// Why a request was refused. Carried in the 402 body and the
/// `X-Payment-Reason` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    PaymentRequired,
    ChallengeExpired,
    InvalidSignature,
    SettlementNotConfirmed,
    PaymentSystemError,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::PaymentRequired => "payment-required",
            ReasonCode::ChallengeExpired => "challenge-expired",
            ReasonCode::InvalidSignature => "invalid-signature",
            ReasonCode::SettlementNotConfirmed => "settlement-not-confirmed",
            ReasonCode::PaymentSystemError => "payment-system-error",
        }
    }
}

impl Display for ReasonCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of payment extracted from request headers. Present only when the
/// client set `X-Payment: true` and supplied the three mandatory fields;
/// the transaction reference stays optional because a client may sign a
/// challenge before its transfer lands.
#[derive(Debug, Clone)]
pub struct ProofOfPayment {
    pub nonce: String,
    pub signature: String,
    pub wallet: String,
    pub transaction: Option<String>,
}

impl ProofOfPayment {
    pub fn from_headers(map: &HeaderMap) -> Option<Self> {
        let flag = map.get(&headers::PAYMENT)?.to_str().ok()?;
        if !flag.eq_ignore_ascii_case("true") {
            return None;
        }
        let text = |name: &axum::http::HeaderName| {
            map.get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        };
        Some(Self {
            nonce: text(&headers::NONCE)?,
            signature: text(&headers::SIGNATURE)?,
            wallet: text(&headers::WALLET)?,
            transaction: text(&headers::TRANSACTION),
        })
    }
}

/// Challenge fields as rendered in the 402 body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeBody {
    pub nonce: String,
    pub salt: String,
    pub amount: String,
    pub currency: String,
    pub recipient: String,
    /// ISO-8601, unlike the unix-seconds form signed by the wallet.
    pub expires_at: String,
}

impl ChallengeBody {
    pub fn new(challenge: &Challenge, currency: &str) -> Self {
        Self {
            nonce: challenge.nonce.clone(),
            salt: challenge.salt.clone(),
            amount: challenge.amount.to_string(),
            currency: currency.to_string(),
            recipient: challenge.recipient.to_string(),
            expires_at: challenge.expires_at.to_rfc3339(),
        }
    }
}

/// JSON body of a 402 response.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentRequiredBody {
    pub reason: ReasonCode,
    pub challenge: ChallengeBody,
    pub model: String,
}

fn insert_header(map: &mut HeaderMap, name: axum::http::HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        map.insert(name, value);
    }
}

/// Builds the full 402 response: JSON body plus the mirrored challenge
/// headers. The wallet signs over the unix-seconds expiry, so that form is
/// what `X-Payment-Expires-At` carries.
pub fn payment_required(
    reason: ReasonCode,
    challenge: &Challenge,
    currency: &str,
    model: &str,
) -> Response {
    let body = PaymentRequiredBody {
        reason,
        challenge: ChallengeBody::new(challenge, currency),
        model: model.to_string(),
    };
    let mut response = (StatusCode::PAYMENT_REQUIRED, Json(body)).into_response();
    let map = response.headers_mut();
    insert_header(map, headers::NONCE, &challenge.nonce);
    insert_header(map, headers::SALT, &challenge.salt);
    insert_header(map, headers::AMOUNT, &challenge.amount.to_string());
    insert_header(map, headers::CURRENCY, currency);
    insert_header(map, headers::RECIPIENT, &challenge.recipient.to_string());
    insert_header(
        map,
        headers::EXPIRES_AT,
        &challenge.expires_at.as_secs().to_string(),
    );
    insert_header(map, headers::REASON, reason.as_str());
    response
}

/// The parts of a protected request the cost estimator prices: the model
/// name and either a single `message` string or a `messages` array of
/// `{content}` objects.
#[derive(Debug, Deserialize)]
pub struct PricedRequest {
    pub model: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    messages: Option<Vec<MessageEntry>>,
}

#[derive(Debug, Deserialize)]
struct MessageEntry {
    #[serde(default)]
    content: String,
}

impl PricedRequest {
    /// Total prompt length in characters, or `None` when the body carries
    /// neither form of message (a malformed request).
    pub fn prompt_chars(&self) -> Option<usize> {
        if let Some(message) = &self.message {
            return Some(message.chars().count());
        }
        let messages = self.messages.as_ref()?;
        Some(
            messages
                .iter()
                .map(|entry| entry.content.chars().count())
                .sum(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Address;
    use crate::timestamp::UnixTimestamp;
    use rust_decimal::Decimal;
    use solana_pubkey::Pubkey;

    fn sample_challenge() -> Challenge {
        Challenge {
            nonce: "aa".repeat(32),
            salt: "bb".repeat(16),
            amount: Decimal::from_str_exact("0.0101").unwrap(),
            recipient: Address::new(Pubkey::new_unique()),
            expires_at: UnixTimestamp::from_secs(1_900_000_000),
        }
    }

    #[test]
    fn test_proof_requires_flag_and_mandatory_fields() {
        let mut map = HeaderMap::new();
        map.insert(headers::NONCE, HeaderValue::from_static("abc"));
        map.insert(headers::SIGNATURE, HeaderValue::from_static("def"));
        map.insert(headers::WALLET, HeaderValue::from_static("wallet"));
        // No flag yet.
        assert!(ProofOfPayment::from_headers(&map).is_none());

        map.insert(headers::PAYMENT, HeaderValue::from_static("false"));
        assert!(ProofOfPayment::from_headers(&map).is_none());

        map.insert(headers::PAYMENT, HeaderValue::from_static("true"));
        let proof = ProofOfPayment::from_headers(&map).unwrap();
        assert_eq!(proof.nonce, "abc");
        assert_eq!(proof.transaction, None);

        map.remove(&headers::SIGNATURE);
        assert!(ProofOfPayment::from_headers(&map).is_none());
    }

    #[test]
    fn test_proof_carries_optional_transaction() {
        let mut map = HeaderMap::new();
        map.insert(headers::PAYMENT, HeaderValue::from_static("true"));
        map.insert(headers::NONCE, HeaderValue::from_static("abc"));
        map.insert(headers::SIGNATURE, HeaderValue::from_static("def"));
        map.insert(headers::WALLET, HeaderValue::from_static("wallet"));
        map.insert(headers::TRANSACTION, HeaderValue::from_static("txref"));
        let proof = ProofOfPayment::from_headers(&map).unwrap();
        assert_eq!(proof.transaction.as_deref(), Some("txref"));
    }

    #[test]
    fn test_payment_required_mirrors_challenge_in_headers() {
        let challenge = sample_challenge();
        let response = payment_required(ReasonCode::PaymentRequired, &challenge, "USDC", "sonar");
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
        let map = response.headers();
        assert_eq!(map.get(&headers::NONCE).unwrap(), challenge.nonce.as_str());
        assert_eq!(map.get(&headers::AMOUNT).unwrap(), "0.0101");
        assert_eq!(map.get(&headers::CURRENCY).unwrap(), "USDC");
        assert_eq!(map.get(&headers::EXPIRES_AT).unwrap(), "1900000000");
        assert_eq!(map.get(&headers::REASON).unwrap(), "payment-required");
    }

    #[test]
    fn test_reason_codes_render_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ReasonCode::SettlementNotConfirmed).unwrap(),
            "\"settlement-not-confirmed\""
        );
        assert_eq!(ReasonCode::InvalidSignature.to_string(), "invalid-signature");
    }

    #[test]
    fn test_priced_request_accepts_both_message_forms() {
        let single: PricedRequest =
            serde_json::from_str(r#"{"model":"sonar","message":"hello"}"#).unwrap();
        assert_eq!(single.prompt_chars(), Some(5));

        let multi: PricedRequest = serde_json::from_str(
            r#"{"model":"sonar","messages":[{"content":"hi"},{"content":"there"}]}"#,
        )
        .unwrap();
        assert_eq!(multi.prompt_chars(), Some(7));

        let neither: PricedRequest = serde_json::from_str(r#"{"model":"sonar"}"#).unwrap();
        assert_eq!(neither.prompt_chars(), None);
    }

    #[test]
    fn test_priced_request_requires_model() {
        let result = serde_json::from_str::<PricedRequest>(r#"{"message":"hello"}"#);
        assert!(result.is_err());
    }
}
