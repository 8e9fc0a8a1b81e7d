//! Cost estimation for protected requests.
//!
//! Maps a `(model id, payload size)` pair to the USDC price a caller owes
//! before the request is fulfilled. Estimation must never block 402
//! issuance: an unknown model resolves to a configured fallback price
//! instead of an error.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-model pricing entry, read from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPrice {
    /// Flat price charged for any request to this model.
    pub base_price: Decimal,
    /// Price per estimated input token.
    pub per_token_input: Decimal,
    /// Price per output token. Carried in the table for parity with the
    /// upstream price sheet; the gate charges on input ahead of execution.
    #[serde(default)]
    pub per_token_output: Decimal,
}

/// Number of decimal places quoted amounts are rounded to.
const QUOTE_SCALE: u32 = 5;

/// Rough characters-per-token ratio used for input token estimation.
const CHARS_PER_TOKEN: u64 = 4;

/// Derives the required payment amount for a request from the model price
/// table. Stateless apart from its configuration; shared freely.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    models: HashMap<String, ModelPrice>,
    minimum: Decimal,
    fallback: Decimal,
}

impl CostEstimator {
    pub fn new(models: HashMap<String, ModelPrice>, minimum: Decimal, fallback: Decimal) -> Self {
        Self {
            models,
            minimum,
            fallback,
        }
    }

    /// Estimates the price in decimal USDC for a request of `chars`
    /// characters against `model`.
    ///
    /// Token count is `ceil(chars / 4)` with saturating arithmetic, so
    /// adversarially long payloads cannot overflow. The result is clamped
    /// to the configured minimum and rounded to five decimal places.
    pub fn estimate(&self, model: &str, chars: usize) -> Decimal {
        let amount = match self.models.get(model) {
            Some(price) => {
                let chars = u64::try_from(chars).unwrap_or(u64::MAX);
                let tokens = chars.saturating_add(CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN;
                price
                    .base_price
                    .saturating_add(Decimal::from(tokens).saturating_mul(price.per_token_input))
            }
            None => {
                tracing::debug!(model, "Unknown model, quoting fallback price");
                self.fallback
            }
        };
        amount.max(self.minimum).round_dp(QUOTE_SCALE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn estimator() -> CostEstimator {
        let mut models = HashMap::new();
        models.insert(
            "m1".to_string(),
            ModelPrice {
                base_price: Decimal::from_str("0.01").unwrap(),
                per_token_input: Decimal::from_str("0.00001").unwrap(),
                per_token_output: Decimal::from_str("0.00003").unwrap(),
            },
        );
        CostEstimator::new(
            models,
            Decimal::from_str("0.001").unwrap(),
            Decimal::from_str("0.01").unwrap(),
        )
    }

    #[test]
    fn test_base_plus_per_token() {
        // 40 chars -> 10 tokens
        let amount = estimator().estimate("m1", 40);
        assert_eq!(amount, Decimal::from_str("0.0101").unwrap());
    }

    #[test]
    fn test_zero_length_still_pays_base() {
        let amount = estimator().estimate("m1", 0);
        assert_eq!(amount, Decimal::from_str("0.01").unwrap());
    }

    #[test]
    fn test_token_count_rounds_up() {
        // 41 chars -> 11 tokens
        let amount = estimator().estimate("m1", 41);
        assert_eq!(amount, Decimal::from_str("0.01011").unwrap());
    }

    #[test]
    fn test_unknown_model_falls_back() {
        let amount = estimator().estimate("who-dis", 40);
        assert_eq!(amount, Decimal::from_str("0.01").unwrap());
    }

    #[test]
    fn test_monotonic_in_length() {
        let estimator = estimator();
        let mut last = Decimal::ZERO;
        for chars in [0usize, 1, 4, 40, 400, 4_000, 40_000] {
            let amount = estimator.estimate("m1", chars);
            assert!(amount >= last, "price regressed at {chars} chars");
            last = amount;
        }
    }

    #[test]
    fn test_never_below_floor() {
        let mut models = HashMap::new();
        models.insert(
            "cheap".to_string(),
            ModelPrice {
                base_price: Decimal::ZERO,
                per_token_input: Decimal::ZERO,
                per_token_output: Decimal::ZERO,
            },
        );
        let floor = Decimal::from_str("0.005").unwrap();
        let estimator = CostEstimator::new(models, floor, Decimal::from_str("0.01").unwrap());
        assert_eq!(estimator.estimate("cheap", 10_000), floor);
    }

    #[test]
    fn test_huge_input_does_not_overflow() {
        let amount = estimator().estimate("m1", usize::MAX);
        assert!(amount > Decimal::ZERO);
    }
}
