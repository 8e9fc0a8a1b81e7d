//! Wallet signature verification.
//!
//! Proves that the wallet named in a request actually authorized the
//! specific challenge being redeemed. The canonical message binds the
//! challenge nonce, its salt, the claimed wallet address, and the expiry
//! timestamp, so a captured signature cannot be replayed against another
//! challenge or claimed by another wallet.
//!
//! Callers only ever see verified / not-verified. Malformed addresses,
//! malformed signatures, and decode failures all fold into "not verified":
//! exposing which check failed would hand an attacker an oracle for
//! crafting forged proofs. The tagged outcome below exists for logs only.

use ed25519_dalek::{Signature, VerifyingKey};
use solana_pubkey::Pubkey;
use std::str::FromStr;

use crate::challenge::Challenge;
use crate::timestamp::UnixTimestamp;

/// Internal verification outcome, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignatureCheck {
    Verified,
    InvalidWallet,
    InvalidSignatureFormat,
    Mismatch,
}

/// Builds the canonical string a wallet must sign to redeem a challenge.
///
/// Every field is reproducible by the client from the 402 response plus its
/// own address, and the format is versioned so it can evolve without
/// ambiguity.
pub fn canonical_message(
    nonce: &str,
    salt: &str,
    wallet: &str,
    expires_at: UnixTimestamp,
) -> String {
    format!(
        "sol-paygate/v1\nnonce:{nonce}\nsalt:{salt}\nwallet:{wallet}\nexpires:{}",
        expires_at.as_secs()
    )
}

/// Ordered decode attempts for the signature string: fixed-length hex
/// first, then the chain-native base58 encoding. Each attempt is isolated,
/// so a string that is garbage in one format still gets tried in the next.
const SIGNATURE_DECODERS: &[fn(&str) -> Option<[u8; 64]>] =
    &[decode_hex_signature, decode_base58_signature];

fn decode_hex_signature(s: &str) -> Option<[u8; 64]> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

fn decode_base58_signature(s: &str) -> Option<[u8; 64]> {
    let bytes = bs58::decode(s).into_vec().ok()?;
    bytes.try_into().ok()
}

fn decode_signature(s: &str) -> Option<[u8; 64]> {
    SIGNATURE_DECODERS.iter().find_map(|decode| decode(s))
}

/// Checks that `signature` is a valid Ed25519 signature by `wallet` over
/// the canonical message for `challenge`. Never panics and never errors on
/// adversarial input.
pub fn verify(challenge: &Challenge, wallet: &str, signature: &str) -> bool {
    let outcome = check(challenge, wallet, signature);
    if outcome != SignatureCheck::Verified {
        tracing::debug!(nonce = %challenge.nonce, ?outcome, "Signature check failed");
    }
    outcome == SignatureCheck::Verified
}

pub(crate) fn check(challenge: &Challenge, wallet: &str, signature: &str) -> SignatureCheck {
    let Ok(pubkey) = Pubkey::from_str(wallet) else {
        return SignatureCheck::InvalidWallet;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&pubkey.to_bytes()) else {
        return SignatureCheck::InvalidWallet;
    };
    let Some(signature_bytes) = decode_signature(signature) else {
        return SignatureCheck::InvalidSignatureFormat;
    };
    let signature = Signature::from_bytes(&signature_bytes);
    let message = canonical_message(
        &challenge.nonce,
        &challenge.salt,
        wallet,
        challenge.expires_at,
    );
    match verifying_key.verify_strict(message.as_bytes(), &signature) {
        Ok(()) => SignatureCheck::Verified,
        Err(_) => SignatureCheck::Mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Address;
    use ed25519_dalek::{Signer, SigningKey};
    use rust_decimal::Decimal;

    fn keypair() -> (SigningKey, String) {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let wallet = Pubkey::new_from_array(signing_key.verifying_key().to_bytes()).to_string();
        (signing_key, wallet)
    }

    fn challenge() -> Challenge {
        Challenge {
            nonce: "ab".repeat(32),
            salt: "cd".repeat(16),
            amount: Decimal::ONE,
            recipient: Address::new(Pubkey::new_unique()),
            expires_at: UnixTimestamp::from_secs(1_700_000_000),
        }
    }

    fn sign(signing_key: &SigningKey, challenge: &Challenge, wallet: &str) -> [u8; 64] {
        let message = canonical_message(
            &challenge.nonce,
            &challenge.salt,
            wallet,
            challenge.expires_at,
        );
        signing_key.sign(message.as_bytes()).to_bytes()
    }

    #[test]
    fn test_accepts_hex_encoded_signature() {
        let (signing_key, wallet) = keypair();
        let challenge = challenge();
        let signature = hex::encode(sign(&signing_key, &challenge, &wallet));
        assert!(verify(&challenge, &wallet, &signature));
    }

    #[test]
    fn test_accepts_base58_encoded_signature() {
        let (signing_key, wallet) = keypair();
        let challenge = challenge();
        let signature = bs58::encode(sign(&signing_key, &challenge, &wallet)).into_string();
        assert!(verify(&challenge, &wallet, &signature));
    }

    #[test]
    fn test_rejects_signature_over_other_nonce() {
        let (signing_key, wallet) = keypair();
        let signed_for = challenge();
        let mut redeemed = challenge();
        redeemed.nonce = "ef".repeat(32);
        let signature = hex::encode(sign(&signing_key, &signed_for, &wallet));
        assert!(!verify(&redeemed, &wallet, &signature));
    }

    #[test]
    fn test_rejects_signature_claimed_by_other_wallet() {
        let (signing_key, wallet) = keypair();
        let challenge = challenge();
        let signature = hex::encode(sign(&signing_key, &challenge, &wallet));
        let other_wallet = Pubkey::new_unique().to_string();
        assert!(!verify(&challenge, &other_wallet, &signature));
    }

    #[test]
    fn test_malformed_inputs_fold_to_not_verified() {
        let challenge = challenge();
        let (_, wallet) = keypair();
        assert_eq!(
            check(&challenge, "not-an-address", "00"),
            SignatureCheck::InvalidWallet
        );
        assert_eq!(
            check(&challenge, &wallet, "zz-not-hex-nor-base58-!!"),
            SignatureCheck::InvalidSignatureFormat
        );
        assert_eq!(
            check(&challenge, &wallet, &"00".repeat(64)),
            SignatureCheck::Mismatch
        );
    }
}
