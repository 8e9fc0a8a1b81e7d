//! On-chain settlement verification.
//!
//! The signature verifier only proves *intent* to pay; this module
//! independently confirms by reading the ledger that funds actually moved.
//! Every ambiguous outcome fails closed: an absent transaction, a chain
//! failure, an undecodable instruction, or a timed-out read all count as
//! "not confirmed". Failure dimensions are kept internally for logs but
//! collapse to a single boolean plus a coarse code, so a caller cannot
//! probe which check failed and iterate towards a forged proof.

use async_trait::async_trait;
use rust_decimal::Decimal;
use solana_account::Account;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_commitment_config::CommitmentConfig;
use solana_message::compiled_instruction::CompiledInstruction;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;
use solana_transaction_status_client_types::UiTransactionEncoding;
use spl_token_2022::extension::StateWithExtensions;
use spl_token_2022::state::{Account as TokenAccountState, Mint as MintState};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::chain::Address;
use crate::util::to_atomic;

/// Errors from the ledger transport itself. Timeouts are handled inside the
/// verifier (fail closed); everything else propagates as a system fault.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger request timed out")]
    Timeout,
    #[error("ledger transport failure: {0}")]
    Transport(String),
}

/// A transaction fetched from the ledger, decoded and paired with whether
/// the chain reports it as failed.
#[derive(Debug, Clone)]
pub struct LedgerTransaction {
    pub transaction: VersionedTransaction,
    pub failed: bool,
}

/// The two ledger reads the verifier needs. The production implementation
/// wraps a Solana RPC client; tests substitute a canned map.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Fetches a finalized/confirmed transaction by signature. `None` means
    /// the ledger has no record of it.
    async fn fetch_transaction(
        &self,
        reference: &Signature,
    ) -> Result<Option<LedgerTransaction>, LedgerError>;

    /// Fetches a raw account by address.
    async fn fetch_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError>;
}

#[async_trait]
impl<T: LedgerReader + ?Sized> LedgerReader for Arc<T> {
    async fn fetch_transaction(
        &self,
        reference: &Signature,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        (**self).fetch_transaction(reference).await
    }

    async fn fetch_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        (**self).fetch_account(address).await
    }
}

/// Ledger reader backed by a Solana JSON-RPC endpoint.
///
/// Every call is bounded by the configured timeout so a stalled RPC node
/// can never wedge a request; the verifier treats an elapsed timeout as
/// "not confirmed".
pub struct SolanaLedger {
    rpc_client: Arc<RpcClient>,
    timeout: Duration,
}

impl SolanaLedger {
    pub fn new(rpc_url: String, timeout: Duration) -> Self {
        Self {
            rpc_client: Arc::new(RpcClient::new(rpc_url)),
            timeout,
        }
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, solana_client::client_error::ClientError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Err(_) => Err(LedgerError::Timeout),
            Ok(Err(e)) => Err(LedgerError::Transport(e.to_string())),
            Ok(Ok(value)) => Ok(value),
        }
    }
}

#[async_trait]
impl LedgerReader for SolanaLedger {
    async fn fetch_transaction(
        &self,
        reference: &Signature,
    ) -> Result<Option<LedgerTransaction>, LedgerError> {
        // Status lookup first: it cleanly distinguishes "unknown signature"
        // from a transport fault, and carries the on-chain error state.
        let statuses = self
            .bounded(
                self.rpc_client
                    .get_signature_statuses_with_history(&[*reference]),
            )
            .await?;
        let status = match statuses.value.into_iter().next().flatten() {
            Some(status) => status,
            None => return Ok(None),
        };
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let encoded = self
            .bounded(
                self.rpc_client
                    .get_transaction_with_config(reference, config),
            )
            .await?;
        let meta_failed = encoded
            .transaction
            .meta
            .as_ref()
            .is_some_and(|meta| meta.err.is_some());
        let transaction = encoded
            .transaction
            .transaction
            .decode()
            .ok_or_else(|| LedgerError::Transport("undecodable transaction".to_string()))?;
        Ok(Some(LedgerTransaction {
            transaction,
            failed: status.err.is_some() || meta_failed,
        }))
    }

    async fn fetch_account(&self, address: &Pubkey) -> Result<Option<Account>, LedgerError> {
        let response = self
            .bounded(
                self.rpc_client
                    .get_account_with_commitment(address, CommitmentConfig::confirmed()),
            )
            .await?;
        Ok(response.value)
    }
}

/// Coarse diagnostic for a rejected settlement. Exposed to callers as-is;
/// deliberately no finer-grained than this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementCode {
    TransactionNotFound,
    TransactionFailed,
    NoTransferInstruction,
    AssetMismatch,
    RecipientMismatch,
    AmountBelowRequired,
    LedgerTimeout,
}

/// Result of one settlement check. Produced fresh per call, owned by the
/// caller, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementRecord {
    pub verified: bool,
    pub amount_atomic: Option<u64>,
    pub code: Option<SettlementCode>,
}

impl SettlementRecord {
    fn confirmed(amount_atomic: u64) -> Self {
        Self {
            verified: true,
            amount_atomic: Some(amount_atomic),
            code: None,
        }
    }

    fn rejected(code: SettlementCode) -> Self {
        Self {
            verified: false,
            amount_atomic: None,
            code: Some(code),
        }
    }
}

/// A checked token transfer extracted from a transaction.
#[derive(Debug, Clone, Copy)]
struct CheckedTransfer {
    amount: u64,
    mint: Pubkey,
    destination: Pubkey,
}

fn account_at(
    instruction: &CompiledInstruction,
    account_keys: &[Pubkey],
    index: usize,
) -> Option<Pubkey> {
    let key_index = *instruction.accounts.get(index)? as usize;
    account_keys.get(key_index).copied()
}

fn decode_transfer_checked(
    instruction: &CompiledInstruction,
    account_keys: &[Pubkey],
) -> Option<CheckedTransfer> {
    let program_id = account_keys.get(instruction.program_id_index as usize)?;
    let amount = if spl_token::ID.eq(program_id) {
        match spl_token::instruction::TokenInstruction::unpack(&instruction.data).ok()? {
            spl_token::instruction::TokenInstruction::TransferChecked { amount, .. } => amount,
            _ => return None,
        }
    } else if spl_token_2022::ID.eq(program_id) {
        match spl_token_2022::instruction::TokenInstruction::unpack(&instruction.data).ok()? {
            spl_token_2022::instruction::TokenInstruction::TransferChecked { amount, .. } => amount,
            _ => return None,
        }
    } else {
        return None;
    };
    // TransferChecked accounts: source, mint, destination, authority
    let mint = account_at(instruction, account_keys, 1)?;
    let destination = account_at(instruction, account_keys, 2)?;
    Some(CheckedTransfer {
        amount,
        mint,
        destination,
    })
}

/// Collects every checked token transfer in the transaction.
fn checked_transfers(transaction: &VersionedTransaction) -> Vec<CheckedTransfer> {
    let account_keys = transaction.message.static_account_keys();
    transaction
        .message
        .instructions()
        .iter()
        .filter_map(|instruction| decode_transfer_checked(instruction, account_keys))
        .collect()
}

/// Confirms that a broadcast transaction settles a challenge: correct mint,
/// destination owned by the configured recipient, amount at or above the
/// requirement. Stateless apart from its configuration.
pub struct SettlementVerifier<L> {
    ledger: L,
    asset: Address,
}

/// Maps a timed-out ledger read to an unconfirmed record instead of a
/// system fault, preserving fail-closed semantics.
fn timeout_as_unconfirmed<T>(
    result: Result<T, LedgerError>,
) -> Result<Result<T, SettlementRecord>, LedgerError> {
    match result {
        Ok(value) => Ok(Ok(value)),
        Err(LedgerError::Timeout) => Ok(Err(SettlementRecord::rejected(
            SettlementCode::LedgerTimeout,
        ))),
        Err(other) => Err(other),
    }
}

impl<L: LedgerReader> SettlementVerifier<L> {
    pub fn new(ledger: L, asset: Address) -> Self {
        Self { ledger, asset }
    }

    /// Verifies that the transaction named by `reference` transfers at
    /// least `required_amount` (decimal currency units) of the configured
    /// asset to a token account owned by `recipient`.
    ///
    /// The required amount is converted to atomic units with the mint's
    /// actual on-chain decimal count, fetched per call: different
    /// deployments of the same nominal currency can disagree on precision.
    pub async fn verify(
        &self,
        reference: &str,
        recipient: &Address,
        required_amount: Decimal,
    ) -> Result<SettlementRecord, LedgerError> {
        let Ok(signature) = Signature::from_str(reference) else {
            return Ok(SettlementRecord::rejected(
                SettlementCode::TransactionNotFound,
            ));
        };

        let fetched = match timeout_as_unconfirmed(self.ledger.fetch_transaction(&signature).await)?
        {
            Ok(fetched) => fetched,
            Err(record) => return Ok(record),
        };
        let Some(ledger_transaction) = fetched else {
            return Ok(SettlementRecord::rejected(
                SettlementCode::TransactionNotFound,
            ));
        };
        if ledger_transaction.failed {
            return Ok(SettlementRecord::rejected(
                SettlementCode::TransactionFailed,
            ));
        }

        let transfers = checked_transfers(&ledger_transaction.transaction);
        let [transfer] = transfers.as_slice() else {
            return Ok(SettlementRecord::rejected(
                SettlementCode::NoTransferInstruction,
            ));
        };

        if transfer.mint != *self.asset.pubkey() {
            return Ok(SettlementRecord::rejected(SettlementCode::AssetMismatch));
        }

        let required_atomic =
            match timeout_as_unconfirmed(self.required_atomic(required_amount).await)? {
                Ok(Some(required_atomic)) => required_atomic,
                Ok(None) => {
                    return Ok(SettlementRecord::rejected(SettlementCode::AssetMismatch));
                }
                Err(record) => return Ok(record),
            };

        let owner =
            match timeout_as_unconfirmed(self.destination_owner(&transfer.destination).await)? {
                Ok(owner) => owner,
                Err(record) => return Ok(record),
            };
        if owner != Some(*recipient.pubkey()) {
            return Ok(SettlementRecord::rejected(
                SettlementCode::RecipientMismatch,
            ));
        }

        if transfer.amount < required_atomic {
            tracing::debug!(
                observed = transfer.amount,
                required = required_atomic,
                "Settlement amount below requirement"
            );
            return Ok(SettlementRecord::rejected(
                SettlementCode::AmountBelowRequired,
            ));
        }

        Ok(SettlementRecord::confirmed(transfer.amount))
    }

    /// Converts the required decimal amount to atomic units using the
    /// mint's on-chain decimal count. `None` when the mint account is
    /// absent, undecodable, or the conversion overflows.
    async fn required_atomic(&self, required_amount: Decimal) -> Result<Option<u64>, LedgerError> {
        let Some(account) = self.ledger.fetch_account(self.asset.pubkey()).await? else {
            return Ok(None);
        };
        let Ok(mint) = StateWithExtensions::<MintState>::unpack(&account.data) else {
            return Ok(None);
        };
        Ok(to_atomic(required_amount, mint.base.decimals))
    }

    /// Resolves the wallet that owns the destination token account, after
    /// checking the account actually belongs to a token program and holds
    /// the expected mint.
    async fn destination_owner(&self, destination: &Pubkey) -> Result<Option<Pubkey>, LedgerError> {
        let Some(account) = self.ledger.fetch_account(destination).await? else {
            return Ok(None);
        };
        if account.owner != spl_token::ID && account.owner != spl_token_2022::ID {
            return Ok(None);
        }
        let Ok(token_account) = StateWithExtensions::<TokenAccountState>::unpack(&account.data)
        else {
            return Ok(None);
        };
        if token_account.base.mint != *self.asset.pubkey() {
            return Ok(None);
        }
        Ok(Some(token_account.base.owner))
    }
}
