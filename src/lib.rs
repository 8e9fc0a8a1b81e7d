//! Per-request payment gating for HTTP APIs, settled on Solana.
//!
//! This crate implements an HTTP-native pay-per-call flow built on the
//! `402 Payment Required` status code. A protected endpoint answers unpaid
//! requests with a single-use challenge (a priced payment intent); the
//! client signs the challenge with its wallet key, settles it with an SPL
//! token transfer, and retries with proof-of-payment headers. The gate
//! verifies the signature locally and the transfer on-chain before letting
//! the request through.
//!
//! # Modules
//!
//! - [`pricing`] — Cost estimation: maps a model id and payload size to the amount owed.
//! - [`challenge`] — Challenge registry: mints, stores, and redeems single-use challenges.
//! - [`signature`] — Ed25519 wallet signature verification over the canonical challenge message.
//! - [`settlement`] — On-chain settlement verification against a Solana ledger.
//! - [`gate`] — The per-request decision combining all of the above.
//! - [`layer`] — Axum/tower middleware wrapping a route with the gate.
//! - [`proto`] — Wire types: proof-of-payment headers and the 402 challenge response.
//! - [`config`] — Server configuration (JSON file + environment fallbacks).
//! - [`chain`] — Solana address handling.
//! - [`timestamp`] — Unix timestamp type for challenge expiry windows.
//! - [`util`] — Money parsing, atomic-unit conversion, and signal handling.

pub mod chain;
pub mod challenge;
pub mod config;
pub mod gate;
pub mod layer;
pub mod pricing;
pub mod proto;
pub mod settlement;
pub mod signature;
pub mod telemetry;
pub mod timestamp;
pub mod util;
