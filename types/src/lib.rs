//! Fundamental types for the veil wallet.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: fixed-point amounts, timestamps, key and hash newtypes, the
//! signature-purpose codec, durable record types, state enums, retry
//! bookkeeping and protocol parameters.

pub mod amount;
pub mod error;
pub mod hash;
pub mod keys;
pub mod params;
pub mod purpose;
pub mod records;
pub mod retry;
pub mod state;
pub mod time;

pub use amount::{Amount, AmountResult, FRACTIONAL_BASE, MAX_AMOUNT_VALUE};
pub use error::VeilError;
pub use hash::HashCode;
pub use keys::{KeyPair, PrivateKey, PublicKey, SecretSeed, Signature};
pub use params::WalletParams;
pub use purpose::{PurposeBuilder, SignaturePurpose};
pub use records::{
    CoinRecord, DenomSelItem, DenomSelection, DenominationRecord, ExchangeRecord, PlanchetRecord,
    RefreshGroupRecord, RefreshPlanchet, RefreshSessionRecord, ReserveHistoryItem, ReserveRecord,
    ReserveTransaction, WithdrawalGroupRecord,
};
pub use retry::RetryInfo;
pub use state::{CoinSource, CoinStatus, DenominationStatus, RefreshSessionStatus, ReserveStatus};
pub use time::Timestamp;
