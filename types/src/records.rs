//! Durable record types held in the wallet store.
//!
//! Records reference each other by public key or id, never by embedded
//! pointer; all relations resolve through store lookups.

use crate::amount::Amount;
use crate::hash::HashCode;
use crate::keys::{PublicKey, SecretSeed, Signature};
use crate::retry::RetryInfo;
use crate::state::{
    CoinSource, CoinStatus, DenominationStatus, RefreshSessionStatus, ReserveStatus,
};
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// An exchange the wallet talks to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeRecord {
    pub base_url: String,
    pub master_pub: PublicKey,
    pub currency: String,
    pub last_keys_update: Timestamp,
}

/// One denomination offered by an exchange.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DenominationRecord {
    pub exchange_base_url: String,
    /// Compressed BLS public key of the denomination.
    pub denom_pub: Vec<u8>,
    pub denom_pub_hash: HashCode,
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub fee_deposit: Amount,
    pub fee_refresh: Amount,
    pub fee_refund: Amount,
    pub stamp_start: Timestamp,
    pub stamp_expire_withdraw: Timestamp,
    pub stamp_expire_deposit: Timestamp,
    pub stamp_expire_legal: Timestamp,
    /// Exchange master signature over the validity statement.
    pub master_sig: Signature,
    pub status: DenominationStatus,
    pub is_offered: bool,
    pub is_revoked: bool,
}

/// A coin the wallet owns or once owned. Never deleted; Dormant coins
/// stay for audit and recoup.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoinRecord {
    pub coin_pub: PublicKey,
    pub coin_priv: SecretSeed,
    pub exchange_base_url: String,
    pub denom_pub_hash: HashCode,
    /// Unblinded denomination signature (compressed BLS point).
    pub denom_sig: Vec<u8>,
    /// Blinding seed used at withdrawal; needed for recoup.
    pub blinding_seed: SecretSeed,
    /// Remaining spendable value.
    pub current_amount: Amount,
    pub status: CoinStatus,
    pub coin_source: CoinSource,
}

/// A remote transaction reported in the exchange's reserve history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ReserveTransaction {
    #[serde(rename = "CREDIT")]
    Credit {
        amount: Amount,
        sender_account_url: String,
        wire_reference: String,
        timestamp: Timestamp,
    },
    #[serde(rename = "WITHDRAW")]
    Withdraw {
        amount: Amount,
        withdraw_fee: Amount,
        /// Hex hash of the denomination public key.
        h_denom_pub: String,
        /// Hex hash of the blinded coin envelope.
        h_coin_envelope: String,
        reserve_sig: String,
    },
    #[serde(rename = "RECOUP")]
    Recoup {
        amount: Amount,
        coin_pub: String,
        timestamp: Timestamp,
        exchange_sig: String,
    },
    #[serde(rename = "CLOSING")]
    Closing {
        amount: Amount,
        closing_fee: Amount,
        wtid: String,
        timestamp: Timestamp,
    },
}

/// Local expectation (or confirmed observation) of one reserve history
/// entry. `matched` is filled once the exchange reported the entry; a
/// matched entry never becomes unmatched again.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ReserveHistoryItem {
    Credit {
        expected_amount: Option<Amount>,
        matched: Option<ReserveTransaction>,
    },
    Withdraw {
        expected_amount: Option<Amount>,
        /// Envelope hash (hex) of the planchet we expect the exchange to
        /// report; key for matching.
        expected_coin_ev_hash: Option<String>,
        matched: Option<ReserveTransaction>,
    },
    Recoup {
        expected_amount: Option<Amount>,
        matched: Option<ReserveTransaction>,
    },
    Closing {
        matched: Option<ReserveTransaction>,
    },
}

/// A funded (or to-be-funded) account at the exchange.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReserveRecord {
    pub reserve_pub: PublicKey,
    pub reserve_priv: SecretSeed,
    pub exchange_base_url: String,
    pub currency: String,
    pub created: Timestamp,
    /// What the user asked to withdraw.
    pub instructed_amount: Amount,
    pub status: ReserveStatus,
    /// Bank withdrawal-operation status URL, for bank-integrated flows.
    pub bank_withdraw_status_url: Option<String>,
    /// Set once the bank confirmed the transfer.
    pub timestamp_bank_confirmed: Option<Timestamp>,
    /// Set once the reserve key was registered with the bank.
    pub timestamp_reserve_info_posted: Option<Timestamp>,
    /// Local view of the reserve history.
    pub history: Vec<ReserveHistoryItem>,
    pub retry_info: RetryInfo,
    pub last_error: Option<String>,
}

/// Which denominations a withdrawal episode uses, and how often.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenomSelItem {
    pub denom_pub_hash: HashCode,
    pub count: u32,
}

/// Outcome of denomination selection for a given raw amount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DenomSelection {
    pub selected: Vec<DenomSelItem>,
    /// Sum of coin values in the selection.
    pub total_coin_value: Amount,
    /// Sum of value + withdraw fee over all coins.
    pub total_withdraw_cost: Amount,
}

/// One reserve-draining withdrawal episode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawalGroupRecord {
    pub withdrawal_group_id: String,
    pub reserve_pub: PublicKey,
    pub exchange_base_url: String,
    /// Seed all planchets of this group are derived from.
    pub secret_seed: SecretSeed,
    pub raw_withdrawal_amount: Amount,
    pub denoms_sel: DenomSelection,
    pub timestamp_start: Timestamp,
    pub timestamp_finish: Option<Timestamp>,
    pub retry_info: RetryInfo,
    pub last_error: Option<String>,
}

/// Per-coin-slot planchet of a withdrawal group. Created lazily and
/// idempotently by the fan-out tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanchetRecord {
    pub withdrawal_group_id: String,
    pub coin_idx: u32,
    pub coin_pub: PublicKey,
    pub coin_priv: SecretSeed,
    pub blinding_seed: SecretSeed,
    pub denom_pub_hash: HashCode,
    /// Blinded envelope submitted to the exchange.
    pub coin_ev: Vec<u8>,
    pub coin_ev_hash: HashCode,
    /// Signature by the reserve key authorizing this withdrawal.
    pub withdraw_sig: Signature,
    /// Set once the coin has been persisted.
    pub withdrawal_done: bool,
}

/// Planchet of one refresh candidate session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshPlanchet {
    pub coin_pub: PublicKey,
    pub coin_priv: SecretSeed,
    pub blinding_seed: SecretSeed,
    pub coin_ev: Vec<u8>,
}

/// Cut-and-choose refresh session for one melted coin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshSessionRecord {
    pub old_coin_pub: PublicKey,
    pub melt_denom_pub_hash: HashCode,
    pub amount_refresh_input: Amount,
    pub amount_refresh_output: Amount,
    pub melt_fee: Amount,
    /// New denominations, one entry per new coin (hash repeated per coin).
    pub new_denom_hashes: Vec<HashCode>,
    /// kappa ECDHE transfer key pairs.
    pub transfer_privs: Vec<SecretSeed>,
    pub transfer_pubs: Vec<PublicKey>,
    /// kappa candidate planchet sets, `planchets[session][coin]`.
    pub planchets: Vec<Vec<RefreshPlanchet>>,
    pub session_hash: HashCode,
    /// Melt authorization by the old coin.
    pub confirm_sig: Signature,
    /// Chosen by the exchange after melt; never by the wallet.
    pub noreveal_index: Option<u32>,
    pub status: RefreshSessionStatus,
}

/// A batch of coins being refreshed together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RefreshGroupRecord {
    pub refresh_group_id: String,
    pub exchange_base_url: String,
    pub old_coin_pubs: Vec<PublicKey>,
    /// One slot per old coin; `None` when the residual value was written
    /// off instead of refreshed.
    pub sessions: Vec<Option<RefreshSessionRecord>>,
    pub finished_per_coin: Vec<bool>,
    pub timestamp_created: Timestamp,
    pub timestamp_finished: Option<Timestamp>,
    pub retry_info: RetryInfo,
    pub last_error: Option<String>,
}

impl RefreshGroupRecord {
    pub fn is_finished(&self) -> bool {
        self.finished_per_coin.iter().all(|f| *f)
    }
}
