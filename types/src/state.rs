//! State enums for reserves, coins, denominations and refresh sessions.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a reserve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReserveStatus {
    /// Created locally; the funding wire has not been initiated.
    Unconfirmed,
    /// Registering the reserve key with the bank's withdrawal operation.
    RegisteringBank,
    /// Waiting for the bank to confirm the wire transfer.
    WaitConfirmBank,
    /// Polling the exchange for the reserve balance.
    QueryingStatus,
    /// Funds detected; a withdrawal group is draining the reserve.
    Withdrawing,
    /// Depleted (or abandoned); no further processing.
    Dormant,
}

impl ReserveStatus {
    /// Whether the pending-operation loop still has work for this reserve.
    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Dormant)
    }
}

/// Spendability of a coin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoinStatus {
    /// Spendable.
    Fresh,
    /// Melted or fully spent; kept for audit and recoup.
    Dormant,
}

impl CoinStatus {
    pub fn is_spendable(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// How a coin came into existence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoinSource {
    Withdraw {
        reserve_pub: crate::keys::PublicKey,
        coin_index: u32,
    },
    Refresh {
        old_coin_pub: crate::keys::PublicKey,
    },
    Tip,
}

/// Result of checking the exchange master signature over a denomination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenominationStatus {
    /// Validation deferred.
    Unverified,
    /// Master signature checked out.
    VerifiedGood,
    /// Master signature is bad; never offer this denomination again.
    VerifiedBad,
}

impl DenominationStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Unverified | Self::VerifiedGood)
    }
}

/// Phase of a refresh session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefreshSessionStatus {
    Created,
    Melted,
    Revealed,
    Finished,
}
