//! Protocol and scheduling parameters.

use serde::{Deserialize, Serialize};

/// Tunable constants of the wallet protocol engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalletParams {
    /// Number of parallel cut-and-choose candidate sessions per refresh.
    /// The exchange reveals all but one; three bounds the cheating
    /// probability at 1/3 per attempt, which compounds to negligible.
    pub kappa: u32,

    /// Base retry delay in milliseconds.
    pub retry_backoff_delta_ms: u64,

    /// Exponential retry growth factor.
    pub retry_backoff_base: f64,

    /// Safety margin (seconds) before a denomination's withdraw expiry
    /// within which we no longer withdraw into it.
    pub withdraw_safety_margin_secs: u64,

    /// Iteration cap for greedy denomination packing, guarding against
    /// pathological denomination sets.
    pub denom_selection_iteration_cap: u32,
}

impl WalletParams {
    pub fn defaults() -> Self {
        Self {
            kappa: 3,
            retry_backoff_delta_ms: 200,
            retry_backoff_base: 1.5,
            withdraw_safety_margin_secs: 50,
            denom_selection_iteration_cap: 1000,
        }
    }
}

impl Default for WalletParams {
    fn default() -> Self {
        Self::defaults()
    }
}
