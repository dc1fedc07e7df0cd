//! Wallet configuration, loaded from a TOML file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::WalletError;

fn default_db_path() -> PathBuf {
    PathBuf::from("veil-wallet.db")
}

#[derive(Clone, Debug, Deserialize)]
pub struct WalletConfig {
    /// Exchange base URL, e.g. `https://exchange.example.com/`.
    pub exchange_base_url: String,

    /// Currency this wallet operates in, e.g. `EUR`.
    pub currency: String,

    /// Path to the LMDB database directory.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Bank base URL for bank-integrated withdrawals. Manual funding
    /// only when absent.
    #[serde(default)]
    pub bank_base_url: Option<String>,
}

impl WalletConfig {
    pub fn load(path: &Path) -> Result<Self, WalletError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| WalletError::Internal(format!("cannot read config {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| WalletError::Internal(format!("invalid config {}: {e}", path.display())))
    }
}
