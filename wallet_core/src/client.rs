//! HTTP clients for the exchange and the bank.
//!
//! Typed wrappers over `reqwest`; no retry logic lives here, pacing is
//! entirely the retry scheduler's job. Drivers depend on the
//! [`ExchangeApi`] / [`BankApi`] traits so tests can substitute stubs.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use veil_types::records::ReserveTransaction;
use veil_types::{Amount, Timestamp};

use crate::error::WalletError;

// ── DTOs ────────────────────────────────────────────────────────────────

/// One denomination as listed by `GET /keys`. Binary fields are hex.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DenomInfo {
    pub denom_pub: String,
    pub value: Amount,
    pub fee_withdraw: Amount,
    pub fee_deposit: Amount,
    pub fee_refresh: Amount,
    pub fee_refund: Amount,
    pub stamp_start: Timestamp,
    pub stamp_expire_withdraw: Timestamp,
    pub stamp_expire_deposit: Timestamp,
    pub stamp_expire_legal: Timestamp,
    pub master_sig: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExchangeKeysResponse {
    pub master_public_key: String,
    pub currency: String,
    pub denoms: Vec<DenomInfo>,
    #[serde(default)]
    pub recoup: Vec<RevokedDenom>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevokedDenom {
    pub denom_pub_hash: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(default)]
    pub payto_uris: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReserveStatusResponse {
    pub balance: Amount,
    #[serde(default)]
    pub history: Vec<ReserveTransaction>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub denom_pub_hash: String,
    pub coin_ev: String,
    pub reserve_sig: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WithdrawResponse {
    /// Blinded signature over the submitted envelope.
    pub ev_sig: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeltRequest {
    pub session_hash: String,
    pub denom_pub_hash: String,
    pub value_with_fee: Amount,
    pub melt_fee: Amount,
    pub confirm_sig: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeltResponse {
    pub noreveal_index: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealRequest {
    /// Transfer private keys of every session except the hidden one.
    pub transfer_privs: Vec<String>,
    pub transfer_pub: String,
    /// Envelopes of the hidden session.
    pub coin_evs: Vec<String>,
    pub new_denom_pub_hashes: Vec<String>,
    pub link_sigs: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RevealResponse {
    /// Blinded signatures, one per new coin of the hidden session.
    pub ev_sigs: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BankWithdrawalStatus {
    #[serde(default)]
    pub selection_done: bool,
    #[serde(default)]
    pub transfer_done: bool,
    #[serde(default)]
    pub amount: Option<Amount>,
}

#[derive(Clone, Debug, Serialize)]
struct BankRegisterRequest<'a> {
    reserve_pub: &'a str,
    selected_exchange: &'a str,
}

// ── API traits ──────────────────────────────────────────────────────────

pub trait ExchangeApi {
    fn get_keys(&self) -> impl Future<Output = Result<ExchangeKeysResponse, WalletError>> + Send;

    fn get_wire(&self) -> impl Future<Output = Result<WireResponse, WalletError>> + Send;

    fn reserve_status(
        &self,
        reserve_pub: &str,
    ) -> impl Future<Output = Result<ReserveStatusResponse, WalletError>> + Send;

    fn withdraw(
        &self,
        reserve_pub: &str,
        req: &WithdrawRequest,
    ) -> impl Future<Output = Result<WithdrawResponse, WalletError>> + Send;

    fn melt(
        &self,
        coin_pub: &str,
        req: &MeltRequest,
    ) -> impl Future<Output = Result<MeltResponse, WalletError>> + Send;

    fn reveal(
        &self,
        session_hash: &str,
        req: &RevealRequest,
    ) -> impl Future<Output = Result<RevealResponse, WalletError>> + Send;
}

pub trait BankApi {
    /// Post the reserve key to the bank's withdrawal-operation URL.
    fn register_reserve(
        &self,
        status_url: &str,
        reserve_pub: &str,
        exchange_base_url: &str,
    ) -> impl Future<Output = Result<BankWithdrawalStatus, WalletError>> + Send;

    fn withdrawal_status(
        &self,
        status_url: &str,
    ) -> impl Future<Output = Result<BankWithdrawalStatus, WalletError>> + Send;
}

// ── reqwest implementation ──────────────────────────────────────────────

/// HTTP client for one exchange.
#[derive(Clone)]
pub struct ExchangeClient {
    http: reqwest::Client,
    base_url: String,
}

fn build_http() -> Result<reqwest::Client, WalletError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| WalletError::Network(format!("failed to create HTTP client: {e}")))
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, WalletError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(WalletError::Network(format!("exchange returned HTTP {status}")));
    }
    if !status.is_success() {
        return Err(WalletError::ProtocolViolation(format!(
            "unexpected HTTP {status}"
        )));
    }
    response
        .json()
        .await
        .map_err(|e| WalletError::ProtocolViolation(format!("invalid response body: {e}")))
}

impl ExchangeClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, WalletError> {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            http: build_http()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, WalletError> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| WalletError::Network(format!("request failed: {e}")))?;
        parse_response(response).await
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, WalletError> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| WalletError::Network(format!("request failed: {e}")))?;
        parse_response(response).await
    }
}

impl ExchangeApi for ExchangeClient {
    async fn get_keys(&self) -> Result<ExchangeKeysResponse, WalletError> {
        self.get_json("keys").await
    }

    async fn get_wire(&self) -> Result<WireResponse, WalletError> {
        self.get_json("wire").await
    }

    async fn reserve_status(&self, reserve_pub: &str) -> Result<ReserveStatusResponse, WalletError> {
        self.get_json(&format!("reserves/{reserve_pub}")).await
    }

    async fn withdraw(
        &self,
        reserve_pub: &str,
        req: &WithdrawRequest,
    ) -> Result<WithdrawResponse, WalletError> {
        self.post_json(&format!("reserves/{reserve_pub}/withdraw"), req)
            .await
    }

    async fn melt(&self, coin_pub: &str, req: &MeltRequest) -> Result<MeltResponse, WalletError> {
        self.post_json(&format!("coins/{coin_pub}/melt"), req).await
    }

    async fn reveal(
        &self,
        session_hash: &str,
        req: &RevealRequest,
    ) -> Result<RevealResponse, WalletError> {
        self.post_json(&format!("refreshes/{session_hash}/reveal"), req)
            .await
    }
}

/// HTTP client for the wallet's bank.
#[derive(Clone)]
pub struct BankClient {
    http: reqwest::Client,
}

impl BankClient {
    pub fn new() -> Result<Self, WalletError> {
        Ok(Self { http: build_http()? })
    }
}

impl BankApi for BankClient {
    async fn register_reserve(
        &self,
        status_url: &str,
        reserve_pub: &str,
        exchange_base_url: &str,
    ) -> Result<BankWithdrawalStatus, WalletError> {
        let body = BankRegisterRequest {
            reserve_pub,
            selected_exchange: exchange_base_url,
        };
        let response = self
            .http
            .post(status_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::Network(format!("request failed: {e}")))?;
        parse_response(response).await
    }

    async fn withdrawal_status(&self, status_url: &str) -> Result<BankWithdrawalStatus, WalletError> {
        let response = self
            .http
            .get(status_url)
            .send()
            .await
            .map_err(|e| WalletError::Network(format!("request failed: {e}")))?;
        parse_response(response).await
    }
}
