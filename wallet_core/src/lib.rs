//! Wallet core library for Veil.
//!
//! Implements the client side of the exchange protocol:
//! - Exchange key and denomination tracking with signature validation
//! - Reserve lifecycle from bank registration to depletion
//! - Blind-signature withdrawal of coins
//! - Refresh (melt/reveal) of partially spent coins
//! - Coin selection for payments under deposit-fee constraints
//! - A retry-driven scheduler tying it all together

pub mod client;
pub mod config;
pub mod denominations;
pub mod error;
pub mod history;
pub mod memo;
pub mod pay;
pub mod refresh;
pub mod reserves;
pub mod wallet;
pub mod withdraw;

pub use client::{BankApi, BankClient, ExchangeApi, ExchangeClient};
pub use config::WalletConfig;
pub use error::WalletError;
pub use pay::{select_pay_coins, CoinWithDenom, PaySelection};
pub use wallet::{Balance, PendingReport, Wallet};
