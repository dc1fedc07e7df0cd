//! Cryptographic primitives for the Veil wallet.
//!
//! - **Ed25519** for reserve, coin and master signatures
//! - **Blake2b** for hashing (coin pubs, denomination keys, envelopes)
//! - **Blinded BLS** over BLS12-381 for denomination signatures
//! - **X25519** for the refresh protocol's transfer secrets
//! - **HKDF** for deterministic planchet derivation

pub mod blind;
pub mod denom;
pub mod ecdh;
pub mod error;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod planchet;
pub mod refresh;
pub mod sign;

pub use blind::{validate_denom_pub, DenominationSigner, DENOM_PUB_LEN, ENVELOPE_LEN};
pub use denom::{denomination_validity_frame, is_valid_denom};
pub use ecdh::{transfer_keypair_from_seed, transfer_secret};
pub use error::CryptoError;
pub use hash::{blake2b_256, blake2b_256_multi, hash_coin_ev, hash_coin_pub, hash_denom_pub};
pub use kdf::kdf;
pub use keys::{
    ed25519_public_to_x25519, generate_keypair, generate_seed, keypair_from_seed,
    public_from_private,
};
pub use planchet::{
    create_tip_planchet, create_withdraw_planchet, setup_planchet, sign_recoup_request, Planchet,
    TipPlanchet,
};
pub use refresh::{
    derive_refresh_session, prepare_reveal, unblind_new_coins, NewCoin, RefreshSessionInput,
    RevealData,
};
pub use sign::{sign_frame, verify_frame};
