//! Refresh driver: melting residual coin value into fresh coins.
//!
//! A refresh group batches several old coins. Each coin gets its own
//! cut-and-choose session derived up front and persisted, so every later
//! step can be replayed after a crash: melt, reveal and unblinding all
//! work from stored session material. Coins whose residue is too small
//! to buy any denomination are written off instead.

use tracing::{debug, info, warn};

use veil_crypto::refresh::{derive_refresh_session, prepare_reveal, unblind_new_coins};
use veil_crypto::{generate_seed, RefreshSessionInput};
use veil_store::entities::denomination_key;
use veil_store::{Db, TxAction};
use veil_types::records::{
    CoinRecord, DenominationRecord, RefreshGroupRecord, RefreshSessionRecord,
};
use veil_types::{
    CoinSource, CoinStatus, PublicKey, RefreshSessionStatus, RetryInfo, Timestamp, WalletParams,
};

use crate::client::{ExchangeApi, MeltRequest, RevealRequest};
use crate::error::WalletError;
use crate::withdraw::get_withdraw_denom_list;

/// Create a refresh group over `old_coin_pubs` and mark the old coins
/// dormant, all in one transaction. Returns the group id.
pub fn create_refresh_group(
    db: &Db,
    exchange_base_url: &str,
    old_coin_pubs: &[PublicKey],
    params: &WalletParams,
) -> Result<String, WalletError> {
    let denoms: Vec<DenominationRecord> = db
        .read()?
        .get_by_index("by_exchange", exchange_base_url.as_bytes())?;

    let group_id = veil_utils::ids::random_id();
    let mut sessions: Vec<Option<RefreshSessionRecord>> = Vec::with_capacity(old_coin_pubs.len());
    let mut finished: Vec<bool> = Vec::with_capacity(old_coin_pubs.len());
    let mut melted_coins: Vec<CoinRecord> = Vec::new();

    {
        let read = db.read()?;
        for coin_pub in old_coin_pubs {
            let Some(coin) = read.get::<CoinRecord>(&coin_pub.0)? else {
                return Err(WalletError::Internal(format!(
                    "refresh group references unknown coin {}",
                    hex::encode(coin_pub.0)
                )));
            };
            let Some(old_denom) = read.get::<DenominationRecord>(&denomination_key(
                exchange_base_url,
                coin.denom_pub_hash.as_bytes(),
            ))?
            else {
                return Err(WalletError::Internal(
                    "coin references unknown denomination".into(),
                ));
            };

            let available = coin.current_amount.sub(&old_denom.fee_refresh).amount;
            let list = get_withdraw_denom_list(&available, &denoms);
            if list.selected.is_empty() {
                // Residue below the smallest denomination: write it off.
                debug!(
                    coin = %hex::encode(coin_pub.0),
                    residue = %coin.current_amount,
                    "residue not refreshable, writing off"
                );
                sessions.push(None);
                finished.push(true);
            } else {
                let seeds: Vec<_> = (0..params.kappa).map(|_| generate_seed()).collect();
                let session = derive_refresh_session(&RefreshSessionInput {
                    kappa: params.kappa,
                    melt_coin_pub: coin.coin_pub,
                    melt_coin_priv: &coin.coin_priv,
                    melt_denom_pub_hash: coin.denom_pub_hash,
                    melt_fee: old_denom.fee_refresh.clone(),
                    new_denoms: &list.selected,
                    transfer_seeds: &seeds,
                })?;
                sessions.push(Some(session));
                finished.push(false);
            }

            let mut melted = coin;
            melted.status = CoinStatus::Dormant;
            melted.current_amount = veil_types::Amount::zero(melted.current_amount.currency.clone());
            melted_coins.push(melted);
        }
    }

    let group = RefreshGroupRecord {
        refresh_group_id: group_id.clone(),
        exchange_base_url: exchange_base_url.to_string(),
        old_coin_pubs: old_coin_pubs.to_vec(),
        sessions,
        finished_per_coin: finished,
        timestamp_created: Timestamp::now(),
        timestamp_finished: None,
        retry_info: RetryInfo::new(veil_utils::time::now_millis(), true, params),
        last_error: None,
    };
    let already_done = group.is_finished();

    db.with_write(|tx| {
        let mut group = group.clone();
        if already_done {
            group.timestamp_finished = Some(Timestamp::now());
            group.retry_info.active = false;
        }
        tx.put(&group)?;
        for coin in &melted_coins {
            tx.put(coin)?;
        }
        Ok(TxAction::Commit(()))
    })?;
    info!(
        group = %group_id,
        coins = old_coin_pubs.len(),
        "refresh group created"
    );
    Ok(group_id)
}

fn hex_seed(seed: &veil_types::SecretSeed) -> String {
    hex::encode(seed.as_bytes())
}

fn store_session(
    db: &Db,
    group_id: &str,
    coin_idx: usize,
    session: &RefreshSessionRecord,
) -> Result<(), WalletError> {
    db.with_write(|tx| {
        let Some(mut group) = tx.get::<RefreshGroupRecord>(group_id.as_bytes())? else {
            return Ok(TxAction::Abort(()));
        };
        group.sessions[coin_idx] = Some(session.clone());
        tx.put(&group)?;
        Ok(TxAction::Commit(()))
    })?;
    Ok(())
}

/// Melt the old coin: the exchange commits to one hidden session.
async fn melt_session<C: ExchangeApi + Sync>(
    db: &Db,
    client: &C,
    group_id: &str,
    coin_idx: usize,
    session: &RefreshSessionRecord,
    params: &WalletParams,
) -> Result<RefreshSessionRecord, WalletError> {
    let req = MeltRequest {
        session_hash: session.session_hash.to_string(),
        denom_pub_hash: hex::encode(session.melt_denom_pub_hash.as_bytes()),
        value_with_fee: session.amount_refresh_input.clone(),
        melt_fee: session.melt_fee.clone(),
        confirm_sig: hex::encode(session.confirm_sig.0),
    };
    let coin_pub_hex = hex::encode(session.old_coin_pub.0);
    let response = client.melt(&coin_pub_hex, &req).await?;
    if response.noreveal_index >= params.kappa {
        return Err(WalletError::ProtocolViolation(format!(
            "noreveal index {} outside [0, {})",
            response.noreveal_index, params.kappa
        )));
    }

    let mut melted = session.clone();
    melted.noreveal_index = Some(response.noreveal_index);
    melted.status = RefreshSessionStatus::Melted;
    store_session(db, group_id, coin_idx, &melted)?;
    debug!(
        group = group_id,
        coin = coin_idx,
        noreveal = response.noreveal_index,
        "melt accepted"
    );
    Ok(melted)
}

/// Reveal all but the hidden session, collect the blinded signatures
/// for the hidden session's planchets and persist the new coins.
async fn reveal_session<C: ExchangeApi + Sync>(
    db: &Db,
    client: &C,
    exchange_base_url: &str,
    group_id: &str,
    coin_idx: usize,
    session: &RefreshSessionRecord,
) -> Result<(), WalletError> {
    let Some(noreveal_index) = session.noreveal_index else {
        return Err(WalletError::Internal(
            "revealing a session that was never melted".into(),
        ));
    };
    let Some(old_coin) = db.read()?.get::<CoinRecord>(&session.old_coin_pub.0)? else {
        return Err(WalletError::Internal("melted coin vanished".into()));
    };
    let reveal = prepare_reveal(session, noreveal_index, &old_coin.coin_priv)?;

    // From here on the reveal may reach the exchange; record that before
    // sending so a crash resumes by re-revealing, which is idempotent.
    if session.status != RefreshSessionStatus::Revealed {
        let mut marked = session.clone();
        marked.status = RefreshSessionStatus::Revealed;
        store_session(db, group_id, coin_idx, &marked)?;
    }

    let req = RevealRequest {
        transfer_privs: reveal.transfer_privs.iter().map(hex_seed).collect(),
        transfer_pub: hex::encode(session.transfer_pubs[noreveal_index as usize].0),
        coin_evs: reveal
            .reveal_planchets
            .iter()
            .map(|p| hex::encode(&p.coin_ev))
            .collect(),
        new_denom_pub_hashes: session
            .new_denom_hashes
            .iter()
            .map(|h| hex::encode(h.as_bytes()))
            .collect(),
        link_sigs: reveal.link_sigs.iter().map(|s| hex::encode(s.0)).collect(),
    };
    let session_hash_hex = session.session_hash.to_string();
    let response = client.reveal(&session_hash_hex, &req).await?;

    let mut blinded_sigs = Vec::with_capacity(response.ev_sigs.len());
    for sig in &response.ev_sigs {
        blinded_sigs.push(
            hex::decode(sig)
                .map_err(|e| WalletError::ProtocolViolation(format!("ev_sig not hex: {e}")))?,
        );
    }

    let mut new_denom_pubs = Vec::with_capacity(session.new_denom_hashes.len());
    {
        let read = db.read()?;
        for hash in &session.new_denom_hashes {
            let denom = read
                .get::<DenominationRecord>(&denomination_key(exchange_base_url, hash.as_bytes()))?
                .ok_or_else(|| {
                    WalletError::Internal("refresh target denomination vanished".into())
                })?;
            new_denom_pubs.push((denom.denom_pub, denom.value));
        }
    }
    let pubs: Vec<Vec<u8>> = new_denom_pubs.iter().map(|(p, _)| p.clone()).collect();
    let new_coins = unblind_new_coins(session, noreveal_index, &blinded_sigs, &pubs)?;

    db.with_write(|tx| {
        let Some(mut group) = tx.get::<RefreshGroupRecord>(group_id.as_bytes())? else {
            return Ok(TxAction::Abort(()));
        };
        for (coin, (_, value)) in new_coins.iter().zip(&new_denom_pubs) {
            tx.put(&CoinRecord {
                coin_pub: coin.coin_pub,
                coin_priv: coin.coin_priv.clone(),
                exchange_base_url: exchange_base_url.to_string(),
                denom_pub_hash: coin.denom_pub_hash,
                denom_sig: coin.denom_sig.clone(),
                blinding_seed: coin.blinding_seed.clone(),
                current_amount: value.clone(),
                status: CoinStatus::Fresh,
                coin_source: CoinSource::Refresh {
                    old_coin_pub: session.old_coin_pub,
                },
            })?;
        }
        if let Some(s) = group.sessions[coin_idx].as_mut() {
            s.status = RefreshSessionStatus::Finished;
        }
        group.finished_per_coin[coin_idx] = true;
        if group.is_finished() {
            group.timestamp_finished = Some(Timestamp::now());
            group.retry_info.active = false;
        }
        tx.put(&group)?;
        Ok(TxAction::Commit(()))
    })?;
    info!(
        group = group_id,
        coin = coin_idx,
        new_coins = new_coins.len(),
        "refresh session finished"
    );
    Ok(())
}

/// Drive every unfinished session of a refresh group as far as the
/// exchange lets us. One failing session does not block the others.
pub async fn process_refresh_group<C: ExchangeApi + Sync>(
    db: &Db,
    client: &C,
    refresh_group_id: &str,
    params: &WalletParams,
) -> Result<(), WalletError> {
    let Some(group) = db
        .read()?
        .get::<RefreshGroupRecord>(refresh_group_id.as_bytes())?
    else {
        warn!(group = refresh_group_id, "refresh group not found");
        return Ok(());
    };
    if group.timestamp_finished.is_some() {
        return Ok(());
    }

    let mut first_error: Option<WalletError> = None;
    for coin_idx in 0..group.sessions.len() {
        if group.finished_per_coin[coin_idx] {
            continue;
        }
        let Some(session) = group.sessions[coin_idx].clone() else {
            continue;
        };
        let result = advance_session(
            db,
            client,
            &group.exchange_base_url,
            refresh_group_id,
            coin_idx,
            session,
            params,
        )
        .await;
        if let Err(e) = result {
            if first_error.is_none() {
                first_error = Some(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

async fn advance_session<C: ExchangeApi + Sync>(
    db: &Db,
    client: &C,
    exchange_base_url: &str,
    group_id: &str,
    coin_idx: usize,
    session: RefreshSessionRecord,
    params: &WalletParams,
) -> Result<(), WalletError> {
    let session = match session.status {
        RefreshSessionStatus::Created => {
            melt_session(db, client, group_id, coin_idx, &session, params).await?
        }
        RefreshSessionStatus::Melted | RefreshSessionStatus::Revealed => session,
        RefreshSessionStatus::Finished => return Ok(()),
    };
    reveal_session(db, client, exchange_base_url, group_id, coin_idx, &session).await
}
