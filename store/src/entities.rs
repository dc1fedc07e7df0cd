//! Store and index declarations for every wallet record type.

use veil_types::records::{
    CoinRecord, DenominationRecord, ExchangeRecord, PlanchetRecord, RefreshGroupRecord,
    ReserveRecord, WithdrawalGroupRecord,
};

use crate::{Entity, IndexDef, StoreDef, StoreSchema};

/// Composite key for planchet slots: group id, then big-endian slot
/// index so slots of one group sort together in order.
pub fn planchet_key(withdrawal_group_id: &str, coin_idx: u32) -> Vec<u8> {
    let mut key = withdrawal_group_id.as_bytes().to_vec();
    key.extend_from_slice(&coin_idx.to_be_bytes());
    key
}

/// Composite key for denominations: exchange URL, then key hash.
pub fn denomination_key(exchange_base_url: &str, denom_pub_hash: &[u8]) -> Vec<u8> {
    let mut key = exchange_base_url.as_bytes().to_vec();
    key.extend_from_slice(denom_pub_hash);
    key
}

impl Entity for ExchangeRecord {
    const STORE_NAME: &'static str = "exchanges";

    fn primary_key(&self) -> Vec<u8> {
        self.base_url.as_bytes().to_vec()
    }
}

impl Entity for DenominationRecord {
    const STORE_NAME: &'static str = "denominations";

    fn primary_key(&self) -> Vec<u8> {
        denomination_key(&self.exchange_base_url, self.denom_pub_hash.as_bytes())
    }

    fn indexes() -> &'static [IndexDef<Self>] {
        &[IndexDef {
            name: "by_exchange",
            key: |d| Some(d.exchange_base_url.as_bytes().to_vec()),
        }]
    }
}

impl Entity for CoinRecord {
    const STORE_NAME: &'static str = "coins";

    fn primary_key(&self) -> Vec<u8> {
        self.coin_pub.0.to_vec()
    }

    fn indexes() -> &'static [IndexDef<Self>] {
        &[
            IndexDef {
                name: "by_exchange",
                key: |c| Some(c.exchange_base_url.as_bytes().to_vec()),
            },
            IndexDef {
                name: "by_denom",
                key: |c| Some(c.denom_pub_hash.as_bytes().to_vec()),
            },
        ]
    }
}

impl Entity for ReserveRecord {
    const STORE_NAME: &'static str = "reserves";

    fn primary_key(&self) -> Vec<u8> {
        self.reserve_pub.0.to_vec()
    }
}

impl Entity for WithdrawalGroupRecord {
    const STORE_NAME: &'static str = "withdrawal_groups";

    fn primary_key(&self) -> Vec<u8> {
        self.withdrawal_group_id.as_bytes().to_vec()
    }

    fn indexes() -> &'static [IndexDef<Self>] {
        &[IndexDef {
            name: "by_reserve",
            key: |g| Some(g.reserve_pub.0.to_vec()),
        }]
    }
}

impl Entity for PlanchetRecord {
    const STORE_NAME: &'static str = "planchets";

    fn primary_key(&self) -> Vec<u8> {
        planchet_key(&self.withdrawal_group_id, self.coin_idx)
    }

    fn indexes() -> &'static [IndexDef<Self>] {
        &[IndexDef {
            name: "by_group",
            key: |p| Some(p.withdrawal_group_id.as_bytes().to_vec()),
        }]
    }
}

impl Entity for RefreshGroupRecord {
    const STORE_NAME: &'static str = "refresh_groups";

    fn primary_key(&self) -> Vec<u8> {
        self.refresh_group_id.as_bytes().to_vec()
    }
}

fn store_def<T: Entity>() -> StoreDef {
    StoreDef {
        name: T::STORE_NAME,
        indexes: T::indexes().iter().map(|i| i.name).collect(),
    }
}

/// The complete wallet schema. Backends create one namespace per store
/// and per index listed here.
pub fn schema() -> StoreSchema {
    StoreSchema {
        stores: vec![
            store_def::<ExchangeRecord>(),
            store_def::<DenominationRecord>(),
            store_def::<CoinRecord>(),
            store_def::<ReserveRecord>(),
            store_def::<WithdrawalGroupRecord>(),
            store_def::<PlanchetRecord>(),
            store_def::<RefreshGroupRecord>(),
        ],
    }
}
