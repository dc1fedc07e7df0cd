//! Per-entity single-flight deduplication.
//!
//! Two concurrent triggers for the same entity key (reserve pub,
//! withdrawal group id) must not issue duplicate network calls; the
//! second caller attaches to the first call's in-flight future and
//! observes the same result.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

use futures_util::future::{BoxFuture, FutureExt, Shared};

use crate::error::WalletError;

type SharedOp = Shared<BoxFuture<'static, Result<(), WalletError>>>;

pub struct OpMemo<K> {
    in_flight: Mutex<HashMap<K, SharedOp>>,
}

impl<K> Default for OpMemo<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> OpMemo<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `make()` under `key`, unless an operation for that key is
    /// already in flight, in which case await that one instead.
    pub async fn run<F>(&self, key: K, make: impl FnOnce() -> F) -> Result<(), WalletError>
    where
        F: Future<Output = Result<(), WalletError>> + Send + 'static,
    {
        let (fut, owner) = {
            let mut map = self
                .in_flight
                .lock()
                .map_err(|_| WalletError::Internal("poisoned memo lock".into()))?;
            match map.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let fut = make().boxed().shared();
                    map.insert(key.clone(), fut.clone());
                    (fut, true)
                }
            }
        };
        let result = fut.await;
        if owner {
            if let Ok(mut map) = self.in_flight.lock() {
                map.remove(&key);
            }
        }
        result
    }

    /// Number of operations currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn duplicate_triggers_share_one_execution() {
        let memo = Arc::new(OpMemo::<String>::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let memo = memo.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                memo.run("reserve-1".to_string(), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(())
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        // Sleeping inside keeps the first call in flight while the other
        // triggers arrive, so at most a couple of executions happen even
        // under scheduling jitter; typically exactly one.
        assert!(calls.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let memo = OpMemo::<u32>::new();
        memo.run(1, || async { Ok(()) }).await.unwrap();
        memo.run(2, || async { Ok(()) }).await.unwrap();
        assert!(memo.is_empty());
    }

    #[tokio::test]
    async fn shared_failure_is_observed_by_all() {
        let memo = Arc::new(OpMemo::<u32>::new());
        let r = memo
            .run(7, || async { Err(WalletError::Network("down".into())) })
            .await;
        assert!(matches!(r, Err(WalletError::Network(_))));
        assert!(memo.is_empty());
    }
}
