//! In-process document store with a bounded session pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{Lease, Pool, PoolError, Session};

const DEFAULT_CHECKOUT_TIMEOUT: Duration = Duration::from_secs(5);

type Collections = HashMap<String, Vec<Value>>;

/// Collections of JSON documents shared by every session of the pool.
///
/// At most `size` sessions are checked out at once; further checkouts wait
/// for a release, up to the checkout timeout. Cloning the pool is cheap and
/// yields a handle to the same store.
#[derive(Clone)]
pub struct MemoryPool {
    shared: Arc<Shared>,
}

struct Shared {
    collections: RwLock<Collections>,
    permits: Arc<Semaphore>,
    checkout_timeout: Duration,
    checkouts: AtomicUsize,
    releases: AtomicUsize,
    in_use: AtomicUsize,
}

impl MemoryPool {
    pub fn new(size: usize) -> Self {
        Self::with_timeout(size, DEFAULT_CHECKOUT_TIMEOUT)
    }

    pub fn with_timeout(size: usize, checkout_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                collections: RwLock::new(HashMap::new()),
                permits: Arc::new(Semaphore::new(size)),
                checkout_timeout,
                checkouts: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Total sessions handed out since creation.
    pub fn checkouts(&self) -> usize {
        self.shared.checkouts.load(Ordering::SeqCst)
    }

    /// Total sessions handed back since creation.
    pub fn releases(&self) -> usize {
        self.shared.releases.load(Ordering::SeqCst)
    }

    /// Sessions currently checked out.
    ///
    /// Kept as its own counter: the difference of two separate loads of
    /// `checkouts` and `releases` can be taken across a concurrent release.
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::SeqCst)
    }

    /// Rejects every future checkout. Sessions already out stay usable.
    pub fn close(&self) {
        self.shared.permits.close();
    }
}

#[async_trait]
impl Pool for MemoryPool {
    async fn checkout(&self) -> Result<Lease, PoolError> {
        let timeout = self.shared.checkout_timeout;
        let acquire = Arc::clone(&self.shared.permits).acquire_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed),
            Err(_) => return Err(PoolError::Exhausted(timeout)),
        };
        self.shared.checkouts.fetch_add(1, Ordering::SeqCst);
        self.shared.in_use.fetch_add(1, Ordering::SeqCst);
        Ok(Lease::new(Box::new(MemorySession {
            shared: Arc::clone(&self.shared),
            permit: Some(permit),
        })))
    }
}

struct MemorySession {
    shared: Arc<Shared>,
    permit: Option<OwnedSemaphorePermit>,
}

impl MemorySession {
    fn live(&self) -> Result<&Shared, PoolError> {
        match self.permit {
            Some(_) => Ok(&self.shared),
            None => Err(PoolError::Released),
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn find(&self, collection: &str, filter: &Value) -> Result<Vec<Value>, PoolError> {
        let filter = as_filter(filter)?;
        let collections = self.live()?
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<(), PoolError> {
        if !document.is_object() {
            return Err(PoolError::Document("documents must be JSON objects".into()));
        }
        self.live()?
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_owned())
            .or_default()
            .push(document);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        filter: &Value,
        changes: &Value,
    ) -> Result<usize, PoolError> {
        let filter = as_filter(filter)?;
        let Value::Object(changes) = changes else {
            return Err(PoolError::Document("changes must be a JSON object".into()));
        };
        let mut collections = self.live()?
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut touched = 0;
        for doc in docs.iter_mut().filter(|d| matches(d, filter)) {
            if let Value::Object(fields) = doc {
                fields.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn remove(&self, collection: &str, filter: &Value) -> Result<usize, PoolError> {
        let filter = as_filter(filter)?;
        let mut collections = self.live()?
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !matches(d, filter));
        Ok(before - docs.len())
    }

    fn release(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.shared.in_use.fetch_sub(1, Ordering::SeqCst);
            self.shared.releases.fetch_add(1, Ordering::SeqCst);
            drop(permit);
        }
    }
}

fn as_filter(filter: &Value) -> Result<Option<&Map<String, Value>>, PoolError> {
    match filter {
        Value::Null => Ok(None),
        Value::Object(fields) => Ok(Some(fields)),
        _ => Err(PoolError::Document("filters must be JSON objects".into())),
    }
}

fn matches(doc: &Value, filter: Option<&Map<String, Value>>) -> bool {
    let Some(filter) = filter else { return true };
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn documents_are_shared_across_sessions() {
        let pool = MemoryPool::new(2);
        let a = pool.checkout().await.unwrap();
        let b = pool.checkout().await.unwrap();

        a.insert("users", json!({"name": "ada", "age": 36})).await.unwrap();
        a.insert("users", json!({"name": "bob", "age": 20})).await.unwrap();

        let found = b.find("users", &json!({"name": "ada"})).await.unwrap();
        assert_eq!(found, vec![json!({"name": "ada", "age": 36})]);
        assert_eq!(b.find("users", &Value::Null).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_merges_and_remove_counts() {
        let pool = MemoryPool::new(1);
        let s = pool.checkout().await.unwrap();
        s.insert("cart", json!({"user": "u1", "items": 1})).await.unwrap();

        let n = s.update("cart", &json!({"user": "u1"}), &json!({"items": 3})).await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(s.find("cart", &json!({"items": 3})).await.unwrap().len(), 1);

        assert_eq!(s.remove("cart", &json!({"user": "nobody"})).await.unwrap(), 0);
        assert_eq!(s.remove("cart", &json!({})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn non_object_filter_is_rejected() {
        let pool = MemoryPool::new(1);
        let s = pool.checkout().await.unwrap();
        let err = s.find("users", &json!([1, 2])).await.unwrap_err();
        assert!(matches!(err, PoolError::Document(_)));
    }

    #[tokio::test]
    async fn dropping_a_lease_releases_once() {
        let pool = MemoryPool::new(1);
        let lease = pool.checkout().await.unwrap();
        assert_eq!(pool.in_use(), 1);
        drop(lease);
        assert_eq!(pool.checkouts(), 1);
        assert_eq!(pool.releases(), 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[tokio::test]
    async fn exhausted_pool_times_out() {
        let pool = MemoryPool::with_timeout(1, Duration::from_millis(20));
        let _held = pool.checkout().await.unwrap();
        let err = pool.checkout().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted(_)));
    }

    #[tokio::test]
    async fn waiting_checkout_succeeds_after_release() {
        let pool = MemoryPool::with_timeout(1, Duration::from_secs(1));
        let held = pool.checkout().await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.checkout().await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(held);
        waiter.await.unwrap().unwrap();
        assert_eq!(pool.releases(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_use_stays_in_range_under_churn() {
        let pool = MemoryPool::new(64);
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let mut churn = tokio::task::JoinSet::new();
        for _ in 0..3 {
            let pool = pool.clone();
            churn.spawn(async move {
                for _ in 0..5_000 {
                    drop(pool.checkout().await.unwrap());
                }
            });
        }
        let reader = {
            let pool = pool.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut max = 0;
                while !stop.load(Ordering::SeqCst) {
                    max = max.max(pool.in_use());
                }
                max
            })
        };

        while churn.join_next().await.is_some() {}
        stop.store(true, Ordering::SeqCst);
        let max = reader.join().unwrap();

        assert!(max <= 3, "saw {max} sessions in use");
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.checkouts(), 15_000);
        assert_eq!(pool.releases(), 15_000);
    }

    #[tokio::test]
    async fn closed_pool_rejects_checkout() {
        let pool = MemoryPool::new(1);
        pool.close();
        assert!(matches!(pool.checkout().await.unwrap_err(), PoolError::Closed));
    }
}
