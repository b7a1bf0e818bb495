//! The process-wide cache registry.
//!
//! Typed stores for inlined images, backgrounds, generic resources, font
//! URLs, per-tag default styles and reusable style classes — plus the two
//! behaviours that make concurrent captures cheap: single-flight
//! memoization (duplicate fetches for one key coalesce into a single
//! outstanding operation) and a negative-result cooldown (a failed fetch is
//! remembered for a few seconds and fails fast without touching the network,
//! without ever poisoning the positive caches).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::Shared;
use rustc_hash::{FxHashMap, FxHashSet};
use snapdom_dom::StyleMap;

use crate::fetch::FailureReason;
use crate::options::CachePolicy;

/// How long a failed fetch short-circuits retries for the same key.
pub const NEGATIVE_COOLDOWN: Duration = Duration::from_secs(5);

/// How long a registry counts as "fresh" for the `Auto` cache policy.
const AUTO_FRESH_WINDOW: Duration = Duration::from_secs(30);

type Flight = Shared<Pin<Box<dyn Future<Output = Result<String, FailureReason>> + Send>>>;

/// Positive stores a fetched value can land in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bucket {
    /// Absolute URL → data URI
    Image,
    /// Encoded url key → data URI (single CSS `url(...)` entry)
    Background,
    /// Arbitrary string key → data URI or text
    Resource,
}

struct NegativeEntry {
    at: Instant,
    reason: FailureReason,
}

#[derive(Default)]
struct BaseStyleStore {
    classes: FxHashMap<String, String>,
    seq: usize,
}

/// The only shared mutable state in the pipeline. Outlives individual
/// captures; cheap to clone behind an [`Arc`].
#[derive(Default)]
pub struct CacheRegistry {
    image: Mutex<FxHashMap<String, String>>,
    background: Mutex<FxHashMap<String, String>>,
    resource: Mutex<FxHashMap<String, String>>,
    /// Font URLs already inlined — presence means "do not refetch".
    font: Mutex<FxHashSet<String>>,
    default_style: Mutex<FxHashMap<String, Arc<StyleMap>>>,
    base_style: Mutex<BaseStyleStore>,
    negative: Mutex<FxHashMap<String, NegativeEntry>>,
    in_flight: Mutex<FxHashMap<String, Flight>>,
    first_use: Mutex<Option<Instant>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // ------- positive stores -------

    fn bucket(&self, bucket: Bucket) -> &Mutex<FxHashMap<String, String>> {
        match bucket {
            Bucket::Image => &self.image,
            Bucket::Background => &self.background,
            Bucket::Resource => &self.resource,
        }
    }

    pub fn get(&self, bucket: Bucket, key: &str) -> Option<String> {
        self.bucket(bucket).lock().unwrap().get(key).cloned()
    }

    pub fn set(&self, bucket: Bucket, key: impl Into<String>, value: impl Into<String>) {
        self.bucket(bucket)
            .lock()
            .unwrap()
            .insert(key.into(), value.into());
    }

    pub fn remove(&self, bucket: Bucket, key: &str) -> Option<String> {
        self.bucket(bucket).lock().unwrap().remove(key)
    }

    pub fn clear(&self, bucket: Bucket) {
        self.bucket(bucket).lock().unwrap().clear();
    }

    // ------- font URL set -------

    pub fn font_seen(&self, url: &str) -> bool {
        self.font.lock().unwrap().contains(url)
    }

    pub fn mark_font(&self, url: impl Into<String>) {
        self.font.lock().unwrap().insert(url.into());
    }

    // ------- default styles / reusable classes -------

    pub fn default_style(&self, tag: &str) -> Option<Arc<StyleMap>> {
        self.default_style.lock().unwrap().get(tag).cloned()
    }

    pub fn default_style_or_insert_with(
        &self,
        tag: &str,
        build: impl FnOnce() -> StyleMap,
    ) -> Arc<StyleMap> {
        self.default_style
            .lock()
            .unwrap()
            .entry(tag.to_string())
            .or_insert_with(|| Arc::new(build()))
            .clone()
    }

    /// Returns the short reusable class (`c1`, `c2`, ...) for a style key,
    /// allocating one on first sight.
    pub fn class_for_style_key(&self, key: &str) -> String {
        let mut store = self.base_style.lock().unwrap();
        if let Some(class) = store.classes.get(key) {
            return class.clone();
        }
        store.seq += 1;
        let class = format!("c{}", store.seq);
        store.classes.insert(key.to_string(), class.clone());
        class
    }

    // ------- negative cache -------

    /// Remembers a failure; subsequent lookups within the cooldown window
    /// fail fast.
    pub fn note_failure(&self, key: impl Into<String>, reason: FailureReason) {
        self.negative.lock().unwrap().insert(
            key.into(),
            NegativeEntry {
                at: Instant::now(),
                reason,
            },
        );
    }

    /// An active cooldown for the key, if any. Expired entries are dropped.
    pub fn active_cooldown(&self, key: &str) -> Option<FailureReason> {
        let mut negative = self.negative.lock().unwrap();
        match negative.get(key) {
            Some(entry) if entry.at.elapsed() < NEGATIVE_COOLDOWN => Some(entry.reason),
            Some(_) => {
                negative.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn clear_negative(&self) {
        self.negative.lock().unwrap().clear();
    }

    /// Drops memo entries for a key so the next capture may retry at once.
    pub fn forget(&self, bucket: Bucket, key: &str) {
        self.remove(bucket, key);
        self.negative.lock().unwrap().remove(key);
    }

    // ------- policy -------

    /// Resolves `Auto` against the registry's age and stamps first use.
    pub fn effective_policy(&self, policy: CachePolicy) -> CachePolicy {
        let mut first_use = self.first_use.lock().unwrap();
        let first = *first_use.get_or_insert_with(Instant::now);
        match policy {
            CachePolicy::Auto => {
                if first.elapsed() < AUTO_FRESH_WINDOW {
                    CachePolicy::Full
                } else {
                    CachePolicy::Soft
                }
            }
            other => other,
        }
    }

    /// Applies a capture's cache policy at capture start.
    pub fn apply_policy(&self, policy: CachePolicy) -> CachePolicy {
        let policy = self.effective_policy(policy);
        if policy == CachePolicy::Soft {
            self.clear_negative();
        }
        policy
    }

    // ------- single flight -------

    /// Memoized fetch with in-flight coalescing.
    ///
    /// Returns `(value, from_cache)`. While a fetch for `key` is pending,
    /// concurrent callers await the same flight; only a success is written
    /// to the positive store. With [`CachePolicy::Disabled`] the registry is
    /// bypassed entirely (no reads, writes, cooldowns or coalescing).
    pub async fn get_or_fetch<F>(
        &self,
        bucket: Bucket,
        key: &str,
        policy: CachePolicy,
        producer: F,
    ) -> Result<(String, bool), FailureReason>
    where
        F: Future<Output = Result<String, FailureReason>> + Send + 'static,
    {
        if policy == CachePolicy::Disabled {
            return producer.await.map(|value| (value, false));
        }

        if let Some(value) = self.get(bucket, key) {
            return Ok((value, true));
        }
        if let Some(reason) = self.active_cooldown(key) {
            return Err(reason);
        }

        let (flight, leader) = {
            let mut in_flight = self.in_flight.lock().unwrap();
            match in_flight.get(key) {
                Some(flight) => (flight.clone(), false),
                None => {
                    let flight: Flight = producer.boxed().shared();
                    in_flight.insert(key.to_string(), flight.clone());
                    (flight, true)
                }
            }
        };

        let result = flight.await;

        if leader {
            self.in_flight.lock().unwrap().remove(key);
            match &result {
                Ok(value) => self.set(bucket, key, value.clone()),
                Err(reason) => self.note_failure(key, *reason),
            }
        }

        result.map(|value| (value, false))
    }

    /// Clears every store and replaces the identity-keyed maps.
    pub fn reset(&self) {
        self.image.lock().unwrap().clear();
        self.background.lock().unwrap().clear();
        self.resource.lock().unwrap().clear();
        self.font.lock().unwrap().clear();
        self.default_style.lock().unwrap().clear();
        *self.base_style.lock().unwrap() = BaseStyleStore::default();
        self.negative.lock().unwrap().clear();
        self.in_flight.lock().unwrap().clear();
        *self.first_use.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn caches_only_successes() {
        let registry = CacheRegistry::new();
        let result = registry
            .get_or_fetch(Bucket::Image, "https://a/x.png", CachePolicy::Full, async {
                Ok("data:image/png;base64,AA==".to_string())
            })
            .await;
        assert_eq!(result.unwrap().1, false);

        // Second hit comes from the cache.
        let (value, from_cache) = registry
            .get_or_fetch(Bucket::Image, "https://a/x.png", CachePolicy::Full, async {
                panic!("should not re-fetch")
            })
            .await
            .unwrap();
        assert!(from_cache);
        assert!(value.starts_with("data:image/png"));
    }

    #[tokio::test]
    async fn failures_cool_down_without_poisoning() {
        let registry = CacheRegistry::new();
        let failed = registry
            .get_or_fetch(Bucket::Resource, "k", CachePolicy::Full, async {
                Err(FailureReason::Http)
            })
            .await;
        assert!(matches!(failed, Err(FailureReason::Http)));

        // Within the cooldown, the producer is never run.
        let fast_fail = registry
            .get_or_fetch(Bucket::Resource, "k", CachePolicy::Full, async {
                panic!("cooldown should fail fast")
            })
            .await;
        assert!(matches!(fast_fail, Err(FailureReason::Http)));
        assert_eq!(registry.get(Bucket::Resource, "k"), None);
    }

    #[tokio::test]
    async fn concurrent_fetches_coalesce() {
        let registry = Arc::new(CacheRegistry::new());
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let producer = || async {
            CALLS.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok("value".to_string())
        };

        let a = registry.get_or_fetch(Bucket::Resource, "same", CachePolicy::Full, producer());
        let b = registry.get_or_fetch(Bucket::Resource, "same", CachePolicy::Full, producer());
        let (ra, rb) = tokio::join!(a, b);

        assert_eq!(ra.unwrap().0, "value");
        assert_eq!(rb.unwrap().0, "value");
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_policy_bypasses_registry() {
        let registry = CacheRegistry::new();
        registry.set(Bucket::Resource, "k", "cached");
        let (value, from_cache) = registry
            .get_or_fetch(Bucket::Resource, "k", CachePolicy::Disabled, async {
                Ok("fresh".to_string())
            })
            .await
            .unwrap();
        assert_eq!(value, "fresh");
        assert!(!from_cache);
        // And nothing was written back.
        assert_eq!(registry.get(Bucket::Resource, "k").as_deref(), Some("cached"));
    }

    #[test]
    fn reusable_classes_are_stable() {
        let registry = CacheRegistry::new();
        let c1 = registry.class_for_style_key("color:red;");
        let c2 = registry.class_for_style_key("color:blue;");
        assert_eq!(c1, "c1");
        assert_eq!(c2, "c2");
        assert_eq!(registry.class_for_style_key("color:red;"), "c1");
    }

    #[test]
    fn reset_clears_everything() {
        let registry = CacheRegistry::new();
        registry.set(Bucket::Image, "a", "b");
        registry.mark_font("f");
        registry.class_for_style_key("k");
        registry.note_failure("n", FailureReason::Network);
        registry.reset();
        assert_eq!(registry.get(Bucket::Image, "a"), None);
        assert!(!registry.font_seen("f"));
        assert_eq!(registry.class_for_style_key("other"), "c1");
        assert!(registry.active_cooldown("n").is_none());
    }
}
