use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::Ms;

use super::rules::PricingRuleSet;

struct Entry {
    rules: Arc<PricingRuleSet>,
    loaded_at: Ms,
}

/// Rule sets keyed by resource, reloaded once older than `ttl_ms`.
pub struct PricingCache {
    entries: DashMap<Ulid, Entry>,
    clock: Arc<dyn Clock>,
    ttl_ms: Ms,
    /// Bumped by every invalidation. A load that straddles one is returned
    /// to its caller but not stored.
    generation: AtomicU64,
}

impl PricingCache {
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: Ms) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            ttl_ms,
            generation: AtomicU64::new(0),
        }
    }

    /// Cached rules for `resource_id`, calling `load` on a miss or after expiry.
    /// A `None` from the loader leaves the cache untouched.
    pub async fn get_or_load<F, Fut>(&self, resource_id: Ulid, load: F) -> Option<Arc<PricingRuleSet>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<PricingRuleSet>>,
    {
        let now = self.clock.now_ms();
        if let Some(entry) = self.entries.get(&resource_id)
            && now - entry.loaded_at < self.ttl_ms
        {
            metrics::counter!(crate::observability::PRICING_CACHE_HITS_TOTAL).increment(1);
            return Some(entry.rules.clone());
        }

        metrics::counter!(crate::observability::PRICING_CACHE_MISSES_TOTAL).increment(1);
        let generation = self.generation.load(Ordering::SeqCst);
        let rules = Arc::new(load().await?);
        // The shard lock held by `entry` orders this check against the
        // removal in `invalidate`, which always bumps the generation first.
        let slot = self.entries.entry(resource_id);
        if self.generation.load(Ordering::SeqCst) == generation {
            slot.insert(Entry {
                rules: rules.clone(),
                loaded_at: now,
            });
        }
        Some(rules)
    }

    pub fn invalidate(&self, resource_id: &Ulid) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(resource_id);
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn rules(price: i64) -> PricingRuleSet {
        PricingRuleSet::flat(Decimal::from(price), Decimal::from(price))
    }

    #[tokio::test]
    async fn populates_on_miss_then_hits() {
        let clock = Arc::new(FixedClock::at("2025-06-01"));
        let cache = PricingCache::new(clock.clone(), 1_000);
        let loads = AtomicUsize::new(0);
        let rid = Ulid::new();

        for _ in 0..3 {
            let got = cache
                .get_or_load(rid, || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Some(rules(40))
                })
                .await
                .unwrap();
            assert_eq!(*got, rules(40));
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn reloads_after_ttl() {
        let clock = Arc::new(FixedClock::at("2025-06-01"));
        let cache = PricingCache::new(clock.clone(), 1_000);
        let rid = Ulid::new();

        cache.get_or_load(rid, || async { Some(rules(40)) }).await;
        clock.advance_ms(999);
        let got = cache.get_or_load(rid, || async { Some(rules(50)) }).await.unwrap();
        assert_eq!(*got, rules(40));

        clock.advance_ms(1);
        let got = cache.get_or_load(rid, || async { Some(rules(50)) }).await.unwrap();
        assert_eq!(*got, rules(50));
    }

    #[tokio::test]
    async fn invalidate_and_clear() {
        let clock = Arc::new(FixedClock::at("2025-06-01"));
        let cache = PricingCache::new(clock, 60_000);
        let (a, b) = (Ulid::new(), Ulid::new());

        cache.get_or_load(a, || async { Some(rules(40)) }).await;
        cache.get_or_load(b, || async { Some(rules(40)) }).await;
        cache.invalidate(&a);
        assert_eq!(cache.len(), 1);

        let got = cache.get_or_load(a, || async { Some(rules(70)) }).await.unwrap();
        assert_eq!(*got, rules(70));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn load_overtaken_by_invalidation_is_not_stored() {
        let clock = Arc::new(FixedClock::at("2025-06-01"));
        let cache = PricingCache::new(clock, 60_000);
        let rid = Ulid::new();

        // Rules are read, then replaced before the load finishes.
        let got = cache
            .get_or_load(rid, || async {
                let stale = rules(40);
                cache.invalidate(&rid);
                Some(stale)
            })
            .await
            .unwrap();
        assert_eq!(*got, rules(40));
        assert!(cache.is_empty());

        let got = cache.get_or_load(rid, || async { Some(rules(55)) }).await.unwrap();
        assert_eq!(*got, rules(55));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn missing_resource_is_not_cached() {
        let clock = Arc::new(FixedClock::at("2025-06-01"));
        let cache = PricingCache::new(clock, 60_000);
        assert!(cache.get_or_load(Ulid::new(), || async { None }).await.is_none());
        assert!(cache.is_empty());
    }
}
