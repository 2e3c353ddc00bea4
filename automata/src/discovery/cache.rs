//! The discovery cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
#[cfg(feature = "telemetry")]
use tracing::instrument;

use super::{DiscoveryError, DiscoverySource, ServiceQuery};
use crate::ledger::{DEFAULT_TIMEOUT, LedgerError, LedgerReader};
use crate::listing::{Registry, ReputationSnapshot, ServiceListing, reputation_percentage};
use crate::module::ModuleId;
use crate::tags::{KeywordTagger, TagExtractor};
use crate::timestamp::LedgerTimestamp;

/// Errors that make a sync cycle keep the previous snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The registry could not be read.
    #[error("registry read failed: {0}")]
    Ledger(#[from] LedgerError),
    /// The registry resource has an unexpected shape.
    #[error("malformed registry: {0}")]
    MalformedRegistry(#[source] serde_json::Error),
    /// The sync cycle did not finish in time.
    #[error("sync timed out after {0:?}")]
    Timeout(Duration),
}

/// An immutable view of the registry as of one successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    listings: Vec<ServiceListing>,
    last_sync: u64,
}

impl Snapshot {
    /// Listings in registry order.
    #[must_use]
    pub fn listings(&self) -> &[ServiceListing] {
        &self.listings
    }

    /// Completion time of the sync that produced this snapshot, in
    /// milliseconds since the Unix epoch; `0` if no sync has succeeded yet.
    #[must_use]
    pub const fn last_sync(&self) -> u64 {
        self.last_sync
    }

    /// Number of listings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    /// Returns `true` if the snapshot holds no listings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// The listing named `name`, ignoring ASCII case.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ServiceListing> {
        self.listings.iter().find(|l| l.is_named(name))
    }
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Number of listings now cached.
    pub count: usize,
    /// Sync completion time in milliseconds since the Unix epoch.
    pub last_sync: u64,
}

/// In-memory, periodically refreshed view of the on-chain service registry.
///
/// Readers clone an [`Arc`] to the current [`Snapshot`] and never wait on a
/// sync in progress; a sync builds a complete new snapshot and swaps it in
/// with a single write. Concurrent sync triggers are serialized.
pub struct DiscoveryCache<L> {
    ledger: L,
    module: ModuleId,
    tagger: Box<dyn TagExtractor>,
    timeout: Duration,
    snapshot: RwLock<Arc<Snapshot>>,
    sync_lock: Mutex<()>,
}

impl<L> std::fmt::Debug for DiscoveryCache<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryCache")
            .field("module", &self.module)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<L: LedgerReader> DiscoveryCache<L> {
    /// Creates an empty cache over the registry of `module`.
    ///
    /// Each sync cycle is bounded by [`DEFAULT_TIMEOUT`].
    pub fn new(ledger: L, module: ModuleId) -> Self {
        Self {
            ledger,
            module,
            tagger: Box::new(KeywordTagger::default()),
            timeout: DEFAULT_TIMEOUT,
            snapshot: RwLock::default(),
            sync_lock: Mutex::new(()),
        }
    }

    /// Replaces the tag derivation.
    #[must_use]
    pub fn with_tagger(mut self, tagger: impl TagExtractor + 'static) -> Self {
        self.tagger = Box::new(tagger);
        self
    }

    /// Bounds each sync cycle by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The module whose registry is mirrored.
    pub const fn module(&self) -> &ModuleId {
        &self.module
    }

    /// The current snapshot.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Matching listings, best reputation first.
    pub async fn query(&self, query: &ServiceQuery) -> Vec<ServiceListing> {
        query.apply(self.snapshot().await.listings())
    }

    /// The cheapest matching listing, if any.
    pub async fn cheapest(&self, query: &ServiceQuery) -> Option<ServiceListing> {
        query.cheapest(self.snapshot().await.listings())
    }

    /// The listing named `name`, ignoring ASCII case.
    pub async fn find(&self, name: &str) -> Option<ServiceListing> {
        self.snapshot().await.find(name).cloned()
    }

    /// Rebuilds the snapshot from the ledger.
    ///
    /// On failure the previous snapshot, including its sync time, is kept.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the registry cannot be read or parsed.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "automata.discovery.sync", skip(self), err)
    )]
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.sync_lock.lock().await;

        let listings = tokio::time::timeout(self.timeout, self.fetch_listings())
            .await
            .map_err(|_| SyncError::Timeout(self.timeout))??;

        let last_sync = LedgerTimestamp::now().as_millis();
        let next = Arc::new(Snapshot {
            listings,
            last_sync,
        });
        let count = next.len();
        *self.snapshot.write().await = next;

        tracing::info!(count, module = %self.module, "Discovery cache synced");
        Ok(SyncReport { count, last_sync })
    }

    async fn sync_logged(&self) {
        if let Err(err) = self.sync().await {
            let retained = self.snapshot().await.len();
            tracing::error!(error = %err, retained, "Discovery sync failed, keeping previous snapshot");
        }
    }

    async fn fetch_listings(&self) -> Result<Vec<ServiceListing>, SyncError> {
        let resource = self
            .ledger
            .get_account_resource(self.module.address(), &self.module.registry_resource())
            .await?;
        let registry: Registry =
            serde_json::from_value(resource).map_err(SyncError::MalformedRegistry)?;

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(registry.services.len());
        for entry in registry.services {
            let provider = self.ledger.normalize_address(&entry.provider);
            if seen.insert((provider.clone(), entry.name.clone())) {
                entries.push((provider, entry));
            } else {
                tracing::warn!(%provider, name = %entry.name, "Duplicate registry entry ignored");
            }
        }

        let mut providers: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
        providers.sort_unstable();
        providers.dedup();
        let reputations = join_all(providers.iter().map(|p| self.fetch_reputation(p))).await;
        let reputation_of = |provider: &str| {
            providers
                .binary_search(&provider)
                .ok()
                .and_then(|i| reputations[i].as_ref())
        };

        let now = LedgerTimestamp::now().as_millis();
        let listings = entries
            .iter()
            .map(|(provider, entry)| ServiceListing {
                provider: provider.clone(),
                name: entry.name.clone(),
                base_price: entry.base_price,
                metadata_url: entry.metadata_url.clone(),
                tags: self.tagger.extract(&entry.name, &entry.metadata_url),
                reputation_score: reputation_percentage(reputation_of(provider)),
                last_updated: now,
            })
            .collect();
        Ok(listings)
    }

    /// Best-effort reputation lookup; any failure reads as "no history".
    async fn fetch_reputation(&self, provider: &str) -> Option<ReputationSnapshot> {
        let resource_type = self.module.reputation_resource();
        match self.ledger.get_account_resource(provider, &resource_type).await {
            Ok(value) => match serde_json::from_value(value) {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    tracing::warn!(%provider, error = %err, "Malformed reputation record");
                    None
                }
            },
            Err(LedgerError::NotFound(_)) => None,
            Err(err) => {
                tracing::warn!(%provider, error = %err, "Reputation lookup failed");
                None
            }
        }
    }
}

impl<L: LedgerReader + 'static> DiscoveryCache<L> {
    /// Syncs once immediately, then every `period`, until `cancel` fires.
    ///
    /// Failed cycles are logged and leave the snapshot untouched.
    pub fn spawn_periodic(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            while cancel.run_until_cancelled(ticker.tick()).await.is_some() {
                if cancel.run_until_cancelled(cache.sync_logged()).await.is_none() {
                    break;
                }
            }
            tracing::debug!("Discovery sync task stopped");
        })
    }
}

#[async_trait::async_trait]
impl<L: LedgerReader> DiscoverySource for DiscoveryCache<L> {
    async fn query(&self, query: &ServiceQuery) -> Result<Vec<ServiceListing>, DiscoveryError> {
        Ok(Self::query(self, query).await)
    }

    async fn cheapest(
        &self,
        query: &ServiceQuery,
    ) -> Result<Option<ServiceListing>, DiscoveryError> {
        Ok(Self::cheapest(self, query).await)
    }

    async fn find(&self, name: &str) -> Result<Option<ServiceListing>, DiscoveryError> {
        Ok(Self::find(self, name).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryLedger;
    use serde_json::json;

    fn module() -> ModuleId {
        "0x1::automata".parse().unwrap()
    }

    fn seeded() -> MemoryLedger {
        let ledger = MemoryLedger::new();
        let module = module();
        ledger.insert_resource(
            "0x1",
            &module.registry_resource(),
            json!({"services": [
                {"provider": "0xA", "name": "gpt-proxy", "base_price": "5", "metadata_url": "https://a.io"},
                {"provider": "0xb", "name": "dalle", "base_price": "9", "metadata_url": "https://b.io"},
                {"provider": "0xc", "name": "weather", "base_price": "1", "metadata_url": "https://c.io"}
            ]}),
        );
        ledger.insert_resource(
            "0xb",
            &module.reputation_resource(),
            json!({"score": "8", "total_transactions": "10"}),
        );
        ledger.insert_resource(
            "0xc",
            &module.reputation_resource(),
            json!({"score": "9", "total_transactions": "10"}),
        );
        ledger
    }

    #[tokio::test]
    async fn test_sync_builds_enriched_listings() {
        let cache = DiscoveryCache::new(seeded(), module());
        assert_eq!(cache.snapshot().await.last_sync(), 0);

        let report = cache.sync().await.unwrap();
        assert_eq!(report.count, 3);

        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.last_sync(), report.last_sync);
        let gpt = snapshot.find("GPT-PROXY").unwrap();
        assert_eq!(gpt.provider, "0xa");
        assert_eq!(gpt.tags, vec!["ai"]);
        assert_eq!(gpt.reputation_score, 100);
        assert_eq!(gpt.last_updated, report.last_sync);
        assert_eq!(snapshot.find("dalle").unwrap().tags, vec!["image"]);
        assert_eq!(snapshot.find("weather").unwrap().tags, vec!["general"]);
    }

    #[tokio::test]
    async fn test_query_sorted_by_reputation() {
        let cache = DiscoveryCache::new(seeded(), module());
        cache.sync().await.unwrap();
        let names: Vec<String> = cache
            .query(&ServiceQuery::new())
            .await
            .into_iter()
            .map(|l| l.name)
            .collect();
        assert_eq!(names, vec!["gpt-proxy", "weather", "dalle"]);
        assert_eq!(
            cache.cheapest(&ServiceQuery::new()).await.unwrap().name,
            "weather"
        );
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_previous_snapshot() {
        let ledger = seeded();
        let cache = DiscoveryCache::new(ledger.clone(), module());
        cache.sync().await.unwrap();
        let before = cache.snapshot().await;

        ledger.set_unavailable(true);
        let err = cache.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Ledger(LedgerError::Unavailable(_))));

        let after = cache.snapshot().await;
        assert_eq!(*after, *before);
        assert_eq!(after.len(), 3);
    }

    #[tokio::test]
    async fn test_malformed_registry_keeps_previous_snapshot() {
        let ledger = seeded();
        let cache = DiscoveryCache::new(ledger.clone(), module());
        cache.sync().await.unwrap();

        ledger.insert_resource("0x1", &module().registry_resource(), json!({"services": 7}));
        assert!(matches!(
            cache.sync().await.unwrap_err(),
            SyncError::MalformedRegistry(_)
        ));
        assert_eq!(cache.snapshot().await.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_registry_is_a_failure() {
        let cache = DiscoveryCache::new(MemoryLedger::new(), module());
        assert!(matches!(
            cache.sync().await.unwrap_err(),
            SyncError::Ledger(LedgerError::NotFound(_))
        ));
        assert!(cache.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_entries_keep_first() {
        let ledger = MemoryLedger::new();
        ledger.insert_resource(
            "0x1",
            &module().registry_resource(),
            json!({"services": [
                {"provider": "0xa", "name": "gpt", "base_price": 5, "metadata_url": "https://a.io"},
                {"provider": "0xA", "name": "gpt", "base_price": 1, "metadata_url": "https://b.io"}
            ]}),
        );
        let cache = DiscoveryCache::new(ledger, module());
        cache.sync().await.unwrap();
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.listings()[0].base_price, 5);
    }

    #[tokio::test]
    async fn test_custom_tagger() {
        let cache = DiscoveryCache::new(seeded(), module())
            .with_tagger(|name: &str, _: &str| vec![format!("svc-{}", name.len())]);
        cache.sync().await.unwrap();
        assert_eq!(cache.find("dalle").await.unwrap().tags, vec!["svc-5"]);
    }

    fn registry_of(names: &[&str]) -> serde_json::Value {
        let services: Vec<_> = names
            .iter()
            .map(|name| {
                json!({"provider": "0xa", "name": name, "base_price": 1, "metadata_url": "https://a.io"})
            })
            .collect();
        json!({ "services": services })
    }

    fn names_of(snapshot: &Snapshot) -> Vec<String> {
        snapshot.listings().iter().map(|l| l.name.clone()).collect()
    }

    #[tokio::test]
    async fn test_overlapping_syncs_are_serialized_and_swapped_whole() {
        let ledger = MemoryLedger::new();
        ledger.insert_resource("0x1", &module().registry_resource(), registry_of(&["a1", "a2"]));
        let cache = Arc::new(DiscoveryCache::new(ledger.clone(), module()));
        cache.sync().await.unwrap();
        let old = names_of(&*cache.snapshot().await);

        ledger.insert_resource(
            "0x1",
            &module().registry_resource(),
            registry_of(&["b1", "b2", "b3"]),
        );
        let new = vec!["b1".to_owned(), "b2".to_owned(), "b3".to_owned()];
        ledger.pause_reads();

        let syncs: Vec<_> = (0..2)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.sync().await })
            })
            .collect();
        while ledger.reads_in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        // The second sync waits for the first instead of reading alongside it.
        assert_eq!(ledger.reads_in_flight(), 1);
        // Readers are served the old snapshot while the registry read is held.
        assert_eq!(names_of(&*cache.snapshot().await), old);

        let reader = {
            let cache = Arc::clone(&cache);
            let (old, new) = (old.clone(), new.clone());
            tokio::spawn(async move {
                loop {
                    let seen = names_of(&*cache.snapshot().await);
                    assert!(seen == old || seen == new, "partial snapshot: {seen:?}");
                    if seen == new {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        ledger.resume_reads();
        for sync in syncs {
            assert_eq!(sync.await.unwrap().unwrap().count, 3);
        }
        reader.await.unwrap();
        assert_eq!(names_of(&*cache.snapshot().await), new);
        assert_eq!(ledger.max_reads_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_sync_times_out_and_keeps_snapshot() {
        let ledger = seeded();
        let cache = DiscoveryCache::new(ledger.clone(), module());
        cache.sync().await.unwrap();

        ledger.pause_reads();
        let err = cache.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(t) if t == DEFAULT_TIMEOUT));
        assert_eq!(cache.snapshot().await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sync_runs_until_cancelled() {
        let ledger = seeded();
        let cache = Arc::new(DiscoveryCache::new(ledger.clone(), module()));
        let cancel = CancellationToken::new();
        let handle = cache.spawn_periodic(Duration::from_secs(30), cancel.clone());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(cache.snapshot().await.len(), 3);
        let first_reads = ledger.read_count();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(ledger.read_count() > first_reads);

        cancel.cancel();
        handle.await.unwrap();
    }
}
