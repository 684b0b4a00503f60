//! Cache-aside search over the local store with coalesced remote refreshes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult, TIMEOUT_STATUS};
use crate::models::{Entity, EntityKind, IndexSnapshot, normalize_query, validate_entity};
use crate::remote::{Ack, RemoteLookupService};
use crate::store::{EntityStore, SearchIndex};
use crate::wire::{Materialized, entity_from_wire, entity_to_wire};

type QueryKey = (String, EntityKind);
type SharedRefresh = Shared<BoxFuture<'static, SyncResult<Vec<Entity>>>>;

struct Inner {
    store: Arc<dyn EntityStore>,
    index: Arc<dyn SearchIndex>,
    remote: Arc<dyn RemoteLookupService>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    in_flight: Mutex<HashMap<QueryKey, SharedRefresh>>,
}

/// Answers searches from the local index while it is fresh and refreshes it
/// from the remote service otherwise.
///
/// Cloning is cheap; clones share the same in-flight registry.
#[derive(Clone)]
pub struct SearchOrchestrator {
    inner: Arc<Inner>,
}

impl SearchOrchestrator {
    pub fn new(
        store: Arc<dyn EntityStore>,
        index: Arc<dyn SearchIndex>,
        remote: Arc<dyn RemoteLookupService>,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(store, index, remote, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn EntityStore>,
        index: Arc<dyn SearchIndex>,
        remote: Arc<dyn RemoteLookupService>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                index,
                remote,
                clock,
                config,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Search for entities of `kind` matching `query`.
    ///
    /// A fresh index entry is answered locally, including a cached empty
    /// answer. Otherwise exactly one remote search runs for the key, shared by
    /// every concurrent caller; on failure the store and index are left as
    /// they were. A blank `locale` uses the configured default.
    pub async fn search(
        &self,
        query: &str,
        kind: EntityKind,
        locale: &str,
    ) -> SyncResult<Vec<Entity>> {
        let query = normalize_query(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(entities) = self.cached(&query, kind)? {
            debug!(query = %query, kind = %kind, results = entities.len(), "search cache hit");
            return Ok(entities);
        }

        let locale = match locale.trim() {
            "" => self.inner.config.default_locale.clone(),
            l => l.to_string(),
        };
        self.coalesced_refresh(query, kind, locale).await
    }

    /// Local copy if present, otherwise fetched from the remote and cached.
    pub async fn lookup(&self, kind: EntityKind, id: &str) -> SyncResult<Entity> {
        if let Some(entity) = self.inner.store.get(kind, id)? {
            return Ok(entity);
        }

        let wire = match self
            .with_timeout("fetch", self.inner.remote.fetch_by_id(kind, id))
            .await
        {
            Err(SyncError::Remote { code: 404, .. }) => {
                return Err(SyncError::not_found(kind, id));
            }
            other => other?,
        };
        let materialized = entity_from_wire(&wire, self.inner.config.max_servings)?;
        if materialized.entity.kind() != kind {
            return Err(SyncError::InvalidInput(format!(
                "Remote returned a {} for {kind} '{id}'",
                materialized.entity.kind()
            )));
        }
        self.persist(&materialized)?;
        debug!(kind = %kind, id, "cached remote lookup");
        Ok(materialized.entity)
    }

    /// Send a local entity to the remote catalogue. Nothing is cached.
    pub async fn upload(&self, entity: &Entity) -> SyncResult<Entity> {
        validate_entity(entity)?;
        let wire = entity_to_wire(entity)?;
        let stored = self
            .with_timeout("upload", self.inner.remote.upload(&wire))
            .await?;
        Ok(entity_from_wire(&stored, self.inner.config.max_servings)?.entity)
    }

    pub async fn report(&self, kind: EntityKind, id: &str, reason: &str) -> SyncResult<Ack> {
        if reason.trim().is_empty() {
            return Err(SyncError::InvalidInput(
                "Report reason must not be empty".to_string(),
            ));
        }
        self.with_timeout("report", self.inner.remote.report(kind, id, reason))
            .await
    }

    /// Forget the cached answer for a query so the next search refreshes it.
    pub fn invalidate(&self, query: &str, kind: EntityKind) -> SyncResult<bool> {
        Ok(self.inner.index.invalidate(&normalize_query(query), kind)?)
    }

    /// Number of refreshes currently registered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<QueryKey, SharedRefresh>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` when the index has no usable answer: never queried, stale, or
    /// pointing at an entity that no longer exists.
    fn cached(&self, query: &str, kind: EntityKind) -> SyncResult<Option<Vec<Entity>>> {
        let Some(snapshot) = self.inner.index.entries_for(query, kind)? else {
            debug!(query = %query, kind = %kind, "search cache miss");
            return Ok(None);
        };

        // A stamp in the future counts as fresh
        let age = self.inner.clock.now() - snapshot.refreshed_at;
        if age
            .to_std()
            .is_ok_and(|age| age >= self.inner.config.freshness_window)
        {
            debug!(query = %query, kind = %kind, refreshed_at = %snapshot.refreshed_at, "search cache stale");
            return Ok(None);
        }

        match self.resolve(&snapshot) {
            Ok(entities) => Ok(Some(entities)),
            Err(SyncError::StaleReference { kind, id }) => {
                debug!(query = %query, kind = %kind, id = %id, "index points at missing entity");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn resolve(&self, snapshot: &IndexSnapshot) -> SyncResult<Vec<Entity>> {
        let mut entities = Vec::with_capacity(snapshot.entity_ids.len());
        for id in &snapshot.entity_ids {
            let entity = self
                .inner
                .store
                .get(snapshot.kind, id)?
                .ok_or_else(|| SyncError::StaleReference {
                    kind: snapshot.kind,
                    id: id.clone(),
                })?;
            if !entity.is_soft_deleted() {
                entities.push(entity);
            }
        }
        Ok(entities)
    }

    async fn coalesced_refresh(
        &self,
        query: String,
        kind: EntityKind,
        locale: String,
    ) -> SyncResult<Vec<Entity>> {
        let key = (query, kind);
        let refresh = {
            let mut registry = self.registry();
            if let Some(existing) = registry.get(&key) {
                debug!(query = %key.0, kind = %kind, "joining in-flight refresh");
                existing.clone()
            } else {
                // A refresh may have finished and deregistered since the
                // first cache read.
                if let Some(entities) = self.cached(&key.0, kind)? {
                    debug!(query = %key.0, kind = %kind, "refreshed while waiting to register");
                    return Ok(entities);
                }
                // The refresh task deregisters itself, even when it panics;
                // it cannot get there before this guard is released.
                let this = self.clone();
                let task_key = key.clone();
                let handle: JoinHandle<SyncResult<Vec<Entity>>> = tokio::spawn(async move {
                    let _registered = Deregister {
                        orchestrator: this.clone(),
                        key: task_key.clone(),
                    };
                    this.refresh(&task_key.0, task_key.1, &locale).await
                });
                let refresh = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(SyncError::Storage(format!("refresh task failed: {e}")))
                    })
                }
                .boxed()
                .shared();
                registry.insert(key, refresh.clone());
                refresh
            }
        };
        refresh.await
    }

    async fn refresh(
        &self,
        query: &str,
        kind: EntityKind,
        locale: &str,
    ) -> SyncResult<Vec<Entity>> {
        let inner = &self.inner;
        let wire = self
            .with_timeout("search", inner.remote.search(query, kind, locale))
            .await
            .inspect_err(|err| {
                warn!(query = %query, kind = %kind, error = %err, "remote search failed");
            })?;

        let mut seen = HashSet::new();
        let mut materialized = Vec::with_capacity(wire.len());
        for item in &wire {
            if !seen.insert(item.id().to_string()) {
                continue;
            }
            match entity_from_wire(item, inner.config.max_servings) {
                Ok(m) if m.entity.kind() == kind => materialized.push(m),
                Ok(m) => {
                    warn!(query = %query, kind = %kind, id = %m.entity.id(), "skipping remote result of another kind");
                }
                Err(err) => {
                    warn!(query = %query, kind = %kind, id = %item.id(), error = %err, "skipping malformed remote result");
                }
            }
        }

        // Entities first, so a fresh stamp never points at unwritten rows
        for m in &materialized {
            self.persist(m)?;
        }
        let ids: Vec<String> = materialized
            .iter()
            .map(|m| m.entity.id().to_string())
            .collect();
        inner
            .index
            .replace_entries(query, kind, &ids, inner.clock.now())?;
        info!(query = %query, kind = %kind, results = ids.len(), "search index refreshed");

        Ok(materialized
            .into_iter()
            .map(|m| m.entity)
            .filter(|e| !e.is_soft_deleted())
            .collect())
    }

    /// Remote data never overwrites a local copy with the same id.
    fn persist(&self, materialized: &Materialized) -> SyncResult<()> {
        for food in &materialized.referenced_foods {
            self.inner
                .store
                .insert_if_absent(&Entity::Food(food.clone()))?;
        }
        self.inner.store.insert_if_absent(&materialized.entity)?;
        Ok(())
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        call: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        let limit = self.inner.config.remote_timeout;
        tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(SyncError::remote(
                TIMEOUT_STATUS,
                format!("Remote {operation} timed out after {limit:?}"),
            ))
        })
    }
}

/// Removes a refresh from the in-flight registry when its task ends.
struct Deregister {
    orchestrator: SearchOrchestrator,
    key: QueryKey,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.orchestrator.registry().remove(&self.key);
    }
}

/// Search box bound to one input field: a newer query cancels the caller
/// task of the previous one. Shared refreshes keep running.
pub struct SearchField {
    orchestrator: SearchOrchestrator,
    kind: EntityKind,
    locale: String,
    current: Option<AbortHandle>,
}

impl SearchField {
    pub fn new(orchestrator: SearchOrchestrator, kind: EntityKind, locale: &str) -> Self {
        Self {
            orchestrator,
            kind,
            locale: locale.to_string(),
            current: None,
        }
    }

    pub fn submit(&mut self, query: &str) -> JoinHandle<SyncResult<Vec<Entity>>> {
        self.cancel();
        let orchestrator = self.orchestrator.clone();
        let query = query.to_string();
        let kind = self.kind;
        let locale = self.locale.clone();
        let handle =
            tokio::spawn(async move { orchestrator.search(&query, kind, &locale).await });
        self.current = Some(handle.abort_handle());
        handle
    }

    pub fn cancel(&mut self) {
        if let Some(previous) = self.current.take() {
            previous.abort();
        }
    }
}

impl Drop for SearchField {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::models::{ServingSize, Visibility};
    use crate::store::LocalStore;
    use crate::wire::{WireEntity, WireFoodItem, WireIngredient, WireRecipe};

    struct MockRemote {
        calls: AtomicUsize,
        delay: Option<Duration>,
        failure: Mutex<Option<SyncError>>,
        results: Mutex<Vec<WireEntity>>,
    }

    impl MockRemote {
        fn returning(results: Vec<WireEntity>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: None,
                failure: Mutex::new(None),
                results: Mutex::new(results),
            }
        }

        fn delayed(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        fn fail_with(&self, err: SyncError) {
            *self.failure.lock().unwrap() = Some(err);
        }

        fn set_results(&self, results: Vec<WireEntity>) {
            *self.results.lock().unwrap() = results;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteLookupService for MockRemote {
        async fn search(
            &self,
            _query: &str,
            _kind: EntityKind,
            _locale: &str,
        ) -> SyncResult<Vec<WireEntity>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.failure.lock().unwrap().clone() {
                return Err(err);
            }
            Ok(self.results.lock().unwrap().clone())
        }

        async fn fetch_by_id(&self, _kind: EntityKind, id: &str) -> SyncResult<WireEntity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .iter()
                .find(|w| w.id() == id)
                .cloned()
                .ok_or_else(|| SyncError::remote(404, "Not Found"))
        }

        async fn upload(&self, entity: &WireEntity) -> SyncResult<WireEntity> {
            Ok(entity.clone())
        }

        async fn report(&self, _kind: EntityKind, id: &str, _reason: &str) -> SyncResult<Ack> {
            Ok(Ack {
                accepted: true,
                message: Some(format!("reported {id}")),
            })
        }
    }

    fn wire_food(id: &str, name: &str) -> WireFoodItem {
        WireFoodItem {
            id: id.to_string(),
            name: name.to_string(),
            brand: None,
            calories: 359.0,
            carbohydrates: 71.0,
            protein: 13.0,
            fat: 2.0,
            servings: None,
            serving_size_g: None,
            source: None,
        }
    }

    fn pasta() -> WireEntity {
        WireEntity::FoodItem(wire_food("food-pasta", "Pasta"))
    }

    struct Harness {
        orchestrator: SearchOrchestrator,
        store: Arc<LocalStore>,
        remote: Arc<MockRemote>,
        clock: Arc<ManualClock>,
    }

    fn harness(remote: MockRemote) -> Harness {
        harness_with(remote, SyncConfig::default())
    }

    fn harness_with(remote: MockRemote, config: SyncConfig) -> Harness {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = Arc::new(remote);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let orchestrator = SearchOrchestrator::with_clock(
            store.clone(),
            store.clone(),
            remote.clone(),
            config,
            clock.clone(),
        );
        Harness {
            orchestrator,
            store,
            remote,
            clock,
        }
    }

    #[tokio::test]
    async fn test_empty_query_does_no_io() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        let result = h
            .orchestrator
            .search("   ", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(h.remote.calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_fetches_persists_and_stamps() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        let result = h
            .orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].name(), "Pasta");
        assert_eq!(h.remote.calls(), 1);
        assert!(h.store.exists(EntityKind::FoodItem, "food-pasta").unwrap());

        let snapshot = h
            .store
            .entries_for("pasta", EntityKind::FoodItem)
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.entity_ids, vec!["food-pasta".to_string()]);
        assert_eq!(snapshot.refreshed_at, h.clock.now());
    }

    #[tokio::test]
    async fn test_fresh_entry_served_locally() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();

        h.clock.advance(chrono::Duration::hours(23));
        // Normalizes to the same key
        let result = h
            .orchestrator
            .search("  PASTA ", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id(), "food-pasta");
        assert_eq!(h.remote.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_refreshes_once() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();

        h.clock.advance(chrono::Duration::hours(24));
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(h.remote.calls(), 2);

        // Re-stamped, so fresh again
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(h.remote.calls(), 2);
    }

    #[tokio::test]
    async fn test_kinds_are_cached_separately() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        h.remote.set_results(Vec::new());
        let recipes = h
            .orchestrator
            .search("pasta", EntityKind::Recipe, "en")
            .await
            .unwrap();
        assert!(recipes.is_empty());
        assert_eq!(h.remote.calls(), 2);
    }

    #[tokio::test]
    async fn test_zero_results_is_a_cached_answer() {
        let h = harness(MockRemote::returning(Vec::new()));
        let first = h
            .orchestrator
            .search("unobtainium", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert!(first.is_empty());

        let snapshot = h
            .store
            .entries_for("unobtainium", EntityKind::FoodItem)
            .unwrap()
            .unwrap();
        assert!(snapshot.entity_ids.is_empty());

        h.orchestrator
            .search("unobtainium", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(h.remote.calls(), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_leaves_cache_untouched() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        let before = h
            .store
            .entries_for("pasta", EntityKind::FoodItem)
            .unwrap();

        h.clock.advance(chrono::Duration::hours(48));
        h.remote.fail_with(SyncError::remote(400, "Bad request"));
        let err = h
            .orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::remote(400, "Bad request"));

        let after = h
            .store
            .entries_for("pasta", EntityKind::FoodItem)
            .unwrap();
        assert_eq!(before, after);
        assert!(h.store.exists(EntityKind::FoodItem, "food-pasta").unwrap());
        assert_eq!(h.orchestrator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_failure_on_first_search_writes_nothing() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        h.remote.fail_with(SyncError::remote(503, "unavailable"));
        let err = h
            .orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 503);
        assert!(
            h.store
                .entries_for("pasta", EntityKind::FoodItem)
                .unwrap()
                .is_none()
        );
        assert!(!h.store.exists(EntityKind::FoodItem, "food-pasta").unwrap());
    }

    #[tokio::test]
    async fn test_dangling_reference_triggers_refresh() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        h.store
            .delete(EntityKind::FoodItem, "food-pasta")
            .unwrap();

        let result = h
            .orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(h.remote.calls(), 2);
        assert!(h.store.exists(EntityKind::FoodItem, "food-pasta").unwrap());
    }

    #[tokio::test]
    async fn test_remote_never_overwrites_local_copy() {
        let h = harness(MockRemote::returning(vec![WireEntity::FoodItem(
            wire_food("food-pasta", "Remote pasta"),
        )]));
        let mut local = crate::wire::food_from_wire(&wire_food("food-pasta", "My pasta")).unwrap();
        local.source = "manual".to_string();
        h.store.insert(&Entity::Food(local)).unwrap();

        let result = h
            .orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(result[0].name(), "Remote pasta");

        let stored = h
            .store
            .get(EntityKind::FoodItem, "food-pasta")
            .unwrap()
            .unwrap();
        assert_eq!(stored.name(), "My pasta");

        // The cached answer resolves to the local copy
        let cached = h
            .orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(cached[0].name(), "My pasta");
    }

    #[tokio::test]
    async fn test_duplicates_and_malformed_results_are_skipped() {
        let mut bad = wire_food("food-bad", "Bad");
        bad.calories = -1.0;
        let h = harness(MockRemote::returning(vec![
            pasta(),
            pasta(),
            WireEntity::FoodItem(bad),
        ]));
        let result = h
            .orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(!h.store.exists(EntityKind::FoodItem, "food-bad").unwrap());
    }

    #[tokio::test]
    async fn test_recipe_search_quantizes_and_stores_ingredient_foods() {
        let recipe = WireRecipe {
            id: "recipe-carbonara".to_string(),
            name: "Carbonara".to_string(),
            calories: 1400.0,
            carbohydrates: 150.0,
            protein: 60.0,
            fat: 60.0,
            servings: 2.0,
            ingredients: vec![WireIngredient {
                quantity_g: 150.0,
                food: wire_food("food-spaghetti", "Spaghetti"),
            }],
            instructions: String::new(),
            visibility: Visibility::Public,
            deleted: false,
        };
        let h = harness(MockRemote::returning(vec![WireEntity::Recipe(recipe)]));
        h.orchestrator
            .search("carbonara", EntityKind::Recipe, "it")
            .await
            .unwrap();

        assert!(h.store.exists(EntityKind::FoodItem, "food-spaghetti").unwrap());
        let Some(Entity::Recipe(stored)) = h
            .store
            .get(EntityKind::Recipe, "recipe-carbonara")
            .unwrap()
        else {
            panic!("recipe not stored");
        };
        assert_eq!(stored.ingredients[0].servings, 3);
        assert_eq!(stored.ingredients[0].serving_size, ServingSize::FiftyGrams);
    }

    #[tokio::test]
    async fn test_soft_deleted_recipe_hidden_from_cached_results() {
        let recipe = WireRecipe {
            id: "recipe-old".to_string(),
            name: "Old soup".to_string(),
            calories: 500.0,
            carbohydrates: 50.0,
            protein: 20.0,
            fat: 10.0,
            servings: 4.0,
            ingredients: Vec::new(),
            instructions: String::new(),
            visibility: Visibility::Public,
            deleted: false,
        };
        let h = harness(MockRemote::returning(vec![WireEntity::Recipe(recipe)]));
        h.orchestrator
            .search("soup", EntityKind::Recipe, "en")
            .await
            .unwrap();

        let Some(Entity::Recipe(mut stored)) =
            h.store.get(EntityKind::Recipe, "recipe-old").unwrap()
        else {
            panic!("recipe not stored");
        };
        stored.soft_deleted = true;
        h.store.update(&Entity::Recipe(stored)).unwrap();

        let result = h
            .orchestrator
            .search("soup", EntityKind::Recipe, "en")
            .await
            .unwrap();
        assert!(result.is_empty());
        // Still fresh, not a dangling reference
        assert_eq!(h.remote.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_searches_share_one_remote_call() {
        let h = harness(MockRemote::returning(vec![pasta()]).delayed(Duration::from_millis(200)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let orchestrator = h.orchestrator.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .search("pasta", EntityKind::FoodItem, "en")
                    .await
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(h.remote.calls(), 1);
        assert!(results.iter().all(|r| r == &results[0]));
        assert_eq!(results[0].len(), 1);
        assert_eq!(h.orchestrator.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_are_shared_too() {
        let h = harness(MockRemote::returning(vec![pasta()]).delayed(Duration::from_millis(50)));
        h.remote.fail_with(SyncError::remote(502, "Bad gateway"));

        let a = h.orchestrator.clone();
        let b = h.orchestrator.clone();
        let (ra, rb) = tokio::join!(
            a.search("pasta", EntityKind::FoodItem, "en"),
            b.search("pasta", EntityKind::FoodItem, "en"),
        );
        assert_eq!(ra.unwrap_err().status_code(), 502);
        assert_eq!(rb.unwrap_err().status_code(), 502);
        assert_eq!(h.remote.calls(), 1);
        assert_eq!(h.orchestrator.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_timeout_maps_to_408() {
        let h = harness_with(
            MockRemote::returning(vec![pasta()]).delayed(Duration::from_secs(30)),
            SyncConfig::default().with_remote_timeout(Duration::from_secs(5)),
        );
        let err = h
            .orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { code: 408, .. }));
        assert!(
            h.store
                .entries_for("pasta", EntityKind::FoodItem)
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_caller_does_not_cancel_refresh() {
        let h = harness(MockRemote::returning(vec![pasta()]).delayed(Duration::from_millis(100)));
        let mut field = SearchField::new(h.orchestrator.clone(), EntityKind::FoodItem, "en");

        let first = field.submit("pa");
        while h.orchestrator.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        let second = field.submit("pasta");

        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(second.await.unwrap().unwrap().len(), 1);

        while h.orchestrator.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // The abandoned query still got indexed
        assert!(
            h.store
                .entries_for("pa", EntityKind::FoodItem)
                .unwrap()
                .is_some()
        );
        assert_eq!(h.remote.calls(), 2);
    }

    /// Index whose first miss is immediately followed by another caller's
    /// refresh landing, before the reader gets to register its own.
    struct RacingIndex {
        store: Arc<LocalStore>,
        clock: Arc<ManualClock>,
        raced: std::sync::atomic::AtomicBool,
    }

    impl SearchIndex for RacingIndex {
        fn entries_for(
            &self,
            query: &str,
            kind: EntityKind,
        ) -> anyhow::Result<Option<IndexSnapshot>> {
            let snapshot = self.store.entries_for(query, kind)?;
            if snapshot.is_none() && !self.raced.swap(true, Ordering::SeqCst) {
                let food = crate::wire::food_from_wire(&wire_food("food-pasta", "Pasta"))?;
                self.store.insert_if_absent(&Entity::Food(food))?;
                self.store.replace_entries(
                    query,
                    kind,
                    &["food-pasta".to_string()],
                    self.clock.now(),
                )?;
            }
            Ok(snapshot)
        }

        fn replace_entries(
            &self,
            query: &str,
            kind: EntityKind,
            entity_ids: &[String],
            refreshed_at: chrono::DateTime<Utc>,
        ) -> anyhow::Result<()> {
            self.store
                .replace_entries(query, kind, entity_ids, refreshed_at)
        }

        fn invalidate(&self, query: &str, kind: EntityKind) -> anyhow::Result<bool> {
            self.store.invalidate(query, kind)
        }
    }

    #[tokio::test]
    async fn test_refresh_finished_before_registering_is_reused() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = Arc::new(MockRemote::returning(vec![pasta()]));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let index = Arc::new(RacingIndex {
            store: store.clone(),
            clock: clock.clone(),
            raced: std::sync::atomic::AtomicBool::new(false),
        });
        let orchestrator = SearchOrchestrator::with_clock(
            store.clone(),
            index,
            remote.clone(),
            SyncConfig::default(),
            clock,
        );

        let result = orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id(), "food-pasta");
        assert_eq!(remote.calls(), 0);
        assert_eq!(orchestrator.in_flight(), 0);
    }

    struct PanickyRemote {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteLookupService for PanickyRemote {
        async fn search(
            &self,
            _query: &str,
            _kind: EntityKind,
            _locale: &str,
        ) -> SyncResult<Vec<WireEntity>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("remote client bug");
            }
            Ok(vec![pasta()])
        }

        async fn fetch_by_id(&self, _kind: EntityKind, _id: &str) -> SyncResult<WireEntity> {
            Err(SyncError::remote(404, "Not Found"))
        }

        async fn upload(&self, entity: &WireEntity) -> SyncResult<WireEntity> {
            Ok(entity.clone())
        }

        async fn report(&self, _kind: EntityKind, _id: &str, _reason: &str) -> SyncResult<Ack> {
            Ok(Ack {
                accepted: true,
                message: None,
            })
        }
    }

    #[tokio::test]
    async fn test_panicking_refresh_is_deregistered() {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let remote = Arc::new(PanickyRemote {
            calls: AtomicUsize::new(0),
        });
        let orchestrator = SearchOrchestrator::new(
            store.clone(),
            store.clone(),
            remote.clone(),
            SyncConfig::default(),
        );

        let err = orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Storage(_)));
        assert_eq!(orchestrator.in_flight(), 0);

        // The next search reaches the remote again
        let result = orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lookup_local_then_remote() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        let entity = h
            .orchestrator
            .lookup(EntityKind::FoodItem, "food-pasta")
            .await
            .unwrap();
        assert_eq!(entity.name(), "Pasta");
        assert_eq!(h.remote.calls(), 1);

        // Second lookup is served locally
        h.orchestrator
            .lookup(EntityKind::FoodItem, "food-pasta")
            .await
            .unwrap();
        assert_eq!(h.remote.calls(), 1);
    }

    #[tokio::test]
    async fn test_lookup_missing_is_not_found() {
        let h = harness(MockRemote::returning(Vec::new()));
        let err = h
            .orchestrator
            .lookup(EntityKind::FoodItem, "nope")
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::not_found(EntityKind::FoodItem, "nope"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let h = harness(MockRemote::returning(vec![pasta()]));
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert!(h.orchestrator.invalidate(" Pasta", EntityKind::FoodItem).unwrap());
        h.orchestrator
            .search("pasta", EntityKind::FoodItem, "en")
            .await
            .unwrap();
        assert_eq!(h.remote.calls(), 2);
    }

    #[tokio::test]
    async fn test_upload_and_report_pass_through() {
        let h = harness(MockRemote::returning(Vec::new()));
        let food = crate::wire::food_from_wire(&wire_food("food-1", "Oats")).unwrap();
        let uploaded = h.orchestrator.upload(&Entity::Food(food)).await.unwrap();
        assert_eq!(uploaded.id(), "food-1");
        // Not cached
        assert!(!h.store.exists(EntityKind::FoodItem, "food-1").unwrap());

        let ack = h
            .orchestrator
            .report(EntityKind::FoodItem, "food-1", "wrong calories")
            .await
            .unwrap();
        assert!(ack.accepted);
        assert!(
            h.orchestrator
                .report(EntityKind::FoodItem, "food-1", " ")
                .await
                .is_err()
        );
    }
}
