//! Typed domain queries for the Datagotchi client
//!
//! Thin wrappers over the fetch engine: each function pairs a fixed key
//! template with a producer that performs one read or write against the
//! backend, then decodes the cached JSON payload into its row type.
//!
//! ## Cache keys
//!
//! - `pets-{wallet}` - all pets owned by a wallet
//! - `pet-{id}` - a single pet
//! - `profile-{wallet}` - a player profile
//! - `leaderboard-{limit}` - top pets with owner usernames
//! - `update-pet-{id}` - pet stat mutations
//!
//! A successful stat update invalidates `pet-{id}` only; a cached
//! leaderboard keeps serving its prior Fresh data until its own key is
//! invalidated.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::executor::ProducerError;
use crate::{CacheConfig, CacheStore, FetchError, FetchHandle, FetchSnapshot, QueryExecutor};

/// Pet rarity tiers, stored lowercase in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

/// A pet row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub id: String,
    pub owner_wallet: String,
    pub name: String,
    pub rarity: Rarity,
    pub health: i32,
    pub strength: i32,
    pub social: i32,
    pub created_at: String,
}

/// A player profile row, keyed by wallet address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub wallet_address: String,
    pub username: String,
    pub created_at: String,
}

/// One leaderboard row: a pet plus its owner's username from the joined
/// profile, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    #[serde(flatten)]
    pub pet: Pet,
    pub username: Option<String>,
}

/// Partial pet fields for a stat update. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PetUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub social: Option<i32>,
}

/// Remote store the pet queries read from and write to.
///
/// Implementations wrap the hosted database API; tests use an in-memory
/// mock. Timeouts are the implementation's responsibility.
#[async_trait]
pub trait PetBackend: Send + Sync + 'static {
    async fn fetch_pets_by_owner(&self, wallet_address: &str) -> Result<Vec<Pet>, ProducerError>;

    async fn fetch_pet_by_id(&self, pet_id: &str) -> Result<Pet, ProducerError>;

    async fn fetch_profile_by_wallet(&self, wallet_address: &str)
        -> Result<Profile, ProducerError>;

    /// Top pets ordered by stats, joined with owner usernames.
    async fn fetch_leaderboard(&self, limit: usize) -> Result<Vec<LeaderboardEntry>, ProducerError>;

    /// Apply a partial update and return the updated row.
    async fn update_pet(&self, pet_id: &str, updates: PetUpdate) -> Result<Pet, ProducerError>;
}

/// Build the shared per-session executor the pet queries run on.
///
/// Created once at session start; `executor.store().clear_all()` tears the
/// cache down on logout.
pub fn session_executor(config: CacheConfig) -> Arc<QueryExecutor<Value>> {
    Arc::new(QueryExecutor::new(Arc::new(CacheStore::new()), config))
}

/// Per-screen query interface: a [`FetchHandle`] on the shared session
/// executor plus a backend, with one function per screen query.
pub struct PetQueries<B: PetBackend> {
    handle: FetchHandle<Value>,
    backend: Arc<B>,
}

impl<B: PetBackend> Clone for PetQueries<B> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: PetBackend> PetQueries<B> {
    pub fn new(executor: Arc<QueryExecutor<Value>>, backend: Arc<B>) -> Self {
        Self {
            handle: FetchHandle::new(executor),
            backend,
        }
    }

    /// The underlying fetch handle, for snapshots and suspense rendering.
    pub fn handle(&self) -> &FetchHandle<Value> {
        &self.handle
    }

    /// Generic query escape hatch for one-off reads not covered by the
    /// typed functions below.
    pub async fn query<F, Fut>(&self, key: &str, producer: F) -> FetchSnapshot<Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, ProducerError>>,
    {
        self.handle.execute_query(key, producer).await
    }

    /// Generic mutation helper: runs `mutation` and clears the listed cache
    /// keys on success.
    pub async fn mutate<F, Fut>(
        &self,
        key: &str,
        mutation: F,
        caches_to_clear: &[&str],
    ) -> Result<Arc<Value>, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, ProducerError>>,
    {
        self.handle.mutate(key, mutation, caches_to_clear).await
    }

    pub async fn fetch_pets_by_owner(&self, wallet_address: &str) -> Result<Vec<Pet>, FetchError> {
        if wallet_address.is_empty() {
            return Err(FetchError::MissingArgument("wallet_address"));
        }
        let key = format!("pets-{wallet_address}");
        let backend = Arc::clone(&self.backend);
        let wallet = wallet_address.to_owned();
        let snapshot = self
            .handle
            .execute_query(&key, move || async move {
                let pets = backend.fetch_pets_by_owner(&wallet).await?;
                Ok(serde_json::to_value(pets)?)
            })
            .await;
        decode(snapshot)
    }

    pub async fn fetch_pet_by_id(&self, pet_id: &str) -> Result<Pet, FetchError> {
        if pet_id.is_empty() {
            return Err(FetchError::MissingArgument("pet_id"));
        }
        let key = format!("pet-{pet_id}");
        let backend = Arc::clone(&self.backend);
        let id = pet_id.to_owned();
        let snapshot = self
            .handle
            .execute_query(&key, move || async move {
                let pet = backend.fetch_pet_by_id(&id).await?;
                Ok(serde_json::to_value(pet)?)
            })
            .await;
        decode(snapshot)
    }

    pub async fn fetch_profile_by_wallet(&self, wallet_address: &str) -> Result<Profile, FetchError> {
        if wallet_address.is_empty() {
            return Err(FetchError::MissingArgument("wallet_address"));
        }
        let key = format!("profile-{wallet_address}");
        let backend = Arc::clone(&self.backend);
        let wallet = wallet_address.to_owned();
        let snapshot = self
            .handle
            .execute_query(&key, move || async move {
                let profile = backend.fetch_profile_by_wallet(&wallet).await?;
                Ok(serde_json::to_value(profile)?)
            })
            .await;
        decode(snapshot)
    }

    pub async fn fetch_leaderboard(
        &self,
        limit: usize,
    ) -> Result<Vec<LeaderboardEntry>, FetchError> {
        if limit == 0 {
            return Err(FetchError::MissingArgument("limit"));
        }
        let key = format!("leaderboard-{limit}");
        let backend = Arc::clone(&self.backend);
        let snapshot = self
            .handle
            .execute_query(&key, move || async move {
                let rows = backend.fetch_leaderboard(limit).await?;
                Ok(serde_json::to_value(rows)?)
            })
            .await;
        decode(snapshot)
    }

    /// Update a pet's stats and invalidate its cached read, so the next
    /// `fetch_pet_by_id` refetches. Cached aggregates (owner pet lists, the
    /// leaderboard) are intentionally left alone.
    pub async fn update_pet_stats(
        &self,
        pet_id: &str,
        updates: PetUpdate,
    ) -> Result<Pet, FetchError> {
        if pet_id.is_empty() {
            return Err(FetchError::MissingArgument("pet_id"));
        }
        let key = format!("update-pet-{pet_id}");
        let pet_key = format!("pet-{pet_id}");
        let backend = Arc::clone(&self.backend);
        let id = pet_id.to_owned();
        let value = self
            .handle
            .mutate(
                &key,
                move || async move {
                    let pet = backend.update_pet(&id, updates).await?;
                    Ok(serde_json::to_value(pet)?)
                },
                &[pet_key.as_str()],
            )
            .await?;
        decode_value(&value)
    }

    /// Remove one entry from the shared session cache.
    pub fn clear_cache(&self, key: &str) {
        self.handle.clear_cache(key);
    }

    /// Reset this screen's local fetch state (the shared cache is untouched).
    pub fn reset(&self) {
        self.handle.reset();
    }
}

fn decode<T: DeserializeOwned>(snapshot: FetchSnapshot<Value>) -> Result<T, FetchError> {
    if let Some(message) = snapshot.error {
        return Err(FetchError::Producer(message));
    }
    match snapshot.data {
        Some(value) => decode_value(&value),
        None => Err(FetchError::Producer("query settled without data".to_owned())),
    }
}

fn decode_value<T: DeserializeOwned>(value: &Value) -> Result<T, FetchError> {
    serde_json::from_value(value.clone()).map_err(|e| FetchError::Producer(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn pet(id: &str, owner: &str, health: i32) -> Pet {
        Pet {
            id: id.to_owned(),
            owner_wallet: owner.to_owned(),
            name: format!("pet-{id}"),
            rarity: Rarity::Common,
            health,
            strength: 10,
            social: 10,
            created_at: "2024-01-01T00:00:00Z".to_owned(),
        }
    }

    #[derive(Default)]
    struct MockBackend {
        pets: Mutex<HashMap<String, Pet>>,
        pet_fetches: AtomicUsize,
        list_fetches: AtomicUsize,
        leaderboard_fetches: AtomicUsize,
        updates: AtomicUsize,
        fail_updates: bool,
    }

    impl MockBackend {
        fn with_pets(pets: Vec<Pet>) -> Arc<Self> {
            let backend = Self::default();
            let mut map = backend.pets.lock().unwrap();
            for p in pets {
                map.insert(p.id.clone(), p);
            }
            drop(map);
            Arc::new(backend)
        }
    }

    #[async_trait]
    impl PetBackend for MockBackend {
        async fn fetch_pets_by_owner(
            &self,
            wallet_address: &str,
        ) -> Result<Vec<Pet>, ProducerError> {
            self.list_fetches.fetch_add(1, Ordering::SeqCst);
            let pets = self.pets.lock().unwrap();
            Ok(pets
                .values()
                .filter(|p| p.owner_wallet == wallet_address)
                .cloned()
                .collect())
        }

        async fn fetch_pet_by_id(&self, pet_id: &str) -> Result<Pet, ProducerError> {
            self.pet_fetches.fetch_add(1, Ordering::SeqCst);
            let pets = self.pets.lock().unwrap();
            pets.get(pet_id)
                .cloned()
                .ok_or_else(|| "pet not found".into())
        }

        async fn fetch_profile_by_wallet(
            &self,
            wallet_address: &str,
        ) -> Result<Profile, ProducerError> {
            Ok(Profile {
                wallet_address: wallet_address.to_owned(),
                username: "rex_owner".to_owned(),
                created_at: "2024-01-01T00:00:00Z".to_owned(),
            })
        }

        async fn fetch_leaderboard(
            &self,
            limit: usize,
        ) -> Result<Vec<LeaderboardEntry>, ProducerError> {
            self.leaderboard_fetches.fetch_add(1, Ordering::SeqCst);
            let pets = self.pets.lock().unwrap();
            let mut rows: Vec<Pet> = pets.values().cloned().collect();
            rows.sort_by(|a, b| b.health.cmp(&a.health));
            Ok(rows
                .into_iter()
                .take(limit)
                .map(|pet| LeaderboardEntry {
                    pet,
                    username: Some("rex_owner".to_owned()),
                })
                .collect())
        }

        async fn update_pet(&self, pet_id: &str, updates: PetUpdate) -> Result<Pet, ProducerError> {
            self.updates.fetch_add(1, Ordering::SeqCst);
            if self.fail_updates {
                return Err("write failed".into());
            }
            let mut pets = self.pets.lock().unwrap();
            let pet = pets.get_mut(pet_id).ok_or("pet not found")?;
            if let Some(name) = updates.name {
                pet.name = name;
            }
            if let Some(health) = updates.health {
                pet.health = health;
            }
            if let Some(strength) = updates.strength {
                pet.strength = strength;
            }
            if let Some(social) = updates.social {
                pet.social = social;
            }
            Ok(pet.clone())
        }
    }

    fn queries(backend: Arc<MockBackend>) -> PetQueries<MockBackend> {
        PetQueries::new(session_executor(CacheConfig::default()), backend)
    }

    #[tokio::test]
    async fn pet_by_id_is_cached_across_calls() {
        let backend = MockBackend::with_pets(vec![pet("42", "0xabc", 80)]);
        let queries = queries(Arc::clone(&backend));

        let first = queries.fetch_pet_by_id("42").await.unwrap();
        let second = queries.fetch_pet_by_id("42").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.name, "pet-42");
        assert_eq!(backend.pet_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn update_invalidates_the_pet_read() {
        let backend = MockBackend::with_pets(vec![pet("42", "0xabc", 80)]);
        let queries = queries(Arc::clone(&backend));

        assert_eq!(queries.fetch_pet_by_id("42").await.unwrap().health, 80);

        let updated = queries
            .update_pet_stats(
                "42",
                PetUpdate {
                    health: Some(95),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.health, 95);

        // The cached read was cleared, so this refetches and sees the update.
        assert_eq!(queries.fetch_pet_by_id("42").await.unwrap().health, 95);
        assert_eq!(backend.pet_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn update_leaves_cached_leaderboard_alone() {
        let backend = MockBackend::with_pets(vec![
            pet("1", "0xabc", 90),
            pet("2", "0xdef", 70),
        ]);
        let queries = queries(Arc::clone(&backend));

        let before = queries.fetch_leaderboard(10).await.unwrap();
        assert_eq!(before[0].pet.health, 90);

        queries
            .update_pet_stats(
                "2",
                PetUpdate {
                    health: Some(100),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Still the cached ranking; the leaderboard key was not invalidated.
        let after = queries.fetch_leaderboard(10).await.unwrap();
        assert_eq!(after, before);
        assert_eq!(backend.leaderboard_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_update_keeps_cached_read() {
        let mut backend = MockBackend::default();
        backend.fail_updates = true;
        let backend = Arc::new(backend);
        backend
            .pets
            .lock()
            .unwrap()
            .insert("42".to_owned(), pet("42", "0xabc", 80));
        let queries = queries(Arc::clone(&backend));

        queries.fetch_pet_by_id("42").await.unwrap();

        let err = queries
            .update_pet_stats(
                "42",
                PetUpdate {
                    health: Some(95),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(err, Err(FetchError::Producer("write failed".to_owned())));

        // No invalidation on failure: the read is still served from cache.
        queries.fetch_pet_by_id("42").await.unwrap();
        assert_eq!(backend.pet_fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_arguments_fail_without_touching_backend_or_cache() {
        let backend = MockBackend::with_pets(vec![]);
        let queries = queries(Arc::clone(&backend));

        assert_eq!(
            queries.fetch_pets_by_owner("").await,
            Err(FetchError::MissingArgument("wallet_address"))
        );
        assert_eq!(
            queries.fetch_pet_by_id("").await,
            Err(FetchError::MissingArgument("pet_id"))
        );
        assert_eq!(
            queries.fetch_leaderboard(0).await,
            Err(FetchError::MissingArgument("limit"))
        );

        assert_eq!(backend.list_fetches.load(Ordering::SeqCst), 0);
        assert!(queries.handle().executor().store().is_empty());
    }

    #[tokio::test]
    async fn screens_share_one_session_cache() {
        let backend = MockBackend::with_pets(vec![pet("42", "0xabc", 80)]);
        let executor = session_executor(CacheConfig::default());
        let screen_a = PetQueries::new(Arc::clone(&executor), Arc::clone(&backend));
        let screen_b = PetQueries::new(Arc::clone(&executor), Arc::clone(&backend));

        screen_a.fetch_pet_by_id("42").await.unwrap();
        screen_b.fetch_pet_by_id("42").await.unwrap();
        assert_eq!(backend.pet_fetches.load(Ordering::SeqCst), 1);

        // Logout: clearing the session store forces a refetch everywhere.
        executor.store().clear_all();
        screen_b.fetch_pet_by_id("42").await.unwrap();
        assert_eq!(backend.pet_fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn profile_and_pet_list_decode_typed_rows() {
        let backend = MockBackend::with_pets(vec![
            pet("1", "0xabc", 50),
            pet("2", "0xabc", 60),
            pet("3", "0xdef", 70),
        ]);
        let queries = queries(Arc::clone(&backend));

        let profile = queries.fetch_profile_by_wallet("0xabc").await.unwrap();
        assert_eq!(profile.username, "rex_owner");

        let mut pets = queries.fetch_pets_by_owner("0xabc").await.unwrap();
        pets.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(pets.len(), 2);
        assert_eq!(pets[1].health, 60);
    }

    #[tokio::test]
    async fn snapshot_feeds_the_suspense_contract() {
        let backend = MockBackend::with_pets(vec![]);
        let queries = queries(Arc::clone(&backend));

        let err = queries.fetch_pet_by_id("missing").await;
        assert_eq!(err, Err(FetchError::Producer("pet not found".to_owned())));

        let snapshot = queries.handle().snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.has_error());
        assert!(!snapshot.has_data());
    }
}
