//! Storage seams used by the orchestrator and the service facade.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::models::{Entity, EntityKind, IndexSnapshot, Visibility};

/// Durable keyed storage of food items and recipes.
pub trait EntityStore: Send + Sync {
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>>;
    fn exists(&self, kind: EntityKind, id: &str) -> Result<bool>;
    fn insert(&self, entity: &Entity) -> Result<()>;
    /// `false` when no entity with that id exists.
    fn update(&self, entity: &Entity) -> Result<bool>;
    fn delete(&self, kind: EntityKind, id: &str) -> Result<bool>;
    fn list_all(&self, kind: EntityKind, visibility: Option<Visibility>) -> Result<Vec<Entity>>;
    /// Insert unless an entity with the same id is already stored. Returns
    /// whether a row was written.
    fn insert_if_absent(&self, entity: &Entity) -> Result<bool>;
}

/// Persistent mapping from `(query, kind)` to the ids that answered it.
pub trait SearchIndex: Send + Sync {
    fn entries_for(&self, query: &str, kind: EntityKind) -> Result<Option<IndexSnapshot>>;
    /// Atomically replace every entry for `(query, kind)`.
    fn replace_entries(
        &self,
        query: &str,
        kind: EntityKind,
        entity_ids: &[String],
        refreshed_at: DateTime<Utc>,
    ) -> Result<()>;
    fn invalidate(&self, query: &str, kind: EntityKind) -> Result<bool>;
}

/// SQLite-backed store implementing both seams over one connection.
pub struct LocalStore {
    db: Mutex<Database>,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    fn db(&self) -> MutexGuard<'_, Database> {
        self.db
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl EntityStore for LocalStore {
    fn get(&self, kind: EntityKind, id: &str) -> Result<Option<Entity>> {
        let db = self.db();
        Ok(match kind {
            EntityKind::FoodItem => db.get_food(id)?.map(Entity::Food),
            EntityKind::Recipe => db.get_recipe(id)?.map(Entity::Recipe),
        })
    }

    fn exists(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let db = self.db();
        match kind {
            EntityKind::FoodItem => db.food_exists(id),
            EntityKind::Recipe => db.recipe_exists(id),
        }
    }

    fn insert(&self, entity: &Entity) -> Result<()> {
        let db = self.db();
        match entity {
            Entity::Food(f) => db.insert_food(f),
            Entity::Recipe(r) => db.insert_recipe(r),
        }
    }

    fn update(&self, entity: &Entity) -> Result<bool> {
        let db = self.db();
        match entity {
            Entity::Food(f) => db.update_food(f),
            Entity::Recipe(r) => db.update_recipe(r),
        }
    }

    fn delete(&self, kind: EntityKind, id: &str) -> Result<bool> {
        let db = self.db();
        match kind {
            EntityKind::FoodItem => db.delete_food(id),
            EntityKind::Recipe => db.delete_recipe(id),
        }
    }

    fn list_all(&self, kind: EntityKind, visibility: Option<Visibility>) -> Result<Vec<Entity>> {
        let db = self.db();
        Ok(match kind {
            // Foods carry no visibility
            EntityKind::FoodItem => db.list_foods()?.into_iter().map(Entity::Food).collect(),
            EntityKind::Recipe => db
                .list_recipes(visibility)?
                .into_iter()
                .map(Entity::Recipe)
                .collect(),
        })
    }

    fn insert_if_absent(&self, entity: &Entity) -> Result<bool> {
        let db = self.db();
        match entity {
            Entity::Food(f) => db.insert_food_if_absent(f),
            Entity::Recipe(r) => db.insert_recipe_if_absent(r),
        }
    }
}

impl SearchIndex for LocalStore {
    fn entries_for(&self, query: &str, kind: EntityKind) -> Result<Option<IndexSnapshot>> {
        self.db().index_snapshot(query, kind)
    }

    fn replace_entries(
        &self,
        query: &str,
        kind: EntityKind,
        entity_ids: &[String],
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        self.db()
            .replace_index_entries(query, kind, entity_ids, refreshed_at)
    }

    fn invalidate(&self, query: &str, kind: EntityKind) -> Result<bool> {
        self.db().invalidate_index(query, kind)
    }
}
