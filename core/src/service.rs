use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    Entity, EntityKind, FoodItem, Ingredient, MealLine, NewRecipe, Nutrients, Recipe,
    RecipeDetail, ScaledRecipe, ServingSize, Visibility, validate_food_item, validate_recipe,
};
use crate::nutrients::{aggregate, recipe_totals, scale};
use crate::orchestrator::SearchOrchestrator;
use crate::quantize::quantize;
use crate::remote::{Ack, RemoteLookupService};
use crate::store::{EntityStore, LocalStore};

/// Application facade over the local store and the search orchestrator.
///
/// Storage calls are synchronous; async methods only wait on the remote.
pub struct LarderService {
    store: Arc<LocalStore>,
    orchestrator: SearchOrchestrator,
}

impl LarderService {
    pub fn open(
        db_path: &Path,
        remote: Arc<dyn RemoteLookupService>,
        config: SyncConfig,
    ) -> Result<Self> {
        Ok(Self::with_store(LocalStore::open(db_path)?, remote, config))
    }

    pub fn open_in_memory(remote: Arc<dyn RemoteLookupService>, config: SyncConfig) -> Result<Self> {
        Ok(Self::with_store(
            LocalStore::open_in_memory()?,
            remote,
            config,
        ))
    }

    pub fn with_store(
        store: LocalStore,
        remote: Arc<dyn RemoteLookupService>,
        config: SyncConfig,
    ) -> Self {
        let store = Arc::new(store);
        let orchestrator = SearchOrchestrator::new(store.clone(), store.clone(), remote, config);
        Self {
            store,
            orchestrator,
        }
    }

    #[must_use]
    pub fn orchestrator(&self) -> &SearchOrchestrator {
        &self.orchestrator
    }

    // --- Search & remote ---

    pub async fn search(
        &self,
        query: &str,
        kind: EntityKind,
        locale: &str,
    ) -> SyncResult<Vec<Entity>> {
        self.orchestrator.search(query, kind, locale).await
    }

    pub async fn lookup(&self, kind: EntityKind, id: &str) -> SyncResult<Entity> {
        self.orchestrator.lookup(kind, id).await
    }

    /// Upload a locally stored entity.
    pub async fn upload(&self, kind: EntityKind, id: &str) -> SyncResult<Entity> {
        let entity = self.get_entity(kind, id)?;
        self.orchestrator.upload(&entity).await
    }

    pub async fn report(&self, kind: EntityKind, id: &str, reason: &str) -> SyncResult<Ack> {
        self.orchestrator.report(kind, id, reason).await
    }

    pub fn invalidate(&self, query: &str, kind: EntityKind) -> SyncResult<bool> {
        self.orchestrator.invalidate(query, kind)
    }

    fn get_entity(&self, kind: EntityKind, id: &str) -> SyncResult<Entity> {
        self.store
            .get(kind, id)?
            .ok_or_else(|| SyncError::not_found(kind, id))
    }

    // --- Foods ---

    /// Explicit user save: inserts a new food or overwrites the stored one.
    /// A blank id gets a fresh UUID.
    pub fn save_food(&self, mut food: FoodItem) -> SyncResult<FoodItem> {
        if food.id.trim().is_empty() {
            food.id = Uuid::new_v4().to_string();
        }
        if food.source.trim().is_empty() {
            food.source = "manual".to_string();
        }
        food.name = food.name.trim().to_string();
        validate_food_item(&food)?;

        let entity = Entity::Food(food);
        if !self.store.update(&entity)? {
            self.store.insert(&entity)?;
        }
        self.get_food(entity.id())
    }

    pub fn get_food(&self, id: &str) -> SyncResult<FoodItem> {
        match self.get_entity(EntityKind::FoodItem, id)? {
            Entity::Food(food) => Ok(food),
            Entity::Recipe(_) => Err(SyncError::not_found(EntityKind::FoodItem, id)),
        }
    }

    pub fn list_foods(&self) -> SyncResult<Vec<FoodItem>> {
        Ok(self
            .store
            .list_all(EntityKind::FoodItem, None)?
            .into_iter()
            .filter_map(|e| match e {
                Entity::Food(f) => Some(f),
                Entity::Recipe(_) => None,
            })
            .collect())
    }

    pub fn delete_food(&self, id: &str) -> SyncResult<()> {
        if !self.store.delete(EntityKind::FoodItem, id)? {
            return Err(SyncError::not_found(EntityKind::FoodItem, id));
        }
        Ok(())
    }

    // --- Recipes ---

    pub fn create_recipe(&self, new: &NewRecipe) -> SyncResult<Recipe> {
        let now = Local::now().to_rfc3339();
        let recipe = Recipe {
            id: Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            nutrients: Nutrients::default(),
            servings: new.servings,
            ingredients: Vec::new(),
            instructions: new.instructions.clone(),
            visibility: new.visibility,
            soft_deleted: false,
            created_at: now.clone(),
            updated_at: now,
        };
        validate_recipe(&recipe)?;
        self.store.insert(&Entity::Recipe(recipe.clone()))?;
        Ok(recipe)
    }

    pub fn get_recipe(&self, id: &str) -> SyncResult<Recipe> {
        match self.get_entity(EntityKind::Recipe, id)? {
            Entity::Recipe(recipe) => Ok(recipe),
            Entity::Food(_) => Err(SyncError::not_found(EntityKind::Recipe, id)),
        }
    }

    /// Add `quantity_g` of a food to a recipe. Adding a food that is already
    /// an ingredient adds to its quantity. Totals are recomputed.
    pub fn add_ingredient(
        &self,
        recipe_id: &str,
        food_id: &str,
        quantity_g: f64,
    ) -> SyncResult<Recipe> {
        if !quantity_g.is_finite() || quantity_g <= 0.0 {
            return Err(SyncError::InvalidInput(format!(
                "Ingredient quantity must be greater than 0 (got {quantity_g})"
            )));
        }
        let mut recipe = self.get_recipe(recipe_id)?;
        let food = self.get_food(food_id)?;
        let max_servings = self.orchestrator.config().max_servings;

        if let Some(existing) = recipe
            .ingredients
            .iter_mut()
            .find(|i| i.food_item_id == food_id)
        {
            existing.quantity_g += quantity_g;
            (existing.servings, existing.serving_size) =
                quantize(existing.quantity_g, &ServingSize::ALL, max_servings)?;
            existing.food = Some(food);
        } else {
            let (servings, serving_size) = quantize(quantity_g, &ServingSize::ALL, max_servings)?;
            recipe.ingredients.push(Ingredient {
                recipe_id: recipe.id.clone(),
                food_item_id: food.id.clone(),
                quantity_g,
                servings,
                serving_size,
                food: Some(food),
            });
        }
        self.save_recomputed(recipe)
    }

    pub fn remove_ingredient(&self, recipe_id: &str, food_id: &str) -> SyncResult<Recipe> {
        let mut recipe = self.get_recipe(recipe_id)?;
        let before = recipe.ingredients.len();
        recipe.ingredients.retain(|i| i.food_item_id != food_id);
        if recipe.ingredients.len() == before {
            return Err(SyncError::not_found(EntityKind::FoodItem, food_id));
        }
        self.save_recomputed(recipe)
    }

    fn save_recomputed(&self, mut recipe: Recipe) -> SyncResult<Recipe> {
        recipe.nutrients = recipe_totals(&recipe.ingredients)?;
        validate_recipe(&recipe)?;
        self.store.update(&Entity::Recipe(recipe.clone()))?;
        self.get_recipe(&recipe.id)
    }

    /// Change the yield. Totals describe the whole recipe and stay as they are.
    pub fn set_recipe_servings(&self, recipe_id: &str, servings: f64) -> SyncResult<Recipe> {
        let mut recipe = self.get_recipe(recipe_id)?;
        recipe.servings = servings;
        validate_recipe(&recipe)?;
        self.store.update(&Entity::Recipe(recipe))?;
        self.get_recipe(recipe_id)
    }

    pub fn recipe_detail(&self, recipe_id: &str) -> SyncResult<RecipeDetail> {
        let recipe = self.get_recipe(recipe_id)?;
        let per_serving = scale(&recipe.nutrients, recipe.servings, 1.0)?;
        let total_weight_g = recipe.ingredients.iter().map(|i| i.quantity_g).sum();
        Ok(RecipeDetail {
            recipe,
            total_weight_g,
            per_serving,
        })
    }

    pub fn scale_recipe(&self, recipe_id: &str, to_servings: f64) -> SyncResult<ScaledRecipe> {
        let recipe = self.get_recipe(recipe_id)?;
        let totals = scale(&recipe.nutrients, recipe.servings, to_servings)?;
        Ok(ScaledRecipe {
            id: recipe.id,
            name: recipe.name,
            from_servings: recipe.servings,
            to_servings,
            totals,
        })
    }

    pub fn list_recipes(&self, visibility: Option<Visibility>) -> SyncResult<Vec<Recipe>> {
        Ok(self
            .store
            .list_all(EntityKind::Recipe, visibility)?
            .into_iter()
            .filter_map(|e| match e {
                Entity::Recipe(r) => Some(r),
                Entity::Food(_) => None,
            })
            .collect())
    }

    /// Hide a recipe from listings and search results but keep its row.
    pub fn soft_delete_recipe(&self, recipe_id: &str) -> SyncResult<()> {
        let mut recipe = self.get_recipe(recipe_id)?;
        recipe.soft_deleted = true;
        self.store.update(&Entity::Recipe(recipe))?;
        Ok(())
    }

    /// Remove a recipe and its ingredient lines.
    pub fn delete_recipe(&self, recipe_id: &str) -> SyncResult<()> {
        if !self.store.delete(EntityKind::Recipe, recipe_id)? {
            return Err(SyncError::not_found(EntityKind::Recipe, recipe_id));
        }
        Ok(())
    }

    // --- Meals ---

    /// Nutrient totals for a meal: food lines are in grams, recipe lines in
    /// servings.
    pub fn meal_totals(&self, lines: &[MealLine]) -> SyncResult<Nutrients> {
        let resolved = lines
            .iter()
            .map(|line| Ok((line.quantity, self.get_entity(line.kind, &line.id)?)))
            .collect::<SyncResult<Vec<_>>>()?;
        aggregate(resolved.iter().map(|(quantity, entity)| (*quantity, entity)))
    }
}
