//! Wire representations exchanged with the remote lookup service and their
//! mapping to domain entities.

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::models::{
    Entity, FoodItem, Ingredient, Nutrients, Recipe, ServingSize, Visibility, validate_food_item,
    validate_recipe,
};
use crate::quantize::quantize;

pub const REMOTE_SOURCE: &str = "remote";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFoodItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    pub calories: f64,
    #[serde(default)]
    pub carbohydrates: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub fat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servings: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serving_size_g: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Ingredient lines on the wire only carry the gram quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireIngredient {
    pub quantity_g: f64,
    pub food: WireFoodItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecipe {
    pub id: String,
    pub name: String,
    pub calories: f64,
    #[serde(default)]
    pub carbohydrates: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub fat: f64,
    pub servings: f64,
    #[serde(default)]
    pub ingredients: Vec<WireIngredient>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
    #[serde(default)]
    pub deleted: bool,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WireEntity {
    FoodItem(WireFoodItem),
    Recipe(WireRecipe),
}

impl WireEntity {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::FoodItem(f) => &f.id,
            Self::Recipe(r) => &r.id,
        }
    }
}

/// A domain entity materialized from the wire plus the foods its ingredient
/// lines reference, which must be persisted before the entity itself.
#[derive(Debug, Clone)]
pub struct Materialized {
    pub entity: Entity,
    pub referenced_foods: Vec<FoodItem>,
}

pub fn food_from_wire(wire: &WireFoodItem) -> SyncResult<FoodItem> {
    let serving_size = match wire.serving_size_g {
        Some(grams) => ServingSize::from_grams(grams).ok_or_else(|| {
            SyncError::InvalidInput(format!(
                "Food '{}' has unsupported serving size {grams}g",
                wire.id
            ))
        })?,
        None => ServingSize::HundredGrams,
    };
    let now = Local::now().to_rfc3339();
    let food = FoodItem {
        id: wire.id.clone(),
        name: wire.name.trim().to_string(),
        brand: wire.brand.clone().filter(|b| !b.trim().is_empty()),
        nutrients: Nutrients::new(wire.calories, wire.carbohydrates, wire.protein, wire.fat),
        servings: wire.servings.unwrap_or(1),
        serving_size,
        source: wire
            .source
            .clone()
            .unwrap_or_else(|| REMOTE_SOURCE.to_string()),
        created_at: now.clone(),
        updated_at: now,
    };
    validate_food_item(&food)?;
    Ok(food)
}

/// Materialize a recipe; each ingredient's servings/size is derived from its
/// gram quantity.
pub fn recipe_from_wire(wire: &WireRecipe, max_servings: u32) -> SyncResult<Materialized> {
    let mut ingredients = Vec::with_capacity(wire.ingredients.len());
    let mut referenced_foods = Vec::with_capacity(wire.ingredients.len());
    for line in &wire.ingredients {
        let food = food_from_wire(&line.food)?;
        let (servings, serving_size) = quantize(line.quantity_g, &ServingSize::ALL, max_servings)?;
        ingredients.push(Ingredient {
            recipe_id: wire.id.clone(),
            food_item_id: food.id.clone(),
            quantity_g: line.quantity_g,
            servings,
            serving_size,
            food: Some(food.clone()),
        });
        referenced_foods.push(food);
    }

    let now = Local::now().to_rfc3339();
    let recipe = Recipe {
        id: wire.id.clone(),
        name: wire.name.trim().to_string(),
        nutrients: Nutrients::new(wire.calories, wire.carbohydrates, wire.protein, wire.fat),
        servings: wire.servings,
        ingredients,
        instructions: wire.instructions.clone(),
        visibility: wire.visibility,
        soft_deleted: wire.deleted,
        created_at: now.clone(),
        updated_at: now,
    };
    validate_recipe(&recipe)?;
    Ok(Materialized {
        entity: Entity::Recipe(recipe),
        referenced_foods,
    })
}

pub fn entity_from_wire(wire: &WireEntity, max_servings: u32) -> SyncResult<Materialized> {
    match wire {
        WireEntity::FoodItem(f) => Ok(Materialized {
            entity: Entity::Food(food_from_wire(f)?),
            referenced_foods: Vec::new(),
        }),
        WireEntity::Recipe(r) => recipe_from_wire(r, max_servings),
    }
}

#[must_use]
pub fn food_to_wire(food: &FoodItem) -> WireFoodItem {
    WireFoodItem {
        id: food.id.clone(),
        name: food.name.clone(),
        brand: food.brand.clone(),
        calories: food.nutrients.calories,
        carbohydrates: food.nutrients.carbohydrates,
        protein: food.nutrients.protein,
        fat: food.nutrients.fat,
        servings: Some(food.servings),
        serving_size_g: Some(food.serving_size.grams()),
        source: Some(food.source.clone()),
    }
}

/// Ingredients without a joined food cannot be expressed on the wire.
pub fn recipe_to_wire(recipe: &Recipe) -> SyncResult<WireRecipe> {
    let ingredients = recipe
        .ingredients
        .iter()
        .map(|i| {
            let food = i.food.as_ref().ok_or_else(|| {
                SyncError::InvalidInput(format!(
                    "Ingredient '{}' of recipe '{}' has no food attached",
                    i.food_item_id, recipe.id
                ))
            })?;
            Ok(WireIngredient {
                quantity_g: i.quantity_g,
                food: food_to_wire(food),
            })
        })
        .collect::<SyncResult<Vec<_>>>()?;

    Ok(WireRecipe {
        id: recipe.id.clone(),
        name: recipe.name.clone(),
        calories: recipe.nutrients.calories,
        carbohydrates: recipe.nutrients.carbohydrates,
        protein: recipe.nutrients.protein,
        fat: recipe.nutrients.fat,
        servings: recipe.servings,
        ingredients,
        instructions: recipe.instructions.clone(),
        visibility: recipe.visibility,
        deleted: recipe.soft_deleted,
    })
}

pub fn entity_to_wire(entity: &Entity) -> SyncResult<WireEntity> {
    match entity {
        Entity::Food(f) => Ok(WireEntity::FoodItem(food_to_wire(f))),
        Entity::Recipe(r) => Ok(WireEntity::Recipe(recipe_to_wire(r)?)),
    }
}
