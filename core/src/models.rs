use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    FoodItem,
    Recipe,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FoodItem => "food_item",
            Self::Recipe => "recipe",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "food_item" | "food" | "foods" | "food_items" => Ok(Self::FoodItem),
            "recipe" | "recipes" => Ok(Self::Recipe),
            other => Err(SyncError::InvalidInput(format!(
                "Unknown entity kind '{other}'. Must be one of: food, recipe"
            ))),
        }
    }
}

/// Fixed serving units an ingredient or food can be expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingSize {
    OneGram,
    TenGrams,
    FiftyGrams,
    HundredGrams,
    TwoHundredGrams,
    FiveHundredGrams,
}

impl ServingSize {
    pub const ALL: [ServingSize; 6] = [
        ServingSize::OneGram,
        ServingSize::TenGrams,
        ServingSize::FiftyGrams,
        ServingSize::HundredGrams,
        ServingSize::TwoHundredGrams,
        ServingSize::FiveHundredGrams,
    ];

    #[must_use]
    pub fn grams(self) -> f64 {
        match self {
            Self::OneGram => 1.0,
            Self::TenGrams => 10.0,
            Self::FiftyGrams => 50.0,
            Self::HundredGrams => 100.0,
            Self::TwoHundredGrams => 200.0,
            Self::FiveHundredGrams => 500.0,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneGram => "1g",
            Self::TenGrams => "10g",
            Self::FiftyGrams => "50g",
            Self::HundredGrams => "100g",
            Self::TwoHundredGrams => "200g",
            Self::FiveHundredGrams => "500g",
        }
    }

    /// Exact match on the gram amount of a known unit.
    #[must_use]
    pub fn from_grams(grams: f64) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|s| (s.grams() - grams).abs() < 1e-9)
    }
}

impl fmt::Display for ServingSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServingSize {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let digits = lower.strip_suffix('g').unwrap_or(&lower).trim();
        digits
            .parse::<f64>()
            .ok()
            .and_then(Self::from_grams)
            .ok_or_else(|| SyncError::InvalidInput(format!("Unknown serving size '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    pub calories: f64,
    pub carbohydrates: f64,
    pub protein: f64,
    pub fat: f64,
}

impl Nutrients {
    #[must_use]
    pub fn new(calories: f64, carbohydrates: f64, protein: f64, fat: f64) -> Self {
        Self {
            calories,
            carbohydrates,
            protein,
            fat,
        }
    }

    #[must_use]
    pub fn times(self, factor: f64) -> Self {
        Self {
            calories: self.calories * factor,
            carbohydrates: self.carbohydrates * factor,
            protein: self.protein * factor,
            fat: self.fat * factor,
        }
    }

    fn fields(&self) -> [(&'static str, f64); 4] {
        [
            ("calories", self.calories),
            ("carbohydrates", self.carbohydrates),
            ("protein", self.protein),
            ("fat", self.fat),
        ]
    }

    pub fn validate(&self) -> SyncResult<()> {
        for (name, value) in self.fields() {
            if !value.is_finite() || value < 0.0 {
                return Err(SyncError::InvalidInput(format!(
                    "{name} must be a non-negative number (got {value})"
                )));
            }
        }
        Ok(())
    }
}

impl Add for Nutrients {
    type Output = Nutrients;

    fn add(self, rhs: Nutrients) -> Nutrients {
        Nutrients {
            calories: self.calories + rhs.calories,
            carbohydrates: self.carbohydrates + rhs.carbohydrates,
            protein: self.protein + rhs.protein,
            fat: self.fat + rhs.fat,
        }
    }
}

impl AddAssign for Nutrients {
    fn add_assign(&mut self, rhs: Nutrients) {
        *self = *self + rhs;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodItem {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub brand: Option<String>,
    /// Per declared serving, i.e. `servings × serving_size` grams.
    #[serde(flatten)]
    pub nutrients: Nutrients,
    pub servings: u32,
    pub serving_size: ServingSize,
    pub source: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl FoodItem {
    /// Grams covered by the declared nutrient values.
    #[must_use]
    pub fn declared_grams(&self) -> f64 {
        f64::from(self.servings) * self.serving_size.grams()
    }

    #[must_use]
    pub fn per_gram(&self) -> Nutrients {
        let grams = self.declared_grams();
        if grams > 0.0 {
            self.nutrients.times(1.0 / grams)
        } else {
            Nutrients::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Owner,
}

impl Visibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Owner => "owner",
        }
    }
}

impl FromStr for Visibility {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "owner" | "private" => Ok(Self::Owner),
            other => Err(SyncError::InvalidInput(format!(
                "Unknown visibility '{other}'. Must be one of: public, owner"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ingredient {
    pub recipe_id: String,
    pub food_item_id: String,
    /// Source of truth; `servings`/`serving_size` are a quantized view of it.
    pub quantity_g: f64,
    pub servings: u32,
    pub serving_size: ServingSize,
    // Joined for display, never persisted
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub food: Option<FoodItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    /// Whole recipe as authored, not per serving.
    #[serde(flatten)]
    pub nutrients: Nutrients,
    pub servings: f64,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub instructions: String,
    pub visibility: Visibility,
    #[serde(default)]
    pub soft_deleted: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    pub servings: f64,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
}

fn default_visibility() -> Visibility {
    Visibility::Owner
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub total_weight_g: f64,
    pub per_serving: Nutrients,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScaledRecipe {
    pub id: String,
    pub name: String,
    pub from_servings: f64,
    pub to_servings: f64,
    pub totals: Nutrients,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    #[serde(rename = "food_item")]
    Food(FoodItem),
    Recipe(Recipe),
}

impl Entity {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Food(f) => &f.id,
            Self::Recipe(r) => &r.id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Food(_) => EntityKind::FoodItem,
            Self::Recipe(_) => EntityKind::Recipe,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Food(f) => &f.name,
            Self::Recipe(r) => &r.name,
        }
    }

    #[must_use]
    pub fn nutrients(&self) -> Nutrients {
        match self {
            Self::Food(f) => f.nutrients,
            Self::Recipe(r) => r.nutrients,
        }
    }

    #[must_use]
    pub fn is_soft_deleted(&self) -> bool {
        matches!(self, Self::Recipe(r) if r.soft_deleted)
    }
}

/// All index rows for one `(query, kind)`, stamped together by a single refresh.
///
/// An empty `entity_ids` is a cached "no results" answer, distinct from a query
/// that was never indexed (`None` from the index).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSnapshot {
    pub query: String,
    pub kind: EntityKind,
    pub refreshed_at: DateTime<Utc>,
    pub entity_ids: Vec<String>,
}

/// One line of a meal: grams for foods, servings for recipes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealLine {
    pub kind: EntityKind,
    pub id: String,
    pub quantity: f64,
}

impl FromStr for MealLine {
    type Err = SyncError;

    /// Parses `food:<id>:<grams>` or `recipe:<id>:<servings>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(id), Some(quantity)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(SyncError::InvalidInput(format!(
                "Invalid meal line '{s}'. Use food:<id>:<grams> or recipe:<id>:<servings>"
            )));
        };
        let quantity = quantity.trim().parse::<f64>().map_err(|_| {
            SyncError::InvalidInput(format!("Invalid quantity '{quantity}' in meal line '{s}'"))
        })?;
        Ok(MealLine {
            kind: kind.parse()?,
            id: id.trim().to_string(),
            quantity,
        })
    }
}

/// Lowercase, trim and collapse inner whitespace so "  Pasta  Salad" and
/// "pasta salad" share one index entry.
#[must_use]
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn validate_food_item(food: &FoodItem) -> SyncResult<()> {
    if food.id.trim().is_empty() {
        return Err(SyncError::InvalidInput("Food id must not be empty".to_string()));
    }
    if food.name.trim().is_empty() {
        return Err(SyncError::InvalidInput("Food name must not be empty".to_string()));
    }
    if food.servings == 0 {
        return Err(SyncError::InvalidInput(
            "Food servings must be at least 1".to_string(),
        ));
    }
    food.nutrients.validate()
}

pub fn validate_ingredient(ingredient: &Ingredient) -> SyncResult<()> {
    if !ingredient.quantity_g.is_finite() || ingredient.quantity_g <= 0.0 {
        return Err(SyncError::InvalidInput(format!(
            "Ingredient quantity_g must be greater than 0 (got {})",
            ingredient.quantity_g
        )));
    }
    Ok(())
}

pub fn validate_recipe(recipe: &Recipe) -> SyncResult<()> {
    if recipe.id.trim().is_empty() {
        return Err(SyncError::InvalidInput("Recipe id must not be empty".to_string()));
    }
    if recipe.name.trim().is_empty() {
        return Err(SyncError::InvalidInput(
            "Recipe name must not be empty".to_string(),
        ));
    }
    if !recipe.servings.is_finite() || recipe.servings <= 0.0 {
        return Err(SyncError::InvalidInput(
            "Recipe servings must be greater than 0".to_string(),
        ));
    }
    recipe.nutrients.validate()?;
    recipe.ingredients.iter().try_for_each(validate_ingredient)
}

pub fn validate_entity(entity: &Entity) -> SyncResult<()> {
    match entity {
        Entity::Food(f) => validate_food_item(f),
        Entity::Recipe(r) => validate_recipe(r),
    }
}
