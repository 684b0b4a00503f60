//! Nutrient folding and scaling shared by recipe composition and meal totals.

use crate::error::{SyncError, SyncResult};
use crate::models::{Entity, FoodItem, Ingredient, Nutrients, Recipe};

/// Anything that carries nutrient values for one unit of quantity.
pub trait NutrientSource {
    fn nutrients_per_unit(&self) -> SyncResult<Nutrients>;
}

impl NutrientSource for Nutrients {
    fn nutrients_per_unit(&self) -> SyncResult<Nutrients> {
        Ok(*self)
    }
}

/// Per gram.
impl NutrientSource for FoodItem {
    fn nutrients_per_unit(&self) -> SyncResult<Nutrients> {
        Ok(self.per_gram())
    }
}

/// Per serving of the recipe's yield. Fails for a recipe without a positive
/// yield.
impl NutrientSource for Recipe {
    fn nutrients_per_unit(&self) -> SyncResult<Nutrients> {
        scale(&self.nutrients, self.servings, 1.0)
    }
}

impl NutrientSource for Entity {
    fn nutrients_per_unit(&self) -> SyncResult<Nutrients> {
        match self {
            Entity::Food(f) => f.nutrients_per_unit(),
            Entity::Recipe(r) => r.nutrients_per_unit(),
        }
    }
}

/// Multiply each source's per-unit values by its quantity and sum.
pub fn aggregate<'a, S, I>(items: I) -> SyncResult<Nutrients>
where
    S: NutrientSource + ?Sized + 'a,
    I: IntoIterator<Item = (f64, &'a S)>,
{
    let mut total = Nutrients::default();
    for (quantity, source) in items {
        if !quantity.is_finite() || quantity < 0.0 {
            return Err(SyncError::InvalidInput(format!(
                "Quantity must be a non-negative number (got {quantity})"
            )));
        }
        total += source.nutrients_per_unit()?.times(quantity);
    }
    Ok(total)
}

/// Linearly rescale totals authored for `from_servings` to `to_servings`.
pub fn scale(totals: &Nutrients, from_servings: f64, to_servings: f64) -> SyncResult<Nutrients> {
    if !from_servings.is_finite() || from_servings <= 0.0 {
        return Err(SyncError::InvalidInput(format!(
            "Cannot scale from {from_servings} servings; must be greater than 0"
        )));
    }
    if !to_servings.is_finite() || to_servings < 0.0 {
        return Err(SyncError::InvalidInput(format!(
            "Cannot scale to {to_servings} servings; must not be negative"
        )));
    }
    Ok(totals.times(to_servings / from_servings))
}

/// Authored totals of a recipe from its ingredient lines. Every ingredient
/// must have its `food` joined.
pub fn recipe_totals(ingredients: &[Ingredient]) -> SyncResult<Nutrients> {
    let mut lines = Vec::with_capacity(ingredients.len());
    for ingredient in ingredients {
        let food = ingredient.food.as_ref().ok_or_else(|| {
            SyncError::not_found(
                crate::models::EntityKind::FoodItem,
                ingredient.food_item_id.clone(),
            )
        })?;
        lines.push((ingredient.quantity_g, food));
    }
    aggregate(lines)
}
