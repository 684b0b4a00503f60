use anyhow::{Context, Result, bail};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::models::{Entity, FoodItem, Ingredient, Nutrients, Recipe};

/// Parse a gram amount: "200", "200g", "200.5 g".
pub(crate) fn parse_grams(s: &str) -> Result<f64> {
    let trimmed = s.trim().trim_end_matches('g').trim();
    let value: f64 = trimmed
        .parse()
        .with_context(|| format!("Invalid quantity: '{s}'. Use a number like '200' or '200g'"))?;
    if !value.is_finite() || value <= 0.0 {
        bail!("Quantity must be greater than 0");
    }
    Ok(value)
}

pub(crate) fn print_entity_table(entities: &[Entity]) {
    #[derive(Tabled)]
    struct EntityRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Kind")]
        kind: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Per")]
        per: String,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "F")]
        fat: String,
    }

    let rows: Vec<EntityRow> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let n = e.nutrients();
            let per = match e {
                Entity::Food(f) => serving_label(f),
                Entity::Recipe(r) => format!("{} servings", r.servings),
            };
            EntityRow {
                idx: i + 1,
                id: truncate(e.id(), 24),
                kind: e.kind().to_string(),
                name: truncate(e.name(), 35),
                per,
                calories: format!("{:.0}", no_neg_zero(n.calories)),
                carbs: format!("{:.1}", no_neg_zero(n.carbohydrates)),
                protein: format!("{:.1}", no_neg_zero(n.protein)),
                fat: format!("{:.1}", no_neg_zero(n.fat)),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(5..9)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_food_table(foods: &[FoodItem]) {
    #[derive(Tabled)]
    struct FoodRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Brand")]
        brand: String,
        #[tabled(rename = "Per")]
        per: String,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "F")]
        fat: String,
        #[tabled(rename = "Source")]
        source: String,
    }

    let rows: Vec<FoodRow> = foods
        .iter()
        .map(|f| FoodRow {
            id: truncate(&f.id, 24),
            name: truncate(&f.name, 35),
            brand: f
                .brand
                .as_deref()
                .map(|b| truncate(b, 20))
                .unwrap_or_default(),
            per: serving_label(f),
            calories: format!("{:.0}", f.nutrients.calories),
            carbs: format!("{:.1}", f.nutrients.carbohydrates),
            protein: format!("{:.1}", f.nutrients.protein),
            fat: format!("{:.1}", f.nutrients.fat),
            source: f.source.clone(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..8)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_recipe_table(recipes: &[Recipe]) {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Servings")]
        servings: String,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
        #[tabled(rename = "Cal")]
        calories: String,
        #[tabled(rename = "Visibility")]
        visibility: String,
    }

    let rows: Vec<RecipeRow> = recipes
        .iter()
        .map(|r| RecipeRow {
            id: truncate(&r.id, 36),
            name: truncate(&r.name, 35),
            servings: format!("{}", r.servings),
            ingredients: r.ingredients.len(),
            calories: format!("{:.0}", r.nutrients.calories),
            visibility: r.visibility.as_str().to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_ingredient_table(ingredients: &[Ingredient]) {
    #[derive(Tabled)]
    struct IngredientRow {
        #[tabled(rename = "Food")]
        food: String,
        #[tabled(rename = "Quantity")]
        quantity: String,
        #[tabled(rename = "Servings")]
        servings: String,
        #[tabled(rename = "Cal")]
        calories: String,
    }

    let rows: Vec<IngredientRow> = ingredients
        .iter()
        .map(|i| {
            let food = i.food.as_ref();
            IngredientRow {
                food: truncate(food.map_or(i.food_item_id.as_str(), |f| f.name.as_str()), 35),
                quantity: format!("{:.0}g", i.quantity_g),
                servings: format!("{} x {}", i.servings, i.serving_size),
                calories: food.map_or("-".into(), |f| {
                    format!("{:.0}", f.per_gram().calories * i.quantity_g)
                }),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..4)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_nutrients(label: &str, n: &Nutrients) {
    println!(
        "{label}: {:.0} kcal | C: {:.1}g | P: {:.1}g | F: {:.1}g",
        no_neg_zero(n.calories),
        no_neg_zero(n.carbohydrates),
        no_neg_zero(n.protein),
        no_neg_zero(n.fat)
    );
}

fn serving_label(food: &FoodItem) -> String {
    if food.servings == 1 {
        food.serving_size.to_string()
    } else {
        format!("{} x {}", food.servings, food.serving_size)
    }
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
