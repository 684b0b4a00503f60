use anyhow::Result;
use std::process;

use larder_core::models::{NewRecipe, Recipe, Visibility};
use larder_core::service::LarderService;

use super::helpers::{parse_grams, print_ingredient_table, print_nutrients, print_recipe_table};

pub(crate) fn cmd_recipe_create(
    service: &LarderService,
    name: &str,
    servings: f64,
    instructions: Option<String>,
    public: bool,
    json: bool,
) -> Result<()> {
    let recipe = service.create_recipe(&NewRecipe {
        name: name.to_string(),
        servings,
        instructions: instructions.unwrap_or_default(),
        visibility: if public {
            Visibility::Public
        } else {
            Visibility::Owner
        },
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        println!(
            "Created recipe: {} ({} servings, id: {})",
            recipe.name, recipe.servings, recipe.id
        );
    }

    Ok(())
}

pub(crate) fn cmd_recipe_add_ingredient(
    service: &LarderService,
    recipe_id: &str,
    food_id: &str,
    quantity: &str,
    json: bool,
) -> Result<()> {
    let grams = parse_grams(quantity)?;
    let recipe = service.add_ingredient(recipe_id, food_id, grams)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        let line = recipe
            .ingredients
            .iter()
            .find(|i| i.food_item_id == food_id);
        match line {
            Some(i) => println!(
                "Added {grams}g to '{}' (now {}g = {} x {})",
                recipe.name, i.quantity_g, i.servings, i.serving_size
            ),
            None => println!("Added {grams}g to '{}'", recipe.name),
        }
        print_nutrients("Recipe total", &recipe.nutrients);
    }

    Ok(())
}

pub(crate) fn cmd_recipe_remove_ingredient(
    service: &LarderService,
    recipe_id: &str,
    food_id: &str,
    json: bool,
) -> Result<()> {
    let recipe = service.remove_ingredient(recipe_id, food_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        println!("Removed {food_id} from '{}'", recipe.name);
        print_nutrients("Recipe total", &recipe.nutrients);
    }

    Ok(())
}

pub(crate) fn cmd_recipe_set_servings(
    service: &LarderService,
    recipe_id: &str,
    servings: f64,
    json: bool,
) -> Result<()> {
    let recipe = service.set_recipe_servings(recipe_id, servings)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        println!("'{}' now makes {} servings", recipe.name, recipe.servings);
    }

    Ok(())
}

pub(crate) fn cmd_recipe_show(service: &LarderService, recipe_id: &str, json: bool) -> Result<()> {
    let detail = service.recipe_detail(recipe_id)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let recipe = &detail.recipe;
    let deleted = if recipe.soft_deleted { " [deleted]" } else { "" };
    println!("{}{deleted}", recipe.name);
    println!(
        "Servings: {} | Total weight: {:.0}g | Visibility: {}",
        recipe.servings,
        detail.total_weight_g,
        recipe.visibility.as_str()
    );

    if recipe.ingredients.is_empty() {
        println!("No ingredients yet.");
    } else {
        print_ingredient_table(&recipe.ingredients);
    }

    print_nutrients("Total", &recipe.nutrients);
    print_nutrients("Per serving", &detail.per_serving);

    if !recipe.instructions.trim().is_empty() {
        println!();
        println!("{}", recipe.instructions.trim());
    }

    Ok(())
}

pub(crate) fn cmd_recipe_scale(
    service: &LarderService,
    recipe_id: &str,
    servings: f64,
    json: bool,
) -> Result<()> {
    let scaled = service.scale_recipe(recipe_id, servings)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&scaled)?);
    } else {
        println!(
            "{}: {} -> {} servings",
            scaled.name, scaled.from_servings, scaled.to_servings
        );
        print_nutrients("Total", &scaled.totals);
    }

    Ok(())
}

pub(crate) fn cmd_recipe_list(
    service: &LarderService,
    visibility: Option<&str>,
    json: bool,
) -> Result<()> {
    let visibility = visibility.map(str::parse::<Visibility>).transpose()?;
    let recipes: Vec<Recipe> = service.list_recipes(visibility)?;

    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
    } else {
        print_recipe_table(&recipes);
    }

    Ok(())
}

pub(crate) fn cmd_recipe_delete(
    service: &LarderService,
    recipe_id: &str,
    soft: bool,
    json: bool,
) -> Result<()> {
    if soft {
        service.soft_delete_recipe(recipe_id)?;
    } else {
        service.delete_recipe(recipe_id)?;
    }

    if json {
        println!(
            "{}",
            serde_json::json!({ "deleted": recipe_id, "soft": soft })
        );
    } else if soft {
        println!("Hid recipe {recipe_id}");
    } else {
        println!("Deleted recipe {recipe_id}");
    }

    Ok(())
}
