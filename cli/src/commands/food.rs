use anyhow::Result;
use std::process;

use larder_core::models::{FoodItem, Nutrients, ServingSize};
use larder_core::service::LarderService;

use super::helpers::print_food_table;

pub(crate) struct FoodArgs {
    pub name: String,
    pub calories: f64,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub serving_size: ServingSize,
    pub servings: u32,
    pub brand: Option<String>,
}

pub(crate) fn cmd_food_add(service: &LarderService, args: FoodArgs, json: bool) -> Result<()> {
    let food = service.save_food(FoodItem {
        id: String::new(),
        name: args.name,
        brand: args.brand,
        nutrients: Nutrients::new(
            args.calories,
            args.carbs.unwrap_or(0.0),
            args.protein.unwrap_or(0.0),
            args.fat.unwrap_or(0.0),
        ),
        servings: args.servings,
        serving_size: args.serving_size,
        source: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&food)?);
    } else {
        let name = &food.name;
        let id = &food.id;
        println!("Added food: {name} (id: {id})");
    }

    Ok(())
}

pub(crate) fn cmd_food_list(service: &LarderService, json: bool) -> Result<()> {
    let foods = service.list_foods()?;

    if foods.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No foods found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&foods)?);
    } else {
        print_food_table(&foods);
    }

    Ok(())
}

pub(crate) fn cmd_food_delete(service: &LarderService, id: &str, json: bool) -> Result<()> {
    service.delete_food(id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted food {id}");
    }

    Ok(())
}
