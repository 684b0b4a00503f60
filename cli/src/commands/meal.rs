use anyhow::{Result, bail};
use serde::Serialize;

use larder_core::models::{EntityKind, MealLine, ServingSize};
use larder_core::quantize::quantize;
use larder_core::service::LarderService;

use super::helpers::print_nutrients;

pub(crate) fn cmd_meal(service: &LarderService, lines: &[MealLine], json: bool) -> Result<()> {
    if lines.is_empty() {
        bail!("A meal needs at least one line (food:<id>:<grams> or recipe:<id>:<servings>)");
    }
    let totals = service.meal_totals(lines)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&totals)?);
    } else {
        for line in lines {
            let unit = match line.kind {
                EntityKind::FoodItem => "g",
                EntityKind::Recipe => " servings",
            };
            println!("  {} {}{unit}", line.id, line.quantity);
        }
        print_nutrients("Meal total", &totals);
    }

    Ok(())
}

#[derive(Serialize)]
struct Quantized {
    quantity_g: f64,
    servings: u32,
    serving_size: ServingSize,
}

pub(crate) fn cmd_quantize(grams: f64, max_servings: u32, json: bool) -> Result<()> {
    let (servings, serving_size) = quantize(grams, &ServingSize::ALL, max_servings)?;

    if json {
        let out = Quantized {
            quantity_g: grams,
            servings,
            serving_size,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{grams}g = {servings} x {serving_size}");
    }

    Ok(())
}
