use anyhow::Result;
use std::process;

use larder_core::SyncError;
use larder_core::models::{Entity, EntityKind};
use larder_core::service::LarderService;

use super::helpers::{json_error, print_entity_table, print_ingredient_table, print_nutrients};

pub(crate) async fn cmd_search(
    service: &LarderService,
    query: &str,
    kind: EntityKind,
    locale: Option<&str>,
    json: bool,
) -> Result<()> {
    let locale = locale.unwrap_or_default();
    let results = service.search(query, kind, locale).await?;

    if results.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No {kind} results found for '{query}'");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_entity_table(&results);
    }

    Ok(())
}

pub(crate) async fn cmd_show(
    service: &LarderService,
    kind: EntityKind,
    id: &str,
    json: bool,
) -> Result<()> {
    let entity = match service.lookup(kind, id).await {
        Ok(entity) => entity,
        Err(e @ SyncError::NotFound { .. }) => {
            if json {
                println!("{}", json_error(&e.to_string()));
            } else {
                eprintln!("{e}");
            }
            process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&entity)?);
        return Ok(());
    }

    match &entity {
        Entity::Food(food) => {
            let brand = food
                .brand
                .as_deref()
                .map(|b| format!(" ({b})"))
                .unwrap_or_default();
            println!("{}{brand}", food.name);
            println!("ID: {} | Source: {}", food.id, food.source);
            let per = food.declared_grams();
            print_nutrients(&format!("Per {per:.0}g"), &food.nutrients);
        }
        Entity::Recipe(recipe) => {
            println!("{} ({} servings)", recipe.name, recipe.servings);
            println!("ID: {} | Visibility: {}", recipe.id, recipe.visibility.as_str());
            if !recipe.ingredients.is_empty() {
                print_ingredient_table(&recipe.ingredients);
            }
            print_nutrients("Total", &recipe.nutrients);
            if !recipe.instructions.trim().is_empty() {
                println!();
                println!("{}", recipe.instructions.trim());
            }
        }
    }

    Ok(())
}

pub(crate) async fn cmd_upload(
    service: &LarderService,
    kind: EntityKind,
    id: &str,
    json: bool,
) -> Result<()> {
    let uploaded = service.upload(kind, id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&uploaded)?);
    } else {
        println!(
            "Uploaded {kind} '{}' (remote id: {})",
            uploaded.name(),
            uploaded.id()
        );
    }

    Ok(())
}

pub(crate) async fn cmd_report(
    service: &LarderService,
    kind: EntityKind,
    id: &str,
    reason: &str,
    json: bool,
) -> Result<()> {
    let ack = service.report(kind, id, reason).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ack)?);
    } else if ack.accepted {
        println!("Report for {kind} {id} accepted");
    } else {
        let reason = ack.message.as_deref().unwrap_or("no reason given");
        eprintln!("Report for {kind} {id} rejected: {reason}");
        process::exit(2);
    }

    Ok(())
}

pub(crate) fn cmd_invalidate(
    service: &LarderService,
    query: &str,
    kind: EntityKind,
    json: bool,
) -> Result<()> {
    let removed = service.invalidate(query, kind)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "query": query, "kind": kind, "invalidated": removed })
        );
    } else if removed {
        println!("Cleared cached {kind} results for '{query}'");
    } else {
        println!("Nothing cached for '{query}'");
    }

    Ok(())
}
